//! EdgeServe control command injector
//!
//! Sends `ACTION_TOPIC` control records keyed to a device's group id, for
//! driving a running agent by hand.
//!
//! ## Usage
//!
//! ```bash
//! # Make dev0 subscribe to cam_front
//! inject-command --group-id dev0 SUBSCRIBE_cam_front
//!
//! # Several commands in order
//! inject-command --group-id dev0 SUBSCRIBE_topicA PUBLISH_data0
//!
//! # Custom broker and control topic
//! inject-command --broker-url mqtt://broker:1883 --control-topic ctl \
//!   --group-id dev1 PUBLISH_data1
//! ```

use bytes::Bytes;
use clap::Parser;
use edgeserve_agent::config::MqttSection;
use edgeserve_agent::observability::init_default_logging;
use edgeserve_agent::protocol::{ControlMessage, DEFAULT_CONTROL_TOPIC};
use edgeserve_agent::transport::mqtt::MqttClient;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "inject-command",
    about = "Send control commands to an EdgeServe device agent"
)]
struct Args {
    /// Group id of the target device
    #[arg(long, required = true)]
    group_id: String,

    /// Commands in ACTION_TOPIC form, sent in order
    #[arg(required = true, value_parser = parse_command)]
    commands: Vec<ControlMessage>,

    /// Control topic the device listens on
    #[arg(long, default_value = DEFAULT_CONTROL_TOPIC)]
    control_topic: String,

    /// MQTT broker URL
    #[arg(long, env = "MQTT_BROKER_URL", default_value = "mqtt://localhost:1883")]
    broker_url: String,
}

fn parse_command(value: &str) -> Result<ControlMessage, String> {
    ControlMessage::decode(value.as_bytes()).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_default_logging();
    let args = Args::parse();

    let mut client = MqttClient::new("inject-command", MqttSection::with_broker(&args.broker_url))?;
    client.connect().await?;

    for command in &args.commands {
        client
            .send(
                &args.control_topic,
                Some(&args.group_id),
                Bytes::from(command.encode()),
            )
            .await?;
        info!(group_id = %args.group_id, command = %command, "Command sent");
    }

    client.disconnect().await?;
    Ok(())
}
