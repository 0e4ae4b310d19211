//! Configuration loading and validation tests
//!
//! Files are written to temporary directories so data entries resolve
//! relative to the config file, the way the binary loads them.

use bytes::Bytes;
use edgeserve_agent::agent::{DeviceAgent, Payload};
use edgeserve_agent::config::{ConfigError, DeviceConfig};
use edgeserve_agent::testing::MockTransport;
use std::io::Write;
use tempfile::{tempdir, NamedTempFile};

const DEVICE_TOML: &str = r#"
[agent]
group_id = "dev0"

[mqtt]
broker_url = "mqtt://localhost:1883"

[data]
clip = { file = "clip.bin" }
frames = { files = ["f1.bin", "f2.bin"] }
count = { value = "331" }
"#;

#[test]
fn test_config_loads_successfully_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "{DEVICE_TOML}").unwrap();

    let config = DeviceConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.agent.group_id, "dev0");
    assert_eq!(config.agent.control_topic, "status");
    assert_eq!(config.mqtt.broker_url, "mqtt://localhost:1883");
    assert_eq!(config.data.len(), 3);
}

#[test]
fn test_data_files_resolve_relative_to_base_dir() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("clip.bin"), b"\x00\x01video").unwrap();
    std::fs::write(dir.path().join("f1.bin"), b"one").unwrap();
    std::fs::write(dir.path().join("f2.bin"), b"two").unwrap();

    let config_path = dir.path().join("device.toml");
    std::fs::write(&config_path, DEVICE_TOML).unwrap();

    let config = DeviceConfig::load_from_file(&config_path).unwrap();
    let store = config.load_data_store(dir.path()).unwrap();

    assert_eq!(
        store["clip"],
        Payload::Scalar(Bytes::from_static(b"\x00\x01video"))
    );
    assert_eq!(store["frames"], Payload::sequence(["one", "two"]));
    assert_eq!(store["count"], Payload::scalar("331"));
}

#[test]
fn test_missing_data_file_is_reported() {
    let dir = tempdir().unwrap();
    let config = DeviceConfig::from_toml_str(DEVICE_TOML).unwrap();

    match config.load_data_store(dir.path()) {
        Err(ConfigError::DataFile { path, .. }) => {
            assert!(path.starts_with(dir.path()));
        }
        other => panic!("expected DataFile error, got {other:?}"),
    }
}

#[test]
fn test_missing_config_file() {
    let result = DeviceConfig::load_from_file(std::path::Path::new("/nonexistent/device.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_invalid_toml_is_rejected() {
    let result = DeviceConfig::from_toml_str("[agent\ngroup_id = ");
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_required_section() {
    let result = DeviceConfig::from_toml_str("[agent]\ngroup_id = \"dev0\"\n");
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_wildcard_data_topic_is_rejected() {
    let toml_content = r#"
[agent]
group_id = "dev0"

[mqtt]
broker_url = "mqtt://localhost:1883"

[data]
"cams/+" = { value = "1" }
"#;

    let result = DeviceConfig::from_toml_str(toml_content);
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_credentials_come_from_environment() {
    let toml_content = r#"
[agent]
group_id = "dev0"

[mqtt]
broker_url = "mqtt://localhost:1883"
username_env = "EDGESERVE_TEST_USER_PRESENT"
password_env = "EDGESERVE_TEST_PASS_ABSENT"
"#;
    std::env::set_var("EDGESERVE_TEST_USER_PRESENT", "device");

    let config = DeviceConfig::from_toml_str(toml_content).unwrap();
    assert_eq!(config.get_mqtt_username().as_deref(), Some("device"));
    assert!(matches!(
        config.get_mqtt_password(),
        Err(ConfigError::EnvVarNotFound(name)) if name == "EDGESERVE_TEST_PASS_ABSENT"
    ));
}

#[test]
fn test_agent_built_from_config() {
    let toml_content = r#"
[agent]
group_id = "dev3"
control_topic = "ctl"

[mqtt]
broker_url = "mqtt://localhost:1883"
"#;
    let config = DeviceConfig::from_toml_str(toml_content).unwrap();
    let agent = DeviceAgent::from_config(&config, Default::default(), MockTransport::new());

    assert_eq!(agent.group_id(), "dev3");
    assert_eq!(agent.control_topic(), "ctl");
    assert!(agent.subscribed_topics().contains("ctl"));
    assert!(!agent.has_analysis_hook());
}

#[test]
fn test_config_round_trips_through_show_output() {
    let config = DeviceConfig::from_toml_str(DEVICE_TOML).unwrap();
    let shown = toml::to_string_pretty(&config).unwrap();
    assert_eq!(DeviceConfig::from_toml_str(&shown).unwrap(), config);
}
