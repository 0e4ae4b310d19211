//! Configuration system for the device agent
//!
//! A device is described by one TOML file: its identity, how to reach the
//! broker, the data it holds for `PUBLISH` commands and, optionally, the
//! analyzer command run on data records.

use crate::agent::payload::{DataStore, Payload};
use crate::protocol::topics::{validate_group_id, validate_topic, DEFAULT_CONTROL_TOPIC};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main device configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    pub agent: AgentSection,
    pub mqtt: MqttSection,
    /// Data held for publishing, keyed by topic
    #[serde(default)]
    pub data: BTreeMap<String, DataEntry>,
    /// External analyzer run on data records (optional)
    pub analysis: Option<AnalysisSection>,
}

/// Agent identity section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSection {
    /// Group identifier (must match [a-zA-Z0-9._-]+)
    pub group_id: String,
    /// Topic carrying control commands
    #[serde(default = "default_control_topic")]
    pub control_topic: String,
}

fn default_control_topic() -> String {
    DEFAULT_CONTROL_TOPIC.to_string()
}

/// MQTT broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port
    pub broker_url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Largest packet accepted or sent, in bytes
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: u32,
    /// Subscribe through `$share/{group_id}/...` filters
    #[serde(default)]
    pub shared_subscription: bool,
}

impl MqttSection {
    /// Section pointing at a broker with every optional field at its default
    pub fn with_broker(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            username_env: None,
            password_env: None,
            keep_alive_secs: default_keep_alive(),
            max_packet_size: default_max_packet_size(),
            shared_subscription: false,
        }
    }
}

fn default_keep_alive() -> u64 {
    60
}

fn default_max_packet_size() -> u32 {
    100 * 1024 * 1024 // video payloads
}

/// Where a topic's payload comes from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DataEntry {
    /// `topic = { value = "331" }`
    Value { value: String },
    /// `topic = { values = ["a", "b"] }`
    Values { values: Vec<String> },
    /// `topic = { file = "clip.mp4" }`
    File { file: PathBuf },
    /// `topic = { files = ["a.jpg", "b.jpg"] }`
    Files { files: Vec<PathBuf> },
}

impl DataEntry {
    /// Resolve into a payload, reading files relative to `base_dir`
    pub fn load(&self, base_dir: &Path) -> Result<Payload, ConfigError> {
        let read = |path: &Path| -> Result<Bytes, ConfigError> {
            let full = if path.is_absolute() {
                path.to_path_buf()
            } else {
                base_dir.join(path)
            };
            std::fs::read(&full)
                .map(Bytes::from)
                .map_err(|e| ConfigError::DataFile { path: full, source: e })
        };

        Ok(match self {
            DataEntry::Value { value } => Payload::Scalar(Bytes::from(value.clone())),
            DataEntry::Values { values } => Payload::Sequence(
                values.iter().map(|v| Bytes::from(v.clone())).collect(),
            ),
            DataEntry::File { file } => Payload::Scalar(read(file)?),
            DataEntry::Files { files } => Payload::Sequence(
                files
                    .iter()
                    .map(|f| read(f))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        })
    }
}

/// External analyzer section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisSection {
    /// Program and arguments; `{input}` is replaced by the payload file path
    pub command: Vec<String>,
    /// File the payload is written to when `{input}` is used
    pub input_path: Option<PathBuf>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to read data file {}: {source}", path.display())]
    DataFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid group ID: {0}")]
    InvalidGroupId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DeviceConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DeviceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the group id, e.g. from the command line
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Result<Self, ConfigError> {
        self.agent.group_id = group_id.into();
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_group_id(&self.agent.group_id).map_err(|e| {
            ConfigError::InvalidGroupId(format!("'{}': {e}", self.agent.group_id))
        })?;

        validate_topic(&self.agent.control_topic).map_err(|e| {
            ConfigError::InvalidConfig(format!(
                "control topic '{}': {e}",
                self.agent.control_topic
            ))
        })?;

        for topic in self.data.keys() {
            validate_topic(topic)
                .map_err(|e| ConfigError::InvalidConfig(format!("data topic '{topic}': {e}")))?;
            if *topic == self.agent.control_topic {
                return Err(ConfigError::InvalidConfig(format!(
                    "data topic '{topic}' collides with the control topic"
                )));
            }
        }

        if let Some(analysis) = &self.analysis {
            if analysis.command.is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "[analysis] command must name a program".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Read every configured payload into memory
    pub fn load_data_store(&self, base_dir: &Path) -> Result<DataStore, ConfigError> {
        self.data
            .iter()
            .map(|(topic, source)| Ok((topic.clone(), source.load(base_dir)?)))
            .collect()
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        self.mqtt
            .username_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT password from environment variable, required once a username env is set
    pub fn get_mqtt_password(&self) -> Result<Option<String>, ConfigError> {
        match &self.mqtt.password_env {
            Some(name) => std::env::var(name)
                .map(Some)
                .map_err(|_| ConfigError::EnvVarNotFound(name.clone())),
            None => Ok(None),
        }
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[agent]
group_id = "test-device"

[mqtt]
broker_url = "mqtt://localhost:1883"

[data]
data0 = { values = ["x", "y", "z"] }
data1 = { value = "331" }
"#;
        Self::from_toml_str(toml_content).expect("Test config should parse")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[agent]
group_id = "dev0"
control_topic = "control"

[mqtt]
broker_url = "mqtts://broker.local:8883"
username_env = "MQTT_USERNAME"
password_env = "MQTT_PASSWORD"
keep_alive_secs = 30
max_packet_size = 1048576
shared_subscription = true

[data]
data1 = { value = "331" }
data2 = { values = ["a", "b"] }
data3 = { file = "clip.mp4" }
data4 = { files = ["a.jpg", "b.jpg"] }

[analysis]
command = ["python3", "detect.py", "--source", "{input}"]
input_path = "/tmp/frame.bin"
"#;

        let config = DeviceConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.agent.group_id, "dev0");
        assert_eq!(config.agent.control_topic, "control");
        assert_eq!(config.mqtt.keep_alive_secs, 30);
        assert_eq!(config.mqtt.max_packet_size, 1_048_576);
        assert!(config.mqtt.shared_subscription);
        assert_eq!(config.data.len(), 4);
        assert_eq!(
            config.data["data1"],
            DataEntry::Value {
                value: "331".to_string()
            }
        );
        assert_eq!(
            config.data["data3"],
            DataEntry::File {
                file: PathBuf::from("clip.mp4")
            }
        );
        let analysis = config.analysis.unwrap();
        assert_eq!(analysis.command[0], "python3");
        assert_eq!(analysis.input_path, Some(PathBuf::from("/tmp/frame.bin")));
    }

    #[test]
    fn test_minimal_config_defaults() {
        let toml_content = r#"
[agent]
group_id = "dev0"

[mqtt]
broker_url = "mqtt://localhost:1883"
"#;

        let config = DeviceConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.agent.control_topic, DEFAULT_CONTROL_TOPIC);
        assert_eq!(config.mqtt.keep_alive_secs, 60);
        assert_eq!(config.mqtt.max_packet_size, 104_857_600);
        assert!(!config.mqtt.shared_subscription);
        assert!(config.data.is_empty());
        assert!(config.analysis.is_none());
    }

    #[test]
    fn test_invalid_group_id_rejected() {
        let toml_content = r#"
[agent]
group_id = "dev 0"

[mqtt]
broker_url = "mqtt://localhost:1883"
"#;

        let result = DeviceConfig::from_toml_str(toml_content);
        assert!(matches!(result, Err(ConfigError::InvalidGroupId(_))));
    }

    #[test]
    fn test_data_topic_colliding_with_control_rejected() {
        let toml_content = r#"
[agent]
group_id = "dev0"

[mqtt]
broker_url = "mqtt://localhost:1883"

[data]
status = { value = "1" }
"#;

        let result = DeviceConfig::from_toml_str(toml_content);
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_empty_analysis_command_rejected() {
        let toml_content = r#"
[agent]
group_id = "dev0"

[mqtt]
broker_url = "mqtt://localhost:1883"

[analysis]
command = []
"#;

        let result = DeviceConfig::from_toml_str(toml_content);
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_with_group_id_override() {
        let config = DeviceConfig::test_config().with_group_id("dev7").unwrap();
        assert_eq!(config.agent.group_id, "dev7");

        let result = DeviceConfig::test_config().with_group_id("bad id");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_inline_data_store() {
        let config = DeviceConfig::test_config();
        let store = config.load_data_store(Path::new(".")).unwrap();

        assert_eq!(
            store.get("data0"),
            Some(&Payload::Sequence(vec![
                Bytes::from("x"),
                Bytes::from("y"),
                Bytes::from("z"),
            ]))
        );
        assert_eq!(store.get("data1"), Some(&Payload::Scalar(Bytes::from("331"))));
    }

    #[test]
    fn test_missing_data_file_reported() {
        let source = DataEntry::File {
            file: PathBuf::from("does-not-exist.bin"),
        };
        let result = source.load(Path::new("/nonexistent-dir"));
        assert!(matches!(result, Err(ConfigError::DataFile { .. })));
    }

    #[test]
    fn test_password_env_missing() {
        let mut config = DeviceConfig::test_config();
        config.mqtt.password_env = Some("EDGESERVE_TEST_UNSET_PASSWORD_VAR".to_string());
        assert!(matches!(
            config.get_mqtt_password(),
            Err(ConfigError::EnvVarNotFound(_))
        ));
    }
}
