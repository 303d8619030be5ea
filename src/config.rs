use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use arc_swap::ArcSwap;
use serde::Serialize;
use tracing::{trace, warn};

/// Configuration shared between the poller, the API and the reload watcher.
///
/// Reloads swap the whole value; readers call `load()` once per unit of work.
pub type SharedConfig = Arc<ArcSwap<Config>>;

pub fn shared(config: Config) -> SharedConfig {
    Arc::new(ArcSwap::from_pointee(config))
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub sensors: SensorsConfig,

    #[serde(default)]
    pub mqtt: MqttConfig,

    #[serde(default)]
    pub homeassistant: HomeAssistantConfig,
}

impl Config {
    /// Derive the sensor registry for one cycle.
    pub fn registry(&self) -> SensorRegistry {
        self.sensors.registry()
    }
}

/// Status API listener
#[derive(Debug, Clone, serde::Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_addr")]
    pub address: IpAddr,

    #[serde(default = "default_bridge_port")]
    pub port: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            address: default_bridge_addr(),
            port: default_bridge_port(),
        }
    }
}

fn default_bridge_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_bridge_port() -> u16 {
    3000
}

/// The `[sensors]` table.
///
/// Besides the poll interval it holds one sub-table per sensor. Every other
/// key lands in `entries` and is sorted out by [`SensorsConfig::registry`].
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct SensorsConfig {
    /// Poll interval in milliseconds. Absent (or zero) means single-shot.
    pub query_interval: Option<u64>,

    #[serde(flatten)]
    pub entries: BTreeMap<String, toml::Value>,
}

impl SensorsConfig {
    pub fn query_interval(&self) -> Option<Duration> {
        self.query_interval
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn registry(&self) -> SensorRegistry {
        let mut sensors = Vec::with_capacity(self.entries.len());

        for (name, value) in &self.entries {
            if !value.is_table() {
                trace!("skipping non-sensor entry '{name}'");
                continue;
            }

            match value.clone().try_into::<SensorEntry>() {
                Ok(entry) => sensors.push(SensorConfig {
                    name: name.clone(),
                    host: entry.host,
                    device_model: entry.device_model,
                }),
                Err(e) => warn!("ignoring sensor '{name}': {e}"),
            }
        }

        SensorRegistry { sensors }
    }
}

#[derive(Debug, serde::Deserialize)]
struct SensorEntry {
    host: String,
    #[serde(default)]
    device_model: Option<String>,
}

/// One configured sensor endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorConfig {
    pub name: String,
    pub host: String,
    pub device_model: Option<String>,
}

impl SensorConfig {
    pub fn sample_url(&self) -> String {
        format!("http://{}/current-sample", self.host)
    }

    pub fn root_url(&self) -> String {
        format!("http://{}", self.host)
    }
}

/// Read-only view of the sensors configured for a cycle, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorRegistry {
    sensors: Vec<SensorConfig>,
}

impl SensorRegistry {
    pub fn iter(&self) -> impl Iterator<Item = &SensorConfig> {
        self.sensors.iter()
    }

    pub fn get(&self, name: &str) -> Option<&SensorConfig> {
        self.sensors.iter().find(|sensor| sensor.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_proto")]
    pub proto: String,

    #[serde(default = "default_mqtt_host")]
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    pub user: Option<String>,

    pub password: Option<String>,

    /// Root of all state topics
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,

    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            proto: default_mqtt_proto(),
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            user: None,
            password: None,
            topic: default_mqtt_topic(),
            client_id: default_mqtt_client_id(),
        }
    }
}

impl MqttConfig {
    /// Username and password, if a non-empty user is configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match self.user.as_deref() {
            Some(user) if !user.is_empty() => {
                Some((user, self.password.as_deref().unwrap_or_default()))
            }
            _ => None,
        }
    }
}

fn default_mqtt_proto() -> String {
    String::from("mqtt")
}

fn default_mqtt_host() -> String {
    String::from("localhost")
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topic() -> String {
    String::from("neurio")
}

fn default_mqtt_client_id() -> String {
    String::from("neurio-bridge")
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct HomeAssistantConfig {
    #[serde(default = "default_discovery_topic")]
    pub discovery_topic: String,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            discovery_topic: default_discovery_topic(),
        }
    }
}

fn default_discovery_topic() -> String {
    String::from("homeassistant")
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    toml::from_str(content).context("invalid configuration file provided")
}

pub fn read_config_file(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    parse_config(&file_content).inspect(|config| trace!("loaded config: {config:?}"))
}
