//! Home Assistant MQTT discovery descriptors
//!
//! Every channel of every successfully read sensor is advertised as five
//! sensors (imported energy, exported energy, power, voltage, reactive power).
//! Descriptors are keyed by their discovery topic; the config suffix is added
//! when publishing.
//!
//! ```text
//! {discovery_root}/sensor/neurio-{sensorId}/{type}_{kind}
//! ```

pub mod metadata;

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::config::{Config, SensorConfig};
use crate::publisher::{channel_topic, status_topic};
use crate::sensor::{Channel, CurrentSample, Reading};
use crate::snapshot::ReadingsSnapshot;

use self::metadata::{DeviceMetadata, MetadataSource};

pub const VENDOR_PREFIX: &str = "neurio";
pub const MANUFACTURER: &str = "Generac";
pub const VIA_DEVICE: &str = "neurio-2-mqtt";

/// Seconds after which Home Assistant marks a value as unavailable
pub const EXPIRE_AFTER_SECS: u64 = 95;

const AVAILABILITY_TEMPLATE: &str = "{{ 'online' if value_json.status == 200 else 'offline' }}";

/// Convert watt-seconds to whole watt-hours, as the energy templates do.
pub fn ws_to_wh(ws: i64) -> i64 {
    ws.div_euclid(3600)
}

/// The five values advertised per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementKind {
    EnergyImported,
    EnergyExported,
    Power,
    Voltage,
    ReactivePower,
}

impl MeasurementKind {
    pub const ALL: [MeasurementKind; 5] = [
        MeasurementKind::EnergyImported,
        MeasurementKind::EnergyExported,
        MeasurementKind::Power,
        MeasurementKind::Voltage,
        MeasurementKind::ReactivePower,
    ];

    /// Suffix used in topics and unique ids
    pub fn key(self) -> &'static str {
        match self {
            MeasurementKind::EnergyImported => "eImp_Wh",
            MeasurementKind::EnergyExported => "eExp_Wh",
            MeasurementKind::Power => "p_W",
            MeasurementKind::Voltage => "v_V",
            MeasurementKind::ReactivePower => "q_VAR",
        }
    }

    /// Field of the channel payload the value is read from
    pub fn field(self) -> &'static str {
        match self {
            MeasurementKind::EnergyImported => "eImp_Ws",
            MeasurementKind::EnergyExported => "eExp_Ws",
            MeasurementKind::Power => "p_W",
            MeasurementKind::Voltage => "v_V",
            MeasurementKind::ReactivePower => "q_VAR",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MeasurementKind::EnergyImported => "Energy In",
            MeasurementKind::EnergyExported => "Energy Out",
            MeasurementKind::Power => "Power",
            MeasurementKind::Voltage => "Voltage",
            MeasurementKind::ReactivePower => "Reactive Power",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            MeasurementKind::EnergyImported | MeasurementKind::EnergyExported => "Wh",
            MeasurementKind::Power => "W",
            MeasurementKind::Voltage => "V",
            MeasurementKind::ReactivePower => "var",
        }
    }

    pub fn device_class(self) -> &'static str {
        match self {
            MeasurementKind::EnergyImported | MeasurementKind::EnergyExported => "energy",
            MeasurementKind::Power => "power",
            MeasurementKind::Voltage => "voltage",
            MeasurementKind::ReactivePower => "reactive_power",
        }
    }

    pub fn state_class(self) -> &'static str {
        match self {
            MeasurementKind::EnergyImported | MeasurementKind::EnergyExported => "total_increasing",
            _ => "measurement",
        }
    }

    pub fn icon(self) -> Option<&'static str> {
        match self {
            MeasurementKind::EnergyImported => Some("mdi:transmission-tower-export"),
            MeasurementKind::EnergyExported => Some("mdi:transmission-tower-import"),
            MeasurementKind::ReactivePower => Some("mdi:flash-outline"),
            MeasurementKind::Power | MeasurementKind::Voltage => None,
        }
    }

    pub fn value_template(self) -> String {
        match self {
            MeasurementKind::EnergyImported | MeasurementKind::EnergyExported => {
                format!("{{{{ value_json.{} // 3600 }}}}", self.field())
            }
            _ => format!("{{{{ value_json.{} }}}}", self.field()),
        }
    }

    /// The value a subscriber derives from `channel` with [`Self::value_template`].
    ///
    /// `None` when the channel does not report the field.
    pub fn display_value(self, channel: &Channel) -> Option<serde_json::Value> {
        let value = channel.measurement(self.field())?;
        match self {
            MeasurementKind::EnergyImported | MeasurementKind::EnergyExported => {
                match value.as_i64() {
                    Some(ws) => Some(ws_to_wh(ws).into()),
                    None => value.as_f64().map(|ws| (ws / 3600.0).floor().into()),
                }
            }
            _ => Some(serde_json::Value::Number(value.clone())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub name: String,
    pub ids: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub configuration_url: String,
    pub manufacturer: &'static str,
    pub via_device: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hw_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Availability {
    pub topic: String,
    pub value_template: &'static str,
}

/// Discovery payload for one measurement of one channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Descriptor {
    pub name: String,
    pub unique_id: String,
    pub state_topic: String,
    pub value_template: String,
    pub unit_of_measurement: &'static str,
    pub dev: Device,
    pub availability: Availability,
    pub device_class: &'static str,
    pub state_class: &'static str,
    pub expire_after: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<&'static str>,
}

/// Topic roots descriptors point at
#[derive(Debug, Clone, Copy)]
pub struct TopicRoots<'a> {
    pub state: &'a str,
    pub discovery: &'a str,
}

impl<'a> TopicRoots<'a> {
    pub fn from_config(config: &'a Config) -> Self {
        Self {
            state: &config.mqtt.topic,
            discovery: &config.homeassistant.discovery_topic,
        }
    }
}

pub fn discovery_topic(discovery_root: &str, sensor_id: &str, topic_type: &str, kind: MeasurementKind) -> String {
    format!(
        "{discovery_root}/sensor/{VENDOR_PREFIX}-{sensor_id}/{topic_type}_{}",
        kind.key()
    )
}

fn humanize(topic_type: &str) -> String {
    topic_type.replace('_', " ")
}

/// Descriptors for one sensor, five per channel.
pub fn sensor_descriptors(
    roots: TopicRoots<'_>,
    sensor: &SensorConfig,
    reading: &Reading,
    sample: &CurrentSample,
    metadata: DeviceMetadata,
) -> Vec<(String, Descriptor)> {
    let sensor_id = &sample.sensor_id;

    let dev = Device {
        name: reading.name.clone(),
        ids: sensor_id.clone(),
        model: reading.model.clone(),
        configuration_url: sensor.root_url(),
        manufacturer: MANUFACTURER,
        via_device: VIA_DEVICE,
        hw_version: metadata.hardware_version,
        sw_version: metadata.firmware_version,
    };

    let availability = Availability {
        topic: status_topic(roots.state, sensor_id),
        value_template: AVAILABILITY_TEMPLATE,
    };

    let mut descriptors = Vec::with_capacity(sample.channels.len() * MeasurementKind::ALL.len());

    for channel in &sample.channels {
        let topic_type = channel.topic_type();
        let state_topic = channel_topic(roots.state, sensor_id, topic_type);

        for kind in MeasurementKind::ALL {
            descriptors.push((
                discovery_topic(roots.discovery, sensor_id, topic_type, kind),
                Descriptor {
                    name: format!("{} {} {}", reading.name, humanize(topic_type), kind.label()),
                    unique_id: format!("{sensor_id}_{}_{}", channel.ch, kind.key()),
                    state_topic: state_topic.clone(),
                    value_template: kind.value_template(),
                    unit_of_measurement: kind.unit(),
                    dev: dev.clone(),
                    availability: availability.clone(),
                    device_class: kind.device_class(),
                    state_class: kind.state_class(),
                    expire_after: EXPIRE_AFTER_SECS,
                    icon: kind.icon(),
                },
            ));
        }
    }

    descriptors
}

/// Derives discovery descriptors from the current snapshot
#[derive(Clone)]
pub struct DiscoveryBuilder {
    metadata: Arc<dyn MetadataSource>,
}

impl DiscoveryBuilder {
    pub fn new(metadata: Arc<dyn MetadataSource>) -> Self {
        Self { metadata }
    }

    /// Build descriptors for every configured sensor with a successful reading.
    ///
    /// Metadata for all sensors is fetched concurrently; a miss only drops the
    /// version fields of that sensor's device block.
    #[instrument(skip_all)]
    pub async fn build(&self, config: &Config, snapshot: &ReadingsSnapshot) -> BTreeMap<String, Descriptor> {
        let registry = config.registry();
        let roots = TopicRoots::from_config(config);

        let targets: Vec<_> = registry
            .iter()
            .filter_map(|sensor| {
                let reading = snapshot.get(&sensor.name)?;
                let sample = reading.sample()?;
                Some((sensor, reading, sample))
            })
            .collect();

        debug!(
            "building discovery for {} of {} sensors",
            targets.len(),
            registry.len()
        );

        let metadata = join_all(
            targets
                .iter()
                .map(|(sensor, _, _)| self.metadata.fetch(sensor)),
        )
        .await;

        targets
            .into_iter()
            .zip(metadata)
            .flat_map(|((sensor, reading, sample), metadata)| {
                sensor_descriptors(roots, sensor, reading, sample, metadata)
            })
            .collect()
    }
}
