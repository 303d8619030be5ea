//! Translation of readings into bus messages
//!
//! Message derivation is pure ([`reading_messages`]); [`publish_reading`] and
//! [`publish_discovery`] push the result to a [`Bus`] in order.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::bus::{Bus, BusMessage, BusResult};
use crate::discovery::Descriptor;
use crate::sensor::CurrentSample;

/// Aggregate status published once per sensor and cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorStatus<'a> {
    pub status: u16,
    pub last_update: &'a str,
}

pub fn channel_topic(root: &str, sensor_id: &str, topic_type: &str) -> String {
    format!("{root}/{sensor_id}/{topic_type}/state")
}

pub fn status_topic(root: &str, sensor_id: &str) -> String {
    format!("{root}/{sensor_id}/state")
}

/// Messages for one successful sample: every channel, then the status.
pub fn reading_messages(root: &str, sample: &CurrentSample) -> BusResult<Vec<BusMessage>> {
    let mut messages = Vec::with_capacity(sample.channels.len() + 1);

    for channel in &sample.channels {
        messages.push(BusMessage::json(
            channel_topic(root, &sample.sensor_id, channel.topic_type()),
            channel,
        )?);
    }

    messages.push(BusMessage::json(
        status_topic(root, &sample.sensor_id),
        &SensorStatus {
            status: 200,
            last_update: &sample.timestamp,
        },
    )?);

    Ok(messages)
}

#[instrument(skip_all, fields(sensor = %sample.sensor_id))]
pub async fn publish_reading(bus: &dyn Bus, root: &str, sample: &CurrentSample) -> BusResult<()> {
    let messages = reading_messages(root, sample)?;
    let count = messages.len();

    for message in messages {
        bus.publish(message).await?;
    }

    debug!("published {count} messages");
    Ok(())
}

/// Publish every descriptor to `{topic}/config` as a retained message.
pub async fn publish_discovery(
    bus: &dyn Bus,
    descriptors: &BTreeMap<String, Descriptor>,
) -> BusResult<usize> {
    info!("publishing {} discovery topics", descriptors.len());

    for (topic, descriptor) in descriptors {
        let topic = format!("{topic}/config");
        debug!("{topic}");
        bus.publish(BusMessage::json(topic, descriptor)?.retained())
            .await?;
    }

    Ok(descriptors.len())
}
