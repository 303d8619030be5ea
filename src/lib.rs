//! Bridge between Neurio energy sensors and an MQTT broker.
//!
//! The poller queries every configured sensor's local HTTP API, publishes each
//! channel's measurements to MQTT and keeps the latest snapshot for the status
//! API. On demand it also emits Home Assistant discovery descriptors.

pub mod actors;
pub mod api;
pub mod bus;
pub mod config;
pub mod discovery;
pub mod publisher;
pub mod reload;
pub mod sensor;
pub mod snapshot;
