//! Helper functions for integration tests

use async_trait::async_trait;
use neurio_bridge::{
    actors::poller::PollCycle,
    api::{ApiConfig, ApiState, spawn_api_server},
    bus::{Bus, BusMessage, BusResult},
    config::{SharedConfig, parse_config, shared},
    discovery::{DiscoveryBuilder, metadata::StatusPageScraper},
    sensor::SensorClient,
    snapshot::ReadingsStore,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_TIMEOUT: Duration = Duration::from_millis(300);

/// Bus that records every message instead of sending it
#[derive(Default)]
pub struct RecordingBus {
    messages: Mutex<Vec<BusMessage>>,
}

impl RecordingBus {
    pub fn messages(&self) -> Vec<BusMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.topic).collect()
    }

    pub fn payload(&self, topic: &str) -> Option<serde_json::Value> {
        self.messages()
            .into_iter()
            .rev()
            .find(|m| m.topic == topic)
            .map(|m| serde_json::from_slice(&m.payload).unwrap())
    }
}

#[async_trait]
impl Bus for RecordingBus {
    async fn publish(&self, message: BusMessage) -> BusResult<()> {
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}

pub fn create_sample_json(sensor_id: &str, channel_types: &[&str]) -> serde_json::Value {
    let channels: Vec<_> = channel_types
        .iter()
        .enumerate()
        .map(|(i, channel_type)| {
            serde_json::json!({
                "type": channel_type,
                "ch": i + 1,
                "eImp_Ws": 7_200_000,
                "eExp_Ws": 3599,
                "p_W": 1500,
                "q_VAR": -12,
                "v_V": 121.4
            })
        })
        .collect();

    serde_json::json!({
        "sensorId": sensor_id,
        "timestamp": "2024-05-01T12:00:00Z",
        "channels": channels
    })
}

/// Mock sensor answering `/current-sample` and its status page
pub async fn create_mock_sensor(sensor_id: &str, channel_types: &[&str]) -> MockServer {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/current-sample"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(create_sample_json(sensor_id, channel_types)),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<div class="col-sm-6">Hardware Version: 2.1<br>Firmware Version: 1.6.2<br>Uptime: 3d</div>"#,
        ))
        .mount(&mock_server)
        .await;
    mock_server
}

pub fn host_of(server: &MockServer) -> String {
    server.uri().trim_start_matches("http://").to_string()
}

pub fn create_test_config(sensors: &[(&str, String)], interval: Option<u64>) -> SharedConfig {
    let mut toml = String::from("[sensors]\n");
    if let Some(interval) = interval {
        toml.push_str(&format!("query_interval = {interval}\n"));
    }
    for (name, host) in sensors {
        toml.push_str(&format!(
            "[sensors.{name}]\nhost = \"{host}\"\ndevice_model = \"Neurio W1\"\n"
        ));
    }
    toml.push_str("[mqtt]\ntopic = \"neurio\"\n[homeassistant]\ndiscovery_topic = \"homeassistant\"\n");
    shared(parse_config(&toml).unwrap())
}

/// All bridge components wired to a recording bus
pub struct TestBridge {
    pub config: SharedConfig,
    pub store: Arc<ReadingsStore>,
    pub bus: Arc<RecordingBus>,
    pub cycle: PollCycle,
    pub discovery: DiscoveryBuilder,
}

impl TestBridge {
    pub fn new(config: SharedConfig) -> Self {
        let store = Arc::new(ReadingsStore::new());
        let bus = Arc::new(RecordingBus::default());
        let client = SensorClient::with_timeout(TEST_TIMEOUT).unwrap();
        let cycle = PollCycle::new(config.clone(), client, store.clone(), bus.clone());
        let scraper = StatusPageScraper::with_timeout(TEST_TIMEOUT).unwrap();
        let discovery = DiscoveryBuilder::new(Arc::new(scraper));

        Self {
            config,
            store,
            bus,
            cycle,
            discovery,
        }
    }

    pub async fn spawn_api(&self) -> SocketAddr {
        let state = ApiState::new(
            self.store.clone(),
            self.config.clone(),
            self.discovery.clone(),
            TEST_TIMEOUT,
        );
        let config = ApiConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            enable_cors: false,
        };
        spawn_api_server(config, state).await.unwrap()
    }
}
