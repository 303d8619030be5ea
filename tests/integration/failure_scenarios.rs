//! Integration tests for failure scenarios
//!
//! These tests verify that:
//! - A failing sensor never prevents the others from publishing
//! - Failed sensors stay in the snapshot with their status code
//! - Discovery leaves out sensors without a successful reading
//! - A missing status page only drops the version fields

use crate::helpers::{
    TestBridge, create_mock_sensor, create_sample_json, create_test_config, host_of,
};
use pretty_assertions::assert_eq;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_mixed_outcomes_in_one_cycle() {
    let healthy = create_mock_sensor("0xA", &["CONSUMPTION"]).await;

    let slow = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(create_sample_json("0xB", &["CONSUMPTION"]))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&slow)
        .await;

    let broken = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&broken)
        .await;

    let bridge = TestBridge::new(create_test_config(
        &[
            ("broken", host_of(&broken)),
            ("healthy", host_of(&healthy)),
            ("slow", host_of(&slow)),
        ],
        None,
    ));

    let snapshot = bridge.cycle.run().await.published().await;

    assert_eq!(snapshot.get("healthy").unwrap().status_code(), 200);
    assert_eq!(snapshot.get("slow").unwrap().status_code(), 504);
    assert_eq!(snapshot.get("broken").unwrap().status_code(), 500);

    let slow_json = serde_json::to_value(snapshot.get("slow").unwrap()).unwrap();
    assert_eq!(
        slow_json["content"],
        format!("sensor API not reachable at http://{}/current-sample", host_of(&slow))
    );

    assert!(bridge.bus.topics().iter().all(|t| t.starts_with("neurio/0xA/")));
    assert!(bridge.store.last_reading().is_some());
}

#[tokio::test]
async fn test_all_sensors_down_keeps_last_reading_unset() {
    let bridge = TestBridge::new(create_test_config(
        &[("garage", "127.0.0.1:9".to_string())],
        None,
    ));

    let snapshot = bridge.cycle.run().await.published().await;

    assert_eq!(snapshot.get("garage").unwrap().status_code(), 500);
    assert!(bridge.bus.messages().is_empty());
    assert!(bridge.store.last_reading().is_none());
}

#[tokio::test]
async fn test_discovery_skips_failed_sensors() {
    let healthy = create_mock_sensor("0xA", &["CONSUMPTION"]).await;
    let bridge = TestBridge::new(create_test_config(
        &[
            ("down", "127.0.0.1:9".to_string()),
            ("healthy", host_of(&healthy)),
        ],
        None,
    ));

    let snapshot = bridge.cycle.run().await.published().await;
    let descriptors = bridge
        .discovery
        .build(&bridge.config.load_full(), &snapshot)
        .await;

    assert_eq!(descriptors.len(), 5);
    assert!(descriptors.keys().all(|k| k.contains("neurio-0xA/")));
}

#[tokio::test]
async fn test_missing_status_page_drops_versions() {
    let sensor = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/current-sample"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(create_sample_json("0xC", &["CONSUMPTION"])),
        )
        .mount(&sensor)
        .await;

    let bridge = TestBridge::new(create_test_config(&[("garage", host_of(&sensor))], None));
    let snapshot = bridge.cycle.run().await.published().await;
    let descriptors = bridge
        .discovery
        .build(&bridge.config.load_full(), &snapshot)
        .await;

    assert_eq!(descriptors.len(), 5);
    for descriptor in descriptors.values() {
        assert_eq!(descriptor.dev.hw_version, None);
        assert_eq!(descriptor.dev.sw_version, None);
        assert_eq!(descriptor.dev.manufacturer, "Generac");
    }
}

#[tokio::test]
async fn test_sensor_recovers_next_cycle() {
    let flaky = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&flaky)
        .await;
    Mock::given(method("GET"))
        .and(path("/current-sample"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(create_sample_json("0xD", &["CONSUMPTION"])),
        )
        .mount(&flaky)
        .await;

    let bridge = TestBridge::new(create_test_config(&[("garage", host_of(&flaky))], None));

    let first = bridge.cycle.run().await.published().await;
    assert_eq!(first.get("garage").unwrap().status_code(), 500);

    let second = bridge.cycle.run().await.published().await;
    assert_eq!(second.get("garage").unwrap().status_code(), 200);
    assert_eq!(bridge.bus.topics(), vec!["neurio/0xD/CONSUMPTION/state", "neurio/0xD/state"]);
}
