//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - /readings mirrors the latest snapshot
//! - /discovery returns descriptors keyed by topic
//! - /healthcheck reports ages, uptime and per-sensor state

use crate::helpers::{TEST_TIMEOUT, TestBridge, create_mock_sensor, create_test_config, host_of};
use axum::http::StatusCode;
use neurio_bridge::api::{HealthResponse, SensorHealthStatus};
use pretty_assertions::assert_eq;
use serde_json::Value;

#[tokio::test]
async fn test_readings_endpoint() {
    let garage = create_mock_sensor("0xA", &["CONSUMPTION"]).await;
    let bridge = TestBridge::new(create_test_config(
        &[("garage", host_of(&garage)), ("shed", "127.0.0.1:9".to_string())],
        None,
    ));
    let addr = bridge.spawn_api().await;

    // before the first cycle the snapshot is empty
    let body: Value = reqwest::get(format!("http://{addr}/readings"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, serde_json::json!({}));

    bridge.cycle.run().await.published().await;

    let response = reqwest::get(format!("http://{addr}/readings")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();

    assert_eq!(body["garage"]["name"], "garage");
    assert_eq!(body["garage"]["model"], "Neurio W1");
    assert_eq!(body["garage"]["status"], 200);
    assert_eq!(body["garage"]["content"]["sensorId"], "0xA");
    assert!(body["garage"]["polled_at"].is_string());

    assert_eq!(body["shed"]["status"], 500);
    assert!(body["shed"]["content"].is_string());
}

#[tokio::test]
async fn test_discovery_endpoint() {
    let garage = create_mock_sensor("0xA", &["PHASE_A_CONSUMPTION"]).await;
    let bridge = TestBridge::new(create_test_config(&[("garage", host_of(&garage))], None));
    let addr = bridge.spawn_api().await;

    let empty: Value = reqwest::get(format!("http://{addr}/discovery"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(empty, serde_json::json!({}));

    bridge.cycle.run().await.published().await;

    let body: Value = reqwest::get(format!("http://{addr}/discovery"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let descriptors = body.as_object().unwrap();
    assert_eq!(descriptors.len(), 5);

    let voltage = &body["homeassistant/sensor/neurio-0xA/PHASE_A_v_V"];
    assert_eq!(voltage["unit_of_measurement"], "V");
    assert_eq!(voltage["device_class"], "voltage");
    assert_eq!(voltage["expire_after"], 95);
    assert_eq!(voltage["state_topic"], "neurio/0xA/PHASE_A/state");
    assert_eq!(voltage["dev"]["sw_version"], "1.6.2");
}

#[tokio::test]
async fn test_healthcheck_before_first_reading() {
    let bridge = TestBridge::new(create_test_config(
        &[("garage", "127.0.0.1:9".to_string())],
        Some(5000),
    ));
    let addr = bridge.spawn_api().await;

    let raw: Value = reqwest::get(format!("http://{addr}/healthcheck"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(raw["readingAge"], Value::Null);
    assert_eq!(raw["toleratedAge"], 5000 + TEST_TIMEOUT.as_millis() as u64);
    assert_eq!(raw["sensors"]["garage"]["status"], "N/A");
    assert!(raw["uptime"].is_string());
}

#[tokio::test]
async fn test_healthcheck_after_cycle() {
    let garage = create_mock_sensor("0xA", &["CONSUMPTION"]).await;
    let bridge = TestBridge::new(create_test_config(
        &[("garage", host_of(&garage)), ("shed", "127.0.0.1:9".to_string())],
        None,
    ));
    let addr = bridge.spawn_api().await;

    bridge.cycle.run().await.published().await;

    let health: HealthResponse = reqwest::get(format!("http://{addr}/healthcheck"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let age = health.reading_age.expect("reading age after a successful cycle");
    assert!((0..5000).contains(&age));
    assert_eq!(health.tolerated_age, None);
    assert_eq!(health.sensors["garage"].status, SensorHealthStatus::Ok);
    assert_eq!(health.sensors["shed"].status, SensorHealthStatus::NotAvailable);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let bridge = TestBridge::new(create_test_config(&[], None));
    let addr = bridge.spawn_api().await;

    let response = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
