//! Startup sequence and message contract against the mock broker

use rpireport_devkit::{ConnectOutcome, MockTransport, StaticMetrics, TestHarness};
use rumqttc::QoS;
use serde_json::Value;

#[tokio::test(start_paused = true)]
async fn test_online_discovery_then_first_report() {
    let mut harness = TestHarness::new();
    let running = harness.start().await.unwrap();

    let messages = harness.transport.get_published_messages();
    let topics: Vec<&str> = messages.iter().map(|m| m.topic.as_str()).collect();
    assert_eq!(
        topics,
        vec![
            "home/nodes/sensor/rpi-pi3plus/status",
            "homeassistant/sensor/rpi-pi3plus/monitor/config",
            "homeassistant/sensor/rpi-pi3plus/temperature/config",
            "homeassistant/sensor/rpi-pi3plus/disk_used/config",
            "home/nodes/sensor/rpi-pi3plus/monitor",
        ]
    );

    let seqs: Vec<u64> = messages.iter().map(|m| m.seq).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));

    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_will_registered_before_connect() {
    let mut harness = TestHarness::new();
    let running = harness.start().await.unwrap();

    let will = harness.transport.will().unwrap();
    assert_eq!(will.topic, harness.topics.status);
    assert_eq!(will.payload, "offline");
    assert!(will.retain);
    assert_eq!(harness.transport.connect_calls(), 1);

    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_online_marker_is_not_retained() {
    let mut harness = TestHarness::new();
    let running = harness.start().await.unwrap();

    let status = harness.status_messages();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].payload_str(), "online");
    assert!(!status[0].retain);

    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_discovery_published_once_and_retained() {
    let mut harness = TestHarness::new().with_interval(2);
    let running = harness.start().await.unwrap();

    tokio::time::sleep(std::time::Duration::from_secs(10 * 60)).await;

    let discovery = harness.discovery_messages();
    assert_eq!(discovery.len(), 3);
    for msg in &discovery {
        assert!(msg.retain);
        assert_eq!(msg.qos, QoS::AtLeastOnce);
        let config = msg.json().unwrap();
        assert_eq!(config["~"], "home/nodes/sensor/rpi-pi3plus");
        assert_eq!(config["avty_t"], "~/status");
        assert_eq!(config["stat_t"], "~/monitor");
        assert_eq!(config["dev"]["identifiers"][0], "RPi-b827ebMon1af3bc");
    }

    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_report_payload_shape() {
    let mut harness = TestHarness::new().with_interval(7);
    let running = harness.start().await.unwrap();

    let report = harness.report_messages();
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].qos, QoS::AtLeastOnce);
    assert!(!report[0].retain);

    let payload = harness.last_report().unwrap();
    assert_eq!(payload.as_object().unwrap().len(), 1);
    harness.assert_report_field("info.report_interval", &Value::from(7)).unwrap();
    harness.assert_report_field("info.rpi_model", &Value::from("RPi 3 Model B+r1.3")).unwrap();
    harness.assert_report_field("info.root_fs_used_percent", &Value::from(17)).unwrap();
    harness.assert_report_field("info.temperature_c", &Value::from(48.3)).unwrap();
    harness.assert_report_field("info.networking.wlan0.IP", &Value::from("192.168.100.189")).unwrap();
    assert!(payload["info"]["reporter"]
        .as_str()
        .unwrap()
        .starts_with("rpireport-agent v"));

    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_degraded_metrics_still_publish() {
    let mut harness = TestHarness::new().with_metrics(StaticMetrics::degraded());
    let running = harness.start().await.unwrap();

    let payload = harness.last_report().unwrap();
    let info = &payload["info"];
    assert_eq!(info["host_name"], "pi3plus");
    assert_eq!(info["last_update"], "");
    assert!(info["temperature_c"].is_null());
    assert!(info.get("memory_size").is_none());
    assert!(info.get("root_fs_total").is_none());
    assert!(info.get("cpu_model").is_none());

    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_marks_offline_and_stops() {
    let mut harness = TestHarness::new().with_interval(2);
    let running = harness.start().await.unwrap();

    running.shutdown().await;
    let published = harness.transport.get_published_messages().len();

    let last = harness.status_messages().pop().unwrap();
    assert_eq!(last.payload_str(), "offline");
    assert!(last.retain);
    assert_eq!(harness.transport.disconnect_calls(), 1);

    tokio::time::sleep(std::time::Duration::from_secs(30 * 60)).await;
    assert_eq!(harness.transport.get_published_messages().len(), published);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_while_connecting_ends_cleanly() {
    let transport = MockTransport::with_outcome(ConnectOutcome::Hang);
    let mut harness = TestHarness::new().with_transport(transport);
    let agent = harness.agent();

    let start = tokio::time::Instant::now();
    let result = agent
        .run_until(tokio::time::sleep(std::time::Duration::from_secs(5)))
        .await;

    assert!(result.is_ok());
    assert_eq!(start.elapsed(), std::time::Duration::from_secs(5));
    assert_eq!(harness.transport.disconnect_calls(), 1);
    assert!(harness.transport.get_published_messages().is_empty());
    assert_eq!(harness.metrics_calls(), 0);
}
