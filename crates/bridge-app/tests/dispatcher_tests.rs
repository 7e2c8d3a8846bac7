use std::sync::Mutex;

use bridge_app::{DispatchOutcome, Dispatcher};
use discovery::DiscoveryConfig;
use mqtt_publisher::{PublishError, PublishSink, Publisher};
use rumqttc::{AsyncClient, MqttOptions};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use types::DeviceIdentity;

const ACURITE: &str =
    r#"{"model":"Acurite-5n1","id":123,"temperature_C":21.5,"humidity":55,"battery_ok":1}"#;

#[derive(Debug, Clone, PartialEq)]
struct Message {
    topic: String,
    payload: String,
    retain: bool,
}

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<Message>>,
}

impl RecordingSink {
    fn take(&self) -> Vec<Message> {
        std::mem::take(&mut *self.messages.lock().expect("sink lock"))
    }
}

impl PublishSink for RecordingSink {
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), PublishError> {
        self.messages.lock().expect("sink lock").push(Message {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).to_string(),
            retain,
        });
        Ok(())
    }
}

fn discovery_messages(messages: &[Message]) -> Vec<&Message> {
    messages
        .iter()
        .filter(|message| message.topic.ends_with("/config"))
        .collect()
}

#[test]
fn first_sighting_announces_then_forwards_state() {
    let sink = RecordingSink::default();
    let mut dispatcher = Dispatcher::new(&sink, DiscoveryConfig::default());

    let outcome = dispatcher.handle(ACURITE);
    assert_eq!(
        outcome,
        DispatchOutcome::Forwarded {
            identity: DeviceIdentity::new("acurite-5n1_123"),
            announced: 3,
        }
    );

    let messages = sink.take();
    assert_eq!(messages.len(), 4);
    let topics: Vec<&str> = messages.iter().map(|m| m.topic.as_str()).collect();
    assert_eq!(
        topics,
        vec![
            "homeassistant/sensor/acurite-5n1_123/temperature_C/config",
            "homeassistant/sensor/acurite-5n1_123/humidity/config",
            "homeassistant/sensor/acurite-5n1_123/battery_ok/config",
            "rtl_433/acurite-5n1_123",
        ]
    );
    assert!(discovery_messages(&messages).iter().all(|m| m.retain));

    let state = &messages[3];
    assert_eq!(state.payload, ACURITE);
    assert!(!state.retain);

    let temperature: Value = serde_json::from_str(&messages[0].payload).expect("json");
    assert_eq!(temperature["unit_of_measurement"], "°C");
    assert_eq!(temperature["device_class"], "temperature");
    assert_eq!(temperature["device"]["identifiers"][0], "acurite-5n1_123");
    assert_eq!(temperature["device"]["manufacturer"], "RTL_433");
}

#[test]
fn repeated_identity_only_forwards_state() {
    let sink = RecordingSink::default();
    let mut dispatcher = Dispatcher::new(&sink, DiscoveryConfig::default());

    dispatcher.handle(ACURITE);
    sink.take();

    let outcome = dispatcher.handle(ACURITE);
    assert_eq!(
        outcome,
        DispatchOutcome::Forwarded {
            identity: DeviceIdentity::new("acurite-5n1_123"),
            announced: 0,
        }
    );
    let messages = sink.take();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].topic, "rtl_433/acurite-5n1_123");
    assert_eq!(dispatcher.tracker().len(), 1);
}

#[test]
fn later_readings_of_known_device_are_not_announced() {
    let sink = RecordingSink::default();
    let mut dispatcher = Dispatcher::new(&sink, DiscoveryConfig::default());

    dispatcher.handle(r#"{"model":"M","id":1,"humidity":40}"#);
    sink.take();
    dispatcher.handle(r#"{"model":"M","id":1,"humidity":41,"temperature_C":3.5}"#);

    let messages = sink.take();
    assert!(discovery_messages(&messages).is_empty());
    assert_eq!(messages.len(), 1);
}

#[test]
fn state_payload_is_the_raw_line() {
    let sink = RecordingSink::default();
    let mut dispatcher = Dispatcher::new(&sink, DiscoveryConfig::default());

    let line = r#"{"time" : "2024-05-01 12:00:00", "model" : "LaCrosse-TX141THBv2", "id" : 7, "temperature_C" : 2.50}"#;
    dispatcher.handle(line);

    let messages = sink.take();
    let state = messages.last().expect("state message");
    assert_eq!(state.topic, "rtl_433/lacrosse-tx141thbv2_7");
    assert_eq!(state.payload, line);
}

#[test]
fn malformed_line_publishes_nothing() {
    let sink = RecordingSink::default();
    let mut dispatcher = Dispatcher::new(&sink, DiscoveryConfig::default());

    assert_eq!(dispatcher.handle("not json"), DispatchOutcome::Malformed);
    assert_eq!(dispatcher.handle("[1,2,3]"), DispatchOutcome::Malformed);
    assert!(sink.take().is_empty());
    assert!(dispatcher.tracker().is_empty());

    assert!(matches!(
        dispatcher.handle(ACURITE),
        DispatchOutcome::Forwarded { announced: 3, .. }
    ));
}

#[test]
fn line_without_identity_publishes_nothing() {
    let sink = RecordingSink::default();
    let mut dispatcher = Dispatcher::new(&sink, DiscoveryConfig::default());

    assert_eq!(
        dispatcher.handle(r#"{"model":"M","channel":1,"temperature_C":12.0}"#),
        DispatchOutcome::Anonymous
    );
    assert_eq!(
        dispatcher.handle(r#"{"time":"2024-05-01 12:00:00"}"#),
        DispatchOutcome::Anonymous
    );
    assert!(sink.take().is_empty());
}

#[test]
fn channel_devices_are_announced_and_forwarded() {
    let sink = RecordingSink::default();
    let mut dispatcher = Dispatcher::new(&sink, DiscoveryConfig::default());

    let line = r#"{"model":"Generic Remote","channel":"B","message":"Press","rssi":-71}"#;
    dispatcher.handle(line);

    let messages = sink.take();
    let topics: Vec<&str> = messages.iter().map(|m| m.topic.as_str()).collect();
    assert_eq!(
        topics,
        vec![
            "homeassistant/sensor/generic_remote_b_press/rssi/config",
            "rtl_433/generic_remote_b_press",
        ]
    );
}

#[test]
fn device_with_no_numeric_readings_still_forwards_state() {
    let sink = RecordingSink::default();
    let mut dispatcher = Dispatcher::new(&sink, DiscoveryConfig::default());

    let outcome = dispatcher.handle(r#"{"model":"Door","id":"a1","state":"open"}"#);
    assert_eq!(
        outcome,
        DispatchOutcome::Forwarded {
            identity: DeviceIdentity::new("door_a1"),
            announced: 0,
        }
    );
    let messages = sink.take();
    assert_eq!(messages.len(), 1);
    assert!(dispatcher.tracker().contains(&DeviceIdentity::new("door_a1")));
}

#[test]
fn discovery_retain_follows_configuration() {
    let sink = RecordingSink::default();
    let config = DiscoveryConfig {
        retain: false,
        ..DiscoveryConfig::default()
    };
    let mut dispatcher = Dispatcher::new(&sink, config);

    dispatcher.handle(ACURITE);
    let messages = sink.take();
    assert_eq!(messages.len(), 4);
    assert!(messages.iter().all(|m| !m.retain));
}

#[tokio::test]
async fn publish_failures_do_not_stop_dispatch() {
    let (client, eventloop) = AsyncClient::new(MqttOptions::new("test", "localhost", 1883), 4);
    drop(eventloop);
    let mut dispatcher = Dispatcher::new(Publisher::from_client(client), DiscoveryConfig::default());

    assert_eq!(
        dispatcher.handle(ACURITE),
        DispatchOutcome::Forwarded {
            identity: DeviceIdentity::new("acurite-5n1_123"),
            announced: 0,
        }
    );
    assert!(dispatcher.tracker().contains(&DeviceIdentity::new("acurite-5n1_123")));
    assert!(matches!(
        dispatcher.handle(ACURITE),
        DispatchOutcome::Forwarded { announced: 0, .. }
    ));
}

#[tokio::test]
async fn run_processes_lines_in_order_until_channel_closes() {
    let sink = RecordingSink::default();
    let dispatcher = Dispatcher::new(&sink, DiscoveryConfig::default());
    let (tx, rx) = mpsc::channel(8);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    for line in [ACURITE, "not json", ACURITE, r#"{"model":"M","id":2,"humidity":10}"#] {
        tx.send(line.to_string()).await.expect("send");
    }
    drop(tx);

    dispatcher.run(rx, shutdown_rx).await;

    let messages = sink.take();
    let topics: Vec<&str> = messages.iter().map(|m| m.topic.as_str()).collect();
    assert_eq!(
        topics,
        vec![
            "homeassistant/sensor/acurite-5n1_123/temperature_C/config",
            "homeassistant/sensor/acurite-5n1_123/humidity/config",
            "homeassistant/sensor/acurite-5n1_123/battery_ok/config",
            "rtl_433/acurite-5n1_123",
            "rtl_433/acurite-5n1_123",
            "homeassistant/sensor/m_2/humidity/config",
            "rtl_433/m_2",
        ]
    );
}

#[tokio::test]
async fn run_stops_on_shutdown() {
    let sink = RecordingSink::default();
    let dispatcher = Dispatcher::new(&sink, DiscoveryConfig::default());
    let (_tx, rx) = mpsc::channel::<String>(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    shutdown_tx.send(true).expect("shutdown");
    dispatcher.run(rx, shutdown_rx).await;

    assert!(sink.take().is_empty());
}
