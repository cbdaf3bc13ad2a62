use std::net::SocketAddr;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use test_case::test_case;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::*;
use crate::broker::{PublishAck, Publisher, QoS, TransportError};
use crate::dispatcher::CompletionMode;
use crate::event::{Category, DownloadEvent};
use crate::queue::{bounded, EventReceiver};
use crate::topic::TopicLayout;

#[derive(Default)]
struct AcceptAll {
    topics: Mutex<Vec<String>>,
}

#[async_trait]
impl Publisher for AcceptAll {
    async fn publish(
        &self,
        topic: &str,
        _payload: Bytes,
        _qos: QoS,
    ) -> Result<PublishAck, TransportError> {
        self.topics.lock().push(topic.to_string());
        Ok(PublishAck::ready(Ok(())))
    }
}

struct Harness {
    addr: SocketAddr,
    publisher: Arc<AcceptAll>,
    events: EventReceiver<DownloadEvent>,
    shutdown: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start(expose_metrics: bool) -> Harness {
    let publisher = Arc::new(AcceptAll::default());
    let (tx, events) = bounded(Category::Download, 64);
    let metrics = Arc::new(Metrics::new());
    let dispatcher = Arc::new(Dispatcher::new(
        publisher.clone(),
        tx,
        TopicLayout::default(),
        QoS::ExactlyOnce,
        CompletionMode::Awaited,
        metrics.clone(),
    ));

    let config = HttpConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        max_body_bytes: 512,
    };
    let server = ApiServer::bind(&config, dispatcher, metrics, expose_metrics)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(server.run(shutdown.clone()));

    Harness {
        addr,
        publisher,
        events,
        shutdown,
    }
}

async fn send(addr: SocketAddr, method: &str, path: &str, body: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "{} {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        method,
        path,
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8(raw).unwrap();

    let status = text.split(' ').nth(1).unwrap().parse().unwrap();
    let body = text
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_default();
    (status, body)
}

fn description(body: &str) -> String {
    let value: serde_json::Value = serde_json::from_str(body).unwrap();
    value["description"].as_str().unwrap().to_string()
}

const FIRMWARE_BODY: &str = r#"{
    "command_id": "FW-100",
    "content": {
        "signed_url": {"url": "https://cdn.example.com/fw.bin", "timeout": 300},
        "file_info": {"id": 1, "file_hash": "ff00", "size": 4096}
    },
    "devices": [{"deviceId": 11}, {"deviceId": 12}]
}"#;

#[tokio::test]
async fn firmware_deployment_is_dispatched() {
    let mut harness = start(false).await;

    let (status, body) = send(harness.addr, "POST", FIRMWARE_DEPLOYMENT, FIRMWARE_BODY).await;
    assert_eq!(status, 200);
    assert_eq!(description(&body), "deployment request accepted");

    let mut topics = harness.publisher.topics.lock().clone();
    topics.sort();
    assert_eq!(
        topics,
        vec![
            "v1/11/update/request/firmware",
            "v1/12/update/request/firmware"
        ]
    );
    assert_eq!(harness.events.recv().await.unwrap().command_id, "FW-100");
}

#[tokio::test]
async fn cancel_accepts_camel_case_command_id() {
    let mut harness = start(false).await;
    let body = r#"{"commandId": "FW-100", "reason": "recalled", "devices": [{"deviceId": 3}]}"#;

    let (status, response) = send(harness.addr, "POST", FIRMWARE_CANCEL, body).await;
    assert_eq!(status, 200);
    assert_eq!(description(&response), "cancel request accepted");
    assert_eq!(
        harness.publisher.topics.lock().clone(),
        vec!["v1/3/update/cancel"]
    );
    assert_eq!(harness.events.recv().await.unwrap().message, "recalled");
}

#[test_case(FIRMWARE_DEPLOYMENT, "{not json", "parse error" ; "firmware parse error")]
#[test_case(FIRMWARE_DEPLOYMENT, r#"{"command_id": "X", "devices": [{"deviceId": 1}]}"#, "missing required fields" ; "firmware without content")]
#[test_case(FIRMWARE_CANCEL, r#"{"commandId": "X", "devices": [{"deviceId": 1}]}"#, "missing required fields" ; "cancel without reason")]
#[test_case(FIRMWARE_CANCEL, r#"{"commandId": "X", "command_id": "Y", "reason": "r", "devices": [{"deviceId": 1}]}"#, "parse error" ; "cancel with both id spellings")]
#[test_case(ADVERTISEMENT_DEPLOYMENT, r#"{"command_id": "X", "contents": [], "devices": [{"deviceId": 1}]}"#, "missing required fields" ; "ads without contents")]
#[test_case(ADVERTISEMENT_DEPLOYMENT, r#"{"command_id": "X", "contents": [{}], "devices": []}"#, "missing required fields" ; "ads without devices")]
#[tokio::test]
async fn invalid_requests_are_rejected(path: &str, body: &str, expected: &str) {
    let harness = start(false).await;
    let (status, response) = send(harness.addr, "POST", path, body).await;
    assert_eq!(status, 400);
    assert_eq!(description(&response), expected);
    assert!(harness.publisher.topics.lock().is_empty());
}

#[tokio::test]
async fn wrong_method_is_invalid_access() {
    let harness = start(false).await;
    let (status, body) = send(harness.addr, "GET", ADVERTISEMENT_DEPLOYMENT, "").await;
    assert_eq!(status, 400);
    assert_eq!(description(&body), "invalid access");
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let harness = start(false).await;
    let body = format!(r#"{{"command_id": "{}"}}"#, "x".repeat(1024));
    let (status, response) = send(harness.addr, "POST", FIRMWARE_DEPLOYMENT, &body).await;
    assert_eq!(status, 400);
    assert_eq!(description(&response), "request body too large");
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let harness = start(false).await;
    let (status, _) = send(harness.addr, "GET", "/api/unknown", "").await;
    assert_eq!(status, 404);

    // Metrics stay hidden when disabled
    let (status, _) = send(harness.addr, "GET", "/metrics", "").await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn health_and_metrics_endpoints() {
    let harness = start(true).await;

    let (status, body) = send(harness.addr, "GET", "/health", "").await;
    assert_eq!(status, 200);
    assert_eq!(body, "OK");

    send(harness.addr, "POST", FIRMWARE_DEPLOYMENT, FIRMWARE_BODY).await;
    let (status, body) = send(harness.addr, "GET", "/metrics", "").await;
    assert_eq!(status, 200);
    assert!(body.contains("fleetgate_commands_published_total{kind=\"firmware\"} 2"));
}
