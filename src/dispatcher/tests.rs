use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use super::*;
use crate::broker::{PublishAck, TransportError};
use crate::event::{Content, DownloadStatus, FileInfo, SignedUrl};
use crate::queue::{bounded, EventReceiver};
use crate::topic::IdentityLayout;

/// Records publishes; devices listed in `refuse` fail at request time,
/// devices in `unacked` fail at ack time, devices in `stall` never return
#[derive(Default)]
struct MockPublisher {
    published: Mutex<Vec<(String, Bytes, QoS)>>,
    refuse: HashSet<String>,
    unacked: HashSet<String>,
    stall: HashSet<String>,
}

impl MockPublisher {
    fn topics(&self) -> Vec<String> {
        self.published.lock().iter().map(|(t, _, _)| t.clone()).collect()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
    ) -> Result<PublishAck, TransportError> {
        if self.stall.contains(topic) {
            std::future::pending::<()>().await;
        }
        self.published.lock().push((topic.to_string(), payload, qos));
        if self.refuse.contains(topic) {
            return Err(TransportError::Request("client closed".to_string()));
        }
        if self.unacked.contains(topic) {
            return Ok(PublishAck::ready(Err(TransportError::AckTimeout(
                Duration::from_secs(30),
            ))));
        }
        Ok(PublishAck::ready(Ok(())))
    }
}

fn dispatcher(
    publisher: Arc<MockPublisher>,
    mode: CompletionMode,
) -> (Dispatcher, EventReceiver<DownloadEvent>, Arc<Metrics>) {
    let (tx, rx) = bounded(Category::Download, 64);
    let metrics = Arc::new(Metrics::new());
    let dispatcher = Dispatcher::new(
        publisher,
        tx,
        TopicLayout::default(),
        QoS::ExactlyOnce,
        mode,
        metrics.clone(),
    );
    (dispatcher, rx, metrics)
}

fn firmware_request(devices: &[i64]) -> FirmwareDeployRequest {
    FirmwareDeployRequest {
        command_id: "FW-1".to_string(),
        content: Some(Content {
            signed_url: SignedUrl {
                url: "https://cdn.example.com/fw.bin?sig=a&b".to_string(),
                timeout: 600,
            },
            file_info: FileInfo {
                id: 9,
                file_hash: "abc".to_string(),
                size: 2048,
            },
        }),
        devices: devices.iter().map(|&id| DeviceIdentity::device(id)).collect(),
        timestamp: None,
    }
}

fn drain(rx: &mut EventReceiver<DownloadEvent>) -> Vec<DownloadEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn publishes_once_per_device_with_shared_payload() {
    let publisher = Arc::new(MockPublisher::default());
    let (dispatcher, mut rx, _metrics) = dispatcher(publisher.clone(), CompletionMode::Awaited);

    let outcome = dispatcher
        .deploy_firmware(&firmware_request(&[1, 2, 3]))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        Dispatched::Completed(DispatchReport {
            targets: 3,
            published: 3,
            failed: 0
        })
    );

    let mut topics = publisher.topics();
    topics.sort();
    assert_eq!(
        topics,
        vec![
            "v1/1/update/request/firmware",
            "v1/2/update/request/firmware",
            "v1/3/update/request/firmware",
        ]
    );

    let published = publisher.published.lock();
    let first = &published[0].1;
    assert!(published.iter().all(|(_, p, q)| p == first && *q == QoS::ExactlyOnce));
    let body: serde_json::Value = serde_json::from_slice(first).unwrap();
    assert_eq!(body["command_id"], "FW-1");
    assert_eq!(
        body["content"]["signed_url"]["url"],
        "https://cdn.example.com/fw.bin?sig=a&b"
    );
    drop(published);

    let events = drain(&mut rx);
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.status == DownloadStatus::Waiting
        && e.message == "Download Command"
        && e.total_bytes == 2048));
}

#[tokio::test]
async fn one_failing_device_does_not_affect_the_others() {
    let publisher = Arc::new(MockPublisher {
        refuse: ["v1/2/update/request/firmware".to_string()].into(),
        unacked: ["v1/3/update/request/firmware".to_string()].into(),
        ..MockPublisher::default()
    });
    let (dispatcher, mut rx, metrics) = dispatcher(publisher.clone(), CompletionMode::Awaited);

    let outcome = dispatcher
        .deploy_firmware(&firmware_request(&[1, 2, 3, 4]))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        Dispatched::Completed(DispatchReport {
            targets: 4,
            published: 2,
            failed: 2
        })
    );

    // Provisional events are recorded for failed devices too
    assert_eq!(drain(&mut rx).len(), 4);
    assert_eq!(
        metrics
            .commands_failed
            .with_label_values(&["firmware"])
            .get(),
        2
    );
    assert_eq!(
        metrics
            .commands_published
            .with_label_values(&["firmware"])
            .get(),
        2
    );
}

#[tokio::test]
async fn stalled_device_does_not_block_the_others() {
    let publisher = Arc::new(MockPublisher {
        stall: ["v1/1/update/cancel".to_string()].into(),
        ..MockPublisher::default()
    });
    let (dispatcher, mut rx, _metrics) = dispatcher(publisher.clone(), CompletionMode::Detached);

    let request = CancelRequest {
        command_id: "FW-1".to_string(),
        reason: "operator abort".to_string(),
        devices: vec![DeviceIdentity::device(1), DeviceIdentity::device(2)],
        timestamp: None,
    };
    assert_eq!(dispatcher.cancel(&request).await.unwrap(), Dispatched::Detached);

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.device, DeviceIdentity::device(2));
    assert_eq!(event.status, DownloadStatus::Canceled);
    assert_eq!(event.message, "operator abort");
    assert_eq!(publisher.topics(), vec!["v1/2/update/cancel"]);
}

#[tokio::test]
async fn duplicate_targets_are_published_per_entry() {
    let publisher = Arc::new(MockPublisher::default());
    let (dispatcher, mut rx, _metrics) = dispatcher(publisher.clone(), CompletionMode::Awaited);

    let request = AdsDeployRequest {
        command_id: "AD-7".to_string(),
        contents: vec![
            Content {
                file_info: FileInfo {
                    size: 100,
                    ..FileInfo::default()
                },
                ..Content::default()
            },
            Content {
                file_info: FileInfo {
                    size: 50,
                    ..FileInfo::default()
                },
                ..Content::default()
            },
        ],
        devices: vec![DeviceIdentity::device(5), DeviceIdentity::device(5)],
        timestamp: None,
    };
    dispatcher.deploy_advertisements(&request).await.unwrap();

    assert_eq!(
        publisher.topics(),
        vec![
            "v1/5/update/request/advertisement",
            "v1/5/update/request/advertisement"
        ]
    );
    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.total_bytes == 150));
}

#[tokio::test]
async fn device_without_scope_fails_under_scoped_layout() {
    let publisher = Arc::new(MockPublisher::default());
    let (tx, mut rx) = bounded(Category::Download, 8);
    let dispatcher = Dispatcher::new(
        publisher.clone(),
        tx,
        TopicLayout::new("v1", IdentityLayout::RegionGroupDevice),
        QoS::ExactlyOnce,
        CompletionMode::Awaited,
        Arc::new(Metrics::new()),
    );

    let mut request = firmware_request(&[1]);
    request.devices.push(DeviceIdentity::scoped(4, 5, 6));
    let outcome = dispatcher.deploy_firmware(&request).await.unwrap();

    assert_eq!(
        outcome,
        Dispatched::Completed(DispatchReport {
            targets: 2,
            published: 1,
            failed: 1
        })
    );
    assert_eq!(publisher.topics(), vec!["v1/4/5/6/update/request/firmware"]);
    assert_eq!(drain(&mut rx).len(), 1);
}

#[tokio::test]
async fn firmware_without_content_is_an_error() {
    let publisher = Arc::new(MockPublisher::default());
    let (dispatcher, _rx, _metrics) = dispatcher(publisher.clone(), CompletionMode::Awaited);

    let mut request = firmware_request(&[1]);
    request.content = None;
    assert!(matches!(
        dispatcher.deploy_firmware(&request).await,
        Err(DispatchError::MissingContent)
    ));
    assert!(publisher.topics().is_empty());
}
