use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::*;
use crate::config::BrokerConfig;
use crate::metrics::Metrics;

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait]
impl MessageHandler for Recorder {
    async fn on_message(&self, topic: &str, payload: &[u8]) {
        self.seen.lock().push((topic.to_string(), payload.to_vec()));
    }
}

#[tokio::test]
async fn acks_are_bound_to_packet_ids_in_request_order() {
    let tracker = AckTracker::new();
    let mut first = tracker.enqueue();
    let mut second = tracker.enqueue();

    tracker.on_outgoing_publish(7);
    tracker.on_outgoing_publish(8);
    assert_eq!(tracker.queued(), 0);
    assert_eq!(tracker.inflight(), 2);

    tracker.on_ack(8);
    assert!(second.try_recv().is_ok());
    assert!(first.try_recv().is_err());

    tracker.on_ack(7);
    assert!(first.try_recv().is_ok());
    assert_eq!(tracker.inflight(), 0);
}

#[tokio::test]
async fn qos0_publish_resolves_when_written() {
    let tracker = AckTracker::new();
    let mut rx = tracker.enqueue();
    tracker.on_outgoing_publish(0);
    assert!(rx.try_recv().is_ok());
    assert_eq!(tracker.inflight(), 0);
}

#[tokio::test]
async fn retransmission_after_reconnect_does_not_consume_a_waiter() {
    let tracker = AckTracker::new();
    let mut first = tracker.enqueue();
    tracker.on_outgoing_publish(3);
    tracker.on_connection_lost();

    let _second = tracker.enqueue();
    // Same id again once the session resumes
    tracker.on_outgoing_publish(3);
    assert_eq!(tracker.queued(), 1);
    assert_eq!(tracker.inflight(), 1);

    tracker.on_ack(3);
    assert!(first.try_recv().is_ok());
}

#[tokio::test]
async fn held_back_publish_shares_the_id_it_collided_on() {
    let tracker = AckTracker::new();
    let mut a = tracker.enqueue();
    let mut b = tracker.enqueue();
    let mut c = tracker.enqueue();

    tracker.on_outgoing_publish(1);
    tracker.on_outgoing_publish(2);
    tracker.on_ack(2);
    assert!(b.try_recv().is_ok());

    // The client writes the held-back publish on id 1 before it reports
    // the ack that freed the id
    tracker.on_outgoing_publish(1);
    tracker.on_ack(1);
    assert!(a.try_recv().is_ok());
    assert!(c.try_recv().is_err());
    assert_eq!(tracker.inflight(), 1);

    tracker.on_ack(1);
    assert!(c.try_recv().is_ok());
    assert_eq!(tracker.inflight(), 0);
}

#[tokio::test]
async fn exactly_once_id_is_reusable_after_pubrec() {
    let tracker = AckTracker::new();
    let mut first = tracker.enqueue();
    let mut second = tracker.enqueue();

    tracker.on_outgoing_publish(4);
    tracker.on_pubrec(4);
    tracker.on_outgoing_publish(4);
    assert_eq!(tracker.inflight(), 2);

    tracker.on_ack(4);
    assert!(first.try_recv().is_ok());
    assert!(second.try_recv().is_err());

    tracker.on_ack(4);
    assert!(second.try_recv().is_ok());
}

#[tokio::test]
async fn released_id_is_not_treated_as_retransmission() {
    let tracker = AckTracker::new();
    let _first = tracker.enqueue();
    tracker.on_outgoing_publish(5);
    tracker.on_pubrec(5);
    tracker.on_connection_lost();

    // Only PUBREL is resent for id 5, so a PUBLISH on it is a new request
    let _second = tracker.enqueue();
    tracker.on_outgoing_publish(5);
    assert_eq!(tracker.queued(), 0);
    assert_eq!(tracker.inflight(), 2);
}

#[test]
fn refused_request_withdraws_its_waiter() {
    let tracker = AckTracker::new();
    let _kept = tracker.enqueue();
    let _refused = tracker.enqueue();
    tracker.cancel_last();
    assert_eq!(tracker.queued(), 1);
}

#[test]
fn unknown_ack_is_ignored() {
    let tracker = AckTracker::new();
    tracker.on_ack(42);
    tracker.on_outgoing_publish(5);
    assert_eq!(tracker.inflight(), 0);
}

#[tokio::test(start_paused = true)]
async fn publish_ack_times_out() {
    let tracker = AckTracker::new();
    let rx = tracker.enqueue();
    tracker.on_outgoing_publish(1);

    let result = PublishAck::pending(rx, Duration::from_secs(5)).wait().await;
    assert_eq!(
        result,
        Err(TransportError::AckTimeout(Duration::from_secs(5)))
    );
}

#[tokio::test]
async fn publish_ack_reports_dropped_tracker() {
    let tracker = AckTracker::new();
    let rx = tracker.enqueue();
    drop(tracker);

    let result = PublishAck::pending(rx, Duration::from_secs(5)).wait().await;
    assert_eq!(result, Err(TransportError::AckDropped));
}

#[tokio::test]
async fn ready_ack_returns_its_result() {
    assert_eq!(PublishAck::ready(Ok(())).wait().await, Ok(()));
    assert_eq!(
        PublishAck::ready(Err(TransportError::Request("closed".into())))
            .wait()
            .await,
        Err(TransportError::Request("closed".into()))
    );
}

#[test]
fn backoff_doubles_up_to_the_cap_and_resets() {
    let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
    let delays: Vec<_> = (0..5).map(|_| backoff.next().as_secs()).collect();
    assert_eq!(delays, vec![1, 2, 4, 5, 5]);

    backoff.reset();
    assert_eq!(backoff.next(), Duration::from_secs(1));
}

// Kept out of the module scope that imports `pretty_assertions::assert_eq`:
// the `=>` form of `test_case` glob-imports its parent and calls `assert_eq!`.
mod qos {
    use super::{qos_from_u8, QoS};
    use test_case::test_case;

    #[test_case(0 => Some(QoS::AtMostOnce))]
    #[test_case(1 => Some(QoS::AtLeastOnce))]
    #[test_case(2 => Some(QoS::ExactlyOnce))]
    #[test_case(3 => None)]
    fn qos_levels(level: u8) -> Option<QoS> {
        qos_from_u8(level)
    }
}

#[tokio::test]
async fn router_delivers_to_matching_filters_only() {
    let status = Arc::new(Recorder::default());
    let sales = Arc::new(Recorder::default());
    let router = InboundRouter::new(
        vec![
            Subscription::new("v1/+/status/system", QoS::AtLeastOnce, status.clone()),
            Subscription::new("v1/+/sales/data", QoS::AtLeastOnce, sales.clone()),
        ]
        .into(),
    );

    assert_eq!(router.route("v1/12/status/system", b"{}").await, 1);
    assert_eq!(router.route("v1/12/unknown", b"{}").await, 0);

    assert_eq!(status.seen.lock().len(), 1);
    assert_eq!(status.seen.lock()[0].0, "v1/12/status/system");
    assert!(sales.seen.lock().is_empty());
}

fn quick_config(address: String) -> BrokerConfig {
    BrokerConfig {
        address,
        startup_attempts: 2,
        reconnect_interval: Duration::from_millis(10),
        max_reconnect_interval: Duration::from_millis(20),
        connect_timeout: Duration::from_millis(200),
        ..BrokerConfig::default()
    }
}

#[tokio::test]
async fn connect_gives_up_after_startup_attempts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = BrokerConnection::connect(
        &quick_config(addr.to_string()),
        Vec::new(),
        Arc::new(Metrics::new()),
    )
    .await
    .err()
    .unwrap();

    match err {
        ConnectError::Exhausted { attempts, .. } => assert_eq!(attempts, 2),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn connect_times_out_without_connack() {
    // Accepts TCP but never answers CONNECT
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _accept = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let mut config = quick_config(addr.to_string());
    config.startup_attempts = 1;

    let err = BrokerConnection::connect(&config, Vec::new(), Arc::new(Metrics::new()))
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("no CONNACK"), "{}", err);
}

#[tokio::test]
async fn invalid_address_is_a_config_error() {
    let config = quick_config("broker:notaport".to_string());
    let err = BrokerConnection::connect(&config, Vec::new(), Arc::new(Metrics::new()))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ConnectError::Config(_)));
}

/// Read one MQTT control packet as (fixed header byte, body)
async fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let header = stream.read_u8().await.ok()?;
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await.ok()?;
        len |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; len];
    stream.read_exact(&mut body).await.ok()?;
    Some((header, body))
}

fn publish_pkid(body: &[u8]) -> u16 {
    let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
    u16::from_be_bytes([body[2 + topic_len], body[3 + topic_len]])
}

fn puback(pkid: u16) -> [u8; 4] {
    let [hi, lo] = pkid.to_be_bytes();
    [0x40, 0x02, hi, lo]
}

/// Accept a client and answer its CONNECT
async fn accept_session(listener: &TcpListener) -> TcpStream {
    let (mut stream, _) = listener.accept().await.unwrap();
    let (header, _) = read_packet(&mut stream).await.unwrap();
    assert_eq!(header, 0x10);
    stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
    stream
}

#[tokio::test]
async fn out_of_order_acks_resolve_every_publish() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = quick_config(listener.local_addr().unwrap().to_string());
    config.inflight = 2;
    config.ack_timeout = Duration::from_secs(5);

    let broker = tokio::spawn(async move {
        let mut stream = accept_session(&listener).await;

        let mut first = Vec::new();
        while first.len() < 2 {
            let (header, body) = read_packet(&mut stream).await.unwrap();
            if header & 0xf0 == 0x30 {
                first.push(publish_pkid(&body));
            }
        }
        stream.write_all(&puback(first[1])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        stream.write_all(&puback(first[0])).await.unwrap();

        let mut later = Vec::new();
        while later.len() < 2 {
            let (header, body) = read_packet(&mut stream).await.unwrap();
            if header & 0xf0 == 0x30 {
                let pkid = publish_pkid(&body);
                later.push(pkid);
                stream.write_all(&puback(pkid)).await.unwrap();
            }
        }
        while read_packet(&mut stream).await.is_some() {}
        (first, later)
    });

    let connection = BrokerConnection::connect(&config, Vec::new(), Arc::new(Metrics::new()))
        .await
        .unwrap();

    let mut acks = Vec::new();
    for name in ["a", "b", "c", "d"] {
        let ack = connection
            .publish(
                &format!("v1/1/cmd/{}", name),
                Bytes::from_static(b"{}"),
                QoS::AtLeastOnce,
            )
            .await
            .unwrap();
        acks.push(ack);
    }
    for ack in acks {
        let result = tokio::time::timeout(Duration::from_secs(5), ack.wait())
            .await
            .unwrap();
        assert_eq!(result, Ok(()));
    }

    connection.shutdown().await;
    let (first, later) = broker.await.unwrap();
    assert_eq!(first, vec![1, 2]);
    assert_eq!(later, vec![1, 2]);
}

#[tokio::test]
async fn session_resubscribes_after_every_connack() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = quick_config(listener.local_addr().unwrap().to_string());

    let broker = tokio::spawn(async move {
        let mut counts = Vec::new();
        let mut last = None;
        for round in 0..2 {
            let mut stream = accept_session(&listener).await;
            let mut subscribes = 0;
            while subscribes < 2 {
                let (header, body) = read_packet(&mut stream).await.unwrap();
                if header == 0x82 {
                    subscribes += 1;
                    stream
                        .write_all(&[0x90, 0x03, body[0], body[1], 0x01])
                        .await
                        .unwrap();
                }
            }
            counts.push(subscribes);
            // The first stream is dropped here, forcing a reconnect
            if round == 1 {
                last = Some(stream);
            }
        }
        (counts, last)
    });

    let metrics = Arc::new(Metrics::new());
    let subscriptions = vec![
        Subscription::new(
            "v1/+/status/system",
            QoS::AtLeastOnce,
            Arc::new(Recorder::default()),
        ),
        Subscription::new(
            "v1/+/sales/data",
            QoS::AtLeastOnce,
            Arc::new(Recorder::default()),
        ),
    ];
    let connection = BrokerConnection::connect(&config, subscriptions, metrics.clone())
        .await
        .unwrap();

    let (counts, _stream) = tokio::time::timeout(Duration::from_secs(5), broker)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(counts, vec![2, 2]);
    assert_eq!(metrics.broker_reconnects.get(), 1);
    assert_eq!(metrics.broker_connected.get(), 1);
    assert_eq!(connection.status(), ConnectionStatus::Connected);

    connection.shutdown().await;
}
