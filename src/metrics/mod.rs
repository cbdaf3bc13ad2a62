//! Prometheus metrics for fleetgate
//!
//! Exposed at `/metrics` on the operator API when enabled.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

use crate::event::Category;

/// All fleetgate metrics in one place
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Ingestion
    pub events_enqueued: IntCounterVec,
    pub events_discarded: IntCounterVec,
    pub malformed_topics: IntCounterVec,
    pub queue_depth: IntGaugeVec,

    // Dispatch
    pub commands_published: IntCounterVec,
    pub commands_failed: IntCounterVec,
    pub command_ack_latency: Histogram,

    // Persistence
    pub rows_appended: IntCounterVec,
    pub rows_rejected: IntCounterVec,
    pub flushes: IntCounterVec,

    // Broker
    pub broker_connected: IntGauge,
    pub broker_reconnects: IntCounter,

    // Device registration
    pub registrations: IntCounterVec,

    // Operator API
    pub http_requests: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let events_enqueued = IntCounterVec::new(
            Opts::new(
                "fleetgate_events_enqueued_total",
                "Canonical events handed to a category queue",
            ),
            &["category"],
        )
        .unwrap();

        let events_discarded = IntCounterVec::new(
            Opts::new(
                "fleetgate_events_discarded_total",
                "Inbound messages that produced no event",
            ),
            &["category", "reason"],
        )
        .unwrap();

        let malformed_topics = IntCounterVec::new(
            Opts::new(
                "fleetgate_malformed_topics_total",
                "Inbound topics without a parseable device identity",
            ),
            &["category"],
        )
        .unwrap();

        let queue_depth = IntGaugeVec::new(
            Opts::new(
                "fleetgate_queue_depth",
                "Events waiting for the writer, sampled on enqueue and after each flush",
            ),
            &["category"],
        )
        .unwrap();

        let commands_published = IntCounterVec::new(
            Opts::new(
                "fleetgate_commands_published_total",
                "Per-device command publishes acknowledged by the broker",
            ),
            &["kind"],
        )
        .unwrap();

        let commands_failed = IntCounterVec::new(
            Opts::new(
                "fleetgate_commands_failed_total",
                "Per-device command publishes that failed or timed out",
            ),
            &["kind"],
        )
        .unwrap();

        let command_ack_latency = Histogram::with_opts(
            HistogramOpts::new(
                "fleetgate_command_ack_seconds",
                "Time from publish request to broker acknowledgment",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )
        .unwrap();

        let rows_appended = IntCounterVec::new(
            Opts::new(
                "fleetgate_rows_appended_total",
                "Rows appended to a write buffer",
            ),
            &["table"],
        )
        .unwrap();

        let rows_rejected = IntCounterVec::new(
            Opts::new(
                "fleetgate_rows_rejected_total",
                "Rows skipped because they could not be encoded",
            ),
            &["table"],
        )
        .unwrap();

        let flushes = IntCounterVec::new(
            Opts::new("fleetgate_flushes_total", "Store flushes by outcome"),
            &["category", "result"],
        )
        .unwrap();

        let broker_connected = IntGauge::with_opts(Opts::new(
            "fleetgate_broker_connected",
            "1 while the broker session is up",
        ))
        .unwrap();

        let broker_reconnects = IntCounter::with_opts(Opts::new(
            "fleetgate_broker_reconnects_total",
            "Sessions re-established after a connection loss",
        ))
        .unwrap();

        let registrations = IntCounterVec::new(
            Opts::new(
                "fleetgate_registrations_total",
                "Device registration requests by outcome",
            ),
            &["result"],
        )
        .unwrap();

        let http_requests = IntCounterVec::new(
            Opts::new(
                "fleetgate_http_requests_total",
                "Operator API requests by path and status",
            ),
            &["path", "status"],
        )
        .unwrap();

        registry
            .register(Box::new(events_enqueued.clone()))
            .unwrap();
        registry
            .register(Box::new(events_discarded.clone()))
            .unwrap();
        registry
            .register(Box::new(malformed_topics.clone()))
            .unwrap();
        registry.register(Box::new(queue_depth.clone())).unwrap();
        registry
            .register(Box::new(commands_published.clone()))
            .unwrap();
        registry
            .register(Box::new(commands_failed.clone()))
            .unwrap();
        registry
            .register(Box::new(command_ack_latency.clone()))
            .unwrap();
        registry.register(Box::new(rows_appended.clone())).unwrap();
        registry.register(Box::new(rows_rejected.clone())).unwrap();
        registry.register(Box::new(flushes.clone())).unwrap();
        registry
            .register(Box::new(broker_connected.clone()))
            .unwrap();
        registry
            .register(Box::new(broker_reconnects.clone()))
            .unwrap();
        registry.register(Box::new(registrations.clone())).unwrap();
        registry.register(Box::new(http_requests.clone())).unwrap();

        Metrics {
            registry,
            events_enqueued,
            events_discarded,
            malformed_topics,
            queue_depth,
            commands_published,
            commands_failed,
            command_ack_latency,
            rows_appended,
            rows_rejected,
            flushes,
            broker_connected,
            broker_reconnects,
            registrations,
            http_requests,
        }
    }

    // Helper methods for common operations

    pub fn event_enqueued(&self, category: Category, depth: usize) {
        self.events_enqueued
            .with_label_values(&[category.as_str()])
            .inc();
        self.queue_depth
            .with_label_values(&[category.as_str()])
            .set(depth as i64);
    }

    pub fn event_discarded(&self, category: Category, reason: &str) {
        self.events_discarded
            .with_label_values(&[category.as_str(), reason])
            .inc();
    }

    pub fn queue_depth(&self, category: Category, depth: usize) {
        self.queue_depth
            .with_label_values(&[category.as_str()])
            .set(depth as i64);
    }

    pub fn malformed_topic(&self, category: Category) {
        self.malformed_topics
            .with_label_values(&[category.as_str()])
            .inc();
    }

    pub fn command_published(&self, kind: &str, latency_secs: f64) {
        self.commands_published.with_label_values(&[kind]).inc();
        self.command_ack_latency.observe(latency_secs);
    }

    pub fn command_failed(&self, kind: &str) {
        self.commands_failed.with_label_values(&[kind]).inc();
    }

    pub fn row_appended(&self, table: &str) {
        self.rows_appended.with_label_values(&[table]).inc();
    }

    pub fn row_rejected(&self, table: &str) {
        self.rows_rejected.with_label_values(&[table]).inc();
    }

    pub fn flush_completed(&self, category: Category, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.flushes
            .with_label_values(&[category.as_str(), result])
            .inc();
    }

    pub fn broker_up(&self) {
        self.broker_connected.set(1);
    }

    pub fn broker_down(&self) {
        self.broker_connected.set(0);
    }

    /// CONNACK received after the session was lost
    pub fn broker_reconnected(&self) {
        self.broker_reconnects.inc();
    }

    pub fn registration(&self, result: &str) {
        self.registrations.with_label_values(&[result]).inc();
    }

    pub fn http_request(&self, path: &str, status: u16) {
        let status = status.to_string();
        self.http_requests
            .with_label_values(&[path, status.as_str()])
            .inc();
    }

    /// Text exposition of every registered metric
    pub fn encode(&self) -> Result<(String, Vec<u8>), prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
