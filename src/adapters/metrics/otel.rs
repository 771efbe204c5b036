use crate::adapters::metrics::MetricsListener;
use crate::domain::response::RejectionReason;
use dashmap::DashMap;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use std::time::Instant;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    connection_attempts: Counter<u64>,
    connection_failures: Counter<u64>,
    connections: Counter<u64>,
    sent: Counter<u64>,
    accepted: Counter<u64>,
    rejected: Counter<u64>,
    failed: Counter<u64>,
    latency_seconds: Histogram<f64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("apns-courier");
        Self {
            connection_attempts: meter
                .u64_counter("apns_connection_attempts_total")
                .with_description("Total number of attempts to connect to the gateway")
                .build(),
            connection_failures: meter
                .u64_counter("apns_connection_failures_total")
                .with_description("Total number of failed connection attempts")
                .build(),
            connections: meter
                .u64_counter("apns_connections_total")
                .with_description("Total number of successfully established connections")
                .build(),
            sent: meter
                .u64_counter("apns_notifications_sent_total")
                .with_description("Total number of notifications written to the gateway")
                .build(),
            accepted: meter
                .u64_counter("apns_notifications_accepted_total")
                .with_description("Total number of notifications accepted by the gateway")
                .build(),
            rejected: meter
                .u64_counter("apns_notifications_rejected_total")
                .with_description("Total number of notifications rejected by the gateway")
                .build(),
            failed: meter
                .u64_counter("apns_notifications_failed_total")
                .with_description("Total number of notifications that never received an answer")
                .build(),
            latency_seconds: meter
                .f64_histogram("apns_notification_latency_seconds")
                .with_description("Time from sending a notification to receiving the gateway's answer")
                .build(),
        }
    }
}

/// Records client events as OpenTelemetry metrics on the global meter provider.
#[derive(Debug)]
pub struct OtelMetricsListener {
    metrics: Metrics,
    in_flight: DashMap<Uuid, Instant>,
}

impl OtelMetricsListener {
    #[must_use]
    pub fn new() -> Self {
        Self { metrics: Metrics::new(), in_flight: DashMap::new() }
    }

    fn finish(&self, notification_id: Uuid, outcome: &'static str) {
        if let Some((_, started)) = self.in_flight.remove(&notification_id) {
            self.metrics
                .latency_seconds
                .record(started.elapsed().as_secs_f64(), &[KeyValue::new("outcome", outcome)]);
        }
    }
}

impl Default for OtelMetricsListener {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsListener for OtelMetricsListener {
    fn on_connection_attempt(&self) {
        self.metrics.connection_attempts.add(1, &[]);
    }

    fn on_connection_succeeded(&self) {
        self.metrics.connections.add(1, &[]);
    }

    fn on_connection_failed(&self) {
        self.metrics.connection_failures.add(1, &[]);
    }

    fn on_notification_sent(&self, notification_id: Uuid) {
        self.in_flight.insert(notification_id, Instant::now());
        self.metrics.sent.add(1, &[]);
    }

    fn on_notification_accepted(&self, notification_id: Uuid) {
        self.finish(notification_id, "accepted");
        self.metrics.accepted.add(1, &[]);
    }

    fn on_notification_rejected(&self, notification_id: Uuid, reason: &RejectionReason) {
        self.finish(notification_id, "rejected");
        self.metrics.rejected.add(1, &[KeyValue::new("reason", reason.to_string())]);
    }

    fn on_notification_failed(&self, notification_id: Uuid) {
        self.finish(notification_id, "failed");
        self.metrics.failed.add(1, &[]);
    }
}
