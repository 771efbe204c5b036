use crate::domain::response::RejectionReason;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use uuid::Uuid;

pub mod otel;

pub use otel::OtelMetricsListener;

/// Passive observer of connection and notification lifecycle events.
///
/// Implementations must return quickly. Every hook has a no-op default.
pub trait MetricsListener: Send + Sync + std::fmt::Debug {
    fn on_connection_attempt(&self) {}

    fn on_connection_succeeded(&self) {}

    fn on_connection_failed(&self) {}

    fn on_notification_sent(&self, _notification_id: Uuid) {}

    fn on_notification_accepted(&self, _notification_id: Uuid) {}

    fn on_notification_rejected(&self, _notification_id: Uuid, _reason: &RejectionReason) {}

    /// The notification never got an answer from the gateway.
    fn on_notification_failed(&self, _notification_id: Uuid) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsListener;

impl MetricsListener for NoopMetricsListener {}

/// Calls into a listener without letting a misbehaving one affect the caller.
#[derive(Debug, Clone)]
pub(crate) struct MetricsHook {
    listener: Arc<dyn MetricsListener>,
}

impl MetricsHook {
    pub(crate) fn new(listener: Arc<dyn MetricsListener>) -> Self {
        Self { listener }
    }

    pub(crate) fn fire(&self, hook: impl FnOnce(&dyn MetricsListener)) {
        let listener = self.listener.as_ref();
        if catch_unwind(AssertUnwindSafe(|| hook(listener))).is_err() {
            tracing::warn!("Metrics listener panicked; event dropped");
        }
    }
}

impl Default for MetricsHook {
    fn default() -> Self {
        Self::new(Arc::new(NoopMetricsListener))
    }
}
