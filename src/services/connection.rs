use crate::adapters::metrics::MetricsHook;
use crate::adapters::proxy::ProxyHandlerFactory;
use crate::adapters::transport::{ConnectParams, Connector, GatewayReply, GatewayRequest, GatewaySession};
use crate::domain::endpoint::Endpoint;
use crate::domain::notification::PushNotification;
use crate::domain::response::{ErrorBody, PushNotificationResponse, RejectionReason};
use crate::error::{ConnectError, SendError, TransportError};
use crate::services::auth_service::AuthService;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

pub type SendResult = Result<PushNotificationResponse, SendError>;

/// Why a connection stopped accepting notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The transport failed or the gateway went away.
    Lost(TransportError),
    /// `close()` was called.
    Closed,
}

/// Future for the outcome of one submission. Resolves exactly once.
#[derive(Debug)]
pub struct PendingResponse {
    apns_id: Option<Uuid>,
    result: oneshot::Receiver<SendResult>,
}

impl PendingResponse {
    /// A handle that is already resolved with `error`; no request was created.
    pub(crate) fn failed(error: SendError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self { apns_id: None, result: rx }
    }

    /// The request id sent to the gateway, or `None` if the submission never left the client.
    #[must_use]
    pub const fn apns_id(&self) -> Option<Uuid> {
        self.apns_id
    }
}

impl Future for PendingResponse {
    type Output = SendResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.result).poll(cx).map(|outcome| outcome.unwrap_or(Err(SendError::ConnectionClosed)))
    }
}

#[derive(Debug)]
struct PendingRequest {
    notification: PushNotification,
    result: oneshot::Sender<SendResult>,
}

#[derive(Debug)]
struct PendingTable {
    open: bool,
    requests: HashMap<Uuid, PendingRequest>,
}

/// One authenticated session with the gateway.
///
/// Submissions are tagged with a fresh `apns-id` and parked in the pending
/// table until the matching reply arrives. When the session is lost or the
/// connection is closed, the table is closed and every parked submission is
/// failed in the same step, so nothing can be added after the drain.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    endpoint: Endpoint,
    session: Arc<dyn GatewaySession>,
    auth: Arc<AuthService>,
    metrics: MetricsHook,
    pending: Mutex<PendingTable>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    closed: watch::Sender<Option<CloseReason>>,
}

impl Connection {
    /// Authenticates and opens a session to `endpoint`.
    ///
    /// # Errors
    /// Returns `ConnectError::Credentials` if the credentials cannot be used, or
    /// `ConnectError::ConnectFailure` if the connector fails.
    #[tracing::instrument(
        name = "open_connection",
        level = "debug",
        skip_all,
        fields(connection_id = id, endpoint = %endpoint),
        err(level = "warn")
    )]
    pub async fn open(
        id: u64,
        endpoint: Endpoint,
        connector: &dyn Connector,
        auth: Arc<AuthService>,
        proxy: Option<&Arc<dyn ProxyHandlerFactory>>,
        metrics: MetricsHook,
    ) -> Result<Arc<Self>, ConnectError> {
        auth.authenticate()?;

        let params = ConnectParams { endpoint: &endpoint, proxy, tls_identity: auth.tls_identity() };
        let session = connector
            .connect(params)
            .await
            .map_err(|cause| ConnectError::ConnectFailure { endpoint: endpoint.to_string(), cause })?;

        let (closed, _) = watch::channel(None);
        let connection = Arc::new(Self {
            id,
            endpoint,
            session,
            auth,
            metrics,
            pending: Mutex::new(PendingTable { open: true, requests: HashMap::new() }),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            closed,
        });

        let session = Arc::clone(&connection.session);
        let cancel = connection.cancel.clone();
        let weak = Arc::downgrade(&connection);
        tokio::spawn(
            async move {
                tokio::select! {
                    cause = session.closed() => {
                        if let Some(connection) = weak.upgrade() {
                            tracing::warn!(error = %cause, "Gateway session lost");
                            connection.terminate(CloseReason::Lost(cause));
                        }
                    }
                    () = cancel.cancelled() => {}
                }
            }
            .instrument(tracing::debug_span!("session_watch", connection_id = id)),
        );

        tracing::info!("Connected to gateway");
        Ok(connection)
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.table().open
    }

    /// Number of submissions still waiting for the gateway.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.table().requests.len()
    }

    /// Submits a notification without waiting for the gateway.
    ///
    /// # Errors
    /// Returns `SendError::NotConnected` if the connection is no longer open (no
    /// request is created), or `SendError::Credentials` if no provider token can
    /// be produced.
    pub fn send(self: &Arc<Self>, notification: PushNotification) -> Result<PendingResponse, SendError> {
        let authorization = self.auth.authenticate()?.map(|token| token.bearer());
        let apns_id = Uuid::new_v4();
        let request = GatewayRequest {
            apns_id,
            token: notification.token().to_string(),
            topic: notification.topic().to_string(),
            payload: notification.payload().clone(),
            priority: notification.priority(),
            expiration: notification.expiration(),
            collapse_id: notification.collapse_id().map(str::to_string),
            push_type: notification.push_type(),
            authorization,
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut table = self.table();
            if !table.open {
                return Err(SendError::NotConnected);
            }
            table.requests.insert(apns_id, PendingRequest { notification, result: tx });
            // Under the lock, so a concurrent terminate cannot report the failure first.
            self.metrics.fire(|m| m.on_notification_sent(apns_id));
        }

        let connection = Arc::clone(self);
        self.tasks.spawn(
            async move {
                tokio::select! {
                    reply = connection.session.exchange(request) => connection.complete(apns_id, reply),
                    () = connection.cancel.cancelled() => {}
                }
            }
            .instrument(tracing::debug_span!("exchange", connection_id = self.id, %apns_id)),
        );

        Ok(PendingResponse { apns_id: Some(apns_id), result: rx })
    }

    /// Gracefully closes the connection. Submissions still waiting for the
    /// gateway fail with `SendError::ConnectionClosed`. Closing twice is a no-op.
    pub async fn close(&self) {
        if self.terminate(CloseReason::Closed) {
            tracing::info!(connection_id = self.id, "Closing connection");
            self.session.shutdown().await;
        }
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Resolves once the connection is lost or closed. Every pending submission
    /// has been resolved by then.
    pub async fn closed(&self) -> CloseReason {
        let mut closed = self.closed.subscribe();
        let reason = closed.wait_for(Option::is_some).await.map(|reason| reason.clone()).ok().flatten();
        reason.unwrap_or(CloseReason::Closed)
    }

    fn table(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Closes the pending table and fails everything in it. Returns `false` if
    /// the connection was already terminated.
    fn terminate(&self, reason: CloseReason) -> bool {
        let drained = {
            let mut table = self.table();
            if !table.open {
                return false;
            }
            table.open = false;
            std::mem::take(&mut table.requests)
        };
        self.cancel.cancel();

        let error = match &reason {
            CloseReason::Lost(cause) => SendError::ConnectionLost(cause.to_string()),
            CloseReason::Closed => SendError::ConnectionClosed,
        };
        if !drained.is_empty() {
            tracing::info!(connection_id = self.id, count = drained.len(), error = %error, "Failing pending notifications");
        }
        for (apns_id, request) in drained {
            self.metrics.fire(|m| m.on_notification_failed(apns_id));
            let _ = request.result.send(Err(error.clone()));
        }

        self.closed.send_replace(Some(reason));
        true
    }

    fn complete(&self, apns_id: Uuid, reply: Result<GatewayReply, TransportError>) {
        let removed = self.table().requests.remove(&apns_id);
        let Some(pending) = removed else {
            tracing::debug!(%apns_id, "Discarding reply for a notification that is no longer pending");
            return;
        };

        let outcome = match reply {
            Ok(reply) => Ok(self.interpret(pending.notification, apns_id, &reply)),
            Err(TransportError::ConnectionLost(cause)) => Err(SendError::ConnectionLost(cause)),
            Err(e) => Err(SendError::Transport(e)),
        };

        match &outcome {
            Ok(response) if response.is_accepted() => {
                tracing::debug!(%apns_id, "Notification accepted");
                self.metrics.fire(|m| m.on_notification_accepted(apns_id));
            }
            Ok(response) => {
                let reason = response.rejection_reason().cloned().unwrap_or(RejectionReason::Other(String::new()));
                tracing::info!(%apns_id, reason = %reason, "Notification rejected");
                self.metrics.fire(|m| m.on_notification_rejected(apns_id, &reason));
            }
            Err(e) => {
                tracing::warn!(%apns_id, error = %e, "Notification failed");
                self.metrics.fire(|m| m.on_notification_failed(apns_id));
            }
        }

        let _ = pending.result.send(outcome);
    }

    fn interpret(&self, notification: PushNotification, apns_id: Uuid, reply: &GatewayReply) -> PushNotificationResponse {
        let apns_id = reply.apns_id.unwrap_or(apns_id);
        if reply.status == 200 {
            return PushNotificationResponse::accepted(notification, apns_id);
        }

        let (reason, timestamp) = match ErrorBody::parse(&reply.body) {
            Some(body) => (RejectionReason::from(body.reason.as_str()), body.invalidation_timestamp()),
            None => (RejectionReason::Other(format!("HTTP {}", reply.status)), None),
        };

        if reason == RejectionReason::ExpiredProviderToken {
            self.auth.invalidate_token();
        }

        PushNotificationResponse::rejected(notification, apns_id, reason, timestamp)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
