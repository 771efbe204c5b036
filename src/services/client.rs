use crate::adapters::metrics::{MetricsHook, MetricsListener};
use crate::adapters::proxy::ProxyHandlerFactory;
use crate::adapters::transport::{Connector, Http2Connector};
use crate::domain::credentials::{ApnsSigningKey, ClientCertificate, Credentials};
use crate::domain::endpoint::Endpoint;
use crate::domain::notification::PushNotification;
use crate::domain::payload::DEFAULT_MAXIMUM_PAYLOAD_SIZE;
use crate::error::{BuildError, ConnectError, SendError};
use crate::services::auth_service::{AuthService, DEFAULT_TOKEN_TTL};
use crate::services::connection::PendingResponse;
use crate::services::reconnection::{ConnectionState, ReconnectionManager, ReconnectionPolicy};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::WatchStream;

/// Sends push notifications over a single, automatically re-established
/// gateway connection. Cheap to clone; clones share the connection.
#[derive(Debug, Clone)]
pub struct ApnsClient {
    manager: ReconnectionManager,
    max_payload_size: usize,
}

impl ApnsClient {
    #[must_use]
    pub fn builder() -> ApnsClientBuilder {
        ApnsClientBuilder::new()
    }

    /// # Errors
    /// See [`ReconnectionManager::connect`].
    pub async fn connect(&self, endpoint: Endpoint) -> Result<(), ConnectError> {
        self.manager.connect(endpoint).await
    }

    /// Submits a notification and returns a handle to its outcome.
    ///
    /// Never blocks. If the client is not connected the handle is already
    /// resolved with [`SendError::ClientNotConnected`]; callers that want to
    /// retry can await [`reconnection_future`](Self::reconnection_future) first.
    pub fn send_notification(&self, notification: PushNotification) -> PendingResponse {
        if let Err(e) = notification.check_payload_size(self.max_payload_size) {
            return PendingResponse::failed(e.into());
        }

        match self.manager.with_current(|connection| connection.send(notification)) {
            Some(Ok(pending)) => pending,
            Some(Err(SendError::NotConnected)) | None => {
                tracing::debug!(state = ?self.manager.state(), "Rejecting notification while disconnected");
                PendingResponse::failed(SendError::ClientNotConnected)
            }
            Some(Err(e)) => PendingResponse::failed(e),
        }
    }

    /// Resolves on the next successful (re)connection after this call.
    #[must_use]
    pub fn reconnection_future(&self) -> BoxFuture<'static, Result<(), ConnectError>> {
        self.manager.reconnection_future()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    #[must_use]
    pub fn state_changes(&self) -> WatchStream<ConnectionState> {
        self.manager.state_changes()
    }

    /// Stops reconnecting and closes the connection. Every notification
    /// submitted before this call has resolved once it returns.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}

#[derive(Debug)]
pub struct ApnsClientBuilder {
    credentials: Option<Credentials>,
    connector: Option<Arc<dyn Connector>>,
    proxy: Option<Arc<dyn ProxyHandlerFactory>>,
    metrics: Option<Arc<dyn MetricsListener>>,
    policy: ReconnectionPolicy,
    max_payload_size: usize,
    token_ttl: Duration,
}

impl ApnsClientBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            credentials: None,
            connector: None,
            proxy: None,
            metrics: None,
            policy: ReconnectionPolicy::default(),
            max_payload_size: DEFAULT_MAXIMUM_PAYLOAD_SIZE,
            token_ttl: DEFAULT_TOKEN_TTL,
        }
    }

    /// Token-based authentication. Replaces any previously configured credentials.
    #[must_use]
    pub fn with_signing_key(mut self, key: ApnsSigningKey) -> Self {
        self.credentials = Some(Credentials::SigningKey(key));
        self
    }

    /// Certificate-based authentication. Replaces any previously configured credentials.
    #[must_use]
    pub fn with_client_certificate(mut self, certificate: ClientCertificate) -> Self {
        self.credentials = Some(Credentials::Certificate(certificate));
        self
    }

    /// Defaults to [`Http2Connector`].
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    #[must_use]
    pub fn with_proxy_handler_factory(mut self, proxy: Arc<dyn ProxyHandlerFactory>) -> Self {
        self.proxy = Some(proxy);
        self
    }

    #[must_use]
    pub fn with_metrics_listener(mut self, listener: Arc<dyn MetricsListener>) -> Self {
        self.metrics = Some(listener);
        self
    }

    #[must_use]
    pub fn with_reconnection_policy(mut self, policy: ReconnectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub const fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }

    #[must_use]
    pub const fn with_token_ttl(mut self, token_ttl: Duration) -> Self {
        self.token_ttl = token_ttl;
        self
    }

    /// # Errors
    /// Returns `BuildError::MissingCredentials` if neither a signing key nor a
    /// client certificate was supplied, or `BuildError::InvalidPolicy` for a
    /// nonsensical reconnection policy.
    pub fn build(self) -> Result<ApnsClient, BuildError> {
        let credentials = self.credentials.ok_or(BuildError::MissingCredentials)?;
        self.policy.validate()?;

        let connector = self.connector.unwrap_or_else(|| Arc::new(Http2Connector::new()));
        let metrics = self.metrics.map(MetricsHook::new).unwrap_or_default();
        let auth = Arc::new(AuthService::new(credentials, self.token_ttl));

        Ok(ApnsClient {
            manager: ReconnectionManager::new(connector, auth, self.proxy, metrics, self.policy),
            max_payload_size: self.max_payload_size,
        })
    }
}

impl Default for ApnsClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
