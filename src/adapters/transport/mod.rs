use crate::adapters::proxy::ProxyHandlerFactory;
use crate::domain::credentials::ClientCertificate;
use crate::domain::endpoint::Endpoint;
use crate::domain::notification::{DeliveryPriority, PushType};
use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

pub mod http2;

pub use http2::Http2Connector;

/// One notification as it goes on the wire.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub apns_id: Uuid,
    pub token: String,
    pub topic: String,
    pub payload: Bytes,
    pub priority: DeliveryPriority,
    pub expiration: Option<OffsetDateTime>,
    pub collapse_id: Option<String>,
    pub push_type: Option<PushType>,
    /// Full `authorization` header value, absent for certificate authentication.
    pub authorization: Option<String>,
}

impl GatewayRequest {
    #[must_use]
    pub fn path(&self) -> String {
        format!("/3/device/{}", self.token)
    }
}

/// The gateway's raw answer to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayReply {
    pub status: u16,
    /// Echo of the request's `apns-id`, when the gateway sent one back.
    pub apns_id: Option<Uuid>,
    pub body: Bytes,
}

/// Everything a connector needs to open a session.
#[derive(Debug, Clone, Copy)]
pub struct ConnectParams<'a> {
    pub endpoint: &'a Endpoint,
    pub proxy: Option<&'a Arc<dyn ProxyHandlerFactory>>,
    pub tls_identity: Option<&'a ClientCertificate>,
}

/// A live, multiplexed session with the gateway.
#[async_trait]
pub trait GatewaySession: Send + Sync + std::fmt::Debug {
    /// Sends one request and waits for its reply. Many exchanges may run concurrently.
    async fn exchange(&self, request: GatewayRequest) -> Result<GatewayReply, TransportError>;

    /// Resolves with the cause once the session is no longer usable.
    async fn closed(&self) -> TransportError;

    /// Starts a graceful shutdown of the session.
    async fn shutdown(&self);
}

/// Opens sessions with the gateway. Framing, TLS and stream multiplexing live behind this seam.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    async fn connect(&self, params: ConnectParams<'_>) -> Result<Arc<dyn GatewaySession>, TransportError>;
}
