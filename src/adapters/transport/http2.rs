use crate::adapters::transport::{ConnectParams, Connector, GatewayReply, GatewayRequest, GatewaySession};
use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http2;
use hyper::{Method, Request};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::Instrument;
use uuid::Uuid;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Speaks HTTP/2 with prior knowledge over a plain TCP stream, optionally
/// tunneled through a proxy. TLS is expected to be terminated outside this
/// connector, so client certificates are refused.
#[derive(Debug, Clone)]
pub struct Http2Connector {
    connect_timeout: Duration,
}

impl Http2Connector {
    #[must_use]
    pub const fn new() -> Self {
        Self { connect_timeout: DEFAULT_CONNECT_TIMEOUT }
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    async fn open_stream(&self, params: ConnectParams<'_>) -> Result<TcpStream, TransportError> {
        let endpoint = params.endpoint;
        let stream = match params.proxy {
            Some(proxy) => proxy.create_handler(endpoint).await?,
            None => TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?,
        };
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

impl Default for Http2Connector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for Http2Connector {
    #[tracing::instrument(level = "debug", skip(self, params), fields(endpoint = %params.endpoint), err)]
    async fn connect(&self, params: ConnectParams<'_>) -> Result<Arc<dyn GatewaySession>, TransportError> {
        if params.tls_identity.is_some() {
            return Err(TransportError::Unsupported(
                "client-certificate authentication needs a TLS-capable connector".to_string(),
            ));
        }

        let stream = tokio::time::timeout(self.connect_timeout, self.open_stream(params))
            .await
            .map_err(|_| TransportError::Io(format!("connect timed out after {:?}", self.connect_timeout)))??;

        let (sender, connection) = http2::handshake(TokioExecutor::new(), TokioIo::new(stream)).await?;

        let (closed_tx, closed_rx) = watch::channel(None);
        let driver = tokio::spawn(
            async move {
                let cause = match connection.await {
                    Ok(()) => TransportError::ConnectionLost("gateway closed the connection".to_string()),
                    Err(e) => {
                        tracing::warn!(error = %e, "HTTP/2 connection failed");
                        TransportError::from(e)
                    }
                };
                closed_tx.send_replace(Some(cause));
            }
            .instrument(tracing::debug_span!("h2_connection", endpoint = %params.endpoint)),
        );

        Ok(Arc::new(Http2Session {
            sender,
            authority: params.endpoint.authority(),
            closed: closed_rx,
            driver: driver.abort_handle(),
        }))
    }
}

#[derive(Debug)]
struct Http2Session {
    sender: http2::SendRequest<Full<Bytes>>,
    authority: String,
    closed: watch::Receiver<Option<TransportError>>,
    driver: AbortHandle,
}

impl Http2Session {
    fn build_request(&self, request: GatewayRequest) -> Result<Request<Full<Bytes>>, TransportError> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(format!("http://{}{}", self.authority, request.path()))
            .header("apns-id", request.apns_id.to_string())
            .header("apns-topic", request.topic.as_str())
            .header("apns-priority", request.priority.code().to_string());

        if let Some(expiration) = request.expiration {
            builder = builder.header("apns-expiration", expiration.unix_timestamp().to_string());
        }
        if let Some(collapse_id) = request.collapse_id.as_deref() {
            builder = builder.header("apns-collapse-id", collapse_id);
        }
        if let Some(push_type) = request.push_type {
            builder = builder.header("apns-push-type", push_type.as_str());
        }
        if let Some(authorization) = request.authorization.as_deref() {
            builder = builder.header("authorization", authorization);
        }

        builder.body(Full::new(request.payload)).map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl GatewaySession for Http2Session {
    async fn exchange(&self, request: GatewayRequest) -> Result<GatewayReply, TransportError> {
        let request = self.build_request(request)?;

        let mut sender = self.sender.clone();
        sender.ready().await?;
        let response = sender.send_request(request).await?;

        let status = response.status().as_u16();
        let apns_id = response
            .headers()
            .get("apns-id")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value).ok());
        let body = response.into_body().collect().await?.to_bytes();

        Ok(GatewayReply { status, apns_id, body })
    }

    async fn closed(&self) -> TransportError {
        let mut closed = self.closed.clone();
        let cause = closed.wait_for(Option::is_some).await.map(|state| state.clone()).ok().flatten();
        cause.unwrap_or_else(|| TransportError::ConnectionLost("connection driver stopped".to_string()))
    }

    async fn shutdown(&self) {
        self.driver.abort();
    }
}
