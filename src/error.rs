use thiserror::Error;

/// Problems detected while constructing a notification. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("Malformed device token: {0}")]
    MalformedToken(String),
    #[error("Payload is {size} bytes, which exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("Malformed signing key: {0}")]
    MalformedSigningKey(String),
    #[error("Malformed client certificate: {0}")]
    MalformedCertificate(String),
    #[error("Failed to sign provider token: {0}")]
    Signing(String),
    #[error("Failed to read credentials: {0}")]
    Io(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    #[error("Proxy I/O error: {0}")]
    Io(String),
    #[error("Proxy offered no acceptable authentication method")]
    NoAcceptableMethod,
    #[error("Proxy rejected the supplied credentials")]
    AuthenticationFailed,
    #[error("Proxy refused the tunnel (reply code {0:#04x})")]
    ConnectRejected(u8),
    #[error("Malformed proxy reply: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for ProxyError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Failures reported by a [`Connector`](crate::adapters::transport::Connector) or one of its sessions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<hyper::Error> for TransportError {
    fn from(e: hyper::Error) -> Self {
        if e.is_closed() || e.is_canceled() {
            Self::ConnectionLost(e.to_string())
        } else {
            Self::Protocol(e.to_string())
        }
    }
}

/// Why a connection could not be established.
///
/// Cloneable so that a single shared connection attempt can report its outcome
/// to every task awaiting it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Failed to connect to {endpoint}: {cause}")]
    ConnectFailure { endpoint: String, cause: TransportError },
    #[error("Gave up after {attempts} connection attempts: {last}")]
    AttemptsExhausted { attempts: usize, last: Box<ConnectError> },
    #[error("Credentials could not be used: {0}")]
    Credentials(#[from] CredentialsError),
    #[error("Client is shutting down")]
    ShuttingDown,
    #[error("Connection attempt aborted: {0}")]
    Aborted(String),
}

impl ConnectError {
    /// Whether the reconnection policy may try again after this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectFailure { cause, .. } => !matches!(cause, TransportError::Unsupported(_)),
            Self::AttemptsExhausted { .. } | Self::Credentials(_) | Self::ShuttingDown | Self::Aborted(_) => false,
        }
    }
}

/// Failure of a single submission. A rejection by the gateway is not a `SendError`;
/// it arrives as a [`PushNotificationResponse`](crate::domain::response::PushNotificationResponse)
/// with `accepted == false`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Client is not connected")]
    ClientNotConnected,
    #[error("Connection is not open")]
    NotConnected,
    #[error("Connection lost before the gateway replied: {0}")]
    ConnectionLost(String),
    #[error("Connection closed before the gateway replied")]
    ConnectionClosed,
    #[error("Transport error: {0}")]
    Transport(TransportError),
    #[error(transparent)]
    Notification(#[from] NotificationError),
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
}

impl SendError {
    /// Connectivity failures are recoverable: resubmit once the client reconnects.
    #[must_use]
    pub const fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::ClientNotConnected
                | Self::NotConnected
                | Self::ConnectionLost(_)
                | Self::ConnectionClosed
                | Self::Transport(_)
        )
    }

    /// Setup failures are caused by the submission itself and will fail again if resubmitted.
    #[must_use]
    pub const fn is_setup(&self) -> bool {
        matches!(self, Self::Notification(_) | Self::Credentials(_))
    }
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("No credentials were supplied; use a signing key or a client certificate")]
    MissingCredentials,
    #[error("Invalid reconnection policy: {0}")]
    InvalidPolicy(String),
}
