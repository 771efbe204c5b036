use crate::domain::endpoint::Endpoint;
use crate::error::ProxyError;
use async_trait::async_trait;
use tokio::net::TcpStream;

pub mod socks5;

pub use socks5::Socks5ProxyHandlerFactory;

#[async_trait]
pub trait ProxyHandlerFactory: Send + Sync + std::fmt::Debug {
    /// Opens a tunnel to `target` and returns the stream, ready for the gateway protocol.
    ///
    /// # Errors
    /// Returns a `ProxyError` if the proxy cannot be reached or refuses the tunnel.
    async fn create_handler(&self, target: &Endpoint) -> Result<TcpStream, ProxyError>;
}
