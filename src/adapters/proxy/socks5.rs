use crate::adapters::proxy::ProxyHandlerFactory;
use crate::domain::endpoint::Endpoint;
use crate::error::ProxyError;
use async_trait::async_trait;
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USERNAME_PASSWORD: u8 = 0x02;
const AUTH_VERSION: u8 = 0x01;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const REPLY_SUCCEEDED: u8 = 0x00;

/// Tunnels gateway connections through a SOCKS5 proxy (RFC 1928), optionally
/// authenticating with a username and password (RFC 1929).
#[derive(Clone)]
pub struct Socks5ProxyHandlerFactory {
    proxy_address: String,
    credentials: Option<(String, String)>,
}

impl Socks5ProxyHandlerFactory {
    #[must_use]
    pub fn new(proxy_address: impl Into<String>) -> Self {
        Self { proxy_address: proxy_address.into(), credentials: None }
    }

    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

impl fmt::Debug for Socks5ProxyHandlerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socks5ProxyHandlerFactory")
            .field("proxy_address", &self.proxy_address)
            .field("username", &self.credentials.as_ref().map(|(user, _)| user))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProxyHandlerFactory for Socks5ProxyHandlerFactory {
    #[tracing::instrument(level = "debug", skip(self, target), fields(proxy = %self.proxy_address, gateway = %target), err)]
    async fn create_handler(&self, target: &Endpoint) -> Result<TcpStream, ProxyError> {
        let mut stream = TcpStream::connect(&self.proxy_address).await?;
        stream.set_nodelay(true)?;
        let credentials = self.credentials.as_ref().map(|(user, pass)| (user.as_str(), pass.as_str()));
        negotiate(&mut stream, target, credentials).await?;
        tracing::debug!("SOCKS5 tunnel established");
        Ok(stream)
    }
}

/// Runs the client side of the SOCKS5 handshake on `stream`, leaving it
/// connected to `target` on success.
pub(crate) async fn negotiate<S>(
    stream: &mut S,
    target: &Endpoint,
    credentials: Option<(&str, &str)>,
) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let greeting: &[u8] = if credentials.is_some() {
        &[VERSION, 2, METHOD_NO_AUTH, METHOD_USERNAME_PASSWORD]
    } else {
        &[VERSION, 1, METHOD_NO_AUTH]
    };
    stream.write_all(greeting).await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != VERSION {
        return Err(ProxyError::Protocol(format!("unexpected version {:#04x}", choice[0])));
    }

    match (choice[1], credentials) {
        (METHOD_NO_AUTH, _) => {}
        (METHOD_USERNAME_PASSWORD, Some((username, password))) => {
            authenticate(stream, username, password).await?;
        }
        _ => return Err(ProxyError::NoAcceptableMethod),
    }

    let host = target.host.as_bytes();
    let host_len = u8::try_from(host.len()).map_err(|_| ProxyError::Protocol("target host name too long".into()))?;
    let mut request = Vec::with_capacity(7 + host.len());
    request.extend_from_slice(&[VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN, host_len]);
    request.extend_from_slice(host);
    request.extend_from_slice(&target.port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    if reply[0] != VERSION {
        return Err(ProxyError::Protocol(format!("unexpected version {:#04x}", reply[0])));
    }
    if reply[1] != REPLY_SUCCEEDED {
        return Err(ProxyError::ConnectRejected(reply[1]));
    }

    // Skip the bound address; it is not needed for an outbound tunnel.
    let address_len = match reply[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            usize::from(len[0])
        }
        other => return Err(ProxyError::Protocol(format!("unknown address type {other:#04x}"))),
    };
    let mut bound = vec![0u8; address_len + 2];
    stream.read_exact(&mut bound).await?;

    Ok(())
}

async fn authenticate<S>(stream: &mut S, username: &str, password: &str) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let user_len = u8::try_from(username.len()).map_err(|_| ProxyError::Protocol("username too long".into()))?;
    let pass_len = u8::try_from(password.len()).map_err(|_| ProxyError::Protocol("password too long".into()))?;

    let mut request = Vec::with_capacity(3 + username.len() + password.len());
    request.push(AUTH_VERSION);
    request.push(user_len);
    request.extend_from_slice(username.as_bytes());
    request.push(pass_len);
    request.extend_from_slice(password.as_bytes());
    stream.write_all(&request).await?;

    let mut status = [0u8; 2];
    stream.read_exact(&mut status).await?;
    if status[1] != 0x00 {
        return Err(ProxyError::AuthenticationFailed);
    }
    Ok(())
}
