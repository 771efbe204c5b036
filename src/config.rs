use crate::adapters::proxy::Socks5ProxyHandlerFactory;
use crate::domain::credentials::{ApnsSigningKey, ClientCertificate};
use crate::domain::endpoint::{DEFAULT_APNS_PORT, DEVELOPMENT_APNS_HOST, Endpoint};
use crate::error::CredentialsError;
use crate::services::client::ApnsClientBuilder;
use crate::services::reconnection::ReconnectionPolicy;
use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Everything needed to build a client, as command-line flags with
/// `APNS_*` environment fallbacks. Flatten it into a binary's own parser.
#[derive(Clone, Debug, Args)]
pub struct ClientConfig {
    #[command(flatten)]
    pub gateway: GatewayConfig,

    #[command(flatten)]
    pub auth: AuthConfig,

    #[command(flatten)]
    pub proxy: ProxyConfig,

    #[command(flatten)]
    pub reconnect: ReconnectConfig,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,
}

#[derive(Clone, Debug, Args)]
pub struct GatewayConfig {
    /// Gateway host name. The built-in transport speaks HTTP/2 without TLS, so
    /// point this at a plaintext (h2c) gateway or a local TLS-terminating relay
    #[arg(long = "gateway-host", env = "APNS_GATEWAY_HOST", default_value = DEVELOPMENT_APNS_HOST)]
    pub host: String,

    /// Gateway port (443, or 2197 where 443 is blocked)
    #[arg(long = "gateway-port", env = "APNS_GATEWAY_PORT", default_value_t = DEFAULT_APNS_PORT)]
    pub port: u16,

    /// Largest payload accepted for sending, in bytes
    #[arg(long, env = "APNS_MAX_PAYLOAD_SIZE", default_value_t = 4096)]
    pub max_payload_size: usize,
}

#[derive(Clone, Debug, Args)]
pub struct AuthConfig {
    /// PKCS#8 file holding the ES256 signing key for token authentication
    #[arg(long, env = "APNS_SIGNING_KEY_PATH")]
    pub signing_key_path: Option<PathBuf>,

    /// Developer team id, the `iss` claim of provider tokens
    #[arg(long, env = "APNS_TEAM_ID")]
    pub team_id: Option<String>,

    /// Id of the signing key, the `kid` header of provider tokens
    #[arg(long, env = "APNS_KEY_ID")]
    pub key_id: Option<String>,

    /// PEM certificate chain for certificate authentication
    #[arg(long, env = "APNS_CERTIFICATE_PATH")]
    pub certificate_path: Option<PathBuf>,

    /// PEM private key belonging to the certificate
    #[arg(long, env = "APNS_PRIVATE_KEY_PATH")]
    pub private_key_path: Option<PathBuf>,

    /// Provider token lifetime in seconds
    #[arg(long, env = "APNS_TOKEN_TTL_SECS", default_value_t = 3000)]
    pub token_ttl_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct ProxyConfig {
    /// SOCKS5 proxy address (host:port) to tunnel gateway connections through
    #[arg(long = "socks5-proxy", env = "APNS_SOCKS5_PROXY")]
    pub address: Option<String>,

    /// SOCKS5 username
    #[arg(long = "socks5-username", env = "APNS_SOCKS5_USERNAME", requires = "address")]
    pub username: Option<String>,

    /// SOCKS5 password
    #[arg(long = "socks5-password", env = "APNS_SOCKS5_PASSWORD", requires = "username")]
    pub password: Option<String>,
}

#[derive(Clone, Debug, Args)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt, in milliseconds
    #[arg(long = "reconnect-initial-delay-ms", env = "APNS_RECONNECT_INITIAL_DELAY_MS", default_value_t = 1000)]
    pub initial_delay_ms: u64,

    /// Longest delay between attempts, in milliseconds
    #[arg(long = "reconnect-max-delay-ms", env = "APNS_RECONNECT_MAX_DELAY_MS", default_value_t = 60_000)]
    pub max_delay_ms: u64,

    /// Growth factor applied to the delay after each failed attempt
    #[arg(long = "reconnect-multiplier", env = "APNS_RECONNECT_MULTIPLIER", default_value_t = 2.0)]
    pub multiplier: f64,

    /// Attempts per connect cycle before giving up (unbounded when unset)
    #[arg(long = "reconnect-max-attempts", env = "APNS_RECONNECT_MAX_ATTEMPTS")]
    pub max_attempts: Option<usize>,

    /// Random fraction shaved off each delay
    #[arg(long = "reconnect-jitter", env = "APNS_RECONNECT_JITTER", default_value_t = 0.2)]
    pub jitter: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, Args)]
pub struct TelemetryConfig {
    /// Log output format
    #[arg(long, env = "APNS_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// OTLP/HTTP collector base URL; traces and metrics are exported when set
    #[arg(long, env = "APNS_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

impl GatewayConfig {
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }
}

impl AuthConfig {
    /// Loads whichever credentials are configured. A signing key wins over a
    /// certificate when both are present.
    ///
    /// # Errors
    /// Returns a `CredentialsError` if a configured file cannot be read or parsed,
    /// or if neither kind of credentials is fully configured.
    pub fn apply(&self, builder: ApnsClientBuilder) -> Result<ApnsClientBuilder, CredentialsError> {
        if let Some(path) = &self.signing_key_path {
            let (Some(team_id), Some(key_id)) = (&self.team_id, &self.key_id) else {
                return Err(CredentialsError::MalformedSigningKey(
                    "a team id and key id are required with a signing key".to_string(),
                ));
            };
            let key = ApnsSigningKey::load_from_pkcs8_file(path, team_id, key_id)?;
            return Ok(builder.with_signing_key(key));
        }

        if let (Some(certificate), Some(private_key)) = (&self.certificate_path, &self.private_key_path) {
            let certificate = ClientCertificate::load_from_pem_files(certificate, private_key)?;
            return Ok(builder.with_client_certificate(certificate));
        }

        Err(CredentialsError::Io("no signing key or client certificate configured".to_string()))
    }
}

impl ReconnectConfig {
    #[must_use]
    pub fn policy(&self) -> ReconnectionPolicy {
        ReconnectionPolicy::default()
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_multiplier(self.multiplier)
            .with_max_attempts(self.max_attempts)
            .with_jitter(self.jitter)
    }
}

impl ClientConfig {
    /// A builder preloaded with this configuration. Metrics listeners and
    /// custom connectors can still be added before building.
    ///
    /// # Errors
    /// See [`AuthConfig::apply`].
    pub fn builder(&self) -> Result<ApnsClientBuilder, CredentialsError> {
        let mut builder = ApnsClientBuilder::new()
            .with_reconnection_policy(self.reconnect.policy())
            .with_max_payload_size(self.gateway.max_payload_size)
            .with_token_ttl(Duration::from_secs(self.auth.token_ttl_secs));

        if let Some(address) = &self.proxy.address {
            let mut proxy = Socks5ProxyHandlerFactory::new(address.clone());
            if let Some(username) = &self.proxy.username {
                proxy = proxy.with_credentials(username.clone(), self.proxy.password.clone().unwrap_or_default());
            }
            builder = builder.with_proxy_handler_factory(Arc::new(proxy));
        }

        self.auth.apply(builder)
    }
}
