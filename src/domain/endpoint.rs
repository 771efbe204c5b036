use std::fmt;

pub const DEVELOPMENT_APNS_HOST: &str = "api.development.push.apple.com";
pub const PRODUCTION_APNS_HOST: &str = "api.push.apple.com";
pub const DEFAULT_APNS_PORT: u16 = 443;
pub const ALTERNATE_APNS_PORT: u16 = 2197;

/// Host and port of a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    #[must_use]
    pub fn development() -> Self {
        Self::new(DEVELOPMENT_APNS_HOST, DEFAULT_APNS_PORT)
    }

    #[must_use]
    pub fn production() -> Self {
        Self::new(PRODUCTION_APNS_HOST, DEFAULT_APNS_PORT)
    }

    /// `host:port`, as used for the HTTP/2 `:authority` pseudo-header.
    #[must_use]
    pub fn authority(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
