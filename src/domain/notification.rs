use crate::domain::token::sanitize_token;
use crate::error::NotificationError;
use bytes::Bytes;
use time::OffsetDateTime;

/// Delivery priority requested for a notification (`apns-priority`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DeliveryPriority {
    #[default]
    Immediate = 10,
    Conserve = 5,
}

impl DeliveryPriority {
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Value of the `apns-push-type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushType {
    Alert,
    Background,
    Voip,
    Complication,
    FileProvider,
    Mdm,
}

impl PushType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::Background => "background",
            Self::Voip => "voip",
            Self::Complication => "complication",
            Self::FileProvider => "fileprovider",
            Self::Mdm => "mdm",
        }
    }
}

/// A notification ready for submission. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushNotification {
    token: String,
    topic: String,
    payload: Bytes,
    priority: DeliveryPriority,
    expiration: Option<OffsetDateTime>,
    collapse_id: Option<String>,
    push_type: Option<PushType>,
}

impl PushNotification {
    /// Creates a notification for `token`, which is sanitized into canonical form first.
    ///
    /// # Errors
    /// Returns `NotificationError::MalformedToken` if the token cannot be sanitized.
    pub fn new(token: &str, topic: impl Into<String>, payload: impl Into<Bytes>) -> Result<Self, NotificationError> {
        Ok(Self {
            token: sanitize_token(token)?,
            topic: topic.into(),
            payload: payload.into(),
            priority: DeliveryPriority::default(),
            expiration: None,
            collapse_id: None,
            push_type: None,
        })
    }

    #[must_use]
    pub fn with_priority(mut self, priority: DeliveryPriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_expiration(mut self, expiration: OffsetDateTime) -> Self {
        self.expiration = Some(expiration);
        self
    }

    #[must_use]
    pub fn with_collapse_id(mut self, collapse_id: impl Into<String>) -> Self {
        self.collapse_id = Some(collapse_id.into());
        self
    }

    #[must_use]
    pub fn with_push_type(mut self, push_type: PushType) -> Self {
        self.push_type = Some(push_type);
        self
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[must_use]
    pub const fn priority(&self) -> DeliveryPriority {
        self.priority
    }

    #[must_use]
    pub const fn expiration(&self) -> Option<OffsetDateTime> {
        self.expiration
    }

    #[must_use]
    pub fn collapse_id(&self) -> Option<&str> {
        self.collapse_id.as_deref()
    }

    #[must_use]
    pub const fn push_type(&self) -> Option<PushType> {
        self.push_type
    }

    /// Fails if the payload is larger than `max` bytes.
    ///
    /// # Errors
    /// Returns `NotificationError::PayloadTooLarge` when the limit is exceeded.
    pub fn check_payload_size(&self, max: usize) -> Result<(), NotificationError> {
        let size = self.payload.len();
        if size > max {
            return Err(NotificationError::PayloadTooLarge { size, max });
        }
        Ok(())
    }
}
