use crate::domain::notification::PushNotification;
use serde::Deserialize;
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Reason code returned by the gateway alongside a rejected notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    BadCollapseId,
    BadDeviceToken,
    BadExpirationDate,
    BadMessageId,
    BadPriority,
    BadTopic,
    DeviceTokenNotForTopic,
    DuplicateHeaders,
    IdleTimeout,
    MissingDeviceToken,
    MissingTopic,
    PayloadEmpty,
    TopicDisallowed,
    BadCertificate,
    BadCertificateEnvironment,
    ExpiredProviderToken,
    Forbidden,
    InvalidProviderToken,
    MissingProviderToken,
    BadPath,
    MethodNotAllowed,
    Unregistered,
    PayloadTooLarge,
    TooManyProviderTokenUpdates,
    TooManyRequests,
    InternalServerError,
    ServiceUnavailable,
    Shutdown,
    Other(String),
}

impl RejectionReason {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::BadCollapseId => "BadCollapseId",
            Self::BadDeviceToken => "BadDeviceToken",
            Self::BadExpirationDate => "BadExpirationDate",
            Self::BadMessageId => "BadMessageId",
            Self::BadPriority => "BadPriority",
            Self::BadTopic => "BadTopic",
            Self::DeviceTokenNotForTopic => "DeviceTokenNotForTopic",
            Self::DuplicateHeaders => "DuplicateHeaders",
            Self::IdleTimeout => "IdleTimeout",
            Self::MissingDeviceToken => "MissingDeviceToken",
            Self::MissingTopic => "MissingTopic",
            Self::PayloadEmpty => "PayloadEmpty",
            Self::TopicDisallowed => "TopicDisallowed",
            Self::BadCertificate => "BadCertificate",
            Self::BadCertificateEnvironment => "BadCertificateEnvironment",
            Self::ExpiredProviderToken => "ExpiredProviderToken",
            Self::Forbidden => "Forbidden",
            Self::InvalidProviderToken => "InvalidProviderToken",
            Self::MissingProviderToken => "MissingProviderToken",
            Self::BadPath => "BadPath",
            Self::MethodNotAllowed => "MethodNotAllowed",
            Self::Unregistered => "Unregistered",
            Self::PayloadTooLarge => "PayloadTooLarge",
            Self::TooManyProviderTokenUpdates => "TooManyProviderTokenUpdates",
            Self::TooManyRequests => "TooManyRequests",
            Self::InternalServerError => "InternalServerError",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::Shutdown => "Shutdown",
            Self::Other(reason) => reason,
        }
    }

    /// Reasons meaning the destination token will never accept notifications again.
    #[must_use]
    pub const fn implies_token_invalidation(&self) -> bool {
        matches!(self, Self::Unregistered)
    }
}

impl From<&str> for RejectionReason {
    fn from(value: &str) -> Self {
        match value {
            "BadCollapseId" => Self::BadCollapseId,
            "BadDeviceToken" => Self::BadDeviceToken,
            "BadExpirationDate" => Self::BadExpirationDate,
            "BadMessageId" => Self::BadMessageId,
            "BadPriority" => Self::BadPriority,
            "BadTopic" => Self::BadTopic,
            "DeviceTokenNotForTopic" => Self::DeviceTokenNotForTopic,
            "DuplicateHeaders" => Self::DuplicateHeaders,
            "IdleTimeout" => Self::IdleTimeout,
            "MissingDeviceToken" => Self::MissingDeviceToken,
            "MissingTopic" => Self::MissingTopic,
            "PayloadEmpty" => Self::PayloadEmpty,
            "TopicDisallowed" => Self::TopicDisallowed,
            "BadCertificate" => Self::BadCertificate,
            "BadCertificateEnvironment" => Self::BadCertificateEnvironment,
            "ExpiredProviderToken" => Self::ExpiredProviderToken,
            "Forbidden" => Self::Forbidden,
            "InvalidProviderToken" => Self::InvalidProviderToken,
            "MissingProviderToken" => Self::MissingProviderToken,
            "BadPath" => Self::BadPath,
            "MethodNotAllowed" => Self::MethodNotAllowed,
            "Unregistered" => Self::Unregistered,
            "PayloadTooLarge" => Self::PayloadTooLarge,
            "TooManyProviderTokenUpdates" => Self::TooManyProviderTokenUpdates,
            "TooManyRequests" => Self::TooManyRequests,
            "InternalServerError" => Self::InternalServerError,
            "ServiceUnavailable" => Self::ServiceUnavailable,
            "Shutdown" => Self::Shutdown,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The gateway's decision on one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushNotificationResponse {
    notification: PushNotification,
    apns_id: Uuid,
    accepted: bool,
    rejection_reason: Option<RejectionReason>,
    token_invalidation_timestamp: Option<OffsetDateTime>,
}

impl PushNotificationResponse {
    #[must_use]
    pub fn accepted(notification: PushNotification, apns_id: Uuid) -> Self {
        Self { notification, apns_id, accepted: true, rejection_reason: None, token_invalidation_timestamp: None }
    }

    /// Builds a rejection. The invalidation timestamp is only kept for reasons
    /// that mean the token is permanently invalid.
    #[must_use]
    pub fn rejected(
        notification: PushNotification,
        apns_id: Uuid,
        reason: RejectionReason,
        token_invalidation_timestamp: Option<OffsetDateTime>,
    ) -> Self {
        let token_invalidation_timestamp = token_invalidation_timestamp.filter(|_| reason.implies_token_invalidation());
        Self { notification, apns_id, accepted: false, rejection_reason: Some(reason), token_invalidation_timestamp }
    }

    #[must_use]
    pub const fn push_notification(&self) -> &PushNotification {
        &self.notification
    }

    #[must_use]
    pub const fn apns_id(&self) -> Uuid {
        self.apns_id
    }

    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        self.accepted
    }

    #[must_use]
    pub const fn rejection_reason(&self) -> Option<&RejectionReason> {
        self.rejection_reason.as_ref()
    }

    #[must_use]
    pub const fn token_invalidation_timestamp(&self) -> Option<OffsetDateTime> {
        self.token_invalidation_timestamp
    }
}

/// JSON body the gateway sends with every non-200 reply.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub(crate) reason: String,
    /// Milliseconds since the epoch.
    pub(crate) timestamp: Option<i64>,
}

impl ErrorBody {
    pub(crate) fn parse(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }

    pub(crate) fn invalidation_timestamp(&self) -> Option<OffsetDateTime> {
        let millis = self.timestamp?;
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification() -> PushNotification {
        PushNotification::new("efc7492bdbd8209", "com.example.myApp", r#"{"aps":{"alert":"Example!"}}"#).unwrap()
    }

    #[test]
    fn test_accepted_has_no_reason_or_timestamp() {
        let response = PushNotificationResponse::accepted(notification(), Uuid::new_v4());
        assert!(response.is_accepted());
        assert!(response.rejection_reason().is_none());
        assert!(response.token_invalidation_timestamp().is_none());
    }

    #[test]
    fn test_unregistered_keeps_timestamp() {
        let ts = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let response =
            PushNotificationResponse::rejected(notification(), Uuid::new_v4(), RejectionReason::Unregistered, Some(ts));
        assert!(!response.is_accepted());
        assert_eq!(response.rejection_reason(), Some(&RejectionReason::Unregistered));
        assert_eq!(response.token_invalidation_timestamp(), Some(ts));
    }

    #[test]
    fn test_transient_reason_drops_timestamp() {
        let ts = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let response =
            PushNotificationResponse::rejected(notification(), Uuid::new_v4(), RejectionReason::TooManyRequests, Some(ts));
        assert_eq!(response.rejection_reason(), Some(&RejectionReason::TooManyRequests));
        assert!(response.token_invalidation_timestamp().is_none());
    }

    #[test]
    fn test_reason_parsing() {
        assert_eq!(RejectionReason::from("Unregistered"), RejectionReason::Unregistered);
        assert_eq!(RejectionReason::from("BadDeviceToken"), RejectionReason::BadDeviceToken);
        let unknown = RejectionReason::from("SomethingNew");
        assert_eq!(unknown, RejectionReason::Other("SomethingNew".to_string()));
        assert_eq!(unknown.to_string(), "SomethingNew");
    }

    #[test]
    fn test_error_body_timestamp_in_millis() {
        let body = ErrorBody::parse(br#"{"reason":"Unregistered","timestamp":1700000000123}"#).unwrap();
        assert_eq!(body.reason, "Unregistered");
        let ts = body.invalidation_timestamp().unwrap();
        assert_eq!(ts.unix_timestamp(), 1_700_000_000);
        assert_eq!(ts.millisecond(), 123);

        let transient = ErrorBody::parse(br#"{"reason":"TooManyRequests"}"#).unwrap();
        assert!(transient.invalidation_timestamp().is_none());
        assert!(ErrorBody::parse(b"<html>").is_none());
    }
}
