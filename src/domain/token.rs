use crate::error::NotificationError;

/// Normalizes a human-entered device token into the canonical lowercase hex form.
///
/// Angle brackets and whitespace are dropped, so `"<efc7492 bdbd8209>"` becomes
/// `"efc7492bdbd8209"`.
///
/// # Errors
/// Returns `NotificationError::MalformedToken` if the token is empty or contains
/// anything other than hex digits once the decoration is removed.
pub fn sanitize_token(raw: &str) -> Result<String, NotificationError> {
    let token: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '<' && *c != '>')
        .map(|c| c.to_ascii_lowercase())
        .collect();

    if token.is_empty() {
        return Err(NotificationError::MalformedToken("token is empty".to_string()));
    }

    if let Some(bad) = token.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(NotificationError::MalformedToken(format!("unexpected character {bad:?}")));
    }

    Ok(token)
}
