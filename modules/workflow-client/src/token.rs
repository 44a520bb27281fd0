//! Callback token verification.

use tracing::warn;

/// Verify an inbound callback token against the configured secret.
///
/// An empty configured token disables the check entirely — an intentional
/// opt-out for deployments where the workflow runs on a trusted network.
pub fn verify_callback_token(configured: &str, presented: Option<&str>) -> bool {
    if configured.is_empty() {
        return true;
    }
    match presented {
        Some(token) => constant_time_eq(token.as_bytes(), configured.as_bytes()),
        None => {
            warn!("Callback arrived without a token while verification is enabled");
            false
        }
    }
}

/// Constant-time comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_configured_token_disables_check() {
        assert!(verify_callback_token("", None));
        assert!(verify_callback_token("", Some("anything")));
    }

    #[test]
    fn token_must_match_exactly() {
        assert!(verify_callback_token("secret", Some("secret")));
        assert!(!verify_callback_token("secret", Some("Secret")));
        assert!(!verify_callback_token("secret", Some("secret ")));
        assert!(!verify_callback_token("secret", None));
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
        assert!(constant_time_eq(b"", b""));
    }
}
