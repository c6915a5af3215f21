//! Token values exchanged with the identity services.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session and key-manager token pair for one principal.
///
/// Values are immutable; a refresh always produces a new pair. The
/// [`VOID`](AuthenticationToken::VOID) pair stands for "not authenticated".
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationToken {
    session_token: String,
    key_manager_token: String,
}

impl AuthenticationToken {
    /// The "not authenticated" sentinel.
    pub const VOID: AuthenticationToken = AuthenticationToken {
        session_token: String::new(),
        key_manager_token: String::new(),
    };

    /// Create a token pair.
    pub fn new(session_token: impl Into<String>, key_manager_token: impl Into<String>) -> Self {
        Self {
            session_token: session_token.into(),
            key_manager_token: key_manager_token.into(),
        }
    }

    /// Session token issued by the Session Authentication Service.
    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    /// Key-manager token issued by the Key Manager Authentication Service.
    pub fn key_manager_token(&self) -> &str {
        &self.key_manager_token
    }

    /// Whether this is the VOID sentinel.
    pub fn is_void(&self) -> bool {
        *self == Self::VOID
    }
}

impl fmt::Debug for AuthenticationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_void() {
            return f.write_str("AuthenticationToken(VOID)");
        }
        f.debug_struct("AuthenticationToken")
            .field("session_token", &"[REDACTED]")
            .field("key_manager_token", &"[REDACTED]")
            .finish()
    }
}

/// Payload returned by `POST /v1/authenticate`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    /// Token name, e.g. `sessionToken` or `keyManagerToken`.
    #[serde(default)]
    pub name: String,
    /// Token value.
    pub token: String,
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("name", &self.name)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_void() {
        assert!(AuthenticationToken::VOID.is_void());
        assert!(AuthenticationToken::default().is_void());
        assert!(!AuthenticationToken::new("S", "K").is_void());
        // A pair with one half set is a real token
        assert!(!AuthenticationToken::new("S", "").is_void());
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(
            AuthenticationToken::new("S", "K"),
            AuthenticationToken::new("S".to_string(), "K".to_string())
        );
        assert_ne!(
            AuthenticationToken::new("S", "K"),
            AuthenticationToken::new("S", "K2")
        );
    }

    #[test]
    fn test_debug_redacts() {
        let rendered = format!("{:?}", AuthenticationToken::new("secret-s", "secret-k"));
        assert!(!rendered.contains("secret"));
        assert_eq!(
            format!("{:?}", AuthenticationToken::VOID),
            "AuthenticationToken(VOID)"
        );
    }

    #[test]
    fn test_session_token_payload() {
        let token: SessionToken =
            serde_json::from_str(r#"{"name":"sessionToken","token":"abc"}"#).unwrap();
        assert_eq!(token.name, "sessionToken");
        assert_eq!(token.token, "abc");
        assert!(!format!("{:?}", token).contains("abc"));
    }
}
