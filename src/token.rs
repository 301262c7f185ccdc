use crate::models::User;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lifetime assumed for a login token when the server does not announce one
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 30 * 60;

/// Bearer token obtained from a successful login, or injected directly.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthToken {
    /// Opaque bearer value
    pub access_token: String,

    /// Token type (usually "bearer")
    pub token_type: String,

    /// Expiration time, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthToken {
    /// Create a token without a known expiry
    pub fn new(access_token: impl Into<String>) -> Self {
        AuthToken {
            access_token: access_token.into(),
            token_type: "bearer".to_string(),
            expires_at: None,
        }
    }

    /// Set an expiry `seconds` from now
    pub fn expiring_in(mut self, seconds: i64) -> Self {
        self.expires_at = Some(Utc::now() + Duration::seconds(seconds));
        self
    }

    /// Check if the token is past its expiry. Tokens without one never expire locally.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check expiry against `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }

    /// Value of the `Authorization` header
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

// The bearer value is a credential
impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Body returned by `POST /login`
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: Option<String>,

    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Validity in seconds
    pub expires_in: Option<i64>,

    #[serde(default)]
    pub user: Option<User>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl LoginResponse {
    /// Turn the login body into a token, if the server issued one
    pub fn into_token(self) -> Option<AuthToken> {
        let access_token = self.access_token.filter(|t| !t.is_empty())?;
        let lifetime = self
            .expires_in
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        Some(AuthToken {
            access_token,
            token_type: self.token_type,
            expires_at: None,
        }
        .expiring_in(lifetime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_creation() {
        let token = AuthToken::new("access123");
        assert_eq!(token.access_token, "access123");
        assert_eq!(token.token_type, "bearer");
        assert!(!token.is_expired());
        assert_eq!(token.header_value(), "Bearer access123");
    }

    #[test]
    fn test_token_expiry() {
        let token = AuthToken::new("access123").expiring_in(60);
        let expires_at = token.expires_at.unwrap();
        assert!(!token.is_expired());
        assert!(token.is_expired_at(expires_at));
        assert!(token.is_expired_at(expires_at + Duration::seconds(1)));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let token = AuthToken::new("super-secret");
        assert!(!format!("{:?}", token).contains("super-secret"));
    }

    #[test]
    fn test_login_response_default_lifetime() {
        let body: LoginResponse =
            serde_json::from_str(r#"{"access_token": "jwt", "token_type": "bearer"}"#).unwrap();
        let token = body.into_token().unwrap();
        let remaining = token.expires_at.unwrap() - Utc::now();
        assert!(remaining > Duration::minutes(29) && remaining <= Duration::minutes(30));
    }

    #[test]
    fn test_login_response_without_token() {
        let body: LoginResponse = serde_json::from_str(r#"{"message": "ok"}"#).unwrap();
        assert!(body.into_token().is_none());
    }
}
