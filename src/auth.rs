use crate::error::{Result, SurveillanceError};
use crate::models::User;
use crate::request::RequestSpec;
use crate::response::ExpectedKind;
use crate::rest::ApiClient;
use crate::token::{AuthToken, LoginResponse};
use std::sync::{Mutex, MutexGuard};

/// Where a client stands with the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    /// A login request is in flight
    Authenticating,
    Authenticated,
}

#[derive(Debug)]
struct AuthInner {
    state: AuthState,
    token: Option<AuthToken>,
    user: Option<User>,
}

impl AuthInner {
    fn reset(&mut self) -> Option<AuthToken> {
        self.state = AuthState::Unauthenticated;
        self.user = None;
        self.token.take()
    }
}

/// Token holder shared by every request of a client.
///
/// State, token and user change together under one lock, so a reader sees
/// either the old triple or the new one. `Unauthenticated` never holds a
/// token and `Authenticated` always does.
#[derive(Debug)]
pub(crate) struct AuthSlot {
    inner: Mutex<AuthInner>,
}

impl AuthSlot {
    pub(crate) fn new(token: Option<AuthToken>) -> Self {
        let state = if token.is_some() {
            AuthState::Authenticated
        } else {
            AuthState::Unauthenticated
        };
        AuthSlot {
            inner: Mutex::new(AuthInner {
                state,
                token,
                user: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AuthInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn state(&self) -> AuthState {
        self.lock().state
    }

    pub(crate) fn token(&self) -> Option<AuthToken> {
        self.lock().token.clone()
    }

    fn user(&self) -> Option<User> {
        self.lock().user.clone()
    }

    /// Token to attach to a request. An expired token is dropped here.
    pub(crate) fn bearer(&self) -> Option<AuthToken> {
        let mut inner = self.lock();
        if inner.token.as_ref().map_or(false, AuthToken::is_expired) {
            log::debug!("[dengsurv] session token expired, dropping it");
            inner.reset();
        }
        inner.token.clone()
    }

    /// Mark a login as in flight. A held token stays in use until the
    /// login settles.
    fn begin(&self) {
        self.lock().state = AuthState::Authenticating;
    }

    /// Settle a login that failed without the server rejecting the
    /// credentials; the previous session, if any, carries on.
    fn abort(&self) {
        let mut inner = self.lock();
        if inner.state == AuthState::Authenticating {
            inner.state = if inner.token.is_some() {
                AuthState::Authenticated
            } else {
                AuthState::Unauthenticated
            };
        }
    }

    fn set(&self, token: AuthToken, user: Option<User>) {
        let mut inner = self.lock();
        inner.token = Some(token);
        inner.user = user;
        inner.state = AuthState::Authenticated;
    }

    /// Swap the token of an authenticated session, checked and written
    /// under one lock
    fn replace_if_authenticated(&self, token: AuthToken) -> bool {
        let mut inner = self.lock();
        if inner.state != AuthState::Authenticated || inner.token.is_none() {
            return false;
        }
        inner.token = Some(token);
        true
    }

    fn clear(&self) -> Option<AuthToken> {
        self.lock().reset()
    }

    /// Drop the token after the server rejected it, unless it was replaced meanwhile
    pub(crate) fn invalidate_if_current(&self, access_token: &str) {
        let mut inner = self.lock();
        if inner
            .token
            .as_ref()
            .map_or(false, |t| t.access_token == access_token)
        {
            log::warn!("[dengsurv] session token rejected by server, clearing it");
            inner.reset();
        }
    }

    #[cfg(test)]
    fn snapshot(&self) -> (AuthState, Option<AuthToken>) {
        let inner = self.lock();
        (inner.state, inner.token.clone())
    }
}

impl ApiClient {
    /// Log in with email and password.
    ///
    /// On success the token is kept and attached to every later request. If
    /// the server rejects the credentials the client ends up unauthenticated
    /// and an [`SurveillanceError::Authentication`] error is returned; this is
    /// never retried. Any other failure leaves an existing session as it was.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<AuthToken> {
        if email.trim().is_empty() {
            return Err(SurveillanceError::validation("email must not be empty", Some("email")));
        }
        if password.is_empty() {
            return Err(SurveillanceError::validation(
                "password must not be empty",
                Some("password"),
            ));
        }

        self.auth.begin();
        let spec = RequestSpec::post("/login", ExpectedKind::JsonObject)
            .form(&[("email", email), ("password", password)]);

        let login = self
            .request(spec)
            .and_then(|payload| payload.apply::<LoginResponse>());
        let mut login = match login {
            Ok(login) => login,
            Err(err) => {
                if err.is_authentication() {
                    self.auth.clear();
                } else {
                    self.auth.abort();
                }
                log::warn!("[dengsurv] login failed for {}: {}", email, err);
                return Err(err);
            }
        };

        let user = login.user.take();
        match login.into_token() {
            Some(token) => {
                self.auth.set(token.clone(), user);
                log::info!("[dengsurv] authenticated as {}", email);
                Ok(token)
            }
            None => {
                self.auth.clear();
                Err(SurveillanceError::Authentication {
                    message: "login response carried no access token".to_string(),
                    status: None,
                })
            }
        }
    }

    /// Use an existing bearer token without a login round trip
    pub fn authenticate_with_token(&self, token: AuthToken) {
        self.auth.set(token, None);
    }

    /// Swap the session token for a fresh one.
    ///
    /// Only valid while authenticated.
    pub fn replace_token(&self, token: AuthToken) -> Result<()> {
        if self.auth.replace_if_authenticated(token) {
            Ok(())
        } else {
            Err(SurveillanceError::Authentication {
                message: "no authenticated session to refresh".to_string(),
                status: None,
            })
        }
    }

    /// End the session.
    ///
    /// The server is told with a best-effort `POST /logout`; whatever it
    /// answers, the local token is cleared. Logging out twice is fine.
    pub fn logout(&self) -> Result<()> {
        if self.auth.token().is_none() {
            self.auth.clear();
            return Ok(());
        }

        let spec = RequestSpec::post("/logout", ExpectedKind::JsonObject).non_retryable();
        if let Err(err) = self.execute(&spec) {
            log::warn!("[dengsurv] logout request failed, clearing session anyway: {}", err);
        }
        self.auth.clear();
        log::info!("[dengsurv] logged out");
        Ok(())
    }

    /// Current authentication state
    pub fn auth_state(&self) -> AuthState {
        self.auth.state()
    }

    /// Whether a usable (present, unexpired) token is held
    pub fn is_authenticated(&self) -> bool {
        self.auth.bearer().is_some()
    }

    /// Token held by the session, expired or not
    pub fn current_token(&self) -> Option<AuthToken> {
        self.auth.token()
    }

    /// Account returned by the last successful login, if the server sent one
    pub fn current_user(&self) -> Option<User> {
        self.auth.user()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use crate::request::RequestBody;
    use crate::response::ResponseEnvelope;
    use crate::transport::MockTransport;
    use std::time::Duration;

    fn config() -> ClientConfig {
        ClientConfig::new("https://api.example.com")
            .unwrap()
            .with_backoff_base(Duration::from_millis(1))
    }

    #[test]
    fn test_login_sends_form_and_stores_token() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| {
                req.url.path() == "/login"
                    && req.header("Authorization").is_none()
                    && req.body
                        == Some(RequestBody::Form(vec![
                            ("email".to_string(), "agent@sante.bf".to_string()),
                            ("password".to_string(), "pw".to_string()),
                        ]))
            })
            .times(1)
            .returning(|_| {
                Ok(ResponseEnvelope::new(
                    200,
                    r#"{"access_token": "jwt-1", "token_type": "bearer", "expires_in": 3600}"#,
                ))
            });
        let client = ApiClient::with_transport(config(), Box::new(transport)).unwrap();

        let token = client.authenticate("agent@sante.bf", "pw").unwrap();
        assert_eq!(token.access_token, "jwt-1");
        assert_eq!(client.auth_state(), AuthState::Authenticated);
        assert!(client.is_authenticated());
    }

    #[test]
    fn test_login_rejected() {
        let mut transport = MockTransport::new();
        transport.expect_send().times(1).returning(|_| {
            Ok(ResponseEnvelope::new(401, r#"{"detail": "Incorrect email or password"}"#))
        });
        let client = ApiClient::with_transport(config(), Box::new(transport)).unwrap();
        client.authenticate_with_token(AuthToken::new("old"));

        let err = client.authenticate("agent@sante.bf", "wrong").unwrap_err();
        assert!(err.is_authentication());
        assert_eq!(client.auth_state(), AuthState::Unauthenticated);
        assert!(client.current_token().is_none());
    }

    #[test]
    fn test_login_without_token_in_body() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .returning(|_| Ok(ResponseEnvelope::new(200, r#"{"message": "ok"}"#)));
        let client = ApiClient::with_transport(config(), Box::new(transport)).unwrap();
        assert!(client.authenticate("a@b.bf", "pw").unwrap_err().is_authentication());
        assert_eq!(client.auth_state(), AuthState::Unauthenticated);
    }

    #[test]
    fn test_login_validates_input() {
        let client = ApiClient::with_transport(config(), Box::new(MockTransport::new())).unwrap();
        assert!(matches!(
            client.authenticate(" ", "pw"),
            Err(SurveillanceError::Validation { .. })
        ));
        assert!(matches!(
            client.authenticate("a@b.bf", ""),
            Err(SurveillanceError::Validation { .. })
        ));
    }

    #[test]
    fn test_token_attached_and_invalidated_on_401() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| req.header("Authorization") == Some("Bearer jwt-1"))
            .times(1)
            .returning(|_| Ok(ResponseEnvelope::new(401, r#"{"detail": "Token expired"}"#)));
        let client = ApiClient::with_transport(config(), Box::new(transport)).unwrap();
        client.authenticate_with_token(AuthToken::new("jwt-1"));

        let err = client.get_object("/profile", &[]).unwrap_err();
        assert!(err.is_authentication());
        assert!(!client.is_authenticated());
        assert_eq!(client.auth_state(), AuthState::Unauthenticated);
    }

    #[test]
    fn test_expired_token_falls_back_to_api_key() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| req.header("Authorization") == Some("Bearer api-key"))
            .times(1)
            .returning(|_| Ok(ResponseEnvelope::new(200, "{}")));
        let client =
            ApiClient::with_transport(config().with_api_key("api-key"), Box::new(transport)).unwrap();
        client.authenticate_with_token(AuthToken::new("stale").expiring_in(-5));

        client.get_object("/api/stats", &[]).unwrap();
        assert!(client.current_token().is_none());
    }

    #[test]
    fn test_replace_token_requires_session() {
        let client = ApiClient::with_transport(config(), Box::new(MockTransport::new())).unwrap();
        assert!(client.replace_token(AuthToken::new("x")).is_err());

        client.authenticate_with_token(AuthToken::new("a"));
        client.replace_token(AuthToken::new("b")).unwrap();
        assert_eq!(client.current_token().unwrap().access_token, "b");
    }

    #[test]
    fn test_logout_twice() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| req.url.path() == "/logout")
            .times(1)
            .returning(|_| Ok(ResponseEnvelope::new(200, "{}")));
        let client = ApiClient::with_transport(config(), Box::new(transport)).unwrap();
        client.authenticate_with_token(AuthToken::new("jwt"));

        client.logout().unwrap();
        client.logout().unwrap();
        assert_eq!(client.auth_state(), AuthState::Unauthenticated);
    }

    #[test]
    fn test_logout_ignores_server_failure() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_| Ok(ResponseEnvelope::new(500, "boom")));
        let client = ApiClient::with_transport(config(), Box::new(transport)).unwrap();
        client.authenticate_with_token(AuthToken::new("jwt"));

        client.logout().unwrap();
        assert!(client.current_token().is_none());
    }

    #[test]
    fn test_transient_login_failure_keeps_session() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| req.url.path() == "/login")
            .times(1)
            .returning(|req| {
                Err(SurveillanceError::Connection {
                    message: "connection refused".to_string(),
                    url: req.url.to_string(),
                })
            });
        let client =
            ApiClient::with_transport(config().with_retry_count(0), Box::new(transport)).unwrap();
        client.authenticate_with_token(AuthToken::new("valid-session"));

        let err = client.authenticate("agent@sante.bf", "pw").unwrap_err();
        assert!(matches!(err.root(), SurveillanceError::Connection { .. }));
        assert_eq!(client.auth_state(), AuthState::Authenticated);
        assert_eq!(client.current_token().unwrap().access_token, "valid-session");
    }

    #[test]
    fn test_transient_first_login_stays_unauthenticated() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_| Ok(ResponseEnvelope::new(503, "")));
        let client =
            ApiClient::with_transport(config().with_retry_count(0), Box::new(transport)).unwrap();

        assert!(client.authenticate("agent@sante.bf", "pw").is_err());
        assert_eq!(client.auth.snapshot(), (AuthState::Unauthenticated, None));
    }

    #[test]
    fn test_login_keeps_user() {
        let mut transport = MockTransport::new();
        transport.expect_send().times(2).returning(|req| {
            let body = match req.url.path() {
                "/login" => {
                    r#"{"access_token": "jwt-1", "user": {"id": 3, "username": "awa", "email": "awa@sante.bf"}}"#
                }
                _ => "{}",
            };
            Ok(ResponseEnvelope::new(200, body))
        });
        let client = ApiClient::with_transport(config(), Box::new(transport)).unwrap();

        client.authenticate("awa@sante.bf", "pw").unwrap();
        let user = client.current_user().unwrap();
        assert_eq!(user.id, 3);
        assert_eq!(user.email, "awa@sante.bf");

        client.logout().unwrap();
        assert!(client.current_user().is_none());
    }

    #[test]
    fn test_replace_token_after_logout_is_rejected() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_| Ok(ResponseEnvelope::new(200, "{}")));
        let client = ApiClient::with_transport(config(), Box::new(transport)).unwrap();
        client.authenticate_with_token(AuthToken::new("a"));
        client.logout().unwrap();

        assert!(client.replace_token(AuthToken::new("b")).is_err());
        assert_eq!(client.auth.snapshot(), (AuthState::Unauthenticated, None));
    }

    #[test]
    fn test_slot_replace_only_when_authenticated() {
        let slot = AuthSlot::new(None);
        assert!(!slot.replace_if_authenticated(AuthToken::new("x")));
        assert_eq!(slot.snapshot(), (AuthState::Unauthenticated, None));

        slot.set(AuthToken::new("a"), None);
        slot.begin();
        assert_eq!(slot.snapshot().1.unwrap().access_token, "a");
        assert!(!slot.replace_if_authenticated(AuthToken::new("x")));

        slot.abort();
        assert!(slot.replace_if_authenticated(AuthToken::new("b")));
        assert_eq!(
            slot.snapshot(),
            (AuthState::Authenticated, Some(AuthToken::new("b")))
        );
    }

    #[test]
    fn test_token_refreshed_between_attempts_is_used() {
        use std::sync::{Arc, Mutex, OnceLock, Weak};

        let shared: Arc<OnceLock<Weak<ApiClient>>> = Arc::new(OnceLock::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (slot, record) = (shared.clone(), seen.clone());

        let mut transport = MockTransport::new();
        transport.expect_send().times(2).returning(move |req| {
            let mut headers = record.lock().unwrap();
            headers.push(req.header("Authorization").unwrap_or_default().to_string());
            if headers.len() == 1 {
                let client = slot.get().and_then(Weak::upgrade).unwrap();
                client.replace_token(AuthToken::new("fresh")).unwrap();
                Err(SurveillanceError::Connection {
                    message: "connection reset".to_string(),
                    url: req.url.to_string(),
                })
            } else {
                Ok(ResponseEnvelope::new(200, "{}"))
            }
        });
        let client = Arc::new(ApiClient::with_transport(config(), Box::new(transport)).unwrap());
        shared.set(Arc::downgrade(&client)).unwrap();
        client.authenticate_with_token(AuthToken::new("stale"));

        client.get_object("/api/stats", &[]).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["Bearer stale", "Bearer fresh"]);
    }

    #[test]
    fn test_concurrent_sessions_stay_consistent() {
        let mut transport = MockTransport::new();
        transport.expect_send().returning(|req| {
            let body = match req.url.path() {
                "/login" => r#"{"access_token": "jwt-new", "expires_in": 3600}"#,
                _ => "{}",
            };
            Ok(ResponseEnvelope::new(200, body))
        });
        let client = ApiClient::with_transport(config(), Box::new(transport)).unwrap();
        client.authenticate_with_token(AuthToken::new("jwt-old"));

        let consistent = |(state, token): (AuthState, Option<AuthToken>)| match state {
            AuthState::Unauthenticated => token.is_none(),
            AuthState::Authenticated => token.is_some(),
            AuthState::Authenticating => true,
        };

        std::thread::scope(|s| {
            for i in 0..4 {
                let client = &client;
                s.spawn(move || {
                    for _ in 0..50 {
                        if i % 2 == 0 {
                            client.authenticate("agent@sante.bf", "pw").unwrap();
                        } else {
                            client.logout().unwrap();
                        }
                        let _ = client.replace_token(AuthToken::new("jwt-refreshed"));
                        assert!(consistent(client.auth.snapshot()));
                    }
                });
            }
            for _ in 0..2 {
                let client = &client;
                s.spawn(move || {
                    for _ in 0..100 {
                        client.get_object("/api/stats", &[]).unwrap();
                        assert!(consistent(client.auth.snapshot()));
                    }
                });
            }
        });

        let (state, token) = client.auth.snapshot();
        assert_ne!(state, AuthState::Authenticating);
        assert!(consistent((state, token)));
    }
}
