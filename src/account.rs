use crate::error::{Result, SurveillanceError};
use crate::models::{RegisterRequest, User};
use crate::request::RequestSpec;
use crate::response::ExpectedKind;
use crate::rest::ApiClient;
use serde_json::{json, Map, Value};

/// Account management for the logged-in user
#[derive(Debug, Clone, Copy)]
pub struct AccountApi<'a> {
    client: &'a ApiClient,
}

impl<'a> AccountApi<'a> {
    /// Account operations borrowing `client`
    pub fn new(client: &'a ApiClient) -> Self {
        AccountApi { client }
    }

    /// Profile of the logged-in user
    pub fn profile(&self) -> Result<User> {
        self.client
            .request(RequestSpec::get("/profile", ExpectedKind::JsonObject))?
            .apply()
    }

    /// Update profile fields; keys the server does not know are ignored by it
    pub fn update_profile(&self, changes: &Map<String, Value>) -> Result<User> {
        if changes.is_empty() {
            return Err(SurveillanceError::validation("no profile changes given", None));
        }
        let spec = RequestSpec::put("/profile", ExpectedKind::JsonObject)
            .json(changes)?
            .non_retryable();
        self.client.request(spec)?.apply()
    }

    /// Create an account; the request is checked locally first
    pub fn register(&self, request: &RegisterRequest) -> Result<Map<String, Value>> {
        request.validate()?;
        let spec = RequestSpec::post("/register", ExpectedKind::JsonObject)
            .json(request)?
            .non_retryable();
        let result = self.client.request(spec)?.into_object()?;
        log::info!("registered account {}", request.email);
        Ok(result)
    }

    /// Change the password of the logged-in user
    pub fn change_password(&self, current_password: &str, new_password: &str) -> Result<()> {
        require("new_password", new_password)?;
        self.post_json(
            "/change-password",
            json!({"current_password": current_password, "new_password": new_password}),
        )
    }

    /// Ask the server to mail a reset link
    pub fn forgot_password(&self, email: &str) -> Result<()> {
        require("email", email)?;
        self.post_json("/forgot-password", json!({ "email": email }))?;
        log::info!("password reset requested for {}", email);
        Ok(())
    }

    /// Set a new password with the token from a reset mail
    pub fn reset_password(&self, token: &str, new_password: &str) -> Result<()> {
        require("token", token)?;
        require("new_password", new_password)?;
        self.post_json(
            "/reset-password",
            json!({"token": token, "new_password": new_password}),
        )
    }

    /// Server view of the current session
    pub fn auth_status(&self) -> Result<Map<String, Value>> {
        self.client.get_object("/api/auth/status", &[])
    }

    fn post_json(&self, path: &str, body: Value) -> Result<()> {
        let spec = RequestSpec::post(path, ExpectedKind::JsonObject)
            .json(&body)?
            .non_retryable();
        self.client.request(spec)?;
        Ok(())
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SurveillanceError::validation(
            format!("{} must not be empty", field),
            Some(field),
        ));
    }
    Ok(())
}
