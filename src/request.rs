use crate::response::ExpectedKind;
use indexmap::IndexMap;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Request body
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    /// `application/x-www-form-urlencoded` pairs
    Form(Vec<(String, String)>),
}

/// One logical API call: what to send and what to expect back.
///
/// Requests are retryable unless marked otherwise. Mark calls that must not
/// be repeated with [`RequestSpec::non_retryable`]; the verb alone is not used
/// to decide, since some POST endpoints are idempotent upserts.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub query: IndexMap<String, String>,
    pub body: Option<RequestBody>,
    pub expected: ExpectedKind,
    pub retryable: bool,
}

impl RequestSpec {
    /// Retryable request with no query and no body
    pub fn new(method: Method, path: impl Into<String>, expected: ExpectedKind) -> Self {
        RequestSpec {
            method,
            path: path.into(),
            query: IndexMap::new(),
            body: None,
            expected,
            retryable: true,
        }
    }

    /// GET request
    pub fn get(path: impl Into<String>, expected: ExpectedKind) -> Self {
        RequestSpec::new(Method::GET, path, expected)
    }

    /// POST request
    pub fn post(path: impl Into<String>, expected: ExpectedKind) -> Self {
        RequestSpec::new(Method::POST, path, expected)
    }

    /// PUT request
    pub fn put(path: impl Into<String>, expected: ExpectedKind) -> Self {
        RequestSpec::new(Method::PUT, path, expected)
    }

    /// Add a query parameter; a repeated key replaces the earlier value
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.insert(key.to_string(), value.to_string());
        self
    }

    /// Add a query parameter only when a value is given
    pub fn query_opt<V: ToString>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.query(key, v),
            None => self,
        }
    }

    /// Set a JSON body
    pub fn json<B: Serialize>(mut self, body: &B) -> crate::Result<Self> {
        self.body = Some(RequestBody::Json(serde_json::to_value(body)?));
        Ok(self)
    }

    /// Set a form body
    pub fn form(mut self, pairs: &[(&str, &str)]) -> Self {
        self.body = Some(RequestBody::Form(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ));
        self
    }

    /// Never retry this request
    pub fn non_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }
}

/// Fully resolved HTTP request handed to a [`crate::transport::Transport`]
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub timeout: Duration,
}

impl HttpRequest {
    /// First header named `name`, ignoring case
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_keys_are_unique_and_ordered() {
        let spec = RequestSpec::get("/api/data", ExpectedKind::table())
            .query("region", "Centre")
            .query_opt("district", None::<&str>)
            .query("limit", 10)
            .query("region", "Nord");
        let pairs: Vec<(&str, &str)> = spec
            .query
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(pairs, vec![("region", "Nord"), ("limit", "10")]);
        assert!(spec.retryable);
    }

    #[test]
    fn test_bodies() {
        let spec = RequestSpec::post("/login", ExpectedKind::JsonObject)
            .form(&[("email", "a@b.c"), ("password", "pw")])
            .non_retryable();
        assert!(!spec.retryable);
        assert_eq!(
            spec.body,
            Some(RequestBody::Form(vec![
                ("email".to_string(), "a@b.c".to_string()),
                ("password".to_string(), "pw".to_string()),
            ]))
        );

        let spec = RequestSpec::post("/api/alerts/config/seuils", ExpectedKind::JsonObject)
            .json(&serde_json::json!({"seuil_deces": 5}))
            .unwrap();
        assert!(matches!(spec.body, Some(RequestBody::Json(_))));
    }
}
