use crate::error::{Result, SurveillanceError};
use crate::table::{ColumnDecl, Table};
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Keys a server-side error body may carry besides `detail`
const ERROR_ENVELOPE_KEYS: &[&str] = &["detail", "status_code", "code", "retry_after", "type"];

/// Raw HTTP response, consumed by [`normalize`]
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ResponseEnvelope {
    /// Envelope without headers
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        ResponseEnvelope {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Check for a 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as JSON, if it is JSON
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    fn retry_after(&self) -> Option<u64> {
        self.headers
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }
}

/// Response shape an endpoint declares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedKind {
    /// A JSON object
    JsonObject,
    /// A JSON array, bare or wrapped in `key`
    JsonList { key: &'static str },
    /// A list of records normalized into a [`Table`]
    Table {
        key: &'static str,
        schema: &'static [ColumnDecl],
    },
    /// Opaque bytes (file exports)
    Raw,
}

impl ExpectedKind {
    /// List wrapped in the usual `data` key
    pub const fn list() -> Self {
        ExpectedKind::JsonList { key: "data" }
    }

    /// Table with inferred columns, wrapped in the usual `data` key
    pub const fn table() -> Self {
        ExpectedKind::Table {
            key: "data",
            schema: &[],
        }
    }

    /// Table wrapped in `data` with declared columns
    pub const fn table_with_schema(schema: &'static [ColumnDecl]) -> Self {
        ExpectedKind::Table { key: "data", schema }
    }
}

/// Normalized response body
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Object(Map<String, Value>),
    List(Vec<Value>),
    Table(Table),
    Raw(Vec<u8>),
}

impl Payload {
    /// Object payload, or a validation error
    pub fn into_object(self) -> Result<Map<String, Value>> {
        match self {
            Payload::Object(map) => Ok(map),
            other => Err(unexpected("object", &other)),
        }
    }

    /// List payload, or a validation error
    pub fn into_list(self) -> Result<Vec<Value>> {
        match self {
            Payload::List(list) => Ok(list),
            other => Err(unexpected("list", &other)),
        }
    }

    /// Table payload, or a validation error
    pub fn into_table(self) -> Result<Table> {
        match self {
            Payload::Table(table) => Ok(table),
            other => Err(unexpected("table", &other)),
        }
    }

    /// Raw payload, or a validation error
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Payload::Raw(bytes) => Ok(bytes),
            other => Err(unexpected("raw bytes", &other)),
        }
    }

    /// Deserialize an object payload into `T`
    pub fn apply<T: DeserializeOwned>(self) -> Result<T> {
        let object = self.into_object()?;
        serde_json::from_value(Value::Object(object)).map_err(|e| {
            SurveillanceError::validation(format!("unexpected response shape: {}", e), None)
        })
    }
}

fn unexpected(wanted: &str, got: &Payload) -> SurveillanceError {
    let got = match got {
        Payload::Object(_) => "object",
        Payload::List(_) => "list",
        Payload::Table(_) => "table",
        Payload::Raw(_) => "raw bytes",
    };
    SurveillanceError::validation(format!("expected {} payload, got {}", wanted, got), None)
}

/// Turn a non-2xx envelope into its typed error
pub fn error_for_status(envelope: ResponseEnvelope, endpoint: &str) -> Result<ResponseEnvelope> {
    if envelope.is_success() {
        return Ok(envelope);
    }

    let body = envelope.json().unwrap_or_else(|| {
        let text = String::from_utf8_lossy(&envelope.body).trim().to_string();
        if text.is_empty() {
            Value::Null
        } else {
            serde_json::json!({ "detail": text })
        }
    });
    let mut err = SurveillanceError::from_status(envelope.status, endpoint, Some(&body));
    if let SurveillanceError::RateLimit { retry_after, .. } = &mut err {
        if retry_after.is_none() {
            *retry_after = envelope.retry_after();
        }
    }
    Err(err)
}

/// Parse a successful envelope as the expected kind.
///
/// A 2xx body that is nothing but a `{"detail": ...}` error envelope is
/// raised as the error it describes.
pub fn normalize(envelope: &ResponseEnvelope, kind: ExpectedKind, endpoint: &str) -> Result<Payload> {
    if envelope.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(empty_payload(kind));
    }

    if kind == ExpectedKind::Raw {
        if let Some(Value::Object(map)) = envelope.json() {
            check_error_envelope(&map, envelope.status, endpoint)?;
        }
        return Ok(Payload::Raw(envelope.body.clone()));
    }

    let value: Value = serde_json::from_slice(&envelope.body).map_err(|e| {
        SurveillanceError::validation(format!("response from {} is not valid JSON: {}", endpoint, e), None)
    })?;
    if let Value::Object(map) = &value {
        check_error_envelope(map, envelope.status, endpoint)?;
    }

    match kind {
        ExpectedKind::JsonObject => match value {
            Value::Object(map) => Ok(Payload::Object(map)),
            other => Err(shape_error(endpoint, "an object", &other)),
        },
        ExpectedKind::JsonList { key } => unwrap_list(value, key, endpoint).map(Payload::List),
        ExpectedKind::Table { key, schema } => {
            let records = unwrap_list(value, key, endpoint)?;
            Ok(Payload::Table(Table::from_records(&records, schema)))
        }
        ExpectedKind::Raw => Ok(Payload::Raw(envelope.body.clone())),
    }
}

fn empty_payload(kind: ExpectedKind) -> Payload {
    match kind {
        ExpectedKind::JsonObject => Payload::Object(Map::new()),
        ExpectedKind::JsonList { .. } => Payload::List(Vec::new()),
        ExpectedKind::Table { schema, .. } => Payload::Table(Table::empty(schema)),
        ExpectedKind::Raw => Payload::Raw(Vec::new()),
    }
}

fn unwrap_list(value: Value, key: &str, endpoint: &str) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Array(items)) => Ok(items),
            Some(Value::Null) | None if map.is_empty() => Ok(Vec::new()),
            Some(other) => Err(shape_error(endpoint, &format!("a list under {:?}", key), &other)),
            None => Err(SurveillanceError::validation(
                format!("response from {} has no {:?} list", endpoint, key),
                Some(key),
            )),
        },
        other => Err(shape_error(endpoint, "a list", &other)),
    }
}

fn shape_error(endpoint: &str, wanted: &str, got: &Value) -> SurveillanceError {
    let mut preview = got.to_string();
    if preview.len() > 80 {
        let cut = (0..=80).rev().find(|i| preview.is_char_boundary(*i)).unwrap_or(0);
        preview.truncate(cut);
        preview.push_str("...");
    }
    SurveillanceError::validation(
        format!("expected {} from {}, got {}", wanted, endpoint, preview),
        None,
    )
}

fn check_error_envelope(map: &Map<String, Value>, status: u16, endpoint: &str) -> Result<()> {
    let is_envelope = map.contains_key("detail")
        && map.keys().all(|k| ERROR_ENVELOPE_KEYS.contains(&k.as_str()));
    if !is_envelope {
        return Ok(());
    }

    let embedded = map
        .get("status_code")
        .or_else(|| map.get("code"))
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok())
        .filter(|c| *c >= 400);
    let body = Value::Object(map.clone());
    Err(SurveillanceError::from_status(
        embedded.unwrap_or(status),
        endpoint,
        Some(&body),
    ))
}
