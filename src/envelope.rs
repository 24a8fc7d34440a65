//! JSON-RPC 2.0 request and response envelopes
//!
//! Responses always serialize their keys in wire order (`jsonrpc`, `result`/`error`, `id`) and
//! always carry an `id`, which is `null` when the request id could not be determined.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";

/// The fixed `"jsonrpc": "2.0"` protocol tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Version;

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        if tag == JSONRPC_VERSION {
            Ok(Version)
        } else {
            Err(de::Error::invalid_value(
                de::Unexpected::Str(&tag),
                &JSONRPC_VERSION,
            ))
        }
    }
}

/// Correlation id supplied by the client and echoed back in the response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    #[default]
    Null,
    Number(Number),
    String(String),
}

impl Id {
    /// Returns `None` for values that are not a legal id (booleans, arrays, objects).
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Number(number) => Some(Self::Number(number.clone())),
            Value::String(string) => Some(Self::String(string.clone())),
            _ => None,
        }
    }
}

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// Method parameters: either by position or by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params {
    Positional(Vec<Value>),
    Named(Map<String, Value>),
}

impl Params {
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(Self::Positional(items)),
            Value::Object(map) => Some(Self::Named(map)),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Positional(items) => Value::Array(items.clone()),
            Self::Named(map) => Value::Object(map.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: Version,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
    /// `None` marks a notification. `Some(Id::Null)` is an explicit `"id": null`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    pub id: Option<Id>,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Option<Params>, id: impl Into<Id>) -> Self {
        Self {
            jsonrpc: Version,
            method: method.into(),
            params,
            id: Some(id.into()),
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Params>) -> Self {
        Self {
            jsonrpc: Version,
            method: method.into(),
            params,
            id: None,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Payload {
    Result(Value),
    Error(ErrorObject),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawResponse")]
pub struct Response {
    pub jsonrpc: Version,
    #[serde(flatten)]
    pub payload: Payload,
    pub id: Id,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("response carries both `result` and `error`")]
    BothResultAndError,
    #[error("response carries neither `result` nor `error`")]
    MissingPayload,
}

#[derive(Deserialize)]
struct RawResponse {
    jsonrpc: Version,
    #[serde(default, deserialize_with = "deserialize_present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
    #[serde(default)]
    id: Id,
}

impl TryFrom<RawResponse> for Response {
    type Error = EnvelopeError;

    fn try_from(raw: RawResponse) -> Result<Self, Self::Error> {
        let payload = match (raw.result, raw.error) {
            (Some(result), None) => Payload::Result(result),
            (None, Some(error)) => Payload::Error(error),
            (Some(_), Some(_)) => return Err(EnvelopeError::BothResultAndError),
            (None, None) => return Err(EnvelopeError::MissingPayload),
        };

        Ok(Self {
            jsonrpc: raw.jsonrpc,
            payload,
            id: raw.id,
        })
    }
}

impl Response {
    pub fn success(id: Id, result: Value) -> Self {
        Self {
            jsonrpc: Version,
            payload: Payload::Result(result),
            id,
        }
    }

    pub fn error(id: Id, error: ErrorObject) -> Self {
        Self {
            jsonrpc: Version,
            payload: Payload::Error(error),
            id,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, Payload::Error(_))
    }

    pub fn error_code(&self) -> Option<i64> {
        match &self.payload {
            Payload::Error(error) => Some(error.code),
            Payload::Result(_) => None,
        }
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Distinguishes an explicit `null` (`Some(null)`) from an absent key (`None`, via `default`).
fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}
