//! Error taxonomy for the protocol core and the code around it
//!
//! `RpcError` is the fixed JSON-RPC error table. Clients pattern-match on these codes, so the
//! values and messages must never change.

use thiserror::Error;

use crate::envelope::ErrorObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
}

impl ErrorCode {
    pub const fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
        }
    }

    pub const fn message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
        }
    }
}

/// Failure conditions detected while handling a single request.
///
/// The `String` payloads are diagnostic detail for the logs; they never reach the wire.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RpcError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Parse(_) => ErrorCode::ParseError,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::MethodNotFound(_) => ErrorCode::MethodNotFound,
            Self::InvalidParams(_) => ErrorCode::InvalidParams,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub fn to_error_object(&self) -> ErrorObject {
        let code = self.code();
        ErrorObject::new(code.code(), code.message())
    }
}

/// Typed failure returned by a registered method.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MethodError {
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl MethodError {
    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::InvalidParams(detail.into())
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }
}

impl From<MethodError> for RpcError {
    fn from(err: MethodError) -> Self {
        match err {
            MethodError::InvalidParams(detail) => Self::InvalidParams(detail),
            MethodError::Internal(detail) => Self::Internal(detail),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("method `{0}` is already registered")]
    DuplicateMethod(String),
    #[error("method name must not be empty")]
    EmptyName,
}
