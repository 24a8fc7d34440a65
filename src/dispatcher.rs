//! Request dispatch
//!
//! Turns a raw payload into a response envelope. Every failure path ends in an error envelope;
//! nothing escapes to the transport, not even a panicking method.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use serde_json::{Map, Value};
use tracing::{error, info};

use crate::{
    envelope::{Id, Params, Request, Response, Version, JSONRPC_VERSION},
    errors::RpcError,
    logging::redact_params,
    registry::MethodRegistry,
};

/// Sent when a response cannot be encoded, which only happens if a method returns a value
/// `serde_json` refuses to serialize.
const ENCODE_FAILURE_RESPONSE: &[u8] =
    br#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"Internal error"},"id":null}"#;

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<MethodRegistry>,
}

impl Dispatcher {
    pub fn new(registry: MethodRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn methods(&self) -> Vec<&str> {
        self.registry.names()
    }

    /// Handles one complete JSON payload.
    pub fn handle(&self, payload: &[u8]) -> Response {
        match serde_json::from_slice::<Value>(payload) {
            Ok(value) => self.handle_value(value),
            Err(err) => reject(Id::Null, RpcError::Parse(err.to_string())),
        }
    }

    /// Like [`Dispatcher::handle`], but returns the encoded response bytes.
    pub fn handle_bytes(&self, payload: &[u8]) -> Vec<u8> {
        let response = self.handle(payload);
        response.encode().unwrap_or_else(|err| {
            error!(error = %err, "failed to encode response envelope");
            ENCODE_FAILURE_RESPONSE.to_vec()
        })
    }

    pub fn handle_value(&self, payload: Value) -> Response {
        let Value::Object(object) = payload else {
            return reject(
                Id::Null,
                RpcError::Parse("payload is not a JSON object".to_string()),
            );
        };

        match parse_request(object) {
            Ok(request) => self.dispatch(request),
            Err((id, err)) => reject(id, err),
        }
    }

    /// Dispatches an already decoded request.
    ///
    /// Notifications are answered too, with a `null` id; request/response transports have
    /// nowhere else to put the outcome.
    pub fn dispatch(&self, request: Request) -> Response {
        let id = request.id.clone().unwrap_or_default();
        if request.method.trim().is_empty() {
            return reject(id, RpcError::InvalidRequest("method must not be empty"));
        }

        let response = match self.invoke(&request) {
            Ok(result) => Response::success(id, result),
            Err(err) => {
                if let RpcError::Internal(detail) = &err {
                    error!(
                        method = %request.method,
                        error = %detail,
                        "rpc call failed with internal error"
                    );
                }
                Response::error(id, err.to_error_object())
            }
        };

        info!(
            method = %request.method,
            params = %redact_params(request.params.as_ref()),
            notification = request.is_notification(),
            outcome = if response.is_error() { "failure" } else { "success" },
            code = response.error_code(),
            "rpc call audited"
        );

        response
    }

    fn invoke(&self, request: &Request) -> Result<Value, RpcError> {
        let method = self
            .registry
            .lookup(&request.method)
            .ok_or_else(|| RpcError::MethodNotFound(request.method.clone()))?;

        let params = request.params.as_ref();
        match panic::catch_unwind(AssertUnwindSafe(|| method.call(params))) {
            Ok(result) => result.map_err(RpcError::from),
            Err(panic) => Err(RpcError::Internal(format!(
                "method `{}` panicked: {}",
                request.method,
                panic_message(panic.as_ref())
            ))),
        }
    }
}

/// Answers a payload that never became a dispatchable request. Method and params are unknown,
/// so the audit line carries the reason instead.
fn reject(id: Id, err: RpcError) -> Response {
    info!(
        outcome = "rejected",
        code = err.code().code(),
        reason = %err,
        "rpc call audited"
    );
    Response::error(id, err.to_error_object())
}

/// Validates the envelope structure. On failure, returns the id to echo alongside the error.
fn parse_request(mut object: Map<String, Value>) -> Result<Request, (Id, RpcError)> {
    let id = match object.remove("id") {
        None => None,
        Some(value) => Some(Id::from_value(&value).ok_or((
            Id::Null,
            RpcError::InvalidRequest("id must be a number, a string or null"),
        ))?),
    };
    let echoed = id.clone().unwrap_or_default();

    match object.get("jsonrpc") {
        None => {}
        Some(Value::String(tag)) if tag == JSONRPC_VERSION => {}
        Some(_) => {
            return Err((
                echoed,
                RpcError::InvalidRequest("jsonrpc must be \"2.0\""),
            ))
        }
    }

    let method = match object.remove("method") {
        Some(Value::String(method)) if !method.trim().is_empty() => method,
        _ => {
            return Err((
                echoed,
                RpcError::InvalidRequest("method must be a non-empty string"),
            ))
        }
    };

    let params = match object.remove("params") {
        None | Some(Value::Null) => None,
        Some(value) => Some(Params::from_value(value).ok_or((
            echoed,
            RpcError::InvalidRequest("params must be an array or an object"),
        ))?),
    };

    Ok(Request {
        jsonrpc: Version,
        method,
        params,
        id,
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
