//! Log setup, HTTP request summaries and audit-log redaction

use std::time::Instant;

use axum::{extract::Request, http::{header, StatusCode}, middleware::Next, response::Response};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::envelope::Params;

/// Installs the global subscriber. `RUST_LOG` overrides the default `info` filter.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// Logs one summary line per HTTP request.
///
/// A `413` is produced by the body limit layer before the body reaches the dispatcher, so no
/// audit line exists for it; the extra warning is the only trace such a request leaves.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let declared_bytes = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    let started_at = Instant::now();

    let response = next.run(request).await;
    let status = response.status();

    info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = started_at.elapsed().as_millis(),
        "request summary"
    );

    if status == StatusCode::PAYLOAD_TOO_LARGE {
        warn!(
            path = %path,
            declared_bytes,
            "rpc payload refused before dispatch: body over size limit"
        );
    }

    response
}

/// Copy of `params` that is safe to put in the audit log.
pub fn redact_params(params: Option<&Params>) -> Value {
    params
        .map(|params| redact_value(&params.to_value()))
        .unwrap_or(Value::Null)
}

pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_value(item))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        _ => value.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "authorization" | "bearer" | "api_key" | "apikey"
    ) || ["token", "secret", "password", "credential"]
        .iter()
        .any(|marker| normalized.contains(marker))
}

/// In-memory log sink for tests, formatted like the real subscriber but without colours.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct LogCapture(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

#[cfg(test)]
impl LogCapture {
    /// Returns the sink and a dispatcher writing `info` and above into it.
    pub(crate) fn start() -> (Self, tracing::Dispatch) {
        let capture = Self::default();
        let writer = capture.clone();
        let subscriber = fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        (capture, tracing::Dispatch::new(subscriber))
    }

    pub(crate) fn contents(&self) -> String {
        let bytes = self.0.lock().expect("log buffer").clone();
        String::from_utf8(bytes).expect("utf8 logs")
    }
}

#[cfg(test)]
impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("log buffer").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Runs `run` on this thread with a [`LogCapture`] installed and returns its output together
/// with what was logged.
#[cfg(test)]
pub(crate) fn capture_logs<T>(run: impl FnOnce() -> T) -> (T, String) {
    let (capture, dispatch) = LogCapture::start();
    let output = tracing::dispatcher::with_default(&dispatch, run);
    (output, capture.contents())
}
