//! Transport adapters
//!
//! Adapters only move bytes: they read one complete payload, hand it to the
//! [`Dispatcher`](crate::dispatcher::Dispatcher) and write back whatever it returns. A bad
//! payload ends that exchange with an error envelope; it never takes the listener down.

pub mod blocking;
pub mod http;
pub mod stream;

use tracing::warn;

/// Answer to a payload larger than the configured limit. The payload is never decoded, so the
/// id is unknown.
pub const OVERSIZED_PAYLOAD_RESPONSE: &[u8] =
    br#"{"jsonrpc":"2.0","error":{"code":-32600,"message":"Invalid Request"},"id":null}"#;

pub(crate) fn oversized_payload(size: usize, limit: usize) -> &'static [u8] {
    warn!(size, limit, "request payload over size limit");
    OVERSIZED_PAYLOAD_RESPONSE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        envelope::{Id, Response},
        errors::RpcError,
    };

    #[test]
    fn oversized_response_is_invalid_request_envelope() {
        let expected = Response::error(
            Id::Null,
            RpcError::InvalidRequest("payload too large").to_error_object(),
        );
        assert_eq!(
            Response::decode(OVERSIZED_PAYLOAD_RESPONSE).expect("valid envelope"),
            expected
        );
    }
}
