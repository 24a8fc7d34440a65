//! Axum handlers for the HTTP transport
//!
//! `POST /rpc` carries one JSON-RPC envelope per request body. The response body is the encoded
//! envelope exactly as the dispatcher produced it, so key order on the wire is preserved.

use axum::{
    body::Bytes,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::AppState;

pub const RPC_ENDPOINT: &str = "/rpc";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub rpc_endpoint: &'static str,
    pub methods: Vec<String>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn discovery(State(state): State<AppState>) -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        rpc_endpoint: RPC_ENDPOINT,
        methods: state
            .dispatcher
            .methods()
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}

pub async fn rpc_endpoint(State(state): State<AppState>, body: Bytes) -> Response {
    let encoded = state.dispatcher.handle_bytes(&body);
    ([(header::CONTENT_TYPE, "application/json")], encoded).into_response()
}
