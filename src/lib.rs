use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};

pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod errors;
pub mod logging;
pub mod methods;
pub mod registry;
pub mod server;
pub mod transport;

use dispatcher::Dispatcher;
use transport::http;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub max_request_bytes: usize,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, max_request_bytes: usize) -> Self {
        Self {
            dispatcher,
            max_request_bytes,
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route(http::RPC_ENDPOINT, post(http::rpc_endpoint))
        .route("/health", get(http::health))
        .route("/.well-known/jsonrpc", get(http::discovery))
        .layer(DefaultBodyLimit::max(state.max_request_bytes))
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use tracing::instrument::WithSubscriber;

    use crate::{
        envelope::Params,
        errors::MethodError,
        logging::LogCapture,
        methods::builtin_registry,
    };

    use super::*;

    fn app() -> Router {
        app_with_limit(64 * 1024)
    }

    fn app_with_limit(max_request_bytes: usize) -> Router {
        let mut registry = builtin_registry().expect("builtins");
        registry
            .register(
                "fail",
                |_: Option<&Params>| -> Result<serde_json::Value, MethodError> {
                    Err(MethodError::internal("upstream timed out"))
                },
            )
            .expect("register fail");
        build_app(AppState::new(Dispatcher::new(registry), max_request_bytes))
    }

    fn rpc_request(body: &'static str) -> Request<Body> {
        Request::builder()
            .uri("/rpc")
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .expect("request build")
    }

    async fn body_string(response: axum::response::Response) -> String {
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        String::from_utf8(body.to_vec()).expect("utf8 body")
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "{\"status\":\"ok\"}");
    }

    #[tokio::test]
    async fn discovery_lists_registered_methods() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/.well-known/jsonrpc")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body_json: serde_json::Value =
            serde_json::from_str(&body_string(response).await).expect("valid json response");
        assert_eq!(body_json["rpc_endpoint"], "/rpc");
        assert_eq!(body_json["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(body_json["methods"], serde_json::json!(["fail", "sum"]));
    }

    #[tokio::test]
    async fn rpc_sum_returns_result() {
        let response = app()
            .oneshot(rpc_request(
                r#"{"jsonrpc":"2.0","method":"sum","params":[1,2,3],"id":1}"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .expect("content type"),
            "application/json"
        );
        assert_eq!(
            body_string(response).await,
            r#"{"jsonrpc":"2.0","result":6,"id":1}"#
        );
    }

    #[tokio::test]
    async fn rpc_unknown_method_returns_method_not_found() {
        let response = app()
            .oneshot(rpc_request(r#"{"jsonrpc":"2.0","method":"frobnicate","id":2}"#))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_string(response).await,
            r#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"Method not found"},"id":2}"#
        );
    }

    #[tokio::test]
    async fn rpc_malformed_body_returns_parse_error() {
        let response = app()
            .oneshot(rpc_request(r#"{"jsonrpc":"2.0","method":"#))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_string(response).await,
            r#"{"jsonrpc":"2.0","error":{"code":-32700,"message":"Parse error"},"id":null}"#
        );
    }

    #[tokio::test]
    async fn rpc_batch_is_not_supported() {
        let response = app()
            .oneshot(rpc_request(
                r#"[{"jsonrpc":"2.0","method":"sum","params":[1],"id":1}]"#,
            ))
            .await
            .expect("request execution");

        let body = body_string(response).await;
        assert!(body.contains("-32700"), "{body}");
    }

    #[tokio::test]
    async fn rpc_internal_failure_is_generic() {
        let response = app()
            .oneshot(rpc_request(r#"{"jsonrpc":"2.0","method":"fail","id":"f"}"#))
            .await
            .expect("request execution");

        let body = body_string(response).await;
        assert_eq!(
            body,
            r#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"Internal error"},"id":"f"}"#
        );
        assert!(!body.contains("upstream"));
    }

    #[tokio::test]
    async fn rpc_body_over_limit_is_rejected() {
        let response = app_with_limit(16)
            .oneshot(rpc_request(
                r#"{"jsonrpc":"2.0","method":"sum","params":[1,2,3],"id":1}"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn rpc_body_over_limit_leaves_a_warning() {
        let (capture, dispatch) = LogCapture::start();
        let response = app_with_limit(16)
            .oneshot(rpc_request(
                r#"{"jsonrpc":"2.0","method":"sum","params":[1,2,3],"id":1}"#,
            ))
            .with_subscriber(dispatch)
            .await
            .expect("request execution");
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let logs = capture.contents();
        assert!(logs.contains("status=413"), "{logs}");
        assert!(logs.contains("body over size limit"), "{logs}");
        assert!(logs.contains("path=/rpc"), "{logs}");
        assert!(!logs.contains("rpc call audited"), "{logs}");
    }

    #[tokio::test]
    async fn rpc_get_is_not_allowed() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/rpc")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn root_is_not_found() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .method("POST")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
