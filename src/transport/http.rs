//! HTTP binding of the bus call contract.
//!
//! Endpoint:
//! - POST /api/emit - body `{eventName, payload}`, answers `{data}` or `{error: {kind, message}}`
//!
//! The caller's credential travels out of band, in the configured cookie or an
//! `Authorization: Bearer` header, and is copied into `payload.token`.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::bus::{EventBus, TOKEN_FIELD};
use crate::utils::{
    config::ServerConfig,
    error::{AdapterError, GateError, GateResult},
};

pub const EMIT_PATH: &str = "/api/emit";

#[derive(Clone)]
struct TransportState {
    bus: Arc<EventBus>,
    cookie_name: Arc<str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmitRequest {
    event_name: String,
    #[serde(default)]
    payload: Value,
}

/// A bus error rendered as an HTTP response
#[derive(Debug)]
pub struct TransportError(pub GateError);

impl TransportError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            GateError::Auth(_) => StatusCode::UNAUTHORIZED,
            GateError::UnknownEvent(_) => StatusCode::NOT_FOUND,
            GateError::Permission(_) => StatusCode::FORBIDDEN,
            GateError::Validation(_) => StatusCode::BAD_REQUEST,
            GateError::Adapter(AdapterError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            GateError::Adapter(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<GateError> for TransportError {
    fn from(e: GateError) -> Self {
        Self(e)
    }
}

impl IntoResponse for TransportError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.0.kind(), error = %self.0, "Emit failed");
        }
        let body = json!({
            "error": {
                "kind": self.0.kind(),
                "message": self.0.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

/// Router exposing `bus` at [`EMIT_PATH`]
pub fn router(bus: Arc<EventBus>, cookie_name: &str) -> Router {
    let state = TransportState {
        bus,
        cookie_name: Arc::from(cookie_name),
    };
    Router::new()
        .route(EMIT_PATH, post(emit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn emit(State(state): State<TransportState>, headers: HeaderMap, body: Bytes) -> Result<Json<Value>, TransportError> {
    let request: EmitRequest = serde_json::from_slice(&body)
        .map_err(|e| GateError::validation(format!("request body must be {{eventName, payload}}: {}", e)))?;

    let mut payload = request.payload;
    if let Some(token) = credential(&headers, &state.cookie_name) {
        match &mut payload {
            Value::Object(map) => {
                map.insert(TOKEN_FIELD.to_string(), Value::String(token));
            }
            Value::Null => payload = json!({ TOKEN_FIELD: token }),
            // left for the bus to reject
            _ => {}
        }
    }

    let data = state.bus.emit(&request.event_name, payload).await?;
    Ok(Json(json!({ "data": data })))
}

/// Token from the named cookie, falling back to a bearer header
fn credential(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value.trim().to_string());

    from_cookie.filter(|token| !token.is_empty()).or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    })
}

/// Serve `bus` until `shutdown` resolves
pub async fn serve<F>(bus: Arc<EventBus>, server: &ServerConfig, cookie_name: &str, shutdown: F) -> GateResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", server.bind_address, server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| GateError::Configuration(format!("cannot bind {}: {}", addr, e)))?;
    tracing::info!(addr = %addr, "Listening for connections");

    axum::serve(listener, router(bus, cookie_name))
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("HTTP server shutting down");
        })
        .await
        .map_err(|e| GateError::Internal(format!("server error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_cookie_wins_over_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; token=abc.def; lang=en"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer other"));
        assert_eq!(credential(&headers, "token"), Some("abc.def".to_string()));
        assert_eq!(credential(&headers, "session"), Some("other".to_string()));
    }

    #[test]
    fn test_missing_credential() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("token="));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(credential(&headers, "token"), None);
    }

    #[test]
    fn test_status_mapping() {
        let timeout = AdapterError::Timeout {
            target: "settings.settings".to_string(),
            seconds: 5,
        };
        assert_eq!(TransportError(timeout.into()).status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            TransportError(GateError::UnknownEvent("x".to_string())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            TransportError(GateError::Registration("x".to_string())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
