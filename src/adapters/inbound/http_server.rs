//! Query HTTP Server
//!
//! `/health` probes the database; every other path executes the SQL in the
//! request body. Methods are not filtered and callers are trusted.

use crate::application::QueryGateway;
use crate::domain::entities::{BindValue, QueryRequest};
use crate::domain::errors::{GatewayError, GatewayResult};
use crate::domain::services::ResultSerializer;
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

/// Body of a successful health check.
pub const HEALTHY_BODY: &str = "I'm alright, honey!";

/// Build the gateway routes.
pub fn router(gateway: Arc<QueryGateway>) -> Router {
    Router::new()
        .route("/health", any(health_handler))
        .fallback(query_handler)
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

/// HTTP listener for the gateway.
pub struct HttpServer {
    gateway: Arc<QueryGateway>,
}

impl HttpServer {
    pub fn new(gateway: Arc<QueryGateway>) -> Self {
        Self { gateway }
    }

    /// Serve on an already bound listener. New connections stop being
    /// accepted as soon as shutdown is broadcast.
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        tracing::info!("query gateway listening on {}", listener.local_addr()?);

        axum::serve(listener, router(self.gateway.clone()))
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("listener stopped accepting connections");
            })
            .await?;
        Ok(())
    }
}

/// Parse a generic query body: `{"query": string, "values"?: (string|number)[]}`.
///
/// The error text is the exact response body to send back.
pub fn parse_query_request(body: &[u8]) -> GatewayResult<QueryRequest> {
    let json: Value = serde_json::from_slice(body).map_err(|e| {
        GatewayError::RequestShape(format!("UNABLE TO READ REQUEST BODY: {}", e))
    })?;

    let query = match json.get("query") {
        Some(Value::String(q)) if !q.is_empty() => q.clone(),
        _ => return Err(GatewayError::RequestShape("INVALID QUERY STRING".to_string())),
    };

    let values = match json.get("values") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                BindValue::from_json(item).ok_or_else(|| {
                    GatewayError::RequestShape(format!(
                        "QUERY FAILED: value at index {} must be a string or a number",
                        i
                    ))
                })
            })
            .collect::<GatewayResult<Vec<_>>>()?,
        Some(_) => {
            return Err(GatewayError::RequestShape(
                "QUERY FAILED: values must be an array".to_string(),
            ))
        }
    };

    Ok(QueryRequest::new(query, values))
}

fn failure(body: String) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
}

async fn health_handler(State(gateway): State<Arc<QueryGateway>>) -> Response {
    match gateway.probe().await {
        Ok(()) => (StatusCode::OK, HEALTHY_BODY).into_response(),
        Err(e) => {
            tracing::warn!("health probe failed: {}", e);
            failure(format!("DATABASE ERROR: {}", e))
        }
    }
}

async fn query_handler(
    State(gateway): State<Arc<QueryGateway>>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(e) => return failure(format!("UNABLE TO READ REQUEST BODY: {}", e)),
    };

    let request = match parse_query_request(&body) {
        Ok(request) => request,
        Err(e) => return failure(e.to_string()),
    };

    match gateway.execute(&request.query, &request.values).await {
        Ok(result) => (StatusCode::OK, Json(ResultSerializer::serialize_rows(result))).into_response(),
        Err(e) => {
            tracing::debug!("query failed: {}", e);
            failure(format!("QUERY FAILED: {}", e))
        }
    }
}
