//! # LakeSync Server
//!
//! The HTTP sync surface: per-gateway push/pull/flush routes plus the
//! admin schema route, all behind HS256 bearer tokens.
//!
//! Routes:
//! - `POST /sync/:gateway_id/push` (role `client`)
//! - `GET  /sync/:gateway_id/pull?sinceHlc=&maxDeltas=` (role `client`)
//! - `POST /sync/:gateway_id/flush` (role `client`)
//! - `POST /admin/schema/:gateway_id` (role `admin`)
//! - `GET  /health`

pub mod auth;

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::warn;

use lakesync_core::{HlcTimestamp, SyncError, TableSchema};
use lakesync_gateway::{FlushReport, PullRequest, PullResponse, PushRequest, PushResponse, SyncGateway};

use auth::{bearer_token, verify_token, Role};

/// Shared server state: the registered gateways and the signing secret.
pub struct ServerState {
    gateways: DashMap<String, Arc<SyncGateway>>,
    jwt_secret: Vec<u8>,
}

impl ServerState {
    pub fn new(jwt_secret: impl Into<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            gateways: DashMap::new(),
            jwt_secret: jwt_secret.into(),
        })
    }

    pub fn register_gateway(&self, gateway: Arc<SyncGateway>) {
        self.gateways
            .insert(gateway.gateway_id().to_string(), gateway);
    }

    fn gateway(&self, id: &str) -> Result<Arc<SyncGateway>, ApiError> {
        self.gateways
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ApiError::not_found(format!("unknown gateway: {id}")))
    }

    fn authorize(
        &self,
        headers: &HeaderMap,
        gateway_id: &str,
        required: Role,
    ) -> Result<auth::Claims, ApiError> {
        let token = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .ok_or_else(|| {
                ApiError::from(SyncError::Unauthorized("missing bearer token".into()))
            })?;
        verify_token(token, &self.jwt_secret, gateway_id, required).map_err(ApiError::from)
    }
}

/// Error envelope rendered as `{"error": "..."}` with a mapped status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        let status = match &err {
            SyncError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            SyncError::Forbidden { .. } => StatusCode::FORBIDDEN,
            SyncError::ClockDrift { .. }
            | SyncError::SchemaMismatch { .. }
            | SyncError::SchemaRequired(_)
            | SyncError::Serialization(_)
            | SyncError::Config(_) => StatusCode::BAD_REQUEST,
            SyncError::BufferFull { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            SyncError::AdapterNotFound(_) => StatusCode::NOT_FOUND,
            SyncError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Build the router over a server state.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sync/:gateway_id/push", post(push))
        .route("/sync/:gateway_id/pull", get(pull))
        .route("/sync/:gateway_id/flush", post(flush))
        .route("/admin/schema/:gateway_id", post(register_schema))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn push(
    State(state): State<Arc<ServerState>>,
    Path(gateway_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>, ApiError> {
    state.authorize(&headers, &gateway_id, Role::Client)?;
    let gateway = state.gateway(&gateway_id)?;
    let response = gateway.push(request).await?;
    Ok(Json(response))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullParams {
    since_hlc: Option<String>,
    max_deltas: Option<usize>,
}

const DEFAULT_PULL_PAGE: usize = 100;

impl PullParams {
    fn cursor(&self) -> Result<HlcTimestamp, ApiError> {
        match &self.since_hlc {
            None => Ok(HlcTimestamp::ZERO),
            Some(raw) => raw.parse::<u64>().map(HlcTimestamp::from_u64).map_err(|_| {
                ApiError::from(SyncError::Serialization(format!("invalid sinceHlc: {raw}")))
            }),
        }
    }
}

async fn pull(
    State(state): State<Arc<ServerState>>,
    Path(gateway_id): Path<String>,
    headers: HeaderMap,
    Query(params): Query<PullParams>,
) -> Result<Json<PullResponse>, ApiError> {
    let claims = state.authorize(&headers, &gateway_id, Role::Client)?;
    let gateway = state.gateway(&gateway_id)?;
    let response = gateway
        .pull_from_buffer(PullRequest {
            client_id: claims.client_id,
            since_hlc: params.cursor()?,
            max_deltas: params.max_deltas.unwrap_or(DEFAULT_PULL_PAGE),
            rules: None,
        })
        .await?;
    Ok(Json(response))
}

async fn flush(
    State(state): State<Arc<ServerState>>,
    Path(gateway_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<FlushReport>, ApiError> {
    state.authorize(&headers, &gateway_id, Role::Client)?;
    let gateway = state.gateway(&gateway_id)?;
    let report = gateway.flush().await?;
    Ok(Json(report))
}

async fn register_schema(
    State(state): State<Arc<ServerState>>,
    Path(gateway_id): Path<String>,
    headers: HeaderMap,
    Json(schema): Json<TableSchema>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.authorize(&headers, &gateway_id, Role::Admin)?;
    let gateway = state.gateway(&gateway_id)?;
    let table = schema.table.clone();
    gateway.register_schema(schema)?;
    warn!(gateway = %gateway_id, table = %table, "table schema registered via admin route");
    Ok(Json(json!({ "registered": table })))
}
