//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ingest` | Queue a file for background ingestion (202) |
//! | `POST` | `/chat` | Ask a question, grounded or general |
//! | `GET`  | `/files/{id}/status` | Ingestion status of a file |
//! | `POST` | `/teams/{id}/join` | Join a team |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Identity
//!
//! Authentication happens upstream. The gateway forwards the verified
//! caller as `x-user-id` and `x-organization-id`; requests without them
//! are rejected with 401. Team memberships are loaded per request.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "forbidden", "message": "file f1: only the owner can ingest it" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `unauthorized` | 401 |
//! | `forbidden` | 403 |
//! | `not_found` | 404 |
//! | `consistency` | 500 |
//! | `upstream` | 502 |

use axum::{
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use marble_core::error::Error;
use marble_core::models::FileStatus;
use marble_core::retrieval::{ChatRequest, ChatResponse};
use marble_core::store::join_team;
use marble_core::visibility::{can_access_file, AccessMode, Principal};

use crate::config::Config;
use crate::ingest::spawn_ingest;
use crate::services::Services;

pub const USER_HEADER: &str = "x-user-id";
pub const ORGANIZATION_HEADER: &str = "x-organization-id";

pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::build(config).await?;
    let app = router(services);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "marble listening");
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(services: Services) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ingest", post(handle_ingest))
        .route("/chat", post(handle_chat))
        .route("/files/{id}/status", get(handle_file_status))
        .route("/teams/{id}/join", post(handle_join_team))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(services)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Error::Upstream { .. } => (StatusCode::BAD_GATEWAY, "upstream"),
            Error::Consistency(_) => (StatusCode::INTERNAL_SERVER_ERROR, "consistency"),
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ Identity ============

/// Caller identity forwarded by the authentication gateway.
pub struct Caller {
    pub user_id: String,
    pub organization_id: String,
}

impl Caller {
    async fn principal(&self, services: &Services) -> Result<Principal, AppError> {
        Ok(services
            .principal(&self.user_id, &self.organization_id)
            .await?)
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match (
            header(&parts.headers, USER_HEADER),
            header(&parts.headers, ORGANIZATION_HEADER),
        ) {
            (Some(user_id), Some(organization_id)) => Ok(Caller {
                user_id,
                organization_id,
            }),
            _ => Err(AppError {
                status: StatusCode::UNAUTHORIZED,
                code: "unauthorized",
                message: format!("missing {} or {} header", USER_HEADER, ORGANIZATION_HEADER),
            }),
        }
    }
}

// ============ POST /ingest ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestRequest {
    file_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestAccepted {
    file_id: String,
    status: FileStatus,
}

async fn handle_ingest(
    State(services): State<Services>,
    caller: Caller,
    Json(req): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestAccepted>), AppError> {
    let file = services
        .store
        .get_file(&req.file_id)
        .await?
        .filter(|f| !f.deleted && f.organization_id == caller.organization_id)
        .ok_or_else(|| Error::not_found(format!("file {}", req.file_id)))?;
    if file.owner_id != caller.user_id {
        return Err(Error::forbidden(format!(
            "file {}: only the owner can ingest it",
            file.id
        ))
        .into());
    }

    spawn_ingest(&services, file.id.clone(), caller.user_id);

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestAccepted {
            file_id: file.id,
            status: FileStatus::Uploading,
        }),
    ))
}

// ============ POST /chat ============

async fn handle_chat(
    State(services): State<Services>,
    caller: Caller,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let principal = caller.principal(&services).await?;
    let response = services.engine.answer(&principal, &req).await?;
    Ok(Json(response))
}

// ============ GET /files/{id}/status ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileStatusResponse {
    file_id: String,
    name: String,
    status: FileStatus,
    attempts: i64,
    last_error: Option<String>,
    active_generation: i64,
}

async fn handle_file_status(
    State(services): State<Services>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<FileStatusResponse>, AppError> {
    let principal = caller.principal(&services).await?;
    let file = services
        .store
        .get_file(&id)
        .await?
        .ok_or_else(|| Error::not_found(format!("file {}", id)))?;
    let grants = services.store.permissions_for_user(&principal.user_id).await?;
    can_access_file(&file, &principal, AccessMode::Read, &grants)
        .into_result(&format!("file {}", id))?;

    Ok(Json(FileStatusResponse {
        file_id: file.id,
        name: file.name,
        status: file.status,
        attempts: file.attempts,
        last_error: file.last_error,
        active_generation: file.active_generation,
    }))
}

// ============ POST /teams/{id}/join ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinTeamResponse {
    team_id: String,
    name: String,
}

async fn handle_join_team(
    State(services): State<Services>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<JoinTeamResponse>, AppError> {
    let team = join_team(
        services.store.as_ref(),
        &caller.organization_id,
        &caller.user_id,
        &id,
    )
    .await?;
    info!(user_id = %caller.user_id, team_id = %team.id, "joined team");
    Ok(Json(JoinTeamResponse {
        team_id: team.id,
        name: team.name,
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
