//! HTTP control surface for netbringup.
//!
//! Accepts testbed uploads, starts orchestration runs in the background and
//! serves the run status for polling front-ends.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info, warn};
use netbringup::{OrchestrationStatus, Orchestrator, Settings, StatusBoard};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Largest accepted request body unless [`AppState::with_max_upload`] says
/// otherwise.
pub const MAX_UPLOAD: usize = 16 * 1024 * 1024;

pub const SERVICE_NAME: &str = "Network Orchestrator API";

/// Shared by every handler.
pub struct AppState {
    pub status: StatusBoard,
    pub settings: Settings,
    pub upload_dir: PathBuf,
    /// Request body limit in bytes; larger uploads get 413.
    pub max_upload: usize,
}

impl AppState {
    pub fn new(settings: Settings, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            status: StatusBoard::new(),
            settings,
            upload_dir: upload_dir.into(),
            max_upload: MAX_UPLOAD,
        }
    }

    pub fn with_max_upload(mut self, max_upload: usize) -> Self {
        self.max_upload = max_upload;
        self
    }
}

/// Handler failures, rendered as `{"error": message}`.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    TooLarge(String),

    #[error("{0}")]
    Internal(String),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn bad_request(message: &str) -> Self {
        Self::BadRequest(message.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Log the detail, answer with a short message.
fn internal(context: &str) -> impl FnOnce(std::io::Error) -> ServerError + '_ {
    move |e| {
        error!("{context}: {e}");
        ServerError::Internal(format!("{context} failed"))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub filename: String,
    pub filepath: String,
}

#[derive(Debug, Deserialize)]
pub struct OrchestrateRequest {
    #[serde(default)]
    pub testbed_file: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrchestrateResponse {
    pub message: String,
    pub status: OrchestrationStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub orchestrator_available: bool,
    pub service: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    let limit = state.max_upload;
    Router::new()
        .route("/api/upload", post(upload))
        .route("/api/orchestrate", post(orchestrate))
        .route("/api/status", get(status))
        .route("/api/health", get(health))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

/// Testbed files are YAML.
pub fn allowed_file(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
}

/// Basename of `filename` with anything outside `[A-Za-z0-9._-]` replaced
/// by `_` and leading dots removed.
pub fn secure_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}

async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServerError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await.map_err(multipart_error)?;
        upload = Some((filename, data));
        break;
    }

    let Some((filename, data)) = upload else {
        return Err(ServerError::bad_request("No file provided"));
    };
    if filename.is_empty() {
        return Err(ServerError::bad_request("No file selected"));
    }
    if !allowed_file(&filename) {
        return Err(ServerError::bad_request("Only YAML files are allowed"));
    }
    let filename = secure_filename(&filename);
    if !allowed_file(&filename) {
        return Err(ServerError::bad_request("Only YAML files are allowed"));
    }

    tokio::fs::create_dir_all(&state.upload_dir)
        .await
        .map_err(internal("creating upload directory"))?;
    let path = state.upload_dir.join(&filename);
    tokio::fs::write(&path, &data)
        .await
        .map_err(internal("saving upload"))?;
    info!("stored testbed {} ({} bytes)", path.display(), data.len());

    if !state.status.reset() {
        warn!("upload received while a run is in progress; status kept");
    }

    Ok(Json(UploadResponse {
        message: "File uploaded successfully".to_string(),
        filename,
        filepath: path.display().to_string(),
    }))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ServerError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServerError::TooLarge("File too large".to_string())
    } else {
        ServerError::BadRequest(format!("Invalid upload: {}", e.body_text()))
    }
}

async fn orchestrate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<OrchestrateRequest>, JsonRejection>,
) -> Result<Json<OrchestrateResponse>, ServerError> {
    let Ok(Json(request)) = payload else {
        return Err(ServerError::bad_request("No JSON data provided"));
    };
    let name = request
        .testbed_file
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| ServerError::bad_request("No testbed file specified"))?;

    let path = state.upload_dir.join(secure_filename(&name));
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(ServerError::NotFound("Testbed file not found".to_string()));
    }

    if !state.status.try_begin() {
        return Err(ServerError::Conflict(
            "Orchestration already running".to_string(),
        ));
    }
    spawn_run(&state, path);

    Ok(Json(OrchestrateResponse {
        message: "Orchestration started successfully".to_string(),
        status: state.status.snapshot(),
    }))
}

/// Run the orchestration on its own task. The board has already been marked
/// running; it is closed even if the run panics.
fn spawn_run(state: &AppState, path: PathBuf) {
    let orchestrator = Orchestrator::new(state.settings.clone(), state.status.clone());
    let status = state.status.clone();
    tokio::spawn(async move {
        info!("orchestration started for {}", path.display());
        let run = tokio::spawn(async move { orchestrator.execute(path).await });
        match run.await {
            Ok(summary) => info!("orchestration finished, success: {}", summary.success()),
            Err(e) => {
                error!("orchestration aborted: {e}");
                status.finish(Some("Orchestration aborted unexpectedly".to_string()));
            }
        }
    });
}

async fn status(State(state): State<Arc<AppState>>) -> Json<OrchestrationStatus> {
    Json(state.status.snapshot())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        orchestrator_available: true,
        service: SERVICE_NAME.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_file() {
        assert!(allowed_file("testbed.yaml"));
        assert!(allowed_file("LAB.YML"));
        assert!(!allowed_file("testbed.txt"));
        assert!(!allowed_file("yaml"));
        assert!(!allowed_file("testbed.yaml.exe"));
    }

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("../../etc/passwd.yaml"), "passwd.yaml");
        assert_eq!(secure_filename("C:\\labs\\my lab.yml"), "my_lab.yml");
        assert_eq!(secure_filename(".hidden.yaml"), "hidden.yaml");
    }
}
