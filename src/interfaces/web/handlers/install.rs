use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::{Value, json};
use tracing::warn;

use crate::core::jobs::JobStatus;
use crate::core::pipeline::{InstallError, install_request};
use crate::core::transport::DeliveryTarget;

use super::super::AppState;

/// Catalog ids arrive as strings from forms and as numbers from scripts.
#[derive(serde::Deserialize)]
#[serde(untagged)]
pub enum ImageId {
    Text(String),
    Number(u64),
}

impl ImageId {
    fn into_string(self) -> String {
        match self {
            ImageId::Text(s) => s,
            ImageId::Number(n) => n.to_string(),
        }
    }
}

#[derive(serde::Deserialize)]
pub struct InstallPayload {
    #[serde(rename = "type")]
    pub image_type: Option<String>,
    pub id: Option<ImageId>,
    pub name: Option<String>,
    pub eve_ip: Option<String>,
    pub eve_user: Option<String>,
    pub eve_pass: Option<String>,
}

#[derive(serde::Deserialize)]
pub struct ProgressQuery {
    pub job_id: Option<String>,
}

#[derive(serde::Deserialize)]
pub struct ChoosePayload {
    pub job_id: Option<String>,
    pub name: Option<String>,
    /// Hold the response until the copy and permission repair finish.
    #[serde(default)]
    pub wait: bool,
}

#[derive(serde::Deserialize)]
pub struct FixPayload {
    pub eve_ip: Option<String>,
    pub eve_user: Option<String>,
    pub eve_pass: Option<String>,
}

fn error_status(err: &InstallError) -> StatusCode {
    match err {
        InstallError::InvalidRequest(_) | InstallError::InvalidName(_) => StatusCode::BAD_REQUEST,
        InstallError::UnknownJob(_) => StatusCode::NOT_FOUND,
        InstallError::NotAwaitingInput(_) => StatusCode::CONFLICT,
    }
}

fn failure(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({ "success": false, "message": message.into() })),
    )
}

fn rejected(err: InstallError) -> (StatusCode, Json<Value>) {
    failure(error_status(&err), err.to_string())
}

fn parse_payload(
    payload: InstallPayload,
) -> Result<crate::core::jobs::InstallRequest, InstallError> {
    install_request(
        payload.image_type.as_deref().unwrap_or_default(),
        &payload.id.map(ImageId::into_string).unwrap_or_default(),
        payload.name.as_deref(),
        payload.eve_ip.as_deref(),
        payload.eve_user.as_deref(),
        payload.eve_pass.as_deref(),
    )
}

pub async fn install_async_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<InstallPayload>,
) -> impl IntoResponse {
    let request = match parse_payload(payload) {
        Ok(r) => r,
        Err(e) => return rejected(e),
    };
    match state.installer.start(request).await {
        Ok(job_id) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "Install started",
                "job_id": job_id
            })),
        ),
        Err(e) => rejected(e),
    }
}

/// Blocking variant: returns once the job pauses for a name or finishes.
pub async fn install_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<InstallPayload>,
) -> impl IntoResponse {
    let request = match parse_payload(payload) {
        Ok(r) => r,
        Err(e) => return rejected(e),
    };
    match state.installer.start_and_wait(request).await {
        Ok(job) => (
            StatusCode::OK,
            Json(json!({
                "success": job.status != JobStatus::Error,
                "message": job.message,
                "job_id": job.job_id,
                "job": job
            })),
        ),
        Err(e) => rejected(e),
    }
}

pub async fn install_progress_endpoint(
    State(state): State<AppState>,
    Query(query): Query<ProgressQuery>,
) -> impl IntoResponse {
    let Some(job_id) = query.job_id.filter(|id| !id.trim().is_empty()) else {
        return failure(StatusCode::BAD_REQUEST, "job_id is required");
    };
    match state.installer.poll(job_id.trim()).await {
        Ok(job) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": job.message,
                "job": job
            })),
        ),
        Err(e) => rejected(e),
    }
}

pub async fn install_choose_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<ChoosePayload>,
) -> impl IntoResponse {
    let Some(job_id) = payload.job_id.filter(|id| !id.trim().is_empty()) else {
        return failure(StatusCode::BAD_REQUEST, "job_id is required");
    };
    let job_id = job_id.trim();
    let name = payload.name.unwrap_or_default();
    if !payload.wait {
        return match state.installer.resume(job_id, &name).await {
            Ok(()) => (
                StatusCode::OK,
                Json(json!({ "success": true, "message": "Copy started" })),
            ),
            Err(e) => rejected(e),
        };
    }
    match state.installer.resume_and_wait(job_id, &name).await {
        Ok(job) => (
            StatusCode::OK,
            Json(json!({
                "success": job.status != JobStatus::Error,
                "message": job.message,
                "job_id": job.job_id,
                "job": job
            })),
        ),
        Err(e) => rejected(e),
    }
}

pub async fn list_jobs_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let jobs = state.installer.list().await;
    Json(json!({
        "success": true,
        "message": format!("{} job(s)", jobs.len()),
        "jobs": jobs
    }))
}

pub async fn fix_permissions_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<FixPayload>,
) -> impl IntoResponse {
    let target = match DeliveryTarget::from_parts(
        payload.eve_ip.as_deref(),
        payload.eve_user.as_deref(),
        payload.eve_pass.as_deref(),
    ) {
        Ok(Some(target)) => target,
        Ok(None) => {
            return failure(
                StatusCode::BAD_REQUEST,
                "eve_ip, eve_user and eve_pass are required",
            );
        }
        Err(e) => return failure(StatusCode::BAD_REQUEST, e),
    };

    match state.installer.fix_permissions(&target).await {
        Ok(output) => {
            let message = if output.success() {
                "Permissions fixed".to_string()
            } else {
                format!("Permission repair failed: {}", output.failure_reason())
            };
            (
                StatusCode::OK,
                Json(json!({
                    "success": output.success(),
                    "message": message,
                    "stdout": output.stdout,
                    "stderr": output.stderr
                })),
            )
        }
        Err(e) => {
            warn!("Permission repair on {} could not start: {}", target.host, e);
            failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to run ssh: {e}"),
            )
        }
    }
}
