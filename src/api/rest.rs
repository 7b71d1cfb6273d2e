//! REST API Handlers
//!
//! Exposes provisioning and deletion to the orchestrator. Core calls block
//! on the storage engine, so every handler runs them on the blocking pool.

use crate::domain::ports::{AccessMode, ReclaimPolicy, VolumeRecord, VolumeRequest};
use crate::error::{Error, Result};
use crate::k8s::parse_quantity;
use crate::provisioner::Provisioner;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use k8s_openapi::api::core::v1::PersistentVolume;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Volume provision request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionVolumeRequest {
    /// Volume identity
    pub name: String,
    /// Capacity (e.g., "1G", "10Gi")
    pub capacity: String,
    #[serde(default)]
    pub access_modes: Vec<AccessMode>,
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
    /// Storage class parameters
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// Volume provision response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionVolumeResponse {
    pub record: VolumeRecord,
    pub persistent_volume: PersistentVolume,
}

/// Body of a delete request: the record, or the PersistentVolume built from it
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DeleteVolumeBody {
    Record(VolumeRecord),
    PersistentVolume(Box<PersistentVolume>),
}

impl DeleteVolumeBody {
    fn into_record(self) -> Result<VolumeRecord> {
        match self {
            DeleteVolumeBody::Record(record) => Ok(record),
            DeleteVolumeBody::PersistentVolume(pv) => VolumeRecord::try_from(pv.as_ref()),
        }
    }
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    provisioner: Arc<Provisioner>,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(provisioner: Arc<Provisioner>) -> Self {
        Self { provisioner }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            provisioner: self.provisioner,
        };

        Router::new()
            // Volume endpoints
            .route("/v1/volumes", post(provision_volume))
            .route("/v1/volumes/:name", delete(delete_volume))
            // Health endpoints
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    provisioner: Arc<Provisioner>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Provision a volume
async fn provision_volume(
    State(state): State<AppState>,
    Json(request): Json<ProvisionVolumeRequest>,
) -> Response {
    info!("Provision request for volume {}", request.name);

    let capacity_bytes = match parse_quantity(&request.capacity) {
        Ok(bytes) => bytes,
        Err(e) => return error_response(&e),
    };

    let volume_request = VolumeRequest {
        name: request.name,
        capacity_bytes,
        access_modes: request.access_modes,
        reclaim_policy: request.reclaim_policy,
        parameters: request.parameters,
    };

    let provisioner = state.provisioner.clone();
    let result = run_blocking(move || provisioner.provision(volume_request)).await;

    match result {
        Ok(record) => {
            let persistent_volume = record.to_persistent_volume();
            (
                StatusCode::CREATED,
                Json(ProvisionVolumeResponse {
                    record,
                    persistent_volume,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Provision failed: {}", e);
            error_response(&e)
        }
    }
}

/// Delete a volume
async fn delete_volume(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<DeleteVolumeBody>,
) -> Response {
    let record = match body.into_record() {
        Ok(record) => record,
        Err(e) => return error_response(&e),
    };

    if record.name != name {
        warn!(
            "Delete request path {} does not match record {}",
            name, record.name
        );
        return error_response(&Error::InvalidArgument(format!(
            "path names volume {} but body describes {}",
            name, record.name
        )));
    }

    let provisioner = state.provisioner.clone();
    match run_blocking(move || provisioner.delete(&record)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!("Delete of {} failed: {}", name, e);
            error_response(&e)
        }
    }
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check: the parent dataset must be listable
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let provisioner = state.provisioner.clone();
    match run_blocking(move || provisioner.check_engine()).await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(e) => {
            warn!("Readiness check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "storage engine unavailable")
        }
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Run a blocking core call off the async workers
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("blocking task failed: {}", e)))?
}

/// HTTP status and error code for an error
fn error_status(e: &Error) -> (StatusCode, &'static str) {
    match e {
        Error::InvalidArgument(_) | Error::CapacityParse(_) => {
            (StatusCode::BAD_REQUEST, "invalid_argument")
        }
        Error::AlreadyExists { .. } => (StatusCode::CONFLICT, "already_exists"),
        Error::EngineUnavailable(_) | Error::Lookup { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "engine_unavailable")
        }
        Error::Destroy { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "destroy_failed"),
        Error::Create { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "create_failed"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

fn error_response(e: &Error) -> Response {
    let (status, code) = error_status(e);
    (
        status,
        Json(ApiErrorResponse {
            error: code.into(),
            message: e.to_string(),
        }),
    )
        .into_response()
}
