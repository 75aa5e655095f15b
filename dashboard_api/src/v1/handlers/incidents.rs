use crate::state::{AppState, Wiring};
use crate::v1::error::ApiError;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use dispatch_core::Incident;
use dispatch_core::incidents::DeletionFailure;
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentAddress {
    pub key: String,
    pub address: String,
}

pub async fn get_incidents<W: Wiring>(State(state): State<AppState<W>>) -> Json<Vec<Incident>> {
    Json(state.coordinator.incidents().await)
}

/// Removes the incident locally and answers before the remote sheet confirms.
pub async fn delete_incident<W: Wiring>(
    State(state): State<AppState<W>>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.coordinator.remove_incident(&key).await {
        Some(_remote) => Ok(StatusCode::ACCEPTED),
        None => Err(ApiError::NotFound(format!("incident {key}"))),
    }
}

pub async fn get_incident_address<W: Wiring>(
    State(state): State<AppState<W>>,
    Path(key): Path<String>,
) -> Result<Json<IncidentAddress>, ApiError> {
    let address = state
        .coordinator
        .incident_address(&key)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("incident {key}")))?;
    Ok(Json(IncidentAddress { key, address }))
}

pub async fn get_deletion_failures<W: Wiring>(
    State(state): State<AppState<W>>,
) -> Json<Vec<DeletionFailure>> {
    Json(state.coordinator.deletion_failures().await)
}
