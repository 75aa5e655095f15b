use crate::state::{AppState, Wiring};
use crate::v1::error::ApiError;
use axum::Json;
use axum::extract::{Path, State};
use dispatch_core::{Facility, ResourceField, ResourceUnit};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct LevelUpdate {
    pub value: i64,
}

#[derive(Deserialize)]
pub struct OperationalUpdate {
    pub operational: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressResponse {
    pub id: String,
    pub address: String,
}

pub async fn get_facilities<W: Wiring>(State(state): State<AppState<W>>) -> Json<Vec<Facility>> {
    Json(state.coordinator.facilities().await)
}

pub async fn get_facility<W: Wiring>(
    State(state): State<AppState<W>>,
    Path(id): Path<String>,
) -> Result<Json<Facility>, ApiError> {
    state
        .coordinator
        .facility(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("facility {id}")))
}

pub async fn put_resource_level<W: Wiring>(
    State(state): State<AppState<W>>,
    Path((id, unit, field)): Path<(String, usize, ResourceField)>,
    Json(body): Json<LevelUpdate>,
) -> Result<Json<ResourceUnit>, ApiError> {
    let updated = state
        .coordinator
        .update_resource(&id, unit, field, body.value)
        .await?;
    Ok(Json(updated))
}

pub async fn put_operational<W: Wiring>(
    State(state): State<AppState<W>>,
    Path(id): Path<String>,
    Json(body): Json<OperationalUpdate>,
) -> Result<Json<Facility>, ApiError> {
    state
        .coordinator
        .set_operational(&id, body.operational)
        .await?;
    state
        .coordinator
        .facility(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("facility {id}")))
}

pub async fn resolve_address<W: Wiring>(
    State(state): State<AppState<W>>,
    Path(id): Path<String>,
) -> Result<Json<AddressResponse>, ApiError> {
    let address = state
        .coordinator
        .resolve_facility_address(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("facility {id}")))?;
    Ok(Json(AddressResponse { id, address }))
}
