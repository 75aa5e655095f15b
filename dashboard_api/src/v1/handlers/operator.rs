use crate::state::{AppState, Wiring};
use crate::v1::error::ApiError;
use axum::Json;
use axum::extract::{Query, State};
use dispatch_core::geo::round_tenth;
use dispatch_core::{Coordinate, Facility, HydrantSearch};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum LocationRequest {
    Coordinates { lat: f64, lon: f64 },
    Address { address: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosestFacility {
    pub operator: Coordinate,
    pub facility: Facility,
    pub distance_miles: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct HydrantQuery {
    /// Overrides the radius implied by how the operator was located.
    pub radius: Option<u32>,
}

pub async fn put_operator_location<W: Wiring>(
    State(state): State<AppState<W>>,
    Json(body): Json<LocationRequest>,
) -> Result<Json<Coordinate>, ApiError> {
    let location = match body {
        LocationRequest::Coordinates { lat, lon } => {
            let at = Coordinate::new(lat, lon)
                .ok_or_else(|| ApiError::BadRequest(format!("{lat}, {lon} is not a usable position")))?;
            state.coordinator.set_operator_location(at);
            at
        }
        LocationRequest::Address { address } => state
            .coordinator
            .locate_operator(&address)
            .await
            .ok_or_else(|| ApiError::NotFound(format!("address {address}")))?,
    };
    Ok(Json(location))
}

pub async fn get_closest_facility<W: Wiring>(
    State(state): State<AppState<W>>,
) -> Result<Json<ClosestFacility>, ApiError> {
    let operator = state
        .coordinator
        .operator_location()
        .ok_or_else(|| ApiError::NotFound("operator location".to_string()))?;
    let closest = state
        .coordinator
        .closest_to_operator()
        .await
        .ok_or_else(|| ApiError::NotFound("facility with a known position".to_string()))?;
    Ok(Json(ClosestFacility {
        operator,
        facility: closest.facility,
        distance_miles: round_tenth(closest.distance_miles),
    }))
}

pub async fn get_hydrants<W: Wiring>(
    State(state): State<AppState<W>>,
    Query(query): Query<HydrantQuery>,
) -> Result<Json<HydrantSearch>, ApiError> {
    if query.radius == Some(0) {
        return Err(ApiError::BadRequest("radius must be positive".to_string()));
    }
    state
        .coordinator
        .hydrants_near_operator(query.radius)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("operator location".to_string()))
}
