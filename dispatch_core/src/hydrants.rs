//! Fire hydrants around the operator.

use crate::geo::{self, Coordinate};
use serde::{Deserialize, Serialize};

/// Search radius once the operator position comes from the device.
pub const DEVICE_SEARCH_RADIUS_METERS: u32 = 500;
/// Search radius once the operator position comes from a typed address, which is coarser.
pub const ADDRESS_SEARCH_RADIUS_METERS: u32 = 2000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hydrant {
    pub id: String,
    pub coordinates: Coordinate,
    /// `pillar`, `underground`, `wall` and so on, when mapped.
    pub hydrant_type: Option<String>,
}

/// How the operator location was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    Device,
    Address,
}

impl LocationSource {
    pub const fn search_radius_meters(self) -> u32 {
        match self {
            LocationSource::Device => DEVICE_SEARCH_RADIUS_METERS,
            LocationSource::Address => ADDRESS_SEARCH_RADIUS_METERS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyHydrant {
    pub hydrant: Hydrant,
    pub distance_meters: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HydrantSearch {
    pub operator: Coordinate,
    pub radius_meters: u32,
    /// Nearest first. Empty when nothing was found or the lookup failed.
    pub hydrants: Vec<NearbyHydrant>,
}

/// Orders hydrants by distance from `origin`, dropping any outside `radius_meters`.
pub fn nearest_first(
    origin: Coordinate,
    hydrants: Vec<Hydrant>,
    radius_meters: u32,
) -> Vec<NearbyHydrant> {
    let mut nearby = hydrants
        .into_iter()
        .map(|hydrant| NearbyHydrant {
            distance_meters: geo::distance_meters(origin, hydrant.coordinates),
            hydrant,
        })
        .filter(|h| h.distance_meters <= f64::from(radius_meters))
        .collect::<Vec<_>>();
    nearby.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));
    nearby
}
