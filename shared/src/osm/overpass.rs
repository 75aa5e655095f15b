use crate::BoundingBox;
use crate::error::ClientError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub const DEFAULT_ENDPOINT: &str = "https://overpass.kumi.systems/api/interpreter";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OverpassResponse {
    #[serde(default)]
    pub elements: Vec<Element>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Element {
    #[serde(rename = "type")]
    pub type_field: String,
    pub id: i64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Element {
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

/// Overpass QL for every fire station node inside `bbox`.
///
/// Overpass expects the box as `south,west,north,east`.
pub fn fire_station_query(bbox: &BoundingBox) -> String {
    format!(
        "[out:json][timeout:25];\nnode[\"amenity\"=\"fire_station\"]({},{},{},{});\nout body;",
        bbox.min_lat, bbox.min_lon, bbox.max_lat, bbox.max_lon
    )
}

/// Overpass QL for every fire hydrant node within `radius_meters` of a point.
pub fn hydrants_query(lat: f64, lon: f64, radius_meters: u32) -> String {
    format!(
        "[out:json][timeout:25];\nnode[\"emergency\"=\"fire_hydrant\"](around:{radius_meters},{lat},{lon});\nout body;"
    )
}

#[derive(Clone)]
pub struct OverpassClient {
    client: Client,
    endpoint: String,
}

impl OverpassClient {
    pub fn new_with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub async fn fire_stations(&self, bbox: &BoundingBox) -> Result<Vec<Element>, ClientError> {
        debug!(bbox = ?bbox, "querying Overpass for fire stations");
        self.interpret(fire_station_query(bbox)).await
    }

    pub async fn hydrants_around(
        &self,
        lat: f64,
        lon: f64,
        radius_meters: u32,
    ) -> Result<Vec<Element>, ClientError> {
        debug!(lat, lon, radius_meters, "querying Overpass for fire hydrants");
        self.interpret(hydrants_query(lat, lon, radius_meters)).await
    }

    async fn interpret(&self, query: String) -> Result<Vec<Element>, ClientError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .body(query)
            .send()
            .await?
            .error_for_status()?
            .json::<OverpassResponse>()
            .await?;
        debug!(len = resp.elements.len(), "fetched elements from Overpass");

        Ok(resp.elements)
    }
}
