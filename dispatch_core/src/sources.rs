//! External collaborators of the core and their implementations over the `shared` clients.

use crate::error::SourceError;
use crate::facilities::RawFacility;
use crate::geo::Coordinate;
use crate::hydrants::Hydrant;
use crate::incidents::{IncidentKey, KeyKind, RawIncident};
use serde_json::Value;
use shared::BoundingBox;
use shared::osm::nominatim::NominatimClient;
use shared::osm::overpass::{Element, OverpassClient};
use shared::sheetdb::{SheetDbClient, SheetRow};
use std::future::Future;
use tracing::debug;

pub trait FacilitySource: Send + Sync + 'static {
    fn fetch_facilities(
        &self,
        bounds: &BoundingBox,
    ) -> impl Future<Output = Result<Vec<RawFacility>, SourceError>> + Send;
}

/// Point search for hydrants. Only hydrants with a usable position are returned.
pub trait HydrantSource: Send + Sync + 'static {
    fn hydrants_near(
        &self,
        at: Coordinate,
        radius_meters: u32,
    ) -> impl Future<Output = Result<Vec<Hydrant>, SourceError>> + Send;
}

pub trait IncidentSource: Send + Sync + 'static {
    fn fetch_incidents(&self) -> impl Future<Output = Result<Vec<RawIncident>, SourceError>> + Send;

    fn delete_incident(
        &self,
        key: &IncidentKey,
    ) -> impl Future<Output = Result<(), SourceError>> + Send;
}

/// Best-effort geocoding. `Ok(None)` means the service answered but found nothing.
pub trait Geocoder: Send + Sync + 'static {
    fn geocode(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<Option<Coordinate>, SourceError>> + Send;

    fn reverse_geocode(
        &self,
        at: Coordinate,
    ) -> impl Future<Output = Result<Option<String>, SourceError>> + Send;
}

impl From<Element> for RawFacility {
    fn from(element: Element) -> Self {
        Self {
            id: element.id.to_string(),
            lat: element.lat,
            lon: element.lon,
            tags: element.tags,
        }
    }
}

impl FacilitySource for OverpassClient {
    async fn fetch_facilities(&self, bounds: &BoundingBox) -> Result<Vec<RawFacility>, SourceError> {
        Ok(self
            .fire_stations(bounds)
            .await?
            .into_iter()
            .map(RawFacility::from)
            .collect())
    }
}

impl HydrantSource for OverpassClient {
    async fn hydrants_near(
        &self,
        at: Coordinate,
        radius_meters: u32,
    ) -> Result<Vec<Hydrant>, SourceError> {
        let elements = self.hydrants_around(at.lat, at.lon, radius_meters).await?;
        Ok(elements.iter().filter_map(hydrant_from_element).collect())
    }
}

fn hydrant_from_element(element: &Element) -> Option<Hydrant> {
    Some(Hydrant {
        id: element.id.to_string(),
        coordinates: Coordinate::new(element.lat?, element.lon?)?,
        hydrant_type: element.tag("fire_hydrant:type").map(str::to_string),
    })
}

/// Incident sheet on SheetDB; rows are keyed by one configured column.
#[derive(Clone)]
pub struct SheetIncidentSource {
    client: SheetDbClient,
    key_column: String,
}

impl SheetIncidentSource {
    pub fn new(client: SheetDbClient, key_column: impl Into<String>) -> Self {
        Self {
            client,
            key_column: key_column.into(),
        }
    }

    fn to_raw(&self, mut row: SheetRow) -> RawIncident {
        let key = row.remove(&self.key_column).and_then(|cell| match cell {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        RawIncident {
            lat: row.remove("lat").unwrap_or(Value::Null),
            lon: row.remove("lon").unwrap_or(Value::Null),
            strength: row.remove("strength").unwrap_or(Value::Null),
            reported_at: row
                .remove("reportedAt")
                .and_then(|cell| cell.as_str().map(str::to_string)),
            key,
        }
    }
}

impl IncidentSource for SheetIncidentSource {
    async fn fetch_incidents(&self) -> Result<Vec<RawIncident>, SourceError> {
        Ok(self
            .client
            .rows()
            .await?
            .into_iter()
            .map(|row| self.to_raw(row))
            .collect())
    }

    async fn delete_incident(&self, key: &IncidentKey) -> Result<(), SourceError> {
        if key.kind == KeyKind::Composite {
            return Err(SourceError::UntargetableKey(key.value.clone()));
        }
        let deleted = self.client.delete_where(&self.key_column, &key.value).await?;
        if deleted == 0 {
            debug!(key = %key, "no remote rows matched, already deleted");
        }
        Ok(())
    }
}

impl Geocoder for NominatimClient {
    async fn geocode(&self, address: &str) -> Result<Option<Coordinate>, SourceError> {
        let hits = self.search(address).await?;
        Ok(hits.first().and_then(|hit| {
            let lat = hit.lat.trim().parse::<f64>().ok()?;
            let lon = hit.lon.trim().parse::<f64>().ok()?;
            Coordinate::new(lat, lon)
        }))
    }

    async fn reverse_geocode(&self, at: Coordinate) -> Result<Option<String>, SourceError> {
        let result = self.reverse(at.lat, at.lon).await?;
        Ok(result.display_name.filter(|name| !name.trim().is_empty()))
    }
}
