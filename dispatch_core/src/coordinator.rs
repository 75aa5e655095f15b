//! Refresh cycles: fetch, merge into the registries, re-rank, publish.
//!
//! Every change to either registry ends in a full re-rank of all held incidents
//! against the current facility list, so a facility load that lands after the
//! incidents were ranked against an empty list always repairs the view.

use crate::error::{ResourceUpdateError, SourceError};
use crate::facilities::{Facility, FacilityRegistry, ResourceDefaults, ResourceField, ResourceUnit, UNKNOWN};
use crate::geo::{self, Coordinate, RankingEntry};
use crate::hydrants::{self, HydrantSearch, LocationSource};
use crate::incidents::{DeletionFailure, Incident, IncidentRegistry};
use crate::sources::{FacilitySource, Geocoder, HydrantSource, IncidentSource};
use crate::store::{StateStore, StoreBackend};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock as SyncRwLock};
use serde::Serialize;
use shared::BoundingBox;
use std::sync::Arc;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    Facilities,
    Incidents,
}

/// `Idle -> Loading -> Merged -> Ranked -> Idle`, tracked per registry kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    #[default]
    Idle,
    Loading,
    Merged,
    Ranked,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentRanking {
    pub incident: Incident,
    /// Nearest facilities, at most the panel size. Empty for incidents without a position.
    pub closest: Vec<RankingEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingSnapshot {
    pub generation: u64,
    pub computed_at: DateTime<Utc>,
    pub facility_count: usize,
    pub incidents: Vec<IncidentRanking>,
}

impl RankingSnapshot {
    fn empty() -> Self {
        Self {
            generation: 0,
            computed_at: Utc::now(),
            facility_count: 0,
            incidents: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStatus {
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatus {
    pub facilities: RefreshStatus,
    pub incidents: RefreshStatus,
}

impl SyncStatus {
    fn entry(&mut self, kind: RegistryKind) -> &mut RefreshStatus {
        match kind {
            RegistryKind::Facilities => &mut self.facilities,
            RegistryKind::Incidents => &mut self.incidents,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Lane {
    phase: SyncPhase,
    in_flight: usize,
}

/// Phase per registry kind. Overlapping loads of one kind share a lane, which
/// only returns to `Idle` once the last of them has finished.
#[derive(Debug, Default)]
struct Phases {
    facilities: Lane,
    incidents: Lane,
}

impl Phases {
    fn lane(&mut self, kind: RegistryKind) -> &mut Lane {
        match kind {
            RegistryKind::Facilities => &mut self.facilities,
            RegistryKind::Incidents => &mut self.incidents,
        }
    }

    fn begin(&mut self, kind: RegistryKind) -> SyncPhase {
        let lane = self.lane(kind);
        lane.in_flight += 1;
        lane.phase = SyncPhase::Loading;
        lane.phase
    }

    fn advance(&mut self, kind: RegistryKind, phase: SyncPhase) -> SyncPhase {
        let lane = self.lane(kind);
        lane.phase = phase;
        lane.phase
    }

    fn finish(&mut self, kind: RegistryKind) -> SyncPhase {
        let lane = self.lane(kind);
        lane.in_flight = lane.in_flight.saturating_sub(1);
        lane.phase = if lane.in_flight == 0 {
            SyncPhase::Idle
        } else {
            SyncPhase::Loading
        };
        lane.phase
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    pub bounds: BoundingBox,
    pub panel_size: usize,
    pub resource_defaults: ResourceDefaults,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub facilities: Option<usize>,
    pub incidents: Option<usize>,
}

pub struct Coordinator<B, F, I, G> {
    bounds: BoundingBox,
    panel_size: usize,
    facility_source: F,
    incident_source: Arc<I>,
    geocoder: G,
    facilities: RwLock<FacilityRegistry<B>>,
    incidents: RwLock<IncidentRegistry<B, I>>,
    phases: Mutex<Phases>,
    status: Mutex<SyncStatus>,
    operator: SyncRwLock<Option<(Coordinate, LocationSource)>>,
    rankings: watch::Sender<Arc<RankingSnapshot>>,
}

impl<B, F, I, G> Coordinator<B, F, I, G>
where
    B: StoreBackend,
    F: FacilitySource + HydrantSource,
    I: IncidentSource,
    G: Geocoder,
{
    pub fn new(
        settings: CoordinatorSettings,
        store: Arc<StateStore<B>>,
        facility_source: F,
        incident_source: I,
        geocoder: G,
    ) -> Self {
        let incident_source = Arc::new(incident_source);
        let (rankings, _) = watch::channel(Arc::new(RankingSnapshot::empty()));
        Self {
            bounds: settings.bounds,
            panel_size: settings.panel_size,
            facility_source,
            incident_source: Arc::clone(&incident_source),
            geocoder,
            facilities: RwLock::new(FacilityRegistry::new(
                Arc::clone(&store),
                settings.resource_defaults,
            )),
            incidents: RwLock::new(IncidentRegistry::new(store, incident_source)),
            phases: Mutex::new(Phases::default()),
            status: Mutex::new(SyncStatus::default()),
            operator: SyncRwLock::new(None),
            rankings,
        }
    }

    /// Hydrates both registries from the store, then ranks what was restored.
    pub async fn restore(&self) -> Arc<RankingSnapshot> {
        let facilities = self.facilities.write().await.restore().await;
        let incidents = self.incidents.write().await.restore().await;
        info!(facilities, incidents, "restored registries from store");
        self.rerank().await
    }

    /// Refreshes both registries concurrently. Neither waits for the other.
    pub async fn refresh_all(&self) -> RefreshReport {
        let (facilities, incidents) =
            tokio::join!(self.refresh_facilities(), self.refresh_incidents());
        RefreshReport {
            facilities: facilities.ok(),
            incidents: incidents.ok(),
        }
    }

    pub async fn refresh_facilities(&self) -> Result<usize, SourceError> {
        info!("refreshing facilities");
        self.transition(RegistryKind::Facilities, Phases::begin);
        let fetched = self.facility_source.fetch_facilities(&self.bounds).await;
        let records = self.record_fetch(RegistryKind::Facilities, fetched)?;

        let len = self.facilities.write().await.load(records).await;
        self.finish_load(RegistryKind::Facilities).await;
        Ok(len)
    }

    pub async fn refresh_incidents(&self) -> Result<usize, SourceError> {
        info!("refreshing incidents");
        self.transition(RegistryKind::Incidents, Phases::begin);
        let fetched = self.incident_source.fetch_incidents().await;
        let records = self.record_fetch(RegistryKind::Incidents, fetched)?;

        let len = self.incidents.write().await.load(records).await;
        self.finish_load(RegistryKind::Incidents).await;
        Ok(len)
    }

    fn record_fetch<T>(
        &self,
        kind: RegistryKind,
        fetched: Result<T, SourceError>,
    ) -> Result<T, SourceError> {
        let now = Utc::now();
        let mut status = self.status.lock();
        let entry = status.entry(kind);
        entry.last_attempt = Some(now);
        match fetched {
            Ok(records) => {
                entry.last_success = Some(now);
                entry.last_error = None;
                Ok(records)
            }
            Err(e) => {
                warn!(?kind, error = %e, "refresh failed, keeping previous registry contents");
                entry.last_error = Some(e.to_string());
                drop(status);
                self.transition(kind, Phases::finish);
                Err(e)
            }
        }
    }

    async fn finish_load(&self, kind: RegistryKind) {
        self.transition(kind, |p, k| p.advance(k, SyncPhase::Merged));
        self.rerank().await;
        self.transition(kind, |p, k| p.advance(k, SyncPhase::Ranked));
        self.transition(kind, Phases::finish);
    }

    fn transition(
        &self,
        kind: RegistryKind,
        step: impl FnOnce(&mut Phases, RegistryKind) -> SyncPhase,
    ) {
        let mut phases = self.phases.lock();
        let from = phases.lane(kind).phase;
        let to = step(&mut phases, kind);
        debug!(?kind, ?from, ?to, "registry phase transition");
    }

    pub fn phase(&self, kind: RegistryKind) -> SyncPhase {
        self.phases.lock().lane(kind).phase
    }

    pub fn status(&self) -> SyncStatus {
        self.status.lock().clone()
    }

    /// Full re-rank of every held incident against the current facility list.
    ///
    /// Both registries stay read-locked until the snapshot is published, so a
    /// snapshot computed from older registry contents can never overwrite a newer one.
    pub async fn rerank(&self) -> Arc<RankingSnapshot> {
        let facilities = self.facilities.read().await;
        let incidents = self.incidents.read().await;

        let rankings = incidents
            .all()
            .iter()
            .map(|incident| IncidentRanking {
                incident: incident.clone(),
                closest: incident
                    .coordinates
                    .map(|at| geo::top_k(at, facilities.all(), self.panel_size))
                    .unwrap_or_default(),
            })
            .collect::<Vec<_>>();

        let generation = self.rankings.borrow().generation + 1;
        let snapshot = Arc::new(RankingSnapshot {
            generation,
            computed_at: Utc::now(),
            facility_count: facilities.len(),
            incidents: rankings,
        });
        self.rankings.send_replace(Arc::clone(&snapshot));
        debug!(
            generation,
            incidents = snapshot.incidents.len(),
            facilities = snapshot.facility_count,
            "published ranking snapshot"
        );
        snapshot
    }

    pub fn rankings(&self) -> Arc<RankingSnapshot> {
        Arc::clone(&self.rankings.borrow())
    }

    /// Change feed for the rendering layer.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RankingSnapshot>> {
        self.rankings.subscribe()
    }

    pub async fn facilities(&self) -> Vec<Facility> {
        self.facilities.read().await.all().to_vec()
    }

    pub async fn facility(&self, id: &str) -> Option<Facility> {
        self.facilities.read().await.get_by_id(id).cloned()
    }

    pub async fn incidents(&self) -> Vec<Incident> {
        self.incidents.read().await.all().to_vec()
    }

    pub async fn deletion_failures(&self) -> Vec<DeletionFailure> {
        self.incidents.read().await.deletion_failures()
    }

    pub async fn update_resource(
        &self,
        id: &str,
        unit: usize,
        field: ResourceField,
        value: i64,
    ) -> Result<ResourceUnit, ResourceUpdateError> {
        let updated = self
            .facilities
            .write()
            .await
            .update_resource(id, unit, field, value)
            .await?;
        self.rerank().await;
        Ok(updated)
    }

    pub async fn set_operational(
        &self,
        id: &str,
        operational: bool,
    ) -> Result<(), ResourceUpdateError> {
        self.facilities
            .write()
            .await
            .set_operational(id, operational)
            .await?;
        self.rerank().await;
        Ok(())
    }

    /// Optimistically removes an incident; see [`IncidentRegistry::remove`].
    pub async fn remove_incident(&self, key: &str) -> Option<JoinHandle<()>> {
        let handle = self.incidents.write().await.remove(key).await?;
        self.rerank().await;
        Some(handle)
    }

    /// Sets the operator location from a device fix.
    pub fn set_operator_location(&self, at: Coordinate) {
        self.place_operator(at, LocationSource::Device);
    }

    fn place_operator(&self, at: Coordinate, source: LocationSource) {
        *self.operator.write() = Some((at, source));
        info!(lat = at.lat, lon = at.lon, ?source, "operator location set");
    }

    pub fn operator_location(&self) -> Option<Coordinate> {
        (*self.operator.read()).map(|(at, _)| at)
    }

    /// Forward-geocodes `address` into the operator location. `None` means not found;
    /// the previous location is kept.
    pub async fn locate_operator(&self, address: &str) -> Option<Coordinate> {
        match self.geocoder.geocode(address).await {
            Ok(Some(at)) => {
                self.place_operator(at, LocationSource::Address);
                Some(at)
            }
            Ok(None) => {
                debug!(address, "address not found");
                None
            }
            Err(e) => {
                debug!(address, error = %e, "geocoding failed, treating address as not found");
                None
            }
        }
    }

    /// Hydrants around the operator, nearest first. `None` until a location is set.
    ///
    /// Without an explicit radius the search covers 500 m around a device fix and
    /// 2000 m around a geocoded address. A failed lookup yields an empty list.
    pub async fn hydrants_near_operator(
        &self,
        radius_meters: Option<u32>,
    ) -> Option<HydrantSearch> {
        let (operator, source) = (*self.operator.read())?;
        let radius_meters = radius_meters.unwrap_or_else(|| source.search_radius_meters());

        let found = match self.facility_source.hydrants_near(operator, radius_meters).await {
            Ok(found) => found,
            Err(e) => {
                debug!(radius_meters, error = %e, "hydrant lookup failed, reporting none nearby");
                Vec::new()
            }
        };
        let hydrants = hydrants::nearest_first(operator, found, radius_meters);
        debug!(radius_meters, len = hydrants.len(), "hydrants near operator");
        Some(HydrantSearch {
            operator,
            radius_meters,
            hydrants,
        })
    }

    pub async fn closest_to_operator(&self) -> Option<RankingEntry> {
        let origin = self.operator_location()?;
        let facilities = self.facilities.read().await;
        geo::top_k(origin, facilities.all(), 1).into_iter().next()
    }

    /// Reverse-geocodes a facility whose address is still `Unknown` and keeps the result.
    ///
    /// Returns the facility's address after the attempt, or `None` for an unknown id.
    pub async fn resolve_facility_address(&self, id: &str) -> Option<String> {
        let facility = self.facility(id).await?;
        if facility.address != UNKNOWN {
            return Some(facility.address);
        }
        let Some(at) = facility.coordinates else {
            return Some(facility.address);
        };

        let resolved = match self.geocoder.reverse_geocode(at).await {
            Ok(Some(name)) => name,
            Ok(None) => return Some(facility.address),
            Err(e) => {
                debug!(id, error = %e, "reverse geocoding failed, address stays unknown");
                return Some(facility.address);
            }
        };

        let mut registry = self.facilities.write().await;
        if let Err(e) = registry.backfill_address(id, &resolved).await {
            warn!(id, error = ?e, "failed to persist resolved facility address");
            return Some(facility.address);
        }
        let address = registry.get_by_id(id).map(|f| f.address.clone());
        drop(registry);
        self.rerank().await;
        address
    }

    /// Display address of an incident; falls back to `"<lat>, <lon>"` when geocoding fails.
    pub async fn incident_address(&self, key: &str) -> Option<String> {
        let at = self.incidents.read().await.get(key)?.coordinates;
        let Some(at) = at else {
            return Some(UNKNOWN.to_string());
        };
        match self.geocoder.reverse_geocode(at).await {
            Ok(Some(name)) => Some(name),
            Ok(None) => Some(at.to_string()),
            Err(e) => {
                debug!(key, error = %e, "reverse geocoding failed, using coordinates");
                Some(at.to_string())
            }
        }
    }
}
