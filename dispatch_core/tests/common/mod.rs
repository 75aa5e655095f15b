#![allow(dead_code)]

use dispatch_core::error::SourceError;
use dispatch_core::facilities::RawFacility;
use dispatch_core::incidents::{IncidentKey, RawIncident};
use dispatch_core::sources::{FacilitySource, Geocoder, HydrantSource, IncidentSource};
use dispatch_core::error::StoreError;
use dispatch_core::{
    Coordinate, Coordinator, CoordinatorSettings, Hydrant, MemoryBackend, ResourceDefaults,
    StateStore, StoreBackend,
};
use parking_lot::Mutex;
use serde_json::json;
use shared::BoundingBox;
use shared::error::ClientError;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub type TestCoordinator = Coordinator<MemoryBackend, FakeFacilities, FakeIncidents, FakeGeocoder>;

pub fn offline(what: &str) -> SourceError {
    SourceError::Client(ClientError::UnexpectedPayload(format!("{what} offline")))
}

pub fn store() -> Arc<StateStore<MemoryBackend>> {
    Arc::new(StateStore::new(MemoryBackend::new()))
}

/// In-memory backend whose reads can be switched to fail like a timed-out pool.
#[derive(Debug, Default)]
pub struct FlakyBackend {
    pub memory: MemoryBackend,
    failing_reads: AtomicBool,
}

impl FlakyBackend {
    pub fn fail_reads(&self, failing: bool) {
        self.failing_reads.store(failing, Ordering::SeqCst);
    }
}

impl StoreBackend for FlakyBackend {
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Db(sqlx::Error::PoolTimedOut));
        }
        self.memory.read(key).await
    }

    async fn write(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.memory.write(key, value).await
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        self.memory.scan(prefix).await
    }
}

pub fn flaky_store() -> Arc<StateStore<FlakyBackend>> {
    Arc::new(StateStore::new(FlakyBackend::default()))
}

pub fn fixed_defaults() -> ResourceDefaults {
    ResourceDefaults {
        units: 3,
        level: Some(68),
    }
}

pub fn station(id: &str, name: &str, lat: f64, lon: f64) -> RawFacility {
    RawFacility {
        id: id.to_string(),
        lat: Some(lat),
        lon: Some(lon),
        tags: BTreeMap::from([("name".to_string(), name.to_string())]),
    }
}

pub fn incident(key: &str, lat: f64, lon: f64) -> RawIncident {
    RawIncident {
        lat: json!(lat.to_string()),
        lon: json!(lon.to_string()),
        strength: json!("3"),
        reported_at: Some("2025-06-01T17:03:00Z".to_string()),
        key: Some(key.to_string()),
    }
}

/// Stations around downtown San Diego, nearest to (32.73, -117.17) first.
pub fn downtown_stations() -> Vec<RawFacility> {
    vec![
        station("3", "Station 3", 32.80, -117.10),
        station("42", "Station 42", 32.72, -117.16),
        station("7", "Station 7", 32.75, -117.20),
    ]
}

/// Facility and hydrant source whose next answer can be swapped through any clone;
/// `None` simulates an outage.
#[derive(Clone, Default)]
pub struct FakeFacilities {
    records: Arc<Mutex<Option<Vec<RawFacility>>>>,
    hydrants: Arc<Mutex<Option<Vec<Hydrant>>>>,
    hydrant_radii: Arc<Mutex<Vec<u32>>>,
}

impl FakeFacilities {
    pub fn with(records: Vec<RawFacility>) -> Self {
        let source = Self::default();
        source.set(Some(records));
        source
    }

    pub fn offline() -> Self {
        Self::default()
    }

    pub fn set(&self, records: Option<Vec<RawFacility>>) {
        *self.records.lock() = records;
    }

    pub fn set_hydrants(&self, hydrants: Option<Vec<Hydrant>>) {
        *self.hydrants.lock() = hydrants;
    }

    /// Radii of every hydrant search so far.
    pub fn hydrant_radii(&self) -> Vec<u32> {
        self.hydrant_radii.lock().clone()
    }
}

impl FacilitySource for FakeFacilities {
    async fn fetch_facilities(&self, _bounds: &BoundingBox) -> Result<Vec<RawFacility>, SourceError> {
        self.records.lock().clone().ok_or_else(|| offline("facility source"))
    }
}

impl HydrantSource for FakeFacilities {
    async fn hydrants_near(
        &self,
        _at: Coordinate,
        radius_meters: u32,
    ) -> Result<Vec<Hydrant>, SourceError> {
        self.hydrant_radii.lock().push(radius_meters);
        self.hydrants.lock().clone().ok_or_else(|| offline("hydrant source"))
    }
}

pub fn hydrant(id: &str, lat: f64, lon: f64) -> Hydrant {
    Hydrant {
        id: id.to_string(),
        coordinates: Coordinate::new(lat, lon).unwrap(),
        hydrant_type: Some("pillar".to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteBehavior {
    #[default]
    Succeed,
    Fail,
    /// The remote call never resolves.
    Hang,
}

#[derive(Default)]
pub struct FakeIncidents {
    rows: Mutex<Option<Vec<RawIncident>>>,
    behavior: Mutex<DeleteBehavior>,
    deleted: Mutex<Vec<IncidentKey>>,
}

impl FakeIncidents {
    pub fn with(rows: Vec<RawIncident>) -> Self {
        Self {
            rows: Mutex::new(Some(rows)),
            ..Self::default()
        }
    }

    pub fn deleting(self, behavior: DeleteBehavior) -> Self {
        *self.behavior.lock() = behavior;
        self
    }

    pub fn set(&self, rows: Option<Vec<RawIncident>>) {
        *self.rows.lock() = rows;
    }

    pub fn deleted(&self) -> Vec<IncidentKey> {
        self.deleted.lock().clone()
    }
}

impl IncidentSource for FakeIncidents {
    async fn fetch_incidents(&self) -> Result<Vec<RawIncident>, SourceError> {
        self.rows.lock().clone().ok_or_else(|| offline("incident source"))
    }

    async fn delete_incident(&self, key: &IncidentKey) -> Result<(), SourceError> {
        let behavior = *self.behavior.lock();
        match behavior {
            DeleteBehavior::Succeed => {
                self.deleted.lock().push(key.clone());
                Ok(())
            }
            DeleteBehavior::Fail => Err(offline("incident sheet")),
            DeleteBehavior::Hang => std::future::pending().await,
        }
    }
}

/// Geocoder answering from fixed tables; anything else is an outage.
#[derive(Default)]
pub struct FakeGeocoder {
    pub addresses: BTreeMap<String, Coordinate>,
    pub display_name: Option<String>,
}

impl FakeGeocoder {
    pub fn knowing(address: &str, at: Coordinate) -> Self {
        Self {
            addresses: BTreeMap::from([(address.to_string(), at)]),
            display_name: None,
        }
    }

    pub fn naming(display_name: &str) -> Self {
        Self {
            addresses: BTreeMap::new(),
            display_name: Some(display_name.to_string()),
        }
    }
}

impl Geocoder for FakeGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<Coordinate>, SourceError> {
        if self.addresses.is_empty() {
            return Err(offline("geocoder"));
        }
        Ok(self.addresses.get(address).copied())
    }

    async fn reverse_geocode(&self, _at: Coordinate) -> Result<Option<String>, SourceError> {
        self.display_name.clone().map(Some).ok_or_else(|| offline("geocoder"))
    }
}

pub fn settings() -> CoordinatorSettings {
    CoordinatorSettings {
        bounds: shared::Config::default().region,
        panel_size: 2,
        resource_defaults: fixed_defaults(),
    }
}

pub fn coordinator(
    facilities: FakeFacilities,
    incidents: FakeIncidents,
    geocoder: FakeGeocoder,
) -> TestCoordinator {
    Coordinator::new(settings(), store(), facilities, incidents, geocoder)
}
