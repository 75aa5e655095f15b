use crate::error::{ResourceUpdateError, StoreError};
use crate::geo::Coordinate;
use crate::store::{Namespace, StateStore, StoreBackend, StoreKey};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const UNKNOWN: &str = "Unknown";
pub const UNNAMED_STATION: &str = "Unnamed Station";
pub const MAX_LEVEL: u8 = 100;

/// A facility record as the registry source hands it over, before any merging.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFacility {
    pub id: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub tags: BTreeMap<String, String>,
}

impl RawFacility {
    fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceUnit {
    pub fuel: u8,
    pub water: u8,
}

impl ResourceUnit {
    fn set(&mut self, field: ResourceField, level: u8) {
        match field {
            ResourceField::Fuel => self.fuel = level,
            ResourceField::Water => self.water = level,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceField {
    Fuel,
    Water,
}

impl Display for ResourceField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceField::Fuel => write!(f, "fuel"),
            ResourceField::Water => write!(f, "water"),
        }
    }
}

/// How units are synthesized for a facility that has no persisted resource state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDefaults {
    pub units: usize,
    /// `None` draws each level uniformly from `0..=100`.
    pub level: Option<u8>,
}

impl Default for ResourceDefaults {
    fn default() -> Self {
        Self {
            units: 3,
            level: None,
        }
    }
}

impl ResourceDefaults {
    pub fn synthesize(&self) -> Vec<ResourceUnit> {
        let mut rng = rand::rng();
        let mut level = || match self.level {
            Some(level) => level.min(MAX_LEVEL),
            None => rng.random_range(0..=MAX_LEVEL),
        };
        (0..self.units.max(1))
            .map(|_| ResourceUnit {
                fuel: level(),
                water: level(),
            })
            .collect()
    }
}

/// Persisted under `facility-metadata:<id>`. Always overwritten by the latest fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilityMetadata {
    pub name: String,
    pub address: String,
    pub phone: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl FacilityMetadata {
    pub fn from_raw(raw: &RawFacility) -> Self {
        Self {
            name: raw.tag("name").unwrap_or(UNNAMED_STATION).to_string(),
            address: compose_address(raw),
            phone: raw
                .tag("phone")
                .or_else(|| raw.tag("contact:phone"))
                .unwrap_or(UNKNOWN)
                .to_string(),
            lat: raw.lat,
            lon: raw.lon,
        }
    }
}

/// Persisted under `facility-resources:<id>`. Owned by the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    #[serde(default = "operational_default")]
    pub operational: bool,
    pub resources: Vec<ResourceUnit>,
}

const fn operational_default() -> bool {
    true
}

impl ResourceState {
    fn synthesized(defaults: &ResourceDefaults) -> Self {
        Self {
            operational: true,
            resources: defaults.synthesize(),
        }
    }

    fn is_valid(&self) -> bool {
        !self.resources.is_empty()
            && self
                .resources
                .iter()
                .all(|u| u.fuel <= MAX_LEVEL && u.water <= MAX_LEVEL)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Facility {
    pub id: String,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub coordinates: Option<Coordinate>,
    pub operational: bool,
    pub resources: Vec<ResourceUnit>,
}

impl Facility {
    fn assemble(id: String, metadata: FacilityMetadata, state: ResourceState) -> Self {
        let coordinates = match (metadata.lat, metadata.lon) {
            (Some(lat), Some(lon)) => Coordinate::new(lat, lon),
            _ => None,
        };
        Self {
            id,
            name: metadata.name,
            address: metadata.address,
            phone: metadata.phone,
            coordinates,
            operational: state.operational,
            resources: state.resources,
        }
    }

    fn metadata(&self) -> FacilityMetadata {
        FacilityMetadata {
            name: self.name.clone(),
            address: self.address.clone(),
            phone: self.phone.clone(),
            lat: self.coordinates.map(|c| c.lat),
            lon: self.coordinates.map(|c| c.lon),
        }
    }

    fn resource_state(&self) -> ResourceState {
        ResourceState {
            operational: self.operational,
            resources: self.resources.clone(),
        }
    }
}

/// Address by priority: full-address tag, generic address tag, composed
/// `housenumber street, city, postcode`, then the `Unknown` sentinel.
pub fn compose_address(raw: &RawFacility) -> String {
    if let Some(address) = raw.tag("addr:full").or_else(|| raw.tag("address")) {
        return address.to_string();
    }

    let street_line = [raw.tag("addr:housenumber"), raw.tag("addr:street")]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    let parts = [
        Some(street_line.as_str()).filter(|s| !s.is_empty()),
        raw.tag("addr:city"),
        raw.tag("addr:postcode"),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>();

    if parts.is_empty() {
        UNKNOWN.to_string()
    } else {
        parts.join(", ")
    }
}

/// In-memory index of facilities, merged with operator state from the store.
pub struct FacilityRegistry<B> {
    store: Arc<StateStore<B>>,
    defaults: ResourceDefaults,
    facilities: Vec<Facility>,
    index: HashMap<String, usize>,
}

impl<B: StoreBackend> FacilityRegistry<B> {
    pub fn new(store: Arc<StateStore<B>>, defaults: ResourceDefaults) -> Self {
        Self {
            store,
            defaults,
            facilities: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Replaces the registry with `records`, keeping persisted operator state per id.
    ///
    /// Metadata always comes from the fetch; resources and the operational flag come
    /// from the store when a valid record exists. The new index is swapped in only
    /// once every record has been merged.
    pub async fn load(&mut self, records: Vec<RawFacility>) -> usize {
        let mut facilities: Vec<Facility> = Vec::with_capacity(records.len());
        let mut index = HashMap::with_capacity(records.len());

        for raw in records {
            let metadata = FacilityMetadata::from_raw(&raw);
            let state = self.resource_state_or_default(&raw.id).await;
            if let Err(e) = self
                .store
                .set(&StoreKey::FacilityMetadata(&raw.id), &metadata)
                .await
            {
                warn!(id = raw.id, error = ?e, "failed to persist facility metadata");
            }

            let facility = Facility::assemble(raw.id, metadata, state);
            if let Some(&pos) = index.get(&facility.id) {
                debug!(id = facility.id, "duplicate facility id in fetch, keeping the later record");
                facilities[pos] = facility;
            } else {
                index.insert(facility.id.clone(), facilities.len());
                facilities.push(facility);
            }
        }

        self.facilities = facilities;
        self.index = index;
        info!(len = self.facilities.len(), "facility registry loaded");
        self.facilities.len()
    }

    /// Rebuilds the registry from the store alone. Facilities come back ordered by id.
    pub async fn restore(&mut self) -> usize {
        let stored = self
            .store
            .namespace::<FacilityMetadata>(Namespace::FacilityMetadata)
            .await;

        let mut facilities = Vec::with_capacity(stored.len());
        let mut index = HashMap::with_capacity(stored.len());
        for (id, metadata) in stored {
            let state = self.resource_state_or_default(&id).await;
            index.insert(id.clone(), facilities.len());
            facilities.push(Facility::assemble(id, metadata, state));
        }

        self.facilities = facilities;
        self.index = index;
        debug!(len = self.facilities.len(), "facility registry restored from store");
        self.facilities.len()
    }

    /// Persisted state when it is readable and valid, otherwise defaults.
    ///
    /// Synthesized defaults are written back only when the store answered. When the read
    /// itself fails, the facility keeps what it currently holds in memory, or gets
    /// transient defaults that are never persisted.
    async fn resource_state_or_default(&self, id: &str) -> ResourceState {
        let key = StoreKey::FacilityResources(id);
        let persisted = match self.store.try_get::<ResourceState>(&key).await {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(id, error = ?e, "resource state unreadable, keeping current values");
                return self.get_by_id(id).map_or_else(
                    || ResourceState::synthesized(&self.defaults),
                    Facility::resource_state,
                );
            }
        };

        match persisted {
            Some(state) if state.is_valid() => state,
            persisted => {
                if persisted.is_some() {
                    warn!(id, "persisted resource state is out of range, resynthesizing");
                }
                let state = ResourceState::synthesized(&self.defaults);
                if let Err(e) = self.store.set(&key, &state).await {
                    warn!(id, error = ?e, "failed to persist synthesized resource state");
                }
                state
            }
        }
    }

    pub fn get_by_id(&self, id: &str) -> Option<&Facility> {
        self.index.get(id).map(|&pos| &self.facilities[pos])
    }

    /// Facilities in fetch order.
    pub fn all(&self) -> &[Facility] {
        &self.facilities
    }

    pub fn len(&self) -> usize {
        self.facilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facilities.is_empty()
    }

    /// Sets one level of one unit and persists it. On any error nothing changes.
    pub async fn update_resource(
        &mut self,
        id: &str,
        unit: usize,
        field: ResourceField,
        value: i64,
    ) -> Result<ResourceUnit, ResourceUpdateError> {
        let result = self.try_update_resource(id, unit, field, value).await;
        match &result {
            Ok(updated) => {
                info!(id, unit, %field, value, fuel = updated.fuel, water = updated.water, "resource level updated");
            }
            Err(e) => warn!(id, unit, %field, value, error = %e, "resource update rejected"),
        }
        result
    }

    async fn try_update_resource(
        &mut self,
        id: &str,
        unit: usize,
        field: ResourceField,
        value: i64,
    ) -> Result<ResourceUnit, ResourceUpdateError> {
        let level = u8::try_from(value)
            .ok()
            .filter(|level| *level <= MAX_LEVEL)
            .ok_or(ResourceUpdateError::OutOfRange { field, value })?;
        let pos = *self
            .index
            .get(id)
            .ok_or_else(|| ResourceUpdateError::UnknownFacility(id.to_string()))?;

        let mut next = self.facilities[pos].resource_state();
        let target = next
            .resources
            .get_mut(unit)
            .ok_or_else(|| ResourceUpdateError::UnknownUnit {
                id: id.to_string(),
                unit,
            })?;
        target.set(field, level);
        let updated = *target;

        self.store
            .set(&StoreKey::FacilityResources(id), &next)
            .await?;
        self.facilities[pos].resources = next.resources;
        Ok(updated)
    }

    pub async fn set_operational(
        &mut self,
        id: &str,
        operational: bool,
    ) -> Result<(), ResourceUpdateError> {
        let pos = *self
            .index
            .get(id)
            .ok_or_else(|| ResourceUpdateError::UnknownFacility(id.to_string()))?;

        let mut next = self.facilities[pos].resource_state();
        next.operational = operational;
        self.store
            .set(&StoreKey::FacilityResources(id), &next)
            .await?;
        self.facilities[pos].operational = operational;
        info!(id, operational, "facility operational flag updated");
        Ok(())
    }

    /// Replaces an `Unknown` address with `address`. Returns whether anything changed.
    pub async fn backfill_address(&mut self, id: &str, address: &str) -> Result<bool, StoreError> {
        let Some(&pos) = self.index.get(id) else {
            return Ok(false);
        };
        if self.facilities[pos].address != UNKNOWN || address.trim().is_empty() {
            return Ok(false);
        }

        let mut metadata = self.facilities[pos].metadata();
        metadata.address = address.to_string();
        self.store
            .set(&StoreKey::FacilityMetadata(id), &metadata)
            .await?;
        self.facilities[pos].address = metadata.address;
        Ok(true)
    }
}
