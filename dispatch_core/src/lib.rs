#![warn(clippy::pedantic)]

pub mod coordinator;
pub mod error;
pub mod facilities;
pub mod geo;
pub mod hydrants;
pub mod incidents;
pub mod sources;
pub mod store;

pub use coordinator::{
    Coordinator, CoordinatorSettings, IncidentRanking, RankingSnapshot, RefreshReport, RegistryKind,
    SyncPhase, SyncStatus,
};
pub use facilities::{Facility, FacilityRegistry, ResourceDefaults, ResourceField, ResourceUnit};
pub use geo::{Coordinate, RankingEntry};
pub use hydrants::{Hydrant, HydrantSearch, LocationSource, NearbyHydrant};
pub use incidents::{Incident, IncidentKey, IncidentRegistry};
pub use store::{MemoryBackend, PostgresBackend, StateStore, StoreBackend, StoreKey};
