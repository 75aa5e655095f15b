use dispatch_core::sources::{
    FacilitySource, Geocoder, HydrantSource, IncidentSource, SheetIncidentSource,
};
use dispatch_core::{Coordinator, PostgresBackend, StoreBackend};
use shared::osm::nominatim::NominatimClient;
use shared::osm::overpass::OverpassClient;
use std::sync::Arc;

/// The store backend and upstream sources a coordinator is built over.
pub trait Wiring: Send + Sync + 'static {
    type Backend: StoreBackend;
    type Facilities: FacilitySource + HydrantSource;
    type Incidents: IncidentSource;
    type Geocoder: Geocoder;
}

pub type CoordinatorOf<W> = Coordinator<
    <W as Wiring>::Backend,
    <W as Wiring>::Facilities,
    <W as Wiring>::Incidents,
    <W as Wiring>::Geocoder,
>;

/// Postgres plus the public OSM and SheetDB services.
pub struct Live;

impl Wiring for Live {
    type Backend = PostgresBackend;
    type Facilities = OverpassClient;
    type Incidents = SheetIncidentSource;
    type Geocoder = NominatimClient;
}

pub type LiveCoordinator = CoordinatorOf<Live>;

pub struct AppState<W: Wiring> {
    pub coordinator: Arc<CoordinatorOf<W>>,
}

impl<W: Wiring> Clone for AppState<W> {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
        }
    }
}
