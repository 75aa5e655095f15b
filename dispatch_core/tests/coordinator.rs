mod common;

use common::{
    DeleteBehavior, FakeFacilities, FakeGeocoder, FakeIncidents, coordinator, downtown_stations,
    hydrant, incident, station,
};
use dispatch_core::facilities::UNKNOWN;
use dispatch_core::geo::round_tenth;
use dispatch_core::incidents::RawIncident;
use dispatch_core::{Coordinate, RegistryKind, ResourceField, SyncPhase};
use serde_json::json;

fn closest_ids(snapshot: &dispatch_core::RankingSnapshot, key: &str) -> Vec<String> {
    snapshot
        .incidents
        .iter()
        .find(|ranking| ranking.incident.key.value == key)
        .map(|ranking| {
            ranking
                .closest
                .iter()
                .map(|entry| entry.facility.id.clone())
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn incidents_ranked_before_facilities_are_reranked() {
    let coordinator = coordinator(
        FakeFacilities::with(downtown_stations()),
        FakeIncidents::with(vec![incident("incident-7", 32.73, -117.17)]),
        FakeGeocoder::default(),
    );
    assert_eq!(coordinator.rankings().generation, 0);

    coordinator.refresh_incidents().await.unwrap();
    let stale = coordinator.rankings();
    assert_eq!(stale.incidents.len(), 1);
    assert!(stale.incidents[0].closest.is_empty());

    coordinator.refresh_facilities().await.unwrap();
    let fresh = coordinator.rankings();
    assert!(fresh.generation > stale.generation);
    assert_eq!(fresh.facility_count, 3);
    assert_eq!(closest_ids(&fresh, "incident-7"), ["42", "7"]);

    let nearest = &fresh.incidents[0].closest[0];
    assert_eq!(round_tenth(nearest.distance_miles), 0.9);
}

#[tokio::test]
async fn refresh_all_loads_both_registries_and_returns_to_idle() {
    let coordinator = coordinator(
        FakeFacilities::with(downtown_stations()),
        FakeIncidents::with(vec![
            incident("incident-7", 32.73, -117.17),
            incident("incident-8", 32.81, -117.09),
        ]),
        FakeGeocoder::default(),
    );

    let report = coordinator.refresh_all().await;
    assert_eq!(report.facilities, Some(3));
    assert_eq!(report.incidents, Some(2));

    let snapshot = coordinator.rankings();
    assert_eq!(closest_ids(&snapshot, "incident-7"), ["42", "7"]);
    assert_eq!(closest_ids(&snapshot, "incident-8")[0], "3");

    assert_eq!(coordinator.phase(RegistryKind::Facilities), SyncPhase::Idle);
    assert_eq!(coordinator.phase(RegistryKind::Incidents), SyncPhase::Idle);

    let status = coordinator.status();
    assert!(status.facilities.last_success.is_some());
    assert!(status.incidents.last_error.is_none());
}

#[tokio::test]
async fn overlapping_refreshes_settle_to_idle() {
    let facilities = FakeFacilities::with(downtown_stations());
    let coordinator = coordinator(
        facilities.clone(),
        FakeIncidents::with(vec![incident("incident-7", 32.73, -117.17)]),
        FakeGeocoder::default(),
    );

    let (first, second) = tokio::join!(coordinator.refresh_all(), coordinator.refresh_all());
    assert_eq!(first.facilities, Some(3));
    assert_eq!(second.facilities, Some(3));
    assert_eq!(coordinator.phase(RegistryKind::Facilities), SyncPhase::Idle);
    assert_eq!(coordinator.phase(RegistryKind::Incidents), SyncPhase::Idle);

    facilities.set(None);
    let (failed, _) = tokio::join!(coordinator.refresh_facilities(), coordinator.refresh_incidents());
    assert!(failed.is_err());
    assert_eq!(coordinator.phase(RegistryKind::Facilities), SyncPhase::Idle);
    assert_eq!(coordinator.rankings().facility_count, 3);
}

#[tokio::test]
async fn subscribers_see_every_rerank() {
    let coordinator = coordinator(
        FakeFacilities::with(downtown_stations()),
        FakeIncidents::with(vec![incident("incident-7", 32.73, -117.17)]),
        FakeGeocoder::default(),
    );
    let mut feed = coordinator.subscribe();

    coordinator.refresh_all().await;
    assert!(feed.has_changed().unwrap());
    let seen = feed.borrow_and_update().clone();
    assert_eq!(seen.incidents.len(), 1);
    assert_eq!(closest_ids(&seen, "incident-7"), ["42", "7"]);

    coordinator
        .update_resource("42", 0, ResourceField::Water, 10)
        .await
        .unwrap();
    assert!(feed.has_changed().unwrap());
    let seen = feed.borrow_and_update().clone();
    assert_eq!(seen.incidents[0].closest[0].facility.resources[0].water, 10);
}

#[tokio::test]
async fn failed_fetch_keeps_previous_contents() {
    let facilities = FakeFacilities::with(downtown_stations());
    let coordinator = coordinator(
        facilities.clone(),
        FakeIncidents::with(vec![incident("incident-7", 32.73, -117.17)]),
        FakeGeocoder::default(),
    );
    coordinator.refresh_all().await;
    let before = coordinator.rankings();

    facilities.set(None);
    let report = coordinator.refresh_all().await;
    assert_eq!(report.facilities, None);
    assert_eq!(report.incidents, Some(1));

    assert_eq!(coordinator.facilities().await.len(), 3);
    assert_eq!(coordinator.phase(RegistryKind::Facilities), SyncPhase::Idle);
    assert_eq!(
        closest_ids(&coordinator.rankings(), "incident-7"),
        closest_ids(&before, "incident-7")
    );

    facilities.set(Some(vec![station("9", "Station 9", 32.731, -117.171)]));
    coordinator.refresh_facilities().await.unwrap();
    assert_eq!(closest_ids(&coordinator.rankings(), "incident-7"), ["9"]);
}

#[tokio::test]
async fn outage_leaves_registry_stale_and_idle() {
    let facilities = FakeFacilities::with(downtown_stations());
    let coordinator = coordinator(facilities, FakeIncidents::default(), FakeGeocoder::default());
    coordinator.refresh_facilities().await.unwrap();
    assert!(coordinator.refresh_incidents().await.is_err());
    assert!(coordinator.incidents().await.is_empty());

    let status = coordinator.status();
    assert!(status.incidents.last_success.is_none());
    assert!(
        status
            .incidents
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("offline"))
    );
    assert_eq!(coordinator.phase(RegistryKind::Incidents), SyncPhase::Idle);
    assert_eq!(coordinator.facilities().await.len(), 3);
}

#[tokio::test]
async fn removing_an_incident_drops_its_ranking() {
    let coordinator = coordinator(
        FakeFacilities::with(downtown_stations()),
        FakeIncidents::with(vec![
            incident("incident-7", 32.73, -117.17),
            incident("incident-8", 32.81, -117.09),
        ])
        .deleting(DeleteBehavior::Hang),
        FakeGeocoder::default(),
    );
    coordinator.refresh_all().await;

    let remote = coordinator.remove_incident("incident-7").await.unwrap();
    let snapshot = coordinator.rankings();
    assert_eq!(snapshot.incidents.len(), 1);
    assert_eq!(snapshot.incidents[0].incident.key.value, "incident-8");
    assert!(coordinator.remove_incident("incident-7").await.is_none());
    remote.abort();
}

#[tokio::test]
async fn failed_remote_delete_shows_up_in_ledger() {
    let coordinator = coordinator(
        FakeFacilities::with(downtown_stations()),
        FakeIncidents::with(vec![incident("incident-7", 32.73, -117.17)])
            .deleting(DeleteBehavior::Fail),
        FakeGeocoder::default(),
    );
    coordinator.refresh_all().await;

    coordinator
        .remove_incident("incident-7")
        .await
        .unwrap()
        .await
        .unwrap();
    let failures = coordinator.deletion_failures().await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].key, "incident-7");
}

#[tokio::test]
async fn unplaced_incidents_get_an_empty_ranking() {
    let coordinator = coordinator(
        FakeFacilities::with(downtown_stations()),
        FakeIncidents::with(vec![RawIncident {
            lat: json!("0"),
            lon: json!("0"),
            strength: json!("1"),
            reported_at: None,
            key: Some("incident-0".to_string()),
        }]),
        FakeGeocoder::default(),
    );
    coordinator.refresh_all().await;

    let snapshot = coordinator.rankings();
    assert_eq!(snapshot.incidents.len(), 1);
    assert!(snapshot.incidents[0].closest.is_empty());
    assert_eq!(
        coordinator.incident_address("incident-0").await.as_deref(),
        Some(UNKNOWN)
    );
}

#[tokio::test]
async fn operator_location_finds_the_closest_facility() {
    let downtown = Coordinate {
        lat: 32.73,
        lon: -117.17,
    };
    let coordinator = coordinator(
        FakeFacilities::with(downtown_stations()),
        FakeIncidents::default(),
        FakeGeocoder::knowing("1010 Second Ave, San Diego", downtown),
    );
    coordinator.refresh_facilities().await.unwrap();
    assert!(coordinator.closest_to_operator().await.is_none());

    assert!(coordinator.locate_operator("nowhere").await.is_none());
    assert_eq!(coordinator.operator_location(), None);

    assert_eq!(
        coordinator
            .locate_operator("1010 Second Ave, San Diego")
            .await,
        Some(downtown)
    );
    let closest = coordinator.closest_to_operator().await.unwrap();
    assert_eq!(closest.facility.id, "42");

    coordinator.set_operator_location(Coordinate {
        lat: 32.80,
        lon: -117.10,
    });
    assert_eq!(coordinator.closest_to_operator().await.unwrap().facility.id, "3");
}

#[tokio::test]
async fn geocoder_outage_keeps_operator_location() {
    let coordinator = coordinator(
        FakeFacilities::with(downtown_stations()),
        FakeIncidents::default(),
        FakeGeocoder::default(),
    );
    let here = Coordinate {
        lat: 32.75,
        lon: -117.20,
    };
    coordinator.set_operator_location(here);
    assert!(coordinator.locate_operator("anywhere").await.is_none());
    assert_eq!(coordinator.operator_location(), Some(here));
}

#[tokio::test]
async fn hydrant_radius_follows_how_the_operator_was_located() {
    let downtown = Coordinate {
        lat: 32.73,
        lon: -117.17,
    };
    let source = FakeFacilities::with(downtown_stations());
    source.set_hydrants(Some(vec![
        hydrant("far", 32.745, -117.17),
        hydrant("near", 32.7302, -117.17),
    ]));
    let coordinator = coordinator(
        source.clone(),
        FakeIncidents::default(),
        FakeGeocoder::knowing("1010 Second Ave, San Diego", downtown),
    );
    assert!(coordinator.hydrants_near_operator(None).await.is_none());
    assert!(source.hydrant_radii().is_empty());

    coordinator.set_operator_location(downtown);
    let device = coordinator.hydrants_near_operator(None).await.unwrap();
    assert_eq!(device.radius_meters, 500);
    assert_eq!(device.operator, downtown);
    let ids = device.hydrants.iter().map(|h| h.hydrant.id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, ["near"]);

    coordinator.locate_operator("1010 Second Ave, San Diego").await;
    let address = coordinator.hydrants_near_operator(None).await.unwrap();
    assert_eq!(address.radius_meters, 2000);
    let ids = address.hydrants.iter().map(|h| h.hydrant.id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, ["near", "far"]);

    let custom = coordinator.hydrants_near_operator(Some(50)).await.unwrap();
    assert_eq!(custom.radius_meters, 50);
    assert_eq!(custom.hydrants.len(), 1);
    assert_eq!(source.hydrant_radii(), [500, 2000, 50]);
}

#[tokio::test]
async fn hydrant_outage_reports_none_nearby() {
    let here = Coordinate {
        lat: 32.75,
        lon: -117.20,
    };
    let coordinator = coordinator(
        FakeFacilities::with(downtown_stations()),
        FakeIncidents::default(),
        FakeGeocoder::default(),
    );
    coordinator.set_operator_location(here);

    let search = coordinator.hydrants_near_operator(None).await.unwrap();
    assert!(search.hydrants.is_empty());
    assert_eq!(coordinator.operator_location(), Some(here));
}

#[tokio::test]
async fn unknown_facility_address_is_backfilled() {
    let coordinator = coordinator(
        FakeFacilities::with(downtown_stations()),
        FakeIncidents::default(),
        FakeGeocoder::naming("1222 1st Ave, San Diego, CA 92101"),
    );
    coordinator.refresh_facilities().await.unwrap();

    assert_eq!(
        coordinator.resolve_facility_address("42").await.as_deref(),
        Some("1222 1st Ave, San Diego, CA 92101")
    );
    assert_eq!(
        coordinator.facility("42").await.unwrap().address,
        "1222 1st Ave, San Diego, CA 92101"
    );
    assert!(coordinator.resolve_facility_address("404").await.is_none());
}

#[tokio::test]
async fn geocoder_outage_keeps_unknown_address() {
    let coordinator = coordinator(
        FakeFacilities::with(vec![station("42", "Station 42", 32.72, -117.16)]),
        FakeIncidents::with(vec![incident("incident-7", 32.73, -117.17)]),
        FakeGeocoder::default(),
    );
    coordinator.refresh_all().await;

    assert_eq!(
        coordinator.resolve_facility_address("42").await.as_deref(),
        Some(UNKNOWN)
    );
    assert_eq!(
        coordinator.incident_address("incident-7").await.as_deref(),
        Some("32.73, -117.17")
    );
    assert!(coordinator.incident_address("incident-404").await.is_none());
}

#[tokio::test]
async fn incident_address_uses_reverse_geocoding() {
    let coordinator = coordinator(
        FakeFacilities::default(),
        FakeIncidents::with(vec![incident("incident-7", 32.73, -117.17)]),
        FakeGeocoder::naming("Balboa Park, San Diego"),
    );
    coordinator.refresh_incidents().await.unwrap();
    assert_eq!(
        coordinator.incident_address("incident-7").await.as_deref(),
        Some("Balboa Park, San Diego")
    );
}

#[tokio::test]
async fn restore_rebuilds_rankings_from_store() {
    let store = common::store();
    let first = dispatch_core::Coordinator::new(
        common::settings(),
        store.clone(),
        FakeFacilities::with(downtown_stations()),
        FakeIncidents::with(vec![incident("incident-7", 32.73, -117.17)]),
        FakeGeocoder::default(),
    );
    first.refresh_all().await;
    first
        .set_operational("42", false)
        .await
        .unwrap();

    let second = dispatch_core::Coordinator::new(
        common::settings(),
        store,
        FakeFacilities::offline(),
        FakeIncidents::default(),
        FakeGeocoder::default(),
    );
    let snapshot = second.restore().await;
    assert_eq!(snapshot.facility_count, 3);
    assert_eq!(closest_ids(&snapshot, "incident-7"), ["42", "7"]);
    assert!(!second.facility("42").await.unwrap().operational);
}
