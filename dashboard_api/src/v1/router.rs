use crate::state::{AppState, Wiring};
use crate::v1::handlers::facilities::{
    get_facilities, get_facility, put_operational, put_resource_level, resolve_address,
};
use crate::v1::handlers::incidents::{
    delete_incident, get_deletion_failures, get_incident_address, get_incidents,
};
use crate::v1::handlers::operator::{get_closest_facility, get_hydrants, put_operator_location};
use crate::v1::handlers::{get_rankings, post_refresh};
use axum::Router;
use axum::routing::{delete, get, post, put};

pub fn router<W: Wiring>() -> Router<AppState<W>> {
    Router::<AppState<W>>::new()
        .route("/facilities", get(get_facilities::<W>))
        .route("/facilities/{id}", get(get_facility::<W>))
        .route(
            "/facilities/{id}/units/{unit}/{field}",
            put(put_resource_level::<W>),
        )
        .route("/facilities/{id}/operational", put(put_operational::<W>))
        .route("/facilities/{id}/address", post(resolve_address::<W>))
        .route("/incidents", get(get_incidents::<W>))
        .route("/incidents/deletion-failures", get(get_deletion_failures::<W>))
        .route("/incidents/{key}", delete(delete_incident::<W>))
        .route("/incidents/{key}/address", get(get_incident_address::<W>))
        .route("/rankings", get(get_rankings::<W>))
        .route("/operator/location", put(put_operator_location::<W>))
        .route("/operator/closest", get(get_closest_facility::<W>))
        .route("/operator/hydrants", get(get_hydrants::<W>))
        .route("/refresh", post(post_refresh::<W>))
}
