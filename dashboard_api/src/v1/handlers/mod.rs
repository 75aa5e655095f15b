use crate::state::{AppState, Wiring};
use axum::Json;
use axum::extract::State;
use dispatch_core::{RankingSnapshot, RefreshReport};
use tracing::info;

pub mod facilities;
pub mod incidents;
pub mod operator;

pub async fn get_rankings<W: Wiring>(State(state): State<AppState<W>>) -> Json<RankingSnapshot> {
    Json(RankingSnapshot::clone(&state.coordinator.rankings()))
}

pub async fn post_refresh<W: Wiring>(State(state): State<AppState<W>>) -> Json<RefreshReport> {
    info!("refresh requested");
    Json(state.coordinator.refresh_all().await)
}
