#![warn(clippy::pedantic)]
mod error;
mod state;
mod v1;

use crate::error::MainError;
use crate::state::{AppState, Live, LiveCoordinator, Wiring};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use dispatch_core::coordinator::CoordinatorSettings;
use dispatch_core::sources::SheetIncidentSource;
use dispatch_core::{Coordinator, PostgresBackend, ResourceDefaults, StateStore};
use shared::error::{ClientError, InitializationError};
use shared::osm::nominatim::NominatimClient;
use shared::osm::overpass::OverpassClient;
use shared::sheetdb::SheetDbClient;
use shared::{Config, init_tracing, initialize_db, load_config, shutdown_listener};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), MainError> {
    init_tracing()?;

    let config = load_config().unwrap_or_else(|e| {
        error!(error = ?e, "configuration could not be initialized");
        panic!("configuration could not be initialized");
    });

    let db_pool = initialize_db(&config.postgres, true).await?;
    let coordinator = Arc::new(build_coordinator(&config, PostgresBackend::new(db_pool))?);

    let restored = coordinator.restore().await;
    info!(
        incidents = restored.incidents.len(),
        facilities = restored.facility_count,
        "serving restored state until the first refresh completes"
    );

    // Cancellation token shared across tasks; listener cancels on SIGINT/SIGTERM.
    let shutdown_token = CancellationToken::new();
    let signal_handle = tokio::spawn(shutdown_listener(Some(shutdown_token.clone())));

    let refresh_handle = tokio::spawn(refresh_loop(
        Arc::clone(&coordinator),
        config.dispatch.refresh_interval_seconds.map(Duration::from_secs),
        shutdown_token.clone(),
    ));

    let axum_handle = tokio::spawn(run_server(
        AppState::<Live> { coordinator },
        config.dispatch.listen_addr.clone(),
        shutdown_token.clone(),
    ));

    tokio::select! {
        res = axum_handle => {
            shutdown_token.cancel();
            res??;
        }
        res = refresh_handle => {
            shutdown_token.cancel();
            res?;
        }
        res = signal_handle => {
            shutdown_token.cancel();
            res?;
        }
    }

    Ok(())
}

fn build_coordinator(
    config: &Config,
    backend: PostgresBackend,
) -> Result<LiveCoordinator, InitializationError> {
    let http_client = reqwest::Client::builder()
        .user_agent(config.sources.user_agent.as_str())
        .build()
        .map_err(ClientError::from)?;

    let sheet = SheetDbClient::new_with_client(http_client.clone(), &config.sources.sheetdb_url)?;
    let settings = CoordinatorSettings {
        bounds: config.region,
        panel_size: config.dispatch.panel_size,
        resource_defaults: ResourceDefaults {
            units: config.resources.units,
            level: config.resources.default_level,
        },
    };

    Ok(Coordinator::new(
        settings,
        Arc::new(StateStore::new(backend)),
        OverpassClient::new_with_client(http_client.clone(), config.sources.overpass_url.clone()),
        SheetIncidentSource::new(sheet, config.sources.incident_key_column.clone()),
        NominatimClient::new_with_client(http_client, config.sources.nominatim_url.clone()),
    ))
}

/// Refreshes both registries on startup, then on every interval tick if one is configured.
async fn refresh_loop(
    coordinator: Arc<LiveCoordinator>,
    interval: Option<Duration>,
    shutdown: CancellationToken,
) {
    info!(?interval, "initialized refresh loop");
    loop {
        let report = coordinator.refresh_all().await;
        info!(
            facilities = ?report.facilities,
            incidents = ?report.incidents,
            "refresh cycle finished"
        );

        let Some(interval) = interval else {
            shutdown.cancelled().await;
            break;
        };
        tokio::select! {
            () = sleep(interval) => {},
            () = shutdown.cancelled() => {
                info!("shutdown requested, exiting refresh loop");
                break;
            }
        }
    }
}

fn app<W: Wiring>(state: AppState<W>) -> Router {
    Router::new()
        .route("/health", get(health_check::<W>))
        .nest("/v1", v1::router::<W>())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn run_server(
    state: AppState<Live>,
    listen_addr: String,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let router = app(state);

    info!("starting server at {listen_addr}");
    let listener = TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await?;
    Ok(())
}

/// 200 once either registry has refreshed successfully, 503 before that.
async fn health_check<W: Wiring>(State(state): State<AppState<W>>) -> impl IntoResponse {
    let status = state.coordinator.status();
    let healthy =
        status.facilities.last_success.is_some() || status.incidents.last_success.is_some();
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}
