use crate::app_state::SharedAppState;
use crate::catalog::Snapshot;
use crate::error::DisclosureError;
use crate::metrics;
use crate::models::DateWindow;
use crate::validated_query::ValidatedQuery;

use std::path::Path;

use axum::{
    extract::{Path as UrlPath, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower::Layer;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Statistics service type, with trailing slashes removed from request paths.
pub type Service = NormalizePath<Router>;

/// Returns a [axum::Router] for the statistics API.
///
/// # Arguments
///
/// * `state`: Shared application state, loaded or not
pub fn router(state: SharedAppState) -> Router {
    fn v1() -> Router<SharedAppState> {
        Router::new()
            .route("/stats", get(list_stats))
            .route("/stats/:event_type", get(list_stats_by_event_type))
            .route("/event-types", get(list_event_types))
    }

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics::metrics_handler))
        .nest("/v1", v1())
        .layer(
            TraceLayer::new_for_http()
                .on_request(metrics::request_counter)
                .on_response(metrics::record_response_metrics),
        )
        .with_state(state)
}

/// Returns a [crate::app::Service] serving the statistics API.
///
/// # Arguments
///
/// * `state`: Shared application state, loaded or not
pub fn service(state: SharedAppState) -> Service {
    NormalizePathLayer::trim_trailing_slash().layer(router(state))
}

/// Load the disclosure artifact into the shared state.
///
/// This must complete before the service accepts requests. Until it does, data endpoints respond
/// with 503 Service Unavailable.
///
/// # Arguments
///
/// * `state`: Shared application state
/// * `path`: Artifact location
pub async fn load(state: &SharedAppState, path: &Path) -> Result<(), DisclosureError> {
    let path = path.to_path_buf();
    let snapshot = tokio::task::spawn_blocking(move || Snapshot::load(&path)).await??;
    let snapshot = state.catalog.load(snapshot)?;
    metrics::DISCLOSURE_RECORDS_LOADED.set(i64::try_from(snapshot.len())?);
    info!(
        records = snapshot.len(),
        event_types = snapshot.event_types().len(),
        min_group_size = snapshot.min_group_size(),
        "statistics loaded"
    );
    Ok(())
}

/// Body of the health response
#[derive(Serialize)]
struct Health {
    status: &'static str,
    records: usize,
}

async fn health(State(state): State<SharedAppState>) -> Result<Json<Health>, DisclosureError> {
    let snapshot = state.catalog.snapshot()?;
    Ok(Json(Health {
        status: "ok",
        records: snapshot.len(),
    }))
}

async fn list_stats(
    State(state): State<SharedAppState>,
    ValidatedQuery(window): ValidatedQuery<DateWindow>,
) -> Result<Response, DisclosureError> {
    let snapshot = state.catalog.snapshot()?;
    Ok(Json(snapshot.list_all(&window)).into_response())
}

async fn list_stats_by_event_type(
    State(state): State<SharedAppState>,
    UrlPath(event_type): UrlPath<String>,
    ValidatedQuery(window): ValidatedQuery<DateWindow>,
) -> Result<Response, DisclosureError> {
    let snapshot = state.catalog.snapshot()?;
    let records = snapshot.list_by_event_type(&event_type, &window)?;
    Ok(Json(records).into_response())
}

async fn list_event_types(
    State(state): State<SharedAppState>,
) -> Result<Response, DisclosureError> {
    let snapshot = state.catalog.snapshot()?;
    Ok(Json(snapshot.event_types()).into_response())
}
