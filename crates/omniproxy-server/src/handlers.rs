//! API route handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use omniproxy_storage::{TrafficDetail, TrafficFilter, TrafficStats};

use crate::error::Result;
use crate::models::{TrafficListResponse, TrafficQuery};
use crate::state::AppState;

/// Hard cap on the page size.
const MAX_LIMIT: u64 = 1000;
const DEFAULT_LIMIT: u64 = 100;

fn filter_of(query: &TrafficQuery) -> TrafficFilter {
    TrafficFilter {
        hosts: query.host.iter().cloned().collect(),
        methods: query.method.iter().cloned().collect(),
        status_codes: query.status.iter().copied().collect(),
        min_status: query.min_status,
        ..TrafficFilter::default()
    }
}

/// GET /traffic - list captured traffic.
pub async fn list_traffic(
    State(state): State<AppState>,
    Query(query): Query<TrafficQuery>,
) -> Result<Json<TrafficListResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let mut filter = filter_of(&query);
    let total = state.store.count(&filter).await?;

    filter.limit = Some(limit);
    filter.offset = Some(offset);
    let records = state.store.query(&filter).await?;

    Ok(Json(TrafficListResponse {
        records,
        total,
        limit,
        offset,
    }))
}

/// GET /traffic/{id} - full record detail.
pub async fn get_traffic(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TrafficDetail>> {
    Ok(Json(state.store.get_by_id(id).await?))
}

/// GET /stats - aggregate statistics.
pub async fn get_stats(
    State(state): State<AppState>,
    Query(query): Query<TrafficQuery>,
) -> Result<Json<TrafficStats>> {
    let filter = filter_of(&query);
    Ok(Json(state.store.stats(&filter).await?))
}

/// GET /metrics - metrics snapshot as JSON.
pub async fn metrics_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// GET /healthz - liveness.
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.health.liveness())
}

/// GET /readyz - readiness, 503 when not ready or a check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let (healthy, status) = state.health.readiness();
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}
