//! Metrics Endpoint
//!
//! 이벤트 카운터 + 프로세스 리소스. health와 달리 항상 200 —
//! 수집기가 비정상 상태의 수치도 읽어야 하므로.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct MetricsResponse {
    pub events_processed: u64,
    pub events_failed: u64,
    pub success_ratio: f64,
    pub connection_retries: u64,
    pub uptime_seconds: u64,
    pub last_event_received_ms_ago: u64,
    pub active_game_topics: usize,
    pub resources: ResourceMetrics,
}

#[derive(Serialize)]
pub struct ResourceMetrics {
    pub memory_bytes: u64,
    pub total_memory_bytes: u64,
    pub cpu_percent: f32,
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    let resources = state.monitor.resources();
    Json(MetricsResponse {
        events_processed: state.monitor.events_processed(),
        events_failed: state.monitor.events_failed(),
        success_ratio: state.monitor.success_ratio(),
        connection_retries: state.monitor.retries(),
        uptime_seconds: state.monitor.uptime().as_secs(),
        last_event_received_ms_ago: state.monitor.ms_since_last_event(),
        active_game_topics: state.hub.active_topics(),
        resources: ResourceMetrics {
            memory_bytes: resources.memory_bytes,
            total_memory_bytes: resources.total_memory_bytes,
            cpu_percent: resources.cpu_percent,
        },
    })
}
