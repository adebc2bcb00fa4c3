//! Health Check Endpoint
//!
//! # Interview Q&A
//!
//! Q: 왜 200/503을 body 내용과 함께 내려주는가?
//! A: 두 종류의 소비자
//!    1. 로드밸런서/K8s probe: 상태 코드만 봄 (healthy → 200, 아니면 503)
//!    2. 운영자/대시보드: body의 세부 판정(connected/fresh/ratio)으로
//!       어느 조건이 깨졌는지 진단
//!
//! Q: DB 체크와 인덱서 verdict를 왜 둘 다 보는가?
//! A: "깊은 헬스체크" 패턴 — 프로세스가 살아있어도 read-model을
//!    업데이트하지 못하면 이 서비스는 기능하지 않음

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::AppState;

/// Health check 응답
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: DatabaseStatus,
    pub event_source: EventSourceStatus,
    pub event_listener: ListenerStatus,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct DatabaseStatus {
    pub connected: bool,
    pub latency_ms: Option<u64>,
}

/// Health 판정의 세부 조건 (어느 게이트가 깨졌는지 진단용)
#[derive(Serialize)]
pub struct EventSourceStatus {
    pub connected: bool,
    pub fresh: bool,
    pub success_ratio_ok: bool,
    pub success_ratio: f64,
}

#[derive(Serialize)]
pub struct ListenerStatus {
    pub is_listening: bool,
    pub uptime: u64,
    pub last_event_received_ms_ago: u64,
    pub connection_retries: u64,
}

/// GET /health
///
/// 서버 및 인덱싱 파이프라인 상태 확인. healthy가 아니면 503.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_start = std::time::Instant::now();
    let db_connected = state.db.health_check().await.is_ok();
    let db_status = DatabaseStatus {
        connected: db_connected,
        latency_ms: db_connected.then(|| db_start.elapsed().as_millis() as u64),
    };

    let verdict = state.monitor.verdict();
    let healthy = verdict.healthy && db_connected;

    let body = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        database: db_status,
        event_source: EventSourceStatus {
            connected: verdict.connected,
            fresh: verdict.fresh,
            success_ratio_ok: verdict.ratio_ok,
            success_ratio: state.monitor.success_ratio(),
        },
        event_listener: ListenerStatus {
            is_listening: verdict.connected,
            uptime: state.monitor.uptime().as_secs(),
            last_event_received_ms_ago: state.monitor.ms_since_last_event(),
            connection_retries: state.monitor.retries(),
        },
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}
