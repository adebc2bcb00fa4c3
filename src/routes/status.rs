//! Service Identity Endpoint
//!
//! 배포 확인용 정적 정보. 의존성 체크 없음 → 항상 200.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct StatusResponse {
    pub service: String,
    pub version: String,
    pub environment: String,
    pub contract_address: String,
    pub timestamp: String,
}

/// GET /status
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: format!("{:?}", state.config.environment).to_lowercase(),
        contract_address: state.config.contract_address.clone(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
