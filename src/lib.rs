//! Minority Game Indexer Library
//!
//! # Overview
//!
//! 이 라이브러리는 Minority Game 컨트랙트의 이벤트 스트림을 구독해서
//! 관계형 read-model로 projection하고, 게임별 실시간 업데이트를
//! WebSocket으로 fan-out하는 인덱서를 제공합니다.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐
//! │  Chain Node WS  │  (contract events, at-least-once)
//! └───────┬────────┘
//!         │ subscribe
//!         ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                       Indexer                            │
//! │                                                          │
//! │  ┌──────────┐   ┌────────┐   ┌───────────┐              │
//! │  │ Listener  │──>│ Router │──>│ Projector │──> Postgres  │
//! │  └─────┬────┘   └───┬────┘   └─────┬─────┘              │
//! │        │            │              │                     │
//! │        ▼            ▼              ▼                     │
//! │  ┌──────────────────────┐   ┌──────────┐                │
//! │  │    HealthMonitor      │   │ GameHub  │                │
//! │  └──────────┬───────────┘   └────┬─────┘                │
//! │             │                    │                       │
//! │   /health /metrics /status    /ws (per-game fan-out)     │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `config`: 환경 설정 관리
//! - `error`: 에러 타입 및 처리 (API + 인덱싱 파이프라인)
//! - `routes`: HTTP/WebSocket 엔드포인트 핸들러
//! - `services`: 인덱싱 파이프라인 (listener, router, projector, fanout, monitor)
//! - `db`: read-model 저장소
//! - `types`: 공통 타입 정의 (게임 상태 머신 포함)

use std::sync::Arc;

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod services;
pub mod types;

// Re-exports for convenience
pub use config::Config;
pub use db::Database;
pub use error::{ApiError, IndexError};
pub use services::{EventListener, EventRouter, GameHub, HealthMonitor, Projector, WsEventSource};

/// 애플리케이션 전역 상태
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub hub: Arc<GameHub>,
    pub monitor: Arc<HealthMonitor>,
    pub config: Arc<Config>,
}
