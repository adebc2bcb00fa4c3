//! Minority Game Indexer
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Chain Node (Event Source)                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ ws subscribe + http probe
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Indexer Process                         │
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                   Pipeline Layer                         ││
//! │  │  EventListener → EventRouter → Projector → Postgres     ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                   Serving Layer                          ││
//! │  │  /health  /metrics  /status  /games/*  /ws              ││
//! │  └─────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Clients (game UI, dashboards, probes)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// 라이브러리에서 가져오기
use minority_game_indexer::{
    db::ReadModelStore,
    routes,
    services::{qualified_event_types, validate_registry},
    AppState, Config, Database, EventListener, EventRouter, GameHub, HealthMonitor, Projector,
    WsEventSource,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 환경변수 로드
    dotenvy::dotenv().ok();

    // 로깅 초기화
    // RUST_LOG=debug,sqlx=warn 형태로 레벨 제어 가능
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "minority_game_indexer=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🚀 Starting Minority Game Indexer");

    // 설정 로드
    let config = Config::from_env()?;
    tracing::info!("📋 Configuration loaded");

    // 이벤트 타입 레지스트리 검증 (fail-fast)
    let event_types = qualified_event_types(&config.contract_address);
    validate_registry(&event_types)?;
    tracing::info!(count = event_types.len(), "📇 Event registry validated");

    // 데이터베이스 연결
    let db = Arc::new(Database::connect(&config.database_url).await?);
    tracing::info!("🗄️  Database connected");

    // 마이그레이션 실행
    db.run_migrations().await?;
    tracing::info!("📦 Migrations completed");

    // 파이프라인 구성
    let monitor = Arc::new(HealthMonitor::new(config.indexer.staleness_threshold));
    let hub = Arc::new(GameHub::new(config.indexer.fanout_debounce));
    let projector = Arc::new(Projector::new(
        db.clone() as Arc<dyn ReadModelStore>,
        hub.clone(),
    ));
    let event_router = Arc::new(EventRouter::new(projector, monitor.clone()));
    let source = Arc::new(WsEventSource::new(
        &config.event_ws_url,
        &config.event_probe_url,
        &config.contract_address,
    ));
    let listener = Arc::new(EventListener::new(
        source,
        event_router,
        monitor.clone(),
        config.indexer.clone(),
    ));

    // 최초 연결: 재시도 예산 소진 시 여기서 프로세스 종료
    listener.start().await?;
    tracing::info!("📡 Event listener started");

    // 앱 상태 구성
    let state = AppState {
        db,
        hub,
        monitor,
        config: Arc::new(config.clone()),
    };

    // 라우터 구성
    let app = create_router(state);

    // 서버 시작
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🌐 Listening on http://{}", addr);

    let tcp = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(tcp, app)
        .with_graceful_shutdown(shutdown_signal(listener))
        .await?;

    tracing::info!("👋 Shutdown complete");
    Ok(())
}

/// SIGINT(Ctrl+C) 수신 시 리스너부터 내리고 서버 종료
async fn shutdown_signal(listener: Arc<EventListener>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install signal handler");
        return;
    }
    tracing::info!("🛑 Shutdown signal received");
    listener.stop();
}

/// 라우터 생성
///
/// # Route Structure
///
/// ```text
/// GET  /health              - 파이프라인 상태 (healthy 아니면 503)
/// GET  /metrics             - 이벤트 카운터 + 리소스 지표
/// GET  /status              - 서비스 정적 정보
///
/// GET  /games/:id           - 게임 스냅샷 조회
/// GET  /games/:id/players   - 참가자 목록 조회
///
/// GET  /ws                  - 게임별 실시간 업데이트 구독
/// ```
fn create_router(state: AppState) -> Router {
    // CORS 설정
    // 프로덕션에서는 특정 도메인만 허용
    // 개발 환경에서는 localhost 허용
    let cors = if state.config.is_production() {
        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "https://yourdomain.com".to_string());
        let origins: Vec<_> = allowed_origins
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([axum::http::Method::GET])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    } else {
        CorsLayer::new()
            .allow_origin([
                "http://localhost:5173".parse().unwrap(), // Vite dev server
                "http://localhost:3000".parse().unwrap(),
                "http://127.0.0.1:5173".parse().unwrap(),
            ])
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        // Operational endpoints
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::metrics::metrics))
        .route("/status", get(routes::status::status))
        // Read-model queries
        .route("/games/:id", get(routes::games::get_game))
        .route("/games/:id/players", get(routes::games::list_players))
        // Real-time channel
        .route("/ws", get(routes::ws::ws_handler))
        // 미들웨어
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // 상태 주입
        .with_state(state)
}
