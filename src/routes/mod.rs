//! API Routes Module
//!
//! 모든 HTTP 엔드포인트 정의
//!
//! # Routes
//! - `/health` - 헬스 체크 (healthy가 아니면 503)
//! - `/metrics` - 이벤트 카운터 + 리소스 지표
//! - `/status` - 서비스 정적 정보
//! - `/games/:id`, `/games/:id/players` - read-model 조회
//! - `/ws` - 게임별 실시간 업데이트 구독

pub mod games;
pub mod health;
pub mod metrics;
pub mod status;
pub mod ws;
