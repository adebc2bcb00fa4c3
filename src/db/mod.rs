//! Database Module
//!
//! # Interview Q&A
//!
//! Q: 왜 PostgreSQL을 선택했는가?
//! A: 이벤트 인덱서 read-model에 적합한 이유
//!
//!    1. ON CONFLICT upsert: at-least-once 재전송에 대한 멱등성을 DB가 보장
//!    2. 복합 natural key 인덱싱: (game_id, round, player) 조회 최적화
//!    3. ACID 트랜잭션: 집계 카운터 무결성
//!    4. 생태계: SQLx 마이그레이션/커넥션 풀 내장
//!
//! Q: 커넥션 풀은 어떻게 관리하는가?
//! A: SQLx의 PgPool 사용
//!    - 최소/최대 커넥션 수 설정
//!    - acquire_timeout으로 의존성 정지 시 liveness 루프 보호
//!    - 자동 health check

mod models;
pub mod repository;

pub use models::*;
pub use repository::ReadModelStore;

use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// 데이터베이스 연결 및 쿼리 담당
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 데이터베이스 연결
    ///
    /// # Connection Pool Settings
    ///
    /// - max_connections: 10 (트래픽에 따라 조정)
    /// - min_connections: 1 (idle 시 최소 유지)
    /// - acquire_timeout: 3초 — projection 쓰기가 멈춘 DB에 무한정
    ///   물리지 않도록 상한
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(3))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// 마이그레이션 실행
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
