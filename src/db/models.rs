//! Database Models
//!
//! Read-model entity rows for the minority-game event projection.
//! 모든 엔티티는 이벤트 최초 수신 시 생성되고 절대 삭제되지 않음 —
//! 정정이 필요하면 새 이벤트로 처리 (히스토리 변조 금지).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;

/// 게임 집계 루트
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GameRow {
    /// 컨트랙트가 부여한 게임 ID (immutable)
    pub game_id: i64,

    pub question_text: String,

    /// 참가비
    pub entry_fee: Decimal,

    pub creator_address: String,

    /// 현재 라운드 (단조 비감소, >= 1)
    pub current_round: i32,

    /// 게임 상태 (types::GameState::as_str 직렬화)
    pub game_state: String,

    pub commit_deadline: Option<DateTime<Utc>>,
    pub reveal_deadline: Option<DateTime<Utc>>,

    /// 참가 플레이어 수 (>= 0)
    pub total_players: i32,

    /// 이 row에 적용된 마지막 이벤트 시퀀스 (source block height).
    /// 더 오래된 시퀀스의 upsert는 DB 레벨에서 무시됨.
    pub event_seq: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 게임 참가자. 복합 키 (game_id, player_address)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GamePlayerRow {
    pub game_id: i64,
    pub player_address: String,
    /// active | eliminated | winner (forward-only)
    pub status: String,
    pub joined_at: DateTime<Utc>,
}

/// 커밋. 복합 키 (game_id, round_number, player_address)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CommitRow {
    pub game_id: i64,
    pub round_number: i32,
    pub player_address: String,
    pub commit_hash: String,
    pub committed_at: DateTime<Utc>,
}

/// 공개(reveal). 복합 키 (game_id, round_number, player_address)
///
/// Reveal은 같은 키의 Commit을 전제로 하지만 이 레이어에서 강제하지 않음 —
/// 참조 무결성은 컨트랙트가 보장.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RevealRow {
    pub game_id: i64,
    pub round_number: i32,
    pub player_address: String,
    pub vote_value: bool,
    pub salt: String,
    pub revealed_at: DateTime<Utc>,
}

/// 라운드 결과. 복합 키 (game_id, round_number). 작성 후 불변.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RoundRow {
    pub game_id: i64,
    pub round_number: i32,
    pub yes_count: i32,
    pub no_count: i32,
    /// YES가 소수였으면 true
    pub minority_vote: bool,
    pub votes_remaining: i32,
    pub completed_at: DateTime<Utc>,
}

/// 상금 분배. 복합 키 (game_id, winner_address), append-only.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PrizeDistributionRow {
    pub game_id: i64,
    pub winner_address: String,
    pub amount: Decimal,
    pub distributed_at: DateTime<Utc>,
}

/// 플레이어 집계 통계. 카운터는 단조 증가만 가능.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserProfileRow {
    pub player_address: String,
    pub total_games: i32,
    pub total_wins: i32,
    pub total_earnings: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl UserProfileRow {
    /// 신규 프로필 (카운터 0)
    pub fn empty(address: &str) -> Self {
        Self {
            player_address: address.to_string(),
            total_games: 0,
            total_wins: 0,
            total_earnings: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }
}
