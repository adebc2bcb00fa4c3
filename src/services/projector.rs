//! Projection Engine
//!
//! 이벤트 타입별로 read-model 변이를 계산해서 멱등하게 적용.
//!
//! # Interview Q&A
//!
//! Q: 왜 read-then-merge인가? 이벤트 내용으로 row 전체를 덮어쓰면 안 되나?
//! A: 독립적인 이벤트 타입 여러 개가 같은 Game row를 건드림
//!    - `CommitDeadlineSet`은 deadline + round만 권위 있음
//!      (total_players를 리셋하면 안 됨)
//!    - `PlayerJoined`는 total_players만 증가 (상태를 건드리면 안 됨)
//!    → 각 핸들러는 자기 이벤트가 권위를 가진 필드만 병합하고
//!      나머지는 현재 row 값을 유지
//!
//! Q: at-least-once 재전송은 어떻게 흡수하는가?
//! A: 세 가지 장치
//!    1. natural key ON CONFLICT upsert (commit/reveal/round)
//!    2. 존재 확인 후 증가 (PlayerJoined: 이미 참가한 플레이어면 no-op)
//!    3. insert-if-absent 반환값 게이팅 (상금/승수 카운터)
//!
//! Q: 핸들러 실패 시 재시도하는가?
//! A: 안 함. 이 레이어는 이벤트를 drop하고 로그 + success-ratio 지표로
//!    노출. 재전송 내구성은 at-least-once 소스의 책임이고, 드롭된
//!    projection은 이후 이벤트가 교정하거나 eventual inconsistency로
//!    수용 (알려진 한계).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::info;

use crate::db::{
    CommitRow, GamePlayerRow, GameRow, PrizeDistributionRow, ReadModelStore, RevealRow, RoundRow,
};
use crate::error::IndexError;
use crate::services::fanout::{GameHub, GameUpdate, UpdateKind};
use crate::services::router::{decimal_field, str_field, u64_field, EventKind};
use crate::types::{normalize_vote, ChainAddress, GameState, PlayerStatus};

/// 게임 종료 임계값: 남은 플레이어가 이 수 이하면 Completed
const COMPLETION_THRESHOLD: u64 = 2;

/// Read-model projection 엔진. 저장소의 유일한 writer.
pub struct Projector {
    store: Arc<dyn ReadModelStore>,
    hub: Arc<GameHub>,
}

impl Projector {
    pub fn new(store: Arc<dyn ReadModelStore>, hub: Arc<GameHub>) -> Self {
        Self { store, hub }
    }

    /// 단일 이벤트 적용. 실패하면 이 이벤트의 projection만 드롭됨.
    pub async fn apply(
        &self,
        kind: EventKind,
        game_id: i64,
        payload: &Value,
        seq: i64,
    ) -> Result<(), IndexError> {
        match kind {
            EventKind::GameCreated => self.on_game_created(game_id, payload, seq).await,
            EventKind::PlayerJoined => self.on_player_joined(game_id, payload, seq).await,
            EventKind::VoteCommitted => self.on_vote_committed(game_id, payload).await,
            EventKind::VoteRevealed => self.on_vote_revealed(game_id, payload).await,
            EventKind::CommitDeadlineSet => {
                self.on_deadline_set(game_id, payload, seq, GameState::CommitPhase)
                    .await
            }
            EventKind::RevealDeadlineSet => {
                self.on_deadline_set(game_id, payload, seq, GameState::RevealPhase)
                    .await
            }
            EventKind::RoundCompleted => self.on_round_completed(game_id, payload, seq).await,
            EventKind::GameCompleted => self.on_game_completed(game_id, payload, seq).await,
            EventKind::PrizeDistributed => self.on_prize_distributed(game_id, payload).await,
        }
    }

    // ============ 핸들러 ============

    async fn on_game_created(
        &self,
        game_id: i64,
        payload: &Value,
        seq: i64,
    ) -> Result<(), IndexError> {
        let creator = address_field(payload, &["creator", "creatorAddress", "creator_address"], "creator")?;
        let question = str_field(payload, &["question", "questionText", "question_text"])
            .unwrap_or_default()
            .to_string();
        let entry_fee =
            decimal_field(payload, &["entryFee", "entry_fee"]).unwrap_or(Decimal::ZERO);
        let created_at = event_timestamp(payload);

        let existing = self
            .store
            .get_game(game_id)
            .await
            .map_err(IndexError::store)?;

        let row = match existing {
            // replay: 식별 필드만 병합, 이후 이벤트가 전진시킨 상태는 유지
            Some(mut game) => {
                game.question_text = question;
                game.entry_fee = entry_fee;
                game.creator_address = creator;
                game.event_seq = effective_seq(seq, game.event_seq);
                game
            }
            None => GameRow {
                game_id,
                question_text: question,
                entry_fee,
                creator_address: creator,
                current_round: 1,
                game_state: GameState::ZeroPhase.as_str().to_string(),
                commit_deadline: None,
                reveal_deadline: None,
                total_players: 0,
                event_seq: seq,
                created_at,
                updated_at: created_at,
            },
        };

        self.store.upsert_game(&row).await.map_err(IndexError::store)?;
        info!(game_id, "indexed game");
        self.publish_game_update(&row);
        Ok(())
    }

    async fn on_player_joined(
        &self,
        game_id: i64,
        payload: &Value,
        seq: i64,
    ) -> Result<(), IndexError> {
        let player = address_field(payload, &["player", "playerAddress", "player_address"], "player")?;
        let joined_at = event_timestamp(payload);

        let mut game = self.require_game(game_id).await?;

        // 이미 참가한 플레이어의 재전송 → 카운터를 건드리지 않음
        if self
            .store
            .get_player(game_id, &player)
            .await
            .map_err(IndexError::store)?
            .is_some()
        {
            return Ok(());
        }

        self.store
            .upsert_player(&GamePlayerRow {
                game_id,
                player_address: player.clone(),
                status: PlayerStatus::Active.as_str().to_string(),
                joined_at,
            })
            .await
            .map_err(IndexError::store)?;

        game.total_players += 1;
        game.event_seq = effective_seq(seq, game.event_seq);
        self.store.upsert_game(&game).await.map_err(IndexError::store)?;

        // 집계 프로필: 없으면 카운터 0으로 생성 후 증가
        let mut profile = self
            .store
            .get_profile(&player)
            .await
            .map_err(IndexError::store)?
            .unwrap_or_else(|| crate::db::UserProfileRow::empty(&player));
        profile.total_games += 1;
        self.store
            .upsert_profile(&profile)
            .await
            .map_err(IndexError::store)?;

        self.hub.publish(GameUpdate {
            kind: UpdateKind::PlayerAction,
            game_id,
            payload: json!({
                "player": player,
                "action": "joined",
                "totalPlayers": game.total_players,
            }),
        });
        Ok(())
    }

    async fn on_vote_committed(&self, game_id: i64, payload: &Value) -> Result<(), IndexError> {
        let player = address_field(payload, &["player", "playerAddress", "player_address"], "player")?;
        let round = u64_field(payload, &["round", "roundNumber", "round_number"])
            .ok_or(IndexError::MissingField("round"))? as i32;
        let commit_hash = str_field(payload, &["commitHash", "commit_hash", "hash"])
            .ok_or(IndexError::MissingField("commitHash"))?
            .to_string();

        self.store
            .upsert_commit(&CommitRow {
                game_id,
                round_number: round,
                player_address: player.clone(),
                commit_hash,
                committed_at: event_timestamp(payload),
            })
            .await
            .map_err(IndexError::store)?;

        self.hub.publish(GameUpdate {
            kind: UpdateKind::PlayerAction,
            game_id,
            payload: json!({
                "player": player,
                "action": "vote-committed",
                "round": round,
            }),
        });
        Ok(())
    }

    async fn on_vote_revealed(&self, game_id: i64, payload: &Value) -> Result<(), IndexError> {
        let player = address_field(payload, &["player", "playerAddress", "player_address"], "player")?;
        let round = u64_field(payload, &["round", "roundNumber", "round_number"])
            .ok_or(IndexError::MissingField("round"))? as i32;
        let vote_value = ["vote", "voteValue", "vote_value"]
            .iter()
            .find_map(|name| payload.get(*name))
            .and_then(normalize_vote)
            .ok_or(IndexError::MissingField("vote"))?;
        let salt = str_field(payload, &["salt"]).unwrap_or_default().to_string();

        self.store
            .upsert_reveal(&RevealRow {
                game_id,
                round_number: round,
                player_address: player.clone(),
                vote_value,
                salt,
                revealed_at: event_timestamp(payload),
            })
            .await
            .map_err(IndexError::store)?;

        self.hub.publish(GameUpdate {
            kind: UpdateKind::PlayerAction,
            game_id,
            payload: json!({
                "player": player,
                "action": "vote-revealed",
                "round": round,
            }),
        });
        Ok(())
    }

    /// CommitDeadlineSet / RevealDeadlineSet 공통 병합
    async fn on_deadline_set(
        &self,
        game_id: i64,
        payload: &Value,
        seq: i64,
        target_state: GameState,
    ) -> Result<(), IndexError> {
        let deadline_secs = u64_field(
            payload,
            &["deadline", "commitDeadline", "revealDeadline", "commit_deadline", "reveal_deadline"],
        )
        .ok_or(IndexError::MissingField("deadline"))?;
        let deadline = DateTime::from_timestamp(deadline_secs as i64, 0)
            .ok_or(IndexError::MalformedEvent("deadline out of range".into()))?;

        let mut game = self.require_game(game_id).await?;
        let round = u64_field(payload, &["round", "roundNumber", "round_number"])
            .unwrap_or(game.current_round as u64) as i32;

        // 이 이벤트가 권위를 가진 필드만 병합
        match target_state {
            GameState::CommitPhase => game.commit_deadline = Some(deadline),
            _ => game.reveal_deadline = Some(deadline),
        }
        game.current_round = game.current_round.max(round);
        game.game_state = current_state(&game).transition(target_state).as_str().to_string();
        game.event_seq = effective_seq(seq, game.event_seq);

        self.store.upsert_game(&game).await.map_err(IndexError::store)?;
        self.publish_game_update(&game);
        Ok(())
    }

    async fn on_round_completed(
        &self,
        game_id: i64,
        payload: &Value,
        seq: i64,
    ) -> Result<(), IndexError> {
        let round = u64_field(payload, &["round", "roundNumber", "round_number"])
            .ok_or(IndexError::MissingField("round"))? as i32;
        let minority_vote = ["minorityVote", "minority_vote"]
            .iter()
            .find_map(|name| payload.get(*name))
            .and_then(normalize_vote)
            .ok_or(IndexError::MissingField("minorityVote"))?;
        let votes_remaining = u64_field(
            payload,
            &["votesRemaining", "votes_remaining", "playersRemaining", "players_remaining"],
        )
        .ok_or(IndexError::MissingField("votesRemaining"))?;

        let round_row = RoundRow {
            game_id,
            round_number: round,
            yes_count: u64_field(payload, &["yesCount", "yes_count"]).unwrap_or(0) as i32,
            no_count: u64_field(payload, &["noCount", "no_count"]).unwrap_or(0) as i32,
            minority_vote,
            votes_remaining: votes_remaining as i32,
            completed_at: event_timestamp(payload),
        };
        // 라운드는 불변 — 재전송은 insert-if-absent가 흡수
        self.store
            .insert_round(&round_row)
            .await
            .map_err(IndexError::store)?;

        let mut game = self.require_game(game_id).await?;
        game.current_round = game.current_round.max(round + 1);
        let next_state = if votes_remaining <= COMPLETION_THRESHOLD {
            GameState::Completed
        } else {
            GameState::CommitPhase
        };
        game.game_state = current_state(&game).transition(next_state).as_str().to_string();
        game.event_seq = effective_seq(seq, game.event_seq);
        self.store.upsert_game(&game).await.map_err(IndexError::store)?;

        self.hub.publish(GameUpdate {
            kind: UpdateKind::RoundCompleted,
            game_id,
            payload: json!({
                "round": serde_json::to_value(&round_row).unwrap_or(Value::Null),
                "gameState": game.game_state,
                "currentRound": game.current_round,
            }),
        });
        Ok(())
    }

    async fn on_game_completed(
        &self,
        game_id: i64,
        payload: &Value,
        seq: i64,
    ) -> Result<(), IndexError> {
        let mut game = self.require_game(game_id).await?;
        game.game_state = GameState::Completed.as_str().to_string();
        game.event_seq = effective_seq(seq, game.event_seq);
        self.store.upsert_game(&game).await.map_err(IndexError::store)?;

        let distributed_at = event_timestamp(payload);
        let mut winners: Vec<String> = Vec::new();
        if let Some(entries) = payload.get("winners").and_then(Value::as_array) {
            for entry in entries {
                let (address, amount) = parse_winner(entry)?;
                self.credit_winner(game_id, &address, amount, distributed_at)
                    .await?;
                winners.push(address);
            }
        }

        info!(game_id, winners = winners.len(), "game completed");
        self.hub.publish(GameUpdate {
            kind: UpdateKind::GameCompleted,
            game_id,
            payload: json!({
                "game": serde_json::to_value(&game).unwrap_or(Value::Null),
                "winners": winners,
            }),
        });
        Ok(())
    }

    async fn on_prize_distributed(&self, game_id: i64, payload: &Value) -> Result<(), IndexError> {
        let winner = address_field(payload, &["winner", "winnerAddress", "winner_address"], "winner")?;
        let amount = decimal_field(payload, &["amount", "prize"]).unwrap_or(Decimal::ZERO);

        self.credit_winner(game_id, &winner, amount, event_timestamp(payload))
            .await?;

        self.hub.publish(GameUpdate {
            kind: UpdateKind::PlayerAction,
            game_id,
            payload: json!({
                "player": winner,
                "action": "prize-distributed",
                "amount": amount.to_string(),
            }),
        });
        Ok(())
    }

    // ============ 공통 경로 ============

    /// 승자 기록: 상금 row + 프로필 카운터 + 플레이어 상태
    ///
    /// GameCompleted 내장 분배와 별도 PrizeDistributed 이벤트 양쪽에서
    /// 호출됨 — insert_prize의 insert-if-absent 반환값이 카운터 이중
    /// 증가를 막는 유일한 게이트.
    async fn credit_winner(
        &self,
        game_id: i64,
        address: &str,
        amount: Decimal,
        distributed_at: DateTime<Utc>,
    ) -> Result<(), IndexError> {
        let inserted = self
            .store
            .insert_prize(&PrizeDistributionRow {
                game_id,
                winner_address: address.to_string(),
                amount,
                distributed_at,
            })
            .await
            .map_err(IndexError::store)?;

        if !inserted {
            // replay 또는 다른 경로가 이미 처리함
            return Ok(());
        }

        let mut profile = self
            .store
            .get_profile(address)
            .await
            .map_err(IndexError::store)?
            .unwrap_or_else(|| crate::db::UserProfileRow::empty(address));
        profile.total_wins += 1;
        profile.total_earnings += amount;
        self.store
            .upsert_profile(&profile)
            .await
            .map_err(IndexError::store)?;

        let joined_at = self
            .store
            .get_player(game_id, address)
            .await
            .map_err(IndexError::store)?
            .map(|p| p.joined_at)
            .unwrap_or(distributed_at);
        self.store
            .upsert_player(&GamePlayerRow {
                game_id,
                player_address: address.to_string(),
                status: PlayerStatus::Winner.as_str().to_string(),
                joined_at,
            })
            .await
            .map_err(IndexError::store)?;

        Ok(())
    }

    async fn require_game(&self, game_id: i64) -> Result<GameRow, IndexError> {
        self.store
            .get_game(game_id)
            .await
            .map_err(IndexError::store)?
            .ok_or_else(|| IndexError::MalformedEvent(format!("game {} not indexed", game_id)))
    }

    fn publish_game_update(&self, game: &GameRow) {
        self.hub.publish(GameUpdate {
            kind: UpdateKind::GameUpdate,
            game_id: game.game_id,
            payload: serde_json::to_value(game).unwrap_or(Value::Null),
        });
    }
}

/// 이벤트의 timestamp 필드 (unix 초), 없으면 수신 시각
fn event_timestamp(payload: &Value) -> DateTime<Utc> {
    u64_field(payload, &["timestamp"])
        .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
        .unwrap_or_else(Utc::now)
}

/// 시퀀스가 없는 이벤트(0)는 저장된 시퀀스를 유지해서 guard를 통과시킴
fn effective_seq(event_seq: i64, stored_seq: i64) -> i64 {
    if event_seq > 0 {
        event_seq
    } else {
        stored_seq
    }
}

fn current_state(game: &GameRow) -> GameState {
    GameState::parse(&game.game_state).unwrap_or(GameState::ZeroPhase)
}

/// 주소 필드 추출 + 정규화 (lowercase, `0x` prefix 검증)
fn address_field(
    payload: &Value,
    names: &[&str],
    field: &'static str,
) -> Result<String, IndexError> {
    let raw = str_field(payload, names).ok_or(IndexError::MissingField(field))?;
    ChainAddress::new(raw)
        .map(ChainAddress::into_string)
        .map_err(IndexError::MalformedEvent)
}

/// winners 항목: `{address, amount}` 객체 또는 단순 주소 문자열 수용
fn parse_winner(entry: &Value) -> Result<(String, Decimal), IndexError> {
    match entry {
        Value::String(raw) => {
            let address = ChainAddress::new(raw)
                .map(ChainAddress::into_string)
                .map_err(IndexError::MalformedEvent)?;
            Ok((address, Decimal::ZERO))
        }
        Value::Object(_) => {
            let address = address_field(entry, &["address", "winner", "player"], "winners[].address")?;
            let amount = decimal_field(entry, &["amount", "prize"]).unwrap_or(Decimal::ZERO);
            Ok((address, amount))
        }
        _ => Err(IndexError::MalformedEvent("invalid winners entry".into())),
    }
}
