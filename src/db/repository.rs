//! Repository Pattern Implementation
//!
//! # Interview Q&A
//!
//! Q: Repository 패턴이란?
//! A: 데이터 접근 로직을 추상화하는 패턴
//!
//!    장점:
//!    - Projection Engine을 실제 DB 없이 테스트 가능 (Mock 구현)
//!    - 비즈니스 로직과 데이터 접근 분리
//!    - 저장소 교체 시 영향 최소화 (설계는 store-agnostic)
//!
//! Q: upsert 멱등성은 어디서 보장되는가?
//! A: DB 레벨 `ON CONFLICT`에서 보장
//!    - 같은 natural key의 재전송(at-least-once redelivery)은
//!      중복 row를 만들지 않음
//!    - `insert_prize`는 삽입 여부를 반환 → 집계 카운터 이중 증가 방지
//!    - `games.event_seq` guard: 더 오래된 시퀀스의 upsert는 조용히 무시

use async_trait::async_trait;
use anyhow::Result;

use super::models::{
    CommitRow, GamePlayerRow, GameRow, PrizeDistributionRow, RevealRow, RoundRow, UserProfileRow,
};
use super::Database;

/// Read-Model 저장소 인터페이스
///
/// Projection Engine이 유일한 writer. 리스너와 fan-out은 절대 쓰지 않음.
#[async_trait]
pub trait ReadModelStore: Send + Sync {
    async fn get_game(&self, game_id: i64) -> Result<Option<GameRow>>;
    async fn upsert_game(&self, game: &GameRow) -> Result<()>;

    async fn get_player(&self, game_id: i64, address: &str) -> Result<Option<GamePlayerRow>>;
    async fn upsert_player(&self, player: &GamePlayerRow) -> Result<()>;
    async fn list_players(&self, game_id: i64) -> Result<Vec<GamePlayerRow>>;

    async fn upsert_commit(&self, commit: &CommitRow) -> Result<()>;
    async fn get_commit(
        &self,
        game_id: i64,
        round: i32,
        address: &str,
    ) -> Result<Option<CommitRow>>;

    async fn upsert_reveal(&self, reveal: &RevealRow) -> Result<()>;
    async fn get_reveal(
        &self,
        game_id: i64,
        round: i32,
        address: &str,
    ) -> Result<Option<RevealRow>>;

    /// 라운드는 작성 후 불변 — 재전송은 insert-if-absent로 흡수
    async fn insert_round(&self, round: &RoundRow) -> Result<()>;
    async fn get_round(&self, game_id: i64, round: i32) -> Result<Option<RoundRow>>;

    /// 상금 분배 기록. 실제로 삽입됐으면 true (replay/중복이면 false).
    async fn insert_prize(&self, prize: &PrizeDistributionRow) -> Result<bool>;

    async fn get_profile(&self, address: &str) -> Result<Option<UserProfileRow>>;
    async fn upsert_profile(&self, profile: &UserProfileRow) -> Result<()>;
}

#[async_trait]
impl ReadModelStore for Database {
    async fn get_game(&self, game_id: i64) -> Result<Option<GameRow>> {
        let game = sqlx::query_as::<_, GameRow>(
            r#"
            SELECT
                game_id, question_text, entry_fee, creator_address,
                current_round, game_state, commit_deadline, reveal_deadline,
                total_players, event_seq, created_at, updated_at
            FROM games
            WHERE game_id = $1
            "#,
        )
        .bind(game_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(game)
    }

    /// 게임 row upsert
    ///
    /// `WHERE games.event_seq <= EXCLUDED.event_seq`: 이미 더 최신
    /// 이벤트가 적용된 row를 과거 이벤트가 덮어쓰지 못하게 막음
    async fn upsert_game(&self, game: &GameRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO games (
                game_id, question_text, entry_fee, creator_address,
                current_round, game_state, commit_deadline, reveal_deadline,
                total_players, event_seq, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
            ON CONFLICT (game_id)
            DO UPDATE SET
                question_text = EXCLUDED.question_text,
                entry_fee = EXCLUDED.entry_fee,
                creator_address = EXCLUDED.creator_address,
                current_round = EXCLUDED.current_round,
                game_state = EXCLUDED.game_state,
                commit_deadline = EXCLUDED.commit_deadline,
                reveal_deadline = EXCLUDED.reveal_deadline,
                total_players = EXCLUDED.total_players,
                event_seq = EXCLUDED.event_seq,
                updated_at = NOW()
            WHERE games.event_seq <= EXCLUDED.event_seq
            "#,
        )
        .bind(game.game_id)
        .bind(&game.question_text)
        .bind(game.entry_fee)
        .bind(&game.creator_address)
        .bind(game.current_round)
        .bind(&game.game_state)
        .bind(game.commit_deadline)
        .bind(game.reveal_deadline)
        .bind(game.total_players)
        .bind(game.event_seq)
        .bind(game.created_at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn get_player(&self, game_id: i64, address: &str) -> Result<Option<GamePlayerRow>> {
        let player = sqlx::query_as::<_, GamePlayerRow>(
            r#"
            SELECT game_id, player_address, status, joined_at
            FROM game_players
            WHERE game_id = $1 AND player_address = $2
            "#,
        )
        .bind(game_id)
        .bind(address.to_lowercase())
        .fetch_optional(self.pool())
        .await?;

        Ok(player)
    }

    async fn upsert_player(&self, player: &GamePlayerRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO game_players (game_id, player_address, status, joined_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (game_id, player_address)
            DO UPDATE SET status = EXCLUDED.status
            "#,
        )
        .bind(player.game_id)
        .bind(player.player_address.to_lowercase())
        .bind(&player.status)
        .bind(player.joined_at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn list_players(&self, game_id: i64) -> Result<Vec<GamePlayerRow>> {
        let players = sqlx::query_as::<_, GamePlayerRow>(
            r#"
            SELECT game_id, player_address, status, joined_at
            FROM game_players
            WHERE game_id = $1
            ORDER BY joined_at ASC
            "#,
        )
        .bind(game_id)
        .fetch_all(self.pool())
        .await?;

        Ok(players)
    }

    async fn upsert_commit(&self, commit: &CommitRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO commits (game_id, round_number, player_address, commit_hash, committed_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (game_id, round_number, player_address)
            DO UPDATE SET commit_hash = EXCLUDED.commit_hash
            "#,
        )
        .bind(commit.game_id)
        .bind(commit.round_number)
        .bind(commit.player_address.to_lowercase())
        .bind(&commit.commit_hash)
        .bind(commit.committed_at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn get_commit(
        &self,
        game_id: i64,
        round: i32,
        address: &str,
    ) -> Result<Option<CommitRow>> {
        let commit = sqlx::query_as::<_, CommitRow>(
            r#"
            SELECT game_id, round_number, player_address, commit_hash, committed_at
            FROM commits
            WHERE game_id = $1 AND round_number = $2 AND player_address = $3
            "#,
        )
        .bind(game_id)
        .bind(round)
        .bind(address.to_lowercase())
        .fetch_optional(self.pool())
        .await?;

        Ok(commit)
    }

    async fn upsert_reveal(&self, reveal: &RevealRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reveals (game_id, round_number, player_address, vote_value, salt, revealed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (game_id, round_number, player_address)
            DO UPDATE SET vote_value = EXCLUDED.vote_value, salt = EXCLUDED.salt
            "#,
        )
        .bind(reveal.game_id)
        .bind(reveal.round_number)
        .bind(reveal.player_address.to_lowercase())
        .bind(reveal.vote_value)
        .bind(&reveal.salt)
        .bind(reveal.revealed_at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn get_reveal(
        &self,
        game_id: i64,
        round: i32,
        address: &str,
    ) -> Result<Option<RevealRow>> {
        let reveal = sqlx::query_as::<_, RevealRow>(
            r#"
            SELECT game_id, round_number, player_address, vote_value, salt, revealed_at
            FROM reveals
            WHERE game_id = $1 AND round_number = $2 AND player_address = $3
            "#,
        )
        .bind(game_id)
        .bind(round)
        .bind(address.to_lowercase())
        .fetch_optional(self.pool())
        .await?;

        Ok(reveal)
    }

    async fn insert_round(&self, round: &RoundRow) -> Result<()> {
        // 라운드 결과는 소스가 한 번만 보고하지만 재전송은 견뎌야 함
        sqlx::query(
            r#"
            INSERT INTO rounds (
                game_id, round_number, yes_count, no_count,
                minority_vote, votes_remaining, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (game_id, round_number) DO NOTHING
            "#,
        )
        .bind(round.game_id)
        .bind(round.round_number)
        .bind(round.yes_count)
        .bind(round.no_count)
        .bind(round.minority_vote)
        .bind(round.votes_remaining)
        .bind(round.completed_at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn get_round(&self, game_id: i64, round: i32) -> Result<Option<RoundRow>> {
        let row = sqlx::query_as::<_, RoundRow>(
            r#"
            SELECT game_id, round_number, yes_count, no_count,
                   minority_vote, votes_remaining, completed_at
            FROM rounds
            WHERE game_id = $1 AND round_number = $2
            "#,
        )
        .bind(game_id)
        .bind(round)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    async fn insert_prize(&self, prize: &PrizeDistributionRow) -> Result<bool> {
        // GameCompleted 내장 경로와 별도 PrizeDistributed 경로가 같은
        // 분배를 중복 보고해도 복합 키가 한 번만 삽입시킴
        let result = sqlx::query(
            r#"
            INSERT INTO prize_distributions (game_id, winner_address, amount, distributed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (game_id, winner_address) DO NOTHING
            "#,
        )
        .bind(prize.game_id)
        .bind(prize.winner_address.to_lowercase())
        .bind(prize.amount)
        .bind(prize.distributed_at)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_profile(&self, address: &str) -> Result<Option<UserProfileRow>> {
        let profile = sqlx::query_as::<_, UserProfileRow>(
            r#"
            SELECT player_address, total_games, total_wins, total_earnings, updated_at
            FROM user_profiles
            WHERE player_address = $1
            "#,
        )
        .bind(address.to_lowercase())
        .fetch_optional(self.pool())
        .await?;

        Ok(profile)
    }

    async fn upsert_profile(&self, profile: &UserProfileRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_profiles (
                player_address, total_games, total_wins, total_earnings, updated_at
            )
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (player_address)
            DO UPDATE SET
                total_games = EXCLUDED.total_games,
                total_wins = EXCLUDED.total_wins,
                total_earnings = EXCLUDED.total_earnings,
                updated_at = NOW()
            "#,
        )
        .bind(profile.player_address.to_lowercase())
        .bind(profile.total_games)
        .bind(profile.total_wins)
        .bind(profile.total_earnings)
        .execute(self.pool())
        .await?;

        Ok(())
    }
}

// 테스트용 in-memory 구현 (Projection Engine 단위 테스트에서 사용)

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::RwLock;

    type PlayerKey = (i64, String);
    type VoteKey = (i64, i32, String);

    #[derive(Default)]
    pub struct MockStore {
        pub games: RwLock<HashMap<i64, GameRow>>,
        pub players: RwLock<HashMap<PlayerKey, GamePlayerRow>>,
        pub commits: RwLock<HashMap<VoteKey, CommitRow>>,
        pub reveals: RwLock<HashMap<VoteKey, RevealRow>>,
        pub rounds: RwLock<HashMap<(i64, i32), RoundRow>>,
        pub prizes: RwLock<HashMap<(i64, String), PrizeDistributionRow>>,
        pub profiles: RwLock<HashMap<String, UserProfileRow>>,
    }

    impl MockStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl ReadModelStore for MockStore {
        async fn get_game(&self, game_id: i64) -> Result<Option<GameRow>> {
            Ok(self.games.read().unwrap().get(&game_id).cloned())
        }

        async fn upsert_game(&self, game: &GameRow) -> Result<()> {
            let mut games = self.games.write().unwrap();
            // Postgres 구현과 동일한 event_seq guard
            if let Some(existing) = games.get(&game.game_id) {
                if existing.event_seq > game.event_seq {
                    return Ok(());
                }
            }
            games.insert(game.game_id, game.clone());
            Ok(())
        }

        async fn get_player(
            &self,
            game_id: i64,
            address: &str,
        ) -> Result<Option<GamePlayerRow>> {
            let key = (game_id, address.to_lowercase());
            Ok(self.players.read().unwrap().get(&key).cloned())
        }

        async fn upsert_player(&self, player: &GamePlayerRow) -> Result<()> {
            let key = (player.game_id, player.player_address.to_lowercase());
            let mut players = self.players.write().unwrap();
            match players.get_mut(&key) {
                Some(existing) => existing.status = player.status.clone(),
                None => {
                    players.insert(key, player.clone());
                }
            }
            Ok(())
        }

        async fn list_players(&self, game_id: i64) -> Result<Vec<GamePlayerRow>> {
            let mut players: Vec<_> = self
                .players
                .read()
                .unwrap()
                .values()
                .filter(|p| p.game_id == game_id)
                .cloned()
                .collect();
            players.sort_by_key(|p| p.joined_at);
            Ok(players)
        }

        async fn upsert_commit(&self, commit: &CommitRow) -> Result<()> {
            let key = (
                commit.game_id,
                commit.round_number,
                commit.player_address.to_lowercase(),
            );
            self.commits.write().unwrap().insert(key, commit.clone());
            Ok(())
        }

        async fn get_commit(
            &self,
            game_id: i64,
            round: i32,
            address: &str,
        ) -> Result<Option<CommitRow>> {
            let key = (game_id, round, address.to_lowercase());
            Ok(self.commits.read().unwrap().get(&key).cloned())
        }

        async fn upsert_reveal(&self, reveal: &RevealRow) -> Result<()> {
            let key = (
                reveal.game_id,
                reveal.round_number,
                reveal.player_address.to_lowercase(),
            );
            self.reveals.write().unwrap().insert(key, reveal.clone());
            Ok(())
        }

        async fn get_reveal(
            &self,
            game_id: i64,
            round: i32,
            address: &str,
        ) -> Result<Option<RevealRow>> {
            let key = (game_id, round, address.to_lowercase());
            Ok(self.reveals.read().unwrap().get(&key).cloned())
        }

        async fn insert_round(&self, round: &RoundRow) -> Result<()> {
            let key = (round.game_id, round.round_number);
            let mut rounds = self.rounds.write().unwrap();
            rounds.entry(key).or_insert_with(|| round.clone());
            Ok(())
        }

        async fn get_round(&self, game_id: i64, round: i32) -> Result<Option<RoundRow>> {
            Ok(self.rounds.read().unwrap().get(&(game_id, round)).cloned())
        }

        async fn insert_prize(&self, prize: &PrizeDistributionRow) -> Result<bool> {
            let key = (prize.game_id, prize.winner_address.to_lowercase());
            let mut prizes = self.prizes.write().unwrap();
            if prizes.contains_key(&key) {
                Ok(false)
            } else {
                prizes.insert(key, prize.clone());
                Ok(true)
            }
        }

        async fn get_profile(&self, address: &str) -> Result<Option<UserProfileRow>> {
            Ok(self
                .profiles
                .read()
                .unwrap()
                .get(&address.to_lowercase())
                .cloned())
        }

        async fn upsert_profile(&self, profile: &UserProfileRow) -> Result<()> {
            self.profiles
                .write()
                .unwrap()
                .insert(profile.player_address.to_lowercase(), profile.clone());
            Ok(())
        }
    }
}
