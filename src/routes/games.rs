//! Game Read Endpoints
//!
//! read-model 조회. 쓰기는 전부 projection 경로로만 일어남 —
//! 여기서는 어떤 변이도 하지 않음.

use axum::{
    extract::{Path, State},
    Json,
};

use crate::db::{GamePlayerRow, GameRow, ReadModelStore};
use crate::error::ApiError;
use crate::types::ApiResponse;
use crate::AppState;

/// GET /games/:id
pub async fn get_game(
    State(state): State<AppState>,
    Path(game_id): Path<i64>,
) -> Result<Json<ApiResponse<GameRow>>, ApiError> {
    let game = state
        .db
        .get_game(game_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("game {}", game_id)))?;
    Ok(Json(ApiResponse::success(game)))
}

/// GET /games/:id/players
pub async fn list_players(
    State(state): State<AppState>,
    Path(game_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<GamePlayerRow>>>, ApiError> {
    // 게임 존재 확인 → 없는 게임은 빈 목록이 아니라 404
    state
        .db
        .get_game(game_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("game {}", game_id)))?;
    let players = state.db.list_players(game_id).await?;
    Ok(Json(ApiResponse::success(players)))
}
