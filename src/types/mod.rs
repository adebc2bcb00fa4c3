//! Common Types Module
//!
//! 애플리케이션 전반에서 사용되는 공통 타입 정의

use serde::{Deserialize, Serialize};

/// API 응답 래퍼
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// 온체인 플레이어 주소 (lowercase 정규화)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainAddress(String);

impl ChainAddress {
    pub fn new(addr: &str) -> Result<Self, String> {
        let addr = addr.trim().to_lowercase();
        if addr.starts_with("0x") && addr.len() > 2 {
            Ok(Self(addr))
        } else {
            Err("Invalid chain address format".to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// 게임 상태 머신
///
/// # State Machine
///
/// ```text
/// ZeroPhase ──▶ CommitPhase ──▶ RevealPhase ──▶ ProcessingRound
///                    ▲                                │
///                    └──────── (다음 라운드) ◀────────┤
///                                                     ▼
///                                                 Completed (terminal)
/// ```
///
/// Completed는 terminal 상태: 이후 어떤 이벤트도 상태를 되돌릴 수 없음.
/// CommitPhase는 라운드마다 재진입 가능 (current_round 단조 증가가 전진을 보장).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameState {
    ZeroPhase,
    CommitPhase,
    RevealPhase,
    ProcessingRound,
    Completed,
}

impl GameState {
    /// DB 저장용 문자열 (TEXT 컬럼)
    pub fn as_str(&self) -> &'static str {
        match self {
            GameState::ZeroPhase => "zero_phase",
            GameState::CommitPhase => "commit_phase",
            GameState::RevealPhase => "reveal_phase",
            GameState::ProcessingRound => "processing_round",
            GameState::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "zero_phase" => Some(GameState::ZeroPhase),
            "commit_phase" => Some(GameState::CommitPhase),
            "reveal_phase" => Some(GameState::RevealPhase),
            "processing_round" => Some(GameState::ProcessingRound),
            "completed" => Some(GameState::Completed),
            _ => None,
        }
    }

    /// 상태 전이 적용. Completed는 absorbing state이므로 그대로 유지.
    ///
    /// 라운드 간 CommitPhase 재진입은 허용 — 전진성은 current_round의
    /// 단조 증가와 Completed terminal 규칙으로 보장됨.
    pub fn transition(self, target: GameState) -> GameState {
        if self == GameState::Completed {
            GameState::Completed
        } else {
            target
        }
    }
}

/// 플레이어 상태 (forward-only: active → eliminated | winner)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerStatus {
    Active,
    Eliminated,
    Winner,
}

impl PlayerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerStatus::Active => "active",
            PlayerStatus::Eliminated => "eliminated",
            PlayerStatus::Winner => "winner",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(PlayerStatus::Active),
            "eliminated" => Some(PlayerStatus::Eliminated),
            "winner" => Some(PlayerStatus::Winner),
            _ => None,
        }
    }
}

/// 투표 값 정규화
///
/// 이벤트 transport는 SDK 버전에 따라 boolean 또는 문자열 토큰으로
/// 투표 값을 전달함. 둘 다 수용해서 boolean으로 정규화.
pub fn normalize_vote(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => match s.to_ascii_uppercase().as_str() {
            "YES" | "TRUE" | "1" => Some(true),
            "NO" | "FALSE" | "0" => Some(false),
            _ => None,
        },
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        _ => None,
    }
}
