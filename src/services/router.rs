//! Event Router
//!
//! 인바운드 이벤트의 타입 이름을 핸들러 레지스트리에서 찾아 dispatch하고,
//! transport마다 다른 envelope 모양을 정규화함.
//!
//! # Design Decision
//!
//! 이벤트 transport는 SDK 버전에 따라 payload를 `data` 필드 아래에
//! 중첩하거나 최상위에 평탄화해서 보냄. 핸들러마다 ad hoc presence
//! check를 흩뿌리는 대신, 여기서 한 번 정규화하고 tagged result로
//! 반환 (`Ok(payload)` / `MissingGameId`).
//!
//! 타입 문자열 switch 대신 레지스트리 기반: 구독 타입 전체에 핸들러가
//! 있는지 시작 시점에 검증 → 조용히 무시되는 unknown type을 조기에 잡음.

use std::sync::Arc;

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::services::monitor::HealthMonitor;
use crate::services::projector::Projector;

/// 컨트랙트가 발행하는 이벤트 short name 전체 (구독 대상과 1:1)
pub const EVENT_SHORT_NAMES: [&str; 9] = [
    "GameCreated",
    "PlayerJoined",
    "VoteCommitted",
    "VoteRevealed",
    "CommitDeadlineSet",
    "RevealDeadlineSet",
    "RoundCompleted",
    "GameCompleted",
    "PrizeDistributed",
];

/// 등록된 이벤트 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    GameCreated,
    PlayerJoined,
    VoteCommitted,
    VoteRevealed,
    CommitDeadlineSet,
    RevealDeadlineSet,
    RoundCompleted,
    GameCompleted,
    PrizeDistributed,
}

impl EventKind {
    pub fn from_short_name(name: &str) -> Option<Self> {
        match name {
            "GameCreated" => Some(EventKind::GameCreated),
            "PlayerJoined" => Some(EventKind::PlayerJoined),
            "VoteCommitted" => Some(EventKind::VoteCommitted),
            "VoteRevealed" => Some(EventKind::VoteRevealed),
            "CommitDeadlineSet" => Some(EventKind::CommitDeadlineSet),
            "RevealDeadlineSet" => Some(EventKind::RevealDeadlineSet),
            "RoundCompleted" => Some(EventKind::RoundCompleted),
            "GameCompleted" => Some(EventKind::GameCompleted),
            "PrizeDistributed" => Some(EventKind::PrizeDistributed),
            _ => None,
        }
    }
}

/// 컨트랙트 주소 스코프의 fully-qualified 이벤트 타입 목록 생성
///
/// 형식: `A.{contract}.MinorityGame.{EventName}`
pub fn qualified_event_types(contract_address: &str) -> Vec<String> {
    EVENT_SHORT_NAMES
        .iter()
        .map(|name| format!("A.{}.MinorityGame.{}", contract_address, name))
        .collect()
}

/// fully-qualified 타입 이름의 마지막 path component
pub fn short_name(full: &str) -> &str {
    full.rsplit('.').next().unwrap_or(full)
}

/// 구독 타입 전체에 핸들러가 등록돼 있는지 시작 시점에 검증
pub fn validate_registry(event_types: &[String]) -> Result<()> {
    for full in event_types {
        let name = short_name(full);
        if EventKind::from_short_name(name).is_none() {
            bail!("no handler registered for subscribed event type `{}`", full);
        }
    }
    Ok(())
}

/// Envelope 정규화 실패
#[derive(Debug, Error, PartialEq)]
pub enum EnvelopeError {
    #[error("event is not a JSON object")]
    NotAnObject,
    #[error("neither `data` nor the top-level object carries a game id")]
    MissingGameId,
}

/// Envelope 정규화: 중첩(`data`) / 평탄화 양쪽 모양 수용
///
/// 반환: (payload, game_id). 어느 쪽에도 game id가 없으면 fail closed.
pub fn normalize_envelope(event: &Value) -> Result<(Value, i64), EnvelopeError> {
    if !event.is_object() {
        return Err(EnvelopeError::NotAnObject);
    }

    // 표준 모양: payload가 data 아래에 중첩
    if let Some(data) = event.get("data").filter(|d| d.is_object()) {
        if let Some(game_id) = game_id_field(data) {
            return Ok((data.clone(), game_id));
        }
    }

    // legacy producer: payload가 최상위에 평탄화
    if let Some(game_id) = game_id_field(event) {
        return Ok((event.clone(), game_id));
    }

    Err(EnvelopeError::MissingGameId)
}

fn game_id_field(value: &Value) -> Option<i64> {
    u64_field(value, &["gameId", "game_id"]).map(|v| v as i64)
}

/// u64 필드 추출 (숫자 또는 숫자 문자열 — 온체인 JSON은 u64를
/// 문자열로 직렬화하는 경우가 많음)
pub fn u64_field(value: &Value, names: &[&str]) -> Option<u64> {
    for name in names {
        match value.get(name) {
            Some(Value::Number(n)) => {
                if let Some(v) = n.as_u64() {
                    return Some(v);
                }
            }
            Some(Value::String(s)) => {
                if let Ok(v) = s.parse::<u64>() {
                    return Some(v);
                }
            }
            _ => {}
        }
    }
    None
}

/// 문자열 필드 추출
pub fn str_field<'a>(value: &'a Value, names: &[&str]) -> Option<&'a str> {
    for name in names {
        if let Some(s) = value.get(name).and_then(Value::as_str) {
            return Some(s);
        }
    }
    None
}

/// decimal 필드 추출 (문자열 또는 숫자)
pub fn decimal_field(value: &Value, names: &[&str]) -> Option<Decimal> {
    for name in names {
        match value.get(name) {
            Some(Value::String(s)) => {
                if let Ok(v) = s.parse::<Decimal>() {
                    return Some(v);
                }
            }
            Some(Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    return Some(Decimal::from(i));
                }
                if let Some(f) = n.as_f64() {
                    if let Ok(v) = Decimal::try_from(f) {
                        return Some(v);
                    }
                }
            }
            _ => {}
        }
    }
    None
}

/// dispatch 결과 (리스너 로그/지표용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied,
    SkippedUnknown,
    Failed,
}

/// 이벤트 라우터: 타입 조회 → envelope 정규화 → projection 호출
pub struct EventRouter {
    projector: Arc<Projector>,
    monitor: Arc<HealthMonitor>,
}

impl EventRouter {
    pub fn new(projector: Arc<Projector>, monitor: Arc<HealthMonitor>) -> Self {
        Self { projector, monitor }
    }

    /// 단일 이벤트 dispatch
    ///
    /// 실패는 해당 이벤트 하나로 국한됨 — 로그만 남기고 구독은 유지.
    pub async fn dispatch(&self, raw: &Value) -> DispatchOutcome {
        let Some(type_name) = raw.get("type").and_then(Value::as_str) else {
            warn!("event without type field, skipping");
            self.monitor.record_event_failed();
            return DispatchOutcome::Failed;
        };

        let name = short_name(type_name);
        let Some(kind) = EventKind::from_short_name(name) else {
            // unknown type은 에러가 아님 — 컨트랙트가 새 이벤트를
            // 추가해도 구버전 인덱서가 죽으면 안 됨
            debug!(event_type = type_name, "unknown event type, ignoring");
            return DispatchOutcome::SkippedUnknown;
        };

        let (payload, game_id) = match normalize_envelope(raw) {
            Ok(parts) => parts,
            Err(err) => {
                warn!(event_type = type_name, %err, "malformed event envelope, skipping");
                self.monitor.record_event_failed();
                return DispatchOutcome::Failed;
            }
        };

        // 이벤트 시퀀스 = 소스 블록 높이. envelope 또는 payload에 위치.
        let seq = u64_field(raw, &["blockHeight", "block_height", "sequence"])
            .or_else(|| u64_field(&payload, &["blockHeight", "block_height", "sequence"]))
            .unwrap_or(0) as i64;

        match self.projector.apply(kind, game_id, &payload, seq).await {
            Ok(()) => {
                self.monitor.record_event_ok();
                DispatchOutcome::Applied
            }
            Err(err) => {
                warn!(event_type = type_name, game_id, %err, "projection failed, event dropped");
                self.monitor.record_event_failed();
                DispatchOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_short_name() {
        assert_eq!(short_name("A.0xabc.MinorityGame.GameCreated"), "GameCreated");
        assert_eq!(short_name("GameCreated"), "GameCreated");
    }

    #[test]
    fn test_qualified_event_types_cover_registry() {
        let types = qualified_event_types("0xabc");
        assert_eq!(types.len(), EVENT_SHORT_NAMES.len());
        assert!(types[0].starts_with("A.0xabc.MinorityGame."));
        // 시작 시점 검증이 전체 구독 타입을 통과시켜야 함
        validate_registry(&types).unwrap();
    }

    #[test]
    fn test_validate_registry_rejects_unknown() {
        let types = vec!["A.0xabc.MinorityGame.SomethingNew".to_string()];
        assert!(validate_registry(&types).is_err());
    }

    #[test]
    fn test_normalize_nested_envelope() {
        let event = json!({
            "type": "A.0xabc.MinorityGame.GameCreated",
            "data": { "gameId": 7, "creator": "0xA" }
        });
        let (payload, game_id) = normalize_envelope(&event).unwrap();
        assert_eq!(game_id, 7);
        assert_eq!(payload["creator"], "0xA");
    }

    #[test]
    fn test_normalize_flat_envelope() {
        // legacy producer: data 없이 평탄화된 모양
        let event = json!({
            "type": "A.0xabc.MinorityGame.PlayerJoined",
            "gameId": "12",
            "player": "0xB"
        });
        let (payload, game_id) = normalize_envelope(&event).unwrap();
        assert_eq!(game_id, 12);
        assert_eq!(payload["player"], "0xB");
    }

    #[test]
    fn test_normalize_missing_game_id_fails_closed() {
        let event = json!({
            "type": "A.0xabc.MinorityGame.GameCreated",
            "data": { "creator": "0xA" }
        });
        assert_eq!(
            normalize_envelope(&event).unwrap_err(),
            EnvelopeError::MissingGameId
        );
    }

    #[test]
    fn test_u64_field_accepts_string_and_number() {
        let v = json!({ "round": "3", "count": 5 });
        assert_eq!(u64_field(&v, &["round"]), Some(3));
        assert_eq!(u64_field(&v, &["count"]), Some(5));
        assert_eq!(u64_field(&v, &["missing"]), None);
    }

    #[test]
    fn test_decimal_field() {
        let v = json!({ "fee": "1.5", "amount": 10 });
        assert_eq!(decimal_field(&v, &["fee"]), Some("1.5".parse().unwrap()));
        assert_eq!(decimal_field(&v, &["amount"]), Some(Decimal::from(10)));
    }
}
