//! Real-Time Fan-out
//!
//! Projection 커밋 이후의 변경 알림을 game_id 단위 토픽으로 브로드캐스트.
//!
//! # Architecture
//!
//! ```text
//! Projector ──publish──▶ ┌──────────────┐          ┌────────────┐
//!                        │   GameHub    │─topic 7─▶│ WS client  │
//!                        │ (코얼레싱)    │          ├────────────┤
//!                        │  debounce    │─topic 7─▶│ WS client  │
//!                        │   ~100ms     │          ├────────────┤
//!                        └──────────────┘─topic 9─▶│ WS client  │
//!                                                  └────────────┘
//! ```
//!
//! # Design Decision
//!
//! - `tokio::sync::broadcast` 사용: send는 non-blocking이라 느린 구독자가
//!   Projection Engine을 절대 막지 못함. lag가 쌓이면 구독자 쪽에서
//!   오래된 메시지가 drop됨 (최신 스냅샷만 중요하므로 올바른 동작).
//! - 코얼레싱: debounce 윈도우 내 같은 게임의 연속 publish는 마지막
//!   스냅샷 하나로 합쳐짐 — 느린 클라이언트 flooding 방지.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// 구독자에게 전달되는 업데이트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpdateKind {
    GameUpdate,
    PlayerAction,
    RoundCompleted,
    GameCompleted,
}

impl UpdateKind {
    /// 클라이언트 프로토콜의 type 필드 값
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::GameUpdate => "game-update",
            UpdateKind::PlayerAction => "player-action",
            UpdateKind::RoundCompleted => "round-completed",
            UpdateKind::GameCompleted => "game-completed",
        }
    }
}

/// 하나의 변경 알림 (entity 스냅샷 포함)
#[derive(Debug, Clone, Serialize)]
pub struct GameUpdate {
    pub kind: UpdateKind,
    pub game_id: i64,
    pub payload: Value,
}

/// 토픽별 코얼레싱 버퍼. lock 하에서만 접근.
struct Pending {
    latest: Option<GameUpdate>,
    flush_scheduled: bool,
}

struct Topic {
    tx: broadcast::Sender<GameUpdate>,
    pending: Arc<Mutex<Pending>>,
}

/// game_id 단위 실시간 fan-out 허브
pub struct GameHub {
    topics: RwLock<HashMap<i64, Topic>>,
    debounce: Duration,
}

impl GameHub {
    pub fn new(debounce: Duration) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            debounce,
        }
    }

    /// 게임 토픽 구독. 토픽이 없으면 생성.
    pub fn subscribe(&self, game_id: i64) -> broadcast::Receiver<GameUpdate> {
        let mut topics = self.topics.write().unwrap();
        let topic = topics.entry(game_id).or_insert_with(new_topic);
        topic.tx.subscribe()
    }

    /// 변경 알림 publish (fire-and-forget, 전달을 기다리지 않음)
    ///
    /// debounce 윈도우 내 같은 게임의 연속 호출은 마지막 업데이트만
    /// 구독자에게 전달됨.
    pub fn publish(&self, update: GameUpdate) {
        let (tx, pending) = {
            let mut topics = self.topics.write().unwrap();
            let topic = topics.entry(update.game_id).or_insert_with(new_topic);
            (topic.tx.clone(), topic.pending.clone())
        };

        let schedule_flush = {
            let mut buf = pending.lock().unwrap();
            buf.latest = Some(update);
            if buf.flush_scheduled {
                false
            } else {
                buf.flush_scheduled = true;
                true
            }
        };

        if schedule_flush {
            let debounce = self.debounce;
            tokio::spawn(async move {
                tokio::time::sleep(debounce).await;
                let latest = {
                    let mut buf = pending.lock().unwrap();
                    buf.flush_scheduled = false;
                    buf.latest.take()
                };
                if let Some(update) = latest {
                    // 구독자 없으면 Err — 무시 (projection 경로에 무해)
                    let delivered = tx.send(update).unwrap_or(0);
                    debug!(subscribers = delivered, "flushed coalesced update");
                }
            });
        }
    }

    /// 활성 토픽 수 (metrics용)
    pub fn active_topics(&self) -> usize {
        self.topics.read().unwrap().len()
    }
}

fn new_topic() -> Topic {
    let (tx, _) = broadcast::channel(256);
    Topic {
        tx,
        pending: Arc::new(Mutex::new(Pending {
            latest: None,
            flush_scheduled: false,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time::{sleep, timeout};

    fn update(game_id: i64, n: u64) -> GameUpdate {
        GameUpdate {
            kind: UpdateKind::GameUpdate,
            game_id,
            payload: json!({ "n": n }),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let hub = GameHub::new(Duration::from_millis(10));
        let mut rx = hub.subscribe(7);

        hub.publish(update(7, 1));

        let received = timeout(Duration::from_millis(200), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.game_id, 7);
        assert_eq!(received.payload["n"], 1);
    }

    #[tokio::test]
    async fn test_rapid_publishes_coalesce_to_last() {
        // debounce 윈도우 내 N번 publish → 마지막 스냅샷 1번만 전달
        let hub = GameHub::new(Duration::from_millis(50));
        let mut rx = hub.subscribe(7);

        for n in 1..=5 {
            hub.publish(update(7, n));
        }

        let received = timeout(Duration::from_millis(300), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.payload["n"], 5);

        // 윈도우가 지나도 추가 전달 없음
        sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let hub = GameHub::new(Duration::from_millis(10));
        let mut rx7 = hub.subscribe(7);
        let mut rx9 = hub.subscribe(9);

        hub.publish(update(9, 42));

        let received = timeout(Duration::from_millis(200), rx9.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.game_id, 9);

        // 다른 게임 구독자에게는 아무것도 안 감
        sleep(Duration::from_millis(50)).await;
        assert!(rx7.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_harmless() {
        let hub = GameHub::new(Duration::from_millis(10));
        hub.publish(update(1, 1));
        sleep(Duration::from_millis(50)).await;
        assert_eq!(hub.active_topics(), 1);
    }

    #[tokio::test]
    async fn test_separate_windows_deliver_separately() {
        let hub = GameHub::new(Duration::from_millis(20));
        let mut rx = hub.subscribe(7);

        hub.publish(update(7, 1));
        sleep(Duration::from_millis(80)).await;
        hub.publish(update(7, 2));

        let first = timeout(Duration::from_millis(200), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let second = timeout(Duration::from_millis(200), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.payload["n"], 1);
        assert_eq!(second.payload["n"], 2);
    }
}
