//! WebSocket Routes
//!
//! 게임별 실시간 업데이트 구독 엔드포인트
//!
//! # Protocol
//!
//! ```text
//! client → {"action":"subscribe","gameId":7}
//! server → {"type":"subscription-confirmed","gameId":7}
//! server → {"type":"game-update","gameId":7, ...snapshot}
//! server → {"type":"player-action","gameId":7, ...}
//! client → {"action":"unsubscribe","gameId":7}
//! client → {"action":"ping"}    server → {"type":"pong"}
//! ```
//!
//! # Interview Q&A
//!
//! Q: 소켓 송신을 왜 mpsc 채널 뒤의 단일 태스크로 모았는가?
//! A: axum의 WebSocket sender는 동시 send가 안 됨. 구독한 게임마다
//!    forward 태스크가 있으므로, 전부 mpsc로 보내고 writer 태스크
//!    하나가 순서대로 소켓에 씀. 느린 클라이언트는 자기 채널만 채움.

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::services::fanout::GameUpdate;
use crate::AppState;

/// 클라이언트 → 서버 메시지
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum ClientMessage {
    Subscribe {
        #[serde(rename = "gameId")]
        game_id: i64,
    },
    Unsubscribe {
        #[serde(rename = "gameId")]
        game_id: i64,
    },
    Ping,
}

/// GET /ws 업그레이드 핸들러
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "websocket client connected");

    // 단일 writer: 모든 송신이 이 채널을 거침
    let (tx, mut rx) = mpsc::channel::<String>(64);
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // game_id → forward 태스크. 연결마다 독립.
    let mut subscriptions: HashMap<i64, JoinHandle<()>> = HashMap::new();

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                let Ok(client_msg) = serde_json::from_str::<ClientMessage>(&text) else {
                    let _ = tx
                        .send(json!({ "type": "error", "error": "invalid message" }).to_string())
                        .await;
                    continue;
                };
                handle_client_message(&state, &conn_id, &tx, &mut subscriptions, client_msg).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // 연결 종료: forward 태스크 전부 정리
    for (_, handle) in subscriptions.drain() {
        handle.abort();
    }
    writer.abort();
    info!(conn_id = %conn_id, "websocket client disconnected");
}

async fn handle_client_message(
    state: &AppState,
    conn_id: &str,
    tx: &mpsc::Sender<String>,
    subscriptions: &mut HashMap<i64, JoinHandle<()>>,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::Subscribe { game_id } => {
            if subscriptions.contains_key(&game_id) {
                // 중복 구독은 확인만 다시 보냄
                let _ = tx.send(confirm_frame(game_id)).await;
                return;
            }
            debug!(conn_id = %conn_id, game_id, "subscribe");

            let mut updates = state.hub.subscribe(game_id);
            let forward_tx = tx.clone();
            let handle = tokio::spawn(async move {
                loop {
                    match updates.recv().await {
                        Ok(update) => {
                            if forward_tx.send(wire_frame(&update)).await.is_err() {
                                return;
                            }
                        }
                        // lagged: 코얼레싱된 최신 스냅샷이 곧 다시 오므로 계속
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
            });
            subscriptions.insert(game_id, handle);
            let _ = tx.send(confirm_frame(game_id)).await;
        }
        ClientMessage::Unsubscribe { game_id } => {
            debug!(conn_id = %conn_id, game_id, "unsubscribe");
            if let Some(handle) = subscriptions.remove(&game_id) {
                handle.abort();
            }
            let _ = tx
                .send(json!({ "type": "unsubscribed", "gameId": game_id }).to_string())
                .await;
        }
        ClientMessage::Ping => {
            let _ = tx.send(json!({ "type": "pong" }).to_string()).await;
        }
    }
}

fn confirm_frame(game_id: i64) -> String {
    json!({ "type": "subscription-confirmed", "gameId": game_id }).to_string()
}

/// 업데이트를 wire 포맷으로: payload 필드에 type/gameId를 덧붙임
fn wire_frame(update: &GameUpdate) -> String {
    let mut frame = match &update.payload {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("payload".to_string(), other.clone());
            map
        }
    };
    frame.insert("type".to_string(), json!(update.kind.as_str()));
    frame.insert("gameId".to_string(), json!(update.game_id));
    Value::Object(frame).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fanout::UpdateKind;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"action":"subscribe","gameId":7}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Subscribe { game_id: 7 }));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"action":"unsubscribe","gameId":7}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Unsubscribe { game_id: 7 }));

        let msg: ClientMessage = serde_json::from_str(r#"{"action":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn test_unknown_action_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"action":"explode"}"#).is_err());
    }

    #[test]
    fn test_wire_frame_merges_type_and_game_id() {
        let update = GameUpdate {
            kind: UpdateKind::PlayerAction,
            game_id: 7,
            payload: json!({ "player": "0xb", "action": "joined" }),
        };
        let frame: Value = serde_json::from_str(&wire_frame(&update)).unwrap();
        assert_eq!(frame["type"], "player-action");
        assert_eq!(frame["gameId"], 7);
        assert_eq!(frame["player"], "0xb");
    }

    #[test]
    fn test_wire_frame_non_object_payload_wrapped() {
        let update = GameUpdate {
            kind: UpdateKind::GameUpdate,
            game_id: 3,
            payload: json!(null),
        };
        let frame: Value = serde_json::from_str(&wire_frame(&update)).unwrap();
        assert_eq!(frame["type"], "game-update");
        assert_eq!(frame["payload"], Value::Null);
    }
}
