//! Event Source Connector
//!
//! 컨트랙트 이벤트 WebSocket 구독 + 재연결 + heartbeat + liveness.
//!
//! ```text
//! ┌─────────────┐   subscribe    ┌──────────────┐
//! │ Event Source │ ─────────────> │ WsEventSource │
//! │  (chain WS)  │ <───── pong ── │   (stream)    │
//! └─────────────┘                └──────┬───────┘
//!                                       │ bounded mpsc
//!                                       ▼
//!                                ┌──────────────┐
//!                                │  EventRouter  │ (단일 소비자,
//!                                └──────────────┘  순차 dispatch)
//! ```
//!
//! # Interview Q&A
//!
//! Q: 연결 상태를 왜 별도 struct(`ConnState`)로 분리했는가?
//! A: backoff 계산과 retry 카운팅을 순수 함수로 만들면 소켓 없이
//!    단위 테스트 가능. 태스크 루프에는 I/O만 남음.
//!
//! Q: 이벤트를 수신 콜백에서 바로 처리하지 않고 채널을 거치는 이유는?
//! A: bounded mpsc + 단일 소비자
//!    - projection이 순차 실행됨 (같은 게임의 이벤트 간 race 제거)
//!    - 큐가 차면 send().await가 소스 읽기를 멈춤 → 자연스러운
//!      backpressure, 이벤트 드롭 없음
//!
//! Q: heartbeat과 liveness의 차이는?
//! A: heartbeat은 소스에 주기적 읽기를 보내 유휴 연결을 활성으로 유지.
//!    liveness는 활동(이벤트 또는 heartbeat 성공) 시각을 감시해서
//!    임계값을 넘으면 강제 재연결. heartbeat 성공은 연결 활동이지
//!    이벤트 신선도가 아니므로 health 판정에는 반영되지 않음.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::IndexerConfig;
use crate::error::IndexError;
use crate::services::monitor::HealthMonitor;
use crate::services::router::{self, EventRouter};

// ============ 연결 상태 ============

/// 재연결 상태 머신. I/O 없는 순수 전이만 담당.
#[derive(Debug)]
pub struct ConnState {
    base: Duration,
    max: Duration,
    pub connected: bool,
    pub retry_count: u32,
    backoff: Duration,
}

impl ConnState {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            connected: false,
            retry_count: 0,
            backoff: base,
        }
    }

    /// 연결 성공: retry 카운터와 backoff 리셋
    pub fn on_connected(&mut self) {
        self.connected = true;
        self.retry_count = 0;
        self.backoff = self.base;
    }

    /// 연결 유실: 이번에 기다릴 지연을 반환하고 다음 backoff를 배가
    pub fn on_disconnect(&mut self) -> Duration {
        self.connected = false;
        self.retry_count += 1;
        let delay = self.backoff;
        self.backoff = (self.backoff * 2).min(self.max);
        delay
    }
}

// ============ 소스 추상화 ============

/// 이벤트 소스. 실제 구현은 WebSocket, 테스트는 스크립트 구현.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn EventStream>, IndexError>;

    /// Heartbeat용 가벼운 읽기 (최신 블록 높이)
    async fn probe_head(&self) -> Result<u64, IndexError>;
}

#[async_trait]
pub trait EventStream: Send {
    /// 다음 이벤트 프레임. `Ok(None)`은 정상 종료(peer close).
    async fn next_event(&mut self) -> Result<Option<Value>, IndexError>;
}

/// 체인 노드 WebSocket 구현
pub struct WsEventSource {
    ws_url: String,
    probe_url: String,
    event_types: Vec<String>,
    http: reqwest::Client,
}

impl WsEventSource {
    pub fn new(ws_url: &str, probe_url: &str, contract_address: &str) -> Self {
        // probe가 정지한 노드에 물려서 liveness 루프를 막으면 안 됨
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            ws_url: ws_url.to_string(),
            probe_url: probe_url.to_string(),
            event_types: router::qualified_event_types(contract_address),
            http,
        }
    }
}

#[async_trait]
impl EventSource for WsEventSource {
    async fn connect(&self) -> Result<Box<dyn EventStream>, IndexError> {
        let (mut ws, _) = connect_async(&self.ws_url)
            .await
            .map_err(|e| IndexError::Transport(e.to_string()))?;

        // 구독할 이벤트 타입 목록을 먼저 보냄
        let subscribe = json!({
            "action": "subscribe",
            "event_types": self.event_types,
        });
        ws.send(Message::Text(subscribe.to_string()))
            .await
            .map_err(|e| IndexError::Transport(e.to_string()))?;

        Ok(Box::new(WsStream { inner: ws }))
    }

    async fn probe_head(&self) -> Result<u64, IndexError> {
        let response = self
            .http
            .get(&self.probe_url)
            .send()
            .await
            .map_err(|e| IndexError::Transport(e.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| IndexError::Transport(e.to_string()))?;
        Ok(router::u64_field(&body, &["height", "block_height", "blockHeight"]).unwrap_or(0))
    }
}

struct WsStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl EventStream for WsStream {
    async fn next_event(&mut self) -> Result<Option<Value>, IndexError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => {
                    let value = serde_json::from_str(&text)
                        .map_err(|e| IndexError::MalformedEvent(e.to_string()))?;
                    return Ok(Some(value));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let value = serde_json::from_slice(&bytes)
                        .map_err(|e| IndexError::MalformedEvent(e.to_string()))?;
                    return Ok(Some(value));
                }
                Some(Ok(Message::Ping(payload))) => {
                    self.inner
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|e| IndexError::Transport(e.to_string()))?;
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Err(e)) => return Err(IndexError::Transport(e.to_string())),
            }
        }
    }
}

// ============ 리스너 ============

/// 연결 수명주기 전체를 소유: 최초 연결, 재연결, heartbeat, liveness
pub struct EventListener {
    source: Arc<dyn EventSource>,
    router: Arc<EventRouter>,
    monitor: Arc<HealthMonitor>,
    cfg: IndexerConfig,
    force_reconnect: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl EventListener {
    pub fn new(
        source: Arc<dyn EventSource>,
        router: Arc<EventRouter>,
        monitor: Arc<HealthMonitor>,
        cfg: IndexerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            source,
            router,
            monitor,
            cfg,
            force_reconnect: Arc::new(Notify::new()),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// 최초 연결 후 백그라운드 태스크 시작.
    ///
    /// 최초 연결은 재시도 예산이 있고, 소진하면 에러 반환 →
    /// 호출자(main)가 프로세스를 종료함. 이후의 재연결은 무제한.
    pub async fn start(&self) -> Result<(), IndexError> {
        let stream = self.connect_initial().await?;

        // 단일 소비자: projection이 이벤트 도착 순서대로 순차 실행됨
        let (tx, mut rx) = mpsc::channel::<Value>(self.cfg.event_queue_depth);
        let router = self.router.clone();
        tokio::spawn(async move {
            while let Some(raw) = rx.recv().await {
                router.dispatch(&raw).await;
            }
        });

        self.spawn_heartbeat();
        self.spawn_liveness();

        tokio::spawn(run_loop(
            self.source.clone(),
            self.monitor.clone(),
            self.cfg.clone(),
            self.force_reconnect.clone(),
            self.shutdown_rx.clone(),
            tx,
            stream,
        ));
        Ok(())
    }

    /// graceful shutdown: 모든 태스크에 종료 신호
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn connect_initial(&self) -> Result<Box<dyn EventStream>, IndexError> {
        let mut conn = ConnState::new(self.cfg.backoff_base, self.cfg.backoff_max);
        loop {
            match self.source.connect().await {
                Ok(stream) => {
                    conn.on_connected();
                    self.monitor.set_connected(true);
                    info!("🔌 connected to event source");
                    return Ok(stream);
                }
                Err(e) => {
                    if conn.retry_count >= self.cfg.max_initial_retries {
                        return Err(IndexError::Transport(format!(
                            "initial connection failed after {} retries: {}",
                            conn.retry_count, e
                        )));
                    }
                    let delay = conn.on_disconnect();
                    self.monitor.record_retry();
                    warn!(
                        error = %e,
                        retry = conn.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        "initial connect failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn spawn_heartbeat(&self) {
        let source = self.source.clone();
        let monitor = self.monitor.clone();
        let mut shutdown = self.shutdown_rx.clone();
        let interval = self.cfg.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await; // 첫 tick은 즉시 발화하므로 건너뜀
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = ticker.tick() => {
                        match source.probe_head().await {
                            Ok(height) => {
                                monitor.record_heartbeat();
                                debug!(height, "heartbeat ok");
                            }
                            Err(e) => warn!(error = %e, "heartbeat probe failed"),
                        }
                    }
                }
            }
        });
    }

    fn spawn_liveness(&self) {
        let source = self.source.clone();
        let monitor = self.monitor.clone();
        let force_reconnect = self.force_reconnect.clone();
        let mut shutdown = self.shutdown_rx.clone();
        let interval = self.cfg.liveness_interval;
        let staleness_ms = self.cfg.staleness_threshold.as_millis() as u64;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = ticker.tick() => {
                        let idle_ms = monitor.ms_since_activity();
                        if idle_ms <= staleness_ms {
                            continue;
                        }
                        // 활동이 끊겼어도 소스가 응답하면 조용한 구간일
                        // 뿐 — probe까지 실패해야 재연결
                        match source.probe_head().await {
                            Ok(_) => monitor.record_heartbeat(),
                            Err(e) => {
                                warn!(idle_ms, error = %e, "stale and probe failed, forcing reconnect");
                                force_reconnect.notify_one();
                            }
                        }
                    }
                }
            }
        });
    }
}

/// 연결을 소유하는 메인 루프. 스트림 종료/에러 시 backoff 재연결.
async fn run_loop(
    source: Arc<dyn EventSource>,
    monitor: Arc<HealthMonitor>,
    cfg: IndexerConfig,
    force_reconnect: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
    tx: mpsc::Sender<Value>,
    mut stream: Box<dyn EventStream>,
) {
    let mut conn = ConnState::new(cfg.backoff_base, cfg.backoff_max);
    conn.on_connected();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("event listener shutting down");
                monitor.set_connected(false);
                return;
            }
            _ = force_reconnect.notified() => {
                warn!("stale connection, dropping socket");
                monitor.set_connected(false);
            }
            frame = stream.next_event() => {
                match frame {
                    Ok(Some(raw)) => {
                        // 큐가 차면 여기서 대기 → 소스 읽기에 backpressure
                        if tx.send(raw).await.is_err() {
                            return;
                        }
                        continue;
                    }
                    Ok(None) => warn!("event stream closed by peer"),
                    Err(IndexError::MalformedEvent(reason)) => {
                        // 프레임 하나만 드롭, 연결은 유지
                        warn!(%reason, "dropping malformed frame");
                        monitor.record_event_failed();
                        continue;
                    }
                    Err(e) => warn!(error = %e, "event stream error"),
                }
                monitor.set_connected(false);
            }
        }

        // 재연결: 초기 연결과 달리 재시도 무제한
        stream = loop {
            let delay = conn.on_disconnect();
            monitor.record_retry();
            info!(
                retry = conn.retry_count,
                delay_ms = delay.as_millis() as u64,
                "reconnecting to event source"
            );
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            match source.connect().await {
                Ok(new_stream) => {
                    conn.on_connected();
                    monitor.set_connected(true);
                    info!("🔌 reconnected to event source");
                    break new_stream;
                }
                Err(e) => warn!(error = %e, "reconnect failed"),
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::mock::MockStore;
    use crate::db::ReadModelStore;
    use crate::services::fanout::GameHub;
    use crate::services::projector::Projector;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    // ============ ConnState ============

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut conn = ConnState::new(Duration::from_secs(2), Duration::from_secs(60));
        assert_eq!(conn.on_disconnect(), Duration::from_secs(2));
        assert_eq!(conn.on_disconnect(), Duration::from_secs(4));
        assert_eq!(conn.on_disconnect(), Duration::from_secs(8));
        assert_eq!(conn.on_disconnect(), Duration::from_secs(16));
        assert_eq!(conn.on_disconnect(), Duration::from_secs(32));
        assert_eq!(conn.on_disconnect(), Duration::from_secs(60));
        // 상한 도달 후 유지
        assert_eq!(conn.on_disconnect(), Duration::from_secs(60));
        assert_eq!(conn.retry_count, 7);
    }

    #[test]
    fn test_backoff_resets_on_connect() {
        let mut conn = ConnState::new(Duration::from_secs(2), Duration::from_secs(60));
        conn.on_disconnect();
        conn.on_disconnect();
        conn.on_connected();
        assert!(conn.connected);
        assert_eq!(conn.retry_count, 0);
        assert_eq!(conn.on_disconnect(), Duration::from_secs(2));
    }

    // ============ 스크립트 소스 ============

    type Frame = Result<Value, IndexError>;

    struct ScriptedStream {
        frames: VecDeque<Frame>,
    }

    #[async_trait]
    impl EventStream for ScriptedStream {
        async fn next_event(&mut self) -> Result<Option<Value>, IndexError> {
            match self.frames.pop_front() {
                Some(frame) => frame.map(Some),
                // 스크립트 소진 후 재연결 루프가 돌지 않도록 영원히 대기
                None => futures_util::future::pending().await,
            }
        }
    }

    struct ScriptedSource {
        connections: Mutex<VecDeque<VecDeque<Frame>>>,
        connect_failures: AtomicU32,
    }

    impl ScriptedSource {
        fn new(connections: Vec<Vec<Frame>>) -> Self {
            Self {
                connections: Mutex::new(
                    connections.into_iter().map(VecDeque::from).collect(),
                ),
                connect_failures: AtomicU32::new(0),
            }
        }

        fn failing(failures: u32) -> Self {
            let source = Self::new(vec![]);
            source.connect_failures.store(failures, Ordering::SeqCst);
            source
        }
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn connect(&self) -> Result<Box<dyn EventStream>, IndexError> {
            if self.connect_failures.load(Ordering::SeqCst) > 0 {
                self.connect_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(IndexError::Transport("connection refused".into()));
            }
            let frames = self
                .connections
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default();
            Ok(Box::new(ScriptedStream { frames }))
        }

        async fn probe_head(&self) -> Result<u64, IndexError> {
            Ok(42)
        }
    }

    fn test_cfg() -> IndexerConfig {
        IndexerConfig {
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(4),
            max_initial_retries: 2,
            heartbeat_interval: Duration::from_secs(3600),
            liveness_interval: Duration::from_secs(3600),
            staleness_threshold: Duration::from_secs(3600),
            event_queue_depth: 16,
            fanout_debounce: Duration::from_millis(5),
        }
    }

    fn listener_with(
        source: Arc<dyn EventSource>,
        cfg: IndexerConfig,
    ) -> (EventListener, Arc<MockStore>, Arc<HealthMonitor>) {
        let store = Arc::new(MockStore::new());
        let hub = Arc::new(GameHub::new(cfg.fanout_debounce));
        let monitor = Arc::new(HealthMonitor::new(cfg.staleness_threshold));
        let projector = Arc::new(Projector::new(
            store.clone() as Arc<dyn ReadModelStore>,
            hub,
        ));
        let router = Arc::new(EventRouter::new(projector, monitor.clone()));
        (
            EventListener::new(source, router, monitor.clone(), cfg),
            store,
            monitor,
        )
    }

    fn game_created_frame(game_id: i64, seq: i64) -> Frame {
        Ok(json!({
            "type": "GameCreated",
            "blockHeight": seq,
            "data": { "gameId": game_id, "creator": "0xA", "question": "q" },
        }))
    }

    // ============ 리스너 동작 ============

    #[tokio::test]
    async fn test_initial_retry_budget_exhausted_is_fatal() {
        let source = Arc::new(ScriptedSource::failing(100));
        let (listener, _store, monitor) = listener_with(source, test_cfg());

        let err = listener.start().await.unwrap_err();
        assert!(matches!(err, IndexError::Transport(_)));
        assert!(!monitor.is_connected());
        // 예산 2 → 재시도 2회 기록
        assert_eq!(monitor.retries(), 2);
    }

    #[tokio::test]
    async fn test_initial_retries_within_budget_succeed() {
        let source = ScriptedSource::new(vec![vec![game_created_frame(7, 1)]]);
        source.connect_failures.store(2, Ordering::SeqCst);
        let (listener, store, monitor) = listener_with(Arc::new(source), test_cfg());

        listener.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(monitor.is_connected());
        assert!(store.get_game(7).await.unwrap().is_some());
        listener.stop();
    }

    #[tokio::test]
    async fn test_events_flow_through_to_read_model() {
        let source = ScriptedSource::new(vec![vec![
            game_created_frame(7, 1),
            Ok(json!({
                "type": "PlayerJoined",
                "blockHeight": 2,
                "data": { "gameId": 7, "player": "0xB" },
            })),
        ]]);
        let (listener, store, monitor) = listener_with(Arc::new(source), test_cfg());

        listener.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let game = store.get_game(7).await.unwrap().unwrap();
        assert_eq!(game.total_players, 1);
        assert_eq!(monitor.events_processed(), 2);
        assert_eq!(monitor.events_failed(), 0);
        listener.stop();
    }

    #[tokio::test]
    async fn test_malformed_frame_dropped_connection_survives() {
        let source = ScriptedSource::new(vec![vec![
            Err(IndexError::MalformedEvent("not json".into())),
            game_created_frame(7, 1),
        ]]);
        let (listener, store, monitor) = listener_with(Arc::new(source), test_cfg());

        listener.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // 깨진 프레임은 카운트만 되고 이후 이벤트는 정상 처리
        assert_eq!(monitor.events_failed(), 1);
        assert!(store.get_game(7).await.unwrap().is_some());
        assert!(monitor.is_connected());
        listener.stop();
    }

    #[tokio::test]
    async fn test_transport_error_triggers_reconnect() {
        let source = ScriptedSource::new(vec![
            vec![
                game_created_frame(7, 1),
                Err(IndexError::Transport("reset by peer".into())),
            ],
            vec![game_created_frame(8, 2)],
        ]);
        let (listener, store, monitor) = listener_with(Arc::new(source), test_cfg());

        listener.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // 두 번째 연결의 이벤트까지 도달 = 재연결 성공
        assert!(store.get_game(7).await.unwrap().is_some());
        assert!(store.get_game(8).await.unwrap().is_some());
        assert!(monitor.is_connected());
        assert!(monitor.retries() >= 1);
        listener.stop();
    }

    #[tokio::test]
    async fn test_stop_terminates_run_loop() {
        let source = ScriptedSource::new(vec![vec![game_created_frame(7, 1)]]);
        let (listener, _store, monitor) = listener_with(Arc::new(source), test_cfg());

        listener.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        listener.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!monitor.is_connected());
    }
}
