//! Liveness/Health Monitor
//!
//! # Interview Q&A
//!
//! Q: "살아있음"을 어떻게 정의하는가?
//! A: 세 가지 조건의 AND
//!    1. 리스너가 connected 상태
//!    2. 마지막으로 처리에 성공한 이벤트가 staleness 임계값 이내
//!    3. 이벤트 처리 성공률이 95% 이상 (최소 표본 확보 후)
//!
//!    메모리/CPU는 보조 지표 — health 판정에는 반영하지 않음
//!    (리소스가 높다고 트래픽을 차단하면 오히려 장애 확대)
//!
//! Q: heartbeat 성공과 이벤트 수신을 왜 구분해서 기록하는가?
//! A: 용도가 다름
//!    - 재연결 판단: 이벤트 또는 heartbeat 중 아무 활동이나 있으면 연결은 정상
//!    - health 판정: 실제 이벤트가 안 들어오면 소비자 입장에서는 stale

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use sysinfo::System;

/// 성공률 판정에 필요한 최소 표본 수
const MIN_SAMPLES: u64 = 20;
/// 이벤트 처리 성공률 하한
const RATIO_FLOOR: f64 = 0.95;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// 파생 health 판정
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HealthVerdict {
    pub healthy: bool,
    pub connected: bool,
    pub fresh: bool,
    pub ratio_ok: bool,
}

/// 프로세스 리소스 스냅샷 (보조 지표)
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResourceSnapshot {
    pub memory_bytes: u64,
    pub total_memory_bytes: u64,
    pub cpu_percent: f32,
}

/// 인덱서 liveness 추적기
///
/// 리스너/라우터/프로젝터가 기록하고 /health, /metrics가 읽음.
/// 모든 카운터는 atomic — 이벤트 처리 경로를 잠그지 않음.
pub struct HealthMonitor {
    started_at: Instant,
    staleness_threshold: Duration,

    connected: AtomicBool,
    /// 누적 재연결 시도 횟수 (단조 증가)
    retry_count: AtomicU64,

    /// 마지막 성공 처리 이벤트 (epoch ms, 0 = 아직 없음)
    last_event_ms: AtomicU64,
    /// 마지막 활동 = 이벤트 또는 heartbeat 성공 (epoch ms)
    last_activity_ms: AtomicU64,

    events_ok: AtomicU64,
    events_failed: AtomicU64,

    system: Mutex<System>,
}

impl HealthMonitor {
    pub fn new(staleness_threshold: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            staleness_threshold,
            connected: AtomicBool::new(false),
            retry_count: AtomicU64::new(0),
            last_event_ms: AtomicU64::new(0),
            last_activity_ms: AtomicU64::new(0),
            events_ok: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            system: Mutex::new(System::new()),
        }
    }

    // ============ 기록 (writer: listener/router) ============

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retry_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_ok(&self) {
        let now = now_ms();
        self.last_event_ms.store(now, Ordering::Relaxed);
        self.last_activity_ms.store(now, Ordering::Relaxed);
        self.events_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_failed(&self) {
        // 실패도 "활동"은 맞음 — 연결 자체는 살아있다는 증거
        self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
        self.events_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
    }

    // ============ 조회 (reader: routes/listener) ============

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retry_count.load(Ordering::Relaxed)
    }

    pub fn events_processed(&self) -> u64 {
        self.events_ok.load(Ordering::Relaxed)
    }

    pub fn events_failed(&self) -> u64 {
        self.events_failed.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// 마지막 성공 이벤트 이후 경과 ms. 이벤트가 없었으면 프로세스
    /// 시작 이후 경과 시간 (시작 직후부터 staleness가 누적되도록).
    pub fn ms_since_last_event(&self) -> u64 {
        let last = self.last_event_ms.load(Ordering::Relaxed);
        if last == 0 {
            self.started_at.elapsed().as_millis() as u64
        } else {
            now_ms().saturating_sub(last)
        }
    }

    /// 마지막 활동(이벤트/heartbeat) 이후 경과 ms
    pub fn ms_since_activity(&self) -> u64 {
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        if last == 0 {
            self.started_at.elapsed().as_millis() as u64
        } else {
            now_ms().saturating_sub(last)
        }
    }

    pub fn success_ratio(&self) -> f64 {
        let ok = self.events_ok.load(Ordering::Relaxed);
        let failed = self.events_failed.load(Ordering::Relaxed);
        let total = ok + failed;
        if total == 0 {
            1.0
        } else {
            ok as f64 / total as f64
        }
    }

    /// 파생 health 판정
    pub fn verdict(&self) -> HealthVerdict {
        let connected = self.is_connected();
        let fresh =
            self.ms_since_last_event() < self.staleness_threshold.as_millis() as u64;

        let total = self.events_processed() + self.events_failed();
        // 표본이 모이기 전에는 성공률로 불건강 판정하지 않음
        let ratio_ok = total < MIN_SAMPLES || self.success_ratio() >= RATIO_FLOOR;

        HealthVerdict {
            healthy: connected && fresh && ratio_ok,
            connected,
            fresh,
            ratio_ok,
        }
    }

    /// 프로세스 메모리/CPU 스냅샷
    pub fn resources(&self) -> ResourceSnapshot {
        let mut sys = self.system.lock().unwrap();
        sys.refresh_memory();
        sys.refresh_cpu_usage();

        let memory_bytes = sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| {
                sys.refresh_processes();
                sys.process(pid).map(|p| p.memory())
            })
            .unwrap_or(0);

        ResourceSnapshot {
            memory_bytes,
            total_memory_bytes: sys.total_memory(),
            cpu_percent: sys.global_cpu_info().cpu_usage(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_initial_verdict_unhealthy() {
        let monitor = HealthMonitor::new(Duration::from_secs(300));
        // 연결 전에는 unhealthy
        let verdict = monitor.verdict();
        assert!(!verdict.healthy);
        assert!(!verdict.connected);
    }

    #[test]
    fn test_healthy_after_event() {
        let monitor = HealthMonitor::new(Duration::from_secs(300));
        monitor.set_connected(true);
        monitor.record_event_ok();

        let verdict = monitor.verdict();
        assert!(verdict.healthy);
        assert!(verdict.fresh);
        assert!(verdict.ratio_ok);
    }

    #[test]
    fn test_staleness_flips_verdict() {
        // 이벤트가 임계값보다 오래 전이면 healthy → unhealthy
        let monitor = HealthMonitor::new(Duration::from_millis(30));
        monitor.set_connected(true);
        monitor.record_event_ok();
        assert!(monitor.verdict().healthy);

        sleep(Duration::from_millis(60));
        let verdict = monitor.verdict();
        assert!(!verdict.healthy);
        assert!(!verdict.fresh);
        // 연결 자체는 유지
        assert!(verdict.connected);
    }

    #[test]
    fn test_success_ratio_floor() {
        let monitor = HealthMonitor::new(Duration::from_secs(300));
        monitor.set_connected(true);

        // 표본 부족 구간에서는 실패가 있어도 ratio_ok
        for _ in 0..5 {
            monitor.record_event_failed();
        }
        assert!(monitor.verdict().ratio_ok);

        // 표본 확보 후 성공률 < 95% → ratio_ok = false
        for _ in 0..20 {
            monitor.record_event_ok();
        }
        assert!((monitor.success_ratio() - 0.8).abs() < 0.001);
        assert!(!monitor.verdict().ratio_ok);
        assert!(!monitor.verdict().healthy);
    }

    #[test]
    fn test_retry_counter_monotonic() {
        let monitor = HealthMonitor::new(Duration::from_secs(300));
        assert_eq!(monitor.retries(), 0);
        monitor.record_retry();
        monitor.record_retry();
        assert_eq!(monitor.retries(), 2);
    }

    #[test]
    fn test_heartbeat_freshens_activity_not_event() {
        let monitor = HealthMonitor::new(Duration::from_millis(30));
        monitor.set_connected(true);
        sleep(Duration::from_millis(40));
        monitor.record_heartbeat();

        // heartbeat는 활동으로는 인정되지만 이벤트 staleness는 못 막음
        assert!(monitor.ms_since_activity() < 30);
        assert!(!monitor.verdict().fresh);
    }
}
