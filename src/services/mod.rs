//! Service Layer
//!
//! 인덱싱 파이프라인의 코어:
//! listener(소스 연결) → router(분류/정규화) → projector(read-model 변이)
//! → fanout(실시간 브로드캐스트), monitor(상태 집계)

pub mod fanout;
pub mod listener;
pub mod monitor;
pub mod projector;
pub mod router;

pub use fanout::{GameHub, GameUpdate, UpdateKind};
pub use listener::{EventListener, EventSource, WsEventSource};
pub use monitor::{HealthMonitor, HealthVerdict};
pub use projector::Projector;
pub use router::{EventRouter, qualified_event_types, validate_registry};
