//! 리스너 수명 주기 관리: 규칙 집합이 바뀔 때마다 포트별 리스너를 멈추고 다시 띄웁니다.

pub mod error;
pub mod handler;
mod instance;
pub mod listener;
mod manager;

pub type Result<T> = std::result::Result<T, Error>;

pub use error::Error;
pub use instance::ListenerInstance;
pub use listener::{ListenerKind, ServerListener};
pub use manager::{ListenerEvent, ReconcileSummary, ServerManager};
