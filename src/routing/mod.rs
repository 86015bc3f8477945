//! 규칙 매칭과 포트별 규칙 묶음 계산을 담당하는 모듈입니다.

mod binding;
mod error;
mod host;
pub mod matcher;
mod table;

pub use binding::{derive_bindings, derive_sniff_table, PortBinding};
pub use error::RoutingError;
pub use host::HostInfo;
pub use table::{RouteMatch, RouteTable, SniffTable};
