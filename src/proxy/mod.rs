//! 백엔드로 트래픽을 넘기는 포워더.
//!
//! - [`http`]: 규칙에 맞게 요청을 다시 쓰고 응답을 스트리밍으로 돌려줍니다.
//! - [`tcp`]: 원시 연결의 Host 헤더를 스니핑해 tcp 대상으로 이어 붙입니다.

mod error;
pub mod http;
pub mod tcp;

pub use error::{ProxyError, SniffError};
pub use http::{error_response, not_found, proxy_request, ForwardContext, ProxyBody, ProxyClient};
pub use tcp::{sniff_and_forward, SniffOptions};
