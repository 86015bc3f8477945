//! portmux는 JSON 규칙 파일로 동작하는 다중 포트 리버스 프록시입니다.
//!
//! # 주요 기능
//!
//! - 경로 접두사, 서브도메인, 도메인 기반 HTTP 라우팅
//! - 허용 포트마다 독립된 리스너, 포트별 규칙 바인딩
//! - 고정 포트(기본 2222)에서 Host 헤더를 스니핑해 원시 TCP 연결 다중화
//! - 규칙 파일 핫 리로드 (300ms 디바운스, 실패 시 이전 리스너 유지)
//!
//! # 예제
//!
//! ```
//! use portmux::routing::{derive_bindings, RouteTable};
//! use portmux::rules::RuleSet;
//!
//! let rules = RuleSet::from_json_str(r#"{
//!     "path": { "/api": "http://127.0.0.1:3000" },
//!     "subdomain": { "admin": { "target": "http://127.0.0.1:4000", "port": 8080 } },
//!     "allowed_ports": [8080, 8081]
//! }"#).unwrap();
//!
//! let bindings = derive_bindings(&rules);
//! assert_eq!(bindings.len(), 2);
//!
//! // 8080에는 명시 포트 규칙과 포트 무관 규칙이 모두 실린다
//! let table = RouteTable::new(8080, bindings[0].rules.clone());
//! let found = table.find("admin.example.com", "/").unwrap();
//! assert_eq!(found.rule.target.as_str(), "http://127.0.0.1:4000");
//!
//! // 8081에는 포트 무관 규칙만 있다
//! let table = RouteTable::new(8081, bindings[1].rules.clone());
//! assert!(table.find("admin.example.com", "/").is_none());
//! assert_eq!(table.find("any.host", "/api/users").unwrap().strip_prefix, Some("/api"));
//! ```

pub mod logging;
pub mod proxy;
pub mod routing;
pub mod rules;
pub mod server;
pub mod settings;
