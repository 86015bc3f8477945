use std::collections::BTreeMap;

use hyper::header;
use tracing::{debug, warn};

use crate::routing::matcher::{rule_matches, rule_order};
use crate::routing::{HostInfo, RoutingError};
use crate::rules::{RouteRule, RuleKind};

/// 매칭 결과. path 규칙이면 포워딩 시 제거할 접두사를 함께 돌려줍니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    pub rule: &'a RouteRule,
    pub strip_prefix: Option<&'a str>,
}

impl<'a> RouteMatch<'a> {
    fn new(rule: &'a RouteRule) -> Self {
        let strip_prefix = match rule.kind {
            RuleKind::Path => Some(rule.key.as_str()),
            _ => None,
        };
        Self { rule, strip_prefix }
    }
}

/// 포트 하나에 묶인 HTTP 라우팅 테이블. 리스너 시작 시 만들어지고 이후 읽기 전용입니다.
#[derive(Debug, Clone)]
pub struct RouteTable {
    port: u16,
    rules: Vec<RouteRule>,
}

impl RouteTable {
    /// 규칙을 결정적 순서로 정렬해 테이블을 만듭니다.
    pub fn new(port: u16, mut rules: Vec<RouteRule>) -> Self {
        rules.sort_by(rule_order);
        Self { port, rules }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 정규화된 호스트와 경로로 첫 번째 일치 규칙을 찾습니다.
    pub fn find(&self, host: &str, path: &str) -> Option<RouteMatch<'_>> {
        self.rules
            .iter()
            .find(|rule| rule_matches(rule, host, path))
            .map(RouteMatch::new)
    }

    /// HTTP 요청에서 호스트와 경로를 뽑아 규칙을 찾습니다.
    pub fn route_request<B>(&self, req: &hyper::Request<B>) -> Result<RouteMatch<'_>, RoutingError> {
        // Host 헤더가 없거나 잘못돼도 path 규칙은 여전히 매칭될 수 있다
        let host = match Self::extract_host(req) {
            Ok(info) => info.name,
            Err(e) => {
                debug!(error = %e, "호스트 추출 실패, 빈 호스트로 매칭");
                String::new()
            }
        };
        let path = req.uri().path();

        match self.find(&host, path) {
            Some(found) => {
                debug!(
                    port = self.port,
                    host = %host,
                    path = %path,
                    kind = %found.rule.kind,
                    key = %found.rule.key,
                    target = %found.rule.target,
                    "규칙 일치"
                );
                Ok(found)
            }
            None => {
                warn!(port = self.port, host = %host, path = %path, "일치하는 규칙 없음");
                Err(RoutingError::NoRoute {
                    port: self.port,
                    host,
                    path: path.to_string(),
                })
            }
        }
    }

    /// HTTP 요청에서 호스트 정보를 추출합니다. Host 헤더가 없으면 URI authority를 씁니다.
    pub fn extract_host<B>(req: &hyper::Request<B>) -> Result<HostInfo, RoutingError> {
        let raw = match req.headers().get(header::HOST) {
            Some(value) => value.to_str().map_err(|e| RoutingError::HeaderParseError {
                header_name: "Host".to_string(),
                error: e.to_string(),
            })?,
            None => req.uri().authority().map(|a| a.as_str()).unwrap_or_default(),
        };

        HostInfo::from_header_value(raw)
    }
}

/// TCP 스니핑 리스너가 쓰는 첫 레이블 → tcp 대상 테이블
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SniffTable {
    routes: BTreeMap<String, RouteRule>,
}

impl SniffTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 같은 레이블이 이미 있으면 덮어씁니다.
    pub fn insert(&mut self, rule: RouteRule) {
        self.routes.insert(rule.key.to_ascii_lowercase(), rule);
    }

    /// 스니핑한 호스트(포트 포함 가능)의 첫 레이블로 규칙을 찾습니다.
    pub fn find(&self, host: &str) -> Option<&RouteRule> {
        let name = HostInfo::from_header_value(host)
            .map(|info| info.name)
            .unwrap_or_else(|_| host.to_ascii_lowercase());
        let label = name.split('.').next().unwrap_or_default();
        self.routes.get(label)
    }

    pub fn routes(&self) -> impl Iterator<Item = &RouteRule> {
        self.routes.values()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
