use tracing::warn;

use crate::routing::SniffTable;
use crate::rules::{RouteRule, RuleKind, RuleSet};

/// 한 리로드 주기 동안만 유효한 포트별 규칙 묶음
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub port: u16,
    pub rules: Vec<RouteRule>,
}

impl PortBinding {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// HTTP 리스너에 실을 수 있는 규칙인지. tcp 대상은 스니핑 리스너 전용이다.
fn is_http_rule(rule: &RouteRule) -> bool {
    rule.kind != RuleKind::Tcp && !rule.target.is_tcp()
}

/// 허용 포트마다 적용되는 규칙을 계산합니다.
///
/// 명시 포트가 있는 규칙은 그 포트에만, 없는 규칙은 모든 허용 포트에 복제됩니다.
/// 결과는 `allowed_ports` 순서를 따르며 규칙이 하나도 없는 포트도 포함됩니다.
pub fn derive_bindings(rule_set: &RuleSet) -> Vec<PortBinding> {
    let allowed = rule_set.allowed_ports();

    for rule in rule_set.all_rules().filter(|rule| is_http_rule(rule)) {
        if let Some(port) = rule.explicit_port {
            if !allowed.contains(&port) {
                warn!(
                    kind = %rule.kind,
                    key = %rule.key,
                    port,
                    "허용 포트 목록에 없는 포트에 묶인 규칙, 적용되지 않음"
                );
            }
        }
    }

    allowed
        .iter()
        .map(|&port| {
            let explicit = rule_set
                .all_rules()
                .filter(|rule| is_http_rule(rule) && rule.explicit_port == Some(port));
            let agnostic = rule_set
                .all_rules()
                .filter(|rule| is_http_rule(rule) && rule.explicit_port.is_none());

            PortBinding {
                port,
                rules: explicit.chain(agnostic).cloned().collect(),
            }
        })
        .collect()
}

/// TCP 스니핑 테이블: `tcp://` 대상을 가진 subdomain 규칙과 tcp 카테고리 규칙
pub fn derive_sniff_table(rule_set: &RuleSet) -> SniffTable {
    let mut table = SniffTable::new();
    for rule in rule_set.rules(RuleKind::Subdomain).filter(|rule| rule.target.is_tcp()) {
        table.insert(rule.clone());
    }
    for rule in rule_set.rules(RuleKind::Tcp) {
        table.insert(rule.clone());
    }
    table
}
