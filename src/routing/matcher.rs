use std::cmp::Ordering;

use crate::rules::{RouteRule, RuleKind};

/// 규칙 하나가 (호스트, 경로)에 일치하는지 판단합니다.
///
/// `host`는 포트가 제거되고 소문자로 정규화된 값이어야 합니다.
pub fn rule_matches(rule: &RouteRule, host: &str, path: &str) -> bool {
    match rule.kind {
        RuleKind::Domain => host.eq_ignore_ascii_case(&rule.key),
        RuleKind::Subdomain => subdomain_matches(&rule.key, host),
        RuleKind::Path => path_prefix_matches(&rule.key, path),
        // tcp 규칙은 HTTP 매칭에 참여하지 않는다
        RuleKind::Tcp => false,
    }
}

/// 호스트의 첫 레이블이 키와 같은지. 레이블이 최소 두 개 있어야 서브도메인으로 봅니다.
pub fn subdomain_matches(key: &str, host: &str) -> bool {
    let mut labels = host.split('.');
    match (labels.next(), labels.next()) {
        (Some(first), Some(_)) => first.eq_ignore_ascii_case(key),
        _ => false,
    }
}

/// 세그먼트 경계를 지키는 접두사 매칭.
///
/// `/api`는 `/api`, `/api/users`와 일치하지만 `/apiary`와는 일치하지 않습니다.
/// `/`로 끝나는 키는 단순 접두사로 동작합니다.
pub fn path_prefix_matches(key: &str, path: &str) -> bool {
    if key.is_empty() || key == "/" {
        return true;
    }

    match path.strip_prefix(key) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || key.ends_with('/'),
        None => false,
    }
}

/// 경로에서 규칙 키를 제거합니다. 결과는 항상 `/`로 시작합니다.
pub fn strip_path_prefix(path: &str, prefix: &str) -> String {
    let rest = path.strip_prefix(prefix).unwrap_or(path);
    if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{}", rest)
    }
}

fn kind_rank(kind: RuleKind) -> u8 {
    match kind {
        RuleKind::Domain => 0,
        RuleKind::Subdomain => 1,
        RuleKind::Path => 2,
        RuleKind::Tcp => 3,
    }
}

/// 후보 규칙의 결정적 순서.
///
/// 명시 포트 규칙 → 포트 무관 규칙, 그 안에서 domain → subdomain → path,
/// path는 긴 키 우선, 마지막으로 키 사전순.
pub fn rule_order(a: &RouteRule, b: &RouteRule) -> Ordering {
    b.explicit_port
        .is_some()
        .cmp(&a.explicit_port.is_some())
        .then_with(|| kind_rank(a.kind).cmp(&kind_rank(b.kind)))
        .then_with(|| match a.kind {
            RuleKind::Path => b.key.len().cmp(&a.key.len()),
            _ => Ordering::Equal,
        })
        .then_with(|| a.key.cmp(&b.key))
}
