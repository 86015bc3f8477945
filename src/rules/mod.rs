//! 규칙 저장소: 디스크의 JSON 규칙 문서를 불변 `RuleSet`으로 읽어들입니다.
//!
//! 문서 전체를 해석할 수 없으면 `RuleError`로 실패하고, 개별 항목이 잘못된 경우에는
//! 경고를 남기고 그 항목만 제외합니다.

mod error;
mod raw;
mod store;
mod target;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use tracing::{debug, warn};

pub use error::{EntryError, RuleError};
pub use raw::{RawDocument, RawEntry, RuleEntry, RULES_SCHEMA};
pub use store::RuleStore;
pub use target::{Target, TargetScheme};

pub type Result<T> = std::result::Result<T, RuleError>;

/// 규칙 종류. 매칭 방식을 결정합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleKind {
    Path,
    Subdomain,
    Domain,
    Tcp,
}

impl RuleKind {
    pub const ALL: [RuleKind; 4] = [
        RuleKind::Path,
        RuleKind::Subdomain,
        RuleKind::Domain,
        RuleKind::Tcp,
    ];

    /// JSON 문서의 카테고리 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Path => "path",
            RuleKind::Subdomain => "subdomain",
            RuleKind::Domain => "domain",
            RuleKind::Tcp => "tcp",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "path" => Ok(RuleKind::Path),
            "subdomain" => Ok(RuleKind::Subdomain),
            "domain" => Ok(RuleKind::Domain),
            "tcp" => Ok(RuleKind::Tcp),
            _ => Err(format!("알 수 없는 규칙 종류: {}", s)),
        }
    }
}

/// 하나의 라우팅 규칙
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub kind: RuleKind,
    pub key: String,
    pub target: Target,
    /// `None`이면 더 구체적인 바인딩이 없는 모든 허용 포트에 적용됩니다.
    pub explicit_port: Option<u16>,
}

impl RouteRule {
    pub fn new(kind: RuleKind, key: impl Into<String>, target: Target, explicit_port: Option<u16>) -> Self {
        Self {
            kind,
            key: key.into(),
            target,
            explicit_port,
        }
    }

    /// 정규화된 항목에서 규칙을 만듭니다. 대상이 비어 있으면 `Ok(None)`입니다.
    pub fn from_entry(kind: RuleKind, key: &str, entry: RuleEntry) -> std::result::Result<Option<Self>, EntryError> {
        if entry.target.trim().is_empty() {
            return Ok(None);
        }

        let target = Target::parse(&entry.target)?;
        match (kind, target.scheme()) {
            (RuleKind::Path | RuleKind::Domain, TargetScheme::Tcp) => {
                return Err(EntryError::SchemeNotAllowed {
                    category: kind.as_str(),
                    scheme: target.scheme().to_string(),
                })
            }
            (RuleKind::Tcp, scheme) if scheme != TargetScheme::Tcp => {
                return Err(EntryError::SchemeNotAllowed {
                    category: kind.as_str(),
                    scheme: scheme.to_string(),
                })
            }
            _ => {}
        }

        Ok(Some(Self::new(kind, key, target, entry.port)))
    }
}

/// 한 시점에 로드된 전체 규칙 스냅샷. 생성 후에는 변경되지 않습니다.
///
/// `domain`과 `tcp` 카테고리는 서로 섞이지 않습니다.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    path: BTreeMap<String, RouteRule>,
    subdomain: BTreeMap<String, RouteRule>,
    domain: BTreeMap<String, RouteRule>,
    tcp: BTreeMap<String, RouteRule>,
    allowed_ports: Vec<u16>,
}

impl RuleSet {
    /// JSON 텍스트에서 규칙 집합을 만듭니다.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let document = RawDocument::from_json_str(content)?;
        Ok(Self::from_document(&document))
    }

    /// 항목 단위로 관대하게 문서를 해석합니다. 잘못된 항목은 경고 후 제외됩니다.
    pub fn from_document(document: &RawDocument) -> Self {
        let mut rule_set = RuleSet::default();

        for kind in RuleKind::ALL {
            let Some(entries) = document.category(kind) else {
                continue;
            };

            for (key, value) in entries {
                let parsed = RawEntry::from_value(value)
                    .and_then(RawEntry::normalize)
                    .and_then(|entry| RouteRule::from_entry(kind, key, entry));

                match parsed {
                    Ok(Some(rule)) => {
                        debug!(
                            category = %kind,
                            key = %key,
                            target = %rule.target,
                            port = ?rule.explicit_port,
                            "규칙 로드"
                        );
                        rule_set.insert(rule);
                    }
                    Ok(None) => {
                        debug!(category = %kind, key = %key, "대상이 비어 있는 규칙 무시");
                    }
                    Err(e) => {
                        warn!(category = %kind, key = %key, error = %e, "규칙 항목 파싱 실패, 건너뜀");
                    }
                }
            }
        }

        for value in document.allowed_ports.iter().flatten() {
            match value.as_u64().and_then(|p| u16::try_from(p).ok()).filter(|p| *p > 0) {
                Some(port) if !rule_set.allowed_ports.contains(&port) => rule_set.allowed_ports.push(port),
                Some(_) => debug!(port = %value, "중복된 허용 포트 무시"),
                None => warn!(port = %value, "유효하지 않은 허용 포트, 건너뜀"),
            }
        }

        rule_set
    }

    /// 같은 종류에 같은 키가 있으면 나중에 넣은 규칙이 남습니다.
    pub fn insert(&mut self, rule: RouteRule) {
        self.category_mut(rule.kind).insert(rule.key.clone(), rule);
    }

    pub fn with_allowed_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        for port in ports {
            if port > 0 && !self.allowed_ports.contains(&port) {
                self.allowed_ports.push(port);
            }
        }
        self
    }

    fn category_mut(&mut self, kind: RuleKind) -> &mut BTreeMap<String, RouteRule> {
        match kind {
            RuleKind::Path => &mut self.path,
            RuleKind::Subdomain => &mut self.subdomain,
            RuleKind::Domain => &mut self.domain,
            RuleKind::Tcp => &mut self.tcp,
        }
    }

    /// 한 종류의 규칙을 키 순서대로 돌려줍니다.
    pub fn rules(&self, kind: RuleKind) -> impl Iterator<Item = &RouteRule> {
        match kind {
            RuleKind::Path => self.path.values(),
            RuleKind::Subdomain => self.subdomain.values(),
            RuleKind::Domain => self.domain.values(),
            RuleKind::Tcp => self.tcp.values(),
        }
    }

    pub fn get(&self, kind: RuleKind, key: &str) -> Option<&RouteRule> {
        match kind {
            RuleKind::Path => self.path.get(key),
            RuleKind::Subdomain => self.subdomain.get(key),
            RuleKind::Domain => self.domain.get(key),
            RuleKind::Tcp => self.tcp.get(key),
        }
    }

    pub fn all_rules(&self) -> impl Iterator<Item = &RouteRule> {
        RuleKind::ALL.into_iter().flat_map(move |kind| self.rules(kind))
    }

    pub fn allowed_ports(&self) -> &[u16] {
        &self.allowed_ports
    }

    pub fn len(&self) -> usize {
        self.path.len() + self.subdomain.len() + self.domain.len() + self.tcp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
