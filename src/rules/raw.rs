use std::collections::BTreeMap;
use std::path::Path;

use jsonschema::{Draft, JSONSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{EntryError, RuleError};
use super::{Result, RuleKind};

/// 규칙 문서의 최상위 구조 스키마 (Draft 7).
///
/// 개별 항목의 형식은 여기서 검사하지 않습니다. 항목 단위 오류는 로드 시 건너뜁니다.
pub const RULES_SCHEMA: &str = r#"{
    "$schema": "http://json-schema.org/draft-07/schema#",
    "type": "object",
    "properties": {
        "path": {"type": ["object", "null"]},
        "subdomain": {"type": ["object", "null"]},
        "domain": {"type": ["object", "null"]},
        "tcp": {"type": ["object", "null"]},
        "allowed_ports": {"type": ["array", "null"]}
    }
}"#;

/// 디스크에 저장된 규칙 문서를 그대로 표현합니다.
///
/// 항목 값은 `Value`로 보관하므로 잘못된 항목이 있어도 문서 전체는 읽을 수 있고,
/// 규칙 편집 도구가 문서를 다시 쓸 때 알 수 없는 필드도 보존됩니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<BTreeMap<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<BTreeMap<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<BTreeMap<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<BTreeMap<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_ports: Option<Vec<Value>>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// 단일 규칙 항목. 문자열 축약형과 객체형을 모두 받습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawEntry {
    Shorthand(String),
    Full {
        #[serde(default)]
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<i64>,
    },
}

/// 축약형을 풀어낸 정규화된 항목
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEntry {
    pub target: String,
    pub port: Option<u16>,
}

impl RawEntry {
    pub fn from_value(value: &Value) -> std::result::Result<Self, EntryError> {
        serde_json::from_value(value.clone()).map_err(|e| EntryError::InvalidShape(e.to_string()))
    }

    /// 포트 `0`과 생략은 모두 "명시 포트 없음"으로 정규화합니다.
    pub fn normalize(self) -> std::result::Result<RuleEntry, EntryError> {
        match self {
            RawEntry::Shorthand(target) => Ok(RuleEntry { target, port: None }),
            RawEntry::Full { target, port } => {
                let port = match port {
                    None | Some(0) => None,
                    Some(p) => Some(u16::try_from(p).map_err(|_| EntryError::InvalidPort(p))?),
                };
                Ok(RuleEntry { target, port })
            }
        }
    }
}

impl From<RuleEntry> for RawEntry {
    fn from(entry: RuleEntry) -> Self {
        match entry.port {
            None => RawEntry::Shorthand(entry.target),
            Some(port) => RawEntry::Full {
                target: entry.target,
                port: Some(i64::from(port)),
            },
        }
    }
}

impl RawDocument {
    /// JSON 텍스트를 파싱하고 최상위 구조를 검증합니다.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content)?;
        validate_shape(&value)?;
        serde_json::from_value(value).map_err(|e| RuleError::Shape(e.to_string()))
    }

    /// 파일에서 문서를 읽습니다. 파일이 없으면 빈 문서를 돌려줍니다.
    pub fn read_or_default(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_json_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(RuleError::Read {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// 임시 파일에 쓴 뒤 이름을 바꿔 원자적으로 저장합니다.
    pub fn write(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("json.tmp");
        let to_write_error = |source| RuleError::Write {
            path: path.to_path_buf(),
            source,
        };

        std::fs::write(&tmp_path, format!("{}\n", content)).map_err(to_write_error)?;
        std::fs::rename(&tmp_path, path).map_err(to_write_error)
    }

    pub fn category(&self, kind: RuleKind) -> Option<&BTreeMap<String, Value>> {
        match kind {
            RuleKind::Path => self.path.as_ref(),
            RuleKind::Subdomain => self.subdomain.as_ref(),
            RuleKind::Domain => self.domain.as_ref(),
            RuleKind::Tcp => self.tcp.as_ref(),
        }
    }

    fn category_mut(&mut self, kind: RuleKind) -> &mut BTreeMap<String, Value> {
        let slot = match kind {
            RuleKind::Path => &mut self.path,
            RuleKind::Subdomain => &mut self.subdomain,
            RuleKind::Domain => &mut self.domain,
            RuleKind::Tcp => &mut self.tcp,
        };
        slot.get_or_insert_with(BTreeMap::new)
    }

    /// 새 규칙을 추가합니다. 같은 키가 이미 있으면 `false`를 돌려주고 아무것도 바꾸지 않습니다.
    pub fn insert_rule(&mut self, kind: RuleKind, key: &str, entry: RuleEntry) -> Result<bool> {
        let category = self.category_mut(kind);
        if category.contains_key(key) {
            return Ok(false);
        }
        let value = serde_json::to_value(RawEntry::from(entry))?;
        category.insert(key.to_string(), value);
        Ok(true)
    }

    pub fn remove_rule(&mut self, kind: RuleKind, key: &str) -> bool {
        self.category_mut(kind).remove(key).is_some()
    }

    /// 허용 포트 목록에서 정수로 해석되는 값만 돌려줍니다.
    pub fn port_values(&self) -> Vec<i64> {
        self.allowed_ports
            .iter()
            .flatten()
            .filter_map(Value::as_i64)
            .collect()
    }

    pub fn add_port(&mut self, port: u16) -> bool {
        if self.port_values().contains(&i64::from(port)) {
            return false;
        }
        self.allowed_ports
            .get_or_insert_with(Vec::new)
            .push(Value::from(port));
        true
    }

    pub fn remove_port(&mut self, port: u16) -> bool {
        let Some(ports) = self.allowed_ports.as_mut() else {
            return false;
        };
        let before = ports.len();
        ports.retain(|value| value.as_i64() != Some(i64::from(port)));
        ports.len() != before
    }
}

fn validate_shape(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(RULES_SCHEMA)?;
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .map_err(|e| RuleError::Shape(format!("스키마 컴파일 실패: {}", e)))?;

    if let Err(errors) = compiled.validate(value) {
        let messages: Vec<String> = errors
            .map(|e| format!("{} (위치: {})", e, e.instance_path))
            .collect();
        return Err(RuleError::Shape(messages.join("; ")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_shorthand_and_object_normalize_the_same() {
        let short = RawEntry::from_value(&serde_json::json!("http://a")).unwrap();
        let full = RawEntry::from_value(&serde_json::json!({"target": "http://a", "port": 0})).unwrap();
        assert_eq!(short.normalize().unwrap(), full.normalize().unwrap());
    }

    #[test]
    fn entry_rejects_out_of_range_port() {
        let entry = RawEntry::from_value(&serde_json::json!({"target": "http://a", "port": 70000})).unwrap();
        assert_eq!(entry.normalize(), Err(EntryError::InvalidPort(70000)));

        let entry = RawEntry::from_value(&serde_json::json!({"target": "http://a", "port": -1})).unwrap();
        assert_eq!(entry.normalize(), Err(EntryError::InvalidPort(-1)));
    }

    #[test]
    fn entry_rejects_non_string_non_object() {
        assert!(RawEntry::from_value(&serde_json::json!(42)).is_err());
        assert!(RawEntry::from_value(&serde_json::json!({"target": "x", "port": "80"})).is_err());
    }

    #[test]
    fn document_rejects_wrong_top_level_shape() {
        assert!(matches!(RawDocument::from_json_str("[]"), Err(RuleError::Shape(_))));
        assert!(matches!(
            RawDocument::from_json_str(r#"{"path": "oops"}"#),
            Err(RuleError::Shape(_))
        ));
        assert!(matches!(RawDocument::from_json_str("{"), Err(RuleError::Parse(_))));
    }

    #[test]
    fn document_editing_keeps_unknown_fields() {
        let mut doc = RawDocument::from_json_str(r#"{"comment": "keep me", "allowed_ports": [80]}"#).unwrap();

        assert!(doc
            .insert_rule(
                RuleKind::Path,
                "/api",
                RuleEntry { target: "http://backend".into(), port: None }
            )
            .unwrap());
        assert!(!doc
            .insert_rule(
                RuleKind::Path,
                "/api",
                RuleEntry { target: "http://other".into(), port: None }
            )
            .unwrap());
        assert!(!doc.add_port(80));
        assert!(doc.add_port(8080));
        assert!(doc.remove_port(80));
        assert!(!doc.remove_port(80));

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["comment"], "keep me");
        assert_eq!(json["path"]["/api"], "http://backend");
        assert_eq!(json["allowed_ports"], serde_json::json!([8080]));
    }
}
