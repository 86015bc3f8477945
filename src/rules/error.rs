use std::path::PathBuf;
use thiserror::Error;

/// 규칙 문서 전체에 대한 에러입니다. 이 에러가 발생하면 리로드 전체가 중단됩니다.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("규칙 파일 {} 읽기 실패: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("규칙 파일 {} 쓰기 실패: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("규칙 문서 JSON 파싱 실패: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("규칙 문서 구조 오류: {0}")]
    Shape(String),
}

/// 개별 규칙 항목에 대한 에러입니다. 해당 항목만 건너뛰고 로드는 계속됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    #[error("항목 형식이 올바르지 않음: {0}")]
    InvalidShape(String),

    #[error("유효하지 않은 포트 {0} (1-65535 또는 0/생략)")]
    InvalidPort(i64),

    #[error("유효하지 않은 대상 {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("지원하지 않는 스킴 {scheme} (http, https, tcp만 허용)")]
    UnsupportedScheme { scheme: String },

    #[error("{category} 규칙에는 {scheme} 대상을 사용할 수 없음")]
    SchemeNotAllowed { category: &'static str, scheme: String },
}
