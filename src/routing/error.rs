use thiserror::Error;

/// 라우팅 관련 에러를 표현하는 열거형입니다.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// 유효하지 않은 호스트 이름
    #[error("유효하지 않은 호스트 {host}: {reason}")]
    InvalidHost { host: String, reason: String },

    /// 헤더 파싱 에러
    #[error("{header_name} 헤더 파싱 실패: {error}")]
    HeaderParseError { header_name: String, error: String },

    /// 일치하는 규칙 없음
    #[error("호스트 {host}, 경로 {path}에 일치하는 규칙 없음 (포트 {port})")]
    NoRoute { port: u16, host: String, path: String },
}
