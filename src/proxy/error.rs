use hyper::header::InvalidHeaderValue;
use hyper::StatusCode;
use thiserror::Error;

/// HTTP 포워딩 중 발생하는 에러. 연결 태스크 밖으로 전파되지 않고 응답으로 변환됩니다.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("업스트림 요청 생성 실패: {0}")]
    BuildRequest(#[from] hyper::http::Error),

    #[error("유효하지 않은 헤더 값: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),

    #[error("백엔드 {target} 요청 실패: {source}")]
    Upstream {
        target: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },
}

impl ProxyError {
    /// 클라이언트에게 돌려줄 상태 코드
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::BuildRequest(_) | ProxyError::InvalidHeader(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

/// TCP 스니핑 연결이 끊기는 이유. 모두 해당 연결만 닫고 리스너는 계속 동작합니다.
#[derive(Debug, Error)]
pub enum SniffError {
    #[error("초기 바이트 읽기 실패: {0}")]
    Io(#[from] std::io::Error),

    #[error("초기 바이트 읽기 시간 초과")]
    Timeout,

    #[error("HTTP 요청 라인이 아님")]
    NotHttp,

    #[error("Host 헤더 없음")]
    MissingHost,

    #[error("호스트 {host}에 일치하는 tcp 규칙 없음")]
    NoRoute { host: String },

    #[error("백엔드 {address} 연결 실패: {source}")]
    Dial {
        address: String,
        #[source]
        source: std::io::Error,
    },
}
