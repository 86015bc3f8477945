use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing::{error, info, span, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

use crate::rules::RouteRule;
use crate::settings::logging::{LogFormat, LogOutput, LogSettings};

const DEFAULT_LOG_FILE: &str = "portmux.log";

/// 로그 설정에 따라 전역 subscriber를 설치합니다.
///
/// `RUST_LOG`가 있으면 설정된 기본 레벨보다 우선합니다. 반환된 guard는
/// 프로세스가 끝날 때까지 들고 있어야 버퍼에 남은 로그가 flush됩니다.
pub fn init_logging(settings: &LogSettings) -> Option<WorkerGuard> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(settings.level).into())
        .from_env_lossy();

    let (writer, guard) = match &settings.output {
        LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
        LogOutput::File(path) => {
            let path = Path::new(path);
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .map(|name| name.to_os_string())
                .unwrap_or_else(|| DEFAULT_LOG_FILE.into());
            tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name))
        }
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_ansi(matches!(settings.output, LogOutput::Stdout))
        .with_writer(writer);

    let result = match settings.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };

    if let Err(e) = result {
        eprintln!("로깅 초기화 실패: {}", e);
        return None;
    }

    Some(guard)
}

/// 요청 하나에 대한 로그 레코드
#[derive(Debug)]
pub struct RequestLog {
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub host: String,
    pub rule: Option<String>,
    pub backend: Option<String>,
    pub status_code: u16,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl RequestLog {
    pub fn new(request_id: String) -> Self {
        Self {
            request_id,
            method: String::new(),
            path: String::new(),
            host: String::new(),
            rule: None,
            backend: None,
            status_code: 0,
            duration_ms: 0,
            error: None,
        }
    }

    pub fn with_request<B>(&mut self, req: &hyper::Request<B>) {
        self.method = req.method().to_string();
        self.path = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| req.uri().path().to_string());
        if let Some(host) = req.headers().get(hyper::header::HOST) {
            self.host = host.to_str().unwrap_or_default().to_string();
        }
    }

    /// 일치한 규칙과 백엔드 대상을 기록합니다.
    pub fn with_rule(&mut self, rule: &RouteRule) {
        self.rule = Some(format!("{}:{}", rule.kind, rule.key));
        self.backend = Some(rule.target.to_string());
    }

    pub fn with_response(&mut self, status: hyper::StatusCode) {
        self.status_code = status.as_u16();
    }

    pub fn with_error(&mut self, error: impl std::fmt::Display) {
        self.error = Some(error.to_string());
    }
}

/// 상태에 따라 INFO / WARN(4xx 이상) / ERROR(포워딩 실패)로 남깁니다.
pub fn log_request(log: &RequestLog) {
    let level = if log.error.is_some() {
        Level::ERROR
    } else if log.status_code >= 400 {
        Level::WARN
    } else {
        Level::INFO
    };

    let span = span!(
        Level::INFO,
        "request",
        request_id = %log.request_id,
        method = %log.method,
        path = %log.path,
        host = %log.host,
        status = log.status_code,
        duration_ms = log.duration_ms
    );
    let _enter = span.enter();

    match level {
        Level::ERROR => error!(
            rule = ?log.rule,
            backend = ?log.backend,
            error = ?log.error,
            "요청 실패"
        ),
        Level::WARN => warn!(rule = ?log.rule, backend = ?log.backend, "요청 완료 (경고)"),
        _ => info!(rule = ?log.rule, backend = ?log.backend, "요청 완료"),
    }
}
