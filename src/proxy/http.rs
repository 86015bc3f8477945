use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{Request, Response, StatusCode, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::ProxyError;
use crate::logging::{log_request, RequestLog};
use crate::routing::matcher::strip_path_prefix;
use crate::routing::{HostInfo, RouteMatch};
use crate::rules::Target;

/// 클라이언트로 돌려주는 응답 바디. 백엔드 바디를 버퍼링 없이 그대로 흘려보냅니다.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// 양방향 모두에서 제거하는 홉 단위 헤더
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// 포워딩 시 필요한 인바운드 연결 정보
#[derive(Debug, Clone, Copy)]
pub struct ForwardContext {
    /// 요청을 받은 리스너 포트. Host 헤더에 포트가 없을 때 bare 대상의 포트로 쓰입니다.
    pub listener_port: u16,
    pub client_addr: SocketAddr,
}

/// 업스트림 요청용 풀링 클라이언트. http와 https 백엔드를 모두 처리합니다.
#[derive(Clone)]
pub struct ProxyClient {
    client: Client<HttpsConnector<HttpConnector>, Incoming>,
}

impl ProxyClient {
    pub fn new() -> Self {
        let builder = match HttpsConnectorBuilder::new().with_native_roots() {
            Ok(builder) => builder,
            Err(e) => {
                warn!(error = %e, "시스템 루트 인증서 로드 실패, 내장 루트 인증서 사용");
                HttpsConnectorBuilder::new().with_webpki_roots()
            }
        };
        let connector = builder.https_or_http().enable_http1().build();
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self { client }
    }

    /// 일치한 규칙의 대상으로 요청을 보내고 백엔드 응답을 스트리밍으로 돌려줍니다.
    pub async fn forward(
        &self,
        req: Request<Incoming>,
        route: &RouteMatch<'_>,
        ctx: &ForwardContext,
    ) -> Result<Response<ProxyBody>, ProxyError> {
        let upstream = build_upstream_request(req, route, ctx)?;
        debug!(uri = %upstream.uri(), "업스트림 요청 전송");

        let response = self
            .client
            .request(upstream)
            .await
            .map_err(|source| ProxyError::Upstream {
                target: route.rule.target.to_string(),
                source,
            })?;

        let (mut parts, body) = response.into_parts();
        remove_hop_headers(&mut parts.headers);
        Ok(Response::from_parts(parts, body.boxed()))
    }
}

impl Default for ProxyClient {
    fn default() -> Self {
        Self::new()
    }
}

/// 요청 하나를 포워딩하고 결과를 요청 로그로 남깁니다. 실패는 에러 응답으로 바뀝니다.
#[instrument(skip_all, fields(port = ctx.listener_port, rule = %route.rule.key))]
pub async fn proxy_request(
    client: &ProxyClient,
    req: Request<Incoming>,
    route: RouteMatch<'_>,
    ctx: ForwardContext,
) -> Response<ProxyBody> {
    let start_time = Instant::now();
    let mut log = RequestLog::new(Uuid::new_v4().to_string());
    log.with_request(&req);
    log.with_rule(route.rule);

    let response = match client.forward(req, &route, &ctx).await {
        Ok(response) => response,
        Err(e) => {
            log.with_error(&e);
            error_response(&e)
        }
    };

    log.with_response(response.status());
    log.duration_ms = start_time.elapsed().as_millis() as u64;
    log_request(&log);

    response
}

/// 인바운드 요청을 대상 백엔드용 요청으로 바꿉니다.
///
/// 스킴과 authority를 대상 것으로 바꾸고, path 규칙이면 접두사를 제거한 뒤 대상의 기본 경로에 붙입니다.
/// 쿼리 문자열은 그대로 유지됩니다.
pub fn build_upstream_request<B>(
    req: Request<B>,
    route: &RouteMatch<'_>,
    ctx: &ForwardContext,
) -> Result<Request<B>, ProxyError> {
    let (mut parts, body) = req.into_parts();
    let target = &route.rule.target;

    let inbound_host = parts
        .headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let inbound_port = inbound_host
        .as_deref()
        .and_then(|host| HostInfo::from_header_value(host).ok())
        .and_then(|info| info.port)
        .unwrap_or(ctx.listener_port);

    parts.uri = build_upstream_uri(target, route.strip_prefix, &parts.uri, inbound_port)?;

    remove_hop_headers(&mut parts.headers);
    parts
        .headers
        .insert(header::HOST, HeaderValue::from_str(&target.authority(inbound_port))?);
    parts.headers.insert(
        X_FORWARDED_FOR,
        HeaderValue::from_str(&ctx.client_addr.ip().to_string())?,
    );
    if let Some(host) = inbound_host {
        parts.headers.insert(X_FORWARDED_HOST, HeaderValue::from_str(&host)?);
    }
    parts.headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));

    Ok(Request::from_parts(parts, body))
}

/// 업스트림 URI = 대상 스킴 + authority + (기본 경로 + 제거 후 경로) + 원래 쿼리
pub fn build_upstream_uri(
    target: &Target,
    strip_prefix: Option<&str>,
    uri: &Uri,
    fallback_port: u16,
) -> Result<Uri, ProxyError> {
    let path = match strip_prefix {
        Some(prefix) => strip_path_prefix(uri.path(), prefix),
        None => uri.path().to_string(),
    };
    let path = join_base_path(target.base_path(), &path);
    let path_and_query = match uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path,
    };

    let uri = Uri::builder()
        .scheme(target.scheme().as_str())
        .authority(target.authority(fallback_port).as_str())
        .path_and_query(path_and_query.as_str())
        .build()?;
    Ok(uri)
}

fn join_base_path(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        path.to_string()
    } else {
        format!("{}{}", base, path)
    }
}

/// `Connection` 헤더가 지목한 헤더와 표준 홉 단위 헤더를 제거합니다.
pub fn remove_hop_headers(headers: &mut HeaderMap) {
    let named: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in named {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

fn full<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into()).map_err(|never| match never {}).boxed()
}

/// 단순 텍스트 응답
pub fn text_response(status: StatusCode, message: impl Into<Bytes>) -> Response<ProxyBody> {
    let mut response = Response::new(full(message));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

pub fn not_found(message: impl std::fmt::Display) -> Response<ProxyBody> {
    text_response(StatusCode::NOT_FOUND, format!("Error: {}", message))
}

pub fn error_response(error: &ProxyError) -> Response<ProxyBody> {
    text_response(error.status_code(), format!("Error: {}", error))
}
