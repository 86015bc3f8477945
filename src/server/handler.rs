use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::listener::wait_for_stop;
use crate::proxy::{self, ForwardContext, ProxyBody, ProxyClient};
use crate::routing::RouteTable;

/// HTTP 리스너 하나의 요청 처리기. 시작 시점의 라우팅 테이블을 끝까지 사용합니다.
pub struct RequestHandler {
    table: RouteTable,
    client: ProxyClient,
}

impl RequestHandler {
    pub fn new(table: RouteTable, client: ProxyClient) -> Self {
        Self { table, client }
    }

    pub fn port(&self) -> u16 {
        self.table.port()
    }

    pub async fn handle_request(
        &self,
        req: Request<Incoming>,
        remote: SocketAddr,
    ) -> Result<Response<ProxyBody>, Infallible> {
        // 1. 라우팅
        let route = match self.table.route_request(&req) {
            Ok(route) => route,
            Err(e) => return Ok(proxy::not_found(e)),
        };

        // 2. 프록시 요청
        let ctx = ForwardContext {
            listener_port: self.table.port(),
            client_addr: remote,
        };
        Ok(proxy::proxy_request(&self.client, req, route, ctx).await)
    }

    /// 연결 하나를 처리합니다. 종료 신호를 받으면 진행 중인 요청을 마친 뒤 연결을 닫습니다.
    pub async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        remote: SocketAddr,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let io = TokioIo::new(stream);
        let handler = self.clone();
        let service = service_fn(move |req: Request<Incoming>| {
            let handler = handler.clone();
            async move { handler.handle_request(req, remote).await }
        });

        let conn = http1::Builder::new().serve_connection(io, service);
        tokio::pin!(conn);

        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!(port = self.port(), remote = %remote, error = %e, "HTTP 연결 종료");
                }
            }
            _ = wait_for_stop(&mut shutdown_rx) => {
                conn.as_mut().graceful_shutdown();
                if let Err(e) = conn.as_mut().await {
                    warn!(port = self.port(), remote = %remote, error = %e, "종료 중 HTTP 연결 오류");
                }
            }
        }
    }
}
