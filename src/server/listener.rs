use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::error::Error;
use super::handler::RequestHandler;
use super::Result;
use crate::proxy::{self, SniffOptions};
use crate::routing::SniffTable;

/// accept 실패가 반복될 때 바쁜 루프를 막기 위한 대기 시간
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    Http,
    TcpSniff,
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerKind::Http => f.write_str("http"),
            ListenerKind::TcpSniff => f.write_str("tcp-sniff"),
        }
    }
}

/// 바인딩된 리스닝 소켓. 종료 신호를 받을 때까지 연결을 받아 태스크로 넘깁니다.
pub struct ServerListener {
    listener: TcpListener,
    addr: SocketAddr,
    kind: ListenerKind,
}

impl ServerListener {
    pub async fn bind(addr: SocketAddr, kind: ListenerKind) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|source| {
            error!(error = %source, addr = %addr, kind = %kind, "포트 바인딩 실패");
            Error::Bind { addr, source }
        })?;
        let addr = listener.local_addr().unwrap_or(addr);

        info!(addr = %addr, kind = %kind, "리스너 시작");
        Ok(Self { listener, addr, kind })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn kind(&self) -> ListenerKind {
        self.kind
    }

    /// HTTP 요청을 받아 라우팅 테이블에 따라 포워딩합니다.
    pub async fn serve_http(
        self,
        handler: Arc<RequestHandler>,
        shutdown_rx: watch::Receiver<bool>,
        released_tx: oneshot::Sender<()>,
        grace: Duration,
    ) {
        let conn_shutdown = shutdown_rx.clone();
        self.accept_loop(shutdown_rx, released_tx, grace, move |stream, remote| {
            handler
                .clone()
                .handle_connection(stream, remote, conn_shutdown.clone())
        })
        .await
    }

    /// 원시 TCP 연결의 Host 헤더를 스니핑해 tcp 대상으로 넘깁니다.
    pub async fn serve_sniff(
        self,
        table: Arc<SniffTable>,
        options: SniffOptions,
        shutdown_rx: watch::Receiver<bool>,
        released_tx: oneshot::Sender<()>,
        grace: Duration,
    ) {
        let port = self.addr.port();
        self.accept_loop(shutdown_rx, released_tx, grace, move |stream, remote| {
            let table = table.clone();
            async move {
                match proxy::sniff_and_forward(stream, &table, &options).await {
                    Ok((sent, received)) => {
                        debug!(port, remote = %remote, sent, received, "tcp 연결 종료");
                    }
                    // 일치하지 않거나 연결할 수 없으면 연결만 조용히 닫는다
                    Err(e) => debug!(port, remote = %remote, error = %e, "tcp 연결 드롭"),
                }
            }
        })
        .await
    }

    async fn accept_loop<F, Fut>(
        self,
        mut shutdown_rx: watch::Receiver<bool>,
        released_tx: oneshot::Sender<()>,
        grace: Duration,
        mut on_accept: F,
    ) where
        F: FnMut(TcpStream, SocketAddr) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let ServerListener { listener, addr, kind } = self;
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, remote)) => {
                        debug!(port = addr.port(), remote = %remote, "연결 수락");
                        connections.spawn(on_accept(stream, remote));
                    }
                    Err(e) => {
                        error!(error = %e, port = addr.port(), "연결 수락 실패");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, port = addr.port(), "연결 태스크 패닉");
                        }
                    }
                }
                // watch::Ref는 Send가 아니므로 분기 출력에 남기지 않는다
                _ = wait_for_stop(&mut shutdown_rx) => break,
            }
        }

        // 새 연결을 더 받지 않도록 소켓부터 닫는다
        drop(listener);
        let _ = released_tx.send(());
        info!(addr = %addr, kind = %kind, active = connections.len(), "리스너 소켓 해제");

        drain_connections(connections, grace, addr.port()).await;
    }
}

/// 종료 신호가 `true`가 되거나 송신자가 사라질 때까지 기다립니다.
pub(crate) async fn wait_for_stop(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

/// 유예 시간 동안 연결이 끝나기를 기다리고, 남은 연결은 중단합니다.
async fn drain_connections(mut connections: JoinSet<()>, grace: Duration, port: u16) {
    if connections.is_empty() {
        return;
    }

    let drained = tokio::time::timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(port, remaining = connections.len(), "유예 시간 초과, 남은 연결 강제 종료");
        connections.shutdown().await;
    } else {
        debug!(port, "모든 연결 종료");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyClient;
    use crate::routing::RouteTable;

    async fn bind_loopback(kind: ListenerKind) -> ServerListener {
        ServerListener::bind("127.0.0.1:0".parse().unwrap(), kind).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn spawned_listeners_release_socket_on_stop() {
        let http = bind_loopback(ListenerKind::Http).await;
        let sniff = bind_loopback(ListenerKind::TcpSniff).await;
        assert_eq!(http.kind(), ListenerKind::Http);
        assert_eq!(sniff.kind(), ListenerKind::TcpSniff);
        let addrs = [http.local_addr(), sniff.local_addr()];

        let grace = Duration::from_millis(200);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (http_released_tx, http_released_rx) = oneshot::channel();
        let (sniff_released_tx, sniff_released_rx) = oneshot::channel();

        let handler = Arc::new(RequestHandler::new(RouteTable::new(addrs[0].port(), Vec::new()), ProxyClient::new()));
        let http_task = tokio::spawn(http.serve_http(handler, shutdown_rx.clone(), http_released_tx, grace));
        let sniff_task = tokio::spawn(sniff.serve_sniff(
            Arc::new(SniffTable::new()),
            SniffOptions::default(),
            shutdown_rx,
            sniff_released_tx,
            grace,
        ));

        // 열린 연결이 있어도 종료 신호 후 소켓은 해제된다
        let _idle = TcpStream::connect(addrs[0]).await.unwrap();
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), http_released_rx).await.unwrap().unwrap();
        tokio::time::timeout(Duration::from_secs(2), sniff_released_rx).await.unwrap().unwrap();
        http_task.await.unwrap();
        sniff_task.await.unwrap();

        for addr in addrs {
            assert!(TcpListener::bind(addr).await.is_ok());
        }
    }
}
