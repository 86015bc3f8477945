use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::listener::ListenerKind;

/// 실행 중인 리스너 하나. 시작 시점의 규칙 목록을 들고 있으며 갱신되지 않고 교체만 됩니다.
pub struct ListenerInstance {
    pub port: u16,
    pub kind: ListenerKind,
    pub generation: u64,
    pub local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    released_rx: oneshot::Receiver<()>,
    handle: JoinHandle<()>,
}

impl ListenerInstance {
    pub(crate) fn new(
        kind: ListenerKind,
        generation: u64,
        local_addr: SocketAddr,
        shutdown_tx: watch::Sender<bool>,
        released_rx: oneshot::Receiver<()>,
        handle: JoinHandle<()>,
    ) -> Self {
        Self {
            port: local_addr.port(),
            kind,
            generation,
            local_addr,
            shutdown_tx,
            released_rx,
            handle,
        }
    }

    /// 종료 신호를 보내고 리스닝 소켓이 해제될 때까지 기다립니다.
    ///
    /// 돌려받는 핸들은 남은 연결을 유예 시간 동안 정리하는 태스크입니다.
    /// 소켓 해제가 유예 시간을 넘기면 태스크를 중단시켜 소켓을 강제로 닫고 `None`을 돌려줍니다.
    pub async fn stop(self, grace: Duration) -> Option<JoinHandle<()>> {
        let ListenerInstance {
            port,
            kind,
            generation,
            shutdown_tx,
            released_rx,
            handle,
            ..
        } = self;

        let _ = shutdown_tx.send(true);

        match tokio::time::timeout(grace, released_rx).await {
            // 태스크가 먼저 끝나 송신자가 사라진 경우에도 소켓은 이미 닫혔다
            Ok(_) => {
                debug!(port, kind = %kind, generation, "리스너 소켓 해제 확인");
                Some(handle)
            }
            Err(_) => {
                warn!(port, kind = %kind, generation, "리스너 종료 지연, 강제 중단");
                handle.abort();
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        warn!(port, error = %e, "리스너 태스크 종료 오류");
                    }
                }
                None
            }
        }
    }
}
