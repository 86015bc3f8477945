use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::error::Error;
use super::handler::RequestHandler;
use super::instance::ListenerInstance;
use super::listener::{ListenerKind, ServerListener};
use super::Result;
use crate::proxy::ProxyClient;
use crate::routing::{derive_bindings, derive_sniff_table, PortBinding, RouteTable, SniffTable};
use crate::rules::{RouteRule, RuleSet, RuleStore};
use crate::settings::ServerSettings;

/// 한 번의 재조정 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub generation: u64,
    /// 이번 주기에 새로 시작된 포트 (교체 포함)
    pub started: Vec<u16>,
    /// 중지되고 다시 시작되지 않은 포트
    pub removed: Vec<u16>,
}

/// 이벤트 구독자가 따라오지 못하면 오래된 이벤트부터 버려진다
const EVENT_CAPACITY: usize = 64;

/// 리스너 수명 주기 이벤트. 같은 포트에서는 항상 `Bound` 뒤에 `Released`가 옵니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerEvent {
    /// 소켓 바인딩 완료
    Bound { port: u16, kind: ListenerKind, generation: u64 },
    /// 소켓 해제 확인 (유예 시간 초과로 강제 중단된 경우 포함)
    Released { port: u16, kind: ListenerKind, generation: u64 },
}

/// 리로드 한 번에 적용할 리스너 구성. 살아 있는 리스너를 건드리기 전에 검증됩니다.
struct ListenerPlan {
    bindings: Vec<PortBinding>,
    sniff: SniffTable,
}

/// 포트 → 리스너 인스턴스 맵의 유일한 소유자.
///
/// 리로드 신호를 하나씩 소비하므로 두 리로드가 동시에 실행되지 않습니다.
pub struct ServerManager {
    settings: ServerSettings,
    client: ProxyClient,
    instances: HashMap<u16, ListenerInstance>,
    draining: Vec<JoinHandle<()>>,
    generation: u64,
    events: broadcast::Sender<ListenerEvent>,
}

impl ServerManager {
    pub fn new(settings: ServerSettings) -> Self {
        Self::with_client(settings, ProxyClient::new())
    }

    pub fn with_client(settings: ServerSettings, client: ProxyClient) -> Self {
        Self {
            settings,
            client,
            instances: HashMap::new(),
            draining: Vec::new(),
            generation: 0,
            events: broadcast::channel(EVENT_CAPACITY).0,
        }
    }

    /// 리스너 바인딩/해제 이벤트를 구독합니다.
    pub fn subscribe(&self) -> broadcast::Receiver<ListenerEvent> {
        self.events.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 실행 중인 포트 목록 (오름차순)
    pub fn running_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.instances.keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    pub fn listener_kind(&self, port: u16) -> Option<ListenerKind> {
        self.instances.get(&port).map(|instance| instance.kind)
    }

    pub fn listener_generation(&self, port: u16) -> Option<u64> {
        self.instances.get(&port).map(|instance| instance.generation)
    }

    /// 최초 로드 후 리로드 신호를 처리하다가 `shutdown`이 완료되면 모든 리스너를 멈춥니다.
    ///
    /// 최초 로드 실패와 바인딩 실패는 에러로 돌려주고, 리로드 중의 로드 실패는 기록만 합니다.
    pub async fn run<F>(&mut self, store: &RuleStore, reload_rx: mpsc::Receiver<()>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let result = self.serve(store, reload_rx, shutdown).await;
        self.shutdown().await;
        result
    }

    async fn serve<F>(&mut self, store: &RuleStore, mut reload_rx: mpsc::Receiver<()>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let rule_set = store.load().await?;
        let summary = self.reconcile(&rule_set).await?;
        info!(
            generation = summary.generation,
            ports = ?self.running_ports(),
            "초기 리스너 구성 완료"
        );

        tokio::pin!(shutdown);
        let mut watching = true;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("종료 신호 수신");
                    return Ok(());
                }
                signal = reload_rx.recv(), if watching => match signal {
                    Some(()) => self.reload(store).await?,
                    None => {
                        info!("리로드 신호 채널 종료, 현재 리스너로 계속 동작");
                        watching = false;
                    }
                },
            }
        }
    }

    /// 규칙 파일을 다시 읽어 적용합니다. 치명적이지 않은 실패는 이전 리스너를 유지합니다.
    #[instrument(skip_all, fields(path = %store.path().display()))]
    pub async fn reload(&mut self, store: &RuleStore) -> Result<()> {
        info!("규칙 리로드 시작");

        let rule_set = match store.load().await {
            Ok(rule_set) => rule_set,
            Err(e) => {
                error!(error = %e, "규칙 리로드 실패, 이전 리스너 유지");
                return Ok(());
            }
        };

        match self.reconcile(&rule_set).await {
            Ok(summary) => {
                info!(
                    generation = summary.generation,
                    started = ?summary.started,
                    removed = ?summary.removed,
                    "규칙 리로드 완료"
                );
                Ok(())
            }
            Err(e) if !e.is_fatal() => {
                error!(error = %e, "리스너 구성 실패, 이전 리스너 유지");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn plan(&self, rule_set: &RuleSet) -> Result<ListenerPlan> {
        let bindings = derive_bindings(rule_set);
        let sniff = derive_sniff_table(rule_set);
        let tcp_port = self.settings.tcp_port;

        if !sniff.is_empty() {
            if let Some(binding) = bindings.iter().find(|b| b.port == tcp_port && !b.is_empty()) {
                return Err(Error::PortConflict { port: binding.port });
            }
        }

        Ok(ListenerPlan { bindings, sniff })
    }

    /// 새 규칙 집합에 맞게 리스너를 맞춥니다.
    ///
    /// 1. 스니핑 포트: tcp 규칙이 있으면 기존 리스너를 멈추고 새로 띄우고, 없으면 멈춥니다.
    /// 2. 허용 포트: 규칙이 없으면 멈추고, 있으면 무조건 멈춘 뒤 새로 띄웁니다.
    /// 3. 허용 목록에서 빠진 포트는 멈춥니다.
    ///
    /// 같은 포트에 대해서는 항상 소켓 해제가 끝난 뒤에 새로 바인딩합니다.
    pub async fn reconcile(&mut self, rule_set: &RuleSet) -> Result<ReconcileSummary> {
        let plan = self.plan(rule_set)?;
        self.generation += 1;
        let generation = self.generation;
        let tcp_port = self.settings.tcp_port;
        let sniff_active = !plan.sniff.is_empty();
        let mut summary = ReconcileSummary {
            generation,
            ..ReconcileSummary::default()
        };

        debug!(
            generation,
            bindings = plan.bindings.len(),
            sniff_routes = plan.sniff.len(),
            "리스너 재조정 시작"
        );

        // 1. tcp 스니핑 포트
        if sniff_active {
            self.stop_port(tcp_port).await;
            self.start_sniff(plan.sniff, generation).await?;
            summary.started.push(tcp_port);
        } else if self.listener_kind(tcp_port) == Some(ListenerKind::TcpSniff) {
            self.stop_port(tcp_port).await;
            summary.removed.push(tcp_port);
        }

        // 2. 허용 포트
        for binding in plan.bindings.iter() {
            if sniff_active && binding.port == tcp_port {
                // 스니핑 리스너가 쓰는 포트. HTTP 규칙이 없다는 것은 계획 단계에서 확인했다
                continue;
            }

            if binding.is_empty() {
                if self.stop_port(binding.port).await {
                    summary.removed.push(binding.port);
                }
                continue;
            }

            self.stop_port(binding.port).await;
            self.start_http(binding.port, binding.rules.clone(), generation).await?;
            summary.started.push(binding.port);
        }

        // 3. 더 이상 허용되지 않는 포트
        let stale: Vec<u16> = self
            .instances
            .keys()
            .copied()
            .filter(|port| !plan.bindings.iter().any(|b| b.port == *port))
            .filter(|port| !(sniff_active && *port == tcp_port))
            .collect();
        for port in stale {
            self.stop_port(port).await;
            summary.removed.push(port);
        }

        self.draining.retain(|handle| !handle.is_finished());
        Ok(summary)
    }

    /// 포트의 리스너를 멈춥니다. 실행 중인 리스너가 없었으면 `false`입니다.
    async fn stop_port(&mut self, port: u16) -> bool {
        let Some(instance) = self.instances.remove(&port) else {
            return false;
        };

        let (kind, generation) = (instance.kind, instance.generation);
        info!(port, kind = %kind, generation, "리스너 중지");
        if let Some(handle) = instance.stop(self.settings.shutdown_grace()).await {
            self.draining.push(handle);
        }
        let _ = self.events.send(ListenerEvent::Released { port, kind, generation });
        true
    }

    async fn start_http(&mut self, port: u16, rules: Vec<RouteRule>, generation: u64) -> Result<()> {
        let listener = ServerListener::bind(self.settings.socket_addr(port), ListenerKind::Http).await?;
        let (local_addr, kind) = (listener.local_addr(), listener.kind());
        let table = RouteTable::new(port, rules);
        debug!(port, rules = table.len(), generation, "HTTP 라우팅 테이블 구성");

        let handler = Arc::new(RequestHandler::new(table, self.client.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (released_tx, released_rx) = oneshot::channel();
        let handle = tokio::spawn(listener.serve_http(
            handler,
            shutdown_rx,
            released_tx,
            self.settings.shutdown_grace(),
        ));

        self.instances.insert(
            port,
            ListenerInstance::new(kind, generation, local_addr, shutdown_tx, released_rx, handle),
        );
        let _ = self.events.send(ListenerEvent::Bound { port, kind, generation });
        Ok(())
    }

    async fn start_sniff(&mut self, table: SniffTable, generation: u64) -> Result<()> {
        let port = self.settings.tcp_port;
        let listener = ServerListener::bind(self.settings.socket_addr(port), ListenerKind::TcpSniff).await?;
        let (local_addr, kind) = (listener.local_addr(), listener.kind());
        let keys: Vec<&str> = table.routes().map(|rule| rule.key.as_str()).collect();
        debug!(port, routes = ?keys, generation, "tcp 스니핑 테이블 구성");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (released_tx, released_rx) = oneshot::channel();
        let handle = tokio::spawn(listener.serve_sniff(
            Arc::new(table),
            self.settings.sniff_options(),
            shutdown_rx,
            released_tx,
            self.settings.shutdown_grace(),
        ));

        self.instances.insert(
            port,
            ListenerInstance::new(kind, generation, local_addr, shutdown_tx, released_rx, handle),
        );
        let _ = self.events.send(ListenerEvent::Bound { port, kind, generation });
        Ok(())
    }

    /// 모든 리스너를 멈추고 남은 연결 정리까지 기다립니다.
    pub async fn shutdown(&mut self) {
        let ports = self.running_ports();
        if !ports.is_empty() {
            info!(ports = ?ports, "모든 리스너 종료");
        }
        for port in ports {
            self.stop_port(port).await;
        }

        for handle in self.draining.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "연결 정리 태스크 오류");
            }
        }
    }
}
