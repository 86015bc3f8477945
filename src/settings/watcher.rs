use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Result as NotifyResult, Watcher};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::server::parse_env_var;
use crate::settings::{error::SettingsError, Result};

/// 규칙 파일 감시 설정
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WatcherSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 마지막 이벤트 후 이 시간 동안 조용하면 리로드합니다.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// 폴링 백엔드에서만 쓰입니다.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_enabled() -> bool { true }
fn default_debounce_ms() -> u64 { 300 }
fn default_poll_interval_ms() -> u64 { 200 }

impl WatcherSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            enabled: parse_env_var("PROXY_CONFIG_WATCH_ENABLED", default_enabled)?,
            debounce_ms: parse_env_var("PROXY_CONFIG_WATCH_TIMEOUT", default_debounce_ms)?,
            poll_interval_ms: parse_env_var("PROXY_CONFIG_WATCH_INTERVAL", default_poll_interval_ms)?,
        })
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// 설정 파일 변경 이벤트 타입
#[derive(Debug, PartialEq, Clone)]
pub enum ConfigEvent {
    /// 파일이 수정됨
    Modified(PathBuf),
    /// 파일이 생성됨 (에디터의 rename 저장 포함)
    Created(PathBuf),
    /// 파일이 삭제됨
    Deleted(PathBuf),
}

/// 규칙 파일 하나를 감시합니다.
///
/// 에디터가 임시 파일을 rename 하는 경우도 잡기 위해 부모 디렉토리를 감시하고,
/// 파일 이름이 같은 이벤트만 통과시킵니다.
pub struct ConfigWatcher {
    file: PathBuf,
    event_tx: mpsc::Sender<ConfigEvent>,
    event_rx: mpsc::Receiver<ConfigEvent>,
    watcher: Option<RecommendedWatcher>,
}

impl ConfigWatcher {
    pub fn new<P: Into<PathBuf>>(file: P) -> Self {
        let (event_tx, event_rx) = mpsc::channel(32);
        Self {
            file: file.into(),
            event_tx,
            event_rx,
            watcher: None,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// 테스트용 이벤트 송신자 반환
    #[cfg(test)]
    pub fn get_sender(&self) -> mpsc::Sender<ConfigEvent> {
        self.event_tx.clone()
    }

    /// 감시 시작
    pub fn start(&mut self, poll_interval: Duration) -> Result<()> {
        let event_tx = self.event_tx.clone();
        let file_name: Option<OsString> = self.file.file_name().map(|name| name.to_os_string());
        let directory = match self.file.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let handler = move |res: NotifyResult<Event>| match res {
            Ok(event) => {
                use notify::EventKind::*;

                for path in event.paths {
                    if path.file_name().map(|name| name.to_os_string()) != file_name {
                        continue;
                    }
                    let config_event = match event.kind {
                        Modify(_) => ConfigEvent::Modified(path),
                        Create(_) => ConfigEvent::Created(path),
                        Remove(_) => ConfigEvent::Deleted(path),
                        _ => continue,
                    };
                    debug!(event = ?config_event, "규칙 파일 이벤트");
                    let _ = event_tx.blocking_send(config_event);
                }
            }
            // 일시적인 감시 오류는 기록만 하고 계속 감시한다
            Err(e) => error!("감시 오류: {}", e),
        };

        let mut watcher = RecommendedWatcher::new(handler, Config::default().with_poll_interval(poll_interval))
            .map_err(|e| SettingsError::WatchError(e.to_string()))?;

        debug!("경로 감시 시작: {}", directory.display());
        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .map_err(|e| SettingsError::WatchError(e.to_string()))?;

        self.watcher = Some(watcher);
        Ok(())
    }

    /// 이벤트 수신 대기
    pub async fn watch(&mut self) -> Option<ConfigEvent> {
        self.event_rx.recv().await
    }

    /// 첫 이벤트를 기다린 뒤 `quiet` 동안 새 이벤트가 없을 때까지 모아서 돌려줍니다.
    pub async fn watch_debounced(&mut self, quiet: Duration) -> Option<Vec<ConfigEvent>> {
        let first = self.event_rx.recv().await?;
        let mut events = vec![first];

        while let Ok(Some(event)) = tokio::time::timeout(quiet, self.event_rx.recv()).await {
            events.push(event);
        }

        Some(events)
    }
}

fn log_config_events(events: &[ConfigEvent]) {
    info!("규칙 파일 이벤트 감지: {} 개의 이벤트", events.len());

    for event in events {
        match event {
            ConfigEvent::Created(path) => debug!("규칙 파일 생성됨: {}", path.display()),
            ConfigEvent::Modified(path) => debug!("규칙 파일 수정됨: {}", path.display()),
            ConfigEvent::Deleted(path) => warn!("규칙 파일 삭제됨: {}", path.display()),
        }
    }
}

/// 디바운스된 파일 이벤트를 리로드 신호로 바꾸는 태스크를 띄웁니다.
///
/// 리로드 채널이 이미 차 있으면 대기 중인 리로드가 있다는 뜻이므로 신호를 버립니다.
/// 수신자가 닫히면 태스크가 끝납니다.
pub fn spawn_reload_monitor(
    watcher: ConfigWatcher,
    debounce: Duration,
    reload_tx: mpsc::Sender<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut watcher = watcher;
        info!(path = %watcher.file().display(), "규칙 파일 감시자 시작");

        while let Some(events) = watcher.watch_debounced(debounce).await {
            log_config_events(&events);

            match reload_tx.try_send(()) {
                Ok(()) => debug!("리로드 요청 전송"),
                Err(TrySendError::Full(())) => debug!("이미 대기 중인 리로드가 있어 신호 무시"),
                Err(TrySendError::Closed(())) => {
                    info!("리로드 수신자가 닫혀 감시 종료");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_config_watcher() {
        let mut watcher = ConfigWatcher::new("/test/proxies.json");
        let tx = watcher.get_sender();
        let test_path = Path::new("/test/proxies.json").to_path_buf();

        tx.send(ConfigEvent::Created(test_path.clone())).await.unwrap();

        if let Some(event) = watcher.watch().await {
            assert_eq!(event, ConfigEvent::Created(test_path));
        } else {
            panic!("이벤트를 받지 못했습니다");
        }
    }

    #[tokio::test]
    async fn debounce_collects_burst() {
        let mut watcher = ConfigWatcher::new("/test/proxies.json");
        let tx = watcher.get_sender();
        let test_path = Path::new("/test/proxies.json").to_path_buf();

        for _ in 0..3 {
            tx.send(ConfigEvent::Modified(test_path.clone())).await.unwrap();
        }

        let events = watcher.watch_debounced(Duration::from_millis(50)).await.unwrap();
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn burst_becomes_single_reload() {
        let watcher = ConfigWatcher::new("/test/proxies.json");
        let tx = watcher.get_sender();
        let test_path = Path::new("/test/proxies.json").to_path_buf();
        let (reload_tx, mut reload_rx) = mpsc::channel(1);

        let handle = spawn_reload_monitor(watcher, Duration::from_millis(30), reload_tx);

        for _ in 0..5 {
            tx.send(ConfigEvent::Modified(test_path.clone())).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(reload_rx.try_recv().is_ok());
        assert!(reload_rx.try_recv().is_err());
        handle.abort();
    }

    #[tokio::test]
    async fn pending_reload_absorbs_extra_signals() {
        let watcher = ConfigWatcher::new("/test/proxies.json");
        let tx = watcher.get_sender();
        let test_path = Path::new("/test/proxies.json").to_path_buf();
        let (reload_tx, mut reload_rx) = mpsc::channel(1);

        let handle = spawn_reload_monitor(watcher, Duration::from_millis(20), reload_tx);

        // 소비되지 않은 리로드가 있는 동안 두 번째 변경이 들어온다
        tx.send(ConfigEvent::Modified(test_path.clone())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        tx.send(ConfigEvent::Modified(test_path.clone())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(reload_rx.try_recv().is_ok());
        assert!(reload_rx.try_recv().is_err());
        handle.abort();
    }
}
