use portmux::logging::init_logging;
use portmux::rules::RuleStore;
use portmux::server::ServerManager;
use portmux::settings::{spawn_reload_monitor, ConfigWatcher, Settings};
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // 로깅보다 설정이 먼저라 여기서는 stderr로만 알린다
    let settings = match Settings::load().await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("설정 로드 실패: {}", e);
            std::process::exit(1);
        }
    };

    let log_guard = init_logging(&settings.logging);
    info!(
        rules_file = %settings.server.rules_file.display(),
        bind = %settings.server.bind_address,
        tcp_port = settings.server.tcp_port,
        "portmux 시작"
    );

    let store = RuleStore::new(settings.server.rules_file.clone());

    // 용량 1: 대기 중인 리로드가 있으면 추가 신호는 버려진다
    let (reload_tx, reload_rx) = mpsc::channel(1);
    let monitor = if settings.watcher.enabled {
        let mut watcher = ConfigWatcher::new(store.path());
        match watcher.start(settings.watcher.poll_interval()) {
            Ok(()) => Some(spawn_reload_monitor(watcher, settings.watcher.debounce(), reload_tx)),
            Err(e) => {
                error!(error = %e, "규칙 파일 감시 시작 실패, 핫 리로드 없이 동작");
                None
            }
        }
    } else {
        info!("규칙 파일 감시 비활성화");
        None
    };

    let mut manager = ServerManager::new(settings.server.clone());
    let result = manager.run(&store, reload_rx, shutdown_signal()).await;

    if let Some(handle) = monitor {
        handle.abort();
    }

    match result {
        Ok(()) => info!("portmux 종료"),
        Err(e) => {
            error!(error = %e, "치명적 오류로 종료");
            drop(log_guard);
            std::process::exit(1);
        }
    }
}

/// Ctrl-C 또는 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Ctrl-C 핸들러 설치 실패");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "SIGTERM 핸들러 설치 실패");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C 수신"),
        _ = terminate => info!("SIGTERM 수신"),
    }
}
