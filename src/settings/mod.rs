//! 프로세스 설정: `PROXY_CONFIG_FILE`이 가리키는 TOML 파일 또는 `PROXY_` 환경 변수.

use std::{env, path::Path};
use serde::Deserialize;
use tracing::debug;

mod error;
pub mod logging;
mod server;
pub mod watcher;

pub use error::SettingsError;
pub use logging::LogSettings;
pub use server::{default_rules_path, parse_env_var, ServerSettings};
pub use watcher::{spawn_reload_monitor, ConfigEvent, ConfigWatcher, WatcherSettings};

pub type Result<T> = std::result::Result<T, SettingsError>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    // 서버 설정
    #[serde(default)]
    pub server: ServerSettings,

    // 로깅 설정
    #[serde(default)]
    pub logging: LogSettings,

    // 규칙 파일 감시 설정
    #[serde(default)]
    pub watcher: WatcherSettings,
}

impl Settings {
    pub async fn load() -> Result<Self> {
        if let Ok(config_path) = env::var("PROXY_CONFIG_FILE") {
            Self::from_toml_file(&config_path).await
        } else {
            Self::from_env().await
        }
    }

    pub async fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!("설정 파일 로드: {}", path.as_ref().display());
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| SettingsError::FileError {
                path: path.as_ref().to_string_lossy().to_string(),
                error: e,
            })?;

        let settings: Self = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub async fn from_env() -> Result<Self> {
        let settings = Self {
            server: ServerSettings::from_env()?,
            logging: LogSettings::from_env()?,
            watcher: WatcherSettings::from_env()?,
        };

        settings.validate()?;
        Ok(settings)
    }

    /// 설정 유효성 검증
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;

        if self.watcher.enabled && self.watcher.debounce_ms == 0 {
            return Err(SettingsError::InvalidConfig(
                "디바운스 시간은 0보다 커야 합니다".to_string(),
            ));
        }

        Ok(())
    }
}
