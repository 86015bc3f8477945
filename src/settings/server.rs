use serde::Deserialize;
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use super::SettingsError;
use crate::proxy::SniffOptions;

const RULES_FILE_NAME: &str = "proxies.json";

#[derive(Clone, Debug, Deserialize)]
pub struct ServerSettings {
    /// 규칙 파일 경로 (기본값: 실행 파일 옆의 proxies.json)
    #[serde(default = "default_rules_path")]
    pub rules_file: PathBuf,

    /// 모든 리스너가 바인딩할 주소
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Host 헤더 스니핑 전용 포트 (기본값: 2222)
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,

    /// 리스너 종료 시 진행 중인 연결을 기다리는 시간
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    #[serde(default = "default_sniff_buffer")]
    pub sniff_buffer: usize,

    /// 스니핑 읽기 시간 제한. 없으면 제한 없이 기다립니다.
    #[serde(default)]
    pub sniff_timeout_ms: Option<u64>,
}

/// 실행 파일과 같은 디렉토리의 `proxies.json`
pub fn default_rules_path() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(RULES_FILE_NAME)))
        .unwrap_or_else(|| PathBuf::from(RULES_FILE_NAME))
}

fn default_bind_address() -> IpAddr { IpAddr::V4(Ipv4Addr::UNSPECIFIED) }
fn default_tcp_port() -> u16 { 2222 }
fn default_shutdown_grace_ms() -> u64 { 3000 }
fn default_sniff_buffer() -> usize { 1024 }

pub fn parse_env_var<T: std::str::FromStr, F: FnOnce() -> T>(name: &str, default: F) -> Result<T, SettingsError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.parse().map_err(|e: T::Err| SettingsError::EnvVarInvalid {
            var_name: name.to_string(),
            value: val,
            reason: e.to_string(),
        }),
        Err(env::VarError::NotPresent) => Ok(default()),
        Err(e) => Err(SettingsError::EnvVarInvalid {
            var_name: name.to_string(),
            value: "".to_string(),
            reason: e.to_string(),
        }),
    }
}

/// 값이 없으면 `None`인 환경 변수
pub fn parse_optional_env_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, SettingsError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) if val.trim().is_empty() => Ok(None),
        Ok(val) => val.trim().parse().map(Some).map_err(|e: T::Err| SettingsError::EnvVarInvalid {
            var_name: name.to_string(),
            value: val.clone(),
            reason: e.to_string(),
        }),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(SettingsError::EnvVarInvalid {
            var_name: name.to_string(),
            value: "".to_string(),
            reason: e.to_string(),
        }),
    }
}

impl ServerSettings {
    const MIN_PORT: u16 = 1;
    const MAX_PORT: u16 = 65535;

    fn parse_port(name: &str, value: &str) -> Result<u16, SettingsError> {
        let port = value.parse::<u16>().map_err(|_| SettingsError::EnvVarInvalid {
            var_name: name.to_string(),
            value: value.to_string(),
            reason: format!("포트는 {}-{} 범위여야 합니다", Self::MIN_PORT, Self::MAX_PORT),
        })?;

        if port < Self::MIN_PORT {
            return Err(SettingsError::EnvVarInvalid {
                var_name: name.to_string(),
                value: value.to_string(),
                reason: "포트는 0이 될 수 없습니다".to_string(),
            });
        }

        Ok(port)
    }

    pub fn from_env() -> Result<Self, SettingsError> {
        let tcp_port = Self::parse_port(
            "PROXY_TCP_PORT",
            &env::var("PROXY_TCP_PORT").unwrap_or_else(|_| default_tcp_port().to_string()),
        )?;

        let settings = Self {
            rules_file: env::var("PROXY_RULES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_rules_path()),
            bind_address: parse_env_var("PROXY_BIND_ADDRESS", default_bind_address)?,
            tcp_port,
            shutdown_grace_ms: parse_env_var("PROXY_SHUTDOWN_GRACE_MS", default_shutdown_grace_ms)?,
            sniff_buffer: parse_env_var("PROXY_SNIFF_BUFFER", default_sniff_buffer)?,
            sniff_timeout_ms: parse_optional_env_var("PROXY_SNIFF_TIMEOUT_MS")?,
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.tcp_port < Self::MIN_PORT {
            return Err(SettingsError::InvalidConfig(
                "tcp_port는 0이 될 수 없습니다".to_string(),
            ));
        }
        if self.sniff_buffer == 0 {
            return Err(SettingsError::InvalidConfig(
                "sniff_buffer는 0보다 커야 합니다".to_string(),
            ));
        }
        if self.sniff_timeout_ms == Some(0) {
            return Err(SettingsError::InvalidConfig(
                "sniff_timeout_ms는 0보다 커야 합니다".to_string(),
            ));
        }
        Ok(())
    }

    pub fn socket_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.bind_address, port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn sniff_options(&self) -> SniffOptions {
        SniffOptions {
            buffer_size: self.sniff_buffer,
            read_timeout: self.sniff_timeout_ms.map(Duration::from_millis),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            rules_file: default_rules_path(),
            bind_address: default_bind_address(),
            tcp_port: default_tcp_port(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            sniff_buffer: default_sniff_buffer(),
            sniff_timeout_ms: None,
        }
    }
}
