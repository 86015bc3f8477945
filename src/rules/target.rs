use std::fmt;
use url::Url;

use super::error::EntryError;

/// 백엔드 대상의 스킴
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetScheme {
    Http,
    Https,
    Tcp,
}

impl TargetScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetScheme::Http => "http",
            TargetScheme::Https => "https",
            TargetScheme::Tcp => "tcp",
        }
    }

    /// 포트가 생략된 대상에 사용할 기본 포트
    pub fn default_port(&self) -> Option<u16> {
        match self {
            TargetScheme::Http => Some(80),
            TargetScheme::Https => Some(443),
            TargetScheme::Tcp => None,
        }
    }
}

impl fmt::Display for TargetScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 규칙이 가리키는 백엔드 주소입니다.
///
/// 스킴 없이 적힌 대상(`localhost:3000`)은 *bare* 대상으로 기록되고 `http`로 취급됩니다.
/// bare 대상에 포트가 없으면 포워딩 시 인바운드 요청의 포트를 이어받습니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    raw: String,
    url: Url,
    scheme: TargetScheme,
    port: Option<u16>,
    bare: bool,
}

impl Target {
    pub fn parse(raw: &str) -> Result<Self, EntryError> {
        let raw = raw.trim();
        let bare = !raw.contains("://");
        let candidate = if bare {
            format!("http://{}", raw)
        } else {
            raw.to_string()
        };

        let url = Url::parse(&candidate).map_err(|e| EntryError::InvalidTarget {
            target: raw.to_string(),
            reason: e.to_string(),
        })?;

        let scheme = match url.scheme() {
            "http" => TargetScheme::Http,
            "https" => TargetScheme::Https,
            "tcp" => TargetScheme::Tcp,
            other => {
                return Err(EntryError::UnsupportedScheme {
                    scheme: other.to_string(),
                })
            }
        };

        match url.host_str() {
            Some(host) if !host.is_empty() => {}
            _ => {
                return Err(EntryError::InvalidTarget {
                    target: raw.to_string(),
                    reason: "호스트가 없음".to_string(),
                })
            }
        }

        // url 크레이트는 스킴 기본 포트를 지워버리므로 bare 대상은 원문에서 포트를 다시 읽는다
        let port = url.port().or_else(|| {
            if bare {
                authority_port(raw)
            } else {
                None
            }
        });

        if scheme == TargetScheme::Tcp && port.is_none() {
            return Err(EntryError::InvalidTarget {
                target: raw.to_string(),
                reason: "tcp 대상에는 포트가 필요함".to_string(),
            });
        }

        Ok(Self {
            raw: raw.to_string(),
            url,
            scheme,
            port,
            bare,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> TargetScheme {
        self.scheme
    }

    pub fn is_tcp(&self) -> bool {
        self.scheme == TargetScheme::Tcp
    }

    pub fn is_bare(&self) -> bool {
        self.bare
    }

    /// IPv6 주소는 대괄호를 포함합니다.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// 대상에 명시된 포트
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// 대상 URL의 기본 경로 (`http://backend/base` → `/base`)
    pub fn base_path(&self) -> &str {
        self.url.path()
    }

    /// 포트를 확정한 `host:port` 문자열.
    ///
    /// 명시된 포트가 없으면 bare 대상은 `fallback_port`를, 그 외에는 스킴 기본 포트를 씁니다.
    pub fn authority(&self, fallback_port: u16) -> String {
        let port = match self.port {
            Some(port) => port,
            None if self.bare => fallback_port,
            None => self.scheme.default_port().unwrap_or(fallback_port),
        };
        format!("{}:{}", self.host(), port)
    }

    /// tcp 대상의 다이얼 주소
    pub fn dial_address(&self) -> Option<String> {
        self.port.map(|port| format!("{}:{}", self.host(), port))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn authority_port(raw: &str) -> Option<u16> {
    let authority = raw.split(['/', '?', '#']).next().unwrap_or(raw);
    let (host, port) = authority.rsplit_once(':')?;
    // "::1" 같은 대괄호 없는 IPv6 조각은 포트로 보지 않는다
    if host.contains(':') && !host.ends_with(']') {
        return None;
    }
    port.parse().ok()
}
