use crate::routing::error::RoutingError;

/// 호스트 정보를 담는 불변 데이터 구조입니다.
///
/// # 필드
///
/// * `name` - 소문자로 정규화된 호스트 이름 (예: "example.com")
/// * `port` - 선택적 포트 번호
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostInfo {
    pub name: String,
    pub port: Option<u16>,
}

impl HostInfo {
    /// 호스트 헤더 값에서 HostInfo를 생성합니다.
    ///
    /// IPv6 주소는 대괄호 표기(`[::1]:8080`)를 이해합니다.
    ///
    /// # 예제
    ///
    /// ```
    /// use portmux::routing::HostInfo;
    ///
    /// let host_info = HostInfo::from_header_value("Example.com:8080").unwrap();
    /// assert_eq!(host_info.name, "example.com");
    /// assert_eq!(host_info.port, Some(8080));
    /// ```
    pub fn from_header_value(value: &str) -> Result<Self, RoutingError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(RoutingError::InvalidHost {
                host: value.to_string(),
                reason: "빈 호스트".to_string(),
            });
        }

        let (name, port) = if let Some(rest) = value.strip_prefix('[') {
            // IPv6: [addr] 또는 [addr]:port
            let (addr, after) = rest.split_once(']').ok_or_else(|| RoutingError::InvalidHost {
                host: value.to_string(),
                reason: "닫는 대괄호 없음".to_string(),
            })?;
            let port = match after.strip_prefix(':') {
                Some(port) => Some(Self::parse_port(value, port)?),
                None if after.is_empty() => None,
                None => {
                    return Err(RoutingError::InvalidHost {
                        host: value.to_string(),
                        reason: "Invalid format".to_string(),
                    })
                }
            };
            (format!("[{}]", addr), port)
        } else {
            let parts: Vec<&str> = value.split(':').collect();
            match parts.as_slice() {
                [name] => (name.to_string(), None),
                [name, port] if !name.is_empty() => (name.to_string(), Some(Self::parse_port(value, port)?)),
                _ => {
                    return Err(RoutingError::InvalidHost {
                        host: value.to_string(),
                        reason: "Invalid format".to_string(),
                    })
                }
            }
        };

        Ok(HostInfo {
            name: name.to_ascii_lowercase(),
            port,
        })
    }

    fn parse_port(host: &str, port: &str) -> Result<u16, RoutingError> {
        match port.parse::<u16>() {
            Ok(0) | Err(_) => Err(RoutingError::InvalidHost {
                host: host.to_string(),
                reason: format!("유효하지 않은 포트 {}", port),
            }),
            Ok(port) => Ok(port),
        }
    }

    /// 첫 번째 `.` 앞의 레이블
    pub fn first_label(&self) -> &str {
        self.name.split('.').next().unwrap_or_default()
    }
}
