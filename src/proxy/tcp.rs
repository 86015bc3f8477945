use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::SniffError;
use crate::routing::SniffTable;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const REQUEST_METHODS: [&[u8]; 2] = [b"GET ", b"POST "];

/// 초기 바이트 스니핑 옵션
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SniffOptions {
    pub buffer_size: usize,
    /// `None`이면 읽기 시간 제한이 없습니다.
    pub read_timeout: Option<Duration>,
}

impl Default for SniffOptions {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            read_timeout: None,
        }
    }
}

/// 지금까지 읽은 바이트가 아직 `GET ` 또는 `POST `로 시작할 수 있는지
fn may_be_http(buf: &[u8]) -> bool {
    REQUEST_METHODS.iter().any(|method| {
        let n = buf.len().min(method.len());
        buf[..n] == method[..n]
    })
}

fn headers_complete(buf: &[u8]) -> bool {
    buf.windows(HEADER_TERMINATOR.len()).any(|w| w == HEADER_TERMINATOR)
}

/// 버퍼에 담긴 HTTP 요청 머리에서 Host 헤더 값을 찾습니다.
///
/// 요청 라인이 `GET ` 또는 `POST `로 시작해야 하고, 헤더 이름은 대소문자를 구분하지 않습니다.
/// 줄바꿈으로 끝나지 않은 마지막 줄은 잘린 것으로 보고 무시합니다.
pub fn extract_host(buf: &[u8]) -> Result<&str, SniffError> {
    if !REQUEST_METHODS.iter().any(|method| buf.starts_with(method)) {
        return Err(SniffError::NotHttp);
    }

    let mut lines = buf.split_inclusive(|b| *b == b'\n');
    // 요청 라인
    lines.next();

    for line in lines {
        let Some(line) = line.strip_suffix(b"\n") else {
            break;
        };
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            break;
        }

        let Ok(line) = std::str::from_utf8(line) else {
            continue;
        };
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("host") {
                let value = value.trim();
                if !value.is_empty() {
                    return Ok(value);
                }
            }
        }
    }

    Err(SniffError::MissingHost)
}

async fn read_some<S>(stream: &mut S, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize, SniffError>
where
    S: AsyncRead + Unpin,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, stream.read(buf))
            .await
            .map_err(|_| SniffError::Timeout)?
            .map_err(SniffError::from),
        None => Ok(stream.read(buf).await?),
    }
}

/// 헤더 종료, 버퍼 가득 참, EOF 중 하나가 될 때까지 초기 바이트를 읽습니다.
pub async fn read_preamble<S>(stream: &mut S, options: &SniffOptions) -> Result<Vec<u8>, SniffError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; options.buffer_size];
    let mut filled = 0;

    while filled < buf.len() {
        let n = read_some(stream, &mut buf[filled..], options.read_timeout).await?;
        if n == 0 {
            break;
        }
        filled += n;

        if !may_be_http(&buf[..filled]) {
            return Err(SniffError::NotHttp);
        }
        if headers_complete(&buf[..filled]) {
            break;
        }
    }

    buf.truncate(filled);
    Ok(buf)
}

/// Host 헤더를 스니핑해 tcp 대상으로 연결을 넘깁니다.
///
/// 이미 읽은 초기 바이트를 백엔드에 먼저 재전송한 뒤 양방향 복사를 시작하며,
/// 한쪽이 닫힐 때까지 돌아오지 않습니다. 반환값은 (클라이언트→백엔드, 백엔드→클라이언트) 바이트 수입니다.
pub async fn sniff_and_forward(
    mut client: TcpStream,
    table: &SniffTable,
    options: &SniffOptions,
) -> Result<(u64, u64), SniffError> {
    let preamble = read_preamble(&mut client, options).await?;
    let host = extract_host(&preamble)?;

    let rule = table.find(host).ok_or_else(|| SniffError::NoRoute {
        host: host.to_string(),
    })?;
    // tcp 대상은 로드 시점에 포트가 보장된다
    let address = rule.target.dial_address().ok_or_else(|| SniffError::NoRoute {
        host: host.to_string(),
    })?;

    debug!(host = %host, key = %rule.key, backend = %address, "tcp 대상 연결");
    let mut backend = TcpStream::connect(&address)
        .await
        .map_err(|source| SniffError::Dial {
            address: address.clone(),
            source,
        })?;

    backend.write_all(&preamble).await?;
    let (to_backend, to_client) = tokio::io::copy_bidirectional(&mut client, &mut backend).await?;

    Ok((to_backend + preamble.len() as u64, to_client))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_host_from_get_request() {
        let buf = b"GET / HTTP/1.1\r\nHost: git.example.com\r\n\r\n";
        assert_eq!(extract_host(buf).unwrap(), "git.example.com");
    }

    #[test]
    fn host_header_name_is_case_insensitive() {
        let buf = b"POST /push HTTP/1.1\r\nUser-Agent: git/2.40\r\nhOsT:  Git.Example.com:2222 \r\n\r\n";
        assert_eq!(extract_host(buf).unwrap(), "Git.Example.com:2222");
    }

    #[test]
    fn rejects_non_http_and_missing_host() {
        assert!(matches!(extract_host(b"SSH-2.0-OpenSSH_9.6\r\n"), Err(SniffError::NotHttp)));
        assert!(matches!(extract_host(b"PUT / HTTP/1.1\r\nHost: a.b\r\n\r\n"), Err(SniffError::NotHttp)));
        assert!(matches!(
            extract_host(b"GET / HTTP/1.1\r\nAccept: */*\r\n\r\n"),
            Err(SniffError::MissingHost)
        ));
        // 잘린 마지막 줄은 신뢰하지 않는다
        assert!(matches!(
            extract_host(b"GET / HTTP/1.1\r\nHost: git.exa"),
            Err(SniffError::MissingHost)
        ));

    }

    #[test]
    fn host_line_ended_by_eof_is_rejected() {
        // 개행 없이 끝난 줄은 값이 완전해 보여도 잘린 것으로 본다
        assert!(matches!(
            extract_host(b"GET / HTTP/1.1\r\nHost: git.example.com"),
            Err(SniffError::MissingHost)
        ));
        assert_eq!(extract_host(b"GET / HTTP/1.1\r\nHost: git.example.com\n").unwrap(), "git.example.com");
    }

    #[test]
    fn partial_method_prefix_is_still_possible() {
        assert!(may_be_http(b"G"));
        assert!(may_be_http(b"PO"));
        assert!(!may_be_http(b"SSH-"));
        assert!(!may_be_http(b"GET/"));
    }

    #[tokio::test]
    async fn preamble_stops_at_header_terminator() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: git.example.com\r\n\r\n")
            .await
            .unwrap();

        let preamble = read_preamble(&mut server, &SniffOptions::default()).await.unwrap();
        assert_eq!(preamble, b"GET / HTTP/1.1\r\nHost: git.example.com\r\n\r\n");
    }

    #[tokio::test]
    async fn preamble_rejects_early_on_foreign_protocol() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"SSH-2.0-OpenSSH\r\n").await.unwrap();

        let result = read_preamble(&mut server, &SniffOptions::default()).await;
        assert!(matches!(result, Err(SniffError::NotHttp)));
    }

    #[tokio::test]
    async fn preamble_times_out_when_configured() {
        let (_client, mut server) = tokio::io::duplex(64);
        let options = SniffOptions {
            buffer_size: 1024,
            read_timeout: Some(Duration::from_millis(20)),
        };

        let result = read_preamble(&mut server, &options).await;
        assert!(matches!(result, Err(SniffError::Timeout)));
    }
}
