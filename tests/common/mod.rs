#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use portmux::settings::ServerSettings;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// 테스트가 끝나면 백엔드 태스크를 정리합니다.
pub struct Backend {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl Backend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// 사용 가능한 포트 하나를 고릅니다.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// 루프백 바인딩, 짧은 유예 시간
pub fn test_settings(tcp_port: u16) -> ServerSettings {
    ServerSettings {
        bind_address: "127.0.0.1".parse().unwrap(),
        tcp_port,
        shutdown_grace_ms: 200,
        sniff_timeout_ms: Some(2000),
        ..ServerSettings::default()
    }
}

pub fn write_rules(dir: &tempfile::TempDir, json: &str) -> PathBuf {
    let path = dir.path().join("proxies.json");
    std::fs::write(&path, json).unwrap();
    path
}

/// 받은 요청 정보를 JSON으로 돌려주는 HTTP 백엔드
pub async fn spawn_http_backend(name: &'static str) -> Backend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| async move {
                    let header = |name: &str| {
                        req.headers()
                            .get(name)
                            .and_then(|value| value.to_str().ok())
                            .unwrap_or_default()
                            .to_string()
                    };
                    let body = serde_json::json!({
                        "backend": name,
                        "path": req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/"),
                        "host": header("host"),
                        "x_forwarded_host": header("x-forwarded-host"),
                        "x_forwarded_for": header("x-forwarded-for"),
                        "x_forwarded_proto": header("x-forwarded-proto"),
                    });
                    Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(body.to_string()))))
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    Backend { addr, handle }
}

/// 받은 바이트를 그대로 돌려주는 TCP 백엔드
pub async fn spawn_tcp_echo() -> Backend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.into_split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    Backend { addr, handle }
}

/// 포트가 연결을 받기 시작할 때까지 기다립니다.
pub async fn wait_for_listener(port: u16) {
    for _ in 0..100 {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("포트 {}가 열리지 않았습니다", port);
}

/// 포트에 다시 바인딩할 수 있는지 (리스너가 소켓을 놓았는지)
pub async fn port_is_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).await.is_ok()
}

/// 프록시 테스트용 클라이언트. 리스너 교체 후 닫힌 연결을 재사용하지 않도록 풀을 끈다.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}
