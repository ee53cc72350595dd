//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use forward_cache_proxy::config::ProxyConfig;
use forward_cache_proxy::http::{ProxyContext, ProxyServer};
use forward_cache_proxy::lifecycle::Shutdown;
use forward_cache_proxy::net::listener::Listener;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A mock origin server that records what the proxy sent it.
pub struct MockOrigin {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
    connections: Arc<AtomicUsize>,
}

impl MockOrigin {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<String> {
        self.raw_requests()
            .iter()
            .map(|r| String::from_utf8_lossy(r).into_owned())
            .collect()
    }

    /// Requests exactly as the proxy sent them.
    pub fn raw_requests(&self) -> Vec<Vec<u8>> {
        self.requests.lock().unwrap().clone()
    }

    /// Absolute URL for `path` on this origin.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// `HTTP/1.1 200 OK` with a Content-Length framed body.
pub fn ok_response(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

/// Start a mock origin that always answers with `body`.
pub async fn start_mock_origin(body: &'static str) -> MockOrigin {
    start_programmable_origin(move |_| ok_response(body)).await
}

/// Start a mock origin whose raw response is computed from the raw request.
pub async fn start_programmable_origin<F>(respond: F) -> MockOrigin
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    start_byte_origin(move |request: &[u8]| respond(&String::from_utf8_lossy(request)).into_bytes()).await
}

/// Like [`start_programmable_origin`], but on raw bytes.
pub async fn start_byte_origin<F>(respond: F) -> MockOrigin
where
    F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let connections = Arc::new(AtomicUsize::new(0));
    let respond = Arc::new(respond);

    let recorded = Arc::clone(&requests);
    let counted = Arc::clone(&connections);
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    counted.fetch_add(1, Ordering::SeqCst);
                    let recorded = Arc::clone(&recorded);
                    let respond = Arc::clone(&respond);
                    tokio::spawn(async move {
                        let request = read_request(&mut socket).await;
                        let response = respond(&request);
                        recorded.lock().unwrap().push(request);
                        let _ = socket.write_all(&response).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockOrigin {
        addr,
        requests,
        connections,
    }
}

/// Read a request head plus its Content-Length body.
async fn read_request(socket: &mut TcpStream) -> Vec<u8> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return data,
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
    };

    let head = String::from_utf8_lossy(&data[..head_end]).into_owned();
    let length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("Content-Length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while data.len() < head_end + length {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
    }
    data
}

/// Small, fast-reacting configuration for tests.
pub fn test_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.workers.start_workers = 4;
    config.workers.min_spare = 1;
    config.workers.max_spare = 8;
    config.workers.max_workers = 32;
    config.workers.queue_depth = 64;
    config.workers.supervisor_interval_ms = 50;
    config.workers.shutdown_grace_secs = 1;
    config
}

/// A proxy running in the background.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub context: Arc<ProxyContext>,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<std::io::Result<()>>,
}

impl TestProxy {
    pub fn proxy_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Trigger shutdown and wait for the server to return.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("proxy did not stop")
            .unwrap()
            .unwrap();
    }
}

pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ProxyServer::new(config);
    let context = server.context();
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestProxy {
        addr,
        context,
        shutdown,
        handle,
    }
}

/// Send raw bytes to `addr` and read until the proxy closes (or resets).
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    let mut buf = [0u8; 8192];
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => response.extend_from_slice(&buf[..n]),
            }
        }
    })
    .await
    .expect("proxy did not close the connection");
    response
}

pub async fn send_text(addr: SocketAddr, request: &str) -> String {
    String::from_utf8(send_raw(addr, request.as_bytes()).await).unwrap()
}
