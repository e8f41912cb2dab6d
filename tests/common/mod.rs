//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use service_runtime::lifecycle::{Bootstrap, Shutdown, StartupError};
use service_runtime::{ReadinessCoordinator, RuntimeConfig};

/// Start a simple mock backend that returns a fixed response and closes.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move { (200, response.to_string()) }).await
}

/// Start a programmable mock backend. Each connection serves one response.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                if read_request_head(&mut socket).await.is_none() {
                    return;
                }
                let (status, body) = f().await;
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason(status),
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Start a keep-alive backend. Returns its address and the number of
/// connections it has accepted so far.
pub async fn start_keepalive_backend() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                while read_request_head(&mut socket).await.is_some() {
                    let response = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
                    if socket.write_all(response.as_bytes()).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    (addr, accepted)
}

/// Read one request head (bodiless requests only). `None` on EOF.
async fn read_request_head(socket: &mut tokio::net::TcpStream) -> Option<()> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    Some(())
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

/// A config bound to an ephemeral port with a short drain.
pub fn test_config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.listener.drain_timeout_secs = 2;
    config
}

/// A running service under test.
pub struct TestRuntime {
    pub addr: SocketAddr,
    pub readiness: ReadinessCoordinator,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<i32, StartupError>>,
}

impl TestRuntime {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the exit code.
    pub async fn stop(self) -> i32 {
        self.shutdown.trigger();
        self.join().await
    }

    /// Wait for the runtime to exit on its own.
    pub async fn join(self) -> i32 {
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("runtime did not exit")
            .expect("runtime task panicked")
            .expect("runtime failed")
    }
}

/// Spawn `bootstrap` on an ephemeral port.
pub async fn spawn_runtime(bootstrap: Bootstrap) -> TestRuntime {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let readiness = bootstrap.readiness().clone();
    let shutdown = bootstrap.shutdown().clone();
    let handle = tokio::spawn(bootstrap.run_on(listener));
    TestRuntime {
        addr,
        readiness,
        shutdown,
        handle,
    }
}

/// Spawn a runtime serving `routes` with `config`.
pub async fn spawn_with_routes(config: RuntimeConfig, routes: Router) -> TestRuntime {
    let bootstrap = Bootstrap::new(config).unwrap().with_routes(routes);
    spawn_runtime(bootstrap).await
}

/// HTTP client without connection reuse or proxies.
pub fn test_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Poll `/readyz` until it answers 200.
pub async fn wait_until_ready(client: &reqwest::Client, runtime: &TestRuntime) {
    for _ in 0..100 {
        if let Ok(res) = client.get(runtime.url("/readyz")).send().await {
            if res.status() == 200 {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("runtime never became ready");
}
