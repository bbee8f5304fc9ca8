//! Test utilities for LNET relay integration testing.
//!
//! Provides helpers for starting a relay on an ephemeral port and driving raw
//! TCP clients against it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lnet_relay::{RelayServer, RelayServerConfig, SessionConfig, SessionRegistry};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize tracing once for the whole test binary.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

/// Test server handle.
pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<SessionRegistry>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestServer {
    /// Start a relay on an available port.
    pub async fn start() -> Self {
        Self::start_with_session(SessionConfig::default()).await
    }

    /// Start a relay with custom per-session settings.
    pub async fn start_with_session(session: SessionConfig) -> Self {
        init_tracing();

        let server = RelayServer::bind(RelayServerConfig {
            addr: "127.0.0.1:0".to_string(),
            session,
        })
        .await
        .expect("Failed to bind test server");
        let addr = server.local_addr().expect("Failed to get local addr");
        let registry = server.registry();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(server.run_until(async move {
            let _ = shutdown_rx.await;
        }));

        Self {
            addr,
            registry,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Wait until exactly `len` sessions are registered.
    pub async fn wait_for_sessions(&self, len: usize) {
        let registry = Arc::clone(&self.registry);
        timeout(DEFAULT_TIMEOUT, async move {
            while registry.len() != len {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "Expected {} sessions, registry holds {}",
                len,
                self.registry.len()
            )
        });
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Raw LNET test client.
pub struct TestClient {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl TestClient {
    /// Connect a new client to the server.
    pub async fn connect(server: &TestServer) -> Self {
        let stream = TcpStream::connect(server.addr)
            .await
            .expect("Failed to connect to test server");
        Self {
            stream,
            buffer: Vec::new(),
        }
    }

    /// Connect and log in, consuming the welcome message.
    pub async fn login(server: &TestServer, name: &str) -> Self {
        let mut client = Self::connect(server).await;
        client
            .send(&format!(
                r#"<login client="test" game="DR" name="{}" password="x"/>"#,
                name
            ))
            .await
            .expect("Failed to send login");
        client
            .read_until("Hello</message>", DEFAULT_TIMEOUT)
            .await
            .expect("No welcome message");
        client.clear_buffer();
        client
    }

    /// Send raw wire data.
    pub async fn send(&mut self, data: &str) -> Result<(), std::io::Error> {
        self.stream.write_all(data.as_bytes()).await?;
        self.stream.flush().await
    }

    /// Read until the buffered data contains `pattern`.
    pub async fn read_until(
        &mut self,
        pattern: &str,
        timeout_dur: Duration,
    ) -> Result<String, std::io::Error> {
        let start = std::time::Instant::now();
        loop {
            let data = String::from_utf8_lossy(&self.buffer).to_string();
            if data.contains(pattern) {
                return Ok(data);
            }

            let remaining = timeout_dur.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("Timeout waiting for pattern: {}", pattern),
                ));
            }

            let mut buf = [0u8; 4096];
            let n = match timeout(remaining, self.stream.read(&mut buf)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("Timeout waiting for pattern: {}", pattern),
                    ))
                }
            };

            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "Connection closed",
                ));
            }

            self.buffer.extend_from_slice(&buf[..n]);
        }
    }

    /// Collect whatever arrives within `window`.
    pub async fn read_for(&mut self, window: Duration) -> String {
        let deadline = tokio::time::Instant::now() + window;
        let mut buf = [0u8; 4096];
        while let Ok(Ok(n)) = tokio::time::timeout_at(deadline, self.stream.read(&mut buf)).await {
            if n == 0 {
                break;
            }
            self.buffer.extend_from_slice(&buf[..n]);
        }
        String::from_utf8_lossy(&self.buffer).to_string()
    }

    /// Wait for the server to close the connection.
    pub async fn expect_closed(&mut self) {
        let mut buf = [0u8; 4096];
        loop {
            match timeout(DEFAULT_TIMEOUT, self.stream.read(&mut buf)).await {
                Ok(Ok(0)) | Ok(Err(_)) => return,
                Ok(Ok(n)) => self.buffer.extend_from_slice(&buf[..n]),
                Err(_) => panic!("Server did not close the connection"),
            }
        }
    }

    /// Clear the read buffer.
    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
    }
}
