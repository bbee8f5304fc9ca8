//! LNET relay server.
//!
//! The server accepts plain TCP connections, gives each one its own task and
//! [`Session`], and routes stanzas between sessions by their `to` attribute.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::registry::SessionRegistry;
use crate::session::{Inbound, Session, SessionConfig};
use crate::stanza::Stanza;
use crate::RelayError;

/// Default listen address.
pub const DEFAULT_ADDR: &str = "localhost:9999";

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayServerConfig {
    /// Address to listen on (default: localhost:9999)
    pub addr: String,
    /// Settings applied to every accepted session
    pub session: SessionConfig,
}

impl RelayServerConfig {
    /// Reject settings no session could run with.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.addr.trim().is_empty() {
            return Err(RelayError::config("listen address must not be empty"));
        }
        if self.session.outbound_capacity == 0 {
            return Err(RelayError::config("outbound capacity must be at least 1"));
        }
        if self.session.max_frame_size == 0 {
            return Err(RelayError::config("maximum frame size must be at least 1"));
        }
        Ok(())
    }
}

impl Default for RelayServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            session: SessionConfig::default(),
        }
    }
}

/// LNET relay server instance.
pub struct RelayServer {
    config: RelayServerConfig,
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
}

impl RelayServer {
    /// Bind the listening socket.
    pub async fn bind(config: RelayServerConfig) -> Result<Self, RelayError> {
        config.validate()?;
        let listener = TcpListener::bind(&config.addr).await?;
        info!(addr = %listener.local_addr()?, "LNET relay listening");

        Ok(Self {
            config,
            listener,
            registry: Arc::new(SessionRegistry::new()),
        })
    }

    /// Address the server actually bound, useful when binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    /// The registry shared by all sessions of this server.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<(), RelayError> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` completes.
    ///
    /// Sessions already running are left to finish on their own.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!(sessions = self.registry.len(), "LNET relay shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            let session = Session::new(stream, &self.config.session);
            let registry = Arc::clone(&self.registry);
            let span = info_span!(
                "lnet.session",
                session = %session.id(),
                peer = %peer_addr,
                identity = tracing::field::Empty, // Set on login
            );

            tokio::spawn(
                async move {
                    debug!("Session accepted");
                    if let Err(e) = serve_session(session, registry).await {
                        if e.is_protocol_violation() {
                            warn!(error = %e, "Closing session after protocol violation");
                        } else {
                            warn!(error = %e, "Session error");
                        }
                    }
                }
                .instrument(span),
            );
        }
    }
}

/// Drive one session until its stream ends or fails.
///
/// The session is registered for the whole of its lifetime and removed from
/// the registry on every exit path before the transport is closed.
pub async fn serve_session<T>(
    mut session: Session<T>,
    registry: Arc<SessionRegistry>,
) -> Result<(), RelayError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let id = session.id();
    registry.add(session.handle());

    let result = relay_inbound(&mut session, &registry).await;

    registry.remove(id);
    if let Err(e) = session.close().await {
        debug!(error = %e, "Error closing transport");
    }
    debug!(clean = result.is_ok(), "Session ended");

    result
}

async fn relay_inbound<T>(
    session: &mut Session<T>,
    registry: &SessionRegistry,
) -> Result<(), RelayError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(inbound) = session.recv().await? {
        match inbound {
            Inbound::Routable(stanza) => route(registry, &stanza),
            Inbound::LoggedIn { identity, .. } => {
                Span::current().record("identity", identity.as_str());
            }
            Inbound::Keepalive => {}
        }
    }
    Ok(())
}

fn route(registry: &SessionRegistry, stanza: &Stanza) {
    let Some(target) = stanza.to() else {
        debug!(stanza = stanza.name(), "Dropping stanza without recipient");
        return;
    };

    let results = registry.route(stanza, target);
    if results.is_empty() {
        debug!(stanza = stanza.name(), to = %target, "No session carries recipient name");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Frame, StanzaCodec, MAX_FRAME_SIZE};
    use crate::stanza::{Login, Message};
    use futures::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio_util::codec::Framed;

    type Client = Framed<DuplexStream, StanzaCodec>;

    fn spawn_session(registry: &Arc<SessionRegistry>) -> Client {
        let (server_io, client_io) = tokio::io::duplex(MAX_FRAME_SIZE);
        let session = Session::new(server_io, &SessionConfig::default());
        tokio::spawn(serve_session(session, Arc::clone(registry)));
        Framed::new(client_io, StanzaCodec::new())
    }

    async fn login(client: &mut Client, name: &str) {
        client
            .send(Frame::Stanza(Stanza::Login(Login {
                name: Some(name.to_string()),
                ..Default::default()
            })))
            .await
            .unwrap();
        let welcome = client.next().await.unwrap().unwrap();
        assert_eq!(welcome.to(), Some(name));
    }

    fn message(to: Option<&str>, body: &str) -> Frame {
        Frame::Stanza(Stanza::Message(Message {
            to: to.map(str::to_string),
            body: body.to_string(),
            ..Default::default()
        }))
    }

    async fn wait_for_len(registry: &SessionRegistry, len: usize) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while registry.len() != len {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("registry did not reach expected size");
    }

    #[tokio::test]
    async fn test_routes_between_sessions() {
        let registry = Arc::new(SessionRegistry::new());
        let mut alice = spawn_session(&registry);
        let mut bob = spawn_session(&registry);
        login(&mut alice, "alice").await;
        login(&mut bob, "bob").await;

        alice.send(message(Some("BOB"), "hi")).await.unwrap();

        let received = bob.next().await.unwrap().unwrap();
        assert_eq!(received.from(), Some("alice"));
        assert_eq!(received.to(), Some("BOB"));
    }

    #[tokio::test]
    async fn test_stanza_without_recipient_is_dropped() {
        let registry = Arc::new(SessionRegistry::new());
        let mut alice = spawn_session(&registry);
        let mut bob = spawn_session(&registry);
        login(&mut alice, "alice").await;
        login(&mut bob, "bob").await;

        alice.send(message(None, "lost")).await.unwrap();
        alice.send(message(Some("bob"), "found")).await.unwrap();

        let Stanza::Message(received) = bob.next().await.unwrap().unwrap() else {
            panic!("Expected message");
        };
        assert_eq!(received.body, "found");
    }

    #[tokio::test]
    async fn test_session_removed_on_disconnect() {
        let registry = Arc::new(SessionRegistry::new());
        let client = spawn_session(&registry);
        wait_for_len(&registry, 1).await;

        drop(client);
        wait_for_len(&registry, 0).await;
    }

    #[tokio::test]
    async fn test_session_removed_after_protocol_violation() {
        let registry = Arc::new(SessionRegistry::new());
        let (server_io, mut client_io) = tokio::io::duplex(MAX_FRAME_SIZE);
        let session = Session::new(server_io, &SessionConfig::default());
        let task = tokio::spawn(serve_session(session, Arc::clone(&registry)));

        tokio::io::AsyncWriteExt::write_all(&mut client_io, b"<foo/>")
            .await
            .unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(RelayError::UnknownElement { .. })));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_bind_reports_local_addr() {
        let server = RelayServer::bind(RelayServerConfig {
            addr: "127.0.0.1:0".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        let addr = server.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_rejects_zero_capacity() {
        let mut config = RelayServerConfig {
            addr: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        config.session.outbound_capacity = 0;

        let err = RelayServer::bind(config).await.err().unwrap();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_default_config() {
        let config = RelayServerConfig::default();
        assert_eq!(config.addr, "localhost:9999");
        assert_eq!(config.session.outbound_capacity, 256);
        assert!(!config.session.debug);
        assert!(config.validate().is_ok());
    }
}
