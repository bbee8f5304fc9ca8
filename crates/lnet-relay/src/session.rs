//! Session handling for individual LNET connections.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

use crate::codec::{Frame, StanzaCodec, MAX_FRAME_SIZE};
use crate::registry::{OutboundStanza, SessionHandle};
use crate::stanza::{Login, Message, Stanza, DEFAULT_GREETING};
use crate::types::{Identity, SessionId, SessionState};
use crate::RelayError;

/// Per-session settings supplied by the accept loop.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Trace raw frames in both directions
    pub debug: bool,
    /// Capacity of the queue other sessions route into (default: 256)
    pub outbound_capacity: usize,
    /// Send a whitespace keepalive this often (default: never)
    pub keepalive_interval: Option<Duration>,
    /// Body of the welcome message (default: "Hello")
    pub greeting: String,
    /// Largest frame read or written (default: 32768)
    pub max_frame_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debug: false,
            outbound_capacity: 256,
            keepalive_interval: None,
            greeting: DEFAULT_GREETING.to_string(),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

/// The value produced by one receive cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// An addressed stanza, sender already overwritten, to be routed by its
    /// `to` attribute.
    Routable(Stanza),
    /// A login completed. The welcome has already been written to this
    /// session's peer and must not be routed again.
    LoggedIn { identity: String, welcome: Stanza },
    /// Nothing to route.
    Keepalive,
}

/// One live LNET connection.
///
/// The session owns its codec; it is the only writer of its transport.
/// Stanzas routed to it by other sessions arrive on its outbound queue and
/// are written while [`Session::recv`] waits for input.
pub struct Session<T> {
    id: SessionId,
    framed: Framed<T, StanzaCodec>,
    identity: Identity,
    state: SessionState,
    greeting: String,
    keepalive_period: Option<Duration>,
    keepalive: Option<Interval>,
    outbound_tx: mpsc::Sender<OutboundStanza>,
    outbound_rx: mpsc::Receiver<OutboundStanza>,
}

impl<T> Session<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a freshly accepted transport.
    pub fn new(transport: T, config: &SessionConfig) -> Self {
        let codec = StanzaCodec::new()
            .with_max_frame_size(config.max_frame_size)
            .with_debug(config.debug);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));

        Self {
            id: SessionId::next(),
            framed: Framed::with_capacity(transport, codec, config.max_frame_size),
            identity: Identity::new(),
            state: SessionState::Unauthenticated,
            greeting: config.greeting.clone(),
            keepalive_period: config.keepalive_interval,
            keepalive: None,
            outbound_tx,
            outbound_rx,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current identity; empty until login.
    pub fn identity(&self) -> String {
        self.identity.get()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle for the registry: shares this session's identity and queue.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle::new(self.id, self.identity.clone(), self.outbound_tx.clone())
    }

    /// Run one receive cycle.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream. Unknown or
    /// malformed elements end the session with an error; there is no
    /// recovery mid-stream.
    #[instrument(name = "lnet.session.recv", skip(self), fields(session = %self.id))]
    pub async fn recv(&mut self) -> Result<Option<Inbound>, RelayError> {
        if self.state == SessionState::Closed {
            return Ok(None);
        }
        if self.keepalive.is_none() {
            self.keepalive = self.keepalive_period.map(keepalive_interval);
        }

        loop {
            tokio::select! {
                biased;

                Some(outbound) = self.outbound_rx.recv() => {
                    self.deliver(outbound.stanza).await?;
                }
                _ = next_tick(&mut self.keepalive) => {
                    if let Err(e) = self.send_keepalive().await {
                        self.state = SessionState::Closed;
                        return Err(e);
                    }
                }
                frame = self.framed.next() => {
                    return match frame {
                        None => {
                            debug!("Stream ended");
                            self.state = SessionState::Closed;
                            Ok(None)
                        }
                        Some(Err(e)) => {
                            self.state = SessionState::Closed;
                            Err(e)
                        }
                        Some(Ok(stanza)) => match self.dispatch(stanza).await {
                            Ok(inbound) => Ok(Some(inbound)),
                            Err(e) => {
                                self.state = SessionState::Closed;
                                Err(e)
                            }
                        },
                    };
                }
            }
        }
    }

    /// Write a stanza to this session's peer.
    pub async fn send(&mut self, stanza: Stanza) -> Result<(), RelayError> {
        self.framed.send(Frame::Stanza(stanza)).await
    }

    /// Write a single whitespace keepalive.
    pub async fn send_keepalive(&mut self) -> Result<(), RelayError> {
        self.framed.send(Frame::Keepalive).await
    }

    /// Flush and shut down the transport.
    pub async fn close(mut self) -> Result<(), RelayError> {
        self.state = SessionState::Closed;
        self.framed.close().await
    }

    /// Write a stanza routed here by another session.
    async fn deliver(&mut self, stanza: Stanza) -> Result<(), RelayError> {
        match self.send(stanza).await {
            Ok(()) => Ok(()),
            Err(RelayError::FrameTooLarge { limit }) => {
                warn!(limit, "Dropping routed stanza larger than frame limit");
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Closed;
                Err(e)
            }
        }
    }

    async fn dispatch(&mut self, mut stanza: Stanza) -> Result<Inbound, RelayError> {
        let identity = self.identity.get();
        stanza.set_from((!identity.is_empty()).then_some(identity));

        match stanza {
            Stanza::Login(login) => self.login(login).await,
            Stanza::Ping => {
                debug!("Ping received");
                self.send(Stanza::Pong).await?;
                Ok(Inbound::Keepalive)
            }
            Stanza::Pong => Ok(Inbound::Keepalive),
            stanza @ (Stanza::Message(_) | Stanza::Data(_) | Stanza::Request(_)) => {
                Ok(Inbound::Routable(stanza))
            }
        }
    }

    async fn login(&mut self, login: Login) -> Result<Inbound, RelayError> {
        if self.state == SessionState::Authenticated {
            warn!(
                identity = %self.identity.get(),
                attempted = ?login.name,
                "Ignoring repeated login"
            );
            return Ok(Inbound::Keepalive);
        }

        let name = match login.name {
            Some(name) if !name.is_empty() => name,
            _ => {
                warn!("Ignoring login without a name");
                return Ok(Inbound::Keepalive);
            }
        };

        self.identity.set(name.clone());
        self.state = SessionState::Authenticated;
        info!(
            identity = %name,
            client = ?login.client,
            game = ?login.game,
            lich = ?login.lich,
            "Session logged in"
        );

        let welcome = Stanza::Message(Message::welcome(&name, &self.greeting));
        self.send(welcome.clone()).await?;

        Ok(Inbound::LoggedIn {
            identity: name,
            welcome,
        })
    }
}

fn keepalive_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
