//! LNET stanza model.
//!
//! Every element the relay understands is one variant of [`Stanza`]. The
//! codec maps tag names onto variants and nothing else; adding a new kind of
//! stanza means adding a variant here and a tag in [`tag`].

/// Tag names of the recognised stanzas.
pub mod tag {
    pub const LOGIN: &str = "login";
    pub const MESSAGE: &str = "message";
    pub const DATA: &str = "data";
    pub const REQUEST: &str = "request";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
}

/// Sender name used on stanzas the relay synthesizes itself.
pub const SERVER_SENDER: &str = "server";

/// Default body of the welcome message sent after a login.
pub const DEFAULT_GREETING: &str = "Hello";

/// Handshake presented by a client. `name` becomes the session identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Login {
    pub client: Option<String>,
    pub game: Option<String>,
    /// Lich client name (`lich` attribute)
    pub lich: Option<String>,
    pub name: Option<String>,
    pub password: Option<String>,
}

/// General addressed chat/event message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub type_: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub subscription: Option<String>,
    pub channel: Option<String>,
    /// Raw inner content, carried through verbatim
    pub body: String,
}

impl Message {
    /// Build the greeting the relay sends to a freshly logged-in session.
    ///
    /// `greeting` is plain text; it is escaped into the body, which is
    /// otherwise written to the wire as markup.
    pub fn welcome(identity: &str, greeting: &str) -> Self {
        Self {
            type_: Some(SERVER_SENDER.to_string()),
            from: Some(SERVER_SENDER.to_string()),
            to: Some(identity.to_string()),
            body: quick_xml::escape::escape(greeting).into_owned(),
            ..Default::default()
        }
    }
}

/// Addressed payload, opaque to the relay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Data {
    pub type_: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    /// Raw inner content, carried through verbatim
    pub body: String,
}

/// Addressed control/query stanza. `type` is mandatory on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub from: Option<String>,
    pub to: Option<String>,
    pub type_: String,
}

/// A decoded LNET stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stanza {
    Login(Login),
    Message(Message),
    Data(Data),
    Request(Request),
    Ping,
    Pong,
}

impl Stanza {
    /// Tag name of this stanza on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Stanza::Login(_) => tag::LOGIN,
            Stanza::Message(_) => tag::MESSAGE,
            Stanza::Data(_) => tag::DATA,
            Stanza::Request(_) => tag::REQUEST,
            Stanza::Ping => tag::PING,
            Stanza::Pong => tag::PONG,
        }
    }

    /// Claimed sender, for addressed stanzas.
    pub fn from(&self) -> Option<&str> {
        match self {
            Stanza::Message(m) => m.from.as_deref(),
            Stanza::Data(d) => d.from.as_deref(),
            Stanza::Request(r) => r.from.as_deref(),
            Stanza::Login(_) | Stanza::Ping | Stanza::Pong => None,
        }
    }

    /// Target name, for addressed stanzas.
    pub fn to(&self) -> Option<&str> {
        match self {
            Stanza::Message(m) => m.to.as_deref(),
            Stanza::Data(d) => d.to.as_deref(),
            Stanza::Request(r) => r.to.as_deref(),
            Stanza::Login(_) | Stanza::Ping | Stanza::Pong => None,
        }
    }

    /// Replace the sender of an addressed stanza. No-op for the others.
    pub fn set_from(&mut self, from: Option<String>) {
        match self {
            Stanza::Message(m) => m.from = from,
            Stanza::Data(d) => d.from = from,
            Stanza::Request(r) => r.from = from,
            Stanza::Login(_) | Stanza::Ping | Stanza::Pong => {}
        }
    }

    /// Whether the relay forwards this stanza to other sessions.
    pub fn is_routable(&self) -> bool {
        matches!(
            self,
            Stanza::Message(_) | Stanza::Data(_) | Stanza::Request(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_from_overwrites_addressed_stanzas() {
        let mut stanza = Stanza::Message(Message {
            from: Some("eve".to_string()),
            to: Some("bob".to_string()),
            ..Default::default()
        });

        stanza.set_from(Some("alice".to_string()));

        assert_eq!(stanza.from(), Some("alice"));
        assert_eq!(stanza.to(), Some("bob"));
    }

    #[test]
    fn test_set_from_ignores_unaddressed_stanzas() {
        let mut stanza = Stanza::Ping;
        stanza.set_from(Some("alice".to_string()));
        assert_eq!(stanza, Stanza::Ping);
        assert_eq!(stanza.from(), None);
    }

    #[test]
    fn test_welcome_message() {
        let welcome = Message::welcome("carol", DEFAULT_GREETING);

        assert_eq!(welcome.to.as_deref(), Some("carol"));
        assert_eq!(welcome.from.as_deref(), Some("server"));
        assert_eq!(welcome.type_.as_deref(), Some("server"));
        assert_eq!(welcome.body, "Hello");
    }

    #[test]
    fn test_welcome_escapes_greeting() {
        let welcome = Message::welcome("carol", "Fish & Chips <today>");
        assert_eq!(welcome.body, "Fish &amp; Chips &lt;today&gt;");
    }

    #[test]
    fn test_routable_variants() {
        assert!(Stanza::Data(Data::default()).is_routable());
        assert!(Stanza::Request(Request::default()).is_routable());
        assert!(!Stanza::Login(Login::default()).is_routable());
        assert!(!Stanza::Pong.is_routable());
        assert_eq!(Stanza::Request(Request::default()).name(), "request");
    }
}
