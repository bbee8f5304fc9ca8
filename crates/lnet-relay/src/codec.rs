//! Streaming stanza codec for LNET connections.
//!
//! LNET has no outer envelope and no length prefix: a connection carries a
//! sequence of top-level elements, optionally separated by whitespace
//! keepalives. The decoder re-scans the buffered bytes with quick-xml until
//! one complete top-level element is available, classifies it by tag name as
//! soon as its start tag is complete, and only then decodes attributes and
//! inner content.

use std::ops::Range;

use bytes::{Buf, BytesMut};
use quick_xml::errors::{IllFormedError, SyntaxError};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::stanza::{tag, Data, Login, Message, Request, Stanza};
use crate::RelayError;

/// Largest single frame (read or written), in bytes.
pub const MAX_FRAME_SIZE: usize = 32768;

/// Wire form of a keepalive.
pub const KEEPALIVE: &[u8] = b" ";

/// Target used for raw frame tracing when debug mode is on.
const WIRE_TARGET: &str = "lnet::wire";

/// Something the codec can write to the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A structured stanza
    Stanza(Stanza),
    /// A single space outside any element
    Keepalive,
}

impl From<Stanza> for Frame {
    fn from(stanza: Stanza) -> Self {
        Frame::Stanza(stanza)
    }
}

/// Decoder/encoder between raw bytes and [`Stanza`] values.
///
/// The codec holds no locks; it belongs to exactly one session task.
#[derive(Debug, Clone)]
pub struct StanzaCodec {
    max_frame_size: usize,
    debug: bool,
}

impl StanzaCodec {
    /// Create a codec with the default frame bound and wire tracing off.
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            debug: false,
        }
    }

    /// Override the frame bound.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Trace every raw inbound and outbound frame.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    fn trace_frame(&self, direction: &'static str, raw: &[u8]) {
        if self.debug {
            debug!(
                target: WIRE_TARGET,
                direction,
                len = raw.len(),
                frame = %String::from_utf8_lossy(raw),
            );
        }
    }
}

impl Default for StanzaCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for StanzaCodec {
    type Item = Stanza;
    type Error = RelayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Stanza>, RelayError> {
        let scan = scan_frame(&src[..])?;
        match scan {
            Scan::Incomplete { skip } => {
                src.advance(skip);
                if src.len() >= self.max_frame_size {
                    return Err(RelayError::FrameTooLarge {
                        limit: self.max_frame_size,
                    });
                }
                Ok(None)
            }
            Scan::Complete { stanza, frame } => {
                if frame.len() > self.max_frame_size {
                    return Err(RelayError::FrameTooLarge {
                        limit: self.max_frame_size,
                    });
                }
                self.trace_frame("in", &src[frame.clone()]);
                src.advance(frame.end);
                Ok(Some(stanza))
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Stanza>, RelayError> {
        match self.decode(src)? {
            Some(stanza) => Ok(Some(stanza)),
            None if src.is_empty() => Ok(None),
            None => Err(RelayError::malformed("stream ended inside an element")),
        }
    }
}

impl Encoder<Frame> for StanzaCodec {
    type Error = RelayError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), RelayError> {
        let bytes = match &frame {
            Frame::Keepalive => KEEPALIVE.to_vec(),
            Frame::Stanza(stanza) => encode_stanza(stanza)?,
        };

        if bytes.len() > self.max_frame_size {
            return Err(RelayError::FrameTooLarge {
                limit: self.max_frame_size,
            });
        }

        self.trace_frame("out", &bytes);
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}

/// Stanza kinds, keyed by local tag name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StanzaKind {
    Login,
    Message,
    Data,
    Request,
    Ping,
    Pong,
}

impl StanzaKind {
    fn classify(local_name: &[u8]) -> Option<Self> {
        let kind = match local_name {
            n if n == tag::LOGIN.as_bytes() => StanzaKind::Login,
            n if n == tag::MESSAGE.as_bytes() => StanzaKind::Message,
            n if n == tag::DATA.as_bytes() => StanzaKind::Data,
            n if n == tag::REQUEST.as_bytes() => StanzaKind::Request,
            n if n == tag::PING.as_bytes() => StanzaKind::Ping,
            n if n == tag::PONG.as_bytes() => StanzaKind::Pong,
            _ => return None,
        };
        Some(kind)
    }
}

/// Outcome of scanning the read buffer.
enum Scan {
    /// No complete element yet. The first `skip` bytes were inter-element
    /// noise and can be discarded.
    Incomplete { skip: usize },
    /// One complete top-level element occupying `frame`.
    Complete { stanza: Stanza, frame: Range<usize> },
}

/// Look for the first complete top-level element in `buf`.
fn scan_frame(buf: &[u8]) -> Result<Scan, RelayError> {
    let mut reader = Reader::from_reader(buf);
    let mut skip = 0;
    // (kind, start tag, offset of '<', offset just past the start tag)
    let mut open: Option<(StanzaKind, BytesStart<'_>, usize, usize)> = None;
    let mut depth = 0usize;

    loop {
        let pos = reader.buffer_position() as usize;
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) if is_truncation(&e, &buf[pos..]) => return Ok(Scan::Incomplete { skip }),
            Err(e) => return Err(e.into()),
        };

        match open.take() {
            None => match event {
                Event::Start(start) => {
                    let kind = classify(&start)?;
                    open = Some((kind, start, pos, reader.buffer_position() as usize));
                    depth = 1;
                }
                Event::Empty(start) => {
                    let kind = classify(&start)?;
                    let stanza = decode_element(kind, &start, b"")?;
                    let frame = pos..reader.buffer_position() as usize;
                    return Ok(Scan::Complete { stanza, frame });
                }
                Event::End(end) => {
                    return Err(RelayError::malformed(format!(
                        "unexpected closing tag </{}>",
                        String::from_utf8_lossy(end.name().as_ref())
                    )));
                }
                Event::Eof => return Ok(Scan::Incomplete { skip }),
                // Character data, declarations, comments between stanzas
                _ => skip = reader.buffer_position() as usize,
            },
            Some((kind, start, element_start, inner_start)) => match event {
                Event::Start(_) => {
                    depth += 1;
                    open = Some((kind, start, element_start, inner_start));
                }
                Event::End(_) if depth == 1 => {
                    let stanza = decode_element(kind, &start, &buf[inner_start..pos])?;
                    let frame = element_start..reader.buffer_position() as usize;
                    return Ok(Scan::Complete { stanza, frame });
                }
                Event::End(_) => {
                    depth -= 1;
                    open = Some((kind, start, element_start, inner_start));
                }
                Event::Eof => return Ok(Scan::Incomplete { skip }),
                _ => open = Some((kind, start, element_start, inner_start)),
            },
        }
    }
}

/// Markup openers that quick-xml cannot classify until more bytes arrive.
const BANG_OPENERS: [&[u8]; 3] = [b"<!--", b"<![CDATA[", b"<!DOCTYPE"];

/// Errors quick-xml reports when the slice simply ends too early. `rest` is
/// the unread input starting at the failed event.
fn is_truncation(err: &quick_xml::Error, rest: &[u8]) -> bool {
    if let quick_xml::Error::Syntax(SyntaxError::InvalidBangMarkup) = err {
        return BANG_OPENERS.iter().any(|opener| {
            rest.len() < opener.len() && opener[..rest.len()].eq_ignore_ascii_case(rest)
        });
    }
    matches!(
        err,
        quick_xml::Error::Syntax(
            SyntaxError::UnclosedTag
                | SyntaxError::UnclosedPIOrXmlDecl
                | SyntaxError::UnclosedComment
                | SyntaxError::UnclosedCData
                | SyntaxError::UnclosedDoctype
        ) | quick_xml::Error::IllFormed(IllFormedError::MissingEndTag(_))
    )
}

fn classify(start: &BytesStart<'_>) -> Result<StanzaKind, RelayError> {
    StanzaKind::classify(start.local_name().as_ref()).ok_or_else(|| {
        RelayError::unknown_element(
            String::from_utf8_lossy(start.local_name().as_ref()),
            namespace_of(start),
        )
    })
}

/// Namespace declared on the element itself, or its bare prefix when the
/// prefix is not declared there.
fn namespace_of(start: &BytesStart<'_>) -> String {
    let name = start.name();
    let binding = match name.prefix() {
        Some(prefix) => [b"xmlns:".as_slice(), prefix.as_ref()].concat(),
        None => b"xmlns".to_vec(),
    };

    start
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == binding.as_slice())
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
        .or_else(|| {
            name.prefix()
                .map(|prefix| String::from_utf8_lossy(prefix.as_ref()).into_owned())
        })
        .unwrap_or_default()
}

/// Attribute values of one start tag, keyed by local name.
struct Attributes(Vec<(String, String)>);

impl Attributes {
    fn parse(start: &BytesStart<'_>) -> Result<Self, RelayError> {
        let mut values = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            if attr.key.as_namespace_binding().is_some() {
                continue;
            }
            let key = std::str::from_utf8(attr.key.local_name().as_ref())?.to_string();
            let value = attr.unescape_value()?.into_owned();
            values.push((key, value));
        }
        Ok(Self(values))
    }

    fn take(&mut self, names: &[&str]) -> Option<String> {
        let index = self
            .0
            .iter()
            .position(|(key, _)| names.contains(&key.as_str()))?;
        Some(self.0.swap_remove(index).1)
    }
}

fn decode_element(
    kind: StanzaKind,
    start: &BytesStart<'_>,
    inner: &[u8],
) -> Result<Stanza, RelayError> {
    let mut attrs = Attributes::parse(start)?;

    let stanza = match kind {
        StanzaKind::Login => Stanza::Login(Login {
            client: attrs.take(&["client"]),
            game: attrs.take(&["game"]),
            lich: attrs.take(&["lich"]),
            name: attrs.take(&["name"]),
            password: attrs.take(&["password"]),
        }),
        StanzaKind::Message => Stanza::Message(Message {
            type_: attrs.take(&["type"]),
            from: attrs.take(&["from"]),
            to: attrs.take(&["to"]),
            subscription: attrs.take(&["subscription", "Subscription"]),
            channel: attrs.take(&["channel"]),
            body: std::str::from_utf8(inner)?.to_string(),
        }),
        StanzaKind::Data => Stanza::Data(Data {
            type_: attrs.take(&["type"]),
            from: attrs.take(&["from"]),
            to: attrs.take(&["to"]),
            body: std::str::from_utf8(inner)?.to_string(),
        }),
        StanzaKind::Request => Stanza::Request(Request {
            from: attrs.take(&["from"]),
            to: attrs.take(&["to"]),
            type_: attrs
                .take(&["type"])
                .ok_or_else(|| RelayError::malformed("<request/> requires a type attribute"))?,
        }),
        StanzaKind::Ping => Stanza::Ping,
        StanzaKind::Pong => Stanza::Pong,
    };

    Ok(stanza)
}

fn push_optional(start: &mut BytesStart<'_>, name: &str, value: &Option<String>) {
    if let Some(value) = value {
        start.push_attribute((name, value.as_str()));
    }
}

/// Serialize one stanza. Absent attributes are omitted; an empty body
/// produces a self-closing element.
fn encode_stanza(stanza: &Stanza) -> Result<Vec<u8>, RelayError> {
    let name = stanza.name();
    let mut start = BytesStart::new(name);

    let body = match stanza {
        Stanza::Login(login) => {
            push_optional(&mut start, "client", &login.client);
            push_optional(&mut start, "game", &login.game);
            push_optional(&mut start, "lich", &login.lich);
            push_optional(&mut start, "name", &login.name);
            push_optional(&mut start, "password", &login.password);
            ""
        }
        Stanza::Message(message) => {
            push_optional(&mut start, "type", &message.type_);
            push_optional(&mut start, "from", &message.from);
            push_optional(&mut start, "to", &message.to);
            push_optional(&mut start, "subscription", &message.subscription);
            push_optional(&mut start, "channel", &message.channel);
            message.body.as_str()
        }
        Stanza::Data(data) => {
            push_optional(&mut start, "type", &data.type_);
            push_optional(&mut start, "from", &data.from);
            push_optional(&mut start, "to", &data.to);
            data.body.as_str()
        }
        Stanza::Request(request) => {
            push_optional(&mut start, "from", &request.from);
            push_optional(&mut start, "to", &request.to);
            start.push_attribute(("type", request.type_.as_str()));
            ""
        }
        Stanza::Ping | Stanza::Pong => "",
    };

    let mut writer = Writer::new(Vec::with_capacity(64 + body.len()));
    if body.is_empty() {
        writer.write_event(Event::Empty(start))?;
    } else {
        writer.write_event(Event::Start(start))?;
        // Inner content is already markup; it goes out untouched.
        writer.get_mut().extend_from_slice(body.as_bytes());
        writer.write_event(Event::End(BytesEnd::new(name)))?;
    }

    Ok(writer.into_inner())
}
