//! Error types for the LNET relay.

use thiserror::Error;

/// LNET relay errors.
///
/// End of stream is not an error: [`crate::Session::recv`] reports it as
/// `Ok(None)`.
#[derive(Debug, Error)]
pub enum RelayError {
    /// IO error (network, file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Element whose tag is not one of the known stanza names
    #[error("unexpected LNET message {namespace} <{tag}/>")]
    UnknownElement {
        /// Local tag name as it appeared on the wire
        tag: String,
        /// Namespace declared for the tag (empty when none)
        namespace: String,
    },

    /// Markup violation reported by the XML reader
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Well-formed markup with unacceptable content
    #[error("Malformed stanza: {0}")]
    Malformed(String),

    /// A single frame exceeded the buffer bound
    #[error("Frame exceeds maximum size of {limit} bytes")]
    FrameTooLarge {
        /// The configured bound
        limit: usize,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Create a new malformed stanza error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Create a new classification error.
    pub fn unknown_element(tag: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::UnknownElement {
            tag: tag.into(),
            namespace: namespace.into(),
        }
    }

    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error came from decoding the peer's input rather than
    /// from the transport.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::UnknownElement { .. } | Self::Xml(_) | Self::Malformed(_)
        )
    }
}

impl From<quick_xml::events::attributes::AttrError> for RelayError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::Xml(err.into())
    }
}

impl From<std::str::Utf8Error> for RelayError {
    fn from(err: std::str::Utf8Error) -> Self {
        Self::Malformed(format!("invalid UTF-8: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_element_message_names_tag() {
        let err = RelayError::unknown_element("foo", "urn:example");
        assert_eq!(err.to_string(), "unexpected LNET message urn:example <foo/>");
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn test_io_is_not_protocol_violation() {
        let err: RelayError =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        assert!(!err.is_protocol_violation());
        assert!(!RelayError::FrameTooLarge { limit: 10 }.is_protocol_violation());
    }
}
