pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced while loading a scene description.
///
/// The first fatal error aborts the whole load. Errors tied to a document
/// element carry the source id (`<string>` or a file path) and a
/// human-readable location produced by the source tracker.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Raised while parsing and staging the document (Phase A), including
    /// syntax errors reported by the XML parser.
    #[error("Error while loading \"{src}\" (at {loc}): {msg}")]
    Parse {
        src: String,
        loc: String,
        msg: String,
    },

    /// Raised while instantiating staged objects (Phase B).
    #[error("Error while loading \"{src}\" (near {loc}): {msg}")]
    Instantiate {
        src: String,
        loc: String,
        msg: String,
    },

    /// An error with no usable document location.
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn msg(msg: impl Into<String>) -> Self {
        Error::Message(msg.into())
    }

    /// Whether the message already carries the "Error while loading ..."
    /// envelope. Wrapping is idempotent: an already-located error passes
    /// through stage boundaries untouched.
    pub(crate) fn is_located(&self) -> bool {
        matches!(self, Error::Parse { .. } | Error::Instantiate { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn located_errors_render_the_envelope() {
        let e = Error::Parse {
            src: "<string>".into(),
            loc: "line 3, col 7".into(),
            msg: "unexpected tag \"foo\"".into(),
        };
        assert_eq!(
            e.to_string(),
            "Error while loading \"<string>\" (at line 3, col 7): unexpected tag \"foo\""
        );
        assert!(e.is_located());
        assert!(!Error::msg("plain").is_located());
    }
}
