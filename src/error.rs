use std::io;

use thiserror::Error;

use crate::types::completion_code;

/// Result type used across this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (socket, OS, etc.).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Operation timed out.
    #[error("timeout waiting for response")]
    Timeout,

    /// The transport returned zero bytes.
    #[error("no reply from controller")]
    NoReply,

    /// The 6-bit message sequence or the 4-byte session sequence of a reply did
    /// not match what the session expected.
    #[error("sequence violation: {0}")]
    SequenceViolation(&'static str),

    /// An IPMI command completed with a non-zero completion code.
    #[error(
        "ipmi completion code: {completion_code:#04x} ({})",
        completion_code::describe(*completion_code)
    )]
    CompletionCode {
        /// Raw completion code returned by the controller.
        completion_code: u8,
    },

    /// A record or reply could not be decoded.
    #[error("decode error: {0}")]
    Decode(&'static str),

    /// A record or reply could not be decoded.
    #[error("decode error: {0}")]
    DecodeOwned(String),

    /// A size limit was exceeded.
    #[error("resource limit: {0}")]
    Resource(&'static str),

    /// Authentication type or vendor negotiation failed.
    #[error("negotiation failed: {0}")]
    Negotiation(&'static str),

    /// Peer responded with an unexpected or invalid packet.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// The session is not active and could not be (re)established.
    #[error("session closed")]
    SessionClosed,

    /// Unsupported configuration or protocol feature.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// Invalid caller-supplied argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

/// Coarse classification of [`Error`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeout, no reply or socket failure.
    Transport,
    /// Reply sequence numbers did not line up.
    Sequence,
    /// Controller-reported failure.
    CompletionCode,
    /// Malformed record or reply.
    Decode,
    /// Size limit exceeded.
    Resource,
    /// Authentication or vendor negotiation failed.
    Negotiation,
    /// Everything else.
    Other,
}

impl ErrorKind {
    /// Short label used for metrics and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Sequence => "sequence",
            Self::CompletionCode => "completion_code",
            Self::Decode => "decode",
            Self::Resource => "resource",
            Self::Negotiation => "negotiation",
            Self::Other => "other",
        }
    }
}

impl Error {
    pub(crate) fn decode_owned(msg: impl Into<String>) -> Self {
        Self::DecodeOwned(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::Timeout | Self::NoReply => ErrorKind::Transport,
            Self::SequenceViolation(_) => ErrorKind::Sequence,
            Self::CompletionCode { .. } => ErrorKind::CompletionCode,
            Self::Decode(_) | Self::DecodeOwned(_) => ErrorKind::Decode,
            Self::Resource(_) => ErrorKind::Resource,
            Self::Negotiation(_) => ErrorKind::Negotiation,
            Self::Protocol(_)
            | Self::SessionClosed
            | Self::Unsupported(_)
            | Self::InvalidArgument(_) => ErrorKind::Other,
        }
    }

    /// Errors counted toward the session's reconnect streak.
    pub fn is_streak_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Sequence)
    }

    /// The completion code carried by this error, if any.
    pub fn completion_code(&self) -> Option<u8> {
        match self {
            Self::CompletionCode { completion_code } => Some(*completion_code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streak_errors_are_transport_and_sequence() {
        assert!(Error::NoReply.is_streak_error());
        assert!(Error::Timeout.is_streak_error());
        assert!(Error::SequenceViolation("msg seq").is_streak_error());
        assert!(!Error::CompletionCode { completion_code: 0xC9 }.is_streak_error());
        assert!(!Error::Decode("short").is_streak_error());
    }

    #[test]
    fn completion_code_display_names_the_code() {
        let err = Error::CompletionCode { completion_code: 0xCB };
        let text = err.to_string();
        assert!(text.contains("0xcb"));
        assert!(text.contains("not present"));
    }
}
