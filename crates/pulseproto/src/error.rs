//! Error types for the client session
//!
//! Two scopes of failure exist. Session-fatal errors (transport loss, frame
//! violations, handshake failure) fail every pending request and close the
//! session. Request-local errors (server error replies, lookups, local
//! precondition checks) only resolve the call that caused them.

use crate::command::Command;
use crate::frame::FrameError;
use crate::tagstruct::CodecError;

/// Server error code for a missing entity
pub const ERR_NOENTITY: u32 = 5;
/// Server error code for a refused credential or operation
pub const ERR_ACCESS: u32 = 1;

/// Human-readable name for a server error code.
///
/// Codes are server-defined; unknown values return `None` and should be shown
/// as the raw number.
pub fn error_code_name(code: u32) -> Option<&'static str> {
    Some(match code {
        0 => "ok",
        1 => "access denied",
        2 => "unknown command",
        3 => "invalid argument",
        4 => "entity exists",
        5 => "no such entity",
        6 => "connection refused",
        7 => "protocol error",
        8 => "timeout",
        9 => "no authentication key",
        10 => "internal error",
        11 => "connection terminated",
        12 => "entity killed",
        13 => "invalid server",
        14 => "module initialization failed",
        15 => "bad state",
        16 => "no data",
        17 => "incompatible protocol version",
        18 => "too large",
        19 => "not supported",
        20 => "unknown error code",
        21 => "no such extension",
        22 => "obsolete functionality",
        23 => "missing implementation",
        24 => "client forked",
        25 => "input/output error",
        26 => "device or resource busy",
        _ => return None,
    })
}

fn describe_code(code: &u32) -> String {
    match error_code_name(*code) {
        Some(name) => format!("{} ({})", code, name),
        None => code.to_string(),
    }
}

/// Failures before the session reaches `Ready`
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("Server rejected handshake at {stage}: error {}", describe_code(.code))]
    Rejected { stage: &'static str, code: u32 },
    #[error("Server protocol version {0} is older than the minimum supported (13)")]
    VersionTooOld(u32),
    #[error("Malformed handshake reply: {0}")]
    Malformed(#[from] CodecError),
    #[error("Unexpected handshake packet: {0}")]
    Unexpected(String),
    #[error("Handshake timed out")]
    Timeout,
    #[error("Connection closed during handshake")]
    ConnectionClosed,
    #[error("Frame error during handshake: {0}")]
    Frame(#[from] FrameError),
    #[error("Transport error during handshake: {0}")]
    Transport(#[from] std::io::Error),
}

/// Errors surfaced by [`crate::Client`] operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Unexpected frame: {0}")]
    UnexpectedFrame(String),

    #[error("Protocol decode error: {0}")]
    Codec(#[from] CodecError),

    #[error("{command} failed: error {}", describe_code(.code))]
    Command { command: Command, code: u32 },

    #[error("Request timed out")]
    Timeout,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Channel count mismatch: target has {expected} channels, got {actual} volumes")]
    ChannelCountMismatch { expected: usize, actual: usize },

    #[error("Reply shape did not match the request")]
    UnexpectedReply,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientError {
    /// Whether this error tears down the whole session
    pub fn is_fatal(&self) -> bool {
        match self {
            ClientError::Transport(_)
            | ClientError::ConnectionClosed
            | ClientError::Handshake(_)
            | ClientError::Frame(_)
            | ClientError::UnexpectedFrame(_) => true,
            // Layout skew poisons everything after it on the stream
            ClientError::Codec(e) => e.is_layout_mismatch(),
            _ => false,
        }
    }

    /// Server answered `NOENTITY`
    pub fn is_no_entity(&self) -> bool {
        matches!(self, ClientError::Command { code, .. } if *code == ERR_NOENTITY)
    }

    /// Server error code, if this is a command failure
    pub fn code(&self) -> Option<u32> {
        match self {
            ClientError::Command { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
