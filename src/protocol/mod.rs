//! Wire protocol subsystem.
//!
//! # Data Flow
//! ```text
//! Connection bytes
//!     → http.rs   (request line, header block, length-delimited body)
//!     → ajp13.rs  (binary frames, receiver-driven body pull)
//!     → headers.rs / cookie.rs / locale.rs / percent.rs (shared field grammar)
//!     → populated Request
//!
//! Response direction:
//!     Response pipeline → http.rs (status line) | ajp13.rs (header/body/end packets)
//! ```
//!
//! # Design Decisions
//! - Decoders are free functions over a `Connection`; all cursor state lives in
//!   the connection so a decoder can be reused across keep-alive iterations
//! - Every malformed-input condition is a `ProtocolError` variant, never a panic
//! - Header storage keeps raw `Name: value` lines; lookup semantics live in
//!   `headers.rs` and are shared by both decoders and the response

pub mod ajp13;
pub mod cookie;
pub mod headers;
pub mod http;
pub mod locale;
pub mod percent;

use std::fmt;
use std::io;

use thiserror::Error;

/// The closed set of protocols an acceptor can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Plain HTTP/0.9 - HTTP/1.1.
    Http,
    /// HTTP over TLS.
    Https,
    /// Apache JServ Protocol 1.3.
    Ajp13,
}

impl Protocol {
    /// Default listen port for this protocol.
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Http => 8080,
            Protocol::Https => 8443,
            Protocol::Ajp13 => 8009,
        }
    }

    /// URL scheme reported to the application for requests on this protocol.
    pub fn scheme(self) -> &'static str {
        match self {
            Protocol::Https => "https",
            Protocol::Http | Protocol::Ajp13 => "http",
        }
    }

    /// Whether the transport itself is encrypted.
    pub fn is_secure(self) -> bool {
        matches!(self, Protocol::Https)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "http"),
            Protocol::Https => write!(f, "https"),
            Protocol::Ajp13 => write!(f, "ajp13"),
        }
    }
}

/// Errors raised while decoding requests or moving body bytes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Underlying socket failure (peer reset, broken pipe).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read did not complete within the current phase's timeout.
    #[error("read timed out")]
    Timeout,

    /// The peer closed the connection before sending a request.
    #[error("connection closed by peer")]
    Closed,

    /// The request line could not be parsed.
    #[error("malformed request line: {0:?}")]
    BadRequestLine(String),

    /// A request or header line exceeded the line limit.
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),

    /// The header block carried more lines than allowed.
    #[error("too many header lines (limit {0})")]
    TooManyHeaders(usize),

    /// Content-Length was present but not a non-negative integer.
    #[error("invalid Content-Length: {0:?}")]
    BadContentLength(String),

    /// The request carried more parameters than allowed.
    #[error("too many request parameters (limit {0})")]
    TooManyParameters(usize),

    /// An AJP13 frame did not start with the expected magic bytes.
    #[error("invalid AJP13 magic {0:#06x}")]
    BadMagic(u16),

    /// A forward-request frame was not terminated by 0xFF.
    #[error("AJP13 frame missing 0xFF terminator")]
    MissingTerminator,

    /// The stream or frame ended in the middle of a structure.
    #[error("truncated input: {0}")]
    Truncated(&'static str),

    /// An AJP13 packet type that is not valid at this point.
    #[error("unexpected AJP13 packet type {0:#04x}")]
    UnexpectedPacket(u8),

    /// An AJP13 string, count or packet does not fit its length field.
    #[error("AJP13 field of {0} bytes does not fit one packet")]
    PacketTooLarge(usize),

    /// An AJP13 request attribute code outside the known table.
    #[error("unknown AJP13 attribute code {0:#04x}")]
    UnknownAttribute(u8),
}

impl ProtocolError {
    /// True for structurally malformed input (taxonomy class "malformed").
    pub fn is_malformed(&self) -> bool {
        !matches!(
            self,
            ProtocolError::Io(_) | ProtocolError::Timeout | ProtocolError::Closed
        )
    }
}

impl From<ProtocolError> for io::Error {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => e,
            ProtocolError::Timeout => io::Error::new(io::ErrorKind::TimedOut, "read timed out"),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
