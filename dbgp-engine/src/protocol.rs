// DBGP protocol definitions and message framing
//
// Reference: https://xdebug.org/docs/dbgp

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::{BufMut, BytesMut};
use thiserror::Error;

use crate::object::HostError;

// Engine -> IDE messages are framed as:
// <decimal byte length of body> NUL <utf-8 xml body> NUL
//
// IDE -> engine commands are plain text terminated by any control byte
// (< 0x20), usually a single NUL.

pub type DbgpResult<T> = Result<T, DbgpError>;

#[derive(Debug, Error)]
pub enum DbgpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Missing option -{0}")]
    MissingOption(&'static str),

    #[error("Invalid value for option -{option}: {value}")]
    InvalidOption { option: &'static str, value: String },

    #[error("Breakpoint not found: {0}")]
    BreakpointNotFound(String),

    #[error("Invalid hit condition: {0}")]
    InvalidHitCondition(String),

    #[error("No stack context")]
    NoStackContext,

    #[error("Stack depth {0} out of range")]
    InvalidStackDepth(usize),

    #[error("Unknown context {0}")]
    InvalidContext(u64),

    #[error("Property not found: {0}")]
    PropertyNotFound(String),

    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Debug session terminated")]
    Terminated,

    #[error("Connection closed")]
    ConnectionClosed,
}

impl DbgpError {
    /// Numeric DBGP error code reported inside `<error code="...">`
    pub fn code(&self) -> u32 {
        match self {
            DbgpError::Protocol(_) => error_codes::PARSE_ERROR,
            DbgpError::MissingOption(_) | DbgpError::InvalidOption { .. } => {
                error_codes::INVALID_OPTIONS
            }
            DbgpError::UnknownCommand(_) => error_codes::UNIMPLEMENTED_COMMAND,
            DbgpError::InvalidHitCondition(_) => error_codes::BREAKPOINT_NOT_SET,
            DbgpError::BreakpointNotFound(_) => error_codes::NO_SUCH_BREAKPOINT,
            DbgpError::Host(_) => error_codes::EVALUATION_ERROR,
            DbgpError::NoStackContext | DbgpError::InvalidStackDepth(_) => {
                error_codes::INVALID_STACK_DEPTH
            }
            DbgpError::InvalidContext(_) => error_codes::INVALID_CONTEXT,
            DbgpError::PropertyNotFound(_) => error_codes::PROPERTY_NOT_FOUND,
            DbgpError::Io(_) | DbgpError::Terminated | DbgpError::ConnectionClosed => {
                error_codes::UNKNOWN
            }
        }
    }
}

pub mod error_codes {
    pub const PARSE_ERROR: u32 = 1;
    pub const INVALID_OPTIONS: u32 = 3;
    pub const UNIMPLEMENTED_COMMAND: u32 = 4;
    pub const BREAKPOINT_NOT_SET: u32 = 200;
    pub const NO_SUCH_BREAKPOINT: u32 = 205;
    pub const EVALUATION_ERROR: u32 = 206;
    pub const PROPERTY_NOT_FOUND: u32 = 300;
    pub const INVALID_STACK_DEPTH: u32 = 301;
    pub const INVALID_CONTEXT: u32 = 302;
    pub const UNKNOWN: u32 = 999;
}

/// Upper bound for a single inbound command (1MB)
/// A client that never sends a terminator cannot grow the buffer without limit
pub const MAX_COMMAND_SIZE: usize = 1024 * 1024;

/// Frame an outbound xml body for the wire
pub fn frame_message(body: &str) -> BytesMut {
    let bytes = body.as_bytes();
    let length = bytes.len().to_string();
    let mut buf = BytesMut::with_capacity(length.len() + bytes.len() + 2);

    buf.put_slice(length.as_bytes());
    buf.put_u8(0);
    buf.put_slice(bytes);
    buf.put_u8(0);

    buf
}

/// Base64 encode a text payload
pub fn encode_base64(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

/// Decode a base64 payload sent by the IDE
pub fn decode_base64(data: &str) -> DbgpResult<String> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| DbgpError::Protocol(format!("Invalid base64 payload: {}", e)))?;

    String::from_utf8(bytes)
        .map_err(|e| DbgpError::Protocol(format!("Invalid UTF-8 in payload: {}", e)))
}

/// Local path of a `file://` URI sent by the IDE
pub fn strip_file_uri(uri: &str) -> &str {
    uri.trim().strip_prefix("file://").unwrap_or_else(|| uri.trim())
}

pub fn to_file_uri(path: &str) -> String {
    if path.starts_with("file://") {
        path.to_string()
    } else {
        format!("file://{}", path)
    }
}

/// Escape text for use inside an xml attribute
pub fn escape_xml(content: &str) -> String {
    let mut escaped = String::with_capacity(content.len());
    for c in content.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
