//! Error codes shared by every layer of the protocol stack
//!
//! Errors carry two views of the same failure: an [`ErrorKind`] for matching in
//! Rust code and a packed [`ErrorCode`] that identifies the module, the operation
//! and the reason as a single 32 bit integer. The packed layout is
//!
//! ```text
//! bit 31      error indicator
//! bits 30..24 reserved (zero)
//! bits 23..16 module identifier
//! bits 15..8  function identifier
//! bits 7..0   reason
//! ```

use std::fmt;

use derive_more::Display;

use crate::response::status::StatusWord;
use crate::transport::TransportError;

/// Bit set on every code created through [`ErrorCode::new`]
pub const ERROR_INDICATOR: u32 = 0x8000_0000;

/// Module identifiers
pub mod module {
    /// APDU codec
    pub const APDU: u8 = 0x10;
    /// Generic protocol layer
    pub const PROTOCOL: u8 = 0x20;
    /// T=1' block transport
    pub const T1PRIME: u8 = 0x21;
    /// Physical (I2C style) driver layer
    pub const I2C: u8 = 0x23;
    /// APDU exchange over a protocol stack
    pub const APDU_PROTOCOL: u8 = 0x28;
    /// SCP03 secure channel
    pub const SCP03: u8 = 0x33;
    /// Logger
    pub const LOGGER: u8 = 0x90;
}

/// Function identifiers
pub mod function {
    /// [`Command::from_bytes`](crate::Command::from_bytes)
    pub const APDU_DECODE: u8 = 0x01;
    /// [`Command::to_bytes`](crate::Command::to_bytes)
    pub const APDU_ENCODE: u8 = 0x02;
    /// [`Response::from_bytes`](crate::Response::from_bytes)
    pub const RESPONSE_DECODE: u8 = 0x03;
    /// [`Response::to_bytes`](crate::Response::to_bytes)
    pub const RESPONSE_ENCODE: u8 = 0x04;

    /// Layer activation
    pub const ACTIVATE: u8 = 0x81;
    /// Layer transceive
    pub const TRANSCEIVE: u8 = 0x82;
    /// Layer transmit
    pub const TRANSMIT: u8 = 0x83;
    /// Layer receive
    pub const RECEIVE: u8 = 0x84;
    /// Reading a layer property
    pub const GET_PROPERTY: u8 = 0x85;
    /// Updating a layer property
    pub const SET_PROPERTY: u8 = 0x86;
    /// Layer construction
    pub const LAYER_INITIALIZE: u8 = 0x87;
}

/// Reasons reserved for all modules
pub mod reason {
    /// Unspecified error
    pub const UNSPECIFIED: u8 = 0xff;
    /// Memory could not be allocated
    pub const OUT_OF_MEMORY: u8 = 0xfe;
    /// Invalid argument
    pub const ILLEGAL_ARGUMENT: u8 = 0xfd;
    /// Not enough data available
    pub const TOO_LITTLE_DATA: u8 = 0xfc;
    /// Object in invalid state
    pub const INVALID_STATE: u8 = 0xfb;
    /// Internal invariant violated
    pub const PROGRAMMING_ERROR: u8 = 0xfa;
    /// Malformed protocol stack
    pub const INVALID_STACK: u8 = 0x8f;
    /// Status word signalled an error
    pub const STATUS_WORD_ERROR: u8 = 0xb0;
}

/// Packed 32 bit error code
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(u32);

impl ErrorCode {
    /// Compose an error code. The indicator bit is always set.
    pub const fn new(module: u8, function: u8, reason: u8) -> Self {
        Self(ERROR_INDICATOR | ((module as u32) << 16) | ((function as u32) << 8) | reason as u32)
    }

    /// Wrap a raw code as received from elsewhere
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw integer value
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Whether the error indicator bit is set
    pub const fn is_error(&self) -> bool {
        self.0 & ERROR_INDICATOR != 0
    }

    /// Module identifier
    pub const fn module(&self) -> u8 {
        (self.0 >> 16) as u8
    }

    /// Function identifier
    pub const fn function(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Reason
    pub const fn reason(&self) -> u8 {
        self.0 as u8
    }

    /// Split into `(module, function, reason)`
    pub const fn decompose(&self) -> (u8, u8, u8) {
        (self.module(), self.function(), self.reason())
    }
}

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErrorCode({:#010x})", self.0)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> Self {
        code.0
    }
}

/// Classification of a failure
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ErrorKind {
    /// Invalid argument passed by the caller
    #[display("illegal argument")]
    IllegalArgument,
    /// Allocation failure
    #[display("out of memory")]
    OutOfMemory,
    /// Input or bus delivered fewer bytes than required
    #[display("too little data")]
    TooLittleData,
    /// Operation not allowed in the current state
    #[display("invalid state")]
    InvalidState,
    /// Internal invariant violated
    #[display("programming error")]
    ProgrammingError,
    /// Unspecified error
    #[display("unspecified error")]
    Unspecified,
    /// Protocol stack is empty or a layer lacks a required operation
    #[display("invalid protocol stack")]
    InvalidStack,
    /// APDU length field does not match the data
    #[display("Lc does not match data")]
    LcMismatch,
    /// APDU mixes short and extended length fields
    #[display("short and extended length mixed")]
    ExtendedLengthMismatch,
    /// Block length field does not match the frame
    #[display("information size mismatch")]
    InformationSizeMismatch,
    /// Block checksum mismatch
    #[display("invalid CRC")]
    InvalidCrc,
    /// Length of an encoded structure is invalid
    #[display("invalid length")]
    InvalidLength,
    /// Unknown physical layer identifier
    #[display("invalid physical layer identifier")]
    InvalidPlid,
    /// Unexpected block received
    #[display("invalid block")]
    InvalidBlock,
    /// Peer aborted the exchange
    #[display("transceive aborted")]
    Aborted,
    /// Retransmissions used up, link resynchronized
    #[display("resynchronization budget exhausted")]
    ResyncExhausted,
    /// Cryptogram or MAC verification failed
    #[display("authentication failed")]
    AuthenticationFailed,
    /// Requested key set unknown to the secure element
    #[display("referenced data not found")]
    ReferencedDataNotFound,
    /// Response length does not match the protocol
    #[display("invalid response length")]
    InvalidResponseLength,
    /// A response MAC session is already open
    #[display("session already active")]
    SessionAlreadyActive,
    /// Requested security level is not allowed
    #[display("security level violation")]
    SecurityLevelViolation,
    /// Secure element returned an error status word
    #[display("status word {_0}")]
    Status(StatusWord),
    /// Physical transport failure
    #[display("transport: {_0}")]
    Transport(TransportError),
}

impl ErrorKind {
    /// Reason byte used when the kind is packed into an [`ErrorCode`]
    pub const fn reason(&self) -> u8 {
        match self {
            Self::IllegalArgument => reason::ILLEGAL_ARGUMENT,
            Self::OutOfMemory => reason::OUT_OF_MEMORY,
            Self::TooLittleData => reason::TOO_LITTLE_DATA,
            Self::InvalidState => reason::INVALID_STATE,
            Self::ProgrammingError => reason::PROGRAMMING_ERROR,
            Self::Unspecified => reason::UNSPECIFIED,
            Self::InvalidStack => reason::INVALID_STACK,
            Self::LcMismatch
            | Self::InformationSizeMismatch
            | Self::InvalidLength
            | Self::AuthenticationFailed
            | Self::ReferencedDataNotFound
            | Self::SessionAlreadyActive => 0x01,
            Self::ExtendedLengthMismatch
            | Self::InvalidCrc
            | Self::InvalidPlid
            | Self::InvalidResponseLength
            | Self::SecurityLevelViolation => 0x02,
            Self::Aborted => 0x60,
            Self::InvalidBlock => 0x61,
            Self::ResyncExhausted => 0x62,
            Self::Status(_) => reason::STATUS_WORD_ERROR,
            Self::Transport(e) => e.reason(),
        }
    }
}

/// Error returned by every fallible operation of the stack
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} ({code})")]
pub struct Error {
    kind: ErrorKind,
    code: ErrorCode,
}

impl Error {
    /// Create an error, deriving the reason from the kind
    pub fn new(module: u8, function: u8, kind: ErrorKind) -> Self {
        let code = ErrorCode::new(module, function, kind.reason());
        Self { kind, code }
    }

    /// Create an error with an explicit reason byte
    pub fn with_reason(module: u8, function: u8, reason: u8, kind: ErrorKind) -> Self {
        Self { kind, code: ErrorCode::new(module, function, reason) }
    }

    /// Shorthand for an [`ErrorKind::InvalidStack`] error
    pub fn invalid_stack(module: u8, function: u8) -> Self {
        Self::new(module, function, ErrorKind::InvalidStack)
    }

    /// Error kind
    pub const fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Packed error code
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    /// Status word if the secure element rejected a command
    pub const fn status_word(&self) -> Option<StatusWord> {
        match self.kind {
            ErrorKind::Status(sw) => Some(sw),
            _ => None,
        }
    }

    /// Whether this is a physical transport failure
    pub const fn is_transport(&self) -> bool {
        matches!(self.kind, ErrorKind::Transport(_))
    }
}

impl From<TransportError> for Error {
    fn from(error: TransportError) -> Self {
        Self::new(module::I2C, function::TRANSCEIVE, ErrorKind::Transport(error))
    }
}

/// Result type for the protocol stack
pub type Result<T> = std::result::Result<T, Error>;
