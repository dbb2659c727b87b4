/// A notation payload could not be parsed.
///
/// `offset` is the byte position in the input where parsing gave up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed value at byte {offset}: {kind}")]
pub struct DecodeError {
    pub offset: usize,
    pub kind: DecodeErrorKind,
}

impl DecodeError {
    pub(crate) fn new(offset: usize, kind: DecodeErrorKind) -> Self {
        Self { offset, kind }
    }
}

/// What went wrong while decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeErrorKind {
    /// The input ended in the middle of a value.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// A byte that cannot appear at this position.
    #[error("unexpected byte 0x{0:02x}")]
    UnexpectedByte(u8),

    /// A value started with a byte that is not a known type tag.
    #[error("unknown type tag 0x{0:02x}")]
    UnknownTypeTag(u8),

    /// A quoted string was never closed.
    #[error("unterminated string")]
    UnterminatedString,

    /// A backslash escape was malformed (e.g. `\x` without two hex digits).
    #[error("invalid escape sequence")]
    InvalidEscape,

    /// An integer, real or size prefix could not be parsed.
    #[error("invalid number")]
    InvalidNumber,

    /// A `u` value was not a hyphenated 36-character UUID.
    #[error("invalid uuid")]
    InvalidUuid,

    /// A `d` value was not an RFC 3339 timestamp or plain date.
    #[error("invalid date")]
    InvalidDate,

    /// A `b64`/`b16` payload did not decode.
    #[error("invalid binary payload")]
    InvalidBinary,

    /// A string or map key decoded to bytes that are not UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    /// Containers nested deeper than the configured limit.
    #[error("nesting deeper than {0} levels")]
    DepthLimitExceeded(usize),

    /// The input is LLSD, but in the binary or XML serialization.
    #[error("{0} LLSD is not supported, expected notation")]
    UnsupportedFormat(&'static str),

    /// Input continued after a complete top-level value.
    #[error("trailing data after value")]
    TrailingData,
}

pub type Result<T> = std::result::Result<T, DecodeError>;
