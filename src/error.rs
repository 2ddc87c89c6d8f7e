use std::io;
use thiserror::Error;

/// Everything that can abort a decode.
///
/// Offsets are absolute byte positions in the source.
#[derive(Debug, Error)]
pub enum SlurpError {
    /// A read needed bytes past the end of the source.
    ///
    /// The scanner never surfaces this: it either ends the scan cleanly (at a record boundary) or
    /// turns it into [SlurpError::TruncatedInput].
    #[error("unexpected end of stream: {needed} bytes needed at offset {offset}")]
    UnexpectedEndOfStream { offset: u64, needed: u64 },
    #[error("input truncated: {needed} bytes needed at offset {offset}")]
    TruncatedInput { offset: u64, needed: u64 },
    #[error("record at offset {offset} declares {declared} bytes but {consumed} were consumed")]
    LengthMismatch {
        offset: u64,
        declared: u32,
        consumed: u64,
    },
    #[error("unsupported {kind} {value:#X} at offset {offset}")]
    UnsupportedTag {
        kind: TagKind,
        value: u32,
        offset: u64,
    },
    #[error("header label is not NUL-terminated within {max_len} bytes")]
    MalformedHeader { max_len: usize },
    #[error("could not read source at offset {offset}")]
    Io {
        offset: u64,
        #[source]
        source: io::Error,
    },
    #[error("decode cancelled at offset {offset}")]
    Cancelled { offset: u64 },
}

impl SlurpError {
    /// Anything short of a clean record boundary is a truncated file.
    pub(crate) fn into_truncated(self) -> SlurpError {
        match self {
            SlurpError::UnexpectedEndOfStream { offset, needed } => {
                SlurpError::TruncatedInput { offset, needed }
            }
            e => e,
        }
    }
}

/// What kind of tag or code was not understood
#[derive(Debug, Copy, Clone, PartialEq, Eq, strum_macros::Display)]
pub enum TagKind {
    #[strum(serialize = "heap dump sub-record tag")]
    SubRecord,
    #[strum(serialize = "value type")]
    ValueType,
    #[strum(serialize = "identifier size")]
    IdSize,
}

pub type DecodeResult<T> = Result<T, SlurpError>;
