use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EepError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Not a RIFF/RF64 file (magic {0:?})")]
    BadMagic(String),

    #[error("Truncated file: {0}")]
    TruncatedFile(String),

    #[error("Branch not found: {0}")]
    NotFound(String),

    /// 分支查找命中多个节点，仅作为警告返回
    #[error("Several hits ({hits}) for branch '{label}', using the first one")]
    Ambiguous { label: String, hits: usize },

    #[error("Unknown class tag: {0}")]
    BadClass(i32),

    #[error("Bad event file: {0}")]
    BadFile(String),

    #[error("Unknown event class: {0}")]
    UnknownEventClass(String),

    #[error("Event class not implemented: {0}")]
    NotImplementedEventClass(String),

    #[error("String too long ({0} bytes)")]
    StringTooLong(usize),

    /// Compressed or encrypted event streams, and typed values with an
    /// unknown data type tag or array element type
    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("No channel definition in header")]
    MissingChannelTable,

    #[error("Header field required but missing: {0}")]
    MissingHeaderField(&'static str),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Segment file not found: {0}")]
    SegmentFileMissing(String),

    #[error("Event at {timestamp} precedes every segment (first segment starts at {first_start})")]
    UnresolvedEventSegment { timestamp: f64, first_start: f64 },

    #[error("Sample codec error: {0}")]
    Codec(String),

    #[error("Channel index {0} out of range")]
    InvalidChannelIndex(usize),
}

pub type Result<T> = std::result::Result<T, EepError>;
