use crate::ChunkOffset;
use crate::diagnostics::DiagnosticKind;

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EvtxError>;
pub type ChunkResult<T> = std::result::Result<T, ChunkError>;
pub type DeserializationResult<T> = std::result::Result<T, DeserializationError>;

/// Errors that affect a single record. These never abort the surrounding chunk.
#[derive(Debug, Error)]
pub enum DeserializationError {
    #[error("buffer too small for {what} at offset {offset} (need {need} bytes, have {have})")]
    Truncated {
        what: &'static str,
        offset: u64,
        need: usize,
        have: usize,
    },

    #[error("offset {offset}: tried to read an invalid byte `{value:#04x}` as binxml token")]
    InvalidToken { value: u8, offset: u64 },

    #[error("offset {offset}: unknown value type tag `{type_tag:#04x}`")]
    UnknownTypeTag { type_tag: u8, offset: u64 },

    #[error("offset {offset}: value type `{name}` (size {size:?}) cannot be decoded")]
    UnsupportedValueVariant {
        name: String,
        size: Option<u16>,
        offset: u64,
    },

    #[error("template {id:#010x} at chunk offset {offset} is not defined in this chunk")]
    UnresolvedTemplate { offset: ChunkOffset, id: u32 },

    #[error(
        "inline template at offset {offset} has id {found:#010x}, but the instance refers to {expected:#010x}"
    )]
    TemplateIdMismatch {
        offset: ChunkOffset,
        expected: u32,
        found: u32,
    },

    #[error(
        "template at chunk offset {offset} declares {expected} substitution slots, but the instance supplied {found} values"
    )]
    SubstitutionCountMismatch {
        offset: ChunkOffset,
        expected: usize,
        found: usize,
    },

    #[error("substitution index {index} is out of range ({available} values available)")]
    SubstitutionIndexOutOfRange { index: u16, available: usize },

    #[error("name at chunk offset {offset} could not be resolved")]
    UnresolvedName { offset: ChunkOffset },

    #[error("invalid EVTX record header magic, expected `2a2a0000`, found `{magic:02X?}`")]
    InvalidRecordMagic { magic: [u8; 4] },

    #[error("record size {size} is invalid (trailing size copy is {trailer:?})")]
    InvalidRecordSize { size: u32, trailer: Option<u32> },

    #[error("invalid date/time value")]
    InvalidDateTime,

    #[error(
        "failed to decode ansi string (used encoding scheme {encoding_used}), caused by: {inner_message}"
    )]
    AnsiDecodeError {
        encoding_used: &'static str,
        inner_message: String,
    },

    #[error("offset {offset}: unexpected {token} token ({reason})")]
    UnexpectedToken {
        token: &'static str,
        offset: u64,
        reason: &'static str,
    },

    #[error("failed to build the record element tree: {reason}")]
    UnbalancedElements { reason: &'static str },
}

impl DeserializationError {
    /// Classification used by the diagnostics side channel.
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            DeserializationError::UnresolvedTemplate { .. }
            | DeserializationError::TemplateIdMismatch { .. } => DiagnosticKind::UnresolvedTemplate,
            DeserializationError::SubstitutionCountMismatch { .. } => {
                DiagnosticKind::SubstitutionCountMismatch
            }
            DeserializationError::UnknownTypeTag { .. } => DiagnosticKind::UnknownTypeTag,
            _ => DiagnosticKind::MalformedRecord,
        }
    }
}

/// Errors that affect a whole chunk. These never abort the surrounding file.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("reached EOF while reading chunk {chunk_number} (read {have} bytes)")]
    IncompleteChunk { chunk_number: u64, have: usize },

    #[error("invalid EVTX chunk header magic, expected `ElfChnk0`, found `{magic:02X?}`")]
    InvalidChunkMagic { magic: [u8; 8] },

    #[error("chunk header checksum mismatch (stored {expected:#010x}, computed {found:#010x})")]
    HeaderChecksum { expected: u32, found: u32 },

    #[error("chunk data checksum mismatch (stored {expected:#010x}, computed {found:#010x})")]
    DataChecksum { expected: u32, found: u32 },

    #[error("free space offset {offset} is outside of the chunk")]
    InvalidFreeSpaceOffset { offset: u32 },

    #[error("chunk offset {offset}: invalid record header: {source}")]
    InvalidRecordHeader {
        offset: ChunkOffset,
        #[source]
        source: DeserializationError,
    },

    #[error("failed to read chunk header: {0}")]
    Header(#[from] DeserializationError),
}

impl ChunkError {
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            ChunkError::HeaderChecksum { .. } => DiagnosticKind::ChecksumError,
            ChunkError::DataChecksum { .. } => DiagnosticKind::SuspectChunk,
            _ => DiagnosticKind::MalformedChunk,
        }
    }
}

/// File level errors. Anything surfaced as an `EvtxError` ends the current operation.
#[derive(Debug, Error)]
pub enum EvtxError {
    #[error("an I/O error has occurred: {0}")]
    Io(#[from] io::Error),

    #[error("failed to open file {}: {source}", .path.display())]
    FailedToOpenFile { source: io::Error, path: PathBuf },

    #[error("invalid EVTX file header magic, expected `ElfFile0`, found `{magic:02X?}`")]
    InvalidFileMagic { magic: [u8; 8] },

    #[error("unsupported EVTX format version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("file header checksum mismatch (stored {expected:#010x}, computed {found:#010x})")]
    FileHeaderChecksum { expected: u32, found: u32 },

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Deserialization(#[from] DeserializationError),

    #[error("writing output failed: {message}")]
    Serialization { message: String },

    #[error("`serde_json` failed with error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EvtxError {
    /// Classifies errors that come from the contents of the file. I/O and output errors have no
    /// kind.
    pub fn kind(&self) -> Option<DiagnosticKind> {
        match self {
            EvtxError::InvalidFileMagic { .. } | EvtxError::UnsupportedVersion { .. } => {
                Some(DiagnosticKind::FormatError)
            }
            EvtxError::FileHeaderChecksum { .. } => Some(DiagnosticKind::ChecksumError),
            EvtxError::Chunk(err) => Some(err.kind()),
            EvtxError::Deserialization(err) => Some(err.kind()),
            _ => None,
        }
    }

    pub(crate) fn serialization(err: impl std::fmt::Display) -> Self {
        EvtxError::Serialization {
            message: err.to_string(),
        }
    }
}
