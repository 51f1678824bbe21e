//! The diagnostics side channel.
//!
//! Decoding is best effort: a malformed record or chunk is skipped, and the reason is reported
//! here instead of terminating iteration. Each entry names where the problem was found, a
//! machine readable [`DiagnosticKind`] and a human readable message.

use crate::{ChunkOffset, FileOffset};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Wrong file magic or an unsupported version. Always fatal, see [`crate::err::EvtxError::kind`].
    FormatError,
    /// A file or chunk header checksum did not validate.
    ChecksumError,
    /// The chunk data checksum did not validate; the chunk was still decoded.
    SuspectChunk,
    /// The chunk could not be read and was skipped.
    MalformedChunk,
    UnresolvedTemplate,
    SubstitutionCountMismatch,
    /// A value used an unknown type tag.
    UnknownTypeTag,
    /// Any other record level failure.
    MalformedRecord,
}

impl DiagnosticKind {
    /// Whether the affected item was excluded from the output.
    ///
    /// `SuspectChunk` and `UnknownTypeTag` are warnings: decoding continued with what was there.
    pub fn is_skip(&self) -> bool {
        !matches!(
            self,
            DiagnosticKind::SuspectChunk | DiagnosticKind::UnknownTypeTag
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticLocation {
    File {
        offset: FileOffset,
    },
    Chunk {
        chunk_number: u64,
        offset: ChunkOffset,
    },
    Record {
        record_id: u64,
        chunk_number: u64,
        offset: FileOffset,
    },
}

impl fmt::Display for DiagnosticLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticLocation::File { offset } => write!(f, "file offset {}", offset),
            DiagnosticLocation::Chunk {
                chunk_number,
                offset,
            } => write!(f, "chunk {} offset {}", chunk_number, offset),
            DiagnosticLocation::Record {
                record_id,
                chunk_number,
                offset,
            } => write!(
                f,
                "record {} (chunk {}, file offset {})",
                record_id, chunk_number, offset
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub location: DiagnosticLocation,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(location: DiagnosticLocation, kind: DiagnosticKind, message: impl ToString) -> Self {
        Diagnostic {
            location,
            kind,
            message: message.to_string(),
        }
    }

    /// The record id, when the diagnostic is attached to a record.
    pub fn record_id(&self) -> Option<u64> {
        match self.location {
            DiagnosticLocation::Record { record_id, .. } => Some(record_id),
            _ => None,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:?}: {}", self.location, self.kind, self.message)
    }
}
