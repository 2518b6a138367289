use crate::ChunkOffset;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EvtxError>;
pub type DeserializationResult<T> = std::result::Result<T, DeserializationError>;

/// Coarse classification of a failure, independent of where it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A read needed more bytes than were available.
    TooShort,
    /// A file, chunk or record signature did not match.
    BadMagic,
    /// A binxml token outside of the expected set.
    UnexpectedTag,
    /// A string or template pointer to an offset that was never decoded.
    DanglingReference,
    /// Structurally readable but semantically invalid data.
    InvalidData,
    /// Checksum mismatch.
    Checksum,
}

/// What a back-reference pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    String,
    Template,
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceKind::String => write!(f, "string"),
            ReferenceKind::Template => write!(f, "template"),
        }
    }
}

/// Errors produced while reading binary structures.
///
/// These are latched by `ByteCursor`, so they have to be cheap to clone.
/// All `offset` fields are absolute offsets into the buffer handed to the parser.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeserializationError {
    #[error(
        "Offset {offset}: unexpected end of data while reading {what} (need {need} bytes, have {have})"
    )]
    Truncated {
        what: &'static str,
        offset: u64,
        need: usize,
        have: usize,
    },

    #[error("Invalid EVTX file header magic, expected `ElfFile0`, found `{magic:2X?}`")]
    InvalidEvtxFileHeaderMagic { magic: [u8; 8] },

    #[error("Invalid EVTX chunk header magic, expected `ElfChnk0`, found `{magic:2X?}`")]
    InvalidEvtxChunkMagic { magic: [u8; 8] },

    #[error("Invalid EVTX record header magic, expected `2a2a0000`, found `{magic:2X?}`")]
    InvalidEvtxRecordHeaderMagic { magic: [u8; 4] },

    #[error("Offset {offset}: tried to read an invalid byte `0x{value:02x}` as binxml token while reading {context}")]
    UnexpectedToken {
        value: u8,
        offset: u64,
        context: &'static str,
    },

    #[error("Offset {offset}: {kind} pointer references chunk offset {target}, which was not decoded yet")]
    DanglingReference {
        kind: ReferenceKind,
        target: ChunkOffset,
        offset: u64,
    },

    #[error("Offset {offset}: record declares a length of {length} bytes, which does not fit in the chunk")]
    InvalidRecordLength { length: u32, offset: u64 },

    #[error("Offset {offset}: `{value:#x}` is not a representable timestamp")]
    InvalidDateTime { value: u64, offset: u64 },

    #[error("Offset {offset}: binxml nesting exceeds {limit} levels")]
    RecursionLimitExceeded { limit: usize, offset: u64 },
}

impl DeserializationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeserializationError::Truncated { .. } => ErrorKind::TooShort,
            DeserializationError::InvalidEvtxFileHeaderMagic { .. }
            | DeserializationError::InvalidEvtxChunkMagic { .. }
            | DeserializationError::InvalidEvtxRecordHeaderMagic { .. } => ErrorKind::BadMagic,
            DeserializationError::UnexpectedToken { .. } => ErrorKind::UnexpectedTag,
            DeserializationError::DanglingReference { .. } => ErrorKind::DanglingReference,
            DeserializationError::InvalidRecordLength { .. }
            | DeserializationError::InvalidDateTime { .. }
            | DeserializationError::RecursionLimitExceeded { .. } => ErrorKind::InvalidData,
        }
    }
}

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("Failed to parse chunk header")]
    FailedToParseChunkHeader(#[source] DeserializationError),

    #[error("Reached EOF while trying to allocate chunk, {have} of {need} bytes available")]
    IncompleteChunk { need: usize, have: usize },

    #[error("chunk {region} CRC32 invalid, expected {expected:#010x}, found {found:#010x}")]
    InvalidChunkChecksum {
        region: &'static str,
        expected: u32,
        found: u32,
    },
}

impl ChunkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChunkError::FailedToParseChunkHeader(e) => e.kind(),
            ChunkError::IncompleteChunk { .. } => ErrorKind::TooShort,
            ChunkError::InvalidChunkChecksum { .. } => ErrorKind::Checksum,
        }
    }
}

#[derive(Debug, Error)]
pub enum EvtxError {
    #[error("Failed to parse EVTX file header")]
    FailedToParseFileHeader(#[source] DeserializationError),

    #[error("Failed to parse chunk number {chunk_index}")]
    FailedToParseChunk {
        chunk_index: usize,
        #[source]
        source: ChunkError,
    },

    #[error(
        "Failed to parse record number {record_index}{} of chunk {chunk_index} (offset {offset})",
        .record_id.map(|id| format!(" (record id {id})")).unwrap_or_default()
    )]
    FailedToParseRecord {
        chunk_index: usize,
        record_index: u64,
        record_id: Option<u64>,
        offset: u64,
        #[source]
        source: DeserializationError,
    },
}

impl EvtxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvtxError::FailedToParseFileHeader(e) => e.kind(),
            EvtxError::FailedToParseChunk { source, .. } => source.kind(),
            EvtxError::FailedToParseRecord { source, .. } => source.kind(),
        }
    }

    /// The record id this error relates to, if the record header was readable.
    pub fn record_id(&self) -> Option<u64> {
        match self {
            EvtxError::FailedToParseRecord { record_id, .. } => *record_id,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_record_error_mentions_context() {
        let err = EvtxError::FailedToParseRecord {
            chunk_index: 2,
            record_index: 7,
            record_id: Some(130),
            offset: 135_680,
            source: DeserializationError::UnexpectedToken {
                value: 0x42,
                offset: 135_700,
                context: "element children",
            },
        };

        assert_eq!(
            err.to_string(),
            "Failed to parse record number 7 (record id 130) of chunk 2 (offset 135680)"
        );
        assert_eq!(err.kind(), ErrorKind::UnexpectedTag);
        assert_eq!(err.record_id(), Some(130));
    }

    #[test]
    fn test_magic_errors_are_bad_magic() {
        let err = DeserializationError::InvalidEvtxChunkMagic { magic: [0; 8] };
        assert_eq!(err.kind(), ErrorKind::BadMagic);
    }
}
