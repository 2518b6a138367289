use crate::ParserSettings;
use crate::binxml::deserializer::BinXmlDeserializer;
use crate::chunk_cache::ChunkCache;
use crate::err::{ChunkError, DeserializationError, DeserializationResult, EvtxError};
use crate::evtx_record::{EVTX_RECORD_HEADER_SIZE, EvtxRecord, EvtxRecordHeader};
use crate::utils::ByteCursor;
use crate::utils::windows::filetime_to_timestamp;

use bitflags::bitflags;
use log::{Level, debug, info, log_enabled, trace};
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

pub const EVTX_CHUNK_SIZE: usize = 65536;
pub const EVTX_CHUNK_HEADER_SIZE: usize = 512;

const EVTX_CHUNK_MAGIC: &[u8; 8] = b"ElfChnk\x00";

// Smallest record: the fixed header plus the trailing copy of the size.
const EVTX_MIN_RECORD_SIZE: u32 = EVTX_RECORD_HEADER_SIZE as u32 + 4;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChunkFlags: u32 {
        const EMPTY = 0x0;
        const DIRTY = 0x1;
        const NO_CRC32 = 0x4;
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct EvtxChunkHeader {
    pub first_event_record_number: u64,
    pub last_event_record_number: u64,
    pub first_event_record_id: u64,
    pub last_event_record_id: u64,
    pub header_size: u32,
    pub last_event_record_data_offset: u32,
    pub free_space_offset: u32,
    pub events_checksum: u32,
    pub flags: ChunkFlags,
    pub header_chunk_checksum: u32,
    // The tables are only kept for inspection, decoding memoizes by offset instead.
    pub strings_offsets: [u32; 64],
    pub template_offsets: [u32; 32],
}

impl Debug for EvtxChunkHeader {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("EvtxChunkHeader")
            .field("first_event_record_number", &self.first_event_record_number)
            .field("last_event_record_number", &self.last_event_record_number)
            .field("first_event_record_id", &self.first_event_record_id)
            .field("last_event_record_id", &self.last_event_record_id)
            .field("free_space_offset", &self.free_space_offset)
            .field("flags", &self.flags)
            .field("checksum", &self.header_chunk_checksum)
            .finish()
    }
}

impl EvtxChunkHeader {
    pub fn from_cursor(cursor: &mut ByteCursor<'_>) -> DeserializationResult<EvtxChunkHeader> {
        let magic = cursor.array::<8>("chunk header magic")?;

        if &magic != EVTX_CHUNK_MAGIC {
            return Err(DeserializationError::InvalidEvtxChunkMagic { magic });
        }

        let first_event_record_number = cursor.u64_named("first record number")?;
        let last_event_record_number = cursor.u64_named("last record number")?;
        let first_event_record_id = cursor.u64_named("first record id")?;
        let last_event_record_id = cursor.u64_named("last record id")?;

        let header_size = cursor.u32_named("chunk header size")?;
        let last_event_record_data_offset = cursor.u32_named("last record offset")?;
        let free_space_offset = cursor.u32_named("free space offset")?;
        let events_checksum = cursor.u32_named("records checksum")?;

        // Reserved
        cursor.take_bytes(64, "chunk header reserved")?;

        let flags = ChunkFlags::from_bits_retain(cursor.u32_named("chunk flags")?);
        let header_chunk_checksum = cursor.u32_named("chunk header checksum")?;

        let mut strings_offsets = [0_u32; 64];
        for offset in strings_offsets.iter_mut() {
            *offset = cursor.u32_named("string table entry")?;
        }

        let mut template_offsets = [0_u32; 32];
        for offset in template_offsets.iter_mut() {
            *offset = cursor.u32_named("template table entry")?;
        }

        Ok(EvtxChunkHeader {
            first_event_record_number,
            last_event_record_number,
            first_event_record_id,
            last_event_record_id,
            header_size,
            last_event_record_data_offset,
            free_space_offset,
            events_checksum,
            flags,
            header_chunk_checksum,
            strings_offsets,
            template_offsets,
        })
    }

    /// Number of records the chunk declares, `last - first`.
    pub fn record_count(&self) -> u64 {
        self.last_event_record_number
            .saturating_sub(self.first_event_record_number)
    }
}

/// True for a chunk slot that was allocated but never written.
pub fn is_unused_chunk(data: &[u8]) -> bool {
    data.len() >= 8 && data[..8].iter().all(|&b| b == 0)
}

/// A single 64KB chunk, with the caches that are valid for its records.
pub struct EvtxChunk<'a> {
    pub index: usize,
    pub header: EvtxChunkHeader,
    pub data: &'a [u8],
    cursor: ByteCursor<'a>,
    cache: ChunkCache,
    pub settings: Arc<ParserSettings>,
}

impl Debug for EvtxChunk<'_> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("EvtxChunk")
            .field("index", &self.index)
            .field("offset", &self.offset())
            .field("header", &self.header)
            .finish()
    }
}

impl<'a> EvtxChunk<'a> {
    /// Reads the chunk header from a cursor addressed from the chunk start.
    ///
    /// Will fail if the data is shorter than a chunk, or starts with an invalid chunk header.
    pub fn new(
        index: usize,
        cursor: ByteCursor<'a>,
        settings: Arc<ParserSettings>,
    ) -> Result<EvtxChunk<'a>, ChunkError> {
        let data = cursor.buf();
        if data.len() < EVTX_CHUNK_SIZE {
            return Err(ChunkError::IncompleteChunk {
                need: EVTX_CHUNK_SIZE,
                have: data.len(),
            });
        }

        let header = EvtxChunkHeader::from_cursor(&mut cursor.clone())
            .map_err(ChunkError::FailedToParseChunkHeader)?;

        debug!("Chunk {index} header: {header:?}");

        Ok(EvtxChunk {
            index,
            header,
            data,
            cursor,
            cache: ChunkCache::new(),
            settings,
        })
    }

    /// Absolute offset of the chunk in the file.
    pub fn offset(&self) -> u64 {
        self.cursor.base_offset()
    }

    /// Strings and templates decoded so far.
    pub fn cache(&self) -> &ChunkCache {
        &self.cache
    }

    pub fn validate_data_checksum(&self) -> Result<(), ChunkError> {
        let expected = self.header.events_checksum;
        let end = (self.header.free_space_offset as usize)
            .clamp(EVTX_CHUNK_HEADER_SIZE, EVTX_CHUNK_SIZE);
        let found = crc32fast::hash(&self.data[EVTX_CHUNK_HEADER_SIZE..end]);

        debug!(
            "Chunk {}: records checksum expected {expected:#010x}, found {found:#010x}",
            self.index
        );

        if found != expected {
            return Err(ChunkError::InvalidChunkChecksum {
                region: "data",
                expected,
                found,
            });
        }
        Ok(())
    }

    pub fn validate_header_checksum(&self) -> Result<(), ChunkError> {
        let expected = self.header.header_chunk_checksum;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data[..120]);
        hasher.update(&self.data[128..EVTX_CHUNK_HEADER_SIZE]);
        let found = hasher.finalize();

        debug!(
            "Chunk {}: header checksum expected {expected:#010x}, found {found:#010x}",
            self.index
        );

        if found != expected {
            return Err(ChunkError::InvalidChunkChecksum {
                region: "header",
                expected,
                found,
            });
        }
        Ok(())
    }

    pub fn validate_checksum(&self) -> Result<(), ChunkError> {
        self.validate_header_checksum()?;
        self.validate_data_checksum()
    }

    /// Iterates the decoded records of the chunk.
    pub fn iter_records(&mut self) -> IterChunkRecords<'_, 'a> {
        let mut cursor = self.cursor.clone();
        cursor.seek(EVTX_CHUNK_HEADER_SIZE);

        IterChunkRecords {
            remaining: self.header.record_count(),
            chunk: self,
            cursor,
            record_index: 0,
            exhausted: false,
        }
    }
}

pub struct IterChunkRecords<'c, 'a> {
    chunk: &'c mut EvtxChunk<'a>,
    cursor: ByteCursor<'a>,
    record_index: u64,
    remaining: u64,
    exhausted: bool,
}

impl IterChunkRecords<'_, '_> {
    pub fn exhausted(&self) -> bool {
        self.exhausted
    }

    /// Offset of the next record, relative to the chunk start.
    pub fn offset_from_chunk_start(&self) -> usize {
        self.cursor.pos()
    }

    fn record_error(
        &self,
        record_id: Option<u64>,
        offset: usize,
        source: DeserializationError,
    ) -> EvtxError {
        EvtxError::FailedToParseRecord {
            chunk_index: self.chunk.index,
            record_index: self.record_index,
            record_id,
            offset: self.chunk.offset() + offset as u64,
            source,
        }
    }
}

impl Iterator for IterChunkRecords<'_, '_> {
    type Item = Result<EvtxRecord, EvtxError>;

    fn next(&mut self) -> Option<<Self as Iterator>::Item> {
        if self.exhausted || self.remaining == 0 {
            return None;
        }

        let record_start = self.cursor.pos();
        let free_space_offset = self.chunk.header.free_space_offset as usize;
        if (EVTX_CHUNK_HEADER_SIZE..=EVTX_CHUNK_SIZE).contains(&free_space_offset)
            && record_start >= free_space_offset
        {
            debug!(
                "Chunk {}: reached free space at {record_start} with {} records left",
                self.chunk.index, self.remaining
            );
            self.exhausted = true;
            return None;
        }

        let result = self.read_record(record_start);

        self.remaining -= 1;
        self.record_index += 1;
        Some(result)
    }
}

impl IterChunkRecords<'_, '_> {
    fn read_record(&mut self, record_start: usize) -> Result<EvtxRecord, EvtxError> {
        let header = match EvtxRecordHeader::from_cursor(&mut self.cursor) {
            Ok(header) => header,
            Err(e) => {
                // Without a header there is no way to find the next record.
                self.exhausted = true;
                return Err(self.record_error(None, record_start, e));
            }
        };

        let record_id = header.event_record_id;
        let record_end = record_start.saturating_add(header.data_size as usize);

        if header.data_size < EVTX_MIN_RECORD_SIZE || record_end > self.chunk.data.len() {
            self.exhausted = true;
            let offset = self.chunk.offset() + record_start as u64;
            return Err(self.record_error(
                Some(record_id),
                record_start,
                DeserializationError::InvalidRecordLength {
                    length: header.data_size,
                    offset,
                },
            ));
        }

        info!("Record id - {record_id}");
        trace!("Record header - {header:?}");

        let previous_limit = self.cursor.limit_to(record_end);
        let decoded = match filetime_to_timestamp(header.filetime, self.cursor.position()) {
            Ok(timestamp) => {
                let ansi_codec = self.chunk.settings.get_ansi_codec();
                BinXmlDeserializer::new(&mut self.chunk.cache, ansi_codec)
                    .read_stream(&mut self.cursor)
                    .map(|stream| (timestamp, stream))
            }
            Err(e) => Err(e),
        };

        if decoded.is_err() && log_enabled!(Level::Debug) {
            debug!("Record {record_id} failed, {}", self.cursor.dump(64));
        }

        // Resync at the declared end of the record, whatever happened inside it.
        self.cursor.clear_error();
        self.cursor.set_limit(previous_limit);
        self.cursor.seek(record_end);

        let (timestamp, stream) =
            decoded.map_err(|e| self.record_error(Some(record_id), record_start, e))?;

        Ok(EvtxRecord {
            chunk_index: self.chunk.index,
            record_index: self.record_index,
            header,
            timestamp,
            stream,
        })
    }
}
