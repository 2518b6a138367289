use crate::err::{DeserializationError, DeserializationResult};
use crate::utils::ByteCursor;

use bitflags::bitflags;

/// Size of the file header block; the first chunk starts right after it.
pub const EVTX_FILE_HEADER_SIZE: usize = 4096;

const EVTX_FILE_HEADER_MAGIC: &[u8; 8] = b"ElfFile\x00";

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct EvtxFileHeader {
    pub first_chunk_number: u64,
    pub last_chunk_number: u64,
    pub next_record_id: u64,
    pub header_size: u32,
    pub minor_version: u16,
    pub major_version: u16,
    pub header_block_size: u16,
    pub chunk_count: u16,
    pub flags: HeaderFlags,
    // Checksum is of first 120 bytes of header
    pub checksum: u32,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u32 {
        const EMPTY = 0x0;
        const DIRTY = 0x1;
        const FULL = 0x2;
        const NO_CRC32 = 0x4;
    }
}

impl EvtxFileHeader {
    /// Reads the header from the start of the file and leaves the cursor at the first chunk.
    pub fn from_cursor(cursor: &mut ByteCursor<'_>) -> DeserializationResult<EvtxFileHeader> {
        let start = cursor.pos();
        let magic = cursor.array::<8>("file header magic")?;

        if &magic != EVTX_FILE_HEADER_MAGIC {
            return Err(DeserializationError::InvalidEvtxFileHeaderMagic { magic });
        }

        let first_chunk_number = cursor.u64_named("first chunk number")?;
        let last_chunk_number = cursor.u64_named("last chunk number")?;
        let next_record_id = cursor.u64_named("next record id")?;
        let header_size = cursor.u32_named("header size")?;
        let minor_version = cursor.u16_named("minor version")?;
        let major_version = cursor.u16_named("major version")?;
        let header_block_size = cursor.u16_named("header block size")?;
        let chunk_count = cursor.u16_named("chunk count")?;

        // unused
        cursor.take_bytes(76, "file header reserved")?;

        let flags = HeaderFlags::from_bits_retain(cursor.u32_named("file flags")?);
        let checksum = cursor.u32_named("file header checksum")?;

        cursor.seek(start + EVTX_FILE_HEADER_SIZE);

        Ok(EvtxFileHeader {
            first_chunk_number,
            last_chunk_number,
            next_record_id,
            header_size,
            minor_version,
            major_version,
            header_block_size,
            chunk_count,
            flags,
            checksum,
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.contains(HeaderFlags::DIRTY)
    }

    pub fn is_full(&self) -> bool {
        self.flags.contains(HeaderFlags::FULL)
    }
}
