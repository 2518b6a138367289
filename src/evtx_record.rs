use crate::ParserSettings;
use crate::err::{DeserializationError, DeserializationResult};
use crate::model::deserialized::Stream;
use crate::utils::ByteCursor;
use crate::xml_output::render_stream;

use jiff::Timestamp;

/// Fixed size of the record header, in front of the binxml.
pub const EVTX_RECORD_HEADER_SIZE: usize = 24;

const EVTX_RECORD_MAGIC: &[u8; 4] = b"\x2a\x2a\x00\x00";

/// A decoded record: the header plus the binxml stream it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct EvtxRecord {
    pub chunk_index: usize,
    pub record_index: u64,
    pub header: EvtxRecordHeader,
    pub timestamp: Timestamp,
    pub stream: Stream,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvtxRecordHeader {
    pub data_size: u32,
    pub event_record_id: u64,
    /// Raw FILETIME, see `EvtxRecord::timestamp` for the converted value.
    pub filetime: u64,
}

/// A rendered record.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedEvtxRecord<T> {
    pub event_record_id: u64,
    pub timestamp: Timestamp,
    pub data: T,
}

impl EvtxRecordHeader {
    pub fn from_cursor(cursor: &mut ByteCursor<'_>) -> DeserializationResult<EvtxRecordHeader> {
        let magic = cursor.array::<4>("record header magic")?;

        if &magic != EVTX_RECORD_MAGIC {
            return Err(DeserializationError::InvalidEvtxRecordHeaderMagic { magic });
        }

        let data_size = cursor.u32_named("record size")?;
        let event_record_id = cursor.u64_named("record id")?;
        let low = u64::from(cursor.u32_named("record filetime low")?);
        let high = u64::from(cursor.u32_named("record filetime high")?);

        Ok(EvtxRecordHeader {
            data_size,
            event_record_id,
            filetime: (high << 32) | low,
        })
    }

    pub fn record_data_size(&self) -> u32 {
        // 24 - record header size
        // 4 - copy of size record size
        self.data_size.saturating_sub(EVTX_RECORD_HEADER_SIZE as u32 + 4)
    }
}

impl EvtxRecord {
    pub fn event_record_id(&self) -> u64 {
        self.header.event_record_id
    }

    /// Renders the record's XML.
    pub fn render(&self, settings: &ParserSettings) -> String {
        render_stream(&self.stream, settings.should_indent())
    }

    /// Consumes the record, rendering it as XML.
    pub fn into_xml(self, settings: &ParserSettings) -> SerializedEvtxRecord<String> {
        let data = self.render(settings);

        SerializedEvtxRecord {
            event_record_id: self.header.event_record_id,
            timestamp: self.timestamp,
            data,
        }
    }
}
