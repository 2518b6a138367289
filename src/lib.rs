#![deny(unused_must_use)]
#![forbid(unsafe_code)]
// Don't allow dbg! prints in release.
#![cfg_attr(not(debug_assertions), deny(clippy::dbg_macro))]

pub use evtx_chunk::{EvtxChunk, EvtxChunkHeader, IterChunkRecords};
pub use evtx_file_header::{EvtxFileHeader, HeaderFlags};
pub use evtx_parser::{EvtxParser, IterChunks, ParserSettings};
pub use evtx_record::{EvtxRecord, EvtxRecordHeader, SerializedEvtxRecord};
pub use xml_output::render_stream;

pub use chunk_cache::ChunkCache;
pub use err::{
    ChunkError, DeserializationError, DeserializationResult, ErrorKind, EvtxError, ReferenceKind,
    Result,
};
pub use utils::{ByteCursor, Endianness};

pub mod binxml;
pub mod err;
pub mod model;
pub mod utils;

mod chunk_cache;
mod evtx_chunk;
mod evtx_file_header;
mod evtx_parser;
mod evtx_record;
mod ntsid;
mod string_cache;
mod template_cache;
mod xml_output;

pub use ntsid::Sid;
pub use string_cache::StringCache;
pub use template_cache::TemplateCache;

pub use evtx_chunk::{EVTX_CHUNK_HEADER_SIZE, EVTX_CHUNK_SIZE, ChunkFlags};
pub use evtx_file_header::EVTX_FILE_HEADER_SIZE;

/// Offset of a structure within its chunk.
pub type ChunkOffset = u32;

// For tests, we only initialize logging once.
#[cfg(test)]
use std::sync::Once;

#[cfg(test)]
static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
#[cfg(test)]
pub fn ensure_env_logger_initialized() {
    use std::io::Write;

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .init();
    });
}
