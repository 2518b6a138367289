use crate::err::{EvtxError, Result};
use crate::evtx_chunk::{EVTX_CHUNK_SIZE, EvtxChunk, is_unused_chunk};
use crate::evtx_file_header::{EVTX_FILE_HEADER_SIZE, EvtxFileHeader};
use crate::evtx_record::SerializedEvtxRecord;
use crate::utils::ByteCursor;

use encoding::EncodingRef;
use encoding::all::WINDOWS_1252;
use log::{debug, info, warn};
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

#[cfg(feature = "multithreading")]
use rayon::prelude::*;

/// Configuration for `EvtxParser`, built with chained setters.
#[derive(Clone)]
pub struct ParserSettings {
    /// Number of chunks decoded in parallel, `0` means one per available core.
    num_threads: usize,
    /// Skip chunks whose header or data CRC32 does not match.
    validate_checksums: bool,
    /// Put child elements on their own, indented, lines.
    indent: bool,
    /// Code page used for `AnsiString` values.
    ansi_codec: EncodingRef,
}

impl Debug for ParserSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserSettings")
            .field("num_threads", &self.num_threads)
            .field("validate_checksums", &self.validate_checksums)
            .field("indent", &self.indent)
            .field("ansi_codec", &self.ansi_codec.name())
            .finish()
    }
}

impl PartialEq for ParserSettings {
    fn eq(&self, other: &Self) -> bool {
        self.num_threads == other.num_threads
            && self.validate_checksums == other.validate_checksums
            && self.indent == other.indent
            && self.ansi_codec.name() == other.ansi_codec.name()
    }
}

impl Default for ParserSettings {
    fn default() -> Self {
        ParserSettings {
            num_threads: 0,
            validate_checksums: false,
            indent: false,
            ansi_codec: WINDOWS_1252,
        }
    }
}

impl ParserSettings {
    pub fn new() -> Self {
        ParserSettings::default()
    }

    /// Sets the number of worker threads, `0` for one per core.
    /// Without the `multithreading` feature this is ignored and parsing is sequential.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = if cfg!(feature = "multithreading") {
            num_threads
        } else {
            if num_threads > 1 {
                warn!(
                    "Setting num_threads has no effect when compiling without multithreading support."
                );
            }
            1
        };
        self
    }

    pub fn validate_checksums(mut self, validate_checksums: bool) -> Self {
        self.validate_checksums = validate_checksums;
        self
    }

    pub fn indent(mut self, pretty: bool) -> Self {
        self.indent = pretty;
        self
    }

    pub fn ansi_codec(mut self, ansi_codec: EncodingRef) -> Self {
        self.ansi_codec = ansi_codec;
        self
    }

    pub fn get_num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn should_validate_checksums(&self) -> bool {
        self.validate_checksums
    }

    pub fn should_indent(&self) -> bool {
        self.indent
    }

    pub fn get_ansi_codec(&self) -> EncodingRef {
        self.ansi_codec
    }

    /// Chunks per batch: the thread count, resolving `0` to the size of the thread pool.
    fn chunks_per_batch(&self) -> usize {
        match self.num_threads {
            #[cfg(feature = "multithreading")]
            0 => rayon::current_num_threads(),
            #[cfg(not(feature = "multithreading"))]
            0 => 1,
            n => n,
        }
    }
}

/// Parser over an in-memory EVTX file.
pub struct EvtxParser {
    data: Vec<u8>,
    header: EvtxFileHeader,
    config: Arc<ParserSettings>,
}

impl Debug for EvtxParser {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvtxParser")
            .field("len", &self.data.len())
            .field("header", &self.header)
            .field("config", &self.config)
            .finish()
    }
}

impl EvtxParser {
    /// Attempts to load an evtx file from a given buffer.
    /// Fails only if the file header cannot be read.
    pub fn from_buffer(buffer: Vec<u8>) -> Result<Self> {
        let mut cursor = ByteCursor::new(&buffer);
        let header =
            EvtxFileHeader::from_cursor(&mut cursor).map_err(EvtxError::FailedToParseFileHeader)?;
        debug!("EVTX Header: {header:#?}");

        Ok(EvtxParser {
            data: buffer,
            header,
            config: Arc::new(ParserSettings::default()),
        })
    }

    pub fn with_configuration(mut self, configuration: ParserSettings) -> Self {
        self.config = Arc::new(configuration);
        self
    }

    pub fn header(&self) -> &EvtxFileHeader {
        &self.header
    }

    pub fn settings(&self) -> &ParserSettings {
        &self.config
    }

    /// Iterates the chunks announced by the file header, in file order.
    pub fn chunks(&self) -> IterChunks<'_> {
        IterChunks {
            data: &self.data,
            settings: Arc::clone(&self.config),
            chunk_number: 0,
            chunk_count: usize::from(self.header.chunk_count),
            exhausted: false,
        }
    }

    /// Iterates all records of the file, rendered as XML, in file order.
    ///
    /// With the `multithreading` feature, batches of chunks are decoded in parallel.
    pub fn records(&self) -> impl Iterator<Item = Result<SerializedEvtxRecord<String>>> + '_ {
        let settings = Arc::clone(&self.config);
        let batch_size = settings.chunks_per_batch().max(1);
        let mut chunks = self.chunks();
        let mut pending = Vec::new().into_iter();

        std::iter::from_fn(move || {
            loop {
                if let Some(record) = pending.next() {
                    return Some(record);
                }

                let batch: Vec<Result<EvtxChunk<'_>>> = chunks.by_ref().take(batch_size).collect();
                if batch.is_empty() {
                    return None;
                }

                pending = decode_batch(batch, &settings).into_iter();
            }
        })
    }
}

fn decode_chunk(
    chunk: Result<EvtxChunk<'_>>,
    settings: &ParserSettings,
) -> Vec<Result<SerializedEvtxRecord<String>>> {
    match chunk {
        Ok(mut chunk) => chunk
            .iter_records()
            .map(|record| record.map(|r| r.into_xml(settings)))
            .collect(),
        Err(e) => vec![Err(e)],
    }
}

#[cfg(feature = "multithreading")]
fn decode_batch(
    batch: Vec<Result<EvtxChunk<'_>>>,
    settings: &ParserSettings,
) -> Vec<Result<SerializedEvtxRecord<String>>> {
    if batch.len() == 1 {
        return batch
            .into_iter()
            .flat_map(|chunk| decode_chunk(chunk, settings))
            .collect();
    }

    batch
        .into_par_iter()
        .map(|chunk| decode_chunk(chunk, settings))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

#[cfg(not(feature = "multithreading"))]
fn decode_batch(
    batch: Vec<Result<EvtxChunk<'_>>>,
    settings: &ParserSettings,
) -> Vec<Result<SerializedEvtxRecord<String>>> {
    batch
        .into_iter()
        .flat_map(|chunk| decode_chunk(chunk, settings))
        .collect()
}

/// Yields the chunks of a file. Unused chunk slots are skipped, a chunk cut short by the end
/// of the data is reported once and ends the iteration.
pub struct IterChunks<'a> {
    data: &'a [u8],
    settings: Arc<ParserSettings>,
    chunk_number: usize,
    chunk_count: usize,
    exhausted: bool,
}

impl<'a> Iterator for IterChunks<'a> {
    type Item = Result<EvtxChunk<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.exhausted || self.chunk_number >= self.chunk_count {
                return None;
            }

            let index = self.chunk_number;
            self.chunk_number += 1;

            let start = EVTX_FILE_HEADER_SIZE + index * EVTX_CHUNK_SIZE;
            let mut cursor = ByteCursor::new(self.data);
            cursor.seek(start);
            cursor.limit_to(start + EVTX_CHUNK_SIZE);
            let chunk_cursor = cursor.sub_cursor();
            let chunk_data = chunk_cursor.buf();

            if chunk_data.is_empty() {
                debug!("Chunk {index} starts past the end of the data, stopping");
                self.exhausted = true;
                return None;
            }

            if chunk_data.len() < EVTX_CHUNK_SIZE {
                self.exhausted = true;
            } else if is_unused_chunk(chunk_data) {
                debug!("Chunk {index} was never written, skipping");
                continue;
            }

            info!("Allocating chunk {index} at offset {start}");

            let chunk = EvtxChunk::new(index, chunk_cursor, Arc::clone(&self.settings))
                .and_then(|chunk| {
                    if self.settings.should_validate_checksums() {
                        chunk.validate_checksum()?;
                    }
                    Ok(chunk)
                })
                .map_err(|source| EvtxError::FailedToParseChunk {
                    chunk_index: index,
                    source,
                });

            return Some(chunk);
        }
    }
}
