use crate::err::{EvtxError, Result};
use crate::evtx_chunk::{EvtxChunkData, EVTX_CHUNK_SIZE};
use crate::evtx_file_header::EvtxFileHeader;
use crate::evtx_record::SerializedEvtxRecord;

use encoding::all::WINDOWS_1252;
use encoding::EncodingRef;
use log::warn;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

pub const EVTX_FILE_HEADER_SIZE: usize = 4096;

/// Files larger than this are rejected unless the limit is raised (or disabled
/// with zero) via `ParserSettings::max_file_size`.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

pub trait ReadSeek: Read + Seek {
    fn tell(&mut self) -> io::Result<u64> {
        self.stream_position()
    }
}

impl<T: Read + Seek> ReadSeek for T {}

#[derive(Clone)]
pub struct ParserSettings {
    validate_checksums: bool,
    indent: bool,
    ansi_codec: EncodingRef,
    parse_empty_chunks: bool,
    max_file_size: u64,
}

impl Default for ParserSettings {
    fn default() -> Self {
        ParserSettings {
            validate_checksums: true,
            indent: true,
            ansi_codec: WINDOWS_1252,
            parse_empty_chunks: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl fmt::Debug for ParserSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserSettings")
            .field("validate_checksums", &self.validate_checksums)
            .field("indent", &self.indent)
            .field("ansi_codec", &self.ansi_codec.name())
            .field("parse_empty_chunks", &self.parse_empty_chunks)
            .field("max_file_size", &self.max_file_size)
            .finish()
    }
}

impl ParserSettings {
    pub fn new() -> Self {
        ParserSettings::default()
    }

    /// When disabled, chunks with mismatched CRCs still parse; the header magic
    /// is always checked.
    pub fn validate_checksums(mut self, validate_checksums: bool) -> Self {
        self.validate_checksums = validate_checksums;
        self
    }

    /// Controls XML output indentation.
    pub fn indent(mut self, pretty: bool) -> Self {
        self.indent = pretty;
        self
    }

    /// The codec used to decode ansi strings inside records.
    pub fn ansi_codec(mut self, ansi_codec: EncodingRef) -> Self {
        self.ansi_codec = ansi_codec;
        self
    }

    /// Visit chunk slots past the header's chunk count (dirty files).
    pub fn parse_empty_chunks(mut self, parse_empty_chunks: bool) -> Self {
        self.parse_empty_chunks = parse_empty_chunks;
        self
    }

    /// Maximum accepted file size in bytes; zero disables the gate.
    pub fn max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
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

    pub fn should_parse_empty_chunks(&self) -> bool {
        self.parse_empty_chunks
    }

    pub fn get_max_file_size(&self) -> u64 {
        self.max_file_size
    }
}

pub struct EvtxParser<T: ReadSeek> {
    data: T,
    header: EvtxFileHeader,
    config: Arc<ParserSettings>,
    stream_size: u64,
}

impl EvtxParser<File> {
    /// Attempts to load an evtx file from a given path, verifying the header.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_path_with_configuration(path, ParserSettings::default())
    }

    pub fn from_path_with_configuration(
        path: impl AsRef<Path>,
        configuration: ParserSettings,
    ) -> Result<Self> {
        let path = path.as_ref();

        let f = File::open(path).map_err(|e| EvtxError::FailedToOpenFile {
            source: e,
            path: path.to_path_buf(),
        })?;

        let metadata = f.metadata().map_err(EvtxError::from)?;
        let limit = configuration.get_max_file_size();
        if limit > 0 && metadata.len() > limit {
            return Err(EvtxError::FileSizeLimitExceeded {
                size: metadata.len(),
                limit,
            });
        }

        Self::from_read_seek(f, configuration)
    }
}

impl EvtxParser<Cursor<Vec<u8>>> {
    /// Attempts to load an evtx file from a buffer, verifying the header.
    pub fn from_buffer(buffer: Vec<u8>) -> Result<Self> {
        Self::from_read_seek(Cursor::new(buffer), ParserSettings::default())
    }
}

impl<T: ReadSeek> EvtxParser<T> {
    fn from_read_seek(mut data: T, configuration: ParserSettings) -> Result<Self> {
        let stream_size = data.seek(SeekFrom::End(0)).map_err(EvtxError::from)?;
        data.seek(SeekFrom::Start(0)).map_err(EvtxError::from)?;

        let mut header_bytes = vec![0_u8; EVTX_FILE_HEADER_SIZE];
        data.read_exact(&mut header_bytes).map_err(EvtxError::from)?;

        let as_slice = header_bytes.as_slice();
        let mut cursor = Cursor::new(as_slice);
        let header = EvtxFileHeader::from_stream(&mut cursor)?;
        header.verify(as_slice)?;

        Ok(EvtxParser {
            data,
            header,
            config: Arc::new(configuration),
            stream_size,
        })
    }

    pub fn with_configuration(mut self, configuration: ParserSettings) -> Self {
        self.config = Arc::new(configuration);
        self
    }

    pub fn header(&self) -> &EvtxFileHeader {
        &self.header
    }

    pub fn settings(&self) -> Arc<ParserSettings> {
        Arc::clone(&self.config)
    }

    /// The record id the log would assign next; `last N` tailing derives its
    /// starting point from this.
    pub fn next_record_id(&self) -> u64 {
        self.header.next_record_id
    }

    pub(crate) fn effective_chunk_count(&self) -> u16 {
        if self.config.should_parse_empty_chunks() {
            let available = self
                .stream_size
                .saturating_sub(EVTX_FILE_HEADER_SIZE as u64)
                / EVTX_CHUNK_SIZE as u64;
            available.min(u64::from(u16::MAX)) as u16
        } else {
            self.header.chunk_count
        }
    }

    /// Reads and frames chunk `chunk_number`, validating checksums per settings.
    pub fn allocate_chunk(&mut self, chunk_number: u16) -> Result<EvtxChunkData> {
        let offset =
            EVTX_FILE_HEADER_SIZE as u64 + u64::from(chunk_number) * EVTX_CHUNK_SIZE as u64;

        if offset + EVTX_CHUNK_SIZE as u64 > self.stream_size {
            return Err(EvtxError::IncompleteChunk { chunk_number });
        }

        self.data
            .seek(SeekFrom::Start(offset))
            .map_err(EvtxError::from)?;

        let mut chunk_data = vec![0_u8; EVTX_CHUNK_SIZE];
        self.data
            .read_exact(&mut chunk_data)
            .map_err(|_| EvtxError::IncompleteChunk { chunk_number })?;

        Ok(EvtxChunkData::new(
            chunk_data,
            self.config.should_validate_checksums(),
        )?)
    }

    /// An iterator over the file's chunks, in file order.
    pub fn chunks(&mut self) -> IterChunks<'_, T> {
        IterChunks {
            parser: self,
            chunk_number: 0,
        }
    }

    /// An iterator over all records in the file, serialized as XML documents.
    ///
    /// Invalid chunks are skipped with a warning; record order follows chunk
    /// order and ascending record position within each chunk.
    pub fn records(&mut self) -> IterRecords<'_, T> {
        IterRecords {
            parser: self,
            chunk_number: 0,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    /// Looks up a single record by its id, scanning only chunks whose record
    /// range contains it.
    pub fn get_record(&mut self, record_id: u64) -> Result<Option<SerializedEvtxRecord<String>>> {
        let count = self.effective_chunk_count();

        for chunk_number in 0..count {
            let chunk_data = match self.allocate_chunk(chunk_number) {
                Ok(chunk_data) => chunk_data,
                Err(e) => {
                    warn!("skipping invalid chunk {chunk_number} while searching for record {record_id}: {e}");
                    continue;
                }
            };

            if record_id < chunk_data.header.first_event_record_id
                || record_id > chunk_data.header.last_event_record_id
            {
                continue;
            }

            let settings = Arc::clone(&self.config);
            let chunk = chunk_data.parse(settings)?;

            for record in chunk.iter() {
                match record {
                    Ok(record) if record.event_record_id == record_id => {
                        return record.into_xml().map(Some);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("skipping broken record while searching: {e}"),
                }
            }
        }

        Ok(None)
    }

    /// Writes an advisory sidecar index with per-chunk record ranges.
    /// The index is never read back; it exists for external tooling.
    pub fn write_index_sidecar(&mut self, path: impl AsRef<Path>) -> Result<()> {
        #[derive(Serialize)]
        struct ChunkIndexEntry {
            chunk_number: u16,
            file_offset: u64,
            first_record_id: u64,
            last_record_id: u64,
        }

        let mut entries = Vec::new();
        let count = self.effective_chunk_count();

        for chunk_number in 0..count {
            match self.allocate_chunk(chunk_number) {
                Ok(chunk_data) => entries.push(ChunkIndexEntry {
                    chunk_number,
                    file_offset: EVTX_FILE_HEADER_SIZE as u64
                        + u64::from(chunk_number) * EVTX_CHUNK_SIZE as u64,
                    first_record_id: chunk_data.header.first_event_record_id,
                    last_record_id: chunk_data.header.last_event_record_id,
                }),
                Err(e) => warn!("chunk {chunk_number} left out of the sidecar index: {e}"),
            }
        }

        let mut file = File::create(path).map_err(EvtxError::from)?;
        let body = serde_json::to_string_pretty(&entries)
            .map_err(crate::err::SerializationError::from)?;
        file.write_all(body.as_bytes()).map_err(EvtxError::from)?;

        Ok(())
    }
}

pub struct IterChunks<'a, T: ReadSeek> {
    parser: &'a mut EvtxParser<T>,
    chunk_number: u16,
}

impl<T: ReadSeek> Iterator for IterChunks<'_, T> {
    type Item = Result<EvtxChunkData>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.chunk_number >= self.parser.effective_chunk_count() {
            return None;
        }

        let current = self.chunk_number;
        self.chunk_number += 1;

        Some(self.parser.allocate_chunk(current))
    }
}

pub struct IterRecords<'a, T: ReadSeek> {
    parser: &'a mut EvtxParser<T>,
    chunk_number: u16,
    buffer: VecDeque<Result<SerializedEvtxRecord<String>>>,
    done: bool,
}

impl<T: ReadSeek> Iterator for IterRecords<'_, T> {
    type Item = Result<SerializedEvtxRecord<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(item);
            }

            if self.done {
                return None;
            }

            if self.chunk_number >= self.parser.effective_chunk_count() {
                self.done = true;
                return None;
            }

            let current = self.chunk_number;
            self.chunk_number += 1;

            let chunk_data = match self.parser.allocate_chunk(current) {
                Ok(chunk_data) => chunk_data,
                Err(EvtxError::ChunkError(e)) => {
                    // Either an invalid chunk header CRC or a mangled frame;
                    // later chunks are still worth visiting.
                    warn!("invalid chunk {current}, skipping it: {e}");
                    continue;
                }
                Err(e) => {
                    warn!("stopping chunk iteration at {current}: {e}");
                    self.done = true;
                    return None;
                }
            };

            let settings = Arc::clone(&self.parser.config);
            let chunk = match chunk_data.parse(settings) {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("failed to parse chunk {current}, skipping it: {e}");
                    continue;
                }
            };

            for record in chunk.iter() {
                self.buffer.push_back(record.and_then(|r| r.into_xml()));
            }
        }
    }
}
