use crate::err::{ChunkError, ChunkResult, DeserializationError, DeserializationResult, EvtxError};

use crate::evtx_record::{EvtxRecord, EvtxRecordHeader};

use log::{debug, info, warn};
use std::io::{Cursor, Read, Seek, SeekFrom};

use crate::binxml::deserializer::read_binxml_fragment;
use crate::evtx_parser::ParserSettings;
use crate::string_cache::StringCache;
use crate::template_cache::TemplateCache;
use crate::{checksum_ieee, ChunkOffset};

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};
use std::sync::Arc;

pub const EVTX_CHUNK_SIZE: usize = 65536;
pub const EVTX_CHUNK_HEADER_SIZE: usize = 512;

const STRING_TABLE_BUCKET_COUNT: usize = 64;
const TEMPLATE_TABLE_BUCKET_COUNT: usize = 32;

bitflags! {
    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    pub struct ChunkFlags: u32 {
        const EMPTY = 0x0;
        const DIRTY = 0x1;
        const NO_CRC32 = 0x4;
    }
}

#[derive(Debug)]
pub struct EvtxChunkHeader {
    pub first_event_record_number: u64,
    pub last_event_record_number: u64,
    pub first_event_record_id: u64,
    pub last_event_record_id: u64,
    pub header_size: u32,
    pub last_event_record_data_offset: u32,
    /// Offset of the first byte past the last record; the spec calls this the
    /// next-record offset. Record data and its CRC end here.
    pub free_space_offset: u32,
    pub events_checksum: u32,
    pub header_chunk_checksum: u32,
    pub flags: ChunkFlags,
    // A list of buckets containing the offsets of all strings in the chunk.
    // Each bucket holds the offset of the first name node; nodes chain to the
    // next entry in the same bucket. Empty buckets hold 0.
    //  ----------       ----------------
    // |          |     |                |
    // |  offset  | --> |   name node    | ---> 0
    // |          |     |                |
    //  ----------       ----------------
    strings_offsets: Vec<ChunkOffset>,
    template_offsets: Vec<ChunkOffset>,
}

/// A struct which owns all the data associated with a chunk.
/// See `EvtxChunk` for the parsed view.
pub struct EvtxChunkData {
    pub header: EvtxChunkHeader,
    pub data: Vec<u8>,
}

impl EvtxChunkData {
    /// Construct a new chunk from the given data.
    /// Note that even when `validate_checksum` is set to false, the header magic is still checked.
    pub fn new(data: Vec<u8>, validate_checksum: bool) -> ChunkResult<Self> {
        let as_slice = data.as_slice();
        let mut cursor = Cursor::new(as_slice);
        let header = EvtxChunkHeader::from_reader(&mut cursor)?;

        let chunk = EvtxChunkData { header, data };

        if validate_checksum {
            chunk.validate_header_checksum()?;
            chunk.validate_data_checksum()?;
        }

        Ok(chunk)
    }

    pub fn parse(&self, settings: Arc<ParserSettings>) -> ChunkResult<EvtxChunk<'_>> {
        EvtxChunk::new(&self.data, &self.header, settings)
    }

    pub fn validate_data_checksum(&self) -> ChunkResult<()> {
        debug!("Validating data checksum");

        if self.header.flags.contains(ChunkFlags::NO_CRC32) {
            return Ok(());
        }

        let data_end = (self.header.free_space_offset as usize)
            .clamp(EVTX_CHUNK_HEADER_SIZE, self.data.len());

        // An empty data region has a zero checksum by convention.
        let computed_checksum = if self.header.free_space_offset as usize <= EVTX_CHUNK_HEADER_SIZE
        {
            0
        } else {
            checksum_ieee(&self.data[EVTX_CHUNK_HEADER_SIZE..data_end])
        };

        debug!(
            "Expected checksum: {:?}, found: {:?}",
            self.header.events_checksum, computed_checksum
        );

        if computed_checksum != self.header.events_checksum {
            return Err(ChunkError::InvalidChunkDataChecksum {
                expected: self.header.events_checksum,
                found: computed_checksum,
            });
        }

        Ok(())
    }

    pub fn validate_header_checksum(&self) -> ChunkResult<()> {
        debug!("Validating header checksum");

        if self.header.flags.contains(ChunkFlags::NO_CRC32) {
            return Ok(());
        }

        // The CRC covers bytes [0, 120) and [128, 512).
        let header_bytes_1 = &self.data[..120];
        let header_bytes_2 = &self.data[128..EVTX_CHUNK_HEADER_SIZE];

        let bytes_for_checksum: Vec<u8> = header_bytes_1
            .iter()
            .chain(header_bytes_2)
            .cloned()
            .collect();

        let computed_checksum = checksum_ieee(bytes_for_checksum.as_slice());

        debug!(
            "Expected checksum: {:?}, found: {:?}",
            self.header.header_chunk_checksum, computed_checksum
        );

        if computed_checksum != self.header.header_chunk_checksum {
            return Err(ChunkError::InvalidChunkHeaderChecksum {
                expected: self.header.header_chunk_checksum,
                found: computed_checksum,
            });
        }

        Ok(())
    }

    pub fn validate_checksum(&self) -> bool {
        self.validate_header_checksum().is_ok() && self.validate_data_checksum().is_ok()
    }
}

/// A parsed view over chunk data. All references are created together and live
/// for the duration of the parsing phase.
#[derive(Debug)]
pub struct EvtxChunk<'chunk> {
    pub data: &'chunk [u8],
    pub header: &'chunk EvtxChunkHeader,
    pub string_cache: StringCache,
    pub template_table: TemplateCache<'chunk>,

    pub settings: Arc<ParserSettings>,
}

impl<'chunk> EvtxChunk<'chunk> {
    /// Will fail if the data starts with an invalid evtx chunk header.
    pub fn new(
        data: &'chunk [u8],
        header: &'chunk EvtxChunkHeader,
        settings: Arc<ParserSettings>,
    ) -> ChunkResult<EvtxChunk<'chunk>> {
        info!("Initializing string cache");
        let string_cache =
            StringCache::populate(data, &header.strings_offsets, header.free_space_offset)
                .map_err(|e| ChunkError::FailedToBuildStringCache { source: e })?;

        info!("Initializing template cache");
        let template_table =
            TemplateCache::populate(data, &header.template_offsets, settings.get_ansi_codec())
                .map_err(|e| ChunkError::FailedToBuildTemplateCache { source: e })?;

        Ok(EvtxChunk {
            header,
            data,
            string_cache,
            template_table,
            settings,
        })
    }

    /// Return an iterator of records from the chunk.
    /// Iteration ends gracefully at the first invalid record frame.
    pub fn iter(&'chunk self) -> IterChunkRecords<'chunk> {
        IterChunkRecords {
            chunk: self,
            offset_from_chunk_start: EVTX_CHUNK_HEADER_SIZE as u64,
            exhausted: false,
        }
    }
}

/// An iterator over a chunk, yielding records tied to the chunk borrow.
pub struct IterChunkRecords<'chunk> {
    chunk: &'chunk EvtxChunk<'chunk>,
    offset_from_chunk_start: u64,
    exhausted: bool,
}

impl<'chunk> Iterator for IterChunkRecords<'chunk> {
    type Item = std::result::Result<EvtxRecord<'chunk>, EvtxError>;

    fn next(&mut self) -> Option<<Self as Iterator>::Item> {
        let chunk = self.chunk;

        if self.exhausted
            || self.offset_from_chunk_start >= u64::from(chunk.header.free_space_offset)
        {
            return None;
        }

        let record_offset = self.offset_from_chunk_start as usize;
        let mut cursor = Cursor::new(chunk.data);
        if cursor.seek(SeekFrom::Start(record_offset as u64)).is_err() {
            self.exhausted = true;
            return None;
        }

        let record_header = match EvtxRecordHeader::from_reader(&mut cursor) {
            Ok(record_header) => record_header,
            Err(err) => {
                // Free space past the last record is zero filled; anything else
                // is a corrupt frame. Either way the chunk has no more records.
                warn!("chunk record iteration stopped at offset {record_offset}: {err}");
                self.exhausted = true;
                return None;
            }
        };

        info!("Record id - {}", record_header.event_record_id);
        debug!("Record header - {record_header:?}");

        let record_end = record_offset + record_header.data_size as usize;
        if record_end > chunk.data.len() {
            warn!(
                "record {} overruns the chunk (end {record_end}), stopping iteration",
                record_header.event_record_id
            );
            self.exhausted = true;
            return None;
        }

        // The declared size is duplicated after the record data.
        let size_copy_offset = record_end - 4;
        let size_copy = u32::from_le_bytes(
            chunk.data[size_copy_offset..record_end]
                .try_into()
                .expect("slice is exactly four bytes"),
        );

        if size_copy != record_header.data_size {
            warn!(
                "{}",
                DeserializationError::RecordSizeMismatch {
                    record_id: record_header.event_record_id,
                    size: record_header.data_size,
                    size_copy,
                }
            );
            self.exhausted = true;
            return None;
        }

        // Move iterator state forward before handing out borrows.
        self.offset_from_chunk_start += u64::from(record_header.data_size);
        if chunk.header.last_event_record_id == record_header.event_record_id {
            self.exhausted = true;
        }

        let binxml_size = match record_header.record_data_size() {
            Ok(size) => size,
            Err(e) => {
                self.exhausted = true;
                return Some(Err(e));
            }
        };

        let tokens = match read_binxml_fragment(
            &mut cursor,
            Some(chunk),
            Some(binxml_size),
            false,
            chunk.settings.get_ansi_codec(),
        ) {
            Ok(tokens) => tokens,
            Err(e) => {
                return Some(Err(EvtxError::FailedToParseRecord {
                    record_id: record_header.event_record_id,
                    source: Box::new(EvtxError::DeserializationError(e)),
                }));
            }
        };

        Some(Ok(EvtxRecord {
            chunk,
            event_record_id: record_header.event_record_id,
            timestamp: record_header.timestamp,
            tokens,
            binxml_size,
            settings: Arc::clone(&chunk.settings),
        }))
    }
}

impl EvtxChunkHeader {
    pub fn from_reader(input: &mut Cursor<&[u8]>) -> DeserializationResult<EvtxChunkHeader> {
        let mut magic = [0_u8; 8];
        input
            .take(8)
            .read_exact(&mut magic)
            .map_err(|e| DeserializationError::FailedToRead {
                offset: 0,
                t: "chunk_header_magic",
                source: e,
            })?;

        if &magic != b"ElfChnk\x00" {
            return Err(DeserializationError::InvalidEvtxChunkMagic { magic });
        }

        let first_event_record_number = try_read!(input, u64, "first_event_record_number")?;
        let last_event_record_number = try_read!(input, u64, "last_event_record_number")?;
        let first_event_record_id = try_read!(input, u64, "first_event_record_id")?;
        let last_event_record_id = try_read!(input, u64, "last_event_record_id")?;

        let header_size = try_read!(input, u32, "chunk_header_size")?;
        let last_event_record_data_offset = try_read!(input, u32, "last_event_record_data_offset")?;
        let free_space_offset = try_read!(input, u32, "free_space_offset")?;
        let events_checksum = try_read!(input, u32, "events_checksum")?;

        // Reserved
        input
            .seek(SeekFrom::Current(64))
            .map_err(DeserializationError::from)?;

        let raw_flags = try_read!(input, u32, "chunk_flags")?;
        let flags = ChunkFlags::from_bits_truncate(raw_flags);

        let header_chunk_checksum = try_read!(input, u32, "header_chunk_checksum")?;

        let mut strings_offsets = vec![0_u32; STRING_TABLE_BUCKET_COUNT];
        input
            .read_u32_into::<LittleEndian>(&mut strings_offsets)
            .map_err(|e| DeserializationError::FailedToRead {
                offset: input.position(),
                t: "string_table_offsets",
                source: e,
            })?;

        let mut template_offsets = vec![0_u32; TEMPLATE_TABLE_BUCKET_COUNT];
        input
            .read_u32_into::<LittleEndian>(&mut template_offsets)
            .map_err(|e| DeserializationError::FailedToRead {
                offset: input.position(),
                t: "template_table_offsets",
                source: e,
            })?;

        Ok(EvtxChunkHeader {
            first_event_record_number,
            last_event_record_number,
            first_event_record_id,
            last_event_record_id,
            header_size,
            last_event_record_data_offset,
            free_space_offset,
            events_checksum,
            header_chunk_checksum,
            flags,
            template_offsets,
            strings_offsets,
        })
    }
}
