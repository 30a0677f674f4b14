use crate::checksum_ieee;
use crate::err::{DeserializationError, DeserializationResult};

use bitflags::bitflags;
use byteorder::ReadBytesExt;
use std::io::{Cursor, Seek, SeekFrom};

/// The checksum covers the first 120 bytes of the header.
pub const EVTX_FILE_HEADER_CHECKSUM_RANGE: usize = 120;

#[derive(Debug, PartialEq, Eq)]
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
    pub checksum: u32,
}

bitflags! {
    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    pub struct HeaderFlags: u32 {
        const EMPTY = 0x0;
        const DIRTY = 0x1;
        const FULL = 0x2;
        const NO_CRC32 = 0x4;
    }
}

impl EvtxFileHeader {
    pub fn from_stream(stream: &mut Cursor<&[u8]>) -> DeserializationResult<EvtxFileHeader> {
        let mut magic = [0_u8; 8];
        std::io::Read::read_exact(stream, &mut magic).map_err(|e| {
            DeserializationError::FailedToRead {
                offset: 0,
                t: "file_header_magic",
                source: e,
            }
        })?;

        if &magic != b"ElfFile\x00" {
            return Err(DeserializationError::InvalidEvtxFileHeaderMagic { magic });
        }

        let oldest_chunk = try_read!(stream, u64, "file_header_oldest_chunk")?;
        let current_chunk_num = try_read!(stream, u64, "file_header_current_chunk_num")?;
        let next_record_num = try_read!(stream, u64, "file_header_next_record_num")?;
        let header_size = try_read!(stream, u32, "file_header_header_size")?;
        let minor_version = try_read!(stream, u16, "file_header_minor_version")?;
        let major_version = try_read!(stream, u16, "file_header_major_version")?;
        let header_block_size = try_read!(stream, u16, "file_header_header_block_size")?;
        let chunk_count = try_read!(stream, u16, "file_header_chunk_count")?;

        // unused
        stream
            .seek(SeekFrom::Current(76))
            .map_err(DeserializationError::from)?;

        let raw_flags = try_read!(stream, u32, "file_header_flags")?;
        let flags = HeaderFlags::from_bits_truncate(raw_flags);
        let checksum = try_read!(stream, u32, "file_header_checksum")?;

        // unused
        stream
            .seek(SeekFrom::Current(4096 - 128))
            .map_err(DeserializationError::from)?;

        Ok(EvtxFileHeader {
            first_chunk_number: oldest_chunk,
            last_chunk_number: current_chunk_num,
            next_record_id: next_record_num,
            header_block_size,
            minor_version,
            major_version,
            header_size,
            chunk_count,
            flags,
            checksum,
        })
    }

    /// Validates versions, the header block size, and the CRC over the first
    /// 120 bytes. The magic has already been checked during parsing.
    pub fn verify(&self, header_bytes: &[u8]) -> DeserializationResult<()> {
        if self.major_version != 3 || !matches!(self.minor_version, 1 | 2) {
            return Err(DeserializationError::UnsupportedEvtxVersion {
                major: self.major_version,
                minor: self.minor_version,
            });
        }

        if self.header_block_size != 4096 {
            return Err(DeserializationError::InvalidHeaderBlockSize {
                size: self.header_block_size,
            });
        }

        if self.flags.contains(HeaderFlags::NO_CRC32) {
            return Ok(());
        }

        let computed = checksum_ieee(&header_bytes[..EVTX_FILE_HEADER_CHECKSUM_RANGE]);
        if computed != self.checksum {
            return Err(DeserializationError::InvalidFileHeaderChecksum {
                expected: self.checksum,
                found: computed,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_header_bytes() -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4096);
        bytes.extend_from_slice(b"ElfFile\x00");
        bytes.extend_from_slice(&0u64.to_le_bytes()); // oldest chunk
        bytes.extend_from_slice(&25u64.to_le_bytes()); // current chunk
        bytes.extend_from_slice(&2226u64.to_le_bytes()); // next record
        bytes.extend_from_slice(&128u32.to_le_bytes()); // header size
        bytes.extend_from_slice(&1u16.to_le_bytes()); // minor
        bytes.extend_from_slice(&3u16.to_le_bytes()); // major
        bytes.extend_from_slice(&4096u16.to_le_bytes()); // block size
        bytes.extend_from_slice(&26u16.to_le_bytes()); // chunk count
        bytes.resize(120, 0);
        bytes.extend_from_slice(&1u32.to_le_bytes()); // flags: dirty
        let checksum = crate::checksum_ieee(&bytes[..120]);
        bytes.extend_from_slice(&checksum.to_le_bytes());
        bytes.resize(4096, 0);
        bytes
    }

    #[test]
    fn test_parses_and_verifies_a_file_header() {
        let bytes = build_header_bytes();
        let as_slice = bytes.as_slice();
        let mut cursor = Cursor::new(as_slice);
        let header = EvtxFileHeader::from_stream(&mut cursor).unwrap();

        assert_eq!(
            header,
            EvtxFileHeader {
                first_chunk_number: 0,
                last_chunk_number: 25,
                next_record_id: 2226,
                header_size: 128,
                minor_version: 1,
                major_version: 3,
                header_block_size: 4096,
                chunk_count: 26,
                flags: HeaderFlags::DIRTY,
                checksum: crate::checksum_ieee(&bytes[..120]),
            }
        );

        header.verify(&bytes).unwrap();
        assert_eq!(cursor.position(), 4096);
    }

    #[test]
    fn test_rejects_a_corrupted_checksum() {
        let mut bytes = build_header_bytes();
        bytes[16] ^= 0xff;

        let as_slice = bytes.as_slice();
        let mut cursor = Cursor::new(as_slice);
        let header = EvtxFileHeader::from_stream(&mut cursor).unwrap();

        assert!(matches!(
            header.verify(&bytes),
            Err(DeserializationError::InvalidFileHeaderChecksum { .. })
        ));
    }

    #[test]
    fn test_rejects_an_unsupported_version() {
        let mut bytes = build_header_bytes();
        // minor version lives at offset 36
        bytes[36] = 9;

        let as_slice = bytes.as_slice();
        let mut cursor = Cursor::new(as_slice);
        let header = EvtxFileHeader::from_stream(&mut cursor).unwrap();

        assert!(matches!(
            header.verify(&bytes),
            Err(DeserializationError::UnsupportedEvtxVersion { major: 3, minor: 9 })
        ));
    }
}
