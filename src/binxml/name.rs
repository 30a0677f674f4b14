use crate::err::DeserializationResult;
use crate::utils::read_len_prefixed_utf16_string;
use crate::ChunkOffset;

use byteorder::ReadBytesExt;
use std::fmt::{self, Formatter};
use std::io::{Cursor, Seek, SeekFrom};

/// An interned name string, resolved out of the chunk string table.
#[derive(Debug, PartialEq, Eq, PartialOrd, Clone, Hash)]
pub struct BinXmlName {
    str: String,
}

/// A reference to a name by its chunk-relative offset.
/// The offset is the identity; resolution happens against the chunk string cache.
#[derive(Debug, PartialOrd, PartialEq, Eq, Clone, Copy, Hash)]
pub struct BinXmlNameRef {
    pub offset: ChunkOffset,
}

/// The linked-list head of a string table node: offset of the next node in the
/// hash bucket, and the name hash.
#[derive(Debug, PartialEq, PartialOrd, Clone)]
pub(crate) struct BinXmlNameLink {
    pub next_string: Option<ChunkOffset>,
    pub hash: u16,
}

impl BinXmlNameLink {
    pub(crate) fn from_stream(cursor: &mut Cursor<&[u8]>) -> DeserializationResult<Self> {
        let next_string = try_read!(cursor, u32, "name_link_next_offset")?;
        let name_hash = try_read!(cursor, u16, "name_link_hash")?;

        Ok(BinXmlNameLink {
            next_string: if next_string > 0 {
                Some(next_string)
            } else {
                None
            },
            hash: name_hash,
        })
    }

    pub(crate) fn data_size() -> u32 {
        6
    }
}

impl BinXmlNameRef {
    /// Reads the `u32` name offset. When the offset points directly at the cursor,
    /// the name node is inlined here and must be skipped so the stream stays aligned.
    pub fn from_stream(cursor: &mut Cursor<&[u8]>) -> DeserializationResult<Self> {
        let name_offset = try_read!(cursor, u32, "name_offset")?;

        let position_before_string = cursor.position();
        let need_to_skip_inline_name = position_before_string == u64::from(name_offset);

        if need_to_skip_inline_name {
            let _ = BinXmlNameLink::from_stream(cursor)?;
            let len = try_read!(cursor, u16, "inline_name_length")?;

            // Name length field + characters + NUL terminator.
            let data_size =
                BinXmlNameLink::data_size() + u32::from(len) * 2 + 4;

            cursor
                .seek(SeekFrom::Start(
                    position_before_string + u64::from(data_size),
                ))
                .map_err(crate::err::DeserializationError::from)?;
        }

        Ok(BinXmlNameRef {
            offset: name_offset,
        })
    }
}

impl BinXmlName {
    /// Parses a full name node (link, length, characters, terminator) at the cursor.
    pub fn from_stream(cursor: &mut Cursor<&[u8]>) -> DeserializationResult<(Self, u16)> {
        let link = BinXmlNameLink::from_stream(cursor)?;
        let name = read_len_prefixed_utf16_string(cursor, true)?.unwrap_or_default();

        Ok((BinXmlName { str: name }, link.hash))
    }

    /// Parses a name node and returns the offset of the next node in the bucket chain.
    pub(crate) fn from_stream_with_link(
        cursor: &mut Cursor<&[u8]>,
    ) -> DeserializationResult<(Self, u16, Option<ChunkOffset>)> {
        let link = BinXmlNameLink::from_stream(cursor)?;
        let name = read_len_prefixed_utf16_string(cursor, true)?.unwrap_or_default();

        Ok((BinXmlName { str: name }, link.hash, link.next_string))
    }

    pub fn as_str(&self) -> &str {
        &self.str
    }

    pub fn into_string(self) -> String {
        self.str
    }
}

impl fmt::Display for BinXmlName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.str)
    }
}
