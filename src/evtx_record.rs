use crate::binxml::assemble::parse_tokens;
use crate::err::{DeserializationError, DeserializationResult, EvtxError, Result, SerializationError};
use crate::evtx_chunk::EvtxChunk;
use crate::evtx_parser::ParserSettings;
use crate::model::deserialized::BinXMLDeserializedTokens;
use crate::utils::datetime_from_filetime;
use crate::xml_output::XmlOutput;

use byteorder::ReadBytesExt;
use chrono::{DateTime, Utc};
use std::io::{Cursor, Read};
use std::sync::Arc;

pub type RecordId = u64;

pub(crate) const EVTX_RECORD_HEADER_SIZE: usize = 24;

/// Records may not span chunks, which bounds their size.
pub const MAX_RECORD_DATA_SIZE: u32 = 0x10000;

#[derive(Debug)]
pub struct EvtxRecord<'a> {
    pub chunk: &'a EvtxChunk<'a>,
    pub event_record_id: RecordId,
    pub timestamp: DateTime<Utc>,
    pub tokens: Vec<BinXMLDeserializedTokens<'a>>,
    pub binxml_size: u32,
    pub settings: Arc<ParserSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvtxRecordHeader {
    pub data_size: u32,
    pub event_record_id: RecordId,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedEvtxRecord<T> {
    pub event_record_id: RecordId,
    pub timestamp: DateTime<Utc>,
    pub data: T,
}

impl EvtxRecordHeader {
    pub fn from_reader(input: &mut Cursor<&[u8]>) -> DeserializationResult<EvtxRecordHeader> {
        let mut magic = [0_u8; 4];
        input
            .take(4)
            .read_exact(&mut magic)
            .map_err(|e| DeserializationError::FailedToRead {
                offset: input.position(),
                t: "record_header_magic",
                source: e,
            })?;

        if &magic != b"\x2a\x2a\x00\x00" {
            return Err(DeserializationError::InvalidEvtxRecordHeaderMagic { magic });
        }

        let size = try_read!(input, u32, "record_data_size")?;
        let record_id = try_read!(input, u64, "record_event_record_id")?;
        let filetime = try_read!(input, u64, "record_filetime")?;

        if size > MAX_RECORD_DATA_SIZE {
            return Err(DeserializationError::OversizedRecord {
                record_id,
                size,
            });
        }

        // Framing overhead: this header plus the trailing size copy.
        if size < (EVTX_RECORD_HEADER_SIZE as u32 + 4) {
            return Err(DeserializationError::UndersizedRecord { size });
        }

        Ok(EvtxRecordHeader {
            data_size: size,
            event_record_id: record_id,
            timestamp: datetime_from_filetime(filetime),
        })
    }

    /// The number of BinXML bytes between the header and the trailing size copy.
    pub fn record_data_size(&self) -> Result<u32> {
        let decal = EVTX_RECORD_HEADER_SIZE as u32 + 4;
        if self.data_size < decal {
            return Err(EvtxError::DeserializationError(
                DeserializationError::UndersizedRecord {
                    size: self.data_size,
                },
            ));
        }
        Ok(self.data_size - decal)
    }
}

impl<'a> EvtxRecord<'a> {
    /// Consumes the record, producing an XML document.
    pub fn into_xml(self) -> Result<SerializedEvtxRecord<String>> {
        let capacity_hint = self.binxml_size as usize * 2;
        let buffer = Vec::with_capacity(capacity_hint);

        let event_record_id = self.event_record_id;
        let timestamp = self.timestamp;

        let mut output = XmlOutput::with_writer(buffer, &self.settings);
        parse_tokens(&self.tokens, self.chunk, &mut output).map_err(|e| {
            EvtxError::FailedToParseRecord {
                record_id: event_record_id,
                source: Box::new(EvtxError::SerializationError(e)),
            }
        })?;

        let data =
            String::from_utf8(output.into_writer()?).map_err(SerializationError::from)?;

        Ok(SerializedEvtxRecord {
            event_record_id,
            timestamp,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::format_utc;

    #[test]
    fn test_parses_a_record_header() {
        // magic | size 0x578 | record number 1 | filetime
        let mut bytes: Vec<u8> = vec![0x2a, 0x2a, 0x00, 0x00];
        bytes.extend_from_slice(&0x578u32.to_le_bytes());
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&133_497_882_451_234_560u64.to_le_bytes());

        let as_slice = bytes.as_slice();
        let mut cursor = Cursor::new(as_slice);
        let header = EvtxRecordHeader::from_reader(&mut cursor).unwrap();

        assert_eq!(header.data_size, 0x578);
        assert_eq!(header.event_record_id, 1);
        assert_eq!(format_utc(&header.timestamp), "2024-01-15T10:30:45.123456Z");
        assert_eq!(header.record_data_size().unwrap(), 0x578 - 28);
    }

    #[test]
    fn test_rejects_a_bad_magic() {
        let mut bytes: Vec<u8> = vec![0x2a, 0x2b, 0x00, 0x00];
        bytes.resize(24, 0);

        let as_slice = bytes.as_slice();
        let mut cursor = Cursor::new(as_slice);

        assert!(matches!(
            EvtxRecordHeader::from_reader(&mut cursor),
            Err(DeserializationError::InvalidEvtxRecordHeaderMagic { .. })
        ));
    }

    #[test]
    fn test_rejects_an_oversized_record() {
        let mut bytes: Vec<u8> = vec![0x2a, 0x2a, 0x00, 0x00];
        bytes.extend_from_slice(&0x10001u32.to_le_bytes());
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());

        let as_slice = bytes.as_slice();
        let mut cursor = Cursor::new(as_slice);

        assert!(matches!(
            EvtxRecordHeader::from_reader(&mut cursor),
            Err(DeserializationError::OversizedRecord { .. })
        ));
    }
}
