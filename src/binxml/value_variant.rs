use crate::binxml::deserializer::read_binxml_fragment;
use crate::err::{DeserializationError, DeserializationResult};
use crate::evtx_chunk::EvtxChunk;
use crate::guid::Guid;
use crate::model::deserialized::BinXMLDeserializedTokens;
use crate::ntsid::Sid;
use crate::utils::{
    format_utc, read_ansi_string_by_size, read_len_prefixed_utf16_string, read_systemtime,
    read_utf16_by_size, read_utf16_string_array,
};

use byteorder::ReadBytesExt;
use chrono::{DateTime, Utc};
use encoding::EncodingRef;
use log::warn;
use std::borrow::Cow;
use std::io::{Cursor, Seek, SeekFrom};

#[derive(Debug, PartialEq, Clone)]
pub enum BinXmlValue<'a> {
    NullType,
    // String may originate in substitution.
    StringType(String),
    AnsiStringType(String),
    Int8Type(i8),
    UInt8Type(u8),
    Int16Type(i16),
    UInt16Type(u16),
    Int32Type(i32),
    UInt32Type(u32),
    Int64Type(i64),
    UInt64Type(u64),
    Real32Type(f32),
    Real64Type(f64),
    BoolType(bool),
    BinaryType(&'a [u8]),
    GuidType(Guid),
    SizeTType(u64),
    FileTimeType(DateTime<Utc>),
    SysTimeType(DateTime<Utc>),
    SidType(Sid),
    HexInt32Type(String),
    HexInt64Type(String),
    EvtHandle,
    // Because the type is recursive, this variant is built by the deserializer
    // against the full chunk byte range.
    BinXmlType(Vec<BinXMLDeserializedTokens<'a>>),
    EvtXml,
    StringArrayType(Vec<String>),
    Int8ArrayType(Vec<i8>),
    UInt8ArrayType(Vec<u8>),
    Int16ArrayType(Vec<i16>),
    UInt16ArrayType(Vec<u16>),
    Int32ArrayType(Vec<i32>),
    UInt32ArrayType(Vec<u32>),
    Int64ArrayType(Vec<i64>),
    UInt64ArrayType(Vec<u64>),
    Real32ArrayType(Vec<f32>),
    Real64ArrayType(Vec<f64>),
    BoolArrayType(Vec<bool>),
    GuidArrayType(Vec<Guid>),
    FileTimeArrayType(Vec<DateTime<Utc>>),
    SysTimeArrayType(Vec<DateTime<Utc>>),
    SidArrayType(Vec<Sid>),
    HexInt32ArrayType(Vec<String>),
    HexInt64ArrayType(Vec<String>),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BinXmlValueType {
    NullType,
    StringType,
    AnsiStringType,
    Int8Type,
    UInt8Type,
    Int16Type,
    UInt16Type,
    Int32Type,
    UInt32Type,
    Int64Type,
    UInt64Type,
    Real32Type,
    Real64Type,
    BoolType,
    BinaryType,
    GuidType,
    SizeTType,
    FileTimeType,
    SysTimeType,
    SidType,
    HexInt32Type,
    HexInt64Type,
    EvtHandle,
    BinXmlType,
    EvtXmlType,
    StringArrayType,
    AnsiStringArrayType,
    Int8ArrayType,
    UInt8ArrayType,
    Int16ArrayType,
    UInt16ArrayType,
    Int32ArrayType,
    UInt32ArrayType,
    Int64ArrayType,
    UInt64ArrayType,
    Real32ArrayType,
    Real64ArrayType,
    BoolArrayType,
    BinaryArrayType,
    GuidArrayType,
    SizeTArrayType,
    FileTimeArrayType,
    SysTimeArrayType,
    SidArrayType,
    HexInt32ArrayType,
    HexInt64ArrayType,
}

impl BinXmlValueType {
    pub fn from_u8(byte: u8) -> Option<BinXmlValueType> {
        match byte {
            0x00 => Some(BinXmlValueType::NullType),
            0x01 => Some(BinXmlValueType::StringType),
            0x02 => Some(BinXmlValueType::AnsiStringType),
            0x03 => Some(BinXmlValueType::Int8Type),
            0x04 => Some(BinXmlValueType::UInt8Type),
            0x05 => Some(BinXmlValueType::Int16Type),
            0x06 => Some(BinXmlValueType::UInt16Type),
            0x07 => Some(BinXmlValueType::Int32Type),
            0x08 => Some(BinXmlValueType::UInt32Type),
            0x09 => Some(BinXmlValueType::Int64Type),
            0x0a => Some(BinXmlValueType::UInt64Type),
            0x0b => Some(BinXmlValueType::Real32Type),
            0x0c => Some(BinXmlValueType::Real64Type),
            0x0d => Some(BinXmlValueType::BoolType),
            0x0e => Some(BinXmlValueType::BinaryType),
            0x0f => Some(BinXmlValueType::GuidType),
            0x10 => Some(BinXmlValueType::SizeTType),
            0x11 => Some(BinXmlValueType::FileTimeType),
            0x12 => Some(BinXmlValueType::SysTimeType),
            0x13 => Some(BinXmlValueType::SidType),
            0x14 => Some(BinXmlValueType::HexInt32Type),
            0x15 => Some(BinXmlValueType::HexInt64Type),
            0x20 => Some(BinXmlValueType::EvtHandle),
            0x21 => Some(BinXmlValueType::BinXmlType),
            0x23 => Some(BinXmlValueType::EvtXmlType),
            0x81 => Some(BinXmlValueType::StringArrayType),
            0x82 => Some(BinXmlValueType::AnsiStringArrayType),
            0x83 => Some(BinXmlValueType::Int8ArrayType),
            0x84 => Some(BinXmlValueType::UInt8ArrayType),
            0x85 => Some(BinXmlValueType::Int16ArrayType),
            0x86 => Some(BinXmlValueType::UInt16ArrayType),
            0x87 => Some(BinXmlValueType::Int32ArrayType),
            0x88 => Some(BinXmlValueType::UInt32ArrayType),
            0x89 => Some(BinXmlValueType::Int64ArrayType),
            0x8a => Some(BinXmlValueType::UInt64ArrayType),
            0x8b => Some(BinXmlValueType::Real32ArrayType),
            0x8c => Some(BinXmlValueType::Real64ArrayType),
            0x8d => Some(BinXmlValueType::BoolArrayType),
            0x8e => Some(BinXmlValueType::BinaryArrayType),
            0x8f => Some(BinXmlValueType::GuidArrayType),
            0x90 => Some(BinXmlValueType::SizeTArrayType),
            0x91 => Some(BinXmlValueType::FileTimeArrayType),
            0x92 => Some(BinXmlValueType::SysTimeArrayType),
            0x93 => Some(BinXmlValueType::SidArrayType),
            0x94 => Some(BinXmlValueType::HexInt32ArrayType),
            0x95 => Some(BinXmlValueType::HexInt64ArrayType),
            _ => None,
        }
    }
}

impl<'a> BinXmlValue<'a> {
    /// Reads a value out of a `Value` token: a type byte followed by the
    /// length-prefixed (or fixed-size) payload.
    pub fn from_binxml_stream(
        cursor: &mut Cursor<&'a [u8]>,
        chunk: Option<&'a EvtxChunk<'a>>,
        ansi_codec: EncodingRef,
    ) -> DeserializationResult<BinXmlValue<'a>> {
        let value_type_token = try_read!(cursor, u8, "value_type")?;

        let value_type = BinXmlValueType::from_u8(value_type_token).ok_or(
            DeserializationError::InvalidValueVariant {
                value: value_type_token,
                offset: cursor.position(),
            },
        )?;

        Self::deserialize_value_type(&value_type, cursor, chunk, ansi_codec)
    }

    /// Top-level decoding: the payload declares its own length where one is needed.
    pub fn deserialize_value_type(
        value_type: &BinXmlValueType,
        cursor: &mut Cursor<&'a [u8]>,
        chunk: Option<&'a EvtxChunk<'a>>,
        ansi_codec: EncodingRef,
    ) -> DeserializationResult<BinXmlValue<'a>> {
        let value = match value_type {
            BinXmlValueType::NullType => BinXmlValue::NullType,
            BinXmlValueType::StringType => BinXmlValue::StringType(
                read_len_prefixed_utf16_string(cursor, false)?.unwrap_or_default(),
            ),
            BinXmlValueType::AnsiStringType => {
                let size = try_read!(cursor, u16, "ansi_string_length")?;
                BinXmlValue::AnsiStringType(read_ansi_string_by_size(
                    cursor,
                    u64::from(size),
                    ansi_codec,
                )?)
            }
            BinXmlValueType::Int8Type => BinXmlValue::Int8Type(try_read!(cursor, i8)?),
            BinXmlValueType::UInt8Type => BinXmlValue::UInt8Type(try_read!(cursor, u8)?),
            BinXmlValueType::Int16Type => BinXmlValue::Int16Type(try_read!(cursor, i16)?),
            BinXmlValueType::UInt16Type => BinXmlValue::UInt16Type(try_read!(cursor, u16)?),
            BinXmlValueType::Int32Type => BinXmlValue::Int32Type(try_read!(cursor, i32)?),
            BinXmlValueType::UInt32Type => BinXmlValue::UInt32Type(try_read!(cursor, u32)?),
            BinXmlValueType::Int64Type => BinXmlValue::Int64Type(try_read!(cursor, i64)?),
            BinXmlValueType::UInt64Type => BinXmlValue::UInt64Type(try_read!(cursor, u64)?),
            BinXmlValueType::Real32Type => BinXmlValue::Real32Type(try_read!(cursor, f32)?),
            BinXmlValueType::Real64Type => BinXmlValue::Real64Type(try_read!(cursor, f64)?),
            BinXmlValueType::BoolType => BinXmlValue::BoolType(try_read!(cursor, bool)?),
            BinXmlValueType::BinaryType => {
                let size = try_read!(cursor, u32, "binary_length")?;
                BinXmlValue::BinaryType(borrow_bytes(cursor, u64::from(size))?)
            }
            BinXmlValueType::GuidType => BinXmlValue::GuidType(try_read!(cursor, guid)?),
            BinXmlValueType::SizeTType => BinXmlValue::SizeTType(try_read!(cursor, u64)?),
            BinXmlValueType::FileTimeType => BinXmlValue::FileTimeType(try_read!(cursor, filetime)?),
            BinXmlValueType::SysTimeType => BinXmlValue::SysTimeType(read_systemtime(cursor)?),
            BinXmlValueType::SidType => BinXmlValue::SidType(try_read!(cursor, sid)?),
            BinXmlValueType::HexInt32Type => BinXmlValue::HexInt32Type(try_read!(cursor, hex32)?),
            BinXmlValueType::HexInt64Type => BinXmlValue::HexInt64Type(try_read!(cursor, hex64)?),
            BinXmlValueType::BinXmlType => {
                let tokens = read_binxml_fragment(cursor, chunk, None, true, ansi_codec)?;
                BinXmlValue::BinXmlType(tokens)
            }
            BinXmlValueType::EvtHandle => {
                warn!("EvtHandle value encountered, treating as null");
                BinXmlValue::EvtHandle
            }
            BinXmlValueType::EvtXmlType => {
                warn!("EvtXml value encountered, treating as null");
                BinXmlValue::EvtXml
            }
            other => {
                warn!("{other:?} cannot be decoded without a declared size, treating as null");
                BinXmlValue::NullType
            }
        };

        Ok(value)
    }

    /// Substitution decoding: the declared size from the descriptor table is
    /// authoritative, so strings and arrays are not length prefixed here.
    /// The caller is responsible for positioning the cursor at
    /// `start + declared_size` afterwards (see `read_template`).
    pub fn deserialize_sized_value_type(
        value_type: &BinXmlValueType,
        cursor: &mut Cursor<&'a [u8]>,
        chunk: Option<&'a EvtxChunk<'a>>,
        size: u16,
        ansi_codec: EncodingRef,
    ) -> DeserializationResult<BinXmlValue<'a>> {
        let value = match value_type {
            // A null substitution still reserves its declared bytes.
            BinXmlValueType::NullType => {
                cursor
                    .seek(SeekFrom::Current(i64::from(size)))
                    .map_err(DeserializationError::from)?;
                BinXmlValue::NullType
            }
            BinXmlValueType::StringType => BinXmlValue::StringType(
                read_utf16_by_size(cursor, u64::from(size))?.unwrap_or_default(),
            ),
            BinXmlValueType::AnsiStringType => BinXmlValue::AnsiStringType(
                read_ansi_string_by_size(cursor, u64::from(size), ansi_codec)?,
            ),
            BinXmlValueType::BinaryType => {
                BinXmlValue::BinaryType(borrow_bytes(cursor, u64::from(size))?)
            }
            BinXmlValueType::SizeTType => {
                if size == 4 {
                    BinXmlValue::SizeTType(u64::from(try_read!(cursor, u32)?))
                } else {
                    BinXmlValue::SizeTType(try_read!(cursor, u64)?)
                }
            }
            BinXmlValueType::BinXmlType => {
                // The embedded fragment is parsed against the full chunk byte
                // range, so interned strings and already-registered templates
                // beyond the declared length stay reachable.
                let tokens = read_binxml_fragment(cursor, chunk, Some(u32::from(size)), true, ansi_codec)?;
                BinXmlValue::BinXmlType(tokens)
            }
            BinXmlValueType::StringArrayType => {
                BinXmlValue::StringArrayType(read_utf16_string_array(cursor, u64::from(size))?)
            }
            BinXmlValueType::Int8ArrayType => {
                BinXmlValue::Int8ArrayType(try_read_sized_array!(cursor, i8, size))
            }
            BinXmlValueType::UInt8ArrayType => {
                BinXmlValue::UInt8ArrayType(try_read_sized_array!(cursor, u8, size))
            }
            BinXmlValueType::Int16ArrayType => {
                BinXmlValue::Int16ArrayType(try_read_sized_array!(cursor, i16, size))
            }
            BinXmlValueType::UInt16ArrayType => {
                BinXmlValue::UInt16ArrayType(try_read_sized_array!(cursor, u16, size))
            }
            BinXmlValueType::Int32ArrayType => {
                BinXmlValue::Int32ArrayType(try_read_sized_array!(cursor, i32, size))
            }
            BinXmlValueType::UInt32ArrayType => {
                BinXmlValue::UInt32ArrayType(try_read_sized_array!(cursor, u32, size))
            }
            BinXmlValueType::Int64ArrayType => {
                BinXmlValue::Int64ArrayType(try_read_sized_array!(cursor, i64, size))
            }
            BinXmlValueType::UInt64ArrayType => {
                BinXmlValue::UInt64ArrayType(try_read_sized_array!(cursor, u64, size))
            }
            BinXmlValueType::Real32ArrayType => {
                BinXmlValue::Real32ArrayType(try_read_sized_array!(cursor, f32, size))
            }
            BinXmlValueType::Real64ArrayType => {
                BinXmlValue::Real64ArrayType(try_read_sized_array!(cursor, f64, size))
            }
            BinXmlValueType::BoolArrayType => {
                BinXmlValue::BoolArrayType(try_read_sized_array!(cursor, bool, size))
            }
            BinXmlValueType::GuidArrayType => {
                BinXmlValue::GuidArrayType(try_read_sized_array!(cursor, guid, size))
            }
            BinXmlValueType::FileTimeArrayType => {
                BinXmlValue::FileTimeArrayType(try_read_sized_array!(cursor, filetime, size))
            }
            BinXmlValueType::SysTimeArrayType => {
                BinXmlValue::SysTimeArrayType(try_read_sized_array!(cursor, systime, size))
            }
            BinXmlValueType::SidArrayType => {
                BinXmlValue::SidArrayType(try_read_sized_array!(cursor, sid, size))
            }
            BinXmlValueType::HexInt32ArrayType => {
                BinXmlValue::HexInt32ArrayType(try_read_sized_array!(cursor, hex32, size))
            }
            BinXmlValueType::HexInt64ArrayType => {
                BinXmlValue::HexInt64ArrayType(try_read_sized_array!(cursor, hex64, size))
            }
            // Fixed-size scalars fall back to the top-level decoder; the caller's
            // position correction covers any declared/actual size skew.
            _ => Self::deserialize_value_type(value_type, cursor, chunk, ansi_codec)?,
        };

        Ok(value)
    }

    /// The textual form used for XML content, attribute values, data items and
    /// message arguments. Arrays are joined with `", "`.
    pub fn as_display_string(&self) -> Cow<'_, str> {
        match self {
            BinXmlValue::NullType => Cow::Borrowed(""),
            BinXmlValue::StringType(s) => Cow::Borrowed(s.as_str()),
            BinXmlValue::AnsiStringType(s) => Cow::Borrowed(s.as_str()),
            BinXmlValue::Int8Type(num) => Cow::Owned(num.to_string()),
            BinXmlValue::UInt8Type(num) => Cow::Owned(num.to_string()),
            BinXmlValue::Int16Type(num) => Cow::Owned(num.to_string()),
            BinXmlValue::UInt16Type(num) => Cow::Owned(num.to_string()),
            BinXmlValue::Int32Type(num) => Cow::Owned(num.to_string()),
            BinXmlValue::UInt32Type(num) => Cow::Owned(num.to_string()),
            BinXmlValue::Int64Type(num) => Cow::Owned(num.to_string()),
            BinXmlValue::UInt64Type(num) => Cow::Owned(num.to_string()),
            BinXmlValue::Real32Type(num) => Cow::Owned(num.to_string()),
            BinXmlValue::Real64Type(num) => Cow::Owned(num.to_string()),
            BinXmlValue::BoolType(b) => Cow::Owned(b.to_string()),
            BinXmlValue::BinaryType(bytes) => Cow::Owned(to_hex_string(bytes)),
            BinXmlValue::GuidType(guid) => Cow::Owned(guid.to_string()),
            BinXmlValue::SizeTType(sz) => Cow::Owned(sz.to_string()),
            BinXmlValue::FileTimeType(tm) => Cow::Owned(format_utc(tm)),
            BinXmlValue::SysTimeType(tm) => Cow::Owned(format_utc(tm)),
            BinXmlValue::SidType(sid) => Cow::Owned(sid.to_string()),
            BinXmlValue::HexInt32Type(hex_string) => Cow::Borrowed(hex_string.as_str()),
            BinXmlValue::HexInt64Type(hex_string) => Cow::Borrowed(hex_string.as_str()),
            BinXmlValue::EvtHandle => Cow::Borrowed(""),
            BinXmlValue::EvtXml => Cow::Borrowed(""),
            // Embedded fragments are expanded before rendering; an unexpanded
            // fragment has no sensible textual form.
            BinXmlValue::BinXmlType(_) => Cow::Borrowed(""),
            BinXmlValue::StringArrayType(items) => Cow::Owned(items.join(", ")),
            BinXmlValue::Int8ArrayType(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::UInt8ArrayType(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::Int16ArrayType(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::UInt16ArrayType(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::Int32ArrayType(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::UInt32ArrayType(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::Int64ArrayType(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::UInt64ArrayType(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::Real32ArrayType(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::Real64ArrayType(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::BoolArrayType(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::GuidArrayType(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::FileTimeArrayType(items) => Cow::Owned(
                items
                    .iter()
                    .map(format_utc)
                    .collect::<Vec<String>>()
                    .join(", "),
            ),
            BinXmlValue::SysTimeArrayType(items) => Cow::Owned(
                items
                    .iter()
                    .map(format_utc)
                    .collect::<Vec<String>>()
                    .join(", "),
            ),
            BinXmlValue::SidArrayType(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::HexInt32ArrayType(items) => Cow::Owned(items.join(", ")),
            BinXmlValue::HexInt64ArrayType(items) => Cow::Owned(items.join(", ")),
        }
    }

    /// Element-wise textual forms. Scalars yield one element; arrays expand so
    /// message arguments can stay positionally aligned.
    pub fn as_arg_strings(&self) -> Vec<String> {
        match self {
            BinXmlValue::StringArrayType(items) => items.clone(),
            BinXmlValue::Int8ArrayType(items) => items.iter().map(|i| i.to_string()).collect(),
            BinXmlValue::UInt8ArrayType(items) => items.iter().map(|i| i.to_string()).collect(),
            BinXmlValue::Int16ArrayType(items) => items.iter().map(|i| i.to_string()).collect(),
            BinXmlValue::UInt16ArrayType(items) => items.iter().map(|i| i.to_string()).collect(),
            BinXmlValue::Int32ArrayType(items) => items.iter().map(|i| i.to_string()).collect(),
            BinXmlValue::UInt32ArrayType(items) => items.iter().map(|i| i.to_string()).collect(),
            BinXmlValue::Int64ArrayType(items) => items.iter().map(|i| i.to_string()).collect(),
            BinXmlValue::UInt64ArrayType(items) => items.iter().map(|i| i.to_string()).collect(),
            BinXmlValue::Real32ArrayType(items) => items.iter().map(|i| i.to_string()).collect(),
            BinXmlValue::Real64ArrayType(items) => items.iter().map(|i| i.to_string()).collect(),
            BinXmlValue::BoolArrayType(items) => items.iter().map(|i| i.to_string()).collect(),
            BinXmlValue::GuidArrayType(items) => items.iter().map(|g| g.to_string()).collect(),
            BinXmlValue::FileTimeArrayType(items) => items.iter().map(format_utc).collect(),
            BinXmlValue::SysTimeArrayType(items) => items.iter().map(format_utc).collect(),
            BinXmlValue::SidArrayType(items) => items.iter().map(|s| s.to_string()).collect(),
            BinXmlValue::HexInt32ArrayType(items) => items.clone(),
            BinXmlValue::HexInt64ArrayType(items) => items.clone(),
            other => vec![other.as_display_string().into_owned()],
        }
    }
}

fn borrow_bytes<'a>(
    cursor: &mut Cursor<&'a [u8]>,
    size: u64,
) -> DeserializationResult<&'a [u8]> {
    let position = cursor.position() as usize;
    let data = *cursor.get_ref();

    let bytes = position
        .checked_add(size as usize)
        .and_then(|end| data.get(position..end))
        .ok_or_else(|| DeserializationError::FailedToRead {
            offset: position as u64,
            t: "binary blob",
            source: std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
        })?;

    cursor
        .seek(SeekFrom::Current(size as i64))
        .map_err(DeserializationError::from)?;

    Ok(bytes)
}

fn to_hex_string(bytes: &[u8]) -> String {
    // Bytes are formatted as constant length of 2 with '0' padding.
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

fn to_delimited_list<N: ToString>(ns: &[N]) -> String {
    ns.iter()
        .map(|n| n.to_string())
        .collect::<Vec<String>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_renders_as_uppercase_hex() {
        let value = BinXmlValue::BinaryType(&[0xde, 0xad, 0x01]);
        assert_eq!(value.as_display_string(), "DEAD01");
    }

    #[test]
    fn test_hex_values_keep_their_prefix() {
        let value = BinXmlValue::HexInt64Type("0x8000000000000000".to_string());
        assert_eq!(value.as_display_string(), "0x8000000000000000");
    }

    #[test]
    fn test_arrays_join_with_comma_space() {
        let value = BinXmlValue::UInt16ArrayType(vec![1, 2, 3]);
        assert_eq!(value.as_display_string(), "1, 2, 3");
        assert_eq!(value.as_arg_strings(), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_sized_null_advances_by_declared_size() {
        use encoding::all::WINDOWS_1252;

        let data: &[u8] = &[0xaa; 8];
        let mut cursor = Cursor::new(data);

        let value = BinXmlValue::deserialize_sized_value_type(
            &BinXmlValueType::NullType,
            &mut cursor,
            None,
            6,
            WINDOWS_1252,
        )
        .unwrap();

        assert_eq!(value, BinXmlValue::NullType);
        assert_eq!(cursor.position(), 6);
    }
}
