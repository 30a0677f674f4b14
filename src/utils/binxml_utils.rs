use crate::err::{DeserializationError, DeserializationResult};

use byteorder::ReadBytesExt;
use encoding::all::UTF_16LE;
use encoding::{DecoderTrap, Encoding, EncodingRef};
use std::borrow::Cow;
use std::io::{Cursor, Seek, SeekFrom};

/// Reads a `u16` character count followed by that many UTF-16LE code units.
/// The NUL terminator, when present, is consumed but never part of the count.
pub fn read_len_prefixed_utf16_string(
    stream: &mut Cursor<&[u8]>,
    is_null_terminated: bool,
) -> DeserializationResult<Option<String>> {
    let expected_number_of_characters = try_read!(stream, u16, "utf-16 string length")?;
    let needed_bytes = u64::from(expected_number_of_characters) * 2;

    let s = read_utf16_by_size(stream, needed_bytes)?;

    if is_null_terminated {
        let _ = try_read!(stream, u16, "utf-16 string terminator")?;
    }

    Ok(s)
}

/// Decodes exactly `size` bytes as UTF-16LE, stripping trailing NUL code units.
pub fn read_utf16_by_size(
    stream: &mut Cursor<&[u8]>,
    size: u64,
) -> DeserializationResult<Option<String>> {
    if size == 0 {
        return Ok(None);
    }

    let offset = stream.position();
    let bytes = take_bytes(stream, size as usize)?;

    let mut units = bytes;
    while units.len() >= 2 && units[units.len() - 2] == 0 && units[units.len() - 1] == 0 {
        units = &units[..units.len() - 2];
    }

    if units.is_empty() {
        return Ok(Some(String::new()));
    }

    UTF_16LE
        .decode(units, DecoderTrap::Strict)
        .map(Some)
        .map_err(|_| DeserializationError::FailedToDecodeUTF16String { offset })
}

/// Decodes a `size`-byte UTF-16LE blob of NUL-separated strings.
/// Trailing NULs are removed before the split, so no spurious empty tail is produced.
pub fn read_utf16_string_array(
    stream: &mut Cursor<&[u8]>,
    size: u64,
) -> DeserializationResult<Vec<String>> {
    if size == 0 {
        return Ok(Vec::new());
    }

    let offset = stream.position();
    let bytes = take_bytes(stream, size as usize)?;

    let mut units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    while units.last() == Some(&0) {
        units.pop();
    }

    units
        .split(|&unit| unit == 0)
        .map(|chunk| {
            String::from_utf16(chunk)
                .map_err(|_| DeserializationError::FailedToDecodeUTF16String { offset })
        })
        .collect()
}

/// Decodes exactly `size` bytes with the configured ANSI codec, stripping a trailing NUL.
pub fn read_ansi_string_by_size(
    stream: &mut Cursor<&[u8]>,
    size: u64,
    ansi_codec: EncodingRef,
) -> DeserializationResult<String> {
    if size == 0 {
        return Ok(String::new());
    }

    let offset = stream.position();
    let bytes = take_bytes(stream, size as usize)?;

    let mut decoded = ansi_codec
        .decode(bytes, DecoderTrap::Strict)
        .map_err(|_| DeserializationError::FailedToDecodeANSIString {
            encoding: ansi_codec.name(),
            offset,
        })?;

    while decoded.ends_with('\0') {
        decoded.pop();
    }

    Ok(decoded)
}

/// Removes characters XML 1.0 cannot carry: C0 controls except HT/LF/CR,
/// DEL, and the C1 control block.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    fn is_stripped(c: char) -> bool {
        (c < '\u{20}' && c != '\t' && c != '\n' && c != '\r') || ('\u{7f}'..='\u{9f}').contains(&c)
    }

    if s.chars().any(is_stripped) {
        Cow::Owned(s.chars().filter(|c| !is_stripped(*c)).collect())
    } else {
        Cow::Borrowed(s)
    }
}

fn take_bytes<'a>(stream: &mut Cursor<&'a [u8]>, size: usize) -> DeserializationResult<&'a [u8]> {
    let position = stream.position() as usize;
    let data = *stream.get_ref();

    let bytes = position
        .checked_add(size)
        .and_then(|end| data.get(position..end))
        .ok_or_else(|| DeserializationError::FailedToRead {
            offset: position as u64,
            t: "byte run",
            source: std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
        })?;

    stream
        .seek(SeekFrom::Current(size as i64))
        .map_err(DeserializationError::from)?;

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16le(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect()
    }

    #[test]
    fn test_reads_a_len_prefixed_string() {
        let mut bytes = vec![5, 0];
        bytes.extend(utf16le("Event"));

        let as_slice = bytes.as_slice();
        let mut cursor = Cursor::new(as_slice);

        assert_eq!(
            read_len_prefixed_utf16_string(&mut cursor, false).unwrap(),
            Some("Event".to_string())
        );
        assert_eq!(cursor.position(), 12);
    }

    #[test]
    fn test_sized_read_strips_trailing_nuls() {
        let mut bytes = utf16le("value");
        bytes.extend_from_slice(&[0, 0, 0, 0]);

        let as_slice = bytes.as_slice();
        let mut cursor = Cursor::new(as_slice);
        let size = as_slice.len() as u64;

        assert_eq!(
            read_utf16_by_size(&mut cursor, size).unwrap(),
            Some("value".to_string())
        );
        assert_eq!(cursor.position(), size);
    }

    #[test]
    fn test_string_array_has_no_spurious_empty_tail() {
        let mut bytes = utf16le("one");
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend(utf16le("two"));
        bytes.extend_from_slice(&[0, 0, 0, 0]);

        let as_slice = bytes.as_slice();
        let mut cursor = Cursor::new(as_slice);
        let size = as_slice.len() as u64;

        assert_eq!(
            read_utf16_string_array(&mut cursor, size).unwrap(),
            vec!["one".to_string(), "two".to_string()]
        );
    }

    #[test]
    fn test_strips_control_characters() {
        assert_eq!(strip_control_chars("a\u{1}b\tc\u{9c}"), "ab\tc");
        assert!(matches!(strip_control_chars("plain"), Cow::Borrowed(_)));
    }
}
