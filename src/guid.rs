use crate::err::{DeserializationError, DeserializationResult};

use byteorder::{LittleEndian, ReadBytesExt};
use std::fmt::{self, Debug, Display, Write};
use std::io::Cursor;

/// A Windows GUID. The first three groups are stored little-endian,
/// the trailing eight bytes in order.
#[derive(PartialOrd, PartialEq, Eq, Hash, Clone)]
pub struct Guid {
    data1: u32,
    data2: u16,
    data3: u16,
    data4: [u8; 8],
}

impl Guid {
    pub fn new(data1: u32, data2: u16, data3: u16, data4: &[u8]) -> Guid {
        let mut data4_owned = [0; 8];
        data4_owned.clone_from_slice(&data4[0..8]);
        Guid {
            data1,
            data2,
            data3,
            data4: data4_owned,
        }
    }

    pub fn from_cursor(cursor: &mut Cursor<&[u8]>) -> DeserializationResult<Guid> {
        let err = |e, offset| DeserializationError::FailedToRead {
            offset,
            t: "guid",
            source: e,
        };

        let data1 = cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| err(e, cursor.position()))?;
        let data2 = cursor
            .read_u16::<LittleEndian>()
            .map_err(|e| err(e, cursor.position()))?;
        let data3 = cursor
            .read_u16::<LittleEndian>()
            .map_err(|e| err(e, cursor.position()))?;
        let mut data4 = [0; 8];
        std::io::Read::read_exact(cursor, &mut data4).map_err(|e| err(e, cursor.position()))?;

        Ok(Guid::new(data1, data2, data3, &data4))
    }

    /// The canonical braced form, e.g. `{B7F1DD79-79A6-4B09-B371-076FB5B41069}`.
    pub fn to_string(&self) -> String {
        // `format!` would extend the string multiple times,
        // but we know ahead of time exactly how much space we need.
        let mut s = String::with_capacity(38);

        write!(
            &mut s,
            "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7]
        )
        .expect("writing to a preallocated buffer cannot fail");

        s
    }
}

impl Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_string())
    }
}

impl Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formats_a_guid_in_braced_uppercase_form() {
        let bytes: &[u8] = &[
            0x79, 0xDD, 0xF1, 0xB7, 0xA6, 0x79, 0x09, 0x4B, 0xB3, 0x71, 0x07, 0x6F, 0xB5, 0xB4,
            0x10, 0x69,
        ];
        let mut cursor = Cursor::new(bytes);
        let guid = Guid::from_cursor(&mut cursor).unwrap();

        assert_eq!(
            guid.to_string(),
            "{B7F1DD79-79A6-4B09-B371-076FB5B41069}"
        );
        assert_eq!(cursor.position(), 16);
    }
}
