use crate::err::{DeserializationError, DeserializationResult};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::fmt::{self, Debug, Display, Write};
use std::io::Cursor;

/// A Windows security identifier (NT SID).
///
/// The identifier authority is a 6-byte big-endian quantity; for every
/// authority Windows has ever defined only the low 4 bytes are significant.
#[derive(PartialOrd, PartialEq, Eq, Clone)]
pub struct Sid {
    revision: u8,
    authority: u32,
    sub_authorities: Vec<u32>,
}

impl Sid {
    pub fn from_cursor(cursor: &mut Cursor<&[u8]>) -> DeserializationResult<Sid> {
        let err = |e, offset| DeserializationError::FailedToRead {
            offset,
            t: "sid",
            source: e,
        };

        let revision = cursor.read_u8().map_err(|e| err(e, cursor.position()))?;
        let sub_authority_count = cursor.read_u8().map_err(|e| err(e, cursor.position()))?;

        // The authority is kept in big-endian order, unlike everything around it.
        let authority_high = cursor
            .read_u16::<BigEndian>()
            .map_err(|e| err(e, cursor.position()))?;
        let authority_low = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| err(e, cursor.position()))?;

        if authority_high != 0 {
            log::warn!(
                "SID identifier authority has non-zero high bytes ({authority_high:#06x}), truncating"
            );
        }

        let mut sub_authorities = Vec::with_capacity(sub_authority_count as usize);
        for _ in 0..sub_authority_count {
            sub_authorities.push(
                cursor
                    .read_u32::<LittleEndian>()
                    .map_err(|e| err(e, cursor.position()))?,
            )
        }

        Ok(Sid {
            revision,
            authority: authority_low,
            sub_authorities,
        })
    }

    pub fn to_string(&self) -> String {
        let mut repr = String::new();

        write!(repr, "S-{}-{}", self.revision, self.authority)
            .expect("Writing to a String cannot fail");

        for sub_authority in self.sub_authorities.iter() {
            write!(repr, "-{sub_authority}").expect("Writing to a String cannot fail");
        }

        repr
    }
}

impl Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_string())
    }
}

impl Debug for Sid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formats_the_local_system_sid() {
        // S-1-5-18
        let bytes: &[u8] = &[
            0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0x12, 0x00, 0x00, 0x00,
        ];
        let mut cursor = Cursor::new(bytes);
        let sid = Sid::from_cursor(&mut cursor).unwrap();

        assert_eq!(sid.to_string(), "S-1-5-18");
        assert_eq!(cursor.position(), 12);
    }

    #[test]
    fn test_formats_a_domain_user_sid() {
        // S-1-5-21-1004336348-1177238915-682003330-512
        let mut bytes = vec![0x01, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05];
        for sub in [21u32, 1_004_336_348, 1_177_238_915, 682_003_330, 512] {
            bytes.extend_from_slice(&sub.to_le_bytes());
        }

        let as_slice = bytes.as_slice();
        let mut cursor = Cursor::new(as_slice);
        let sid = Sid::from_cursor(&mut cursor).unwrap();

        assert_eq!(
            sid.to_string(),
            "S-1-5-21-1004336348-1177238915-682003330-512"
        );
    }
}
