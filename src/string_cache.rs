use crate::binxml::name::BinXmlName;
use crate::err::DeserializationResult;
use crate::ChunkOffset;

use log::warn;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{Cursor, Seek, SeekFrom};
use std::rc::Rc;

pub type StringHash = u16;

#[derive(Debug, Clone)]
pub struct CachedString {
    pub name: Rc<str>,
    pub hash: StringHash,
    pub offset: ChunkOffset,
}

/// The per-chunk interned string table.
///
/// Populated eagerly from the 64 bucket heads, and on demand for offsets first
/// seen mid-parse (inline names). On-demand loads always use an independent
/// cursor over the chunk slab, so the active parse position is never disturbed.
#[derive(Debug, Default)]
pub struct StringCache(RefCell<HashMap<ChunkOffset, CachedString>>);

impl StringCache {
    pub fn populate(
        data: &[u8],
        offsets: &[ChunkOffset],
        limit: ChunkOffset,
    ) -> DeserializationResult<Self> {
        let mut cache = HashMap::new();
        let mut cursor = Cursor::new(data);

        for &bucket_head in offsets.iter().filter(|&&offset| offset > 0) {
            let mut offset = bucket_head;

            loop {
                if offset == 0 || offset >= limit {
                    break;
                }
                // An offset we have already seen means the chain loops.
                if cache.contains_key(&offset) {
                    break;
                }

                cursor
                    .seek(SeekFrom::Start(u64::from(offset)))
                    .map_err(crate::err::DeserializationError::from)?;

                let (name, hash, next_string) = BinXmlName::from_stream_with_link(&mut cursor)?;
                cache.insert(
                    offset,
                    CachedString {
                        name: Rc::from(name.into_string()),
                        hash,
                        offset,
                    },
                );

                match next_string {
                    Some(next) => offset = next,
                    None => break,
                }
            }
        }

        Ok(StringCache(RefCell::new(cache)))
    }

    /// Looks up an interned string by chunk offset, loading and caching it when
    /// the offset was not part of any bucket chain (inline names).
    pub fn get_or_load(&self, data: &[u8], offset: ChunkOffset) -> Option<CachedString> {
        if let Some(hit) = self.0.borrow().get(&offset) {
            return Some(hit.clone());
        }

        let mut cursor = Cursor::new(data);
        cursor.seek(SeekFrom::Start(u64::from(offset))).ok()?;

        match BinXmlName::from_stream(&mut cursor) {
            Ok((name, hash)) => {
                let cached = CachedString {
                    name: Rc::from(name.into_string()),
                    hash,
                    offset,
                };
                self.0.borrow_mut().insert(offset, cached.clone());
                Some(cached)
            }
            Err(e) => {
                warn!("failed to load name string at chunk offset {offset}: {e}");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
