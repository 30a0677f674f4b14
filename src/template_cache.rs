use crate::binxml::tokens::read_template_definition;
use crate::err::DeserializationResult;

use crate::model::deserialized::BinXMLTemplateDefinition;
use crate::ChunkOffset;

use encoding::EncodingRef;
use log::{trace, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{Cursor, Seek, SeekFrom};
use std::rc::Rc;

pub type CachedTemplate<'chunk> = Rc<BinXMLTemplateDefinition<'chunk>>;

/// The per-chunk template table.
///
/// Populated eagerly by walking the bucket chains; resident templates found
/// mid-record and definitions referenced by offset before their bucket walk
/// are inserted on demand. Lookups use an independent cursor over the chunk
/// slab so the active parse position is never disturbed.
#[derive(Debug, Default)]
pub struct TemplateCache<'chunk>(RefCell<HashMap<ChunkOffset, CachedTemplate<'chunk>>>);

impl<'chunk> TemplateCache<'chunk> {
    pub fn new() -> Self {
        TemplateCache(RefCell::new(HashMap::new()))
    }

    pub fn populate(
        data: &'chunk [u8],
        offsets: &[ChunkOffset],
        ansi_codec: EncodingRef,
    ) -> DeserializationResult<Self> {
        let mut cache = HashMap::new();
        let mut cursor = Cursor::new(data);

        for &bucket_head in offsets.iter().filter(|&&offset| offset > 0) {
            let mut table_offset = bucket_head;

            loop {
                if table_offset == 0 || u64::from(table_offset) >= data.len() as u64 {
                    break;
                }
                if cache.contains_key(&table_offset) {
                    break;
                }

                cursor
                    .seek(SeekFrom::Start(u64::from(table_offset)))
                    .map_err(crate::err::DeserializationError::from)?;

                let definition = match read_template_definition(&mut cursor, None, ansi_codec) {
                    Ok(definition) => definition,
                    Err(e) => {
                        // A broken chain entry only degrades templates reached
                        // through it; the rest of the chunk still parses.
                        warn!("skipping template chain at offset {table_offset}: {e}");
                        break;
                    }
                };

                let next_template_offset = definition.header.next_template_offset;
                cache.insert(table_offset, Rc::new(definition));

                trace!("Next template will be at {next_template_offset}");

                if next_template_offset == 0 || next_template_offset == table_offset {
                    break;
                }

                table_offset = next_template_offset;
            }
        }

        Ok(TemplateCache(RefCell::new(cache)))
    }

    pub fn contains(&self, offset: ChunkOffset) -> bool {
        self.0.borrow().contains_key(&offset)
    }

    pub fn get(&self, offset: ChunkOffset) -> Option<CachedTemplate<'chunk>> {
        self.0.borrow().get(&offset).cloned()
    }

    pub fn insert(&self, offset: ChunkOffset, definition: CachedTemplate<'chunk>) {
        self.0.borrow_mut().insert(offset, definition);
    }

    /// Returns the cached definition at `offset`, parsing it on demand with a
    /// fresh cursor when the bucket walk did not cover it.
    pub fn get_or_load(
        &self,
        data: &'chunk [u8],
        offset: ChunkOffset,
        ansi_codec: EncodingRef,
    ) -> Option<CachedTemplate<'chunk>> {
        if let Some(hit) = self.get(offset) {
            return Some(hit);
        }

        if u64::from(offset) >= data.len() as u64 {
            warn!("template offset {offset} is out of chunk bounds");
            return None;
        }

        let mut cursor = Cursor::new(data);
        cursor.seek(SeekFrom::Start(u64::from(offset))).ok()?;

        match read_template_definition(&mut cursor, None, ansi_codec) {
            Ok(definition) => {
                let cached = Rc::new(definition);
                self.insert(offset, Rc::clone(&cached));
                Some(cached)
            }
            Err(e) => {
                warn!("failed to load template definition at chunk offset {offset}: {e}");
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
