use crate::ChunkOffset;
use crate::binxml::deserializer::BinXmlContext;
use crate::binxml::tokens::read_template_definition;
use crate::err::{DeserializationError, DeserializationResult};
use crate::model::deserialized::BinXmlTemplateDefinition;
use crate::string_cache::StringCache;
use crate::utils::ByteCursor;

use encoding::EncodingRef;
use hashbrown::HashMap;
use log::{debug, trace};
use std::rc::Rc;

/// Identifies a template within a chunk: where its definition starts, and the template id
/// (the first 32 bits of the template GUID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateKey {
    pub offset: ChunkOffset,
    pub id: u32,
}

pub type CachedTemplate = Rc<BinXmlTemplateDefinition>;

/// Chunk scoped table of template definitions.
///
/// A new cache is created for every chunk, so a reference to a template of another chunk never
/// resolves.
#[derive(Debug, Default)]
pub struct TemplateCache(HashMap<TemplateKey, CachedTemplate>);

impl TemplateCache {
    pub fn new() -> Self {
        TemplateCache(HashMap::new())
    }

    /// Loads every template reachable from the chunk header's template table, following the
    /// `next` links of each bucket.
    ///
    /// A definition that cannot be read is left out; instances referring to it fail to resolve.
    pub(crate) fn populate(
        data: &[u8],
        offsets: &[ChunkOffset],
        string_cache: &mut StringCache,
        ansi_codec: EncodingRef,
    ) -> Self {
        let mut definitions = Vec::new();
        let mut scratch = TemplateCache::new();
        let mut ctx = BinXmlContext::new(data, string_cache, &mut scratch, ansi_codec);

        for &offset in offsets.iter().filter(|&&offset| offset > 0) {
            let mut next = offset;

            while next > 0 {
                let table_offset = next;
                if definitions
                    .iter()
                    .any(|(key, _): &(TemplateKey, _)| key.offset == table_offset)
                {
                    break;
                }

                let definition = ByteCursor::with_pos(data, table_offset as usize)
                    .and_then(|mut cursor| read_template_definition(&mut cursor, &mut ctx));

                match definition {
                    Ok((id, definition)) => {
                        trace!(
                            "Next template will be at {}",
                            definition.header.next_template_offset
                        );
                        next = definition.header.next_template_offset;
                        definitions.push((
                            TemplateKey {
                                offset: table_offset,
                                id,
                            },
                            definition,
                        ));
                    }
                    Err(e) => {
                        debug!("failed to read template at offset {}: {}", table_offset, e);
                        break;
                    }
                }
            }
        }

        let mut cache = TemplateCache::new();
        for (key, definition) in definitions {
            cache.define(key.offset, key.id, Rc::new(definition));
        }
        cache
    }

    /// Inserts or replaces a definition. The last definition for a key wins.
    pub fn define(&mut self, offset: ChunkOffset, id: u32, template: CachedTemplate) {
        if self
            .0
            .insert(TemplateKey { offset, id }, template)
            .is_some()
        {
            trace!("template {:#010x} at {} was redefined", id, offset);
        }
    }

    pub fn resolve(&self, offset: ChunkOffset, id: u32) -> DeserializationResult<CachedTemplate> {
        self.0
            .get(&TemplateKey { offset, id })
            .cloned()
            .ok_or(DeserializationError::UnresolvedTemplate { offset, id })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::deserialized::{BinXmlTemplateDefinitionHeader, BinXmlToken};
    use pretty_assertions::assert_eq;
    use winstructs::guid::Guid;

    fn template(marker: usize) -> CachedTemplate {
        Rc::new(BinXmlTemplateDefinition {
            header: BinXmlTemplateDefinitionHeader {
                next_template_offset: 0,
                guid: Guid::from_buffer(&[0; 16]).unwrap(),
                data_size: 0,
            },
            tokens: vec![BinXmlToken::EndOfStream],
            slot_count: marker,
        })
    }

    #[test]
    fn test_last_definition_wins() {
        let mut cache = TemplateCache::new();
        cache.define(550, 0xdead, template(1));
        cache.define(550, 0xdead, template(2));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.resolve(550, 0xdead).unwrap().slot_count, 2);
    }

    #[test]
    fn test_key_is_offset_and_id() {
        let mut cache = TemplateCache::new();
        cache.define(550, 1, template(1));

        match cache.resolve(550, 2) {
            Err(DeserializationError::UnresolvedTemplate { offset, id }) => {
                assert_eq!(offset, 550);
                assert_eq!(id, 2);
            }
            other => panic!("expected UnresolvedTemplate, got {:?}", other),
        }
        assert!(cache.resolve(551, 1).is_err());
    }
}
