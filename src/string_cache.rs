use crate::ChunkOffset;
use crate::binxml::name::BinXmlName;
use crate::err::DeserializationResult;
use crate::utils::ByteCursor;

use hashbrown::HashMap;
use log::trace;

/// Chunk scoped table of element and attribute names, keyed by the chunk offset of their
/// definition.
#[derive(Debug, Default)]
pub struct StringCache(HashMap<ChunkOffset, BinXmlName>);

impl StringCache {
    /// Loads every name reachable from the chunk header's common string table.
    pub fn populate(data: &[u8], offsets: &[ChunkOffset]) -> DeserializationResult<Self> {
        let mut cache = HashMap::new();

        for &offset in offsets.iter().filter(|&&offset| offset > 0) {
            let mut next = Some(offset);

            while let Some(string_position) = next {
                // Guards against a `next` chain that loops back on itself.
                if cache.contains_key(&string_position) {
                    break;
                }

                let mut cursor = ByteCursor::with_pos(data, string_position as usize)?;
                let (link, name) = BinXmlName::definition_from_cursor(&mut cursor)?;
                cache.insert(string_position, name);

                trace!("\tNext string will be at {:?}", link.next_string);
                next = link.next_string;
            }
        }

        Ok(StringCache(cache))
    }

    pub fn get(&self, offset: ChunkOffset) -> Option<&BinXmlName> {
        self.0.get(&offset)
    }

    pub(crate) fn insert(&mut self, offset: ChunkOffset, name: BinXmlName) {
        self.0.insert(offset, name);
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
    use pretty_assertions::assert_eq;

    fn push_name(out: &mut Vec<u8>, next: u32, name: &str) {
        out.extend(next.to_le_bytes());
        out.extend(0_u16.to_le_bytes());
        out.extend((name.encode_utf16().count() as u16).to_le_bytes());
        out.extend(name.encode_utf16().flat_map(u16::to_le_bytes));
        out.extend([0, 0]);
    }

    #[test]
    fn test_populate_follows_next_links() {
        let mut data = vec![0_u8; 16];
        // "Data" at 16 links to "Name" right after it.
        let second = 16 + 4 + 2 + 2 + 8 + 2;
        push_name(&mut data, second as u32, "Data");
        push_name(&mut data, 0, "Name");

        let cache = StringCache::populate(&data, &[0, 16, 0]).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(16).map(BinXmlName::as_str), Some("Data"));
        assert_eq!(
            cache.get(second as u32).map(BinXmlName::as_str),
            Some("Name")
        );
    }

    #[test]
    fn test_populate_stops_on_cycles() {
        let mut data = vec![0_u8; 8];
        push_name(&mut data, 8, "Loop");

        let cache = StringCache::populate(&data, &[8]).unwrap();
        assert_eq!(cache.len(), 1);
    }
}
