use crate::ChunkOffset;
use crate::err::DeserializationResult as Result;
use crate::string_cache::StringCache;
use crate::utils::ByteCursor;

use log::trace;
use std::fmt;
use std::sync::Arc;

/// An element, attribute or entity name.
///
/// Names are shared between every record of a chunk that refers to them, so cloning is cheap.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub struct BinXmlName(Arc<str>);

impl fmt::Display for BinXmlName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BinXmlName {
    fn from(s: &str) -> Self {
        BinXmlName(Arc::from(s))
    }
}

impl From<String> for BinXmlName {
    fn from(s: String) -> Self {
        BinXmlName(Arc::from(s))
    }
}

/// The header that precedes every name definition in a chunk.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) struct BinXmlNameLink {
    pub next_string: Option<ChunkOffset>,
    pub hash: u16,
}

impl BinXmlNameLink {
    pub fn from_cursor(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let next_string = cursor.u32_named("next_string")?;
        let hash = cursor.u16_named("name_hash")?;

        Ok(BinXmlNameLink {
            next_string: if next_string > 0 {
                Some(next_string)
            } else {
                None
            },
            hash,
        })
    }
}

impl BinXmlName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reads a full name definition (link, then a NUL terminated, length prefixed string).
    pub(crate) fn definition_from_cursor(
        cursor: &mut ByteCursor<'_>,
    ) -> Result<(BinXmlNameLink, Self)> {
        let link = BinXmlNameLink::from_cursor(cursor)?;
        let name = cursor.len_prefixed_utf16_string(true, "name")?;
        Ok((link, BinXmlName::from(name)))
    }

    /// Reads a name reference from a token payload.
    ///
    /// A name whose offset is the current position is defined inline and is consumed from the
    /// stream. Otherwise the name is looked up in the chunk's string cache and, failing that, read
    /// from its definition elsewhere in the chunk.
    pub(crate) fn from_binxml_cursor(
        cursor: &mut ByteCursor<'_>,
        chunk_data: &[u8],
        cache: &mut StringCache,
    ) -> Result<Self> {
        let name_offset = cursor.u32_named("name_offset")?;

        if name_offset as usize == cursor.pos() {
            trace!("Offset `0x{:08x}`: inline name", name_offset);
            let (_, name) = Self::definition_from_cursor(cursor)?;
            cache.insert(name_offset, name.clone());
            return Ok(name);
        }

        if let Some(name) = cache.get(name_offset) {
            return Ok(name.clone());
        }

        trace!("Offset `0x{:08x}`: reading uncached name", name_offset);
        let mut name_cursor = ByteCursor::with_pos(chunk_data, name_offset as usize)?;
        let (_, name) = Self::definition_from_cursor(&mut name_cursor)?;
        cache.insert(name_offset, name.clone());
        Ok(name)
    }
}
