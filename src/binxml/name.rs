use crate::ChunkOffset;
use crate::chunk_cache::ChunkCache;
use crate::err::{DeserializationError, DeserializationResult as Result, ReferenceKind};
use crate::utils::ByteCursor;

use log::trace;
use std::fmt;
use std::sync::Arc;

/// An interned name string, shared by back-reference within a chunk.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BinXmlName {
    /// Chunk offset the string structure was defined at.
    pub offset: ChunkOffset,
    pub link: BinXmlNameLink,
    str: String,
    char_count: u16,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BinXmlNameLink {
    pub next_string: Option<ChunkOffset>,
    pub hash: u16,
}

impl BinXmlNameLink {
    pub fn from_cursor(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let next_string = cursor.u32_named("next string offset")?;
        let hash = cursor.u16_named("name hash")?;

        Ok(BinXmlNameLink {
            next_string: if next_string > 0 {
                Some(next_string)
            } else {
                None
            },
            hash,
        })
    }

    pub fn data_size() -> usize {
        6
    }
}

impl BinXmlName {
    #[cfg(test)]
    pub(crate) fn from_str(s: &str) -> Self {
        BinXmlName {
            offset: 0,
            link: BinXmlNameLink {
                next_string: None,
                hash: 0,
            },
            str: s.to_owned(),
            char_count: s.encode_utf16().count() as u16,
        }
    }

    /// Reads the string structure that starts at the cursor's position.
    pub fn from_cursor(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let offset = cursor.pos() as ChunkOffset;
        let link = BinXmlNameLink::from_cursor(cursor)?;
        let char_count = cursor.u16_named("name length")?;
        let str = cursor.utf16_by_char_count(usize::from(char_count), "name")?;
        // nul terminator
        cursor.u16_named("name terminator")?;

        Ok(BinXmlName {
            offset,
            link,
            str,
            char_count,
        })
    }

    /// Size of the encoded structure, including link, length prefix and terminator.
    pub fn data_size(&self) -> usize {
        BinXmlNameLink::data_size() + 2 + usize::from(self.char_count) * 2 + 2
    }

    pub fn as_str(&self) -> &str {
        &self.str
    }
}

impl fmt::Display for BinXmlName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.str)
    }
}

/// Reads a name pointer and resolves it.
///
/// A pointer to the current position means the string is defined inline, right here.
/// Any other pointer must refer to a string already decoded in this chunk.
pub(crate) fn read_name(
    cursor: &mut ByteCursor<'_>,
    cache: &mut ChunkCache,
) -> Result<Arc<BinXmlName>> {
    let pointer_offset = cursor.position();
    let name_offset = cursor.u32_named("name offset")?;

    if name_offset as usize != cursor.pos() {
        return cache
            .strings
            .get_cached_string(name_offset)
            .ok_or(DeserializationError::DanglingReference {
                kind: ReferenceKind::String,
                target: name_offset,
                offset: pointer_offset,
            });
    }

    if let Some(name) = cache.strings.get_cached_string(name_offset) {
        trace!("Offset {name_offset}: skipping already cached name `{name}`");
        cursor.skip(name.data_size());
        return Ok(name);
    }

    let name = Arc::new(BinXmlName::from_cursor(cursor)?);
    trace!("Offset {name_offset}: name `{name}`");
    cache.strings.insert(name_offset, Arc::clone(&name));
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::err::ErrorKind;
    use pretty_assertions::assert_eq;

    fn inline_name(offset: u32, s: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(offset + 4).to_le_bytes());
        out.extend_from_slice(&0_u32.to_le_bytes());
        out.extend_from_slice(&0xbeef_u16.to_le_bytes());
        out.extend_from_slice(&(s.encode_utf16().count() as u16).to_le_bytes());
        for c in s.encode_utf16() {
            out.extend_from_slice(&c.to_le_bytes());
        }
        out.extend_from_slice(&[0, 0]);
        out
    }

    #[test]
    fn test_inline_then_back_reference() {
        let mut data = inline_name(0, "Event");
        let first_len = data.len();
        // back reference to offset 4
        data.extend_from_slice(&4_u32.to_le_bytes());

        let mut cache = ChunkCache::default();
        let mut cursor = ByteCursor::new(&data);

        let first = read_name(&mut cursor, &mut cache).unwrap();
        assert_eq!(cursor.pos(), first_len);
        assert_eq!(first.as_str(), "Event");
        assert_eq!(first.link.hash, 0xbeef);
        assert_eq!(first.data_size(), first_len - 4);

        let second = read_name(&mut cursor, &mut cache).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.strings.decode_count(4), 1);
        assert_eq!(cursor.pos(), data.len());
    }

    #[test]
    fn test_dangling_reference() {
        let data = 0x200_u32.to_le_bytes();
        let mut cache = ChunkCache::default();
        let err = read_name(&mut ByteCursor::new(&data), &mut cache).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DanglingReference);
        assert_eq!(
            err,
            DeserializationError::DanglingReference {
                kind: ReferenceKind::String,
                target: 0x200,
                offset: 0,
            }
        );
    }
}
