use crate::ChunkOffset;
use crate::binxml::name::BinXmlName;

use hashbrown::HashMap;
use std::sync::Arc;

/// Names decoded so far in one chunk, keyed by the chunk offset they were defined at.
#[derive(Debug, Default)]
pub struct StringCache {
    names: HashMap<ChunkOffset, Arc<BinXmlName>, ahash::RandomState>,
    decodes: HashMap<ChunkOffset, u32, ahash::RandomState>,
}

impl StringCache {
    pub fn new() -> Self {
        StringCache::default()
    }

    pub fn get_cached_string(&self, offset: ChunkOffset) -> Option<Arc<BinXmlName>> {
        self.names.get(&offset).cloned()
    }

    pub(crate) fn insert(&mut self, offset: ChunkOffset, name: Arc<BinXmlName>) {
        *self.decodes.entry(offset).or_insert(0) += 1;
        self.names.insert(offset, name);
    }

    /// How many times the string at `offset` was decoded from bytes.
    pub fn decode_count(&self, offset: ChunkOffset) -> u32 {
        self.decodes.get(&offset).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
