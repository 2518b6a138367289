use crate::string_cache::StringCache;
use crate::template_cache::TemplateCache;

/// Memoization state for a single chunk.
///
/// Offsets inside binxml are relative to the chunk, so this must never outlive or be shared
/// between chunks. It is handed by `&mut` to every decode call of its chunk.
#[derive(Debug, Default)]
pub struct ChunkCache {
    pub strings: StringCache,
    pub templates: TemplateCache,
}

impl ChunkCache {
    pub fn new() -> Self {
        ChunkCache::default()
    }
}
