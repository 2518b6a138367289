use crate::ChunkOffset;
use crate::model::deserialized::TemplateDefinition;

use hashbrown::HashMap;
use std::sync::Arc;

/// Template definitions decoded so far in one chunk, keyed by their defining offset.
#[derive(Debug, Default)]
pub struct TemplateCache {
    templates: HashMap<ChunkOffset, Arc<TemplateDefinition>, ahash::RandomState>,
    decodes: HashMap<ChunkOffset, u32, ahash::RandomState>,
}

impl TemplateCache {
    pub fn new() -> Self {
        TemplateCache::default()
    }

    pub fn get_template(&self, offset: ChunkOffset) -> Option<Arc<TemplateDefinition>> {
        self.templates.get(&offset).cloned()
    }

    pub(crate) fn insert(&mut self, offset: ChunkOffset, template: Arc<TemplateDefinition>) {
        *self.decodes.entry(offset).or_insert(0) += 1;
        self.templates.insert(offset, template);
    }

    /// How many times the template at `offset` was decoded from bytes.
    pub fn decode_count(&self, offset: ChunkOffset) -> u32 {
        self.decodes.get(&offset).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
