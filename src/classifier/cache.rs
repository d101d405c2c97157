//! LRU cache of classifier results keyed by sample id, avoiding re-running
//! the weighted-merge lookup when a sample is revisited by the timeline
//! processor.

use lru::LruCache;
use std::num::NonZeroUsize;

use crate::ids::SampleId;
use crate::model::activity::ProbabilityVector;

pub struct ClassifierCache {
    inner: LruCache<SampleId, ProbabilityVector>,
}

impl ClassifierCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self { inner: LruCache::new(capacity) }
    }

    pub fn get(&mut self, id: &SampleId) -> Option<ProbabilityVector> {
        self.inner.get(id).copied()
    }

    pub fn put(&mut self, id: SampleId, probs: ProbabilityVector) {
        self.inner.put(id, probs);
    }

    pub fn invalidate(&mut self, id: &SampleId) {
        self.inner.pop(id);
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
