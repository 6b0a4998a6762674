use std::sync::Arc;

use parking_lot::RwLock;

use crate::detected_points::FeatureSet;

/// A registered reference: its features and the size of the image they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub features: FeatureSet,
    pub img_w_h: (u32, u32),
}

/// Single-slot holder of the current reference.
///
/// Writers swap a fully built `Arc<Reference>` in one step, readers clone the
/// `Arc` and work on that snapshot, so a reader never sees a half-replaced
/// reference.
#[derive(Debug, Default)]
pub struct ReferenceStore {
    slot: RwLock<Option<Arc<Reference>>>,
}

impl ReferenceStore {
    pub fn new() -> ReferenceStore {
        ReferenceStore::default()
    }

    pub fn replace(&self, reference: Reference) {
        let next = Arc::new(reference);
        let previous = self.slot.write().replace(next);
        // dropped outside the lock
        drop(previous);
    }

    pub fn current(&self) -> Option<Arc<Reference>> {
        self.slot.read().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.read().is_some()
    }
}
