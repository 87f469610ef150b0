use crate::config::UNKNOWN_NAME;
use crate::error::Result;
use crate::store::{Identity, IdentityStore, Resolution};
use facetrack_vision::Embedding;

/// Index and distance of the identity closest to `probe`.
///
/// Full scan; on equal distances the earliest inserted identity wins.
/// Identities at a NaN distance are skipped.
pub fn nearest(identities: &[Identity], probe: &Embedding) -> Option<(usize, f32)> {
    identities
        .iter()
        .map(|identity| identity.embedding.distance(probe))
        .enumerate()
        .filter(|(_, dist)| !dist.is_nan())
        .fold(None, |best, (idx, dist)| match best {
            Some((_, best_dist)) if best_dist <= dist => best,
            _ => Some((idx, dist)),
        })
}

/// The matching policy shared by every workflow.
#[derive(Debug, Clone, Copy)]
pub struct Matcher {
    tolerance: f32,
}

impl Matcher {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    /// Finds the identity for `embedding`. On a miss, registers a new identity
    /// under the placeholder name when `create_if_missing` is set.
    pub fn resolve(
        &self,
        store: &IdentityStore,
        embedding: &Embedding,
        create_if_missing: bool,
    ) -> Result<Option<Resolution>> {
        if create_if_missing {
            self.identify_or_create(store, embedding, UNKNOWN_NAME)
                .map(Some)
        } else {
            Ok(self.identify(store, embedding)?.map(Resolution::Existing))
        }
    }

    pub fn identify(&self, store: &IdentityStore, embedding: &Embedding) -> Result<Option<Identity>> {
        store.find(embedding, self.tolerance)
    }

    /// Match, and on a miss register `embedding` as `name`, in one critical section.
    pub fn identify_or_create(
        &self,
        store: &IdentityStore,
        embedding: &Embedding,
        name: &str,
    ) -> Result<Resolution> {
        store.match_or_add(embedding.clone(), name, self.tolerance)
    }
}
