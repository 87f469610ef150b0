//! Frame-to-frame continuity for one video session.
//!
//! Detection is cheap next to alignment, encoding and matching, so when the
//! face boxes of a frame sit where they were in the previous frame the cached
//! identities are reused instead of recomputed. Reuse is by index: it assumes
//! the detector reports faces in a stable order. Two faces that swap places
//! without changing the face count keep each other's identities until a
//! recompute is triggered.

use facetrack_vision::BoundingBox;
use serde::Serialize;

use crate::config::{TrackingConfig, IGNORED_NAME};
use crate::store::{IdentityId, Resolution};

/// Why the quality gate discarded a face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum DiscardReason {
    NotForward { pose_offset: f32 },
    LowQuality { score: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Outcome {
    /// Matched an identity already in the catalog.
    Matched,
    /// Registered as a new identity under the placeholder name.
    Created,
    Ignored(DiscardReason),
}

/// Resolved outcome for one detected face.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub identity_id: Option<IdentityId>,
    pub display_name: String,
    pub outcome: Outcome,
}

impl Observation {
    pub fn ignored(reason: DiscardReason) -> Self {
        Self {
            identity_id: None,
            display_name: IGNORED_NAME.to_string(),
            outcome: Outcome::Ignored(reason),
        }
    }

    pub fn resolved(resolution: &Resolution) -> Self {
        let identity = resolution.identity();
        Self {
            identity_id: Some(identity.id),
            display_name: identity.name.clone(),
            outcome: if resolution.is_created() {
                Outcome::Created
            } else {
                Outcome::Matched
            },
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self.outcome, Outcome::Ignored(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedFace {
    pub bbox: BoundingBox,
    pub observation: Observation,
}

#[derive(Debug, Clone, Default)]
pub struct ContinuityTracker {
    config: TrackingConfig,
    last: Vec<TrackedFace>,
}

impl ContinuityTracker {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            last: Vec::new(),
        }
    }

    /// Whether `boxes` need full processing rather than reusing the last frame.
    ///
    /// An empty frame never needs it. Otherwise a changed face count, a face
    /// the gate ignored last time, or a box whose centre is further than the
    /// distance threshold from every previous centre forces a recompute.
    pub fn should_recompute(&self, boxes: &[BoundingBox]) -> bool {
        if boxes.is_empty() {
            return false;
        }
        if boxes.len() != self.last.len() {
            return true;
        }
        if self.last.iter().any(|face| face.observation.is_ignored()) {
            return true;
        }
        boxes.iter().any(|bbox| {
            self.last
                .iter()
                .all(|face| face.bbox.center_distance(bbox) > self.config.distance_threshold)
        })
    }

    /// Cached observations in detector order. An identity created on an
    /// earlier frame is reported as matched from then on.
    pub fn reuse(&self) -> Vec<Observation> {
        self.last
            .iter()
            .map(|face| {
                let mut observation = face.observation.clone();
                if observation.outcome == Outcome::Created {
                    observation.outcome = Outcome::Matched;
                }
                observation
            })
            .collect()
    }

    /// Replaces the remembered frame.
    pub fn commit(&mut self, faces: Vec<TrackedFace>) {
        self.last = faces;
    }

    pub fn reset(&mut self) {
        self.last.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }

    pub fn last(&self) -> &[TrackedFace] {
        &self.last
    }
}
