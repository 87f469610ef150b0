//! Enrollment, authentication and continuous recognition.
//!
//! Every workflow runs the same front half: detect, gate, align, encode. They
//! differ only in how the embedding meets the catalog, and all of them go
//! through [`Matcher`] so the matching rules are identical.

use std::sync::Arc;
use std::time::Duration;

use facetrack_vision::{Aligner, BoundingBox, Detection, Detector, Embedding, Encoder, Image};

use crate::config::{Config, UNKNOWN_NAME};
use crate::error::{Error, Result};
use crate::matcher::Matcher;
use crate::quality::QualityGate;
use crate::response::FaceResult;
use crate::session::SessionRegistry;
use crate::store::{Identity, IdentityId, IdentityStore, Resolution};
use crate::tracker::{DiscardReason, Observation, TrackedFace};

/// The detection with the highest probability; the first one wins a tie.
pub fn primary_face(detections: &[Detection]) -> Option<&Detection> {
    detections.iter().fold(None, |best, d| match best {
        Some(b) if b.probability >= d.probability => Some(b),
        _ => Some(d),
    })
}

pub struct Engine {
    store: Arc<IdentityStore>,
    detector: Box<dyn Detector>,
    aligner: Box<dyn Aligner>,
    encoder: Box<dyn Encoder>,
    gate: QualityGate,
    matcher: Matcher,
    sessions: SessionRegistry,
}

impl Engine {
    pub fn new(
        store: Arc<IdentityStore>,
        detector: Box<dyn Detector>,
        aligner: Box<dyn Aligner>,
        encoder: Box<dyn Encoder>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            detector,
            aligner,
            encoder,
            gate: QualityGate::new(config.quality),
            matcher: Matcher::new(config.matching.tolerance),
            sessions: SessionRegistry::new(config.tracking),
        }
    }

    pub fn store(&self) -> &Arc<IdentityStore> {
        &self.store
    }

    pub fn identity_count(&self) -> usize {
        self.store.len()
    }

    fn embed(&self, image: &Image, detection: &Detection) -> Result<Embedding> {
        let crop = self.aligner.align(image, detection)?;
        Ok(self.encoder.encode(&crop)?)
    }

    /// Detects the primary face, gates it and encodes it.
    fn primary_embedding(&self, image: &Image) -> Result<Embedding> {
        if image.is_empty() {
            return Err(Error::NoFaceDetected);
        }
        let detections = self.detector.detect(image)?;
        let face = primary_face(&detections).ok_or(Error::NoFaceDetected)?;

        let assessment = self
            .gate
            .assess(&face.bbox, face.probability, &face.landmarks);
        if !assessment.accepted() {
            log::debug!("primary face rejected: {:?}", assessment);
            return Err(Error::QualityRejected {
                score: assessment.score,
                forward: assessment.forward,
            });
        }
        self.embed(image, face)
    }

    /// Registers the primary face of `image` as `name`.
    ///
    /// Fails with [`Error::AlreadyRegistered`] if the face matches an existing
    /// identity; the check and the insert are one atomic catalog operation.
    pub fn enroll(&self, image: &Image, name: &str) -> Result<Identity> {
        let embedding = self.primary_embedding(image)?;
        match self
            .matcher
            .identify_or_create(&self.store, &embedding, name)?
        {
            Resolution::Created(identity) => {
                log::info!("enrolled {} as {}", name, identity.id);
                Ok(identity)
            }
            Resolution::Existing(identity) => {
                log::info!("enrollment of {} refused, face belongs to {}", name, identity.id);
                Err(Error::AlreadyRegistered { id: identity.id })
            }
        }
    }

    /// Identifies the primary face of `image` without touching the catalog.
    pub fn authenticate(&self, image: &Image) -> Result<Identity> {
        let embedding = self.primary_embedding(image)?;
        match self.matcher.resolve(&self.store, &embedding, false)? {
            Some(resolution) => {
                let identity = resolution.into_identity();
                log::info!("authenticated {} ({})", identity.name, identity.id);
                Ok(identity)
            }
            None => Err(Error::UnknownFace),
        }
    }

    /// Resolves one face of a recognition frame. Faces the gate rejects are
    /// reported as ignored and never reach the catalog.
    fn observe(&self, image: &Image, detection: &Detection) -> Result<Observation> {
        let assessment = self
            .gate
            .assess(&detection.bbox, detection.probability, &detection.landmarks);
        if !assessment.forward {
            return Ok(Observation::ignored(DiscardReason::NotForward {
                pose_offset: assessment.pose_offset,
            }));
        }
        if !assessment.quality_ok {
            return Ok(Observation::ignored(DiscardReason::LowQuality {
                score: assessment.score,
            }));
        }
        let embedding = self.embed(image, detection)?;
        let resolution = self
            .matcher
            .identify_or_create(&self.store, &embedding, UNKNOWN_NAME)?;
        Ok(Observation::resolved(&resolution))
    }

    /// Cached observations with names re-read from the catalog, so renames
    /// show up without re-matching.
    fn refresh(&self, observations: Vec<Observation>) -> Vec<Observation> {
        observations
            .into_iter()
            .map(|mut observation| {
                if let Some(identity) = observation.identity_id.and_then(|id| self.store.get(id)) {
                    observation.display_name = identity.name;
                }
                observation
            })
            .collect()
    }

    /// Continuous recognition of every face in one frame of `session_id`.
    ///
    /// The session opens on its first frame and stays open until
    /// [`Engine::close_session`] or [`Engine::evict_idle_sessions`].
    /// An empty frame is a no-op. Frames of one session are serialized; if
    /// the session is closed while the frame is in flight the result is
    /// dropped and the session state is left as it was.
    pub fn process_frame(&self, session_id: &str, image: &Image) -> Result<Vec<FaceResult>> {
        if image.is_empty() {
            return Ok(Vec::new());
        }
        let session = self.sessions.open(session_id);
        let mut tracker = session.tracker();
        let closed = || Error::SessionClosed(session_id.to_string());
        if session.is_closed() {
            return Err(closed());
        }

        let detections = self.detector.detect(image)?;
        let boxes: Vec<BoundingBox> = detections.iter().map(|d| d.bbox).collect();

        let reused = !detections.is_empty() && !tracker.should_recompute(&boxes);
        let observations = if detections.is_empty() {
            Vec::new()
        } else if reused {
            self.refresh(tracker.reuse())
        } else {
            let mut observations = Vec::with_capacity(detections.len());
            for detection in &detections {
                if session.is_closed() {
                    return Err(closed());
                }
                observations.push(self.observe(image, detection)?);
            }
            observations
        };

        if session.is_closed() {
            return Err(closed());
        }
        log::debug!(
            "session {}: {} face(s), {}",
            session_id,
            detections.len(),
            if reused { "reused" } else { "recomputed" }
        );

        tracker.commit(
            boxes
                .iter()
                .zip(&observations)
                .map(|(bbox, observation)| TrackedFace {
                    bbox: *bbox,
                    observation: observation.clone(),
                })
                .collect(),
        );

        Ok(detections
            .into_iter()
            .zip(observations)
            .map(|(detection, observation)| FaceResult {
                identity_id: observation.identity_id,
                display_name: observation.display_name,
                bbox: detection.bbox,
                probability: detection.probability,
                landmarks: detection.landmarks,
                outcome: observation.outcome,
                reused,
            })
            .collect())
    }

    pub fn close_session(&self, session_id: &str) -> bool {
        self.sessions.close(session_id)
    }

    /// Closes sessions that have not started a frame for `max_idle`.
    pub fn evict_idle_sessions(&self, max_idle: Duration) -> Vec<String> {
        self.sessions.evict_idle(max_idle)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn rename(&self, id: IdentityId, new_name: &str) -> bool {
        self.store.rename(id, new_name)
    }

    pub fn identity(&self, id: IdentityId) -> Result<Identity> {
        self.store.get(id).ok_or(Error::UnknownIdentity(id))
    }

    /// Replaces the stored embedding of `id` with the primary face of `image`.
    pub fn update_embedding(&self, id: IdentityId, image: &Image) -> Result<Identity> {
        let embedding = self.primary_embedding(image)?;
        if !self.store.update_embedding(id, embedding)? {
            return Err(Error::UnknownIdentity(id));
        }
        self.identity(id)
    }
}
