use thiserror::Error;

use crate::store::IdentityId;

/// Every way an engine operation can end without its happy-path result.
///
/// All variants are recoverable and reported as values; none of them leaves
/// the identity store or a session tracker half-updated.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no face detected")]
    NoFaceDetected,

    #[error("face quality rejected (score {score:.3}, forward: {forward})")]
    QualityRejected { score: f32, forward: bool },

    #[error("face already registered as {id}")]
    AlreadyRegistered { id: IdentityId },

    #[error("authentication failed, unknown face")]
    UnknownFace,

    #[error("unknown identity {0}")]
    UnknownIdentity(IdentityId),

    #[error("embedding has {actual} dimensions, catalog uses {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding has non-finite components")]
    NonFiniteEmbedding,

    #[error("session {0} was closed")]
    SessionClosed(String),

    /// Detector, aligner or encoder failure.
    #[error(transparent)]
    Capability(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
