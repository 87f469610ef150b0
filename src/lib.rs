pub mod config;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod quality;
pub mod response;
pub mod session;
pub mod store;
pub mod tracker;

pub use engine::Engine;
pub use error::{Error, Result};
pub use store::{Identity, IdentityId, IdentityStore, Resolution};

// Re-export vision types for convenience
pub use facetrack_vision::{
    Aligner, BoundingBox, Detection, Detector, Embedding, Encoder, Image, Landmarks, PixelLayout,
};
