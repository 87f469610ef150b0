pub mod align;
pub mod face;
pub mod model;
pub mod sface;
pub mod video;
pub mod yunet;

// Re-export commonly used types
pub use align::LandmarkAligner;
pub use face::{
    Aligner, BoundingBox, Detection, Detector, Embedding, Encoder, Image, Landmarks, PixelLayout,
};
pub use sface::SFaceEncoder;
pub use video::Camera;
pub use yunet::YuNetDetector;
