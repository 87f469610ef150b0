//! Pose and quality gate for a single detection.

use crate::config::QualityConfig;
use facetrack_vision::{BoundingBox, Landmarks};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub forward: bool,
    pub quality_ok: bool,
    pub score: f32,
    /// Lateral nose offset from the eye midpoint over the inter-eye distance.
    pub pose_offset: f32,
}

impl Assessment {
    /// Both the pose and the quality test passed.
    pub fn accepted(&self) -> bool {
        self.forward && self.quality_ok
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    config: QualityConfig,
}

impl QualityGate {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn assess(&self, bbox: &BoundingBox, probability: f32, landmarks: &Landmarks) -> Assessment {
        let offset = pose_offset(landmarks);
        let forward = offset < self.config.forward_fraction;

        let size = (bbox.area().sqrt() / self.config.encoder_input_size).min(1.0);
        let mut score = size * probability;
        if self.config.pose_in_score {
            score *= 1.0 - offset.min(1.0);
        }

        Assessment {
            forward,
            quality_ok: score > self.config.threshold,
            score,
            pose_offset: offset,
        }
    }
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::new(QualityConfig::default())
    }
}

/// Projects the nose onto the eye line and measures how far the projection
/// sits from the eye midpoint, in inter-eye distances. A frontal face is near 0.
/// Coincident eyes give infinity.
pub fn pose_offset(landmarks: &Landmarks) -> f32 {
    let [lx, ly] = landmarks.left_eye();
    let [rx, ry] = landmarks.right_eye();
    let [nx, ny] = landmarks.nose();

    let (dx, dy) = (rx - lx, ry - ly);
    let eye_dist = (dx * dx + dy * dy).sqrt();
    if !eye_dist.is_normal() {
        return f32::INFINITY;
    }
    let (ux, uy) = (dx / eye_dist, dy / eye_dist);
    let (mx, my) = ((lx + rx) / 2.0, (ly + ry) / 2.0);

    let along = (nx - mx) * ux + (ny - my) * uy;
    along.abs() / eye_dist
}
