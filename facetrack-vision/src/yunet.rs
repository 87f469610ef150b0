//! YuNet face detector.
//!
//! YuNet is anchor-free: for each stride (8, 16, 32) it predicts per grid cell
//! a class score, an objectness score, a box `(dx, dy, log w, log h)` and five
//! landmark offsets, all in stride units. The twelve output tensors come in the
//! order cls_8, cls_16, cls_32, obj_8, .., bbox_8, .., kps_8, ...

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use image::{imageops, RgbImage};
use ort::{session::Session, value::Value};

use crate::face::{self, BoundingBox, Detection, Detector, Image, Landmarks};
use crate::model;

const STRIDES: [usize; 3] = [8, 16, 32];

pub const INPUT_SIZE: u32 = 640;

pub struct YuNetDetector {
    session: Mutex<Session>,
    score_threshold: f32,
    nms_threshold: f32,
}

impl YuNetDetector {
    pub fn from_file(path: &Path, score_threshold: f32, nms_threshold: f32) -> Result<Self> {
        Ok(Self {
            session: Mutex::new(model::load_session(path)?),
            score_threshold,
            nms_threshold,
        })
    }

    fn infer(&self, canvas: &RgbImage) -> Result<Vec<(Vec<i64>, Vec<f32>)>> {
        let input = Value::from_array(model::bgr_planar_tensor(canvas)?)?;
        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("detector session poisoned"))?;
        let outputs = session.run(ort::inputs![input])?;

        let mut tensors = Vec::new();
        for (_name, output) in outputs.iter() {
            let (shape, data) = output.try_extract_tensor::<f32>()?;
            tensors.push((shape.iter().copied().collect(), data.to_vec()));
        }
        Ok(tensors)
    }
}

impl Detector for YuNetDetector {
    fn detect(&self, image: &Image) -> Result<Vec<Detection>> {
        if image.is_empty() {
            return Ok(Vec::new());
        }
        let letterbox = Letterbox::fit(image.width(), image.height(), INPUT_SIZE);
        let canvas = letterbox.apply(&image.to_rgb()?);

        let tensors = self.infer(&canvas).context("running yunet")?;
        let raw = decode(&tensors, INPUT_SIZE as usize, self.score_threshold)?;
        let detections = raw.into_iter().map(|d| letterbox.restore(d)).collect();
        let detections = face::nms(detections, self.nms_threshold);

        log::debug!("yunet found {} face(s)", detections.len());
        Ok(detections)
    }
}

/// Aspect-preserving resize onto a square canvas, centred with black padding.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    offset_x: u32,
    offset_y: u32,
    scaled_w: u32,
    scaled_h: u32,
    size: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, size: u32) -> Self {
        let scale = size as f32 / width.max(height) as f32;
        let scaled_w = ((width as f32 * scale) as u32).clamp(1, size);
        let scaled_h = ((height as f32 * scale) as u32).clamp(1, size);
        Self {
            scale,
            offset_x: (size - scaled_w) / 2,
            offset_y: (size - scaled_h) / 2,
            scaled_w,
            scaled_h,
            size,
        }
    }

    fn apply(&self, rgb: &RgbImage) -> RgbImage {
        let resized = imageops::resize(
            rgb,
            self.scaled_w,
            self.scaled_h,
            imageops::FilterType::Triangle,
        );
        let mut canvas = RgbImage::new(self.size, self.size);
        imageops::overlay(
            &mut canvas,
            &resized,
            self.offset_x as i64,
            self.offset_y as i64,
        );
        canvas
    }

    fn restore_point(&self, [x, y]: [f32; 2]) -> [f32; 2] {
        [
            (x - self.offset_x as f32) / self.scale,
            (y - self.offset_y as f32) / self.scale,
        ]
    }

    /// Maps a detection from canvas pixels back into source-image pixels.
    fn restore(&self, d: Detection) -> Detection {
        let [left, top] = self.restore_point([d.bbox.left, d.bbox.top]);
        let [right, bottom] = self.restore_point([d.bbox.right, d.bbox.bottom]);
        let mut points = d.landmarks.0;
        for p in points.iter_mut() {
            *p = self.restore_point(*p);
        }
        Detection {
            bbox: BoundingBox::new(left, top, right, bottom),
            probability: d.probability,
            landmarks: Landmarks(points),
        }
    }
}

fn tensor<'a>(
    outputs: &'a [(Vec<i64>, Vec<f32>)],
    index: usize,
    cells: usize,
    width: i64,
) -> Result<&'a [f32]> {
    let (shape, data) = outputs
        .get(index)
        .ok_or_else(|| anyhow::anyhow!("missing yunet output {}", index))?;
    if shape.len() != 3 || shape[0] != 1 || shape[1] as usize != cells || shape[2] != width {
        anyhow::bail!(
            "unexpected shape {:?} for yunet output {}, expected [1, {}, {}]",
            shape,
            index,
            cells,
            width
        );
    }
    Ok(data)
}

/// Decodes raw YuNet outputs into detections in canvas pixel coordinates.
pub fn decode(
    outputs: &[(Vec<i64>, Vec<f32>)],
    input_size: usize,
    score_threshold: f32,
) -> Result<Vec<Detection>> {
    let mut detections = Vec::new();

    for (scale, &stride) in STRIDES.iter().enumerate() {
        let cols = input_size / stride;
        let cells = cols * cols;
        let cls = tensor(outputs, scale, cells, 1)?;
        let obj = tensor(outputs, scale + 3, cells, 1)?;
        let bbox = tensor(outputs, scale + 6, cells, 4)?;
        let kps = tensor(outputs, scale + 9, cells, 10)?;
        let s = stride as f32;

        for idx in 0..cells {
            let score = (cls[idx].clamp(0.0, 1.0) * obj[idx].clamp(0.0, 1.0)).sqrt();
            if score < score_threshold {
                continue;
            }
            let col = (idx % cols) as f32;
            let row = (idx / cols) as f32;

            let b = &bbox[idx * 4..idx * 4 + 4];
            let cx = (col + b[0]) * s;
            let cy = (row + b[1]) * s;
            let w = b[2].exp() * s;
            let h = b[3].exp() * s;

            let mut points = [[0.0f32; 2]; 5];
            for (k, p) in points.iter_mut().enumerate() {
                *p = [
                    (col + kps[idx * 10 + k * 2]) * s,
                    (row + kps[idx * 10 + k * 2 + 1]) * s,
                ];
            }

            detections.push(Detection {
                bbox: BoundingBox::from_xywh(cx - w / 2.0, cy - h / 2.0, w, h),
                probability: score,
                landmarks: Landmarks(points),
            });
        }
    }

    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn empty_outputs(input_size: usize) -> Vec<(Vec<i64>, Vec<f32>)> {
        let mut outputs = Vec::new();
        for width in [1usize, 1, 4, 10] {
            for stride in STRIDES {
                let cells = (input_size / stride).pow(2);
                outputs.push((
                    vec![1, cells as i64, width as i64],
                    vec![0.0; cells * width],
                ));
            }
        }
        outputs
    }

    #[test]
    fn test_decode_single_cell() -> Result<()> {
        let mut outputs = empty_outputs(640);
        // stride 32 grid is 20x20; put a face at row 10, col 10
        let idx = 10 * 20 + 10;
        outputs[2].1[idx] = 0.81;
        outputs[5].1[idx] = 1.0;
        outputs[8].1[idx * 4..idx * 4 + 4].copy_from_slice(&[0.5, 0.25, 4f32.ln(), 4f32.ln()]);

        let detections = decode(&outputs, 640, 0.5)?;
        assert_eq!(detections.len(), 1);
        let d = &detections[0];

        assert_relative_eq!(d.probability, 0.9, epsilon = 1e-5);
        // centre (10.5 * 32, 10.25 * 32) = (336, 328), size 128
        assert_relative_eq!(d.bbox.left, 272.0, epsilon = 1e-3);
        assert_relative_eq!(d.bbox.top, 264.0, epsilon = 1e-3);
        assert_relative_eq!(d.bbox.width(), 128.0, epsilon = 1e-3);
        assert_relative_eq!(d.landmarks.left_eye()[0], 320.0, epsilon = 1e-3);
        Ok(())
    }

    #[test]
    fn test_decode_rejects_bad_shape() {
        let mut outputs = empty_outputs(640);
        outputs[6].0 = vec![1, 6400, 3];
        assert!(decode(&outputs, 640, 0.5).is_err());
    }

    #[test]
    fn test_letterbox_round_trip() {
        let lb = Letterbox::fit(1280, 720, INPUT_SIZE);
        assert_eq!(lb.scaled_w, 640);
        assert_eq!(lb.offset_y, (640 - 360) / 2);

        let [x, y] = lb.restore_point([320.0, 320.0]);
        assert_relative_eq!(x, 640.0, epsilon = 1e-3);
        assert_relative_eq!(y, 360.0, epsilon = 1e-3);
    }
}
