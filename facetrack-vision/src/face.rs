use anyhow::{Context, Result};
use image::RgbImage;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Channel order of an [`Image`] buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelLayout {
    Rgb8,
    Bgr8,
    Gray8,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Rgb8 | PixelLayout::Bgr8 => 3,
            PixelLayout::Gray8 => 1,
        }
    }
}

/// Decoded frame handed to detectors, aligners and encoders.
///
/// Rows are tightly packed, `width * channels` bytes each.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    width: u32,
    height: u32,
    layout: PixelLayout,
    data: Vec<u8>,
}

impl Image {
    pub fn new(width: u32, height: u32, layout: PixelLayout, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * layout.channels();
        if data.len() != expected {
            anyhow::bail!(
                "pixel buffer holds {} bytes, expected {} for {}x{} {:?}",
                data.len(),
                expected,
                width,
                height,
                layout
            );
        }
        Ok(Self {
            width,
            height,
            layout,
            data,
        })
    }

    /// The sentinel frame a transport delivers when it has nothing to decode.
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            layout: PixelLayout::Rgb8,
            data: Vec::new(),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let img = image::open(path).with_context(|| format!("decoding {}", path.display()))?;
        Ok(Self::from_rgb(img.to_rgb8()))
    }

    pub fn from_rgb(img: RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            layout: PixelLayout::Rgb8,
            data: img.into_raw(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Converts to an RGB buffer regardless of the source layout.
    pub fn to_rgb(&self) -> Result<RgbImage> {
        let raw = match self.layout {
            PixelLayout::Rgb8 => self.data.clone(),
            PixelLayout::Bgr8 => self
                .data
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
            PixelLayout::Gray8 => self.data.iter().flat_map(|&y| [y, y, y]).collect(),
        };
        RgbImage::from_raw(self.width, self.height, raw)
            .ok_or_else(|| anyhow::anyhow!("failed to build {}x{} rgb image", self.width, self.height))
    }
}

/// Face rectangle in pixel corner coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_xywh(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self::new(x, y, x + w, y + h)
    }

    pub fn width(&self) -> f32 {
        (self.right - self.left).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.bottom - self.top).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }

    /// Euclidean distance between the two box centres.
    pub fn center_distance(&self, other: &BoundingBox) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.left.max(other.left);
        let y1 = self.top.max(other.top);
        let x2 = self.right.min(other.right);
        let y2 = self.bottom.min(other.bottom);
        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }
        let inter = (x2 - x1) * (y2 - y1);
        inter / (self.area() + other.area() - inter)
    }
}

/// Five facial landmarks: left eye, right eye, nose tip, left and right mouth corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmarks(pub [[f32; 2]; 5]);

impl Landmarks {
    pub fn left_eye(&self) -> [f32; 2] {
        self.0[0]
    }

    pub fn right_eye(&self) -> [f32; 2] {
        self.0[1]
    }

    pub fn nose(&self) -> [f32; 2] {
        self.0[2]
    }

    pub fn mouth_left(&self) -> [f32; 2] {
        self.0[3]
    }

    pub fn mouth_right(&self) -> [f32; 2] {
        self.0[4]
    }
}

/// One detected face in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub probability: f32,
    pub landmarks: Landmarks,
}

/// Fixed-dimension face descriptor produced by an [`Encoder`].
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn from_vec(values: Vec<f32>) -> Self {
        Self {
            vector: Array1::from_vec(values),
        }
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    /// False when any component is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.vector.iter().all(|x| x.is_finite())
    }

    /// Euclidean distance. Callers are expected to compare equal dimensions.
    pub fn distance(&self, other: &Embedding) -> f32 {
        self.vector
            .iter()
            .zip(other.vector.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }

    pub fn l2_normalized(mut self) -> Self {
        let norm = self.vector.dot(&self.vector).sqrt();
        if norm > 0.0 {
            self.vector.mapv_inplace(|x| x / norm);
        }
        self
    }
}

/// Finds faces in a frame. Returns an empty list when there are none.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &Image) -> Result<Vec<Detection>>;
}

/// Produces a normalized face crop from a frame and one of its detections.
pub trait Aligner: Send + Sync {
    fn align(&self, image: &Image, detection: &Detection) -> Result<Image>;
}

/// Turns a normalized face crop into an embedding.
pub trait Encoder: Send + Sync {
    fn encode(&self, face: &Image) -> Result<Embedding>;
}

/// Apply non-maximum suppression to remove overlapping detections
pub fn nms(detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections;
    sorted.sort_by(|a, b| b.probability.total_cmp(&a.probability));

    let mut keep: Vec<Detection> = Vec::with_capacity(sorted.len());
    for candidate in sorted {
        if keep
            .iter()
            .all(|kept| kept.bbox.iou(&candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}
