//! Scripted detector, aligner and encoder for exercising the engine without models.
//!
//! A frame is a 1x1 grey image whose pixel value selects a scene. Each face
//! in a scene carries a person tag; the aligner turns a detection into a 1x1
//! crop holding that tag and the encoder maps tags to embeddings. Tags that
//! differ by a multiple of 100 belong to the same person photographed twice
//! (embedding distance 0.1); any other pair is at least 1.0 apart.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use facetrack::config::Config;
use facetrack::{
    Aligner, BoundingBox, Detection, Detector, Embedding, Encoder, Engine, IdentityStore, Image,
    Landmarks, PixelLayout,
};

pub const SIZE: f32 = 150.0;

/// Person tag whose crops encode to a NaN embedding.
pub const BROKEN: u8 = 255;

pub struct Face {
    pub detection: Detection,
    pub person: u8,
}

/// Frontal face with its top-left corner at (x, y).
pub fn frontal(person: u8, x: f32, y: f32) -> Face {
    face(person, x, y, 0.99, 0.0)
}

/// Face whose nose is shifted sideways by half the eye distance.
pub fn turned(person: u8, x: f32, y: f32) -> Face {
    face(person, x, y, 0.99, 0.2 * SIZE)
}

pub fn face(person: u8, x: f32, y: f32, probability: f32, nose_shift: f32) -> Face {
    let p = |fx: f32, fy: f32| [x + fx * SIZE, y + fy * SIZE];
    let mut landmarks = [p(0.3, 0.4), p(0.7, 0.4), p(0.5, 0.6), p(0.35, 0.8), p(0.65, 0.8)];
    landmarks[2][0] += nose_shift;
    Face {
        detection: Detection {
            bbox: BoundingBox::from_xywh(x, y, SIZE, SIZE),
            probability,
            landmarks: Landmarks(landmarks),
        },
        person,
    }
}

pub fn frame(scene: u8) -> Image {
    Image::new(1, 1, PixelLayout::Gray8, vec![scene]).unwrap()
}

pub fn embedding_of(person: u8) -> Embedding {
    if person == BROKEN {
        return Embedding::from_vec(vec![f32::NAN, 0.0, 0.0, 0.0]);
    }
    Embedding::from_vec(vec![
        (person % 100) as f32,
        (person / 100) as f32 * 0.1,
        0.0,
        0.0,
    ])
}

#[derive(Default)]
pub struct WorldState {
    scenes: Vec<Vec<Face>>,
    pub detect_calls: AtomicUsize,
    pub encode_calls: AtomicUsize,
}

#[derive(Clone)]
pub struct World(pub Arc<WorldState>);

impl World {
    pub fn new(scenes: Vec<Vec<Face>>) -> Self {
        Self(Arc::new(WorldState {
            scenes,
            ..WorldState::default()
        }))
    }

    pub fn detect_calls(&self) -> usize {
        self.0.detect_calls.load(Ordering::SeqCst)
    }

    pub fn encode_calls(&self) -> usize {
        self.0.encode_calls.load(Ordering::SeqCst)
    }

    pub fn engine(&self) -> Engine {
        self.engine_with(Box::new(self.clone()), &Config::default())
    }

    pub fn engine_with(&self, detector: Box<dyn Detector>, config: &Config) -> Engine {
        Engine::new(
            Arc::new(IdentityStore::new()),
            detector,
            Box::new(self.clone()),
            Box::new(self.clone()),
            config,
        )
    }
}

impl Detector for World {
    fn detect(&self, image: &Image) -> Result<Vec<Detection>> {
        self.0.detect_calls.fetch_add(1, Ordering::SeqCst);
        let scene = self
            .0
            .scenes
            .get(image.data()[0] as usize)
            .ok_or_else(|| anyhow::anyhow!("no scene {}", image.data()[0]))?;
        Ok(scene.iter().map(|f| f.detection.clone()).collect())
    }
}

impl Aligner for World {
    fn align(&self, _image: &Image, detection: &Detection) -> Result<Image> {
        let person = self
            .0
            .scenes
            .iter()
            .flatten()
            .find(|f| &f.detection == detection)
            .map(|f| f.person)
            .ok_or_else(|| anyhow::anyhow!("unknown detection"))?;
        Image::new(1, 1, PixelLayout::Gray8, vec![person])
    }
}

impl Encoder for World {
    fn encode(&self, face: &Image) -> Result<Embedding> {
        self.0.encode_calls.fetch_add(1, Ordering::SeqCst);
        Ok(embedding_of(face.data()[0]))
    }
}
