use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use image::imageops;
use ort::{session::Session, value::Value};

use crate::face::{Embedding, Encoder, Image};
use crate::model;

pub const INPUT_SIZE: u32 = 112;

/// SFace recognizer: 112x112 BGR crop in, L2-normalized 128-d embedding out.
pub struct SFaceEncoder {
    session: Mutex<Session>,
}

impl SFaceEncoder {
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self {
            session: Mutex::new(model::load_session(path)?),
        })
    }
}

impl Encoder for SFaceEncoder {
    fn encode(&self, face: &Image) -> Result<Embedding> {
        let mut rgb = face.to_rgb()?;
        if rgb.dimensions() != (INPUT_SIZE, INPUT_SIZE) {
            rgb = imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, imageops::FilterType::Triangle);
        }
        let input = Value::from_array(model::bgr_planar_tensor(&rgb)?)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("encoder session poisoned"))?;
        let outputs = session.run(ort::inputs![input]).context("running sface")?;
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let shape: Vec<i64> = shape.iter().copied().collect();
        embedding_from_output(&shape, data)
    }
}

/// Reads the embedding out of a `[1, dim]` (or flat) output tensor.
fn embedding_from_output(shape: &[i64], data: &[f32]) -> Result<Embedding> {
    let dim = match shape {
        [_, dim] => usize::try_from(*dim).context("negative embedding dimension")?,
        _ => data.len(),
    };
    let values = data
        .get(..dim)
        .with_context(|| format!("sface output {:?} holds only {} values", shape, data.len()))?;
    Ok(Embedding::from_vec(values.to_vec()).l2_normalized())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_embedding_from_output() -> Result<()> {
        let e = embedding_from_output(&[1, 2], &[3.0, 4.0])?;
        assert_eq!(e.dim(), 2);
        assert_relative_eq!(e.vector[0], 0.6);
        assert_relative_eq!(e.vector[1], 0.8);

        let flat = embedding_from_output(&[3], &[0.0, 0.0, 2.0])?;
        assert_eq!(flat.dim(), 3);
        Ok(())
    }

    #[test]
    fn test_short_output_is_an_error() {
        assert!(embedding_from_output(&[1, 128], &[1.0; 64]).is_err());
        assert!(embedding_from_output(&[1, -1], &[1.0; 4]).is_err());
    }
}
