use anyhow::Result;
use image::{Rgb, RgbImage};

use crate::face::{Aligner, Detection, Image};

/// ArcFace reference eye positions on a 112x112 crop.
const REF_LEFT_EYE: (f32, f32) = (38.3, 51.7);
const REF_RIGHT_EYE: (f32, f32) = (73.5, 51.5);
const REF_SIZE: f32 = 112.0;

/// Similarity-transform aligner: rotates the eye line level, scales the
/// inter-eye distance to the reference and centres the eyes on their
/// reference position, sampling bilinearly.
#[derive(Debug, Clone, Copy)]
pub struct LandmarkAligner {
    size: u32,
}

impl LandmarkAligner {
    pub fn new(size: u32) -> Self {
        Self { size }
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}

impl Default for LandmarkAligner {
    fn default() -> Self {
        Self::new(112)
    }
}

/// Forward map `out = M * in + t` with `M = [a b; c d]`.
struct Similarity {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    fn invert(&self, x: f32, y: f32) -> (f32, f32) {
        let det = self.a * self.d - self.b * self.c;
        let (px, py) = (x - self.tx, y - self.ty);
        (
            (self.d * px - self.b * py) / det,
            (-self.c * px + self.a * py) / det,
        )
    }
}

fn sample_bilinear(img: &RgbImage, x: f32, y: f32) -> Option<Rgb<u8>> {
    let (w, h) = img.dimensions();
    if x < 0.0 || y < 0.0 || x >= w as f32 || y >= h as f32 {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let weights = [
        ((x0, y0), (1.0 - fx) * (1.0 - fy)),
        ((x1, y0), fx * (1.0 - fy)),
        ((x0, y1), (1.0 - fx) * fy),
        ((x1, y1), fx * fy),
    ];
    let mut acc = [0.0f32; 3];
    for ((px, py), weight) in weights {
        let p = img.get_pixel(px, py);
        for (channel, value) in acc.iter_mut().zip(p.0) {
            *channel += value as f32 * weight;
        }
    }
    Some(Rgb(acc.map(|v| v.round().clamp(0.0, 255.0) as u8)))
}

impl Aligner for LandmarkAligner {
    fn align(&self, image: &Image, detection: &Detection) -> Result<Image> {
        let [lx, ly] = detection.landmarks.left_eye();
        let [rx, ry] = detection.landmarks.right_eye();
        let (dx, dy) = (rx - lx, ry - ly);
        let eye_dist = (dx * dx + dy * dy).sqrt();
        if eye_dist <= f32::EPSILON {
            anyhow::bail!("cannot align a face whose eye landmarks coincide");
        }

        let out = self.size as f32 / REF_SIZE;
        let ref_dist = ((REF_RIGHT_EYE.0 - REF_LEFT_EYE.0).powi(2)
            + (REF_RIGHT_EYE.1 - REF_LEFT_EYE.1).powi(2))
        .sqrt();
        let scale = out * ref_dist / eye_dist;
        let angle = dy.atan2(dx);
        let (sin, cos) = angle.sin_cos();

        let a = scale * cos;
        let b = scale * sin;
        let c = -scale * sin;
        let d = scale * cos;
        let (ex, ey) = ((lx + rx) / 2.0, (ly + ry) / 2.0);
        let target = (
            (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0 * out,
            (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0 * out,
        );
        let transform = Similarity {
            a,
            b,
            c,
            d,
            tx: target.0 - (a * ex + b * ey),
            ty: target.1 - (c * ex + d * ey),
        };

        let src = image.to_rgb()?;
        let mut crop = RgbImage::new(self.size, self.size);
        for (x, y, pixel) in crop.enumerate_pixels_mut() {
            let (sx, sy) = transform.invert(x as f32, y as f32);
            if let Some(value) = sample_bilinear(&src, sx, sy) {
                *pixel = value;
            }
        }

        Ok(Image::from_rgb(crop))
    }
}
