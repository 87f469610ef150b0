use anyhow::{Context, Result};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::face::{Image, PixelLayout};

/// V4L2 capture device yielding decoded [`Image`] frames.
pub struct Camera {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl Camera {
    pub fn open(device: &str) -> Result<Self> {
        let dev = Device::with_path(device).context("open camera")?;
        let mut fmt = dev.format().context("get format")?;
        // Prefer RGB, fallback to YUYV, else accept existing format
        let desired = Format::new(fmt.width, fmt.height, FourCC::new(b"RGB3"));
        fmt = dev.set_format(&desired).unwrap_or(fmt);
        if fmt.fourcc != FourCC::new(b"RGB3") {
            let yuyv = Format::new(fmt.width, fmt.height, FourCC::new(b"YUYV"));
            fmt = dev.set_format(&yuyv).unwrap_or(fmt);
        }
        log::info!(
            "camera {} streaming {}x{} {:?}",
            device,
            fmt.width,
            fmt.height,
            fmt.fourcc
        );
        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).context("stream")?;
        Ok(Self {
            stream,
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        })
    }

    pub fn frame(&mut self) -> Result<Image> {
        let (data, meta) = self.stream.next().context("capture frame")?;
        log::debug!("captured frame seq={} len={}", meta.sequence, data.len());

        let pixels = (self.width * self.height) as usize;
        match &self.fourcc.repr {
            b"RGB3" => Image::new(
                self.width,
                self.height,
                PixelLayout::Rgb8,
                truncated(data, pixels * 3)?,
            ),
            b"GREY" => Image::new(
                self.width,
                self.height,
                PixelLayout::Gray8,
                truncated(data, pixels)?,
            ),
            b"YUYV" => Image::new(
                self.width,
                self.height,
                PixelLayout::Rgb8,
                yuyv_to_rgb(truncated(data, pixels * 2)?),
            ),
            other => anyhow::bail!("unsupported pixel format {:?}", FourCC::new(other)),
        }
    }
}

fn truncated(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    if data.len() < expected {
        anyhow::bail!("short frame buffer: got {}, expected {}", data.len(), expected);
    }
    Ok(data[..expected].to_vec())
}

fn yuyv_to_rgb(data: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            out.push(clamp(y + 1.402 * v));
            out.push(clamp(y - 0.344136 * u - 0.714136 * v));
            out.push(clamp(y + 1.772 * u));
        }
    }
    out
}

fn clamp(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_neutral_chroma_is_grey() {
        let rgb = yuyv_to_rgb(vec![100, 128, 200, 128]);
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn test_truncated_rejects_short_buffer() {
        assert!(truncated(&[0; 3], 4).is_err());
        assert_eq!(truncated(&[1, 2, 3, 4, 5], 4).unwrap(), vec![1, 2, 3, 4]);
    }
}
