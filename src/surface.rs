use image::{DynamicImage, GrayImage, ImageBuffer, RgbaImage};
use ndarray::ArrayView2;
use rayon::prelude::*;

use crate::errors::{Result, SamError};
use crate::transforms::ImageSize;

/// Channel layout of a [`MaskSurface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SurfaceFormat {
    #[default]
    Luma8,
    /// Mask value in every channel: foreground is opaque white, background
    /// transparent black.
    Rgba8,
}

impl SurfaceFormat {
    pub const fn channels(&self) -> usize {
        match self {
            Self::Luma8 => 1,
            Self::Rgba8 => 4,
        }
    }
}

/// Rendered mask in original image pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskSurface {
    size: ImageSize,
    format: SurfaceFormat,
    data: Vec<u8>,
}

impl MaskSurface {
    pub fn new(size: ImageSize, format: SurfaceFormat) -> Self {
        Self {
            size,
            format,
            data: vec![0; size.area() * format.channels()],
        }
    }

    pub const fn width(&self) -> u32 {
        self.size.width
    }

    pub const fn height(&self) -> u32 {
        self.size.height
    }

    pub const fn size(&self) -> ImageSize {
        self.size
    }

    pub const fn format(&self) -> SurfaceFormat {
        self.format
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    /// Mask value at (x, y): 255 inside the mask, 0 outside.
    pub fn value(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        let index = (y as usize * self.size.width as usize + x as usize) * self.format.channels();
        self.data.get(index).copied()
    }

    /// Fraction of pixels inside the mask.
    pub fn coverage(&self) -> f32 {
        if self.size.is_empty() {
            return 0.0;
        }
        let inside = self
            .data
            .iter()
            .step_by(self.format.channels())
            .filter(|&&v| v > 0)
            .count();
        inside as f32 / self.size.area() as f32
    }

    /// Thresholds `logits` and writes the result into every channel.
    ///
    /// `logits` must be `(height, width)` of this surface; on mismatch the
    /// surface is left unchanged.
    pub fn render(&mut self, logits: ArrayView2<'_, f32>, threshold: f32) -> Result<()> {
        let (h, w) = logits.dim();
        if (h, w) != (self.size.height as usize, self.size.width as usize) {
            return Err(SamError::model(
                "mask rendering",
                format!(
                    "mask is {w}x{h} but the surface is {}x{}",
                    self.size.width, self.size.height
                ),
            ));
        }

        let logits = logits.as_standard_layout();
        let values = logits
            .as_slice()
            .ok_or_else(|| SamError::model("mask rendering", "mask tensor is not contiguous"))?;

        self.data
            .par_chunks_mut(self.format.channels())
            .zip(values.par_iter())
            .for_each(|(pixel, &logit)| pixel.fill(if logit > threshold { 255 } else { 0 }));
        Ok(())
    }

    pub fn to_luma8(&self) -> GrayImage {
        let values = self
            .data
            .iter()
            .step_by(self.format.channels())
            .copied()
            .collect();
        // length is width * height by construction
        ImageBuffer::from_raw(self.size.width, self.size.height, values)
            .unwrap_or_else(|| GrayImage::new(self.size.width, self.size.height))
    }

    pub fn to_image(&self) -> DynamicImage {
        match self.format {
            SurfaceFormat::Luma8 => DynamicImage::ImageLuma8(self.to_luma8()),
            SurfaceFormat::Rgba8 => DynamicImage::ImageRgba8(
                RgbaImage::from_raw(self.size.width, self.size.height, self.data.clone())
                    .unwrap_or_else(|| RgbaImage::new(self.size.width, self.size.height)),
            ),
        }
    }
}
