//! Coordinate bookkeeping between the original image and the network input.
//!
//! The encoder sees the image with its long side scaled to a fixed length.
//! Everything the decoder receives (prompt points) has to be expressed in that
//! resized space, while the masks it returns are back in original pixels.

use crate::errors::{Result, SamError};

/// Input side length of the image encoder.
pub const IMG_SIZE: u32 = 1024;

/// Pixel dimensions, height first to match tensor layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageSize {
    pub height: u32,
    pub width: u32,
}

impl ImageSize {
    pub const fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    pub const fn long_side(&self) -> u32 {
        if self.height > self.width {
            self.height
        } else {
            self.width
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.height == 0 || self.width == 0
    }

    pub const fn area(&self) -> usize {
        self.height as usize * self.width as usize
    }
}

/// Size of the image after scaling its long side to `long_side`.
///
/// Each side is rounded half-up (`+ 0.5`, then truncated). A short side that
/// would round to zero is kept at one pixel.
///
/// The arithmetic is `f32`, the precision the decoder graph uses when it maps
/// masks back through the same shape. Above roughly 5700 pixels this can land
/// one pixel away from the exact `f64` result; staying in step with the graph
/// matters more than the exact value.
pub fn resize_shape(orig_h: u32, orig_w: u32, long_side: u32) -> ImageSize {
    let scale = long_side as f32 / orig_w.max(orig_h) as f32;
    let new_w = (orig_w as f32 * scale + 0.5) as u32;
    let new_h = (orig_h as f32 * scale + 0.5) as u32;
    ImageSize::new(new_h.max(1), new_w.max(1))
}

/// Maps interleaved `[x0, y0, x1, y1, ..]` pixel coordinates from the original
/// image into the resized space of [`resize_shape`].
///
/// x is scaled by the width ratio and y by the height ratio of the rounded
/// shape, so the two axes can end up with slightly different factors.
pub fn map_points(points: &[f32], orig_h: u32, orig_w: u32, long_side: u32) -> Result<Vec<f32>> {
    if points.len() % 2 != 0 {
        return Err(SamError::invalid_input(
            "point_coords",
            format!("must hold (x, y) pairs, got {} values", points.len()),
        ));
    }

    let new = resize_shape(orig_h, orig_w, long_side);
    let sx = new.width as f32 / orig_w as f32;
    let sy = new.height as f32 / orig_h as f32;

    Ok(points
        .chunks_exact(2)
        .flat_map(|xy| [xy[0] * sx, xy[1] * sy])
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_shape_long_side() {
        let sizes = [
            (1, 1),
            (1024, 512),
            (512, 1024),
            (480, 640),
            (1080, 1920),
            (3001, 7),
            (333, 334),
            (4000, 3000),
            (17, 1023),
            (1025, 1025),
        ];
        for long_side in [1, 64, 1000, IMG_SIZE] {
            for (h, w) in sizes {
                let new = resize_shape(h, w, long_side);
                assert_eq!(new.long_side(), long_side, "({h}, {w}) -> {long_side}");

                // each side is within rounding of the exact scaled length
                let scale = f64::from(long_side) / f64::from(h.max(w));
                for (side, orig) in [(new.height, h), (new.width, w)] {
                    let exact = f64::from(orig) * scale;
                    assert!(
                        (f64::from(side) - exact).abs() <= 0.5 + 1e-3 || side == 1,
                        "aspect ratio drift for ({h}, {w}) -> {long_side}: {side} vs {exact}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_resize_shape_small_sizes_exhaustive() {
        for long_side in [1, 2, 7, 64, 255, IMG_SIZE] {
            for h in 1..=256 {
                for w in 1..=256 {
                    let new = resize_shape(h, w, long_side);
                    assert_eq!(new.long_side(), long_side, "({h}, {w}) -> {long_side}");

                    let scale = f64::from(long_side) / f64::from(h.max(w));
                    for (side, orig) in [(new.height, h), (new.width, w)] {
                        let exact = f64::from(orig) * scale;
                        assert!(
                            (f64::from(side) - exact).abs() <= 0.5 + 1e-3 || side == 1,
                            "({h}, {w}) -> {long_side}: {side} vs {exact}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_resize_shape_matches_f32_arithmetic() {
        // exact value is 970.49..; single precision rounds it over the half
        assert_eq!(resize_shape(6730, 7101, IMG_SIZE), ImageSize::new(971, 1024));
    }

    #[test]
    fn test_resize_shape_rounds_half_up() {
        // 3 * 1024 / 6 = 512 exactly; 5 * (1024 / 6) = 853.33 -> 853
        assert_eq!(resize_shape(3, 6, IMG_SIZE), ImageSize::new(512, 1024));
        assert_eq!(resize_shape(5, 6, IMG_SIZE), ImageSize::new(853, 1024));
        // 1 * (4 / 8) = 0.5 -> 1
        assert_eq!(resize_shape(1, 8, 4), ImageSize::new(1, 4));
        // 3 * (4 / 8) = 1.5 -> 2
        assert_eq!(resize_shape(3, 8, 4), ImageSize::new(2, 4));
    }

    #[test]
    fn test_resize_shape_keeps_degenerate_short_side() {
        assert_eq!(resize_shape(1, 10_000, IMG_SIZE), ImageSize::new(1, 1024));
    }

    #[test]
    fn test_map_points_corners() -> Result<()> {
        for (h, w) in [(1024, 512), (480, 640), (1080, 1920), (333, 334), (5, 6)] {
            let new = resize_shape(h, w, IMG_SIZE);
            let (wf, hf) = (w as f32, h as f32);
            let corners = [0.0, 0.0, wf, 0.0, 0.0, hf, wf, hf];
            let mapped = map_points(&corners, h, w, IMG_SIZE)?;
            let (nw, nh) = (new.width as f32, new.height as f32);
            let expected = [0.0, 0.0, nw, 0.0, 0.0, nh, nw, nh];
            for (a, b) in mapped.iter().zip(expected) {
                assert!((a - b).abs() <= 1.0, "({h}, {w}): {a} vs {b}");
            }
        }
        Ok(())
    }

    #[test]
    fn test_map_points_per_axis_ratio() -> Result<()> {
        // 5x6 -> 853x1024: x uses 1024/6, y uses 853/5
        let mapped = map_points(&[6.0, 5.0], 5, 6, IMG_SIZE)?;
        assert!((mapped[0] - 1024.0).abs() < 1e-3);
        assert!((mapped[1] - 853.0).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn test_map_points_does_not_mutate_input() -> Result<()> {
        let points = vec![256.0, 128.0];
        let mapped = map_points(&points, 1024, 512, IMG_SIZE)?;
        assert_eq!(points, vec![256.0, 128.0]);
        assert_eq!(mapped, vec![256.0, 128.0]);
        Ok(())
    }

    #[test]
    fn test_map_points_empty() -> Result<()> {
        assert!(map_points(&[], 480, 640, IMG_SIZE)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_map_points_rejects_odd_length() {
        let err = map_points(&[1.0, 2.0, 3.0], 480, 640, IMG_SIZE).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::InvalidInput);
    }
}
