use image::{imageops, imageops::FilterType, DynamicImage, ImageBuffer, Pixel, Primitive, Rgb};
use ndarray::Array3;

use crate::errors::{Result, SamError};
use crate::imageops::{get_max_value, padding};
use crate::transforms::{resize_shape, ImageSize};

/// How the resized image is laid out on the encoder canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Padding {
    /// Keep the resized shape; only the long side equals the input size.
    #[default]
    None,
    /// Zero-fill bottom and right up to an `img_size` square.
    Square,
}

/// Encoder input: an HWC float tensor plus the sizes it was derived from.
#[derive(Debug, Clone)]
pub struct PreprocessedImage {
    pub tensor: Array3<f32>,
    pub original_size: ImageSize,
    /// Size of the image content inside `tensor`, before any padding.
    pub resized_size: ImageSize,
}

/// Resizes the long side of `image` to `img_size` and lays it out as an
/// `(height, width, 3)` tensor with intensities in `[0, 1]`.
pub fn preprocess<S>(
    image: &ImageBuffer<Rgb<S>, Vec<S>>,
    img_size: u32,
    padding_mode: Padding,
) -> Result<PreprocessedImage>
where
    Rgb<S>: Pixel<Subpixel = S>,
    S: Into<f32> + Primitive + 'static,
{
    let (width, height) = image.dimensions();
    let original_size = ImageSize::new(height, width);
    if original_size.is_empty() {
        return Err(SamError::invalid_input(
            "image",
            format!("has no pixels ({width}x{height})"),
        ));
    }

    let resized_size = resize_shape(height, width, img_size);
    let resized = imageops::resize(
        image,
        resized_size.width,
        resized_size.height,
        FilterType::Triangle,
    );

    let canvas = match padding_mode {
        Padding::None => resized,
        Padding::Square => {
            let zero = S::zero();
            padding::square(&resized, img_size, Rgb([zero, zero, zero])).ok_or_else(|| {
                SamError::ImageProcessing {
                    operation: "square padding".to_string(),
                    source: format!(
                        "resized image {}x{} exceeds {img_size}",
                        resized_size.width, resized_size.height
                    )
                    .into(),
                }
            })?
        }
    };

    let (w, h) = canvas.dimensions();
    let max: f32 = get_max_value::<S>().into();
    let data = canvas
        .into_raw()
        .into_iter()
        .map(|v| v.into() / max)
        .collect::<Vec<f32>>();
    let tensor = Array3::from_shape_vec((h as usize, w as usize, 3), data)?;

    Ok(PreprocessedImage {
        tensor,
        original_size,
        resized_size,
    })
}

/// [`preprocess`] at the bit depth of `image`. Alpha is dropped and gray
/// images are expanded to three channels.
pub fn preprocess_dynamic(
    image: &DynamicImage,
    img_size: u32,
    padding_mode: Padding,
) -> Result<PreprocessedImage> {
    match image {
        DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA16(_)
        | DynamicImage::ImageRgb16(_)
        | DynamicImage::ImageRgba16(_) => preprocess(&image.to_rgb16(), img_size, padding_mode),
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            preprocess(&image.to_rgb32f(), img_size, padding_mode)
        }
        _ => preprocess(&image.to_rgb8(), img_size, padding_mode),
    }
}
