use image::{GenericImageView, ImageBuffer, Luma, Pixel, Primitive, Rgb, Rgba};
use num_traits::AsPrimitive;

use crate::errors::{Result, SamError};
use crate::imageops::get_max_value;

/// Combines an RGB image with a single-channel mask into an RGBA cutout, the
/// mask becoming the alpha channel.
///
/// With `premultiply` the color channels are scaled by the mask as well, so
/// background pixels turn black instead of only transparent.
pub fn apply<I, M, SI, SM>(
    image: &I,
    mask: &M,
    premultiply: bool,
) -> Result<ImageBuffer<Rgba<SI>, Vec<SI>>>
where
    I: GenericImageView<Pixel = Rgb<SI>>,
    M: GenericImageView<Pixel = Luma<SM>>,
    Rgba<SI>: Pixel<Subpixel = SI>,
    SI: Primitive + 'static + AsPrimitive<f32>,
    SM: Primitive + 'static + AsPrimitive<f32>,
    f32: AsPrimitive<SI>,
    f32: AsPrimitive<SM>,
{
    if image.dimensions() != mask.dimensions() {
        let (iw, ih) = image.dimensions();
        let (mw, mh) = mask.dimensions();
        return Err(SamError::invalid_input(
            "mask",
            format!("is {mw}x{mh} but the image is {iw}x{ih}"),
        ));
    }

    let sm_max: f32 = get_max_value::<SM>().as_();
    let si_max: f32 = get_max_value::<SI>().as_();

    let processed_pixels = image
        .pixels()
        .zip(mask.pixels())
        .flat_map(|(image_pixel, mask_pixel)| {
            let Rgb([red, green, blue]) = image_pixel.2;
            let coverage = mask_pixel.2 .0[0].as_() / sm_max;
            let alpha: SI = (coverage * si_max).as_();

            if premultiply {
                let scale = |c: SI| -> SI { (c.as_() * coverage).as_() };
                [scale(red), scale(green), scale(blue), alpha]
            } else {
                [red, green, blue, alpha]
            }
        })
        .collect::<Vec<SI>>();

    ImageBuffer::from_raw(image.width(), image.height(), processed_pixels).ok_or_else(|| {
        SamError::ImageProcessing {
            operation: "cutout assembly".to_string(),
            source: "pixel buffer does not match image dimensions".into(),
        }
    })
}
