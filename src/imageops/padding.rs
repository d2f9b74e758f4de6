use image::{imageops, GenericImageView, ImageBuffer, Pixel, Primitive};

/// Places `image` at the top-left corner of a `pad_width` x `pad_height`
/// canvas filled with `color`.
///
/// Returns `None` when the image does not fit the canvas.
pub fn pad_bottom_right<I, P, S>(
    image: &I,
    pad_width: u32,
    pad_height: u32,
    color: P,
) -> Option<ImageBuffer<P, Vec<S>>>
where
    I: GenericImageView<Pixel = P>,
    P: Pixel<Subpixel = S>,
    S: Primitive,
{
    let (width, height) = image.dimensions();
    if width > pad_width || height > pad_height {
        return None;
    }

    let mut canvas = ImageBuffer::from_pixel(pad_width, pad_height, color);
    imageops::overlay(&mut canvas, image, 0, 0);
    Some(canvas)
}

/// Pads to a `side` x `side` square, see [`pad_bottom_right`].
pub fn square<I, P, S>(image: &I, side: u32, color: P) -> Option<ImageBuffer<P, Vec<S>>>
where
    I: GenericImageView<Pixel = P>,
    P: Pixel<Subpixel = S>,
    S: Primitive,
{
    pad_bottom_right(image, side, side, color)
}
