//! RGB image resampling and padding used by the model clients.

use crate::types::Image;

/// Bilinear resize to `(new_width, new_height)`.
pub fn resize_bilinear(src: &Image, new_width: u32, new_height: u32) -> Image {
    if src.width() == new_width && src.height() == new_height {
        return src.clone();
    }

    let mut out = Image::new(new_width, new_height);
    let scale_x = src.width() as f32 / new_width as f32;
    let scale_y = src.height() as f32 / new_height as f32;

    for y in 0..new_height {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, src.height() as i32 - 1);
        let y1 = (y0 + 1).min(src.height() as i32 - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_width {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, src.width() as i32 - 1);
            let x1 = (x0 + 1).min(src.width() as i32 - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let tl = src.pixel(x0 as u32, y0 as u32);
            let tr = src.pixel(x1 as u32, y0 as u32);
            let bl = src.pixel(x0 as u32, y1 as u32);
            let br = src.pixel(x1 as u32, y1 as u32);

            let mut rgb = [0u8; 3];
            for c in 0..3 {
                let val = tl[c] as f32 * (1.0 - fx) * (1.0 - fy)
                    + tr[c] as f32 * fx * (1.0 - fy)
                    + bl[c] as f32 * (1.0 - fx) * fy
                    + br[c] as f32 * fx * fy;
                rgb[c] = val.round().clamp(0.0, 255.0) as u8;
            }
            out.set_pixel(x, y, rgb);
        }
    }

    out
}

/// Pad an image symmetrically with a zero-fill border of
/// `ratio × width` / `ratio × height` pixels per side.
///
/// Returns the padded image and the `(off_x, off_y)` border widths that a
/// caller must subtract from detector coordinates to map them back to the
/// original frame.
pub fn pad_image(src: &Image, ratio: f32) -> (Image, u32, u32) {
    let off_x = (ratio * src.width() as f32) as u32;
    let off_y = (ratio * src.height() as f32) as u32;

    let mut out = Image::new(src.width() + 2 * off_x, src.height() + 2 * off_y);
    for y in 0..src.height() {
        for x in 0..src.width() {
            out.set_pixel(x + off_x, y + off_y, src.pixel(x, y));
        }
    }

    (out, off_x, off_y)
}
