use image::{DynamicImage, Rgba, Rgba32FImage, RgbaImage};

/// Number of interleaved channels per sample (RGBA).
pub const CHANNELS: usize = 4;

/// Full-precision RGBA working image.
///
/// Color channels live in `[0, 255]` for source-like data and `[0, 1]` for
/// masks such as stroke density or lighting. Alpha is carried through but never
/// read by the pipeline.
///
/// Two images compare equal when their dimensions match; pixel content is not
/// part of equality because comparisons only ever validate operand shapes.
#[derive(Clone, Debug)]
pub struct FloatImage {
    buf: Rgba32FImage,
}

impl FloatImage {
    /// Allocates a zero-filled image.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            buf: Rgba32FImage::new(width, height),
        }
    }

    /// Allocates an image of the same dimensions as `other`, zero-filled.
    pub fn empty_like(other: &FloatImage) -> Self {
        Self::new(other.width(), other.height())
    }

    pub fn from_pixel(width: u32, height: u32, px: [f32; 4]) -> Self {
        Self {
            buf: Rgba32FImage::from_pixel(width, height, Rgba(px)),
        }
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> [f32; 4]) -> Self {
        Self {
            buf: Rgba32FImage::from_fn(width, height, |x, y| Rgba(f(x, y))),
        }
    }

    /// Wraps raw interleaved RGBA samples, returning `None` on a length mismatch.
    pub fn from_raw(width: u32, height: u32, data: Vec<f32>) -> Option<Self> {
        Rgba32FImage::from_raw(width, height, data).map(|buf| Self { buf })
    }

    /// Converts a decoded image to the `[0, 255]` working range with opaque alpha.
    ///
    /// 16-bit and float sources keep their full precision.
    pub fn from_dynamic(img: &DynamicImage) -> Self {
        match img {
            DynamicImage::ImageLuma8(_)
            | DynamicImage::ImageLumaA8(_)
            | DynamicImage::ImageRgb8(_)
            | DynamicImage::ImageRgba8(_) => {
                let rgba = img.to_rgba8();
                Self::from_fn(rgba.width(), rgba.height(), |x, y| {
                    let px = rgba.get_pixel(x, y);
                    [px[0] as f32, px[1] as f32, px[2] as f32, 255.0]
                })
            }
            _ => {
                let rgba = img.to_rgba32f();
                Self::from_fn(rgba.width(), rgba.height(), |x, y| {
                    let px = rgba.get_pixel(x, y);
                    [px[0] * 255.0, px[1] * 255.0, px[2] * 255.0, 255.0]
                })
            }
        }
    }

    pub fn width(&self) -> u32 {
        self.buf.width()
    }

    pub fn height(&self) -> u32 {
        self.buf.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.buf.dimensions()
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Samples of one row (`width * 4` floats).
    pub fn row_len(&self) -> usize {
        self.width() as usize * CHANNELS
    }

    pub fn as_raw(&self) -> &[f32] {
        self.buf.as_raw()
    }

    pub fn as_raw_mut(&mut self) -> &mut [f32] {
        &mut self.buf
    }

    pub fn rgb(&self, x: u32, y: u32) -> [f32; 3] {
        let px = self.buf.get_pixel(x, y);
        [px[0], px[1], px[2]]
    }

    pub fn set_rgb(&mut self, x: u32, y: u32, rgb: [f32; 3]) {
        let px = self.buf.get_pixel_mut(x, y);
        px[0] = rgb[0];
        px[1] = rgb[1];
        px[2] = rgb[2];
    }

    pub fn pixel(&self, x: u32, y: u32) -> [f32; 4] {
        self.buf.get_pixel(x, y).0
    }

    /// Iterates `(r, g, b)` for every pixel in raster order.
    pub fn rgb_iter(&self) -> impl Iterator<Item = [f32; 3]> + '_ {
        self.buf.pixels().map(|px| [px[0], px[1], px[2]])
    }

    /// Maps a channel range to 8-bit RGBA, clamping and applying a display gamma.
    pub fn present(&self, range: (f32, f32), gamma: f32) -> RgbaImage {
        let (lo, hi) = range;
        let span = if (hi - lo).abs() > f32::EPSILON { hi - lo } else { 1.0 };
        let gamma = gamma.max(0.0);
        RgbaImage::from_fn(self.width(), self.height(), |x, y| {
            let px = self.buf.get_pixel(x, y);
            let mut out = [255_u8; 4];
            for c in 0..3 {
                let v = ((px[c] - lo) / span).clamp(0.0, 1.0).powf(gamma);
                out[c] = (v * 255.0).round() as u8;
            }
            Rgba(out)
        })
    }
}

impl Default for FloatImage {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl PartialEq for FloatImage {
    fn eq(&self, other: &Self) -> bool {
        self.dimensions() == other.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, ImageBuffer, Rgba};

    use super::FloatImage;

    #[test]
    fn equality_is_shape_only() {
        let a = FloatImage::from_pixel(3, 2, [1.0, 2.0, 3.0, 255.0]);
        let b = FloatImage::from_pixel(3, 2, [9.0, 9.0, 9.0, 255.0]);
        let c = FloatImage::new(2, 3);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn take_leaves_empty_source() {
        let mut a = FloatImage::from_pixel(4, 4, [1.0, 1.0, 1.0, 255.0]);
        let b = std::mem::take(&mut a);
        assert!(a.is_empty());
        assert_eq!(b.dimensions(), (4, 4));
    }

    #[test]
    fn clone_is_deep() {
        let a = FloatImage::from_pixel(2, 2, [10.0, 20.0, 30.0, 255.0]);
        let mut b = a.clone();
        b.set_rgb(0, 0, [0.0, 0.0, 0.0]);
        assert_eq!(a.rgb(0, 0), [10.0, 20.0, 30.0]);
        assert_eq!(b.rgb(0, 0), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn from_dynamic_uses_byte_range_and_opaque_alpha() {
        let img = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(1, 1, Rgba([12, 34, 56, 7])));
        let f = FloatImage::from_dynamic(&img);
        assert_eq!(f.pixel(0, 0), [12.0, 34.0, 56.0, 255.0]);
    }

    #[test]
    fn from_dynamic_keeps_sixteen_bit_precision() {
        let img = DynamicImage::ImageRgba16(ImageBuffer::from_pixel(1, 1, Rgba([32768, 0, 65535, 1])));
        let f = FloatImage::from_dynamic(&img);
        let px = f.pixel(0, 0);
        // 32768 / 65535 * 255; an 8-bit detour would round this to 128.
        assert!((px[0] - 127.50195).abs() < 1e-3, "r={}", px[0]);
        assert_eq!(px[1], 0.0);
        assert!((px[2] - 255.0).abs() < 1e-3);
        assert_eq!(px[3], 255.0);
    }

    #[test]
    fn present_maps_range_and_clamps() {
        let img = FloatImage::from_fn(3, 1, |x, _| {
            let v = [-0.5, 0.5, 2.0][x as usize];
            [v, v, v, 1.0]
        });
        let out = img.present((0.0, 1.0), 1.0);
        assert_eq!(out.get_pixel(0, 0)[0], 0);
        assert_eq!(out.get_pixel(1, 0)[0], 128);
        assert_eq!(out.get_pixel(2, 0)[0], 255);
        assert_eq!(out.get_pixel(1, 0)[3], 255);
    }
}
