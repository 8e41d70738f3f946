use super::error::StageError;
use super::image::FloatImage;
use super::lighting::ShadingParams;
use super::reduce::MinMax;

/// Dimensions of a backend-owned image handle.
pub trait Extent {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }
}

/// Stateless per-pixel stages executed by a compute backend.
///
/// Every stage validates operand shapes before doing any work, reads only from
/// `&` operands and writes only to `&mut` outputs, and has fully completed
/// (results visible to the next stage) when it returns.
pub trait ComputeBackend {
    /// Backend-resident image. Never implicitly duplicated.
    type Image: Extent;

    fn name(&self) -> &'static str;

    fn upload(&self, img: &FloatImage) -> Result<Self::Image, StageError>;

    fn download(&self, img: &Self::Image) -> Result<FloatImage, StageError>;

    /// Allocates an uninitialized image with the same dimensions as `like`.
    fn allocate_like(&self, like: &Self::Image) -> Result<Self::Image, StageError>;

    /// Separable Gaussian blur: horizontal pass into `scratch`, vertical into `out`.
    fn gaussian_blur(
        &self,
        input: &Self::Image,
        radius: u32,
        sigma: f32,
        scratch: &mut Self::Image,
        out: &mut Self::Image,
    ) -> Result<(), StageError>;

    /// Two-phase per-channel min/max reduction.
    fn min_max(&self, input: &Self::Image) -> Result<MinMax, StageError>;

    /// Per-channel Sobel gradients and their magnitude.
    fn gradients(
        &self,
        input: &Self::Image,
        gx: &mut Self::Image,
        gy: &mut Self::Image,
        magnitude: &mut Self::Image,
    ) -> Result<(), StageError>;

    /// Point-light shading over normalized gradients modulated by stroke density.
    fn shade(
        &self,
        gx: &Self::Image,
        gy: &Self::Image,
        density: &Self::Image,
        params: &ShadingParams,
        out: &mut Self::Image,
    ) -> Result<(), StageError>;

    fn scale(
        &self,
        input: &Self::Image,
        factor: [f32; 3],
        out: &mut Self::Image,
    ) -> Result<(), StageError>;

    fn offset(
        &self,
        input: &Self::Image,
        delta: [f32; 3],
        out: &mut Self::Image,
    ) -> Result<(), StageError>;

    fn multiply(
        &self,
        a: &Self::Image,
        b: &Self::Image,
        out: &mut Self::Image,
    ) -> Result<(), StageError>;
}

/// Shape guard shared by every backend.
pub fn ensure_shape<I: Extent>(stage: &'static str, a: &I, b: &I) -> Result<(), StageError> {
    super::error::ensure_same_shape(stage, a.dimensions(), b.dimensions())
}

impl Extent for FloatImage {
    fn width(&self) -> u32 {
        FloatImage::width(self)
    }

    fn height(&self) -> u32 {
        FloatImage::height(self)
    }
}
