use glam::Vec3;

use super::backend::ComputeBackend;
use super::error::StageError;
use super::reduce::MinMax;

/// Added to the gradient maximum before inverting it, so flat images do not
/// blow up the normalization scale.
pub const GRADIENT_EPS: f32 = 1e-10;

/// Floor applied before the gamma-correction power (`pow(0, 0)` is undefined in WGSL).
pub const SHADE_FLOOR: f32 = 1e-6;

/// Uniform inputs of the shading kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadingParams {
    pub width: u32,
    pub height: u32,
    /// Light position in pixel units (x right, y down).
    pub light_x: f32,
    pub light_y: f32,
    /// Light height, in multiples of the longer image side.
    pub light_z: f32,
    /// Relief strength applied to the normalized gradients.
    pub pixel_scale: f32,
    /// Exponent applied to the diffuse factor.
    pub gamma_correction: f32,
}

impl ShadingParams {
    /// Light position in the surface frame.
    pub fn light_position(&self) -> Vec3 {
        let extent = self.width.max(self.height) as f32;
        Vec3::new(self.light_x, self.light_y, self.light_z * extent)
    }
}

/// Diffuse point-light response for one channel of one pixel.
///
/// The surface normal comes from the normalized slope `(gx, gy)` whose
/// amplitude is scaled by `pixel_scale * density`: thick strokes read as tall
/// relief, diluted strokes stay flat.
#[inline]
pub fn shade_channel(light: Vec3, x: f32, y: f32, gx: f32, gy: f32, density: f32, p: &ShadingParams) -> f32 {
    let relief = p.pixel_scale * density;
    let normal = Vec3::new(-gx * relief, -gy * relief, 1.0);
    let to_light = (light - Vec3::new(x, y, 0.0)).normalize_or_zero();
    let k = (normal.dot(to_light) / normal.length()).max(0.0);
    k.max(SHADE_FLOOR).powf(p.gamma_correction).clamp(0.0, 1.0)
}

/// 3x3 Sobel response of one channel at `(x, y)` with clamped borders.
///
/// `fetch(x, y)` returns the channel sample; coordinates are already clamped.
#[inline]
pub fn sobel_at(x: i64, y: i64, width: i64, height: i64, fetch: impl Fn(usize, usize) -> f32) -> (f32, f32) {
    let at = |dx: i64, dy: i64| {
        let sx = (x + dx).clamp(0, width - 1) as usize;
        let sy = (y + dy).clamp(0, height - 1) as usize;
        fetch(sx, sy)
    };
    let gx = (at(1, -1) + 2.0 * at(1, 0) + at(1, 1)) - (at(-1, -1) + 2.0 * at(-1, 0) + at(-1, 1));
    let gy = (at(-1, 1) + 2.0 * at(0, 1) + at(1, 1)) - (at(-1, -1) + 2.0 * at(0, -1) + at(1, -1));
    (gx, gy)
}

/// Per-channel factor mapping gradients into `[-1, 1]`.
pub fn normalization_scale(magnitude: &MinMax) -> [f32; 3] {
    let mut scale = [0.0; 3];
    for c in 0..3 {
        scale[c] = 1.0 / (magnitude.max[c] + GRADIENT_EPS);
    }
    scale
}

/// Scratch images of the gradient/lighting stages, allocated once per load.
pub struct LightingBuffers<I> {
    pub gx: I,
    pub gy: I,
    pub magnitude: I,
    pub gx_normalized: I,
    pub gy_normalized: I,
}

impl<I> LightingBuffers<I> {
    pub fn allocate<B>(backend: &B, like: &I) -> Result<Self, StageError>
    where
        B: ComputeBackend<Image = I>,
    {
        Ok(Self {
            gx: backend.allocate_like(like)?,
            gy: backend.allocate_like(like)?,
            magnitude: backend.allocate_like(like)?,
            gx_normalized: backend.allocate_like(like)?,
            gy_normalized: backend.allocate_like(like)?,
        })
    }
}

/// Gradient estimation: slope images of `blurred`, normalized by the global
/// per-channel maximum of the gradient magnitude.
pub fn estimate_normals<B: ComputeBackend>(
    backend: &B,
    blurred: &B::Image,
    bufs: &mut LightingBuffers<B::Image>,
) -> Result<MinMax, StageError> {
    backend.gradients(blurred, &mut bufs.gx, &mut bufs.gy, &mut bufs.magnitude)?;
    let extent = backend.min_max(&bufs.magnitude)?;
    let scale = normalization_scale(&extent);
    backend.scale(&bufs.gx, scale, &mut bufs.gx_normalized)?;
    backend.scale(&bufs.gy, scale, &mut bufs.gy_normalized)?;
    Ok(extent)
}

/// Light synthesis: normals from `blurred`, shaded against the light and
/// modulated by `density`, written to `out` in `[0, 1]`.
pub fn synthesize<B: ComputeBackend>(
    backend: &B,
    blurred: &B::Image,
    density: &B::Image,
    params: &ShadingParams,
    bufs: &mut LightingBuffers<B::Image>,
    out: &mut B::Image,
) -> Result<(), StageError> {
    estimate_normals(backend, blurred, bufs)?;
    backend.shade(&bufs.gx_normalized, &bufs.gy_normalized, density, params, out)
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::{ShadingParams, normalization_scale, shade_channel, sobel_at};
    use crate::processing::reduce::MinMax;

    fn params() -> ShadingParams {
        ShadingParams {
            width: 10,
            height: 10,
            light_x: 5.0,
            light_y: 5.0,
            light_z: 1.0,
            pixel_scale: 1.0,
            gamma_correction: 1.0,
        }
    }

    #[test]
    fn flat_surface_under_overhead_light_is_fully_lit() {
        let p = params();
        let k = shade_channel(p.light_position(), 5.0, 5.0, 0.0, 0.0, 1.0, &p);
        assert!((k - 1.0).abs() < 1e-6);
    }

    #[test]
    fn slope_facing_light_is_brighter_than_slope_facing_away() {
        let mut p = params();
        p.light_x = 100.0;
        p.light_z = 0.2;
        let light = p.light_position();
        // Height decreasing toward +x (negative gx) tilts the normal toward the light.
        let toward = shade_channel(light, 5.0, 5.0, -0.8, 0.0, 1.0, &p);
        let away = shade_channel(light, 5.0, 5.0, 0.8, 0.0, 1.0, &p);
        assert!(toward > away, "toward={toward} away={away}");
    }

    #[test]
    fn zero_density_flattens_relief() {
        let p = params();
        let light = Vec3::new(100.0, 5.0, 2.0);
        let flat = shade_channel(light, 5.0, 5.0, 0.0, 0.0, 0.0, &p);
        let sloped = shade_channel(light, 5.0, 5.0, 0.9, -0.4, 0.0, &p);
        assert!((flat - sloped).abs() < 1e-6);
    }

    #[test]
    fn output_stays_in_unit_range() {
        let mut p = params();
        for gamma in [0.0_f32, 0.5, 1.0, 2.0] {
            p.gamma_correction = gamma;
            for (gx, gy) in [(-1.0, -1.0), (1.0, 1.0), (0.0, 0.3)] {
                let k = shade_channel(Vec3::new(-40.0, 80.0, 0.0), 3.0, 2.0, gx, gy, 1.0, &p);
                assert!((0.0..=1.0).contains(&k), "k={k}");
                assert!(k.is_finite());
            }
        }
    }

    #[test]
    fn sobel_detects_vertical_edge() {
        // Left column 0, right columns 100.
        let data = [[0.0, 100.0, 100.0]; 3];
        let (gx, gy) = sobel_at(1, 1, 3, 3, |x, y| data[y][x]);
        assert_eq!(gx, 400.0);
        assert_eq!(gy, 0.0);
    }

    #[test]
    fn normalization_guards_flat_gradients() {
        let scale = normalization_scale(&MinMax {
            min: [0.0; 3],
            max: [0.0, 2.0, 4.0],
        });
        assert!(scale[0].is_finite() && scale[0] > 1e9);
        assert!((scale[1] - 0.5).abs() < 1e-6);
        assert!((scale[2] - 0.25).abs() < 1e-6);
    }
}
