use super::backend::ComputeBackend;
use super::error::StageError;
use super::reduce::MinMax;

/// Spans at or below this are treated as flat when normalizing.
const FLAT_SPAN: f32 = 1e-10;

/// `lighting = refined * gamma + ambient`, the light applied to the original.
pub fn final_lighting<B: ComputeBackend>(
    backend: &B,
    refined: &B::Image,
    gamma: f32,
    ambient: f32,
    gamma_scaled: &mut B::Image,
    out: &mut B::Image,
) -> Result<(), StageError> {
    backend.scale(refined, [gamma; 3], gamma_scaled)?;
    backend.offset(gamma_scaled, [ambient; 3], out)
}

/// Stretches every channel to `[0, max_value]`: `(v - min) * max_value / (max - min)`.
///
/// Flat channels (max == min) map to 0. Returns the extrema of the input.
pub fn normalize<B: ComputeBackend>(
    backend: &B,
    input: &B::Image,
    max_value: f32,
    scratch: &mut B::Image,
    out: &mut B::Image,
) -> Result<MinMax, StageError> {
    let extent = backend.min_max(input)?;
    let mut shift = [0.0; 3];
    let mut factor = [0.0; 3];
    for c in 0..3 {
        shift[c] = -extent.min[c];
        let span = extent.max[c] - extent.min[c];
        if span > FLAT_SPAN {
            factor[c] = max_value / span;
        }
    }
    backend.offset(input, shift, scratch)?;
    backend.scale(scratch, factor, out)?;
    Ok(extent)
}
