use super::error::StageError;

/// Largest blur radius the convolver accepts (kernel length `2 * 92 + 1`).
pub const MAX_BLUR_RADIUS: u32 = 92;

const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;

/// Builds a normalized 1-D Gaussian kernel of length `2 * radius + 1`.
///
/// Weights follow `exp(-t^2 / (2 sigma^2)) / (sigma * sqrt(2 pi))` and are
/// then divided by their sum, so the truncated tails do not darken the image.
pub fn gaussian_kernel(radius: u32, sigma: f32) -> Result<Vec<f32>, StageError> {
    validate(radius, sigma)?;

    let sigma = sigma as f64;
    let r = radius as i64;
    let mut weights: Vec<f64> = (-r..=r)
        .map(|t| INV_SQRT_2PI * (-0.5 * (t * t) as f64 / (sigma * sigma)).exp() / sigma)
        .collect();
    let sum: f64 = weights.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        for w in &mut weights {
            *w /= sum;
        }
    } else {
        // Very small sigma underflows every tap except the center.
        weights.iter_mut().for_each(|w| *w = 0.0);
        weights[radius as usize] = 1.0;
    }
    Ok(weights.into_iter().map(|w| w as f32).collect())
}

/// Rejects radii above [`MAX_BLUR_RADIUS`] and non-positive sigma.
pub fn validate(radius: u32, sigma: f32) -> Result<(), StageError> {
    if radius > MAX_BLUR_RADIUS {
        return Err(StageError::RadiusTooLarge {
            radius,
            max: MAX_BLUR_RADIUS,
        });
    }
    if !(sigma > 0.0) || !sigma.is_finite() {
        return Err(StageError::InvalidSigma(sigma));
    }
    Ok(())
}

/// One clamped-edge 1-D convolution tap sum along a line of `len` samples.
///
/// `fetch(i)` returns the channel value at index `i` (already clamped by this
/// function to `[0, len)`).
#[inline]
pub fn convolve_at(kernel: &[f32], center: i64, len: i64, fetch: impl Fn(usize) -> f32) -> f32 {
    let radius = (kernel.len() / 2) as i64;
    let mut acc = 0.0_f32;
    for (k, w) in kernel.iter().enumerate() {
        let i = (center + k as i64 - radius).clamp(0, len - 1);
        acc += w * fetch(i as usize);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::{MAX_BLUR_RADIUS, convolve_at, gaussian_kernel};
    use crate::processing::error::StageError;

    #[test]
    fn kernel_sums_to_one_across_radii_and_sigmas() {
        for radius in [0, 1, 2, 5, 17, 64, MAX_BLUR_RADIUS] {
            for sigma in [0.1_f32, 0.5, 1.0, 3.3, 16.0, 50.0] {
                let k = gaussian_kernel(radius, sigma).expect("valid kernel");
                assert_eq!(k.len(), (2 * radius + 1) as usize);
                let sum: f32 = k.iter().sum();
                assert!(
                    (sum - 1.0).abs() < 1e-5,
                    "radius={radius} sigma={sigma} sum={sum}"
                );
            }
        }
    }

    #[test]
    fn kernel_is_symmetric_and_peaks_at_center() {
        let k = gaussian_kernel(5, 1.5).unwrap();
        for t in 0..5 {
            assert!((k[t] - k[10 - t]).abs() < 1e-7);
            assert!(k[t] < k[t + 1]);
        }
    }

    #[test]
    fn radius_zero_is_identity_tap() {
        assert_eq!(gaussian_kernel(0, 4.0).unwrap(), vec![1.0]);
    }

    #[test]
    fn rejects_radius_above_max() {
        assert_eq!(
            gaussian_kernel(MAX_BLUR_RADIUS + 1, 1.0),
            Err(StageError::RadiusTooLarge {
                radius: MAX_BLUR_RADIUS + 1,
                max: MAX_BLUR_RADIUS
            })
        );
    }

    #[test]
    fn rejects_non_positive_sigma() {
        assert!(matches!(
            gaussian_kernel(3, 0.0),
            Err(StageError::InvalidSigma(_))
        ));
        assert!(matches!(
            gaussian_kernel(3, f32::NAN),
            Err(StageError::InvalidSigma(_))
        ));
    }

    #[test]
    fn convolve_clamps_at_edges() {
        let line = [10.0_f32, 20.0, 30.0];
        let k = [0.25_f32, 0.5, 0.25];
        let left = convolve_at(&k, 0, 3, |i| line[i]);
        let right = convolve_at(&k, 2, 3, |i| line[i]);
        assert!((left - (0.25 * 10.0 + 0.5 * 10.0 + 0.25 * 20.0)).abs() < 1e-6);
        assert!((right - (0.25 * 20.0 + 0.5 * 30.0 + 0.25 * 30.0)).abs() < 1e-6);
    }
}
