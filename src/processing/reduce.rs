use super::error::StageError;

/// Samples reduced by one workgroup/tile along a row in phase 1, and rows
/// reduced per tile in phase 2.
pub const REDUCE_TILE: u32 = 256;

/// Largest width or height the reducer's fixed partial-result buffers cover.
pub const MAX_REDUCE_DIMENSION: u32 = 8192;

/// Per-channel (R, G, B) extrema of an image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinMax {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl MinMax {
    /// Identity element: folding any sample into it yields that sample.
    pub const EMPTY: MinMax = MinMax {
        min: [f32::MAX; 3],
        max: [f32::MIN; 3],
    };

    pub fn include(&mut self, rgb: [f32; 3]) {
        for c in 0..3 {
            self.min[c] = self.min[c].min(rgb[c]);
            self.max[c] = self.max[c].max(rgb[c]);
        }
    }
}

/// Number of tiles/groups covering `dimension` samples: `ceil(dimension / threads)`.
pub fn group_count(dimension: u32, threads: u32) -> u32 {
    dimension.div_ceil(threads)
}

/// Rejects images the reducer cannot hold.
pub fn check_dimensions(width: u32, height: u32) -> Result<(), StageError> {
    if width == 0 || height == 0 {
        return Err(StageError::EmptyImage("min_max"));
    }
    if width > MAX_REDUCE_DIMENSION || height > MAX_REDUCE_DIMENSION {
        return Err(StageError::ImageTooLarge {
            width,
            height,
            max: MAX_REDUCE_DIMENSION,
        });
    }
    Ok(())
}

/// Final host-side scan over the phase-2 array.
///
/// `mins`/`maxs` are laid out row-major with `stride` entries per tile row;
/// only the first `groups_x` entries of the first `groups_y` rows are valid.
pub fn scan_partials(
    mins: &[[f32; 4]],
    maxs: &[[f32; 4]],
    stride: usize,
    groups_x: usize,
    groups_y: usize,
) -> MinMax {
    let mut out = MinMax::EMPTY;
    for ty in 0..groups_y {
        for tx in 0..groups_x {
            let i = ty * stride + tx;
            let lo = mins[i];
            let hi = maxs[i];
            for c in 0..3 {
                out.min[c] = out.min[c].min(lo[c]);
                out.max[c] = out.max[c].max(hi[c]);
            }
        }
    }
    out
}

/// Brute-force scan, used as the reference for the two-phase reducers.
pub fn scan_all(samples: &[f32]) -> MinMax {
    let mut out = MinMax::EMPTY;
    for px in samples.chunks_exact(4) {
        out.include([px[0], px[1], px[2]]);
    }
    out
}
