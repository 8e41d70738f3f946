use glam::Vec3;
use rayon::prelude::*;

use super::backend::{ComputeBackend, ensure_shape};
use super::blur::{convolve_at, gaussian_kernel};
use super::error::StageError;
use super::image::{CHANNELS, FloatImage};
use super::lighting::{ShadingParams, shade_channel, sobel_at};
use super::reduce::{MinMax, REDUCE_TILE, check_dimensions, group_count, scan_partials};

/// Rayon row-parallel implementation of every pipeline stage.
#[derive(Debug, Clone, Copy)]
pub struct CpuBackend {
    tile: u32,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self { tile: REDUCE_TILE }
    }
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a custom reduction tile width.
    pub fn with_tile(tile: u32) -> Self {
        Self { tile: tile.max(1) }
    }
}

fn non_empty(stage: &'static str, img: &FloatImage) -> Result<(), StageError> {
    if img.is_empty() {
        return Err(StageError::EmptyImage(stage));
    }
    Ok(())
}

/// Runs `f(y, row)` over every output row in parallel.
fn for_each_row(out: &mut FloatImage, f: impl Fn(usize, &mut [f32]) + Sync + Send) {
    let row_len = out.row_len();
    out.as_raw_mut()
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| f(y, row));
}

/// Per-channel `out = op(a, b)` with alpha copied from `a`.
fn zip_map(a: &FloatImage, out: &mut FloatImage, op: impl Fn(usize, usize, f32) -> f32 + Sync + Send) {
    let src = a.as_raw();
    let row_len = a.row_len();
    for_each_row(out, |y, row| {
        let base = y * row_len;
        for (i, px) in row.chunks_exact_mut(CHANNELS).enumerate() {
            let at = base + i * CHANNELS;
            for c in 0..3 {
                px[c] = op(at + c, c, src[at + c]);
            }
            px[3] = src[at + 3];
        }
    });
}

impl ComputeBackend for CpuBackend {
    type Image = FloatImage;

    fn name(&self) -> &'static str {
        "cpu"
    }

    fn upload(&self, img: &FloatImage) -> Result<FloatImage, StageError> {
        non_empty("upload", img)?;
        Ok(img.clone())
    }

    fn download(&self, img: &FloatImage) -> Result<FloatImage, StageError> {
        Ok(img.clone())
    }

    fn allocate_like(&self, like: &FloatImage) -> Result<FloatImage, StageError> {
        non_empty("allocate", like)?;
        Ok(FloatImage::empty_like(like))
    }

    fn gaussian_blur(
        &self,
        input: &FloatImage,
        radius: u32,
        sigma: f32,
        scratch: &mut FloatImage,
        out: &mut FloatImage,
    ) -> Result<(), StageError> {
        ensure_shape("blur", input, scratch)?;
        ensure_shape("blur", input, out)?;
        non_empty("blur", input)?;
        let kernel = gaussian_kernel(radius, sigma)?;

        let (w, h) = (input.width() as i64, input.height() as i64);
        let row_len = input.row_len();
        let src = input.as_raw();
        for_each_row(scratch, |y, row| {
            let line = &src[y * row_len..(y + 1) * row_len];
            for x in 0..w as usize {
                for c in 0..3 {
                    row[x * CHANNELS + c] =
                        convolve_at(&kernel, x as i64, w, |i| line[i * CHANNELS + c]);
                }
                row[x * CHANNELS + 3] = line[x * CHANNELS + 3];
            }
        });

        let tmp = scratch.as_raw();
        for_each_row(out, |y, row| {
            for x in 0..w as usize {
                for c in 0..3 {
                    row[x * CHANNELS + c] = convolve_at(&kernel, y as i64, h, |j| {
                        tmp[j * row_len + x * CHANNELS + c]
                    });
                }
                row[x * CHANNELS + 3] = tmp[y * row_len + x * CHANNELS + 3];
            }
        });
        Ok(())
    }

    fn min_max(&self, input: &FloatImage) -> Result<MinMax, StageError> {
        let (w, h) = input.dimensions();
        check_dimensions(w, h)?;
        let tile = self.tile as usize;
        let groups_x = group_count(w, self.tile) as usize;
        let groups_y = group_count(h, self.tile) as usize;
        let src = input.as_raw();
        let row_len = input.row_len();

        // Phase 1: one partial per (tile, row).
        let mut row_min = vec![[0.0_f32; 4]; groups_x * h as usize];
        let mut row_max = vec![[0.0_f32; 4]; groups_x * h as usize];
        row_min
            .par_chunks_mut(groups_x)
            .zip(row_max.par_chunks_mut(groups_x))
            .enumerate()
            .for_each(|(y, (mins, maxs))| {
                let line = &src[y * row_len..(y + 1) * row_len];
                for tx in 0..groups_x {
                    let end = ((tx + 1) * tile).min(w as usize);
                    let mut mm = MinMax::EMPTY;
                    for x in tx * tile..end {
                        let px = &line[x * CHANNELS..x * CHANNELS + 3];
                        mm.include([px[0], px[1], px[2]]);
                    }
                    mins[tx] = [mm.min[0], mm.min[1], mm.min[2], 0.0];
                    maxs[tx] = [mm.max[0], mm.max[1], mm.max[2], 0.0];
                }
            });

        // Phase 2: one partial per (tile column, tile row) over the phase-1 rows.
        let mut tile_min = vec![[0.0_f32; 4]; groups_x * groups_y];
        let mut tile_max = vec![[0.0_f32; 4]; groups_x * groups_y];
        tile_min
            .par_chunks_mut(groups_x)
            .zip(tile_max.par_chunks_mut(groups_x))
            .enumerate()
            .for_each(|(ty, (mins, maxs))| {
                let end = ((ty + 1) * tile).min(h as usize);
                for tx in 0..groups_x {
                    let mut lo = [f32::MAX; 4];
                    let mut hi = [f32::MIN; 4];
                    for y in ty * tile..end {
                        let (a, b) = (row_min[y * groups_x + tx], row_max[y * groups_x + tx]);
                        for c in 0..3 {
                            lo[c] = lo[c].min(a[c]);
                            hi[c] = hi[c].max(b[c]);
                        }
                    }
                    mins[tx] = lo;
                    maxs[tx] = hi;
                }
            });

        Ok(scan_partials(&tile_min, &tile_max, groups_x, groups_x, groups_y))
    }

    fn gradients(
        &self,
        input: &FloatImage,
        gx: &mut FloatImage,
        gy: &mut FloatImage,
        magnitude: &mut FloatImage,
    ) -> Result<(), StageError> {
        ensure_shape("gradients", input, gx)?;
        ensure_shape("gradients", input, gy)?;
        ensure_shape("gradients", input, magnitude)?;
        non_empty("gradients", input)?;

        let (w, h) = (input.width() as i64, input.height() as i64);
        let row_len = input.row_len();
        let src = input.as_raw();
        gx.as_raw_mut()
            .par_chunks_mut(row_len)
            .zip(gy.as_raw_mut().par_chunks_mut(row_len))
            .zip(magnitude.as_raw_mut().par_chunks_mut(row_len))
            .enumerate()
            .for_each(|(y, ((gx_row, gy_row), mag_row))| {
                for x in 0..w as usize {
                    let at = x * CHANNELS;
                    for c in 0..3 {
                        let (sx, sy) = sobel_at(x as i64, y as i64, w, h, |px, py| {
                            src[py * row_len + px * CHANNELS + c]
                        });
                        gx_row[at + c] = sx;
                        gy_row[at + c] = sy;
                        mag_row[at + c] = (sx * sx + sy * sy).sqrt();
                    }
                    let alpha = src[y * row_len + at + 3];
                    gx_row[at + 3] = alpha;
                    gy_row[at + 3] = alpha;
                    mag_row[at + 3] = alpha;
                }
            });
        Ok(())
    }

    fn shade(
        &self,
        gx: &FloatImage,
        gy: &FloatImage,
        density: &FloatImage,
        params: &ShadingParams,
        out: &mut FloatImage,
    ) -> Result<(), StageError> {
        ensure_shape("shade", gx, gy)?;
        ensure_shape("shade", gx, density)?;
        ensure_shape("shade", gx, out)?;
        non_empty("shade", gx)?;

        let light: Vec3 = params.light_position();
        let row_len = gx.row_len();
        let (sx, sy, sd) = (gx.as_raw(), gy.as_raw(), density.as_raw());
        for_each_row(out, |y, row| {
            for (x, px) in row.chunks_exact_mut(CHANNELS).enumerate() {
                let at = y * row_len + x * CHANNELS;
                for c in 0..3 {
                    px[c] = shade_channel(
                        light,
                        x as f32,
                        y as f32,
                        sx[at + c],
                        sy[at + c],
                        sd[at + c],
                        params,
                    );
                }
                px[3] = 1.0;
            }
        });
        Ok(())
    }

    fn scale(&self, input: &FloatImage, factor: [f32; 3], out: &mut FloatImage) -> Result<(), StageError> {
        ensure_shape("scale", input, out)?;
        non_empty("scale", input)?;
        zip_map(input, out, |_, c, v| v * factor[c]);
        Ok(())
    }

    fn offset(&self, input: &FloatImage, delta: [f32; 3], out: &mut FloatImage) -> Result<(), StageError> {
        ensure_shape("offset", input, out)?;
        non_empty("offset", input)?;
        zip_map(input, out, |_, c, v| v + delta[c]);
        Ok(())
    }

    fn multiply(&self, a: &FloatImage, b: &FloatImage, out: &mut FloatImage) -> Result<(), StageError> {
        ensure_shape("multiply", a, b)?;
        ensure_shape("multiply", a, out)?;
        non_empty("multiply", a)?;
        let rhs = b.as_raw();
        zip_map(a, out, |i, _, v| v * rhs[i]);
        Ok(())
    }
}
