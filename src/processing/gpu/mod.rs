//! wgpu compute backend. Every stage is one (or two) compute passes submitted
//! on their own, so a stage's writes are visible to whatever runs next.

mod context;
mod shaders;
mod texture;

pub use texture::DeviceImage;

use crate::processing::backend::{ComputeBackend, Extent, ensure_shape};
use crate::processing::blur::gaussian_kernel;
use crate::processing::error::StageError;
use crate::processing::image::FloatImage;
use crate::processing::lighting::ShadingParams;
use crate::processing::reduce::{MinMax, REDUCE_TILE, check_dimensions, group_count, scan_partials};

use context::{GpuContext, REDUCE_STRIDE, ReduceBuffers, bytes_to_f32s, gpu_context};

pub use context::report_gpu_fallback_once;

/// Returns whether a hardware adapter could be initialized.
pub fn is_available() -> bool {
    gpu_context().is_some()
}

/// Adapter name and graphics API of the active context, if any.
pub fn adapter_summary() -> Option<(String, String)> {
    gpu_context().map(|ctx| (ctx.adapter_name.clone(), ctx.adapter_backend.clone()))
}

#[derive(Clone, Copy)]
pub struct GpuBackend {
    ctx: &'static GpuContext,
}

impl GpuBackend {
    pub fn new() -> Result<Self, StageError> {
        gpu_context()
            .map(|ctx| Self { ctx })
            .ok_or_else(|| StageError::Backend("no compatible GPU adapter".to_string()))
    }

    fn dims(img: &DeviceImage) -> [f32; 4] {
        [img.width() as f32, img.height() as f32, 0.0, 0.0]
    }

    fn affine(
        &self,
        stage: &'static str,
        input: &DeviceImage,
        mul: [f32; 3],
        add: [f32; 3],
        out: &mut DeviceImage,
    ) -> Result<(), StageError> {
        ensure_shape(stage, input, out)?;
        let params = self.ctx.uniform_buffer(
            stage,
            &[
                mul[0],
                mul[1],
                mul[2],
                1.0,
                add[0],
                add[1],
                add[2],
                0.0,
                input.width() as f32,
                input.height() as f32,
                0.0,
                0.0,
            ],
        );
        self.ctx.dispatch(
            stage,
            &self.ctx.affine,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: input.sampled(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: out.storage(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params.as_entire_binding(),
                },
            ],
            input.groups(),
        );
        Ok(())
    }
}

impl ComputeBackend for GpuBackend {
    type Image = DeviceImage;

    fn name(&self) -> &'static str {
        "gpu"
    }

    fn upload(&self, img: &FloatImage) -> Result<DeviceImage, StageError> {
        DeviceImage::upload(self.ctx, img)
    }

    fn download(&self, img: &DeviceImage) -> Result<FloatImage, StageError> {
        img.download(self.ctx)
    }

    fn allocate_like(&self, like: &DeviceImage) -> Result<DeviceImage, StageError> {
        DeviceImage::allocate(self.ctx, like.width(), like.height())
    }

    fn gaussian_blur(
        &self,
        input: &DeviceImage,
        radius: u32,
        sigma: f32,
        scratch: &mut DeviceImage,
        out: &mut DeviceImage,
    ) -> Result<(), StageError> {
        ensure_shape("blur", input, scratch)?;
        ensure_shape("blur", input, out)?;
        let kernel = gaussian_kernel(radius, sigma)?;

        let weights = self.ctx.storage_buffer("blur_weights", &kernel);
        let params = self.ctx.uniform_buffer(
            "blur_params",
            &[input.width() as f32, input.height() as f32, radius as f32, 0.0],
        );
        self.ctx.dispatch(
            "blur_h",
            &self.ctx.blur_h,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: input.sampled(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: scratch.storage(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: weights.as_entire_binding(),
                },
            ],
            input.groups(),
        );
        self.ctx.dispatch(
            "blur_v",
            &self.ctx.blur_v,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: scratch.sampled(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: out.storage(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: weights.as_entire_binding(),
                },
            ],
            input.groups(),
        );
        Ok(())
    }

    fn min_max(&self, input: &DeviceImage) -> Result<MinMax, StageError> {
        let (w, h) = input.dimensions();
        check_dimensions(w, h)?;
        let groups_x = group_count(w, REDUCE_TILE);
        let groups_y = group_count(h, REDUCE_TILE);
        let params = self.ctx.uniform_buffer(
            "reduce_params",
            &[w as f32, h as f32, groups_x as f32, groups_y as f32],
        );

        let bufs = self
            .ctx
            .reduce
            .lock()
            .map_err(|_| StageError::Backend("reduce buffers poisoned".to_string()))?;

        self.ctx.dispatch(
            "reduce_rows",
            &self.ctx.reduce_rows,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: input.sampled(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: bufs.row_min.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: bufs.row_max.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params.as_entire_binding(),
                },
            ],
            (groups_x, h),
        );
        // Phase 2 is a separate submission: it only starts after every row partial exists.
        self.ctx.dispatch(
            "reduce_cols",
            &self.ctx.reduce_cols,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: bufs.row_min.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: bufs.row_max.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: bufs.tile_min.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: bufs.tile_max.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: params.as_entire_binding(),
                },
            ],
            (groups_x, groups_y),
        );

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("reduce_readback"),
            });
        encoder.copy_buffer_to_buffer(&bufs.tile_min, 0, &bufs.readback, 0, ReduceBuffers::TILE_BYTES);
        encoder.copy_buffer_to_buffer(
            &bufs.tile_max,
            0,
            &bufs.readback,
            ReduceBuffers::TILE_BYTES,
            ReduceBuffers::TILE_BYTES,
        );
        self.ctx.queue.submit([encoder.finish()]);

        let (mins, maxs) = self.ctx.read_mapped(&bufs.readback, |bytes| {
            let split = ReduceBuffers::TILE_BYTES as usize;
            (to_vec4s(&bytes[..split]), to_vec4s(&bytes[split..]))
        })?;
        Ok(scan_partials(
            &mins,
            &maxs,
            REDUCE_STRIDE as usize,
            groups_x as usize,
            groups_y as usize,
        ))
    }

    fn gradients(
        &self,
        input: &DeviceImage,
        gx: &mut DeviceImage,
        gy: &mut DeviceImage,
        magnitude: &mut DeviceImage,
    ) -> Result<(), StageError> {
        ensure_shape("gradients", input, gx)?;
        ensure_shape("gradients", input, gy)?;
        ensure_shape("gradients", input, magnitude)?;
        let params = self.ctx.uniform_buffer("sobel_params", &Self::dims(input));
        self.ctx.dispatch(
            "sobel",
            &self.ctx.sobel,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: input.sampled(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: gx.storage(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: gy.storage(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: magnitude.storage(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: params.as_entire_binding(),
                },
            ],
            input.groups(),
        );
        Ok(())
    }

    fn shade(
        &self,
        gx: &DeviceImage,
        gy: &DeviceImage,
        density: &DeviceImage,
        params: &ShadingParams,
        out: &mut DeviceImage,
    ) -> Result<(), StageError> {
        ensure_shape("shade", gx, gy)?;
        ensure_shape("shade", gx, density)?;
        ensure_shape("shade", gx, out)?;
        let light = params.light_position();
        let uniforms = self.ctx.uniform_buffer(
            "shade_params",
            &[
                light.x,
                light.y,
                light.z,
                0.0,
                gx.width() as f32,
                gx.height() as f32,
                params.pixel_scale,
                params.gamma_correction,
            ],
        );
        self.ctx.dispatch(
            "shade",
            &self.ctx.shade,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: gx.sampled(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: gy.sampled(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: density.sampled(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: out.storage(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: uniforms.as_entire_binding(),
                },
            ],
            gx.groups(),
        );
        Ok(())
    }

    fn scale(&self, input: &DeviceImage, factor: [f32; 3], out: &mut DeviceImage) -> Result<(), StageError> {
        self.affine("scale", input, factor, [0.0; 3], out)
    }

    fn offset(&self, input: &DeviceImage, delta: [f32; 3], out: &mut DeviceImage) -> Result<(), StageError> {
        self.affine("offset", input, [1.0; 3], delta, out)
    }

    fn multiply(&self, a: &DeviceImage, b: &DeviceImage, out: &mut DeviceImage) -> Result<(), StageError> {
        ensure_shape("multiply", a, b)?;
        ensure_shape("multiply", a, out)?;
        let params = self.ctx.uniform_buffer("multiply_params", &Self::dims(a));
        self.ctx.dispatch(
            "multiply",
            &self.ctx.multiply,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: a.sampled(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: b.sampled(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: out.storage(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params.as_entire_binding(),
                },
            ],
            a.groups(),
        );
        Ok(())
    }
}

fn to_vec4s(bytes: &[u8]) -> Vec<[f32; 4]> {
    let flat: Vec<f32> = bytes_to_f32s(bytes).collect();
    flat.chunks_exact(4)
        .map(|c| [c[0], c[1], c[2], c[3]])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::shaders::{REDUCE_COLS_SHADER_SRC, REDUCE_ROWS_SHADER_SRC};
    use super::{GpuBackend, REDUCE_STRIDE};
    use crate::processing::backend::ComputeBackend;
    use crate::processing::cpu::CpuBackend;
    use crate::processing::error::StageError;
    use crate::processing::image::FloatImage;
    use crate::processing::lighting::ShadingParams;
    use crate::processing::reduce::REDUCE_TILE;

    fn pattern(width: u32, height: u32) -> FloatImage {
        FloatImage::from_fn(width, height, |x, y| {
            let v = ((x * 37 + y * 91) % 251) as f32;
            [v, 255.0 - v, ((x * y) % 17) as f32, 255.0]
        })
    }

    fn assert_float_close(cpu: &FloatImage, gpu: &FloatImage, tolerance: f32) {
        assert_eq!(cpu.dimensions(), gpu.dimensions());
        let mut worst = 0.0_f32;
        for (a, b) in cpu.as_raw().iter().zip(gpu.as_raw()) {
            worst = worst.max((a - b).abs());
        }
        assert!(worst <= tolerance, "max abs diff {worst} > {tolerance}");
    }

    #[test]
    fn reduce_shaders_share_stride_with_host() {
        let stride = format!("const STRIDE: u32 = {REDUCE_STRIDE}u;");
        let tile = format!("const TILE: u32 = {REDUCE_TILE}u;");
        for src in [REDUCE_ROWS_SHADER_SRC, REDUCE_COLS_SHADER_SRC] {
            assert!(src.contains(&stride));
            assert!(src.contains(&tile));
        }
    }

    #[test]
    fn upload_download_roundtrip_is_exact() {
        if !super::is_available() {
            return;
        }
        let gpu = GpuBackend::new().unwrap();
        // Odd width exercises the padded readback rows.
        let img = pattern(37, 11);
        let back = gpu.download(&gpu.upload(&img).unwrap()).unwrap();
        assert_eq!(img.as_raw(), back.as_raw());
    }

    #[test]
    fn parity_blur() {
        if !super::is_available() {
            return;
        }
        let cpu = CpuBackend::new();
        let gpu = GpuBackend::new().unwrap();
        let img = pattern(45, 30);

        let mut scratch = FloatImage::empty_like(&img);
        let mut expected = FloatImage::empty_like(&img);
        cpu.gaussian_blur(&img, 6, 2.5, &mut scratch, &mut expected).unwrap();

        let src = gpu.upload(&img).unwrap();
        let mut g_scratch = gpu.allocate_like(&src).unwrap();
        let mut g_out = gpu.allocate_like(&src).unwrap();
        gpu.gaussian_blur(&src, 6, 2.5, &mut g_scratch, &mut g_out).unwrap();
        assert_float_close(&expected, &gpu.download(&g_out).unwrap(), 1e-2);
    }

    #[test]
    fn parity_min_max_across_tile_boundaries() {
        if !super::is_available() {
            return;
        }
        let gpu = GpuBackend::new().unwrap();
        for (w, h) in [(1, 1), (256, 2), (300, 260), (513, 7)] {
            let img = pattern(w, h);
            let expected = CpuBackend::new().min_max(&img).unwrap();
            let got = gpu.min_max(&gpu.upload(&img).unwrap()).unwrap();
            assert_eq!(expected, got, "{w}x{h}");
        }
    }

    #[test]
    fn parity_gradients_and_shade() {
        if !super::is_available() {
            return;
        }
        let cpu = CpuBackend::new();
        let gpu = GpuBackend::new().unwrap();
        let img = pattern(33, 19);
        let density = FloatImage::from_fn(33, 19, |x, y| {
            let k = ((x + y) % 10) as f32 / 10.0;
            [k, k, k, 1.0]
        });

        let mut gx = FloatImage::empty_like(&img);
        let mut gy = FloatImage::empty_like(&img);
        let mut mag = FloatImage::empty_like(&img);
        cpu.gradients(&img, &mut gx, &mut gy, &mut mag).unwrap();

        let src = gpu.upload(&img).unwrap();
        let mut g_gx = gpu.allocate_like(&src).unwrap();
        let mut g_gy = gpu.allocate_like(&src).unwrap();
        let mut g_mag = gpu.allocate_like(&src).unwrap();
        gpu.gradients(&src, &mut g_gx, &mut g_gy, &mut g_mag).unwrap();
        assert_float_close(&gx, &gpu.download(&g_gx).unwrap(), 1e-2);
        assert_float_close(&gy, &gpu.download(&g_gy).unwrap(), 1e-2);
        assert_float_close(&mag, &gpu.download(&g_mag).unwrap(), 1e-2);

        let params = ShadingParams {
            width: 33,
            height: 19,
            light_x: -10.0,
            light_y: 40.0,
            light_z: 0.5,
            pixel_scale: 2.0,
            gamma_correction: 1.5,
        };
        // Shade on unit-range slopes, as the pipeline does after normalization.
        let scale = [1.0 / 1500.0; 3];
        let mut nx = FloatImage::empty_like(&img);
        let mut ny = FloatImage::empty_like(&img);
        cpu.scale(&gx, scale, &mut nx).unwrap();
        cpu.scale(&gy, scale, &mut ny).unwrap();
        let mut expected = FloatImage::empty_like(&img);
        cpu.shade(&nx, &ny, &density, &params, &mut expected).unwrap();

        let (g_nx, g_ny, g_d) = (
            gpu.upload(&nx).unwrap(),
            gpu.upload(&ny).unwrap(),
            gpu.upload(&density).unwrap(),
        );
        let mut g_out = gpu.allocate_like(&g_nx).unwrap();
        gpu.shade(&g_nx, &g_ny, &g_d, &params, &mut g_out).unwrap();
        assert_float_close(&expected, &gpu.download(&g_out).unwrap(), 1e-3);
    }

    #[test]
    fn parity_compose_ops() {
        if !super::is_available() {
            return;
        }
        let cpu = CpuBackend::new();
        let gpu = GpuBackend::new().unwrap();
        let a = pattern(20, 17);
        let b = FloatImage::from_fn(20, 17, |x, y| {
            let k = ((x * 3 + y) % 7) as f32 / 7.0;
            [k, 1.0 - k, 0.5, 1.0]
        });
        let (ga, gb) = (gpu.upload(&a).unwrap(), gpu.upload(&b).unwrap());
        let mut expected = FloatImage::empty_like(&a);
        let mut g_out = gpu.allocate_like(&ga).unwrap();

        cpu.scale(&a, [0.5, 2.0, 1.5], &mut expected).unwrap();
        gpu.scale(&ga, [0.5, 2.0, 1.5], &mut g_out).unwrap();
        assert_float_close(&expected, &gpu.download(&g_out).unwrap(), 1e-4);

        cpu.offset(&a, [0.25, -3.0, 10.0], &mut expected).unwrap();
        gpu.offset(&ga, [0.25, -3.0, 10.0], &mut g_out).unwrap();
        assert_float_close(&expected, &gpu.download(&g_out).unwrap(), 1e-4);

        cpu.multiply(&a, &b, &mut expected).unwrap();
        gpu.multiply(&ga, &gb, &mut g_out).unwrap();
        assert_float_close(&expected, &gpu.download(&g_out).unwrap(), 1e-3);
    }

    #[test]
    fn device_stages_reject_mismatched_shapes() {
        if !super::is_available() {
            return;
        }
        let gpu = GpuBackend::new().unwrap();
        let a = gpu.upload(&pattern(8, 4)).unwrap();
        let mut bad = gpu.upload(&pattern(4, 8)).unwrap();
        let mut good = gpu.allocate_like(&a).unwrap();
        assert!(matches!(
            gpu.scale(&a, [1.0; 3], &mut bad),
            Err(StageError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            gpu.gaussian_blur(&a, 2, 1.0, &mut bad, &mut good),
            Err(StageError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            gpu.multiply(&a, &bad, &mut good),
            Err(StageError::ShapeMismatch { .. })
        ));
    }
}
