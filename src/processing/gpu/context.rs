use std::sync::{
    Mutex, OnceLock,
    atomic::{AtomicBool, Ordering},
    mpsc,
};

use crate::processing::error::StageError;
use crate::processing::reduce::{MAX_REDUCE_DIMENSION, REDUCE_TILE};

use super::shaders::{
    AFFINE_SHADER_SRC, BLUR_H_SHADER_SRC, BLUR_V_SHADER_SRC, MULTIPLY_SHADER_SRC,
    REDUCE_COLS_SHADER_SRC, REDUCE_ROWS_SHADER_SRC, SHADE_SHADER_SRC, SOBEL_SHADER_SRC,
};

pub const WORKGROUP_SIZE: u32 = 16;

/// Tile slots per row of the reducer's partial buffers.
pub const REDUCE_STRIDE: u32 = MAX_REDUCE_DIMENSION / REDUCE_TILE;

/// Format of every device image.
pub const IMAGE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

const VEC4_BYTES: u64 = 16;

pub struct PipelineBundle {
    pub pipeline: wgpu::ComputePipeline,
    pub bgl: wgpu::BindGroupLayout,
}

/// Phase-1 and phase-2 partials of the reducer, plus the host-visible copy
/// of the phase-2 array. Guarded by a mutex because every reduction reuses them.
pub struct ReduceBuffers {
    pub row_min: wgpu::Buffer,
    pub row_max: wgpu::Buffer,
    pub tile_min: wgpu::Buffer,
    pub tile_max: wgpu::Buffer,
    pub readback: wgpu::Buffer,
}

impl ReduceBuffers {
    pub const TILE_BYTES: u64 = REDUCE_STRIDE as u64 * REDUCE_STRIDE as u64 * VEC4_BYTES;

    fn new(device: &wgpu::Device) -> Self {
        let row_bytes = REDUCE_STRIDE as u64 * MAX_REDUCE_DIMENSION as u64 * VEC4_BYTES;
        let storage = |label: &str, size: u64| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        };
        Self {
            row_min: storage("reduce_row_min", row_bytes),
            row_max: storage("reduce_row_max", row_bytes),
            tile_min: storage("reduce_tile_min", Self::TILE_BYTES),
            tile_max: storage("reduce_tile_max", Self::TILE_BYTES),
            readback: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("reduce_readback"),
                size: Self::TILE_BYTES * 2,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            }),
        }
    }
}

pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub blur_h: PipelineBundle,
    pub blur_v: PipelineBundle,
    pub reduce_rows: PipelineBundle,
    pub reduce_cols: PipelineBundle,
    pub sobel: PipelineBundle,
    pub shade: PipelineBundle,
    pub affine: PipelineBundle,
    pub multiply: PipelineBundle,
    pub reduce: Mutex<ReduceBuffers>,
    pub adapter_name: String,
    pub adapter_backend: String,
}

static GPU_CONTEXT: OnceLock<Option<GpuContext>> = OnceLock::new();
static GPU_FALLBACK_REPORTED: AtomicBool = AtomicBool::new(false);

pub fn gpu_context() -> Option<&'static GpuContext> {
    GPU_CONTEXT.get_or_init(init_gpu_context).as_ref()
}

fn init_gpu_context() -> Option<GpuContext> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        force_fallback_adapter: false,
        compatible_surface: None,
    }))?;
    let adapter_info = adapter.get_info();
    // Software rasterizers (llvmpipe and friends) are slower than the rayon path.
    if adapter_info.device_type == wgpu::DeviceType::Cpu {
        tracing::debug!(adapter = %adapter_info.name, "gpu: rejecting software adapter");
        return None;
    }
    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("paintlight_device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
            memory_hints: wgpu::MemoryHints::Performance,
        },
        None,
    ))
    .ok()?;

    let one_in_one_out = [
        texture_entry(0),
        storage_texture_entry(1),
        uniform_entry(2),
    ];
    let blur_entries = [
        texture_entry(0),
        storage_texture_entry(1),
        uniform_entry(2),
        buffer_entry(3, true),
    ];
    let reduce_rows_entries = [
        texture_entry(0),
        buffer_entry(1, false),
        buffer_entry(2, false),
        uniform_entry(3),
    ];
    let reduce_cols_entries = [
        buffer_entry(0, true),
        buffer_entry(1, true),
        buffer_entry(2, false),
        buffer_entry(3, false),
        uniform_entry(4),
    ];
    let sobel_entries = [
        texture_entry(0),
        storage_texture_entry(1),
        storage_texture_entry(2),
        storage_texture_entry(3),
        uniform_entry(4),
    ];
    let shade_entries = [
        texture_entry(0),
        texture_entry(1),
        texture_entry(2),
        storage_texture_entry(3),
        uniform_entry(4),
    ];
    let multiply_entries = [
        texture_entry(0),
        texture_entry(1),
        storage_texture_entry(2),
        uniform_entry(3),
    ];

    let reduce = Mutex::new(ReduceBuffers::new(&device));
    let ctx = GpuContext {
        blur_h: create_pipeline_bundle(&device, "blur_h", BLUR_H_SHADER_SRC, &blur_entries),
        blur_v: create_pipeline_bundle(&device, "blur_v", BLUR_V_SHADER_SRC, &blur_entries),
        reduce_rows: create_pipeline_bundle(
            &device,
            "reduce_rows",
            REDUCE_ROWS_SHADER_SRC,
            &reduce_rows_entries,
        ),
        reduce_cols: create_pipeline_bundle(
            &device,
            "reduce_cols",
            REDUCE_COLS_SHADER_SRC,
            &reduce_cols_entries,
        ),
        sobel: create_pipeline_bundle(&device, "sobel", SOBEL_SHADER_SRC, &sobel_entries),
        shade: create_pipeline_bundle(&device, "shade", SHADE_SHADER_SRC, &shade_entries),
        affine: create_pipeline_bundle(&device, "affine", AFFINE_SHADER_SRC, &one_in_one_out),
        multiply: create_pipeline_bundle(&device, "multiply", MULTIPLY_SHADER_SRC, &multiply_entries),
        reduce,
        adapter_name: adapter_info.name,
        adapter_backend: adapter_info.backend.to_string(),
        device,
        queue,
    };
    tracing::info!(
        adapter = %ctx.adapter_name,
        backend = %ctx.adapter_backend,
        "gpu: compute context ready"
    );
    Some(ctx)
}

pub fn create_pipeline_bundle(
    device: &wgpu::Device,
    label: &str,
    shader_src: &str,
    bgl_entries: &[wgpu::BindGroupLayoutEntry],
) -> PipelineBundle {
    let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: bgl_entries,
    });
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(shader_src.into()),
    });
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[&bgl],
        push_constant_ranges: &[],
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        module: &shader,
        entry_point: Some("main"),
        cache: None,
        compilation_options: wgpu::PipelineCompilationOptions::default(),
    });
    PipelineBundle { pipeline, bgl }
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn storage_texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: IMAGE_FORMAT,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn buffer_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl GpuContext {
    /// Uniform block from packed f32 fields (callers pad to 16 bytes).
    pub fn uniform_buffer(&self, label: &str, values: &[f32]) -> wgpu::Buffer {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: std::mem::size_of_val(values) as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue.write_buffer(&buffer, 0, f32s_as_bytes(values));
        buffer
    }

    pub fn storage_buffer(&self, label: &str, values: &[f32]) -> wgpu::Buffer {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: std::mem::size_of_val(values) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue.write_buffer(&buffer, 0, f32s_as_bytes(values));
        buffer
    }

    /// Encodes one compute pass and submits it on its own.
    ///
    /// The pass ends and its bind group is released before this returns;
    /// later submissions observe every write it made.
    pub fn dispatch(
        &self,
        label: &str,
        bundle: &PipelineBundle,
        entries: &[wgpu::BindGroupEntry],
        groups: (u32, u32),
    ) {
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &bundle.bgl,
            entries,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(&bundle.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups.0, groups.1, 1);
        }
        self.queue.submit([encoder.finish()]);
    }

    /// Blocks until `buffer` is mapped for reading, then hands its bytes to `read`.
    pub fn read_mapped<T>(
        &self,
        buffer: &wgpu::Buffer,
        read: impl FnOnce(&[u8]) -> T,
    ) -> Result<T, StageError> {
        let slice = buffer.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::wait());
        let mapped = rx
            .recv()
            .map_err(|_| StageError::Backend("readback callback dropped".to_string()))?;
        mapped.map_err(|e| StageError::Backend(format!("readback map failed: {e}")))?;

        let view = slice.get_mapped_range();
        let out = read(&view);
        drop(view);
        buffer.unmap();
        Ok(out)
    }
}

pub fn report_gpu_fallback_once() {
    if !GPU_FALLBACK_REPORTED.swap(true, Ordering::Relaxed) {
        tracing::warn!("gpu: no usable adapter, running the pipeline on the CPU backend");
    }
}

pub fn f32s_as_bytes(values: &[f32]) -> &[u8] {
    // f32 has no invalid bit patterns; reinterpreting as bytes is safe.
    unsafe {
        std::slice::from_raw_parts(values.as_ptr().cast::<u8>(), std::mem::size_of_val(values))
    }
}

pub fn bytes_to_f32s(bytes: &[u8]) -> impl Iterator<Item = f32> + '_ {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
}
