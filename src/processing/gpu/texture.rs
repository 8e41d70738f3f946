use crate::processing::backend::Extent;
use crate::processing::error::StageError;
use crate::processing::image::{CHANNELS, FloatImage};

use super::context::{GpuContext, IMAGE_FORMAT, bytes_to_f32s, f32s_as_bytes};

const BYTES_PER_PIXEL: u32 = (CHANNELS * std::mem::size_of::<f32>()) as u32;

/// One `Rgba32Float` texture with a sampled view for reads and a storage
/// view for writes. Owned, never cloned; dropping it frees the texture.
pub struct DeviceImage {
    texture: wgpu::Texture,
    sampled: wgpu::TextureView,
    storage: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl DeviceImage {
    pub fn allocate(ctx: &GpuContext, width: u32, height: u32) -> Result<Self, StageError> {
        if width == 0 || height == 0 {
            return Err(StageError::EmptyImage("allocate"));
        }
        let max = ctx.device.limits().max_texture_dimension_2d;
        if width > max || height > max {
            return Err(StageError::ImageTooLarge { width, height, max });
        }
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("paintlight_image"),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: IMAGE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let sampled = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let storage = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Self {
            texture,
            sampled,
            storage,
            width,
            height,
        })
    }

    pub fn upload(ctx: &GpuContext, img: &FloatImage) -> Result<Self, StageError> {
        let out = Self::allocate(ctx, img.width(), img.height())?;
        ctx.queue.write_texture(
            out.texture.as_image_copy(),
            f32s_as_bytes(img.as_raw()),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(img.width() * BYTES_PER_PIXEL),
                rows_per_image: Some(img.height()),
            },
            extent(img.width(), img.height()),
        );
        Ok(out)
    }

    /// Copies the texture back through a row-padded staging buffer.
    pub fn download(&self, ctx: &GpuContext) -> Result<FloatImage, StageError> {
        let unpadded = self.width * BYTES_PER_PIXEL;
        let padded = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let readback = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("paintlight_readback"),
            size: padded as u64 * self.height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("paintlight_download"),
            });
        encoder.copy_texture_to_buffer(
            self.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(self.height),
                },
            },
            extent(self.width, self.height),
        );
        ctx.queue.submit([encoder.finish()]);

        let (unpadded, padded) = (unpadded as usize, padded as usize);
        let height = self.height as usize;
        let data = ctx.read_mapped(&readback, |bytes| {
            let mut out = Vec::with_capacity(unpadded / 4 * height);
            for row in 0..height {
                let start = row * padded;
                out.extend(bytes_to_f32s(&bytes[start..start + unpadded]));
            }
            out
        })?;
        FloatImage::from_raw(self.width, self.height, data)
            .ok_or_else(|| StageError::Backend("readback size mismatch".to_string()))
    }

    pub fn sampled(&self) -> wgpu::BindingResource<'_> {
        wgpu::BindingResource::TextureView(&self.sampled)
    }

    pub fn storage(&self) -> wgpu::BindingResource<'_> {
        wgpu::BindingResource::TextureView(&self.storage)
    }

    /// Workgroup grid covering the image with 16x16 groups.
    pub fn groups(&self) -> (u32, u32) {
        use super::context::WORKGROUP_SIZE;
        (
            self.width.div_ceil(WORKGROUP_SIZE),
            self.height.div_ceil(WORKGROUP_SIZE),
        )
    }
}

impl Extent for DeviceImage {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}
