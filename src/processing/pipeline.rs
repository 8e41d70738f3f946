use std::path::Path;
use std::time::Instant;

use glam::Vec3;
use image::RgbaImage;

use super::backend::ComputeBackend;
use super::compose;
use super::error::StageError;
use super::hull::{HullBuilder, QuickHull};
use super::image::FloatImage;
use super::lighting::{self, LightingBuffers};
use super::palette;
use crate::loader;
use crate::state::LightParams;

/// Buffer shown to the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    Result,
    Original,
    Palette,
    StrokeDensity,
    Blurred,
    RefinedLighting,
    FinalLighting,
}

impl View {
    pub const ALL: [View; 7] = [
        View::Result,
        View::Original,
        View::Palette,
        View::StrokeDensity,
        View::Blurred,
        View::RefinedLighting,
        View::FinalLighting,
    ];

    pub fn name(self) -> &'static str {
        match self {
            View::Result => "result",
            View::Original => "original",
            View::Palette => "palette",
            View::StrokeDensity => "stroke_density",
            View::Blurred => "blurred",
            View::RefinedLighting => "refined_lighting",
            View::FinalLighting => "final_lighting",
        }
    }

    pub fn parse(value: &str) -> Option<View> {
        let norm = value.trim().to_ascii_lowercase().replace('-', "_");
        match norm.as_str() {
            "density" => Some(View::StrokeDensity),
            "lighting" | "light" => Some(View::FinalLighting),
            other => View::ALL.into_iter().find(|v| v.name() == other),
        }
    }

    /// Channel range mapped to black..white when presenting this view.
    pub fn range(self) -> (f32, f32) {
        match self {
            View::Result | View::Original | View::Palette | View::Blurred => (0.0, 255.0),
            View::StrokeDensity | View::RefinedLighting | View::FinalLighting => (0.0, 1.0),
        }
    }
}

/// Extraction results kept after the palette images move to the backend.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PaletteSummary {
    pub width: u32,
    pub height: u32,
    pub centroid: Vec3,
    pub triangle_count: usize,
    pub fallback_count: usize,
}

/// Backend images of one loaded painting, allocated once per load.
struct Frame<I> {
    original: I,
    palette: I,
    stroke_density: I,
    blurred: I,
    blur_scratch: I,
    lighting: LightingBuffers<I>,
    refined: I,
    gamma_scaled: I,
    final_lighting: I,
    result: I,
}

/// Relighting pipeline: palette extraction on load, then blur, light
/// synthesis and composition on every frame.
pub struct PaintLight<B: ComputeBackend, H: HullBuilder = QuickHull> {
    /// Read at the top of every frame.
    pub params: LightParams,
    backend: B,
    hull: H,
    frame: Option<Frame<B::Image>>,
    summary: Option<PaletteSummary>,
}

impl<B: ComputeBackend> PaintLight<B> {
    pub fn new(backend: B) -> Self {
        Self::with_hull(backend, QuickHull)
    }
}

impl<B: ComputeBackend, H: HullBuilder> PaintLight<B, H> {
    pub fn with_hull(backend: B, hull: H) -> Self {
        Self {
            params: LightParams::default(),
            backend,
            hull,
            frame: None,
            summary: None,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Palette statistics of the loaded image.
    pub fn summary(&self) -> Option<&PaletteSummary> {
        self.summary.as_ref()
    }

    /// Decodes `path` and loads it.
    pub fn load_image(&mut self, path: &Path) -> anyhow::Result<PaletteSummary> {
        let img = loader::open_image(path)?;
        Ok(self.load(img)?)
    }

    /// Replaces the current image: extracts its palette and stroke density
    /// and allocates every intermediate buffer.
    ///
    /// On error the previously loaded image stays in place.
    pub fn load(&mut self, img: FloatImage) -> Result<PaletteSummary, StageError> {
        let started = Instant::now();
        let fields = palette::extract(&img, &self.hull)?;
        let extracted_ms = started.elapsed().as_secs_f64() * 1000.0;

        let b = &self.backend;
        let original = b.upload(&img)?;
        let frame = Frame {
            palette: b.upload(&fields.palette)?,
            stroke_density: b.upload(&fields.stroke_density)?,
            blurred: b.allocate_like(&original)?,
            blur_scratch: b.allocate_like(&original)?,
            lighting: LightingBuffers::allocate(b, &original)?,
            refined: b.allocate_like(&original)?,
            gamma_scaled: b.allocate_like(&original)?,
            final_lighting: b.allocate_like(&original)?,
            result: b.allocate_like(&original)?,
            original,
        };

        let summary = PaletteSummary {
            width: img.width(),
            height: img.height(),
            centroid: fields.centroid,
            triangle_count: fields.triangle_count,
            fallback_count: fields.fallback_count,
        };
        tracing::info!(
            width = summary.width,
            height = summary.height,
            triangles = summary.triangle_count,
            fallbacks = summary.fallback_count,
            backend = b.name(),
            extract_ms = extracted_ms,
            "image loaded"
        );
        self.frame = Some(frame);
        self.summary = Some(summary);
        Ok(summary)
    }

    pub fn is_loaded(&self) -> bool {
        self.frame.is_some()
    }

    /// Runs blur, light synthesis and composition with the current parameters.
    pub fn render_frame(&mut self) -> Result<(), StageError> {
        let Some(f) = self.frame.as_mut() else {
            return Err(StageError::NotLoaded);
        };
        let p = &self.params;
        let b = &self.backend;
        let started = Instant::now();

        b.gaussian_blur(
            &f.original,
            p.blur_width,
            p.blur_sigma,
            &mut f.blur_scratch,
            &mut f.blurred,
        )?;
        let (width, height) = (
            self.summary.map_or(0, |s| s.width),
            self.summary.map_or(0, |s| s.height),
        );
        lighting::synthesize(
            b,
            &f.blurred,
            &f.stroke_density,
            &p.shading(width, height),
            &mut f.lighting,
            &mut f.refined,
        )?;
        compose::final_lighting(
            b,
            &f.refined,
            p.gamma,
            p.ambient,
            &mut f.gamma_scaled,
            &mut f.final_lighting,
        )?;
        b.multiply(&f.original, &f.final_lighting, &mut f.result)?;

        tracing::debug!(
            backend = b.name(),
            frame_ms = started.elapsed().as_secs_f64() * 1000.0,
            "frame rendered"
        );
        Ok(())
    }

    fn buffer(&self, view: View) -> Result<&B::Image, StageError> {
        let f = self.frame.as_ref().ok_or(StageError::NotLoaded)?;
        Ok(match view {
            View::Result => &f.result,
            View::Original => &f.original,
            View::Palette => &f.palette,
            View::StrokeDensity => &f.stroke_density,
            View::Blurred => &f.blurred,
            View::RefinedLighting => &f.refined,
            View::FinalLighting => &f.final_lighting,
        })
    }

    /// Downloads the buffer behind `view`.
    pub fn view(&self, view: View) -> Result<FloatImage, StageError> {
        self.backend.download(self.buffer(view)?)
    }

    /// 8-bit rendering of `view` over its display range.
    pub fn present(&self, view: View, gamma: f32) -> Result<RgbaImage, StageError> {
        Ok(self.view(view)?.present(view.range(), gamma))
    }

    /// `view` stretched per channel to `[0, 1]`.
    pub fn normalized(&self, view: View) -> Result<FloatImage, StageError> {
        let src = self.buffer(view)?;
        let b = &self.backend;
        let mut scratch = b.allocate_like(src)?;
        let mut out = b.allocate_like(src)?;
        let extent = compose::normalize(b, src, 1.0, &mut scratch, &mut out)?;
        tracing::debug!(view = view.name(), min = ?extent.min, max = ?extent.max, "normalized view");
        b.download(&out)
    }
}
