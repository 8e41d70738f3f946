use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use crate::processing::blur::MAX_BLUR_RADIUS;
use crate::processing::lighting::ShadingParams;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Relighting parameters, read at the top of every frame and stored
/// alongside an image.
pub struct LightParams {
    /// Light position in pixels (x right, y down).
    pub light_x: f32,
    pub light_y: f32,
    /// Light height in multiples of the longer image side.
    pub light_z: f32,
    pub blur_width: u32,
    pub blur_sigma: f32,
    /// Multiplier applied to the synthesized lighting.
    pub gamma: f32,
    /// Constant light added after `gamma`.
    pub ambient: f32,
    pub pixel_scale: f32,
    /// Cursor travel multiplier used by [`LightParams::aim_at`].
    pub light_scale: f32,
    pub gamma_correction: f32,
}

impl Default for LightParams {
    fn default() -> Self {
        Self {
            light_x: 0.0,
            light_y: 0.0,
            light_z: 1.0,
            blur_width: 64,
            blur_sigma: 16.0,
            gamma: 1.0,
            ambient: 0.55,
            pixel_scale: 1.0,
            light_scale: 10.0,
            gamma_correction: 1.0,
        }
    }
}

impl LightParams {
    /// Keys accepted by [`LightParams::set`].
    pub const KEYS: [&'static str; 10] = [
        "light_x",
        "light_y",
        "light_z",
        "blur_width",
        "blur_sigma",
        "gamma",
        "ambient",
        "pixel_scale",
        "light_scale",
        "gamma_correction",
    ];

    /// Copy with every slider-backed field forced into its UI range.
    /// The light position is unbounded.
    pub fn clamped(&self) -> Self {
        Self {
            light_x: self.light_x,
            light_y: self.light_y,
            light_z: self.light_z.clamp(0.0, 2.0),
            blur_width: self.blur_width.clamp(1, MAX_BLUR_RADIUS),
            blur_sigma: self.blur_sigma.clamp(0.1, 50.0),
            gamma: self.gamma.clamp(0.0, 10.0),
            ambient: self.ambient.clamp(0.0, 1.0),
            pixel_scale: self.pixel_scale.clamp(0.0, 4.0),
            light_scale: self.light_scale.clamp(1.0, 100.0),
            gamma_correction: self.gamma_correction.clamp(0.0, 2.0),
        }
    }

    /// Places the light under a cursor given in relative coordinates
    /// (`[-1, 1]` on both axes, y up), amplified by `light_scale` around the
    /// image center.
    pub fn aim_at(&mut self, cursor_x: f32, cursor_y: f32, width: u32, height: u32) {
        let (w, h) = (width as f32, height as f32);
        self.light_x = cursor_x * 0.5 * w * self.light_scale + 0.5 * w;
        self.light_y = -cursor_y * 0.5 * h * self.light_scale + 0.5 * h;
    }

    pub fn shading(&self, width: u32, height: u32) -> ShadingParams {
        ShadingParams {
            width,
            height,
            light_x: self.light_x,
            light_y: self.light_y,
            light_z: self.light_z,
            pixel_scale: self.pixel_scale,
            gamma_correction: self.gamma_correction,
        }
    }

    /// Sets one field from its textual `key=value` form.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let value = value.trim();
        let float = || -> anyhow::Result<f32> {
            let v: f32 = value
                .parse()
                .with_context(|| format!("{key}: expected a number, got {value:?}"))?;
            if !v.is_finite() {
                bail!("{key}: value must be finite");
            }
            Ok(v)
        };
        match key.trim() {
            "light_x" => self.light_x = float()?,
            "light_y" => self.light_y = float()?,
            "light_z" => self.light_z = float()?,
            "blur_width" => {
                self.blur_width = value
                    .parse()
                    .with_context(|| format!("blur_width: expected an integer, got {value:?}"))?
            }
            "blur_sigma" => self.blur_sigma = float()?,
            "gamma" => self.gamma = float()?,
            "ambient" => self.ambient = float()?,
            "pixel_scale" => self.pixel_scale = float()?,
            "light_scale" => self.light_scale = float()?,
            "gamma_correction" => self.gamma_correction = float()?,
            other => bail!(
                "unknown parameter {other:?} (expected one of {})",
                Self::KEYS.join(", ")
            ),
        }
        Ok(())
    }

    /// Loads parameters from the image sidecar JSON, if present and valid.
    pub fn load(image_path: &Path) -> Option<Self> {
        let sidecar = sidecar_path(image_path)?;
        let json = std::fs::read_to_string(sidecar).ok()?;
        serde_json::from_str(&json).ok()
    }

    /// Saves the parameters to the image sidecar JSON.
    pub fn save(&self, image_path: &Path) -> anyhow::Result<PathBuf> {
        let sidecar = sidecar_path(image_path)
            .with_context(|| format!("{} has no file name", image_path.display()))?;
        if let Some(parent) = sidecar.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&sidecar, json)?;
        Ok(sidecar)
    }
}

fn sidecar_path(image_path: &Path) -> Option<PathBuf> {
    let dir = image_path.parent().unwrap_or(Path::new("."));
    let filename = image_path.file_name()?.to_string_lossy();
    Some(dir.join(".paintlight").join(format!("{}.json", filename)))
}
