use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::state::LightParams;

#[derive(Debug, Default, Serialize, Deserialize)]
/// Persisted application settings for PaintLight.
pub struct AppConfig {
    /// `cpu`, `gpu` or `auto`; overridden by `PAINTLIGHT_BACKEND`.
    pub compute_backend: Option<String>,
    /// Directory for rendered images when `--out` is not given.
    pub output_dir: Option<PathBuf>,
    /// Store the parameters used for each render next to the image.
    #[serde(default)]
    pub save_sidecar: bool,
    /// Parameters used for images without a sidecar.
    pub defaults: Option<LightParams>,
}

impl AppConfig {
    /// Returns the user config file path, if a config directory is available.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("paintlight").join("config.toml"))
    }

    /// Loads config from disk, falling back to defaults on any error.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        let Ok(contents) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        Self::parse(&contents)
    }

    fn parse(contents: &str) -> Self {
        toml::from_str(contents).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "config: unreadable config.toml, using defaults");
            Self::default()
        })
    }

    /// Writes config to disk, ignoring filesystem/serialization errors.
    pub fn save(&self) {
        let Some(path) = Self::config_path() else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(s) = toml::to_string_pretty(self) {
            let _ = std::fs::write(&path, s);
        }
    }

    /// Starting parameters for an image: its sidecar, else the configured defaults.
    pub fn params_for(&self, image_path: &std::path::Path) -> LightParams {
        LightParams::load(image_path)
            .or_else(|| self.defaults.clone())
            .unwrap_or_default()
    }
}
