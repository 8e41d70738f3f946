use std::path::{Path, PathBuf};

use anyhow::Context;
use image::{DynamicImage, RgbaImage};

use crate::processing::image::FloatImage;

static RAW_EXTS: &[&str] = &["raf", "dng", "nef", "cr2", "arw"];
static SUPPORTED_IMAGE_EXTS: &[&str] = &[
    "jpg", "jpeg", "png", "tiff", "tif", "webp", "bmp", "raf", "dng", "nef", "cr2", "arw",
];

fn has_extension(path: &Path, exts: &[&str]) -> bool {
    let Some(ext) = path.extension().map(|e| e.to_string_lossy()) else {
        return false;
    };
    exts.iter().any(|known| ext.eq_ignore_ascii_case(known))
}

pub fn is_raw_image(path: &Path) -> bool {
    has_extension(path, RAW_EXTS)
}

/// Returns `true` if the path has a supported image extension.
pub fn is_supported_image(path: &Path) -> bool {
    has_extension(path, SUPPORTED_IMAGE_EXTS)
}

/// Opens an image as a working float image (RGB in `[0, 255]`, opaque alpha).
pub fn open_image(path: &Path) -> anyhow::Result<FloatImage> {
    let img = open_with_hooks(path, |p| Ok(image::open(p)?), develop_raw)
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok(FloatImage::from_dynamic(&img))
}

fn open_with_hooks<FStd, FRaw>(path: &Path, open_std: FStd, open_raw: FRaw) -> anyhow::Result<DynamicImage>
where
    FStd: Fn(&Path) -> anyhow::Result<DynamicImage>,
    FRaw: Fn(&Path) -> anyhow::Result<DynamicImage>,
{
    // Fast path: the standard image crate.
    match open_std(path) {
        Ok(img) => Ok(img),
        Err(e) if !is_raw_image(path) => Err(e),
        Err(e) => {
            tracing::debug!(error = %e, path = %path.display(), "loader: falling back to raw develop");
            open_raw(path)
        }
    }
}

fn develop_raw(path: &Path) -> anyhow::Result<DynamicImage> {
    let raw = rawler::decode_file(path)?;
    let develop = rawler::imgop::develop::RawDevelop::default();
    let intermediate = develop.develop_intermediate(&raw)?;
    intermediate
        .to_dynamic_image()
        .ok_or_else(|| anyhow::anyhow!("raw develop produced invalid image"))
}

/// Writes an 8-bit render as PNG, creating parent directories.
pub fn save_png(img: &RgbaImage, dest: &Path) -> anyhow::Result<()> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    img.save_with_format(dest, image::ImageFormat::Png)
        .with_context(|| format!("failed to write {}", dest.display()))
}

/// Default render destination: `<dir>/<stem>.<view>.png`, where `dir` is
/// `out_dir` or the source image's directory.
pub fn default_output_path(source: &Path, out_dir: Option<&Path>, view: &str) -> PathBuf {
    let stem = source.file_stem().unwrap_or_default().to_string_lossy();
    let dir = out_dir
        .map(Path::to_path_buf)
        .or_else(|| source.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    dir.join(format!("{stem}.{view}.png"))
}
