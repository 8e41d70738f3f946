use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};

#[allow(dead_code)]
#[path = "../loader.rs"]
mod loader;
#[allow(dead_code)]
#[path = "../processing/mod.rs"]
mod processing;
#[allow(dead_code)]
#[path = "../state.rs"]
mod state;

use processing::backend::ComputeBackend;
use processing::cpu::CpuBackend;
use processing::gpu::GpuBackend;
use processing::pipeline::PaintLight;

fn median_ms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) * 0.5
    } else {
        sorted[mid]
    }
}

/// Cursor positions on a circle of radius 0.8 around the image center.
fn sweep(frames: usize) -> Vec<(f32, f32)> {
    (0..frames)
        .map(|i| {
            let t = i as f32 / frames.max(1) as f32 * std::f32::consts::TAU;
            (0.8 * t.cos(), 0.8 * t.sin())
        })
        .collect()
}

fn probe<B: ComputeBackend>(backend: B, image: &Path, frames: usize) -> Result<()> {
    let mut app = PaintLight::new(backend);

    let t0 = Instant::now();
    let summary = app
        .load_image(image)
        .with_context(|| format!("load failed for {}", image.display()))?;
    let extract_ms = t0.elapsed().as_secs_f64() * 1000.0;

    let mut frame_samples = Vec::with_capacity(frames);
    for (cx, cy) in sweep(frames) {
        app.params.aim_at(cx, cy, summary.width, summary.height);
        let t0 = Instant::now();
        app.render_frame()?;
        frame_samples.push(t0.elapsed().as_secs_f64() * 1000.0);
    }

    let t0 = Instant::now();
    let _result = app.view(processing::pipeline::View::Result)?;
    let readback_ms = t0.elapsed().as_secs_f64() * 1000.0;

    println!("METRIC backend={}", app.backend().name());
    println!("METRIC width={}", summary.width);
    println!("METRIC height={}", summary.height);
    println!("METRIC hull_triangles={}", summary.triangle_count);
    println!("METRIC palette_fallbacks={}", summary.fallback_count);
    println!("METRIC extract_ms={:.2}", extract_ms);
    println!("METRIC frame_count={}", frame_samples.len());
    println!("METRIC frame_ms_median={:.2}", median_ms(&frame_samples));
    println!("METRIC readback_ms={:.2}", readback_ms);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args();
    let _bin = args.next();
    let image = args
        .next()
        .map(PathBuf::from)
        .context("usage: frame_probe <image> [frames]")?;
    let frames = args
        .next()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(60);

    let on_cpu = std::env::var("PAINTLIGHT_BACKEND")
        .map(|v| v.trim().eq_ignore_ascii_case("cpu"))
        .unwrap_or(false);
    if on_cpu {
        return probe(CpuBackend::new(), &image, frames);
    }
    match GpuBackend::new() {
        Ok(gpu) => probe(gpu, &image, frames),
        Err(_) => {
            processing::gpu::report_gpu_fallback_once();
            probe(CpuBackend::new(), &image, frames)
        }
    }
}
