mod config;
mod loader;
mod processing;
mod state;

use std::path::PathBuf;

use anyhow::{Context, bail};

use config::AppConfig;
use processing::backend::ComputeBackend;
use processing::cpu::CpuBackend;
use processing::gpu::{self, GpuBackend};
use processing::pipeline::{PaintLight, View};

const USAGE: &str = "usage: paintlight <image> [--out PATH] [--view NAME] [--cursor X,Y] \
[--backend cpu|gpu|auto] [--set key=value]... [--normalize] [--save-params] [--save-defaults]";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ComputeBackendKind {
    Cpu,
    Gpu,
    Auto,
}

fn parse_backend(value: &str) -> ComputeBackendKind {
    match value.trim().to_ascii_lowercase().as_str() {
        "cpu" => ComputeBackendKind::Cpu,
        "gpu" | "wgpu" => ComputeBackendKind::Gpu,
        "auto" => ComputeBackendKind::Auto,
        other => {
            tracing::warn!(value = other, "unknown compute backend, using auto");
            ComputeBackendKind::Auto
        }
    }
}

/// `--backend` beats `PAINTLIGHT_BACKEND`, which beats the config file.
fn resolve_backend(
    flag: Option<&str>,
    env: Option<&str>,
    config: &AppConfig,
) -> ComputeBackendKind {
    flag.or(env)
        .or(config.compute_backend.as_deref())
        .map(parse_backend)
        .unwrap_or(ComputeBackendKind::Auto)
}

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    image: PathBuf,
    out: Option<PathBuf>,
    view: Option<View>,
    cursor: Option<(f32, f32)>,
    backend: Option<String>,
    sets: Vec<(String, String)>,
    normalize: bool,
    save_params: bool,
    save_defaults: bool,
}

fn parse_cursor(value: &str) -> anyhow::Result<(f32, f32)> {
    let (x, y) = value
        .split_once(',')
        .with_context(|| format!("--cursor expects X,Y, got {value:?}"))?;
    let x: f32 = x.trim().parse().context("--cursor: bad X")?;
    let y: f32 = y.trim().parse().context("--cursor: bad Y")?;
    Ok((x, y))
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> anyhow::Result<CliArgs> {
    let mut cli = CliArgs::default();
    let mut image = None;
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .with_context(|| format!("{flag} needs a value\n{USAGE}"))
        };
        match arg.as_str() {
            "--out" | "-o" => cli.out = Some(PathBuf::from(value("--out")?)),
            "--view" => {
                let name = value("--view")?;
                let view = View::parse(&name).with_context(|| {
                    let names: Vec<_> = View::ALL.iter().map(|v| v.name()).collect();
                    format!("unknown view {name:?} (expected one of {})", names.join(", "))
                })?;
                cli.view = Some(view);
            }
            "--cursor" => cli.cursor = Some(parse_cursor(&value("--cursor")?)?),
            "--backend" => cli.backend = Some(value("--backend")?),
            "--set" => {
                let pair = value("--set")?;
                let (k, v) = pair
                    .split_once('=')
                    .with_context(|| format!("--set expects key=value, got {pair:?}"))?;
                cli.sets.push((k.to_string(), v.to_string()));
            }
            "--normalize" => cli.normalize = true,
            "--save-params" => cli.save_params = true,
            "--save-defaults" => cli.save_defaults = true,
            flag if flag.starts_with('-') => bail!("unknown option {flag}\n{USAGE}"),
            _ if image.is_none() => image = Some(PathBuf::from(&arg)),
            _ => bail!("unexpected argument {arg:?}\n{USAGE}"),
        }
    }
    cli.image = image.context(USAGE)?;
    Ok(cli)
}

fn run<B: ComputeBackend>(backend: B, cli: &CliArgs, config: &AppConfig) -> anyhow::Result<()> {
    let mut app = PaintLight::new(backend);
    let summary = app
        .load_image(&cli.image)
        .with_context(|| format!("failed to load {}", cli.image.display()))?;

    let mut params = config.params_for(&cli.image);
    for (key, value) in &cli.sets {
        params.set(key, value)?;
    }
    params = params.clamped();
    if let Some((cx, cy)) = cli.cursor {
        params.aim_at(cx, cy, summary.width, summary.height);
    }
    app.params = params;
    app.render_frame()?;

    let view = cli.view.unwrap_or(View::Result);
    let rendered = if cli.normalize {
        app.normalized(view)?.present((0.0, 1.0), 1.0)
    } else {
        app.present(view, 1.0)?
    };
    let dest = cli.out.clone().unwrap_or_else(|| {
        loader::default_output_path(&cli.image, config.output_dir.as_deref(), view.name())
    });
    loader::save_png(&rendered, &dest)?;
    tracing::info!(
        view = view.name(),
        backend = app.backend().name(),
        dest = %dest.display(),
        "render written"
    );
    println!("{}", dest.display());

    if cli.save_params || config.save_sidecar {
        let sidecar = app.params.save(&cli.image)?;
        tracing::info!(path = %sidecar.display(), "parameters saved");
    }
    if cli.save_defaults {
        let updated = AppConfig {
            defaults: Some(app.params.clone()),
            ..AppConfig::load()
        };
        updated.save();
        tracing::info!("parameters stored as config defaults");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = parse_args(std::env::args().skip(1))?;
    if !loader::is_supported_image(&cli.image) {
        bail!("{} is not a supported image", cli.image.display());
    }

    let config = AppConfig::load();
    let env = std::env::var("PAINTLIGHT_BACKEND").ok();
    let kind = resolve_backend(cli.backend.as_deref(), env.as_deref(), &config);

    match kind {
        ComputeBackendKind::Cpu => run(CpuBackend::new(), &cli, &config),
        ComputeBackendKind::Gpu => {
            let backend = GpuBackend::new().context("gpu backend requested")?;
            report_adapter();
            run(backend, &cli, &config)
        }
        ComputeBackendKind::Auto => match GpuBackend::new() {
            Ok(backend) => {
                report_adapter();
                run(backend, &cli, &config)
            }
            Err(_) => {
                gpu::report_gpu_fallback_once();
                run(CpuBackend::new(), &cli, &config)
            }
        },
    }
}

fn report_adapter() {
    if let Some((name, api)) = gpu::adapter_summary() {
        tracing::info!(adapter = %name, api = %api, "gpu backend active");
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{ComputeBackendKind, parse_args, parse_backend, parse_cursor, resolve_backend};
    use crate::config::AppConfig;
    use crate::processing::pipeline::View;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_backend_handles_supported_values() {
        assert_eq!(parse_backend("cpu"), ComputeBackendKind::Cpu);
        assert_eq!(parse_backend(" GPU "), ComputeBackendKind::Gpu);
        assert_eq!(parse_backend("wgpu"), ComputeBackendKind::Gpu);
        assert_eq!(parse_backend("auto"), ComputeBackendKind::Auto);
        assert_eq!(parse_backend("metal"), ComputeBackendKind::Auto);
    }

    #[test]
    fn backend_resolution_order() {
        let config = AppConfig {
            compute_backend: Some("cpu".into()),
            ..AppConfig::default()
        };
        assert_eq!(resolve_backend(None, None, &config), ComputeBackendKind::Cpu);
        assert_eq!(resolve_backend(None, Some("gpu"), &config), ComputeBackendKind::Gpu);
        assert_eq!(
            resolve_backend(Some("auto"), Some("gpu"), &config),
            ComputeBackendKind::Auto
        );
        assert_eq!(
            resolve_backend(None, None, &AppConfig::default()),
            ComputeBackendKind::Auto
        );
    }

    #[test]
    fn parses_full_command_line() {
        let cli = parse_args(args(&[
            "canvas.png",
            "--out",
            "/tmp/lit.png",
            "--view",
            "stroke-density",
            "--cursor",
            "0.5,-0.25",
            "--set",
            "ambient=0.3",
            "--set",
            "blur_width=12",
            "--backend",
            "cpu",
            "--normalize",
            "--save-params",
        ]))
        .unwrap();
        assert_eq!(cli.image, PathBuf::from("canvas.png"));
        assert_eq!(cli.out, Some(PathBuf::from("/tmp/lit.png")));
        assert_eq!(cli.view, Some(View::StrokeDensity));
        assert_eq!(cli.cursor, Some((0.5, -0.25)));
        assert_eq!(cli.backend.as_deref(), Some("cpu"));
        assert_eq!(
            cli.sets,
            vec![
                ("ambient".to_string(), "0.3".to_string()),
                ("blur_width".to_string(), "12".to_string())
            ]
        );
        assert!(cli.normalize);
        assert!(cli.save_params);
        assert!(!cli.save_defaults);
    }

    #[test]
    fn rejects_bad_command_lines() {
        assert!(parse_args(args(&[])).is_err());
        assert!(parse_args(args(&["a.png", "b.png"])).is_err());
        assert!(parse_args(args(&["a.png", "--view"])).is_err());
        assert!(parse_args(args(&["a.png", "--view", "sepia"])).is_err());
        assert!(parse_args(args(&["a.png", "--set", "ambient"])).is_err());
        assert!(parse_args(args(&["a.png", "--frobnicate"])).is_err());
    }

    #[test]
    fn cursor_needs_two_numbers() {
        assert_eq!(parse_cursor("1,2").unwrap(), (1.0, 2.0));
        assert_eq!(parse_cursor(" -0.5 , 0.75 ").unwrap(), (-0.5, 0.75));
        assert!(parse_cursor("1").is_err());
        assert!(parse_cursor("x,2").is_err());
    }
}
