use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use loopconfig::LoopConfig;
use renderer::{convert_shadertoy, Renderer, RendererConfig};
use scheduler::{FrameRate, Quality};
use tracing_subscriber::EnvFilter;

use crate::cli::Args;
use crate::paths::AppPaths;

pub fn run(args: Args) -> Result<()> {
    initialise_tracing(args.debug);

    if let Some(path) = &args.convert {
        return convert_in_place(path);
    }

    let file = load_config(&args)?;
    let settings = Settings::resolve(&args, file)?;
    tracing::debug!(?settings, "resolved settings");

    let source = fs::read_to_string(&settings.shader)
        .with_context(|| format!("failed to read shader {}", settings.shader.display()))?;
    let source = if settings.runtime_convert {
        convert_shadertoy(&source)
    } else {
        source
    };

    let shutdown = install_interrupt_handler()?;
    let renderer = Renderer::new(RendererConfig {
        shader: source,
        monitor: settings.monitor,
        frame_rate: settings.frame_rate,
        cache_seconds: settings.cache_seconds,
        cache_quality: settings.cache_quality,
        cursor: settings.cursor,
    });
    let reason = renderer.run(shutdown)?;
    tracing::debug!(?reason, "exiting");
    Ok(())
}

fn initialise_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn convert_in_place(path: &Path) -> Result<()> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read shader {}", path.display()))?;
    fs::write(path, convert_shadertoy(&source))
        .with_context(|| format!("failed to write converted shader {}", path.display()))?;
    tracing::info!(path = %path.display(), "converted Shadertoy shader");
    Ok(())
}

/// An explicit `--config` must exist; the default location is optional.
fn load_config(args: &Args) -> Result<LoopConfig> {
    if let Some(path) = &args.config {
        return LoopConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()));
    }
    let path = AppPaths::discover()?.config_file();
    if !path.is_file() {
        tracing::debug!(path = %path.display(), "no config file; using defaults");
        return Ok(LoopConfig::default());
    }
    LoopConfig::load(&path).with_context(|| format!("failed to load config {}", path.display()))
}

fn install_interrupt_handler() -> Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("failed to install interrupt handler")?;
    }
    Ok(shutdown)
}

/// Command line merged over the config file, fully validated.
#[derive(Debug)]
struct Settings {
    shader: PathBuf,
    monitor: Option<String>,
    frame_rate: FrameRate,
    cache_seconds: u32,
    cache_quality: Quality,
    cursor: bool,
    runtime_convert: bool,
}

impl Settings {
    fn resolve(args: &Args, mut config: LoopConfig) -> Result<Self> {
        if let Some(shader) = &args.shader {
            config.shader = Some(shader.clone());
        }
        if let Some(monitor) = &args.monitor {
            config.monitor = Some(monitor.clone());
        }
        if let Some(fps) = args.fps {
            config.fps = Some(fps);
        }
        if let Some(seconds) = args.cache {
            config.cache.duration = Some(std::time::Duration::from_secs(u64::from(seconds)));
        }
        if let Some(quality) = args.cache_quality {
            config.cache.quality = Some(quality);
        }
        if args.no_cursor {
            config.cursor = Some(false);
        }
        config.runtime_convert |= args.rt_convert;
        config.validate()?;

        let frame_rate = FrameRate::new(config.fps())?;
        let cache_quality = Quality::new(config.cache_quality())?;
        let cache_seconds = config.cache_seconds()?;
        let shader = config
            .shader
            .clone()
            .ok_or_else(|| anyhow!("no shader given; pass --shader FILE or set `shader` in the config"))?;

        Ok(Self {
            shader,
            monitor: config.monitor_target().map(str::to_string),
            frame_rate,
            cache_seconds,
            cache_quality,
            cursor: config.cursor_enabled(),
            runtime_convert: config.runtime_convert,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(argv: &[&str]) -> Args {
        let mut full = vec!["loopaper"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap()
    }

    #[test]
    fn cli_overrides_config_file() {
        let config = LoopConfig::from_toml_str(
            r#"
                shader = "/tmp/from-file.frag"
                monitor = "HDMI-A-1"
                fps = 24
                [cache]
                duration = "3s"
                quality = 50
            "#,
        )
        .unwrap();
        let settings = Settings::resolve(
            &args(&["-s", "cli.frag", "-f", "30", "--cache-quality", "90", "--no-cursor"]),
            config,
        )
        .unwrap();
        assert_eq!(settings.shader, PathBuf::from("cli.frag"));
        assert_eq!(settings.monitor.as_deref(), Some("HDMI-A-1"));
        assert_eq!(settings.frame_rate.get(), 30);
        assert_eq!(settings.cache_seconds, 3);
        assert_eq!(settings.cache_quality.get(), 90);
        assert!(!settings.cursor);
    }

    #[test]
    fn fps_of_one_is_rejected() {
        let err = Settings::resolve(&args(&["-s", "a.frag", "-f", "1"]), LoopConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("fps"), "{err}");
    }

    #[test]
    fn wildcard_monitor_means_last_output() {
        let settings = Settings::resolve(
            &args(&["-s", "a.frag", "--monitor", "*"]),
            LoopConfig::default(),
        )
        .unwrap();
        assert_eq!(settings.monitor, None);
        assert_eq!(settings.cache_seconds, 0);
        assert_eq!(settings.frame_rate, FrameRate::DEFAULT);
    }

    #[test]
    fn missing_shader_is_an_error() {
        assert!(Settings::resolve(&args(&[]), LoopConfig::default()).is_err());
    }
}
