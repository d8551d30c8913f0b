use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "loopaper",
    author,
    version,
    about = "Animated shader wallpaper for Wayland layer-shell compositors"
)]
pub struct Args {
    /// Fragment shader to render.
    #[arg(short = 's', long, value_name = "FILE")]
    pub shader: Option<PathBuf>,

    /// Rewrite a Shadertoy shader in place into the wallpaper dialect, then exit.
    #[arg(short = 'c', long, value_name = "FILE", conflicts_with = "rt_convert")]
    pub convert: Option<PathBuf>,

    /// Convert the Shadertoy shader in memory before compiling it.
    #[arg(short = 'r', long = "rt-convert")]
    pub rt_convert: bool,

    /// Output to draw on (`*` picks the last one the compositor announces).
    #[arg(long, value_name = "NAME")]
    pub monitor: Option<String>,

    /// Verbose logging (overridden by `RUST_LOG`).
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Frames per second; must be greater than 1.
    #[arg(short = 'f', long, value_name = "FPS")]
    pub fps: Option<u32>,

    /// Seconds of animation to record and loop (0 renders live forever).
    #[arg(long, value_name = "SECONDS")]
    pub cache: Option<u32>,

    /// JPEG quality of cached frames (1-100).
    #[arg(long, value_name = "QUALITY")]
    pub cache_quality: Option<u32>,

    /// Configuration file; defaults to `config.toml` in the config directory.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Keep the `mouse` uniform at the centre of the output.
    #[arg(long)]
    pub no_cursor: bool,
}

pub fn parse() -> Args {
    Args::parse()
}
