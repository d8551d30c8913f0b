//! Renderer crate for loopaper.
//!
//! Puts a user fragment shader on one Wayland output as a background layer
//! surface. The flow is:
//!
//! ```text
//!   loopaper CLI
//!        │ RendererConfig
//!        ▼
//!   Renderer::run ──▶ WaylandSession (outputs, layer surface handshake)
//!        │                  │ surface handle + output size
//!        │                  ▼
//!        │             GpuState (wgpu device, user program, capture texture)
//!        ▼
//!   scheduler::Scheduler::run ──▶ LiveStage ──▶ pump / render / present
//! ```
//!
//! The user shader is written against `time`, `resolution` and `mouse`
//! uniforms; [`wrap_fragment`] rewrites it into Vulkan-style GLSL so it can be
//! compiled by `wgpu`'s GLSL frontend. [`convert_shadertoy`] turns a
//! ShaderToy-style `mainImage` shader into that dialect.

mod compile;
mod gpu;
mod outputs;
mod pointer;
mod session;
mod wallpaper;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use scheduler::{
    FrameCache, FrameGeometry, FrameRate, Flow, JpegCodec, Quality, Scheduler, Stage, StopReason,
};
use tracing::{debug, info};

use crate::gpu::GpuState;
use crate::pointer::PointerSource;
use crate::wallpaper::WaylandSession;

pub use compile::{convert_shadertoy, wrap_fragment, UniformSlots, WrappedShader};
pub use gpu::GpuError;
pub use outputs::{
    physical_identifier, CandidateOutput, OutputError, OutputProperty, OutputRegistry,
    OutputSelector, SelectedOutput,
};
pub use session::{Handshake, HandshakeError};
pub use wallpaper::SessionError;

/// Validated settings for one wallpaper session.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Fragment shader source, already converted if needed.
    pub shader: String,
    /// Output name to bind to; `None` picks the last output announced.
    pub monitor: Option<String>,
    pub frame_rate: FrameRate,
    /// Seconds of animation to record before looping; 0 disables caching.
    pub cache_seconds: u32,
    pub cache_quality: Quality,
    /// Track the compositor cursor for the `mouse` uniform.
    pub cursor: bool,
}

pub struct Renderer {
    config: RendererConfig,
}

impl Renderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    /// Runs until the surface is closed, the connection drops or `shutdown`
    /// is raised. Every other way out is an error.
    pub fn run(&self, shutdown: Arc<AtomicBool>) -> Result<StopReason> {
        let config = &self.config;
        let cache = FrameCache::new(config.cache_seconds, config.frame_rate)
            .context("invalid frame cache size")?;

        let mut session = WaylandSession::connect(OutputSelector::from_target(config.monitor.as_deref()))?;
        let output = session.select_output()?;
        if let Flow::Stop(reason) = session.create_surface(&output, &shutdown)? {
            info!(?reason, "stopped before the surface was configured");
            return Ok(reason);
        }

        let wrapped = wrap_fragment(&config.shader);
        let handle = session
            .surface_handle()
            .context("layer surface disappeared before GPU initialisation")?;
        let gpu = GpuState::new(
            &handle,
            output.width,
            output.height,
            &wrapped,
            cache.capacity() > 0,
        )?;
        let pointer = PointerSource::detect(config.cursor, &output.name, output.width, output.height);

        let geometry = FrameGeometry {
            width: output.width,
            height: output.height,
        };
        let mut scheduler = Scheduler::new(
            JpegCodec::new(config.cache_quality),
            cache,
            config.frame_rate,
            geometry,
        );
        let mut stage = LiveStage {
            gpu: Some(gpu),
            session: Some(session),
            pointer,
            shutdown,
        };

        let result = scheduler.run(&mut stage);
        scheduler.release();
        stage.teardown();
        let reason = result.context("wallpaper render loop failed")?;
        info!(?reason, "wallpaper stopped");
        Ok(reason)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("render stage used after teardown")]
    TornDown,
}

/// Wayland surface plus the GPU state drawing into it.
struct LiveStage {
    // Dropped before `session`: the wgpu surface points at its wl_surface.
    gpu: Option<GpuState>,
    session: Option<WaylandSession>,
    pointer: PointerSource,
    shutdown: Arc<AtomicBool>,
}

impl LiveStage {
    fn gpu(&mut self) -> Result<&mut GpuState, StageError> {
        self.gpu.as_mut().ok_or(StageError::TornDown)
    }

    fn session(&mut self) -> Result<&mut WaylandSession, StageError> {
        self.session.as_mut().ok_or(StageError::TornDown)
    }

    /// Releases GPU resources, then the Wayland surface. Safe to call twice
    /// and on a partially built stage.
    fn teardown(&mut self) {
        if let Some(gpu) = self.gpu.take() {
            debug!(size = ?gpu.size(), "releasing GPU state");
            drop(gpu);
        }
        if let Some(session) = self.session.take() {
            debug!("closing Wayland session");
            drop(session);
        }
    }
}

impl Drop for LiveStage {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl Stage for LiveStage {
    type Error = StageError;

    fn pump(&mut self) -> Result<Flow, StageError> {
        if self.shutdown.load(Ordering::SeqCst) {
            info!("interrupt received");
            return Ok(Flow::Stop(StopReason::Interrupted));
        }
        Ok(self.session()?.pump()?)
    }

    fn update_pointer(&mut self) {
        let position = self.pointer.poll();
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.set_pointer(position);
        }
    }

    fn render_live(&mut self, elapsed: f32) -> Result<(), StageError> {
        Ok(self.gpu()?.render_live(elapsed)?)
    }

    fn read_back(&mut self) -> Result<Vec<u8>, StageError> {
        Ok(self.gpu()?.read_back()?)
    }

    fn enter_playback(&mut self) -> Result<(), StageError> {
        self.gpu()?.release_program();
        Ok(())
    }

    fn render_cached(&mut self, rgba: &[u8]) -> Result<(), StageError> {
        Ok(self.gpu()?.render_cached(rgba)?)
    }

    fn present(&mut self) -> Result<(), StageError> {
        self.gpu()?.present()?;
        self.session()?.flush()?;
        Ok(())
    }
}
