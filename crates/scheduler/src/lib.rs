//! Tick loop driving live rendering, frame recording and cached playback.
//!
//! The [`Scheduler`] owns everything that decides *what* a tick does: the
//! simulated clock, the [`FrameCache`] and the [`FrameCodec`]. Everything that
//! touches the display lives behind the [`Stage`] trait so the state machine
//! can be exercised without a compositor or a GPU.

mod cache;
pub mod codec;
mod pacing;

use tracing::{debug, info, trace};

pub use cache::{CacheError, CacheMode, CompressedFrame, FrameCache};
pub use codec::{DecodeError, EncodeError, FrameCodec, JpegCodec, Quality, QualityError};
pub use pacing::{FrameRate, FrameRateError, Pacing};

/// Why the loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The compositor closed the surface.
    Closed,
    /// The display connection went away.
    Disconnected,
    /// SIGINT/SIGTERM.
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop(StopReason),
}

/// Pixel size of every frame handed across the [`Stage`] boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

impl FrameGeometry {
    pub fn rgba_len(&self) -> usize {
        self.width as usize * self.height as usize * codec::RGBA_BYTES_PER_PIXEL
    }
}

/// Display side of a tick.
///
/// Calls arrive in a fixed order per tick: [`Stage::pump`] first, then either
/// the live path (`update_pointer`, `render_live`, optionally `read_back`) or
/// the cached path (`enter_playback` once, then `render_cached`), and finally
/// [`Stage::present`].
pub trait Stage {
    type Error;

    /// Drains pending display events without blocking.
    fn pump(&mut self) -> Result<Flow, Self::Error>;

    fn update_pointer(&mut self);

    /// Runs the user program with `elapsed` seconds of shader time.
    fn render_live(&mut self, elapsed: f32) -> Result<(), Self::Error>;

    /// Tightly packed RGBA of the frame just rendered by `render_live`.
    fn read_back(&mut self) -> Result<Vec<u8>, Self::Error>;

    /// Switches the stage to the passthrough program. Called once.
    fn enter_playback(&mut self) -> Result<(), Self::Error>;

    fn render_cached(&mut self, rgba: &[u8]) -> Result<(), Self::Error>;

    fn present(&mut self) -> Result<(), Self::Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum TickError<E> {
    #[error("render stage failed: {0}")]
    Stage(#[source] E),
    #[error("failed to encode frame {index}: {source}")]
    Encode {
        index: usize,
        #[source]
        source: EncodeError,
    },
    #[error("failed to decode cached frame {index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: DecodeError,
    },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

pub struct Scheduler<C> {
    codec: C,
    cache: FrameCache,
    pacing: Pacing,
    geometry: FrameGeometry,
    playback_armed: bool,
}

impl<C: FrameCodec> Scheduler<C> {
    pub fn new(codec: C, cache: FrameCache, rate: FrameRate, geometry: FrameGeometry) -> Self {
        Self {
            codec,
            cache,
            pacing: Pacing::new(rate),
            geometry,
            playback_armed: false,
        }
    }

    pub fn mode(&self) -> CacheMode {
        self.cache.mode()
    }

    pub fn pacing(&self) -> &Pacing {
        &self.pacing
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Runs one tick. Never sleeps.
    pub fn tick<S: Stage>(&mut self, stage: &mut S) -> Result<Flow, TickError<S::Error>> {
        if let Flow::Stop(reason) = stage.pump().map_err(TickError::Stage)? {
            return Ok(Flow::Stop(reason));
        }

        match self.cache.mode() {
            CacheMode::Disabled => {
                stage.update_pointer();
                self.render_live(stage)?;
            }
            CacheMode::Recording { written } => {
                stage.update_pointer();
                self.render_live(stage)?;
                let rgba = stage.read_back().map_err(TickError::Stage)?;
                let frame = self
                    .codec
                    .encode(&rgba, self.geometry.width, self.geometry.height)
                    .map_err(|source| TickError::Encode {
                        index: written,
                        source,
                    })?;
                if let CacheMode::Playback { .. } = self.cache.record(frame)? {
                    info!(
                        frames = self.cache.capacity(),
                        bytes = self.cache.stored_bytes(),
                        "frame cache recorded, entering playback"
                    );
                }
            }
            CacheMode::Playback { .. } => {
                if !self.playback_armed {
                    stage.enter_playback().map_err(TickError::Stage)?;
                    self.playback_armed = true;
                }
                let Some((index, frame)) = self.cache.next_frame() else {
                    return Err(TickError::Cache(CacheError::Disabled));
                };
                trace!(index, "playing cached frame");
                let rgba = self
                    .codec
                    .decode(frame, self.geometry.width, self.geometry.height)
                    .map_err(|source| TickError::Decode { index, source })?;
                stage.render_cached(&rgba).map_err(TickError::Stage)?;
            }
        }

        stage.present().map_err(TickError::Stage)?;
        self.pacing.advance();
        Ok(Flow::Continue)
    }

    /// Ticks until the stage asks to stop, sleeping one full interval after
    /// every tick.
    pub fn run<S: Stage>(&mut self, stage: &mut S) -> Result<StopReason, TickError<S::Error>> {
        let interval = self.pacing.rate().interval();
        debug!(
            fps = self.pacing.rate().get(),
            cache_frames = self.cache.capacity(),
            "entering render loop"
        );
        loop {
            if let Flow::Stop(reason) = self.tick(stage)? {
                debug!(?reason, ticks = self.pacing.tick(), "render loop stopped");
                return Ok(reason);
            }
            std::thread::sleep(interval);
        }
    }

    /// Frees the cached frames. Safe to call any number of times.
    pub fn release(&mut self) {
        self.cache.release();
    }

    fn render_live<S: Stage>(&mut self, stage: &mut S) -> Result<(), TickError<S::Error>> {
        stage
            .render_live(self.pacing.elapsed() as f32)
            .map_err(TickError::Stage)
    }
}
