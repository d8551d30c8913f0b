//! GPU side of the wallpaper.
//!
//! - `context` owns the wgpu instance, device and the swapchain surface.
//! - `pipeline` builds the user program and the passthrough program used for
//!   cached frames.
//! - `capture` owns the offscreen texture frames are recorded from and played
//!   back into.
//! - `uniforms` mirrors the `WallpaperParams` block.
//! - `state` glues everything together behind `GpuState`.

mod capture;
mod context;
mod pipeline;
mod state;
mod uniforms;

pub(crate) use state::GpuState;

#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("failed to acquire {which} handle: {source}")]
    Handle {
        which: &'static str,
        #[source]
        source: raw_window_handle::HandleError,
    },
    #[error("failed to create rendering surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),
    #[error("failed to find a suitable GPU adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    #[error("failed to create GPU device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error("surface of {width}x{height} exceeds the GPU texture limit of {max}")]
    TooLarge { width: u32, height: u32, max: u32 },
    #[error("surface reports no supported formats")]
    NoSurfaceFormat,
    #[error("shader failed to compile:\n{0}")]
    Compile(String),
    #[error("GPU validation error: {0}")]
    Validation(String),
    #[error("GPU out of memory: {0}")]
    OutOfMemory(String),
    #[error("failed to acquire swapchain texture: {0}")]
    Frame(#[source] wgpu::SurfaceError),
    #[error("device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),
    #[error("failed to map readback buffer: {0}")]
    Map(#[from] wgpu::BufferAsyncError),
    #[error("readback callback was dropped before completing")]
    ReadbackLost,
    #[error("frame holds {actual} bytes which does not match {width}x{height} RGBA")]
    FrameSize { width: u32, height: u32, actual: usize },
    #[error("user program was already released for playback")]
    ProgramReleased,
    #[error("frame capture is disabled for this session")]
    CaptureDisabled,
}

impl From<wgpu::Error> for GpuError {
    fn from(err: wgpu::Error) -> Self {
        match err {
            wgpu::Error::OutOfMemory { .. } => GpuError::OutOfMemory(err.to_string()),
            other => GpuError::Validation(other.to_string()),
        }
    }
}
