use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};

use crate::compile::{self, WrappedShader};

use super::capture::CaptureTarget;
use super::context::GpuContext;
use super::pipeline::{PassthroughPipeline, ShaderPipeline, UniformBinding, CAPTURE_FORMAT};
use super::uniforms::WallpaperUniforms;
use super::GpuError;

/// Capture texture plus the program that copies it to the swapchain.
struct Capture {
    target: CaptureTarget,
    passthrough: PassthroughPipeline,
}

/// Every GPU resource needed to put one frame on the wallpaper.
///
/// Without capture the user program renders straight into the swapchain.
/// With capture it renders into an offscreen texture which is then blitted to
/// the swapchain, so the same texture can be read back while recording and
/// overwritten with decoded frames during playback.
pub(crate) struct GpuState {
    context: GpuContext,
    uniform_binding: UniformBinding,
    uniforms: WallpaperUniforms,
    program: Option<ShaderPipeline>,
    capture: Option<Capture>,
    frame: Option<wgpu::SurfaceTexture>,
    width: u32,
    height: u32,
}

impl GpuState {
    pub(crate) fn new<T>(
        target: &T,
        width: u32,
        height: u32,
        shader: &WrappedShader,
        capture: bool,
    ) -> Result<Self, GpuError>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let context = GpuContext::new(target, width, height)?;
        let device = &context.device;

        for name in shader.uniforms.missing() {
            warn!("'{name}' uniform not found; perhaps it is unused?");
        }

        let vertex = compile::vertex_module(device);
        let uniform_binding =
            UniformBinding::new(device, std::mem::size_of::<WallpaperUniforms>() as u64);

        let program_format = if capture {
            CAPTURE_FORMAT
        } else {
            context.surface_format
        };
        let program = ShaderPipeline::new(device, &vertex, &uniform_binding, shader, program_format)?;

        let capture = if capture {
            let target = CaptureTarget::new(device, width, height);
            let passthrough =
                PassthroughPipeline::new(device, &vertex, &target.view, context.surface_format)?;
            Some(Capture {
                target,
                passthrough,
            })
        } else {
            None
        };

        let uniforms = WallpaperUniforms::new(width, height);
        context
            .queue
            .write_buffer(&uniform_binding.buffer, 0, bytemuck::bytes_of(&uniforms));
        context.uncaptured.check()?;

        info!(width, height, capture = capture.is_some(), "initialised GPU surface");
        Ok(Self {
            context,
            uniform_binding,
            uniforms,
            program: Some(program),
            capture,
            frame: None,
            width,
            height,
        })
    }

    pub(crate) fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub(crate) fn set_pointer(&mut self, position: [f32; 2]) {
        self.uniforms.set_mouse(position);
    }

    /// Draws the user program for `elapsed` seconds of shader time.
    pub(crate) fn render_live(&mut self, elapsed: f32) -> Result<(), GpuError> {
        self.scoped(|gpu| {
            gpu.uniforms.set_time(elapsed);
            gpu.context.queue.write_buffer(
                &gpu.uniform_binding.buffer,
                0,
                bytemuck::bytes_of(&gpu.uniforms),
            );
            gpu.acquire_frame()?;

            let program = gpu.program.as_ref().ok_or(GpuError::ProgramReleased)?;
            let mut encoder =
                gpu.context
                    .device
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                        label: Some("live render encoder"),
                    });

            match (gpu.capture.as_ref(), gpu.frame.as_ref()) {
                (Some(capture), frame) => {
                    encode_draw(
                        &mut encoder,
                        &capture.target.view,
                        &program.pipeline,
                        &gpu.uniform_binding.bind_group,
                    );
                    if let Some(frame) = frame {
                        let view = frame
                            .texture
                            .create_view(&wgpu::TextureViewDescriptor::default());
                        encode_draw(
                            &mut encoder,
                            &view,
                            &capture.passthrough.pipeline,
                            &capture.passthrough.bind_group,
                        );
                    }
                }
                (None, Some(frame)) => {
                    let view = frame
                        .texture
                        .create_view(&wgpu::TextureViewDescriptor::default());
                    encode_draw(
                        &mut encoder,
                        &view,
                        &program.pipeline,
                        &gpu.uniform_binding.bind_group,
                    );
                }
                (None, None) => return Ok(()),
            }

            gpu.context.queue.submit(std::iter::once(encoder.finish()));
            Ok(())
        })
    }

    /// RGBA of the last live frame, top row first.
    pub(crate) fn read_back(&mut self) -> Result<Vec<u8>, GpuError> {
        self.scoped(|gpu| {
            let capture = gpu.capture.as_ref().ok_or(GpuError::CaptureDisabled)?;
            capture.target.read(&gpu.context.device, &gpu.context.queue)
        })
    }

    /// Drops the user program; only cached frames are shown from now on.
    pub(crate) fn release_program(&mut self) {
        if self.program.take().is_some() {
            info!("switching to cached playback");
        }
    }

    /// Uploads a decoded frame and draws it with the passthrough program.
    pub(crate) fn render_cached(&mut self, rgba: &[u8]) -> Result<(), GpuError> {
        self.scoped(|gpu| {
            gpu.acquire_frame()?;
            let capture = gpu.capture.as_ref().ok_or(GpuError::CaptureDisabled)?;
            capture.target.upload(&gpu.context.queue, rgba)?;
            let Some(frame) = gpu.frame.as_ref() else {
                return Ok(());
            };

            let view = frame
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default());
            let mut encoder =
                gpu.context
                    .device
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                        label: Some("playback encoder"),
                    });
            encode_draw(
                &mut encoder,
                &view,
                &capture.passthrough.pipeline,
                &capture.passthrough.bind_group,
            );
            gpu.context.queue.submit(std::iter::once(encoder.finish()));
            Ok(())
        })
    }

    /// Presents the frame acquired this tick, if any, and surfaces any GPU
    /// error reported outside a scope since the last check.
    pub(crate) fn present(&mut self) -> Result<(), GpuError> {
        if let Some(frame) = self.frame.take() {
            frame.present();
        }
        self.context.uncaptured.check()
    }

    fn acquire_frame(&mut self) -> Result<(), GpuError> {
        if self.frame.is_some() {
            return Ok(());
        }
        match self.context.surface.get_current_texture() {
            Ok(frame) => {
                self.frame = Some(frame);
                Ok(())
            }
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                debug!("swapchain lost; reconfiguring");
                self.context.reconfigure();
                let frame = self
                    .context
                    .surface
                    .get_current_texture()
                    .map_err(GpuError::Frame)?;
                self.frame = Some(frame);
                Ok(())
            }
            Err(wgpu::SurfaceError::Timeout) => {
                debug!("surface timeout; skipping frame");
                Ok(())
            }
            Err(wgpu::SurfaceError::Other) => {
                warn!("surface reported an unknown error; skipping frame");
                Ok(())
            }
            Err(err @ wgpu::SurfaceError::OutOfMemory) => Err(GpuError::Frame(err)),
        }
    }

    /// Runs `op` inside validation and out-of-memory error scopes so any GPU
    /// error it triggers is returned instead of reported asynchronously.
    fn scoped<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, GpuError>,
    ) -> Result<T, GpuError> {
        self.context
            .device
            .push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.context
            .device
            .push_error_scope(wgpu::ErrorFilter::Validation);
        self.context.uncaptured.check()?;
        let result = op(self);
        let validation = pollster::block_on(self.context.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.context.device.pop_error_scope());
        let value = result?;
        match validation.or(out_of_memory) {
            Some(err) => Err(err.into()),
            None => self.context.uncaptured.check().map(|()| value),
        }
    }
}

fn encode_draw(
    encoder: &mut wgpu::CommandEncoder,
    view: &wgpu::TextureView,
    pipeline: &wgpu::RenderPipeline,
    bind_group: &wgpu::BindGroup,
) {
    let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("render pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            depth_slice: None,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        occlusion_query_set: None,
        timestamp_writes: None,
    });
    render_pass.set_pipeline(pipeline);
    render_pass.set_bind_group(0, bind_group, &[]);
    render_pass.draw(0..4, 0..1);
}
