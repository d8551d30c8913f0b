use std::sync::{Arc, Mutex, PoisonError};

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use super::GpuError;

/// First GPU error reported outside an error scope, kept until checked.
#[derive(Clone, Default)]
pub(crate) struct UncapturedErrors(Arc<Mutex<Option<GpuError>>>);

impl UncapturedErrors {
    pub fn record(&self, err: GpuError) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// Returns the recorded error, clearing the slot.
    pub fn check(&self) -> Result<(), GpuError> {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub(crate) struct GpuContext {
    pub _instance: wgpu::Instance,
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    pub surface_format: wgpu::TextureFormat,
    pub uncaptured: UncapturedErrors,
}

impl GpuContext {
    pub(crate) fn new<T>(target: &T, width: u32, height: u32) -> Result<Self, GpuError>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let window_handle = target
            .window_handle()
            .map_err(|source| GpuError::Handle {
                which: "window",
                source,
            })?;
        let display_handle = target
            .display_handle()
            .map_err(|source| GpuError::Handle {
                which: "display",
                source,
            })?;

        // The surface outlives neither handle: `GpuState` is dropped before the
        // Wayland session that owns the wl_surface.
        let surface = unsafe {
            instance.create_surface_unsafe(wgpu::SurfaceTargetUnsafe::RawHandle {
                raw_display_handle: display_handle.as_raw(),
                raw_window_handle: window_handle.as_raw(),
            })
        }?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))?;

        let adapter_info = adapter.get_info();
        tracing::debug!(
            name = %adapter_info.name,
            backend = ?adapter_info.backend,
            device_type = ?adapter_info.device_type,
            "selected GPU adapter"
        );

        let limits = adapter.limits();
        let max = limits.max_texture_dimension_2d;
        if width > max || height > max {
            return Err(GpuError::TooLarge { width, height, max });
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("loopaper device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits,
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: wgpu::Trace::default(),
        }))?;

        // Errors outside an explicit scope would otherwise panic inside wgpu.
        let uncaptured = UncapturedErrors::default();
        {
            let uncaptured = uncaptured.clone();
            device.on_uncaptured_error(Box::new(move |err| {
                tracing::error!(error = %err, "uncaptured GPU error");
                uncaptured.record(err.into());
            }));
        }

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or(GpuError::NoSurfaceFormat)?;
        if surface_format.is_srgb() {
            tracing::warn!(
                ?surface_format,
                "no linear (non-sRGB) surface format available; colours will be gamma encoded twice"
            );
        }

        let present_mode = surface_caps
            .present_modes
            .iter()
            .copied()
            .find(|mode| *mode == wgpu::PresentMode::Fifo)
            .unwrap_or(wgpu::PresentMode::AutoVsync);
        let alpha_mode = surface_caps
            .alpha_modes
            .iter()
            .copied()
            .find(|mode| *mode == wgpu::CompositeAlphaMode::Opaque)
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);
        tracing::debug!(?surface_format, ?present_mode, ?alpha_mode, "configuring surface");

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: width.max(1),
            height: height.max(1),
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        Ok(Self {
            _instance: instance,
            surface,
            device,
            queue,
            config,
            surface_format,
            uncaptured,
        })
    }

    /// Re-applies the current configuration after the swapchain was lost.
    pub(crate) fn reconfigure(&self) {
        self.surface.configure(&self.device, &self.config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncaptured_errors_keep_the_first_until_checked() {
        let errors = UncapturedErrors::default();
        assert!(errors.check().is_ok());

        let handler = errors.clone();
        handler.record(GpuError::Validation("present on a lost surface".into()));
        handler.record(GpuError::OutOfMemory("second".into()));

        match errors.check() {
            Err(GpuError::Validation(message)) => assert!(message.contains("lost surface")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(errors.check().is_ok());
    }
}
