use std::ffi::c_void;
use std::io;
use std::ptr::NonNull;
use std::result::Result as StdResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use scheduler::{Flow, StopReason};
use smithay_client_toolkit::reexports::client::{
    backend::WaylandError,
    globals::{registry_queue_init, BindError, GlobalError},
    protocol::{wl_output, wl_surface},
    ConnectError, Connection, DispatchError, EventQueue, Proxy, QueueHandle,
};
use smithay_client_toolkit::{
    compositor::{CompositorHandler, CompositorState, Region},
    delegate_compositor, delegate_layer, delegate_output, delegate_registry,
    output::{OutputHandler, OutputState},
    registry::{ProvidesRegistryState, RegistryState},
    registry_handlers,
    shell::wlr_layer::{
        Anchor, KeyboardInteractivity, Layer, LayerShell, LayerShellHandler, LayerSurface,
        LayerSurfaceConfigure,
    },
    shell::WaylandSurface,
};
use tracing::{debug, info, trace, warn};

use crate::outputs::{OutputError, OutputProperty, OutputRegistry, OutputSelector, SelectedOutput};
use crate::session::{Handshake, HandshakeError};

const LAYER_NAMESPACE: &str = "loopaper";
const CONFIGURE_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to connect to Wayland compositor: {0}")]
    Connect(#[from] ConnectError),
    #[error("failed to initialize Wayland registry queue: {0}")]
    Registry(#[from] GlobalError),
    #[error("{what} is not available: {source}")]
    Bind {
        what: &'static str,
        #[source]
        source: BindError,
    },
    #[error("error while processing Wayland events: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("Wayland connection failed: {0}")]
    Backend(#[from] WaylandError),
    #[error("failed to create input region: {0}")]
    Region(String),
    #[error("layer surface negotiation failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error("compositor closed the layer surface before it was configured")]
    ClosedEarly,
}

/// Connection, event queue and protocol state for one wallpaper surface.
pub(crate) struct WaylandSession {
    conn: Connection,
    event_queue: EventQueue<WallpaperState>,
    state: WallpaperState,
}

struct WallpaperState {
    registry_state: RegistryState,
    output_state: OutputState,
    compositor: CompositorState,
    layer_shell: LayerShell,
    outputs: OutputRegistry<wl_output::WlOutput>,
    layer: Option<LayerSurface>,
    handshake: Handshake,
    failure: Option<SessionError>,
}

impl WaylandSession {
    /// Connects, binds the globals and collects every advertised output.
    pub(crate) fn connect(selector: OutputSelector) -> Result<Self, SessionError> {
        let conn = Connection::connect_to_env()?;
        let (globals, mut event_queue) = registry_queue_init(&conn)?;
        let qh = event_queue.handle();

        let compositor = CompositorState::bind(&globals, &qh).map_err(|source| SessionError::Bind {
            what: "wl_compositor",
            source,
        })?;
        let layer_shell = LayerShell::bind(&globals, &qh).map_err(|source| SessionError::Bind {
            what: "layer shell protocol",
            source,
        })?;

        let mut state = WallpaperState {
            registry_state: RegistryState::new(&globals),
            output_state: OutputState::new(&globals, &qh),
            compositor,
            layer_shell,
            outputs: OutputRegistry::new(selector),
            layer: None,
            handshake: Handshake::default(),
            failure: None,
        };

        // First round trip binds the advertised outputs, the second delivers
        // their properties and done events.
        event_queue.roundtrip(&mut state)?;
        event_queue.roundtrip(&mut state)?;
        debug!(outputs = state.outputs.candidates().count(), "output discovery finished");

        Ok(Self {
            conn,
            event_queue,
            state,
        })
    }

    pub(crate) fn select_output(&self) -> Result<SelectedOutput<wl_output::WlOutput>, SessionError> {
        Ok(self.state.outputs.selection()?)
    }

    /// Creates the background layer surface on `output` and waits until the
    /// compositor's first configure has been acknowledged, or `shutdown` is set.
    pub(crate) fn create_surface(
        &mut self,
        output: &SelectedOutput<wl_output::WlOutput>,
        shutdown: &AtomicBool,
    ) -> Result<Flow, SessionError> {
        let qh = self.event_queue.handle();
        let surface = self.state.compositor.create_surface(&qh);

        let scale = buffer_scale(output.width, output.height, output.scale);
        let width = output.width / scale as u32;
        let height = output.height / scale as u32;

        let input = Region::new(&self.state.compositor)
            .map_err(|err| SessionError::Region(err.to_string()))?;
        surface.set_input_region(Some(input.wl_region()));
        surface.set_buffer_scale(scale);

        let layer = self.state.layer_shell.create_layer_surface(
            &qh,
            surface,
            Layer::Background,
            Some(LAYER_NAMESPACE.to_string()),
            Some(&output.handle),
        );
        layer.set_size(width, height);
        layer.set_anchor(Anchor::TOP | Anchor::BOTTOM | Anchor::LEFT | Anchor::RIGHT);
        layer.set_exclusive_zone(-1);
        layer.set_keyboard_interactivity(KeyboardInteractivity::None);
        layer.commit();
        self.state.handshake.request(width, height)?;
        self.state.layer = Some(layer);
        info!(
            output = %output.name,
            identifier = %output.identifier,
            width,
            height,
            scale,
            "requested layer surface"
        );

        let flow = await_configure(shutdown, || {
            self.read_pending()?;
            match self.state.failure.take() {
                Some(err) => Err(err),
                None => Ok(self.state.handshake),
            }
        })?;
        if flow == Flow::Continue {
            if let Some(size) = self.state.handshake.size() {
                if size != (width, height) {
                    warn!(
                        requested = ?(width, height),
                        configured = ?size,
                        "compositor configured a different surface size"
                    );
                }
            }
        }
        Ok(flow)
    }

    /// Drains pending events without blocking. A broken connection ends the
    /// session rather than failing it.
    pub(crate) fn pump(&mut self) -> Result<Flow, SessionError> {
        if let Err(err) = self.read_pending() {
            warn!(error = %err, "Wayland connection lost");
            return Ok(Flow::Stop(StopReason::Disconnected));
        }
        if let Some(err) = self.state.failure.take() {
            return Err(err);
        }
        if self.state.handshake.is_closed() {
            return Ok(Flow::Stop(StopReason::Closed));
        }
        Ok(Flow::Continue)
    }

    pub(crate) fn flush(&self) -> Result<(), SessionError> {
        match self.conn.flush() {
            Err(WaylandError::Io(err)) if err.kind() == io::ErrorKind::WouldBlock => Ok(()),
            other => Ok(other?),
        }
    }

    /// Raw handles wgpu needs to create its swapchain. Only valid while the
    /// session is alive.
    pub(crate) fn surface_handle(&self) -> Option<WaylandSurfaceHandle> {
        self.state
            .layer
            .as_ref()
            .map(|layer| WaylandSurfaceHandle::new(&self.conn, layer))
    }

    fn read_pending(&mut self) -> Result<(), SessionError> {
        self.event_queue.dispatch_pending(&mut self.state)?;
        self.flush()?;
        if let Some(guard) = self.event_queue.prepare_read() {
            match guard.read() {
                Ok(_) => {}
                Err(WaylandError::Io(err)) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(err.into()),
            }
        }
        self.event_queue.dispatch_pending(&mut self.state)?;
        Ok(())
    }
}

impl Drop for WaylandSession {
    fn drop(&mut self) {
        if self.state.layer.take().is_some() {
            debug!("destroying layer surface");
            let _ = self.flush();
        }
    }
}

/// Polls `step` until the handshake is acknowledged. Returns
/// `Flow::Stop(Interrupted)` as soon as `shutdown` is set.
fn await_configure(
    shutdown: &AtomicBool,
    mut step: impl FnMut() -> Result<Handshake, SessionError>,
) -> Result<Flow, SessionError> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            debug!("interrupted while waiting for configure");
            return Ok(Flow::Stop(StopReason::Interrupted));
        }
        let handshake = step()?;
        if handshake.is_ready() {
            return Ok(Flow::Continue);
        }
        if handshake.is_closed() {
            return Err(SessionError::ClosedEarly);
        }
        thread::sleep(CONFIGURE_POLL);
    }
}

/// Buffer scale that keeps the buffer at exactly `width`x`height` pixels.
fn buffer_scale(width: u32, height: u32, scale: i32) -> i32 {
    let factor = scale.max(1) as u32;
    if width % factor == 0 && height % factor == 0 {
        scale.max(1)
    } else {
        1
    }
}

impl WallpaperState {
    fn record_output(&mut self, output: &wl_output::WlOutput) {
        let Some(info) = self.output_state.info(output) else {
            return;
        };
        let global = info.id;
        self.outputs.discover(global, output.clone());
        if let Some(name) = info.name {
            self.outputs.apply(global, OutputProperty::Name(name));
        }
        if let Some(description) = info.description {
            self.outputs
                .apply(global, OutputProperty::Description(description));
        }
        for mode in &info.modes {
            self.outputs.apply(
                global,
                OutputProperty::Mode {
                    width: mode.dimensions.0,
                    height: mode.dimensions.1,
                    current: mode.current,
                },
            );
        }
        self.outputs
            .apply(global, OutputProperty::Scale(info.scale_factor));
        self.outputs.done(global);
    }

    fn fail(&mut self, err: SessionError) {
        if self.failure.is_none() {
            self.failure = Some(err);
        }
    }
}

impl CompositorHandler for WallpaperState {
    fn scale_factor_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _new_factor: i32,
    ) {
    }

    fn transform_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _new_transform: wl_output::Transform,
    ) {
    }

    fn frame(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _time: u32,
    ) {
    }
}

impl LayerShellHandler for WallpaperState {
    fn closed(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _layer: &LayerSurface) {
        info!("compositor closed the layer surface");
        self.handshake.close();
    }

    fn configure(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _layer: &LayerSurface,
        configure: LayerSurfaceConfigure,
        serial: u32,
    ) {
        let (width, height) = configure.new_size;
        trace!(serial, width, height, "layer configure");
        // The toolkit has already sent ack_configure for this serial.
        let result = self
            .handshake
            .configure(serial, width, height)
            .and_then(|()| self.handshake.acknowledge(serial));
        if let Err(err) = result {
            self.fail(err.into());
        }
    }
}

impl OutputHandler for WallpaperState {
    fn output_state(&mut self) -> &mut OutputState {
        &mut self.output_state
    }

    fn new_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        output: wl_output::WlOutput,
    ) {
        self.record_output(&output);
    }

    fn update_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        output: wl_output::WlOutput,
    ) {
        self.record_output(&output);
    }

    fn output_destroyed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        output: wl_output::WlOutput,
    ) {
        self.outputs.remove_handle(&output);
    }
}

impl ProvidesRegistryState for WallpaperState {
    fn registry(&mut self) -> &mut RegistryState {
        &mut self.registry_state
    }

    registry_handlers![OutputState];
}

delegate_compositor!(WallpaperState);
delegate_output!(WallpaperState);
delegate_layer!(WallpaperState);
delegate_registry!(WallpaperState);

pub(crate) struct WaylandSurfaceHandle {
    display: *mut c_void,
    surface: *mut c_void,
}

impl WaylandSurfaceHandle {
    fn new(conn: &Connection, layer: &LayerSurface) -> Self {
        let display = conn.backend().display_ptr() as *mut c_void;
        let surface = layer.wl_surface().id().as_ptr() as *mut c_void;
        Self { display, surface }
    }
}

impl raw_window_handle::HasDisplayHandle for WaylandSurfaceHandle {
    fn display_handle(
        &self,
    ) -> StdResult<raw_window_handle::DisplayHandle<'_>, raw_window_handle::HandleError> {
        let display =
            NonNull::new(self.display).ok_or(raw_window_handle::HandleError::Unavailable)?;
        let wayland = raw_window_handle::WaylandDisplayHandle::new(display);
        let raw = raw_window_handle::RawDisplayHandle::Wayland(wayland);
        Ok(unsafe { raw_window_handle::DisplayHandle::borrow_raw(raw) })
    }
}

impl raw_window_handle::HasWindowHandle for WaylandSurfaceHandle {
    fn window_handle(
        &self,
    ) -> StdResult<raw_window_handle::WindowHandle<'_>, raw_window_handle::HandleError> {
        let surface =
            NonNull::new(self.surface).ok_or(raw_window_handle::HandleError::Unavailable)?;
        let wayland = raw_window_handle::WaylandWindowHandle::new(surface);
        let raw = raw_window_handle::RawWindowHandle::Wayland(wayland);
        Ok(unsafe { raw_window_handle::WindowHandle::borrow_raw(raw) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_scale_only_when_size_divides() {
        assert_eq!(buffer_scale(3840, 2160, 2), 2);
        assert_eq!(buffer_scale(2256, 1505, 2), 1);
        assert_eq!(buffer_scale(1920, 1080, 1), 1);
        assert_eq!(buffer_scale(1920, 1080, 0), 1);
    }

    fn configured_after(polls: usize) -> impl FnMut() -> Result<Handshake, SessionError> {
        let mut handshake = Handshake::default();
        let mut seen = 0;
        move || {
            seen += 1;
            if seen == 1 {
                handshake.request(800, 600)?;
            }
            if seen == polls {
                handshake.configure(7, 800, 600)?;
                handshake.acknowledge(7)?;
            }
            Ok(handshake)
        }
    }

    #[test]
    fn configure_wait_returns_once_acknowledged() {
        let shutdown = AtomicBool::new(false);
        let flow = await_configure(&shutdown, configured_after(3)).unwrap();
        assert_eq!(flow, Flow::Continue);
    }

    #[test]
    fn configure_wait_honours_shutdown() {
        let shutdown = AtomicBool::new(false);
        let mut polls = 0;
        let flow = await_configure(&shutdown, || {
            polls += 1;
            if polls == 2 {
                shutdown.store(true, Ordering::SeqCst);
            }
            Ok(Handshake::Requested {
                width: 800,
                height: 600,
            })
        })
        .unwrap();
        assert_eq!(flow, Flow::Stop(StopReason::Interrupted));
        assert_eq!(polls, 2);
    }

    #[test]
    fn configure_wait_checks_shutdown_first() {
        let shutdown = AtomicBool::new(true);
        let flow = await_configure(&shutdown, || -> Result<Handshake, SessionError> {
            unreachable!("no events are read after shutdown")
        })
        .unwrap();
        assert_eq!(flow, Flow::Stop(StopReason::Interrupted));
    }

    #[test]
    fn closed_before_configure_is_an_error() {
        let shutdown = AtomicBool::new(false);
        let err = await_configure(&shutdown, || Ok(Handshake::Closed)).unwrap_err();
        assert!(matches!(err, SessionError::ClosedEarly));
    }

    #[test]
    fn handler_failure_aborts_the_wait() {
        let shutdown = AtomicBool::new(false);
        let err = await_configure(&shutdown, || {
            Err(HandshakeError::NothingToAcknowledge.into())
        })
        .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Handshake(HandshakeError::NothingToAcknowledge)
        ));
    }
}
