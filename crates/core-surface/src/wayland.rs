//! Wayland backend: a wlr-layer-shell surface at the bottom of the layer
//! stack, anchored to three edges, drawn through SHM buffers.
//!
//! Frame scheduling follows the compositor: exactly one frame callback is
//! outstanding at a time. Committing while one is pending parks the frame
//! as `pending_buffer`; a newer frame simply replaces it (the replaced
//! buffer's slot is released), and the callback publishes whatever is
//! parked when it fires. Refresh posts from other threads land on an
//! eventfd the calloop loop polls alongside the compositor socket and the
//! abort signal.

use std::sync::Arc;

use anyhow::{anyhow, Context as _};
use calloop::generic::Generic;
use calloop::{EventLoop, Interest, Mode, PostAction};
use smithay_client_toolkit::{
    compositor::{CompositorHandler, CompositorState},
    delegate_compositor, delegate_layer, delegate_output, delegate_pointer, delegate_registry,
    delegate_seat, delegate_shm,
    output::{OutputHandler, OutputState},
    reexports::calloop_wayland_source::WaylandSource,
    registry::{ProvidesRegistryState, RegistryState},
    registry_handlers,
    seat::{
        pointer::{
            CursorIcon, PointerEvent, PointerEventKind, PointerHandler, ThemeSpec, ThemedPointer,
        },
        Capability, SeatHandler, SeatState,
    },
    shell::{
        wlr_layer::{
            Anchor, KeyboardInteractivity, Layer, LayerShell, LayerShellHandler, LayerSurface,
            LayerSurfaceConfigure,
        },
        WaylandSurface,
    },
    shm::{
        slot::{Buffer, SlotPool},
        Shm, ShmHandler,
    },
};
use wayland_client::{
    globals::registry_queue_init,
    protocol::{wl_output, wl_pointer, wl_seat, wl_shm, wl_surface},
    Connection, QueueHandle,
};

use core_config::Location;
use core_events::{AbortSignal, MouseButton, MouseEvent, RefreshWake};
use core_render::Surface;

use crate::{button_from_evdev, EventHandler, RefreshPoster, SurfaceConfig};

pub struct WaylandBackend {
    refresh: Option<RefreshWake>,
    running: Option<Running>,
}

struct Running {
    event_loop: EventLoop<'static, State>,
    state: State,
}

struct State {
    conn: Connection,
    qh: QueueHandle<State>,

    registry_state: RegistryState,
    output_state: OutputState,
    seat_state: SeatState,
    compositor: CompositorState,
    shm: Shm,
    layer: Option<LayerSurface>,
    pool: SlotPool,

    config: SurfaceConfig,

    /// Output scale; buffers are `logical * scale` device pixels.
    scale: i32,
    width: u32,
    height: u32,
    configured: bool,

    canvas: Surface,

    /// One frame callback outstanding; gates commits.
    frame_pending: bool,
    /// A finished frame waiting for that callback.
    pending_buffer: Option<Buffer>,

    pointer: Option<ThemedPointer>,
    pointer_pos: (i32, i32),
    pending_mouse: Vec<(MouseEvent, MouseButton, i32, i32)>,

    current_output: Option<wl_output::WlOutput>,
    needs_expose: bool,
    stop: bool,
    closed: bool,
}

impl WaylandBackend {
    pub fn new() -> Self {
        Self {
            refresh: None,
            running: None,
        }
    }
}

impl Default for WaylandBackend {
    fn default() -> Self {
        Self::new()
    }
}

struct WaylandRefresh(Option<RefreshWake>);

impl RefreshPoster for WaylandRefresh {
    fn post(&self) {
        match &self.0 {
            Some(wake) => wake.post(),
            None => tracing::warn!(target: "surface.wayland", "refresh posted before setup"),
        }
    }
}

impl crate::Backend for WaylandBackend {
    fn setup(&mut self, config: &SurfaceConfig) -> anyhow::Result<()> {
        let conn =
            Connection::connect_to_env().context("no wayland compositor (WAYLAND_DISPLAY)")?;
        let (globals, mut event_queue) =
            registry_queue_init::<State>(&conn).context("wayland registry init")?;
        let qh = event_queue.handle();

        let compositor =
            CompositorState::bind(&globals, &qh).context("wl_compositor not available")?;
        let layer_shell = LayerShell::bind(&globals, &qh)
            .context("compositor does not implement wlr-layer-shell")?;
        let shm = Shm::bind(&globals, &qh).context("wl_shm not available")?;

        let registry_state = RegistryState::new(&globals);
        let output_state = OutputState::new(&globals, &qh);
        let seat_state = SeatState::new(&globals, &qh);

        let pool = SlotPool::new(
            (config.height_with_border as usize).max(1) * 4 * 64,
            &shm,
        )
        .context("failed to create SHM pool")?;

        let mut state = State {
            conn: conn.clone(),
            qh: qh.clone(),
            registry_state,
            output_state,
            seat_state,
            compositor,
            shm,
            layer: None,
            pool,
            config: config.clone(),
            scale: 1,
            width: 0,
            height: 0,
            configured: false,
            canvas: Surface::new(1, 1),
            frame_pending: false,
            pending_buffer: None,
            pointer: None,
            pointer_pos: (0, 0),
            pending_mouse: Vec::new(),
            current_output: None,
            needs_expose: true,
            stop: false,
            closed: false,
        };

        // Learn outputs (and their names) before creating the layer
        // surface, so an explicit monitor choice can pin it at creation.
        event_queue
            .roundtrip(&mut state)
            .context("initial wayland roundtrip")?;

        if state.output_state.outputs().next().is_none() {
            return Err(anyhow!("no outputs"));
        }

        for output in state.output_state.outputs() {
            if let Some(info) = state.output_state.info(&output) {
                tracing::info!(
                    target: "surface.wayland",
                    name = info.name.as_deref().unwrap_or("<unnamed>"),
                    size = ?info.logical_size,
                    position = ?info.logical_position,
                    scale = info.scale_factor,
                    "output"
                );
            }
        }

        let chosen_output = match &config.monitor {
            Some(wanted) => {
                let output = state.output_state.outputs().find(|output| {
                    state
                        .output_state
                        .info(output)
                        .and_then(|info| info.name)
                        .as_deref()
                        == Some(wanted.as_str())
                });
                match output {
                    Some(output) => Some(output),
                    None => return Err(anyhow!("no output named {wanted}")),
                }
            }
            None => None,
        };

        let surface = state.compositor.create_surface(&qh);
        let layer = layer_shell.create_layer_surface(
            &qh,
            surface,
            Layer::Bottom,
            Some(config.title.clone()),
            chosen_output.as_ref(),
        );
        state.current_output = chosen_output;
        state.layer = Some(layer);

        state.apply_geometry();
        if let Some(layer) = &state.layer {
            layer.commit();
        }

        // Wait for the first configure; it carries our width.
        while !state.configured && !state.closed {
            event_queue
                .blocking_dispatch(&mut state)
                .context("waiting for layer-surface configure")?;
        }
        if state.closed {
            return Err(anyhow!("layer surface closed during setup"));
        }

        let event_loop =
            EventLoop::<State>::try_new().context("failed to create event loop")?;
        WaylandSource::new(conn, event_queue)
            .insert(event_loop.handle())
            .map_err(|e| anyhow!("failed to insert wayland source: {e}"))?;

        let refresh = RefreshWake::new().context("failed to create refresh eventfd")?;
        event_loop
            .handle()
            .insert_source(
                Generic::new(refresh.clone(), Interest::READ, Mode::Level),
                |_, wake, state: &mut State| {
                    // All posts since the last drain collapse here.
                    wake.drain();
                    state.needs_expose = true;
                    Ok(PostAction::Continue)
                },
            )
            .map_err(|e| anyhow!("failed to insert refresh source: {e}"))?;

        self.refresh = Some(refresh);
        self.running = Some(Running { event_loop, state });
        Ok(())
    }

    fn run_loop(
        &mut self,
        abort: &AbortSignal,
        handler: &mut dyn EventHandler,
    ) -> anyhow::Result<()> {
        let running = self
            .running
            .as_mut()
            .ok_or_else(|| anyhow!("backend not set up"))?;

        running
            .event_loop
            .handle()
            .insert_source(
                Generic::new(abort.clone(), Interest::READ, Mode::Level),
                |_, _, state: &mut State| {
                    state.stop = true;
                    Ok(PostAction::Continue)
                },
            )
            .map_err(|e| anyhow!("failed to insert abort source: {e}"))?;

        let Running { event_loop, state } = running;

        loop {
            // Deliver pointer events gathered during the last dispatch.
            for (event, button, x, y) in std::mem::take(&mut state.pending_mouse) {
                if let Some(cursor) = handler.mouse(event, button, x, y) {
                    state.apply_cursor(&cursor);
                }
            }

            if state.needs_expose && state.configured {
                state.needs_expose = false;
                handler.expose(&mut state.canvas);
                state.commit_frame();
                if let Some(cursor) = handler.cursor_request() {
                    state.apply_cursor(&cursor);
                }
            }

            if state.stop || state.closed {
                break;
            }

            event_loop
                .dispatch(None, state)
                .context("wayland event loop")?;
        }

        if state.closed {
            tracing::warn!(target: "surface.wayland", "surface closed by compositor");
            abort.raise();
        }

        Ok(())
    }

    fn refresh_poster(&self) -> Arc<dyn RefreshPoster> {
        Arc::new(WaylandRefresh(self.refresh.clone()))
    }

    fn set_cursor(&mut self, name: &str) {
        if let Some(running) = &mut self.running {
            running.state.apply_cursor(name);
        }
    }

    fn output_name(&self) -> Option<String> {
        let running = self.running.as_ref()?;
        let output = running.state.current_output.clone()?;
        running.state.output_state.info(&output)?.name
    }

    fn cleanup(&mut self) {
        // Dropping the running state tears down the layer surface, pool
        // and connection in protocol order.
        self.running = None;
    }
}

impl State {
    /// Push anchor, size, margins and exclusive zone; all in logical
    /// coordinates.
    fn apply_geometry(&mut self) {
        let Some(layer) = &self.layer else {
            return;
        };

        let scale = self.scale.max(1) as u32;
        let anchor = match self.config.location {
            Location::Top => Anchor::TOP | Anchor::LEFT | Anchor::RIGHT,
            Location::Bottom => Anchor::BOTTOM | Anchor::LEFT | Anchor::RIGHT,
        };
        layer.set_anchor(anchor);
        layer.set_keyboard_interactivity(KeyboardInteractivity::None);

        // Configured sizes are device pixels; the compositor speaks
        // logical units, so everything here divides by the scale.
        layer.set_size(0, (self.device_height() / scale).max(1));

        let border = &self.config.border;
        // The exclusive zone reserves our height plus the gap on the side
        // facing the rest of the desktop.
        let opposite = match self.config.location {
            Location::Top => border.bottom_margin,
            Location::Bottom => border.top_margin,
        };
        layer.set_exclusive_zone(
            (self.device_height() as i32 + opposite.max(0)) / scale as i32,
        );
        layer.set_margin(
            border.top_margin / scale as i32,
            border.right_margin / scale as i32,
            border.bottom_margin / scale as i32,
            border.left_margin / scale as i32,
        );
    }

    /// Bar height in device pixels, rounded down to a multiple of the
    /// scale so the logical height is exact.
    fn device_height(&self) -> u32 {
        let scale = self.scale.max(1) as u32;
        (self.config.height_with_border / scale * scale).max(scale)
    }

    /// Re-derive device-pixel dimensions for a new output scale and
    /// re-announce the logical geometry.
    fn rescale(&mut self, new_scale: i32) {
        if new_scale == self.scale || new_scale < 1 {
            return;
        }
        let logical_width = (self.width / self.scale.max(1) as u32).max(1);
        self.scale = new_scale;
        let (width, height) = self.device_size(logical_width);
        self.width = width;
        self.height = height;
        self.canvas.resize(width, height);
        self.apply_geometry();
        if let Some(layer) = &self.layer {
            layer.commit();
        }
        self.needs_expose = true;
    }

    fn device_size(&self, logical_width: u32) -> (u32, u32) {
        let width = logical_width * self.scale.max(1) as u32;
        (width, self.device_height())
    }

    /// Publish the canvas: attach immediately when no frame callback is
    /// outstanding, otherwise park the buffer for the callback.
    fn commit_frame(&mut self) {
        if self.width == 0 || self.height == 0 {
            return;
        }

        let stride = self.width as i32 * 4;
        let (buffer, data) = match self.pool.create_buffer(
            self.width as i32,
            self.height as i32,
            stride,
            wl_shm::Format::Argb8888,
        ) {
            Ok(ok) => ok,
            Err(err) => {
                // Allocation failure drops this frame; the next refresh
                // retries.
                tracing::error!(target: "surface.wayland", error = %err, "SHM buffer allocation failed");
                return;
            }
        };

        self.canvas.write_argb8888(data);

        if self.frame_pending {
            if self.pending_buffer.replace(buffer).is_some() {
                tracing::trace!(target: "surface.wayland", "replaced pending frame");
            }
        } else {
            self.attach_and_commit(buffer);
        }
    }

    fn attach_and_commit(&mut self, buffer: Buffer) {
        let Some(layer) = &self.layer else {
            return;
        };
        let surface = layer.wl_surface();
        surface.set_buffer_scale(self.scale);

        if let Err(err) = buffer.attach_to(surface) {
            tracing::error!(target: "surface.wayland", error = %err, "buffer attach failed");
            return;
        }
        surface.damage_buffer(0, 0, self.width as i32, self.height as i32);
        surface.frame(&self.qh, surface.clone());
        layer.commit();
        let _ = self.conn.flush();

        self.frame_pending = true;
    }

    fn apply_cursor(&mut self, name: &str) {
        let Some(pointer) = &self.pointer else {
            return;
        };

        let icon = match name {
            "left_ptr" => CursorIcon::Default,
            "hand2" => CursorIcon::Pointer,
            other => other.parse().unwrap_or(CursorIcon::Default),
        };

        if let Err(err) = pointer.set_cursor(&self.conn, icon) {
            tracing::warn!(target: "surface.wayland", cursor = name, error = %err, "failed to set cursor");
        }
    }

    fn queue_mouse(&mut self, event: MouseEvent, button: MouseButton) {
        let (x, y) = self.pointer_pos;
        self.pending_mouse.push((event, button, x, y));
    }
}

impl CompositorHandler for State {
    fn scale_factor_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        new_factor: i32,
    ) {
        self.rescale(new_factor);
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
        self.frame_pending = false;
        if let Some(buffer) = self.pending_buffer.take() {
            self.attach_and_commit(buffer);
        }
    }

    fn surface_enter(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        output: &wl_output::WlOutput,
    ) {
        self.current_output = Some(output.clone());
        if let Some(info) = self.output_state.info(output) {
            self.rescale(info.scale_factor);
        }
    }

    fn surface_leave(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _output: &wl_output::WlOutput,
    ) {
        self.current_output = None;
    }
}

impl OutputHandler for State {
    fn output_state(&mut self) -> &mut OutputState {
        &mut self.output_state
    }

    fn new_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _output: wl_output::WlOutput,
    ) {
    }

    fn update_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _output: wl_output::WlOutput,
    ) {
    }

    fn output_destroyed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        output: wl_output::WlOutput,
    ) {
        if self.current_output.as_ref() == Some(&output) {
            self.current_output = None;
        }
    }
}

impl LayerShellHandler for State {
    fn closed(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _layer: &LayerSurface) {
        // An output being disabled lands here; there is no re-open event,
        // so shut down and let the process exit cleanly.
        self.closed = true;
    }

    fn configure(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _layer: &LayerSurface,
        configure: LayerSurfaceConfigure,
        _serial: u32,
    ) {
        let (logical_width, _logical_height) = configure.new_size;
        let (width, height) = self.device_size(logical_width.max(1));

        if width != self.width || height != self.height {
            self.width = width;
            self.height = height;
            self.canvas.resize(width, height);
        }

        self.configured = true;
        self.needs_expose = true;
    }
}

impl SeatHandler for State {
    fn seat_state(&mut self) -> &mut SeatState {
        &mut self.seat_state
    }

    fn new_seat(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _seat: wl_seat::WlSeat) {}

    fn new_capability(
        &mut self,
        _conn: &Connection,
        qh: &QueueHandle<Self>,
        seat: wl_seat::WlSeat,
        capability: Capability,
    ) {
        if capability == Capability::Pointer && self.pointer.is_none() {
            let surface = self.compositor.create_surface(qh);
            match self.seat_state.get_pointer_with_theme(
                qh,
                &seat,
                self.shm.wl_shm(),
                surface,
                ThemeSpec::default(),
            ) {
                Ok(pointer) => self.pointer = Some(pointer),
                Err(err) => {
                    tracing::error!(target: "surface.wayland", error = %err, "failed to create pointer");
                }
            }
        }
    }

    fn remove_capability(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _seat: wl_seat::WlSeat,
        capability: Capability,
    ) {
        if capability == Capability::Pointer {
            self.pointer = None;
        }
    }

    fn remove_seat(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _seat: wl_seat::WlSeat) {
    }
}

impl PointerHandler for State {
    fn pointer_frame(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _pointer: &wl_pointer::WlPointer,
        events: &[PointerEvent],
    ) {
        for event in events {
            let (fx, fy) = event.position;
            match event.kind {
                PointerEventKind::Enter { .. } | PointerEventKind::Motion { .. } => {
                    self.pointer_pos = (
                        (fx * self.scale as f64) as i32,
                        (fy * self.scale as f64) as i32,
                    );
                    self.queue_mouse(MouseEvent::Motion, MouseButton::None);
                }
                PointerEventKind::Leave { .. } => {}
                PointerEventKind::Press { .. } => {
                    // Dispatch happens on release, matching the click model.
                }
                PointerEventKind::Release { button, .. } => {
                    if let Some(button) = button_from_evdev(button) {
                        self.queue_mouse(MouseEvent::Click, button);
                    }
                }
                PointerEventKind::Axis { vertical, .. } => {
                    let button = if vertical.discrete > 0 || vertical.absolute > 0.0 {
                        Some(MouseButton::WheelDown)
                    } else if vertical.discrete < 0 || vertical.absolute < 0.0 {
                        Some(MouseButton::WheelUp)
                    } else {
                        None
                    };
                    if let Some(button) = button {
                        self.queue_mouse(MouseEvent::Click, button);
                    }
                }
            }
        }
    }
}

impl ShmHandler for State {
    fn shm_state(&mut self) -> &mut Shm {
        &mut self.shm
    }
}

impl ProvidesRegistryState for State {
    fn registry(&mut self) -> &mut RegistryState {
        &mut self.registry_state
    }

    registry_handlers![OutputState, SeatState];
}

delegate_compositor!(State);
delegate_output!(State);
delegate_seat!(State);
delegate_pointer!(State);
delegate_layer!(State);
delegate_shm!(State);
delegate_registry!(State);
