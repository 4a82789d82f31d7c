//! X11 backend: an override-redirect dock window, always raised, with
//! EWMH struts reserving the bar's edge. The back buffer is a client-side
//! `argb8888` image uploaded with `PutImage` on every commit.
//!
//! Cross-thread refresh works the way the protocol makes easy: the poster
//! sends a synthetic `Expose` event to our own window and flushes; the
//! loop treats it like any server-initiated expose.

use std::os::fd::AsRawFd;
use std::sync::Arc;

use anyhow::{anyhow, Context as _};
use x11rb::connection::Connection as _;
use x11rb::cursor::Handle as CursorHandle;
use x11rb::protocol::randr::ConnectionExt as _;
use x11rb::wrapper::ConnectionExt as _;
use x11rb::protocol::xproto::{
    AtomEnum, ChangeWindowAttributesAux, ConfigureWindowAux, ConnectionExt as _,
    CreateGCAux, CreateWindowAux, EventMask, ExposeEvent, Gcontext, ImageFormat, PropMode,
    StackMode, Window, WindowClass, EXPOSE_EVENT,
};
use x11rb::protocol::Event;
use x11rb::resource_manager;
use x11rb::rust_connection::RustConnection;

use core_config::Location;
use core_events::{wait_readable_multi, AbortSignal, MouseButton, MouseEvent};
use core_render::Surface;

use crate::{button_from_x11, EventHandler, RefreshPoster, SurfaceConfig};

x11rb::atom_manager! {
    Atoms:
    AtomsCookie {
        _NET_WM_PID,
        _NET_WM_WINDOW_TYPE,
        _NET_WM_WINDOW_TYPE_DOCK,
        _NET_WM_STATE,
        _NET_WM_STATE_ABOVE,
        _NET_WM_STATE_STICKY,
        _NET_WM_DESKTOP,
        _NET_WM_STRUT,
        _NET_WM_STRUT_PARTIAL,
    }
}

pub struct XcbBackend {
    running: Option<Running>,
}

struct Running {
    conn: Arc<RustConnection>,
    window: Window,
    gc: Gcontext,
    depth: u8,
    width: u16,
    height: u16,
    canvas: Surface,
    frame: Vec<u8>,
    cursors: CursorHandle,
    cursor_name: Option<String>,
    monitor_name: Option<String>,
    needs_expose: bool,
    pending_mouse: Vec<(MouseEvent, MouseButton, i32, i32)>,
    disconnected: bool,
}

struct XcbRefresh {
    conn: Arc<RustConnection>,
    window: Window,
    width: u16,
    height: u16,
}

impl RefreshPoster for XcbRefresh {
    fn post(&self) {
        let event = ExposeEvent {
            response_type: EXPOSE_EVENT,
            sequence: 0,
            window: self.window,
            x: 0,
            y: 0,
            width: self.width,
            height: self.height,
            count: 1,
        };
        let sent = self
            .conn
            .send_event(false, self.window, EventMask::EXPOSURE, event)
            .map(|_| ())
            .and_then(|_| self.conn.flush());
        if let Err(err) = sent {
            tracing::error!(target: "surface.xcb", error = %err, "failed to post refresh");
        }
    }
}

impl XcbBackend {
    pub fn new() -> Self {
        Self { running: None }
    }
}

impl Default for XcbBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl crate::Backend for XcbBackend {
    fn setup(&mut self, config: &SurfaceConfig) -> anyhow::Result<()> {
        let border = &config.border;
        if border.left_margin != 0
            || border.right_margin != 0
            || border.top_margin != 0
            || border.bottom_margin != 0
        {
            tracing::warn!(target: "surface.xcb", "non-zero border margins ignored on X11");
        }

        let (conn, screen_num) = x11rb::connect(None).context("failed to connect to X")?;
        let conn = Arc::new(conn);
        let screen = conn.setup().roots[screen_num].clone();
        let atoms = Atoms::new(conn.as_ref())?.reply()?;

        let height = config.height_with_border as u16;

        // Pick a monitor: an explicit name must match; otherwise the
        // primary (or first) monitor wins.
        let monitors = conn
            .randr_get_monitors(screen.root, true)?
            .reply()
            .context("failed to list monitors")?;

        let mut chosen: Option<(i16, i16, u16, String)> = None;
        for monitor in &monitors.monitors {
            let name = String::from_utf8_lossy(
                &conn.get_atom_name(monitor.name)?.reply()?.name,
            )
            .into_owned();

            tracing::info!(
                target: "surface.xcb",
                name = %name,
                width = monitor.width,
                height = monitor.height,
                x = monitor.x,
                y = monitor.y,
                primary = monitor.primary,
                "monitor"
            );

            if let Some(wanted) = &config.monitor {
                if wanted == &name {
                    chosen = Some((monitor.x, monitor.y, monitor.width, name));
                    break;
                }
            } else if monitor.primary || chosen.is_none() {
                let primary = monitor.primary;
                chosen = Some((monitor.x, monitor.y, monitor.width, name));
                if primary {
                    break;
                }
            }
        }

        let (mon_x, mon_y, width, monitor_name) = match chosen {
            Some(m) => m,
            None => match &config.monitor {
                Some(wanted) => return Err(anyhow!("no monitor named {wanted}")),
                None => return Err(anyhow!("no monitors")),
            },
        };

        let win_y = match config.location {
            Location::Top => mon_y,
            Location::Bottom => {
                mon_y + (screen.height_in_pixels as i16 - height as i16)
            }
        };

        // Prefer a 32-bit visual for real alpha; fall back to 24.
        let (depth, visual) = screen
            .allowed_depths
            .iter()
            .filter(|d| d.depth == 32 || d.depth == 24)
            .max_by_key(|d| d.depth)
            .and_then(|d| d.visuals.first().map(|v| (d.depth, v.visual_id)))
            .ok_or_else(|| anyhow!("no 24/32-bit visual"))?;

        let colormap = conn.generate_id()?;
        conn.create_colormap(
            x11rb::protocol::xproto::ColormapAlloc::NONE,
            colormap,
            screen.root,
            visual,
        )?;

        let window = conn.generate_id()?;
        conn.create_window(
            depth,
            window,
            screen.root,
            mon_x,
            win_y,
            width,
            height,
            0,
            WindowClass::INPUT_OUTPUT,
            visual,
            &CreateWindowAux::new()
                .background_pixel(screen.black_pixel)
                .border_pixel(screen.white_pixel)
                .override_redirect(1)
                .event_mask(
                    EventMask::EXPOSURE
                        | EventMask::BUTTON_PRESS
                        | EventMask::BUTTON_RELEASE
                        | EventMask::POINTER_MOTION
                        | EventMask::STRUCTURE_NOTIFY,
                )
                .colormap(colormap),
        )?;

        conn.change_property8(
            PropMode::REPLACE,
            window,
            AtomEnum::WM_NAME,
            AtomEnum::STRING,
            config.title.as_bytes(),
        )?;
        conn.change_property32(
            PropMode::REPLACE,
            window,
            atoms._NET_WM_PID,
            AtomEnum::CARDINAL,
            &[std::process::id()],
        )?;
        conn.change_property32(
            PropMode::REPLACE,
            window,
            atoms._NET_WM_WINDOW_TYPE,
            AtomEnum::ATOM,
            &[atoms._NET_WM_WINDOW_TYPE_DOCK],
        )?;
        conn.change_property32(
            PropMode::REPLACE,
            window,
            atoms._NET_WM_STATE,
            AtomEnum::ATOM,
            &[atoms._NET_WM_STATE_ABOVE, atoms._NET_WM_STATE_STICKY],
        )?;
        conn.change_property32(
            PropMode::REPLACE,
            window,
            atoms._NET_WM_DESKTOP,
            AtomEnum::CARDINAL,
            &[0xffff_ffff],
        )?;

        // Always on top.
        conn.configure_window(window, &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE))?;

        let strut = compute_strut(
            config.location,
            mon_x,
            win_y,
            width,
            height,
            screen.height_in_pixels,
        );
        conn.change_property32(
            PropMode::REPLACE,
            window,
            atoms._NET_WM_STRUT,
            AtomEnum::CARDINAL,
            &strut[..4],
        )?;
        conn.change_property32(
            PropMode::REPLACE,
            window,
            atoms._NET_WM_STRUT_PARTIAL,
            AtomEnum::CARDINAL,
            &strut,
        )?;

        let gc = conn.generate_id()?;
        conn.create_gc(
            gc,
            window,
            &CreateGCAux::new()
                .foreground(screen.white_pixel)
                .graphics_exposures(0),
        )?;

        conn.map_window(window)?;

        let resources = resource_manager::new_from_default(conn.as_ref())?;
        let cursors = CursorHandle::new(conn.as_ref(), screen_num, &resources)?.reply()?;

        conn.flush()?;

        self.running = Some(Running {
            conn,
            window,
            gc,
            depth,
            width,
            height,
            canvas: Surface::new(width as u32, height as u32),
            frame: vec![0; width as usize * height as usize * 4],
            cursors,
            cursor_name: None,
            monitor_name: Some(monitor_name),
            needs_expose: true,
            pending_mouse: Vec::new(),
            disconnected: false,
        });

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

        let conn_fd = running.conn.stream().as_raw_fd();
        let fds = [abort.as_raw_fd(), conn_fd];

        loop {
            running.drain_events()?;

            for (event, button, x, y) in std::mem::take(&mut running.pending_mouse) {
                if let Some(cursor) = handler.mouse(event, button, x, y) {
                    running.apply_cursor(&cursor);
                }
            }

            if running.needs_expose {
                running.needs_expose = false;
                handler.expose(&mut running.canvas);
                running.commit_frame();
                if let Some(cursor) = handler.cursor_request() {
                    running.apply_cursor(&cursor);
                }
            }

            if running.disconnected {
                tracing::warn!(target: "surface.xcb", "disconnected from X server");
                abort.raise();
                break;
            }

            let ready = wait_readable_multi(&fds, None).context("poll")?;
            if ready[0] {
                break;
            }
            // ready[1]: X events; drained at the top of the loop.
        }

        Ok(())
    }

    fn refresh_poster(&self) -> Arc<dyn RefreshPoster> {
        match &self.running {
            Some(running) => Arc::new(XcbRefresh {
                conn: running.conn.clone(),
                window: running.window,
                width: running.width,
                height: running.height,
            }),
            None => Arc::new(NullRefresh),
        }
    }

    fn set_cursor(&mut self, name: &str) {
        if let Some(running) = &mut self.running {
            running.apply_cursor(name);
        }
    }

    fn output_name(&self) -> Option<String> {
        self.running.as_ref()?.monitor_name.clone()
    }

    fn cleanup(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.conn.free_gc(running.gc);
            let _ = running.conn.destroy_window(running.window);
            let _ = running.conn.flush();
        }
    }
}

struct NullRefresh;

impl RefreshPoster for NullRefresh {
    fn post(&self) {
        tracing::warn!(target: "surface.xcb", "refresh posted before setup");
    }
}

impl Running {
    fn drain_events(&mut self) -> anyhow::Result<()> {
        loop {
            let event = match self.conn.poll_for_event() {
                Ok(Some(event)) => event,
                Ok(None) => return Ok(()),
                Err(err) => {
                    tracing::error!(target: "surface.xcb", error = %err, "connection error");
                    self.disconnected = true;
                    return Ok(());
                }
            };

            match event {
                Event::Expose(_) => self.needs_expose = true,
                Event::MotionNotify(e) => {
                    self.pending_mouse.push((
                        MouseEvent::Motion,
                        MouseButton::None,
                        e.event_x as i32,
                        e.event_y as i32,
                    ));
                }
                Event::ButtonRelease(e) => {
                    if let Some(button) = button_from_x11(e.detail) {
                        self.pending_mouse.push((
                            MouseEvent::Click,
                            button,
                            e.event_x as i32,
                            e.event_y as i32,
                        ));
                    }
                }
                Event::ButtonPress(_) => {}
                Event::Error(e) => {
                    tracing::error!(target: "surface.xcb", error = ?e, "X error");
                }
                Event::DestroyNotify(_) => {
                    tracing::warn!(target: "surface.xcb", "window destroyed");
                    self.disconnected = true;
                }
                _ => {}
            }
        }
    }

    fn commit_frame(&mut self) {
        self.canvas.write_argb8888(&mut self.frame);
        let pushed = self
            .conn
            .put_image(
                ImageFormat::Z_PIXMAP,
                self.window,
                self.gc,
                self.width,
                self.height,
                0,
                0,
                0,
                self.depth,
                &self.frame,
            )
            .map(|_| ())
            .and_then(|_| self.conn.flush());
        if let Err(err) = pushed {
            tracing::error!(target: "surface.xcb", error = %err, "failed to push frame");
        }
    }

    fn apply_cursor(&mut self, name: &str) {
        if self.cursor_name.as_deref() == Some(name) {
            return;
        }

        let applied = self
            .cursors
            .load_cursor(self.conn.as_ref(), name)
            .map_err(anyhow::Error::from)
            .and_then(|cursor| {
                self.conn
                    .change_window_attributes(
                        self.window,
                        &ChangeWindowAttributesAux::new().cursor(cursor),
                    )
                    .map(|_| ())
                    .map_err(anyhow::Error::from)
            })
            .and_then(|_| self.conn.flush().map_err(anyhow::Error::from));

        match applied {
            Ok(()) => self.cursor_name = Some(name.to_owned()),
            Err(err) => {
                tracing::warn!(target: "surface.xcb", cursor = name, error = %err, "failed to load cursor");
            }
        }
    }
}

/// `_NET_WM_STRUT_PARTIAL`: left/right/top/bottom sizes followed by four
/// start/end pairs. Only the bar's own edge reserves space.
fn compute_strut(
    location: Location,
    x: i16,
    y: i16,
    width: u16,
    height: u16,
    screen_height: u16,
) -> [u32; 12] {
    let mut strut = [0u32; 12];
    let start = x.max(0) as u32;
    let end = (x.max(0) as u32 + width as u32).saturating_sub(1);

    match location {
        Location::Top => {
            strut[2] = y.max(0) as u32 + height as u32; // top
            strut[8] = start; // top_start_x
            strut[9] = end; // top_end_x
        }
        Location::Bottom => {
            strut[3] = (screen_height as u32).saturating_sub(y.max(0) as u32); // bottom
            strut[10] = start; // bottom_start_x
            strut[11] = end; // bottom_end_x
        }
    }

    strut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_strut_reserves_height_plus_offset() {
        let strut = compute_strut(Location::Top, 0, 0, 1920, 30, 1080);
        assert_eq!(strut[2], 30);
        assert_eq!(strut[3], 0);
        assert_eq!(&strut[8..10], &[0, 1919]);
        assert_eq!(&strut[10..12], &[0, 0]);
    }

    #[test]
    fn bottom_strut_measures_from_screen_bottom() {
        // Bar at y = 1050, 30px tall on a 1080px screen.
        let strut = compute_strut(Location::Bottom, 0, 1050, 1920, 30, 1080);
        assert_eq!(strut[2], 0);
        assert_eq!(strut[3], 30);
        assert_eq!(&strut[10..12], &[0, 1919]);
    }

    #[test]
    fn strut_respects_monitor_x_offset() {
        let strut = compute_strut(Location::Top, 1920, 0, 1280, 24, 1080);
        assert_eq!(&strut[8..10], &[1920, 3199]);
    }
}
