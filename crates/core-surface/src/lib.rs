//! Display backends: the uniform contract that makes wayland and X11
//! interchangeable surface providers.
//!
//! The bar hands a [`Backend`] its geometry, then parks inside
//! [`Backend::run_loop`]. The backend owns the event pump and all
//! protocol-side resources (buffers, pointers, cursors); the bar's
//! [`EventHandler`] is invoked on the bar thread for redraws and pointer
//! events. Coordinates given to the handler are in the bar's unscaled
//! pixel space.
//!
//! Cross-thread refresh goes through a [`RefreshPoster`] clone: any thread
//! may post, the backend's loop wakes on its fd, and however many posts
//! accumulated, the next iteration renders exactly one frame.

use std::sync::Arc;

use core_config::{BackendKind, BorderConfig, Location};
use core_events::{AbortSignal, MouseButton, MouseEvent};
use core_render::Surface;

mod wayland;
mod xcb;

pub use wayland::WaylandBackend;
pub use xcb::XcbBackend;

/// Geometry and identity the backend needs to create its surface.
#[derive(Debug, Clone)]
pub struct SurfaceConfig {
    /// Preferred output, by name. `None` lets the compositor/server pick.
    pub monitor: Option<String>,
    pub location: Location,
    /// Bar height including both border strokes, unscaled pixels.
    pub height_with_border: u32,
    /// Border block; the side margins become layer-surface margins on
    /// wayland and are ignored (with a warning) on X11.
    pub border: BorderConfig,
    pub title: String,
}

/// Callbacks the backend invokes from its loop, on the bar thread.
pub trait EventHandler {
    /// Redraw into `surface`. The backend publishes the frame afterwards,
    /// subject to its own scheduling (frame callbacks on wayland).
    fn expose(&mut self, surface: &mut Surface);

    /// A pointer event at `(x, y)` in unscaled pixels. Returns the XDG
    /// cursor name to switch to, if the pointer image should change.
    fn mouse(&mut self, event: MouseEvent, button: MouseButton, x: i32, y: i32) -> Option<String>;

    /// A cursor change requested outside pointer dispatch (modules may ask
    /// for one). Polled by the backend after each frame.
    fn cursor_request(&mut self) -> Option<String> {
        None
    }
}

/// Cross-thread render request; see the module docs.
pub trait RefreshPoster: Send + Sync {
    fn post(&self);
}

pub trait Backend {
    /// Create the surface and start the input machinery. On return the
    /// surface has a size and [`Backend::refresh_poster`] is functional.
    fn setup(&mut self, config: &SurfaceConfig) -> anyhow::Result<()>;

    /// The event pump. Runs until the abort signal is readable, the
    /// compositor/server disconnects, or the surface is closed under us.
    fn run_loop(&mut self, abort: &AbortSignal, handler: &mut dyn EventHandler)
        -> anyhow::Result<()>;

    /// A cloneable cross-thread refresh handle. Only valid after `setup`.
    fn refresh_poster(&self) -> Arc<dyn RefreshPoster>;

    /// Change the pointer image by XDG cursor name.
    fn set_cursor(&mut self, name: &str);

    /// The output the surface currently sits on, if known.
    fn output_name(&self) -> Option<String>;

    /// Release every backend resource. Idempotent.
    fn cleanup(&mut self);
}

/// Resolve `Auto` against the session: wayland when `WAYLAND_DISPLAY` is
/// set, X11 otherwise. Explicit choices pass through.
pub fn resolve_backend(kind: BackendKind, wayland_display: Option<&std::ffi::OsStr>) -> BackendKind {
    match kind {
        BackendKind::Auto => {
            if wayland_display.is_some() {
                BackendKind::Wayland
            } else {
                BackendKind::X11
            }
        }
        explicit => explicit,
    }
}

/// Instantiate the configured backend. Construction is lazy; nothing
/// connects to a display server until `setup`.
pub fn new_backend(kind: BackendKind) -> Box<dyn Backend> {
    let env = std::env::var_os("WAYLAND_DISPLAY");
    let resolved = resolve_backend(kind, env.as_deref());

    tracing::info!(target: "surface", backend = ?resolved, "selected display backend");

    match resolved {
        BackendKind::Wayland => Box::new(WaylandBackend::new()),
        BackendKind::X11 | BackendKind::Auto => Box::new(XcbBackend::new()),
    }
}

/// Map an evdev button code (wayland) to the bar's button model.
pub(crate) fn button_from_evdev(code: u32) -> Option<MouseButton> {
    // input-event-codes: BTN_LEFT.. BTN_TASK.
    match code {
        0x110 => Some(MouseButton::Left),
        0x111 => Some(MouseButton::Right),
        0x112 => Some(MouseButton::Middle),
        0x113 => Some(MouseButton::Previous),
        0x114 => Some(MouseButton::Next),
        _ => None,
    }
}

/// Map an X11 core button number to the bar's button model.
pub(crate) fn button_from_x11(detail: u8) -> Option<MouseButton> {
    match detail {
        1 => Some(MouseButton::Left),
        2 => Some(MouseButton::Middle),
        3 => Some(MouseButton::Right),
        4 => Some(MouseButton::WheelUp),
        5 => Some(MouseButton::WheelDown),
        8 => Some(MouseButton::Previous),
        9 => Some(MouseButton::Next),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    #[test]
    fn auto_selects_wayland_only_with_a_display() {
        assert_eq!(
            resolve_backend(BackendKind::Auto, Some(OsStr::new("wayland-1"))),
            BackendKind::Wayland
        );
        assert_eq!(resolve_backend(BackendKind::Auto, None), BackendKind::X11);
        // Explicit choices ignore the environment.
        assert_eq!(
            resolve_backend(BackendKind::X11, Some(OsStr::new("wayland-1"))),
            BackendKind::X11
        );
        assert_eq!(
            resolve_backend(BackendKind::Wayland, None),
            BackendKind::Wayland
        );
    }

    #[test]
    fn evdev_buttons_map() {
        assert_eq!(button_from_evdev(0x110), Some(MouseButton::Left));
        assert_eq!(button_from_evdev(0x112), Some(MouseButton::Middle));
        assert_eq!(button_from_evdev(0x999), None);
    }

    #[test]
    fn x11_buttons_map_including_wheel() {
        assert_eq!(button_from_x11(1), Some(MouseButton::Left));
        assert_eq!(button_from_x11(4), Some(MouseButton::WheelUp));
        assert_eq!(button_from_x11(5), Some(MouseButton::WheelDown));
        assert_eq!(button_from_x11(9), Some(MouseButton::Next));
        assert_eq!(button_from_x11(6), None);
    }
}
