//! Core event types and cross-thread wake primitives.
//!
//! Every cross-thread signal in the bar is a file descriptor, so that the
//! backend loop and all module workers can wait on the same things with a
//! single `poll(2)`-style mechanism:
//!
//! - [`AbortSignal`]: a pipe whose write end is hit once, on shutdown. The
//!   byte is never consumed, which makes the read end level-readable for
//!   every poller from that point on.
//! - [`RefreshWake`]: an eventfd. Any number of posts between two drains
//!   collapse into a single wakeup; draining resets it. This is what gives
//!   the render loop its coalescing guarantee.
//!
//! Pointer input is normalized into [`MouseEvent`] + [`MouseButton`] here so
//! the particle and surface crates agree on one vocabulary.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

mod fd;

pub use fd::{wait_readable, wait_readable_multi};

/// Pointer event kinds delivered by a display backend.
///
/// Only motion and button events exist; the bar has no keyboard focus and
/// never will (it is a dock surface).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseEvent {
    Motion,
    Click,
}

/// Pointer buttons the on-click machinery distinguishes.
///
/// `None` is the placeholder carried by motion events; it never maps to an
/// on-click template slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    None,
    Left,
    Middle,
    Right,
    WheelUp,
    WheelDown,
    Previous,
    Next,
}

impl MouseButton {
    /// Number of template slots (excludes `None`).
    pub const COUNT: usize = 7;

    /// Slot index for per-button template arrays.
    pub fn index(self) -> Option<usize> {
        match self {
            MouseButton::None => None,
            MouseButton::Left => Some(0),
            MouseButton::Middle => Some(1),
            MouseButton::Right => Some(2),
            MouseButton::WheelUp => Some(3),
            MouseButton::WheelDown => Some(4),
            MouseButton::Previous => Some(5),
            MouseButton::Next => Some(6),
        }
    }

    pub fn all() -> [MouseButton; Self::COUNT] {
        [
            MouseButton::Left,
            MouseButton::Middle,
            MouseButton::Right,
            MouseButton::WheelUp,
            MouseButton::WheelDown,
            MouseButton::Previous,
            MouseButton::Next,
        ]
    }

    /// Configuration key for this button (`on-click` sub-keys).
    pub fn config_key(self) -> &'static str {
        match self {
            MouseButton::None => "",
            MouseButton::Left => "left",
            MouseButton::Middle => "middle",
            MouseButton::Right => "right",
            MouseButton::WheelUp => "wheel-up",
            MouseButton::WheelDown => "wheel-down",
            MouseButton::Previous => "previous",
            MouseButton::Next => "next",
        }
    }
}

/// Process-wide shutdown signal.
///
/// Internally a pipe. `raise()` writes a single byte which is deliberately
/// never read back, so every holder of the read end observes it as readable
/// forever after. Clones share the same pipe.
#[derive(Clone)]
pub struct AbortSignal {
    inner: Arc<AbortInner>,
}

struct AbortInner {
    read: OwnedFd,
    write: OwnedFd,
}

impl AbortSignal {
    pub fn new() -> io::Result<Self> {
        let (read, write) = fd::pipe()?;
        Ok(Self {
            inner: Arc::new(AbortInner { read, write }),
        })
    }

    /// Signal shutdown. Idempotent; later calls are no-ops in effect since
    /// the first byte already keeps the read end readable.
    pub fn raise(&self) {
        if let Err(err) = fd::write_byte(&self.inner.write) {
            // A full pipe means a previous raise already succeeded.
            if err.kind() != io::ErrorKind::WouldBlock {
                tracing::error!(target: "events", error = %err, "failed to raise abort signal");
            }
        }
    }

    /// Non-blocking check.
    pub fn is_raised(&self) -> bool {
        fd::wait_readable(self.inner.read.as_raw_fd(), Some(Duration::ZERO)).unwrap_or(true)
    }

    /// Block until raised or `timeout` elapses. Returns `true` when raised.
    ///
    /// This is the suspension point module run loops are expected to sit in
    /// between content updates.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        fd::wait_readable(self.inner.read.as_raw_fd(), Some(timeout)).unwrap_or(true)
    }

    /// Block until raised. For modules with no work of their own.
    pub fn wait(&self) {
        let _ = fd::wait_readable(self.inner.read.as_raw_fd(), None);
    }

    /// The pollable read end, for integration into external event loops.
    pub fn borrow_fd(&self) -> BorrowedFd<'_> {
        unsafe { BorrowedFd::borrow_raw(self.inner.read.as_raw_fd()) }
    }

    /// Raw fd of the write end, for `signal-hook`-style registration that
    /// must write from a signal handler context.
    pub fn raw_write_fd(&self) -> RawFd {
        self.inner.write.as_raw_fd()
    }
}

impl AsRawFd for AbortSignal {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.read.as_raw_fd()
    }
}

impl AsFd for AbortSignal {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.read.as_fd()
    }
}

/// Coalescing render wake.
///
/// An eventfd: `post()` adds to the counter, `drain()` zeroes it. However
/// many posts land between two drains, the fd transitions readable exactly
/// once, which is precisely the "k refreshes, one render" contract.
#[derive(Clone)]
pub struct RefreshWake {
    fd: Arc<OwnedFd>,
}

impl RefreshWake {
    pub fn new() -> io::Result<Self> {
        let fd = fd::eventfd()?;
        Ok(Self { fd: Arc::new(fd) })
    }

    /// Request a render. Callable from any thread.
    pub fn post(&self) {
        if let Err(err) = fd::eventfd_write(&self.fd) {
            tracing::error!(target: "events", error = %err, "failed to post refresh wake");
        }
    }

    /// Consume all pending posts. Returns `true` if at least one was pending.
    pub fn drain(&self) -> bool {
        fd::eventfd_read(&self.fd).unwrap_or(false)
    }

    pub fn borrow_fd(&self) -> BorrowedFd<'_> {
        unsafe { BorrowedFd::borrow_raw(self.fd.as_raw_fd()) }
    }
}

impl AsRawFd for RefreshWake {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for RefreshWake {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Construct an `OwnedFd` wrapper around a raw fd produced by libc.
pub(crate) unsafe fn owned(fd: RawFd) -> OwnedFd {
    unsafe { OwnedFd::from_raw_fd(fd) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn abort_starts_unraised() {
        let abort = AbortSignal::new().unwrap();
        assert!(!abort.is_raised());
    }

    #[test]
    fn abort_is_sticky_and_shared() {
        let abort = AbortSignal::new().unwrap();
        let clone = abort.clone();
        abort.raise();
        assert!(clone.is_raised());
        // A second check must still observe it; nothing consumes the byte.
        assert!(clone.is_raised());
        assert!(abort.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn abort_wait_times_out() {
        let abort = AbortSignal::new().unwrap();
        let start = Instant::now();
        assert!(!abort.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn abort_raise_unblocks_waiter() {
        let abort = AbortSignal::new().unwrap();
        let clone = abort.clone();
        let waiter = std::thread::spawn(move || clone.wait_timeout(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(10));
        abort.raise();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn refresh_posts_coalesce() {
        let wake = RefreshWake::new().unwrap();
        for _ in 0..17 {
            wake.post();
        }
        assert!(wake.drain());
        // All 17 posts collapsed into the single drain above.
        assert!(!wake.drain());
    }

    #[test]
    fn refresh_post_after_drain_is_visible() {
        let wake = RefreshWake::new().unwrap();
        wake.post();
        assert!(wake.drain());
        wake.post();
        assert!(wake.drain());
    }

    #[test]
    fn mouse_button_indices_are_dense() {
        let mut seen = [false; MouseButton::COUNT];
        for btn in MouseButton::all() {
            let idx = btn.index().expect("real buttons have slots");
            assert!(!seen[idx]);
            seen[idx] = true;
        }
        assert!(seen.iter().all(|s| *s));
        assert_eq!(MouseButton::None.index(), None);
    }
}
