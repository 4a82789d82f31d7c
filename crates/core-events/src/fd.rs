//! The one place that talks to libc. Everything here is a thin, safe
//! wrapper; callers never see a raw syscall result.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// `pipe2(O_CLOEXEC | O_NONBLOCK)`.
pub(crate) fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { (super::owned(fds[0]), super::owned(fds[1])) })
}

pub(crate) fn write_byte(fd: &OwnedFd) -> io::Result<()> {
    let byte = 1u8;
    let n = unsafe { libc::write(fd.as_raw_fd(), (&byte as *const u8).cast(), 1) };
    if n == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// `eventfd(0, EFD_CLOEXEC | EFD_NONBLOCK)`.
pub(crate) fn eventfd() -> io::Result<OwnedFd> {
    let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { super::owned(fd) })
}

pub(crate) fn eventfd_write(fd: &OwnedFd) -> io::Result<()> {
    let value = 1u64.to_ne_bytes();
    let n = unsafe { libc::write(fd.as_raw_fd(), value.as_ptr().cast(), value.len()) };
    if n == -1 {
        let err = io::Error::last_os_error();
        // Counter saturation still leaves the fd readable; good enough.
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}

/// Read (and thereby reset) an eventfd counter. `Ok(false)` means the
/// counter was already zero.
pub(crate) fn eventfd_read(fd: &OwnedFd) -> io::Result<bool> {
    let mut value = [0u8; 8];
    let n = unsafe { libc::read(fd.as_raw_fd(), value.as_mut_ptr().cast(), value.len()) };
    if n == -1 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(u64::from_ne_bytes(value) > 0)
}

/// Wait until `fd` is readable. `None` blocks indefinitely. Returns whether
/// the fd was readable (as opposed to the timeout firing). EINTR retries.
pub fn wait_readable(fd: RawFd, timeout: Option<Duration>) -> io::Result<bool> {
    let ready = wait_readable_multi(&[fd], timeout)?;
    Ok(ready[0])
}

/// Wait until any of `fds` is readable. Returns per-fd readability, in
/// input order. HUP and ERR count as readable so callers notice dead
/// connections.
pub fn wait_readable_multi(fds: &[RawFd], timeout: Option<Duration>) -> io::Result<Vec<bool>> {
    let timeout_ms: libc::c_int = match timeout {
        None => -1,
        Some(t) => t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
    };

    let mut pfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    loop {
        let rc = unsafe { libc::poll(pfds.as_mut_ptr(), pfds.len() as libc::nfds_t, timeout_ms) };
        if rc == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(pfds
            .iter()
            .map(|p| (p.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR)) != 0)
            .collect());
    }
}
