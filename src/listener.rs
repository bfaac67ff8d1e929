//! Listener Broker (spec component C).
//!
//! Obtains the process's single listening TCP socket either by binding
//! fresh or by adopting a descriptor inherited from a predecessor via the
//! systemd-style `LISTENER_FDS` sentinel starting at fd 3, and exposes that
//! socket for inheritance by a successor at hand-off time.

use std::io;
use std::net::TcpListener as StdTcpListener;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

use tokio::net::TcpListener;
use tracing::info;

/// Environment variable a parent sets to tell its successor "fd 3 is an
/// already-listening socket, do not bind". The child must unset this before
/// any further exec of its own, so a later handoff in the same tree doesn't
/// cascade-adopt a stale descriptor.
pub const LISTENER_FDS_VAR: &str = "LISTENER_FDS";

/// First inheritable descriptor number under the socket-activation
/// convention this broker follows.
const FIRST_INHERITED_FD: RawFd = 3;

/// Obtain the listening socket: adopt an inherited one if the sentinel says
/// so, otherwise bind fresh to `addr`.
pub fn acquire(addr: &str) -> io::Result<TcpListener> {
    match inherited_count() {
        Some(count) if count >= 1 => adopt_inherited(),
        _ => bind_fresh(addr),
    }
}

fn inherited_count() -> Option<u32> {
    std::env::var(LISTENER_FDS_VAR).ok()?.parse().ok()
}

/// Adopt fd 3 as an already-listening socket. Fails fatally (no fallback to
/// a fresh bind) if the sentinel lied: a silent rebind could briefly create
/// two listeners or drop the connection entirely.
fn adopt_inherited() -> io::Result<TcpListener> {
    // Safety: the fd is owned by this process (inherited across exec) and
    // not used anywhere else until this call takes ownership of it.
    let std_listener = unsafe { StdTcpListener::from_raw_fd(FIRST_INHERITED_FD) };
    if !is_listening_socket(std_listener.as_raw_fd()) {
        // Leak the bogus fd rather than closing something we don't own the
        // semantics of; the process is aborting startup regardless.
        std::mem::forget(std_listener);
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "{LISTENER_FDS_VAR} indicated an inherited listener but fd {FIRST_INHERITED_FD} is not a listening socket"
            ),
        ));
    }
    std_listener.set_nonblocking(true)?;
    info!(fd = FIRST_INHERITED_FD, "adopted inherited listener");
    let listener = TcpListener::from_std(std_listener)?;
    // Unset before any further exec of our own, so a later handoff in this
    // same process tree doesn't cascade-adopt a stale descriptor.
    std::env::remove_var(LISTENER_FDS_VAR);
    Ok(listener)
}

fn bind_fresh(addr: &str) -> io::Result<TcpListener> {
    let std_listener = StdTcpListener::bind(addr)?;
    std_listener.set_nonblocking(true)?;
    info!(%addr, "bound fresh listener");
    TcpListener::from_std(std_listener)
}

/// `getsockopt(SO_TYPE)` — confirms the inherited fd is actually a
/// listening stream socket before we trust it as one.
fn is_listening_socket(fd: RawFd) -> bool {
    let mut sock_type: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_TYPE,
            &mut sock_type as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    rc == 0 && sock_type == libc::SOCK_STREAM
}

/// The raw fd number to hand off to a successor. The successor always
/// receives it at fd 3 regardless of its number in this process — the
/// coordinator's `pre_exec` hook performs the `dup2` after `fork`, in the
/// child's own address space, which is the point at which close-on-exec
/// stops mattering (a freshly `dup2`'d descriptor is never close-on-exec).
pub fn hand_off(listener: &TcpListener) -> RawFd {
    listener.as_raw_fd()
}

/// The fd number a successor will find its inherited listener at.
pub fn successor_fd() -> RawFd {
    FIRST_INHERITED_FD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_binds_fresh_when_no_sentinel() {
        std::env::remove_var(LISTENER_FDS_VAR);
        let listener = acquire("127.0.0.1:0").expect("bind should succeed");
        assert!(listener.local_addr().unwrap().port() > 0);
    }

    #[tokio::test]
    async fn acquire_binds_fresh_when_sentinel_is_zero() {
        std::env::set_var(LISTENER_FDS_VAR, "0");
        let result = acquire("127.0.0.1:0");
        std::env::remove_var(LISTENER_FDS_VAR);
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn hand_off_returns_a_valid_fd_number() {
        std::env::remove_var(LISTENER_FDS_VAR);
        let listener = acquire("127.0.0.1:0").unwrap();
        assert!(hand_off(&listener) >= 0);
    }

    #[test]
    fn successor_fd_is_three() {
        assert_eq!(successor_fd(), 3);
    }
}
