//! Upgrade Coordinator (spec component D).
//!
//! Drives the verify → replace → spawn → drain state machine for a single
//! in-flight install. A process-wide mutex around the state itself — not
//! just a flag read under the mutex — means a second concurrent call never
//! queues behind the first; it is refused outright via `try_lock`.

use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::process::CommandExt;
use tokio::sync::{Mutex, Notify};
use tracing::{error, info, warn};

use crate::listener;
use crate::scanner::CandidateSlot;
use crate::verify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Verifying,
    Replacing,
    Spawning,
    Draining,
    Fatal,
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("an install is already in progress")]
    AlreadyInstalling,
    #[error("no candidate staged")]
    NoCandidate,
    #[error("signature verification failed: {0}")]
    VerifyFailed(#[from] verify::VerifyError),
    #[error("failed to replace on-disk executable: {0}")]
    ReplaceFailed(std::io::Error),
    #[error("failed to spawn successor: {0}")]
    SpawnFailed(std::io::Error),
}

/// Owns everything the state machine needs across an install: the staging
/// directory, the candidate slot the scanner fills, and the fd of the
/// listener this process is already serving from.
pub struct Coordinator {
    staging_dir: PathBuf,
    candidate: Arc<CandidateSlot>,
    listener_fd: RawFd,
    state: Mutex<State>,
    /// Signalled once a successor has been spawned and handed the listener;
    /// `main` awaits this to begin its own drain-and-exit.
    pub drain: Arc<Notify>,
}

impl Coordinator {
    pub fn new(staging_dir: PathBuf, candidate: Arc<CandidateSlot>, listener_fd: RawFd) -> Self {
        Self {
            staging_dir,
            candidate,
            listener_fd,
            state: Mutex::new(State::Idle),
            drain: Arc::new(Notify::new()),
        }
    }

    /// Run one full install attempt. Returns once the successor has been
    /// spawned and handed the listener (the drain itself happens in `main`,
    /// signalled via `self.drain`).
    pub async fn install(&self) -> Result<(), InstallError> {
        let mut state = match self.state.try_lock() {
            Ok(guard) => guard,
            Err(_) => return Err(InstallError::AlreadyInstalling),
        };
        if *state != State::Idle {
            return Err(InstallError::AlreadyInstalling);
        }

        let Some(candidate_name) = self.candidate.take() else {
            return Err(InstallError::NoCandidate);
        };

        *state = State::Verifying;
        let binary_path = self.staging_dir.join(&candidate_name);
        let signature_path = self
            .staging_dir
            .join(format!("{candidate_name}.RSAsignature"));

        if let Err(e) = verify::verify(&binary_path, &signature_path) {
            warn!(candidate = %candidate_name, error = %e, "verification failed, returning to idle");
            *state = State::Idle;
            return Err(InstallError::VerifyFailed(e));
        }
        info!(candidate = %candidate_name, "verification succeeded");

        *state = State::Replacing;
        if let Err(e) = replace_executable(&binary_path) {
            error!(error = %e, "replace failed: process state is now fatal, operator must intervene");
            *state = State::Fatal;
            return Err(InstallError::ReplaceFailed(e));
        }
        info!("on-disk executable replaced");

        *state = State::Spawning;
        if let Err(e) = self.spawn_successor().await {
            error!(error = %e, "spawn failed after a successful replace: process is fatal, the new image is on disk but no successor is running");
            *state = State::Fatal;
            return Err(InstallError::SpawnFailed(e));
        }

        *state = State::Draining;
        info!("successor spawned and handed the listener, signalling drain");
        self.drain.notify_waiters();
        Ok(())
    }

    async fn spawn_successor(&self) -> std::io::Result<()> {
        let current_exe = std::env::current_exe()?;
        let args: Vec<String> = std::env::args().skip(1).collect();
        let fd = self.listener_fd;
        let target_fd = listener::successor_fd();

        let mut command = tokio::process::Command::new(current_exe);
        command.args(&args);
        command.env(listener::LISTENER_FDS_VAR, "1");

        // Safety: runs after fork, before exec, in the child's address
        // space only. `dup2` is async-signal-safe; nothing else here
        // allocates or touches shared state.
        unsafe {
            command.pre_exec(move || {
                if libc::dup2(fd, target_fd) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = command.spawn()?;
        // The outgoing process does not wait for its successor — it must
        // proceed straight to draining. Reap it in the background so it
        // doesn't become a zombie.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
        Ok(())
    }
}

/// Delete-then-create rather than rename-over: the currently executing
/// process keeps running off the old (now unlinked) inode, so writing the
/// new image at the same path can't corrupt the code it's still executing.
fn replace_executable(source: &std::path::Path) -> std::io::Result<()> {
    let current_exe = std::env::current_exe()?;
    let bytes = std::fs::read(source)?;
    std::fs::remove_file(&current_exe)?;
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o750)
        .open(&current_exe)?;
    file.write_all(&bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_coordinator(staging_dir: PathBuf) -> Coordinator {
        Coordinator::new(staging_dir, Arc::new(CandidateSlot::new()), -1)
    }

    #[tokio::test]
    async fn install_refuses_when_no_candidate() {
        let dir = tempdir().unwrap();
        let coordinator = test_coordinator(dir.path().to_path_buf());
        let result = coordinator.install().await;
        assert!(matches!(result, Err(InstallError::NoCandidate)));
    }

    #[tokio::test]
    async fn install_rejects_when_already_in_progress() {
        let dir = tempdir().unwrap();
        let coordinator = test_coordinator(dir.path().to_path_buf());
        // Simulate a concurrent install holding the state lock.
        let _guard = coordinator.state.try_lock().unwrap();
        let result = coordinator.install().await;
        assert!(matches!(result, Err(InstallError::AlreadyInstalling)));
    }

    #[tokio::test]
    async fn install_returns_to_idle_after_verify_failure() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("app.v1"), b"binary bytes").unwrap();
        std::fs::write(dir.path().join("app.v1.RSAsignature"), b"not a real signature").unwrap();

        let slot = Arc::new(CandidateSlot::new());
        crate::scanner::scan(dir.path(), &slot);
        let coordinator = Coordinator::new(dir.path().to_path_buf(), Arc::clone(&slot), -1);

        let result = coordinator.install().await;
        assert!(matches!(result, Err(InstallError::VerifyFailed(_))));

        // State returned to Idle: a fresh scan + install can be attempted.
        assert_eq!(*coordinator.state.lock().await, State::Idle);
        // The failed candidate was consumed by `take()`, same as a real run.
        assert!(slot.get().is_none());
    }

    #[tokio::test]
    async fn install_fails_closed_when_signature_file_is_missing() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("app.v1"), b"binary bytes").unwrap();

        let slot = Arc::new(CandidateSlot::new());
        crate::scanner::scan(dir.path(), &slot);
        let coordinator = Coordinator::new(dir.path().to_path_buf(), slot, -1);

        let result = coordinator.install().await;
        assert!(matches!(
            result,
            Err(InstallError::VerifyFailed(verify::VerifyError::ReadSignature(_)))
        ));
    }
}
