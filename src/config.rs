//! CLI flag and environment variable handling.
//!
//! Deliberately hand-rolled (no `clap`) — there is exactly one flag, and the
//! daemon's other knobs are environment variables read once at startup.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// `--addr=HOST:PORT`, default `:9000`.
    pub addr: String,
    /// `HANDOFF_STAGING_DIR`, default `dist`.
    pub staging_dir: std::path::PathBuf,
    /// `HANDOFF_DRAIN_SECS`, default 5 — spec §9 open question #3, exposed
    /// as a config knob.
    pub drain_timeout: Duration,
}

const DEFAULT_ADDR: &str = ":9000";
const DEFAULT_STAGING_DIR: &str = "dist";
const DEFAULT_DRAIN_SECS: u64 = 5;

pub fn from_env_and_args() -> Config {
    let addr = std::env::args()
        .skip(1)
        .find_map(|arg| arg.strip_prefix("--addr=").map(str::to_string))
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());

    let staging_dir = std::env::var("HANDOFF_STAGING_DIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::path::PathBuf::from(DEFAULT_STAGING_DIR));

    let drain_timeout = std::env::var("HANDOFF_DRAIN_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(DEFAULT_DRAIN_SECS));

    Config {
        addr,
        staging_dir,
        drain_timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialize env-var tests to prevent interference between parallel test threads.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_when_nothing_set() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("HANDOFF_STAGING_DIR");
        std::env::remove_var("HANDOFF_DRAIN_SECS");
        let config = from_env_and_args();
        assert_eq!(config.staging_dir, std::path::PathBuf::from("dist"));
        assert_eq!(config.drain_timeout, Duration::from_secs(5));
    }

    #[test]
    fn staging_dir_env_override() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("HANDOFF_STAGING_DIR", "/tmp/custom-dist");
        let config = from_env_and_args();
        std::env::remove_var("HANDOFF_STAGING_DIR");
        assert_eq!(
            config.staging_dir,
            std::path::PathBuf::from("/tmp/custom-dist")
        );
    }

    #[test]
    fn drain_secs_env_override() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("HANDOFF_DRAIN_SECS", "30");
        let config = from_env_and_args();
        std::env::remove_var("HANDOFF_DRAIN_SECS");
        assert_eq!(config.drain_timeout, Duration::from_secs(30));
    }
}
