//! engine::capabilities
//!
//! Host capability probe.
//!
//! # Architecture
//!
//! Capabilities are binary facts about the host, probed once per run and
//! stored in run state. They feed host-validation provider selection:
//! the `local` provider without a configured command needs both the
//! Docker socket and localhost bind.
//!
//! Probe order for the Docker socket:
//! 1. `$DOCKER_HOST` when it is a `unix://` URL
//! 2. the per-user socket (`~/.docker/run/docker.sock`)
//! 3. `/var/run/docker.sock`
//!
//! A socket counts only with read+write access. Localhost bind is
//! probed by binding an ephemeral TCP port on 127.0.0.1; a browser
//! runtime is treated as implied by localhost bind.

use std::net::TcpListener;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::core::env::Env;
use crate::state::run_state::CapabilitySnapshot;

/// Probe the host and produce a capability snapshot.
pub fn probe(env: &Env, now: DateTime<Utc>) -> CapabilitySnapshot {
    let docker_socket_path = find_docker_socket(env);
    let localhost_bind = probe_localhost_bind();
    CapabilitySnapshot {
        docker_socket: docker_socket_path.is_some(),
        docker_socket_path: docker_socket_path.map(|path| path.display().to_string()),
        localhost_bind,
        browser_runtime: localhost_bind,
        probed_at: now.to_rfc3339(),
    }
}

/// Locate a usable Docker socket, if any.
fn find_docker_socket(env: &Env) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(host) = env.docker_host() {
        if let Some(path) = host.strip_prefix("unix://") {
            candidates.push(PathBuf::from(path));
        }
    }
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".docker").join("run").join("docker.sock"));
    }
    candidates.push(PathBuf::from("/var/run/docker.sock"));

    candidates
        .into_iter()
        .find(|candidate| socket_accessible(candidate))
}

/// A socket is usable when it exists and we hold read+write access.
#[cfg(unix)]
fn socket_accessible(path: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    if !path.exists() {
        return false;
    }
    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    unsafe { libc::access(c_path.as_ptr(), libc::R_OK | libc::W_OK) == 0 }
}

#[cfg(not(unix))]
fn socket_accessible(_path: &Path) -> bool {
    false
}

/// Probe localhost bind permission with an ephemeral port.
fn probe_localhost_bind() -> bool {
    TcpListener::bind(("127.0.0.1", 0)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-08-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn snapshot_records_probe_time() {
        let snapshot = probe(&Env::default(), now());
        assert_eq!(snapshot.probed_at, "2026-08-01T12:00:00+00:00");
    }

    #[test]
    fn browser_runtime_follows_localhost_bind() {
        let snapshot = probe(&Env::default(), now());
        assert_eq!(snapshot.browser_runtime, snapshot.localhost_bind);
    }

    #[test]
    fn docker_host_must_be_unix_scheme() {
        // A tcp:// DOCKER_HOST contributes no socket candidate.
        let env = Env::from_vars([("DOCKER_HOST", "tcp://127.0.0.1:2375")]);
        let snapshot = probe(&env, now());
        if let Some(path) = &snapshot.docker_socket_path {
            assert!(!path.contains("127.0.0.1"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn nonexistent_socket_is_not_accessible() {
        assert!(!socket_accessible(Path::new("/nonexistent/docker.sock")));
    }

    #[cfg(unix)]
    #[test]
    fn unix_docker_host_pointing_at_missing_path_is_skipped() {
        let env = Env::from_vars([("DOCKER_HOST", "unix:///nonexistent/docker.sock")]);
        let snapshot = probe(&env, now());
        if let Some(path) = &snapshot.docker_socket_path {
            assert_ne!(path, "/nonexistent/docker.sock");
        }
    }
}
