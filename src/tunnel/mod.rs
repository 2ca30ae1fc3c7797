//! SOCKS5 tunnel lifecycle management.
//!
//! A [`TunnelManager`] turns a proxy specification string into a stable local
//! proxy endpoint. A `socks5://...` specification is used as-is and never
//! spawns anything. An `ssh://user@host` specification requests a supervised
//! SSH dynamic port-forward: `start()` spawns
//! `ssh -4NTD 1234 -o ExitOnForwardFailure=yes <destination>` and a
//! background loop respawns the process whenever it exits, until `end()`
//! cancels the loop and delivers an interrupt to the live child.
//!
//! # Module structure note
//!
//! This module is intentionally a single file (`mod.rs`-only): the feature
//! scope is small enough to not warrant sub-files.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// Local port the SSH dynamic forward binds to.
const LOCAL_FORWARD_PORT: u16 = 1234;

/// Endpoint handed to the browser when an SSH tunnel is active.
const LOCAL_FORWARD_ENDPOINT: &str = "socks5://localhost:1234";

/// Pause between respawns of a crashed forward process.
const RESPAWN_DELAY: Duration = Duration::from_millis(100);

/// Errors produced by tunnel management.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The proxy specification string could not be parsed.
    #[error("invalid proxy specification '{spec}': {reason}")]
    InvalidSpec {
        /// The offending specification string.
        spec: String,
        /// Why parsing failed.
        reason: String,
    },

    /// The forwarding subprocess could not be spawned.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// The program that failed to spawn.
        program: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The supervision task ended abnormally.
    #[error("tunnel supervision task failed: {reason}")]
    Supervision {
        /// Why the task failed.
        reason: String,
    },
}

impl TunnelError {
    fn invalid_spec(spec: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }

    fn spawn(program: &str, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.to_string(),
            source,
        }
    }
}

/// Parsed form of a proxy specification.
#[derive(Debug, Clone)]
enum TunnelSpec {
    /// A proxy endpoint that is already reachable; used verbatim.
    Direct(Url),
    /// An SSH destination (`user@host` or `host`) to open a forward through.
    Ssh { destination: String },
}

impl TunnelSpec {
    fn parse(spec: &str) -> Result<Self, TunnelError> {
        let url = Url::parse(spec)
            .map_err(|e| TunnelError::invalid_spec(spec, e.to_string()))?;

        if url.scheme() != "ssh" {
            return Ok(Self::Direct(url));
        }

        let host = url
            .host_str()
            .ok_or_else(|| TunnelError::invalid_spec(spec, "ssh specification has no host"))?;

        let destination = if url.username().is_empty() {
            host.to_string()
        } else {
            format!("{}@{host}", url.username())
        };

        Ok(Self::Ssh { destination })
    }
}

/// Owns an optional SSH-based SOCKS5 forward and supervises it.
///
/// Exclusively owned by one pipeline session. At most one forwarding
/// subprocess is alive per manager at any time; the supervision loop
/// replaces a dead child rather than stacking new ones.
pub struct TunnelManager {
    spec: TunnelSpec,
    program: String,
    token: CancellationToken,
    supervisor: Option<JoinHandle<Result<(), TunnelError>>>,
    respawns: Arc<AtomicUsize>,
    closed: bool,
}

impl TunnelManager {
    /// Creates a manager from a proxy specification string.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::InvalidSpec`] when the specification is not a
    /// parseable URL or names an `ssh://` target without a host.
    pub fn new(spec: &str) -> Result<Self, TunnelError> {
        Self::with_forward_program(spec, "ssh")
    }

    /// Creates a manager that spawns `program` instead of `ssh` (for testing
    /// supervision without an SSH client).
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::InvalidSpec`] on an unparseable specification.
    pub fn with_forward_program(
        spec: &str,
        program: impl Into<String>,
    ) -> Result<Self, TunnelError> {
        Ok(Self {
            spec: TunnelSpec::parse(spec)?,
            program: program.into(),
            token: CancellationToken::new(),
            supervisor: None,
            respawns: Arc::new(AtomicUsize::new(0)),
            closed: false,
        })
    }

    /// The local proxy endpoint this manager provides.
    ///
    /// Stable for the lifetime of the manager: a direct specification is
    /// returned verbatim, an SSH specification always maps to the fixed
    /// local forward endpoint.
    #[must_use]
    pub fn url(&self) -> &str {
        match &self.spec {
            TunnelSpec::Direct(url) => url.as_str(),
            TunnelSpec::Ssh { .. } => LOCAL_FORWARD_ENDPOINT,
        }
    }

    /// Number of times the supervision loop has replaced a dead forward.
    #[must_use]
    pub fn respawn_count(&self) -> usize {
        self.respawns.load(Ordering::SeqCst)
    }

    /// Spawns the forwarding subprocess and its supervision loop.
    ///
    /// No-op for direct specifications. Calling `start()` twice is a no-op
    /// while the first supervision loop is alive.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Spawn`] when the first spawn fails (missing
    /// binary, bad permissions). Later respawn failures terminate the
    /// supervision loop and surface from [`end()`](Self::end).
    pub async fn start(&mut self) -> Result<(), TunnelError> {
        let TunnelSpec::Ssh { destination } = &self.spec else {
            return Ok(());
        };
        if self.supervisor.is_some() {
            debug!("tunnel already started");
            return Ok(());
        }

        let child = spawn_forward(&self.program, destination)?;
        info!(destination = %destination, port = LOCAL_FORWARD_PORT, "SSH forward started");

        let token = self.token.clone();
        let respawns = Arc::clone(&self.respawns);
        let program = self.program.clone();
        let destination = destination.clone();

        self.supervisor = Some(tokio::spawn(supervise(
            child,
            program,
            destination,
            token,
            respawns,
        )));

        Ok(())
    }

    /// Stops the forward and waits for the supervision loop to exit.
    ///
    /// Signals the subprocess with SIGINT, marks the manager closed, and
    /// joins the loop so no respawn can happen after this returns. Safe to
    /// call before `start()` and safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Supervision`] when the loop panicked, or the
    /// respawn error that terminated the loop early.
    pub async fn end(&mut self) -> Result<(), TunnelError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.token.cancel();

        let Some(handle) = self.supervisor.take() else {
            return Ok(());
        };

        match handle.await {
            Ok(result) => result,
            Err(join_error) => Err(TunnelError::Supervision {
                reason: join_error.to_string(),
            }),
        }
    }
}

impl Drop for TunnelManager {
    fn drop(&mut self) {
        // The detached loop observes the cancellation and interrupts the
        // child; `kill_on_drop` on the Command covers runtime shutdown.
        self.token.cancel();
    }
}

/// Supervision loop: owns the child, respawns it on exit, interrupts it on
/// cancellation.
async fn supervise(
    mut child: Child,
    program: String,
    destination: String,
    token: CancellationToken,
    respawns: Arc<AtomicUsize>,
) -> Result<(), TunnelError> {
    loop {
        tokio::select! {
            () = token.cancelled() => {
                interrupt(&mut child);
                let _ = child.wait().await;
                debug!("tunnel supervision loop stopped");
                return Ok(());
            }
            status = child.wait() => {
                if token.is_cancelled() {
                    return Ok(());
                }
                warn!(?status, destination = %destination, "SSH forward exited, respawning");
                tokio::time::sleep(RESPAWN_DELAY).await;
                if token.is_cancelled() {
                    return Ok(());
                }
                match spawn_forward(&program, &destination) {
                    Ok(next) => {
                        respawns.fetch_add(1, Ordering::SeqCst);
                        child = next;
                    }
                    Err(e) => {
                        error!(error = %e, "SSH forward respawn failed, stopping supervision");
                        return Err(e);
                    }
                }
            }
        }
    }
}

fn spawn_forward(program: &str, destination: &str) -> Result<Child, TunnelError> {
    Command::new(program)
        .args([
            "-4NTD",
            "1234",
            "-o",
            "ExitOnForwardFailure=yes",
            destination,
        ])
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TunnelError::spawn(program, e))
}

/// Delivers SIGINT to the child, falling back to a hard kill when the pid is
/// already gone or the signal cannot be sent.
fn interrupt(child: &mut Child) {
    if let Some(pid) = child.id() {
        #[allow(clippy::cast_possible_wrap)]
        let pid = nix::unistd::Pid::from_raw(pid as i32);
        if nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGINT).is_ok() {
            return;
        }
    }
    let _ = child.start_kill();
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_spec_url_unchanged() {
        let manager = TunnelManager::new("socks5://localhost:9050").unwrap();
        assert_eq!(manager.url(), "socks5://localhost:9050");
    }

    #[test]
    fn test_ssh_spec_maps_to_fixed_local_endpoint() {
        let manager = TunnelManager::new("ssh://alice@gateway.example.org").unwrap();
        assert_eq!(manager.url(), "socks5://localhost:1234");
    }

    #[test]
    fn test_invalid_spec_rejected() {
        let result = TunnelManager::new("not a url");
        assert!(matches!(result, Err(TunnelError::InvalidSpec { .. })));
    }

    #[test]
    fn test_ssh_spec_without_host_rejected() {
        let result = TunnelManager::new("ssh://");
        assert!(matches!(result, Err(TunnelError::InvalidSpec { .. })));
    }

    #[test]
    fn test_ssh_destination_keeps_user() {
        let spec = TunnelSpec::parse("ssh://alice@gateway.example.org").unwrap();
        match spec {
            TunnelSpec::Ssh { destination } => {
                assert_eq!(destination, "alice@gateway.example.org");
            }
            TunnelSpec::Direct(_) => panic!("expected ssh spec"),
        }
    }

    #[test]
    fn test_ssh_destination_bare_host() {
        let spec = TunnelSpec::parse("ssh://gateway.example.org").unwrap();
        match spec {
            TunnelSpec::Ssh { destination } => {
                assert_eq!(destination, "gateway.example.org");
            }
            TunnelSpec::Direct(_) => panic!("expected ssh spec"),
        }
    }

    #[tokio::test]
    async fn test_end_before_start_is_noop() {
        let mut manager = TunnelManager::new("ssh://alice@gateway.example.org").unwrap();
        manager.end().await.unwrap();
        manager.end().await.unwrap();
    }

    #[tokio::test]
    async fn test_direct_spec_start_spawns_nothing() {
        let mut manager = TunnelManager::new("socks5://localhost:9050").unwrap();
        manager.start().await.unwrap();
        assert!(manager.supervisor.is_none());
        manager.end().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_with_missing_program_fails() {
        let mut manager = TunnelManager::with_forward_program(
            "ssh://gateway.example.org",
            "doifetch-test-no-such-binary",
        )
        .unwrap();
        let result = manager.start().await;
        assert!(matches!(result, Err(TunnelError::Spawn { .. })));
        manager.end().await.unwrap();
    }

    #[tokio::test]
    async fn test_supervision_respawns_until_end() {
        // `true` exits immediately (ignoring the ssh argv), so every loop
        // iteration observes an exit and respawns.
        let mut manager =
            TunnelManager::with_forward_program("ssh://gateway.example.org", "true").unwrap();
        manager.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(450)).await;
        let while_running = manager.respawn_count();
        assert!(
            while_running >= 2,
            "expected at least 2 respawns, saw {while_running}"
        );

        manager.end().await.unwrap();
        let after_end = manager.respawn_count();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            manager.respawn_count(),
            after_end,
            "no respawn may happen after end()"
        );
    }

    #[tokio::test]
    async fn test_end_joins_supervision_loop() {
        let mut manager =
            TunnelManager::with_forward_program("ssh://gateway.example.org", "sleep").unwrap();
        // `sleep -4NTD ...` fails argument parsing and exits non-zero; the
        // loop keeps respawning it until end() is observed.
        manager.start().await.unwrap();
        manager.end().await.unwrap();
        assert!(manager.supervisor.is_none());
    }
}
