//! Lightweight DevTools-protocol adapter.
//!
//! Spawns the browser executable itself with a debugging port, discovers the
//! WebSocket endpoint via `/json/version`, and drives navigation and
//! in-page evaluation over a single WebSocket with flat sessions. Every
//! operation creates a fresh target and closes it on all exit paths,
//! including errors and cancellation.

mod connection;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use connection::{CdpConnection, CdpEvent};

use super::error::BackendError;
use super::{AutomationBackend, BackendOptions, build_call_expression};

/// Executables probed in order when no explicit path is configured.
const EXECUTABLE_CANDIDATES: &[&str] = &[
    "google-chrome-stable",
    "google-chrome",
    "chromium",
    "chromium-browser",
];

/// Per-command response budget on the DevTools socket.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the DevTools HTTP endpoint is polled during launch.
const LAUNCH_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Response shape of `/json/version`.
#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "Browser", default)]
    browser: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Browser adapter that speaks the DevTools protocol directly.
pub struct CdpBackend {
    options: BackendOptions,
    child: Option<Child>,
    connection: Option<CdpConnection>,
}

impl CdpBackend {
    /// Creates an unlaunched adapter.
    #[must_use]
    pub fn new(options: BackendOptions) -> Self {
        Self {
            options,
            child: None,
            connection: None,
        }
    }

    fn launch_args(&self, proxy: Option<&str>) -> Vec<String> {
        let mut args = Vec::new();
        if self.options.headless {
            args.push("--headless=new".to_string());
        }
        args.push(format!("--remote-debugging-port={}", self.options.debug_port));
        args.push(format!(
            "--user-data-dir={}",
            std::env::temp_dir()
                .join(format!("doifetch-devtools-{}", self.options.debug_port))
                .display()
        ));
        args.push("--no-first-run".to_string());
        args.push("--no-default-browser-check".to_string());
        args.push("--no-sandbox".to_string());
        args.push("--disable-gpu".to_string());
        if let Some(proxy) = proxy {
            args.push(format!("--proxy-server={proxy}"));
        }
        args.push("about:blank".to_string());
        args
    }

    fn spawn_browser(&self, proxy: Option<&str>) -> Result<Child, BackendError> {
        let args = self.launch_args(proxy);

        if let Some(executable) = &self.options.executable {
            return spawn_executable(executable, &args);
        }

        for candidate in EXECUTABLE_CANDIDATES {
            match spawn_executable(candidate, &args) {
                Ok(child) => return Ok(child),
                Err(BackendError::Launch { .. }) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(BackendError::launch(format!(
            "no browser executable found (tried {})",
            EXECUTABLE_CANDIDATES.join(", ")
        )))
    }

    /// Polls the DevTools HTTP endpoint until it answers or the launch
    /// budget runs out.
    async fn await_devtools(&self) -> Result<VersionInfo, BackendError> {
        let version_url = format!(
            "http://127.0.0.1:{}/json/version",
            self.options.debug_port
        );
        let deadline = Instant::now() + self.options.launch_timeout;

        loop {
            match reqwest::get(&version_url).await {
                Ok(response) => match response.json::<VersionInfo>().await {
                    Ok(version) => return Ok(version),
                    Err(e) => {
                        if Instant::now() >= deadline {
                            return Err(BackendError::launch(format!(
                                "DevTools endpoint returned unexpected payload: {e}"
                            )));
                        }
                    }
                },
                Err(_) if Instant::now() < deadline => {}
                Err(e) => {
                    return Err(BackendError::launch(format!(
                        "DevTools endpoint did not come up within {:?}: {e}",
                        self.options.launch_timeout
                    )));
                }
            }
            tokio::time::sleep(LAUNCH_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl AutomationBackend for CdpBackend {
    async fn init(&mut self, proxy: Option<&str>) -> Result<(), BackendError> {
        let child = self.spawn_browser(proxy)?;
        self.child = Some(child);

        let version = match self.await_devtools().await {
            Ok(version) => version,
            Err(e) => {
                if let Some(mut child) = self.child.take() {
                    terminate(&mut child).await;
                }
                return Err(e);
            }
        };
        debug!(browser = %version.browser, "DevTools endpoint up");

        let connection =
            CdpConnection::connect(&version.web_socket_debugger_url, CALL_TIMEOUT).await?;
        self.connection = Some(connection);
        info!(port = self.options.debug_port, proxy = ?proxy, "browser launched");
        Ok(())
    }

    async fn goto_and_evaluate(
        &self,
        url: &str,
        script: &str,
        args: &[Value],
    ) -> Result<Value, BackendError> {
        let conn = self
            .connection
            .clone()
            .ok_or(BackendError::NotInitialized)?;

        let created = conn
            .call(
                "Target.createTarget",
                Some(json!({"url": "about:blank"})),
                None,
            )
            .await?;
        let target_id = created["targetId"]
            .as_str()
            .ok_or_else(|| BackendError::bridge("createTarget response missing targetId"))?
            .to_string();
        let guard = TargetGuard::new(conn.clone(), target_id.clone());

        let outcome = async {
            let attached = conn
                .call(
                    "Target.attachToTarget",
                    Some(json!({"targetId": target_id, "flatten": true})),
                    None,
                )
                .await?;
            let session_id = attached["sessionId"]
                .as_str()
                .ok_or_else(|| BackendError::bridge("attachToTarget response missing sessionId"))?
                .to_string();

            let mut events = conn.subscribe(&session_id);
            let result =
                drive_page(&conn, &session_id, &mut events, url, script, args, &self.options)
                    .await;
            conn.unsubscribe(&session_id);
            result
        }
        .await;

        guard.close().await;
        outcome
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.connection = None;
        if let Some(mut child) = self.child.take() {
            terminate(&mut child).await;
            debug!("browser terminated");
        }
        Ok(())
    }
}

/// Enables the required domains, navigates, waits for settle, evaluates.
async fn drive_page(
    conn: &CdpConnection,
    session_id: &str,
    events: &mut UnboundedReceiver<CdpEvent>,
    url: &str,
    script: &str,
    args: &[Value],
    options: &BackendOptions,
) -> Result<Value, BackendError> {
    for method in ["Page.enable", "Runtime.enable", "Network.enable"] {
        conn.call(method, None, Some(session_id)).await?;
    }

    let nav = conn
        .call(
            "Page.navigate",
            Some(json!({"url": url})),
            Some(session_id),
        )
        .await?;
    if let Some(error_text) = nav.get("errorText").and_then(Value::as_str)
        && !error_text.is_empty()
    {
        return Err(BackendError::navigation(url, error_text));
    }

    wait_for_settle(events, options.navigation_timeout, options.quiescence_window)
        .await
        .map_err(|reason| BackendError::navigation(url, reason))?;

    let expression = build_call_expression(script, args);
    let eval = conn
        .call(
            "Runtime.evaluate",
            Some(json!({
                "expression": expression,
                "awaitPromise": true,
                "returnByValue": true,
            })),
            Some(session_id),
        )
        .await?;

    if let Some(exception) = eval.get("exceptionDetails") {
        let text = exception
            .pointer("/exception/description")
            .and_then(Value::as_str)
            .or_else(|| exception.get("text").and_then(Value::as_str))
            .unwrap_or("unknown exception");
        return Err(BackendError::script(text));
    }

    Ok(eval.pointer("/result/value").cloned().unwrap_or(Value::Null))
}

/// Waits until the load event has fired and no network activity has been
/// seen for the quiescence window. The overall deadline bounds the wait: a
/// loaded page whose network never goes idle is accepted once the deadline
/// passes; a page that never fires its load event is a navigation failure.
async fn wait_for_settle(
    events: &mut UnboundedReceiver<CdpEvent>,
    navigation_timeout: Duration,
    quiescence_window: Duration,
) -> Result<(), String> {
    let deadline = Instant::now() + navigation_timeout;
    let mut loaded = false;
    let mut last_activity = Instant::now();

    loop {
        if loaded && last_activity.elapsed() >= quiescence_window {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return if loaded {
                Ok(())
            } else {
                Err(format!("load event not seen within {navigation_timeout:?}"))
            };
        }

        let wait = if loaded {
            quiescence_window
                .saturating_sub(last_activity.elapsed())
                .min(deadline - now)
        } else {
            deadline - now
        };

        match tokio::time::timeout(wait, events.recv()).await {
            Ok(Some(event)) => match event.method.as_str() {
                "Page.loadEventFired" => {
                    loaded = true;
                    last_activity = Instant::now();
                }
                "Network.requestWillBeSent"
                | "Network.loadingFinished"
                | "Network.loadingFailed" => {
                    last_activity = Instant::now();
                }
                _ => {}
            },
            Ok(None) => return Err("event channel closed".to_string()),
            Err(_) => {}
        }
    }
}

/// Closes the DevTools target on every exit path.
///
/// The explicit async [`close`](Self::close) is the preferred path; `Drop`
/// covers errors and cancellation by spawning the close command onto the
/// runtime captured at construction.
struct TargetGuard {
    conn: CdpConnection,
    target_id: Option<String>,
    runtime: tokio::runtime::Handle,
}

impl TargetGuard {
    fn new(conn: CdpConnection, target_id: String) -> Self {
        Self {
            conn,
            target_id: Some(target_id),
            runtime: tokio::runtime::Handle::current(),
        }
    }

    async fn close(mut self) {
        if let Some(target_id) = self.target_id.take() {
            if let Err(e) = self
                .conn
                .call(
                    "Target.closeTarget",
                    Some(json!({"targetId": target_id})),
                    None,
                )
                .await
            {
                warn!(error = %e, "failed to close DevTools target");
            }
        }
    }
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        if let Some(target_id) = self.target_id.take() {
            let conn = self.conn.clone();
            self.runtime.spawn(async move {
                let _ = conn
                    .call(
                        "Target.closeTarget",
                        Some(json!({"targetId": target_id})),
                        None,
                    )
                    .await;
            });
        }
    }
}

fn spawn_executable(executable: &str, args: &[String]) -> Result<Child, BackendError> {
    Command::new(executable)
        .args(args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BackendError::launch(format!("{executable}: {e}")))
}

/// Interrupts the browser process and waits briefly for it to exit.
async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        #[allow(clippy::cast_possible_wrap)]
        let pid = nix::unistd::Pid::from_raw(pid as i32);
        let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGINT);
    }
    if tokio::time::timeout(Duration::from_secs(5), child.wait())
        .await
        .is_err()
    {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn event(method: &str) -> CdpEvent {
        CdpEvent {
            method: method.to_string(),
            params: Value::Null,
        }
    }

    #[test]
    fn test_version_info_deserializes() {
        let version: VersionInfo = serde_json::from_str(
            r#"{"Browser":"Chrome/126.0.0.0","webSocketDebuggerUrl":"ws://127.0.0.1:9222/devtools/browser/abc"}"#,
        )
        .unwrap();
        assert_eq!(version.browser, "Chrome/126.0.0.0");
        assert!(version.web_socket_debugger_url.starts_with("ws://"));
    }

    #[test]
    fn test_launch_args_include_proxy_and_port() {
        let backend = CdpBackend::new(BackendOptions {
            debug_port: 9400,
            ..BackendOptions::default()
        });
        let args = backend.launch_args(Some("socks5://localhost:1234"));
        assert!(args.contains(&"--remote-debugging-port=9400".to_string()));
        assert!(args.contains(&"--proxy-server=socks5://localhost:1234".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
    }

    #[test]
    fn test_launch_args_omit_proxy_when_absent() {
        let backend = CdpBackend::new(BackendOptions::default());
        let args = backend.launch_args(None);
        assert!(!args.iter().any(|a| a.starts_with("--proxy-server")));
    }

    #[tokio::test]
    async fn test_goto_before_init_fails() {
        let backend = CdpBackend::new(BackendOptions::default());
        let result = backend
            .goto_and_evaluate("https://pub.example", "() => 1", &[])
            .await;
        assert!(matches!(result, Err(BackendError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_close_without_init_is_noop() {
        let mut backend = CdpBackend::new(BackendOptions::default());
        backend.close().await.unwrap();
        backend.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_settle_load_then_idle() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(event("Page.loadEventFired")).unwrap();
        let result = wait_for_settle(
            &mut rx,
            Duration::from_secs(5),
            Duration::from_millis(20),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_settle_times_out_without_load() {
        let (_tx, mut rx) = mpsc::unbounded_channel::<CdpEvent>();
        let result = wait_for_settle(
            &mut rx,
            Duration::from_millis(50),
            Duration::from_millis(10),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_wait_for_settle_network_activity_extends_wait() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(event("Page.loadEventFired")).unwrap();
        tx.send(event("Network.requestWillBeSent")).unwrap();
        tx.send(event("Network.loadingFinished")).unwrap();
        let started = Instant::now();
        let result = wait_for_settle(
            &mut rx,
            Duration::from_secs(5),
            Duration::from_millis(50),
        )
        .await;
        assert!(result.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_wait_for_settle_accepts_busy_page_at_deadline() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(event("Page.loadEventFired")).unwrap();
        let feeder = tokio::spawn(async move {
            loop {
                if tx.send(event("Network.requestWillBeSent")).is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });
        let result = wait_for_settle(
            &mut rx,
            Duration::from_millis(150),
            Duration::from_millis(100),
        )
        .await;
        feeder.abort();
        assert!(result.is_ok(), "loaded page is accepted once the deadline passes");
    }
}
