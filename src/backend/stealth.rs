//! Stealth-capable adapter built on `chromiumoxide`.
//!
//! Runs a real Chrome with automation-detection masking: the
//! `AutomationControlled` blink feature is disabled, a realistic user agent
//! is applied, and every page gets an init script that hides
//! `navigator.webdriver` before any site script runs. Useful for landing
//! pages that refuse the plain DevTools driver.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::BackendError;
use super::{AutomationBackend, BackendOptions, build_call_expression};

/// Applied before navigation when no override is configured.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Evaluated on every new document before site scripts run.
const MASK_AUTOMATION_SCRIPT: &str = r"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
window.chrome = window.chrome || { runtime: {} };
";

/// Stealth-capable browser adapter.
pub struct StealthBackend {
    options: BackendOptions,
    browser: Option<Browser>,
    handler_task: Option<JoinHandle<()>>,
}

impl StealthBackend {
    /// Creates an unlaunched adapter.
    #[must_use]
    pub fn new(options: BackendOptions) -> Self {
        Self {
            options,
            browser: None,
            handler_task: None,
        }
    }

    fn build_config(&self, proxy: Option<&str>) -> Result<BrowserConfig, BackendError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-blink-features=AutomationControlled");
        if !self.options.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &self.options.executable {
            builder = builder.chrome_executable(executable);
        }
        if let Some(proxy) = proxy {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }
        builder.build().map_err(BackendError::launch)
    }

    async fn new_masked_page(&self) -> Result<PageGuard, BackendError> {
        let browser = self.browser.as_ref().ok_or(BackendError::NotInitialized)?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BackendError::script(format!("failed to open page: {e}")))?;

        let init_script = AddScriptToEvaluateOnNewDocumentParams::builder()
            .source(MASK_AUTOMATION_SCRIPT)
            .build()
            .map_err(BackendError::script)?;
        page.execute(init_script)
            .await
            .map_err(|e| BackendError::script(format!("failed to install init script: {e}")))?;

        let user_agent = self
            .options
            .user_agent
            .as_deref()
            .unwrap_or(DEFAULT_USER_AGENT);
        page.set_user_agent(user_agent)
            .await
            .map_err(|e| BackendError::script(format!("failed to set user agent: {e}")))?;

        Ok(PageGuard::new(page))
    }
}

#[async_trait]
impl AutomationBackend for StealthBackend {
    async fn init(&mut self, proxy: Option<&str>) -> Result<(), BackendError> {
        let config = self.build_config(proxy)?;

        let (browser, mut handler) =
            tokio::time::timeout(self.options.launch_timeout, Browser::launch(config))
                .await
                .map_err(|_| {
                    BackendError::launch(format!(
                        "launch timed out after {:?}",
                        self.options.launch_timeout
                    ))
                })?
                .map_err(|e| BackendError::launch(e.to_string()))?;

        self.handler_task = Some(tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        }));
        self.browser = Some(browser);
        info!(proxy = ?proxy, "stealth browser launched");
        Ok(())
    }

    async fn goto_and_evaluate(
        &self,
        url: &str,
        script: &str,
        args: &[Value],
    ) -> Result<Value, BackendError> {
        let guard = self.new_masked_page().await?;

        let outcome = async {
            tokio::time::timeout(self.options.navigation_timeout, async {
                guard
                    .page()
                    .goto(url)
                    .await
                    .map_err(|e| BackendError::navigation(url, e.to_string()))?;
                guard
                    .page()
                    .wait_for_navigation()
                    .await
                    .map_err(|e| BackendError::navigation(url, e.to_string()))?;
                Ok::<(), BackendError>(())
            })
            .await
            .map_err(|_| {
                BackendError::navigation(
                    url,
                    format!("timed out after {:?}", self.options.navigation_timeout),
                )
            })??;

            // The engine resolves on the load event; give late asset and
            // XHR traffic the same quiescence window the DevTools adapter
            // applies.
            tokio::time::sleep(self.options.quiescence_window).await;

            let params = EvaluateParams::builder()
                .expression(build_call_expression(script, args))
                .await_promise(true)
                .return_by_value(true)
                .build()
                .map_err(BackendError::script)?;
            let evaluation = guard
                .page()
                .evaluate(params)
                .await
                .map_err(|e| BackendError::script(e.to_string()))?;

            Ok(evaluation.value().cloned().unwrap_or(Value::Null))
        }
        .await;

        guard.close().await;
        outcome
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                warn!(error = %e, "browser close reported an error");
            }
            let _ = browser.wait().await;
            debug!("stealth browser terminated");
        }
        if let Some(task) = self.handler_task.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                debug!("handler loop did not drain in time");
                abort.abort();
            }
        }
        Ok(())
    }
}

/// Closes the page on every exit path.
///
/// The explicit async [`close`](Self::close) is the preferred path; `Drop`
/// spawns the close onto the runtime captured at construction so error and
/// cancellation paths cannot leak a page.
struct PageGuard {
    page: Option<Page>,
    runtime: tokio::runtime::Handle,
}

impl PageGuard {
    fn new(page: Page) -> Self {
        Self {
            page: Some(page),
            runtime: tokio::runtime::Handle::current(),
        }
    }

    fn page(&self) -> &Page {
        // Only `close()` and `Drop` take the page out, and both consume the
        // guard.
        self.page.as_ref().unwrap_or_else(|| unreachable!())
    }

    async fn close(mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                warn!(error = %e, "failed to close page");
            }
        }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            self.runtime.spawn(async move {
                let _ = page.close().await;
            });
        }
    }
}
