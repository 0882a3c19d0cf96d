//! Playwright browser automation
//!
//! Rust generates a small Node script, spawns it, and drives one browser
//! page through it by exchanging JSON lines:
//!
//! ```text
//! -> {"id": 7, "op": "click", "args": {"selector": "...", "timeout": 5000}}
//! <- {"id": 7, "ok": true, "value": null}
//! <- {"id": 8, "ok": false, "kind": "timeout", "error": "..."}
//! ```
//!
//! Every command carries a timeout that is enforced on both sides.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command as TokioCommand};
use tokio::sync::oneshot;
use tracing::{debug, info, trace};

use crate::driver::{
    BrowserDriver, CapturedExchange, DriverFactory, ListenerId, ObservedRequest, ResponseMatcher,
    UrlPredicate, WaitState,
};
use crate::error::{HarnessError, HarnessResult};

/// Bound for commands that have no timeout of their own (count, visibility)
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Extra time granted to the bridge beyond the Playwright-side timeout
const BRIDGE_GRACE: Duration = Duration::from_secs(2);

const LAUNCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl FromStr for Browser {
    type Err = HarnessError;

    fn from_str(s: &str) -> HarnessResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" | "safari" => Ok(Browser::Webkit),
            other => Err(HarnessError::Config(format!("unknown browser: {other}"))),
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
        }
    }
}

/// Check if Playwright is installed
pub fn check_playwright_installed() -> HarnessResult<()> {
    let output = Command::new("npx")
        .args(["playwright", "--version"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match output {
        Ok(status) if status.success() => Ok(()),
        _ => Err(HarnessError::PlaywrightNotFound),
    }
}

/// The bridge script for `config`
pub fn build_bridge_script(config: &PlaywrightConfig) -> String {
    let settings = json!({
        "browser": config.browser.as_str(),
        "headless": config.headless,
        "viewport": { "width": config.viewport_width, "height": config.viewport_height },
    });
    format!("const SETTINGS = {settings};\n{BRIDGE_JS}")
}

const BRIDGE_JS: &str = r#"
const playwright = require('playwright');
const readline = require('readline');

const send = (msg) => process.stdout.write(JSON.stringify(msg) + '\n');

(async () => {
  const browser = await playwright[SETTINGS.browser].launch({ headless: SETTINGS.headless });
  const context = await browser.newContext({ viewport: SETTINGS.viewport });
  const page = await context.newPage();

  let requests = [];
  const listeners = new Map();

  page.on('request', (req) => {
    requests.push({ method: req.method(), url: req.url(), status: null, _req: req });
  });
  page.on('response', (res) => {
    const entry = requests.find((r) => r._req === res.request());
    if (entry) entry.status = res.status();
  });
  page.on('framenavigated', (frame) => {
    if (frame === page.mainFrame()) requests = [];
  });

  const readBody = async (res) => {
    try { return await res.json(); } catch (_) {}
    try { return await res.text(); } catch (_) { return null; }
  };
  const first = (selector) => page.locator(selector).first();
  const present = async (selector) => (await page.locator(selector).count()) > 0;

  const ops = {
    goto: async (a) => { await page.goto(a.url, { timeout: a.timeout, waitUntil: 'domcontentloaded' }); },
    reload: async (a) => { await page.reload({ timeout: a.timeout, waitUntil: 'domcontentloaded' }); },
    wait_for_load: async (a) => { await page.waitForLoadState('networkidle', { timeout: a.timeout }); },
    wait_for_url: async (a) => {
      const test = a.kind === 'contains'
        ? (u) => u.toString().includes(a.value)
        : (u) => !u.toString().includes(a.value);
      await page.waitForURL(test, { timeout: a.timeout });
    },
    current_url: async () => page.url(),
    title: async () => page.title(),
    fill: async (a) => { await first(a.selector).fill(a.value, { timeout: a.timeout }); },
    click: async (a) => { await first(a.selector).click({ timeout: a.timeout }); },
    count: async (a) => page.locator(a.selector).count(),
    is_visible: async (a) => first(a.selector).isVisible(),
    is_enabled: async (a) => (await present(a.selector)) && first(a.selector).isEnabled(),
    text_content: async (a) => ((await present(a.selector)) ? first(a.selector).textContent() : null),
    input_value: async (a) => first(a.selector).inputValue({ timeout: a.timeout }),
    get_attribute: async (a) =>
      ((await present(a.selector)) ? first(a.selector).getAttribute(a.name) : null),
    wait_for_selector: async (a) => { await first(a.selector).waitFor({ state: a.state, timeout: a.timeout }); },
    arm_response: async (a) => {
      const matches = (res) => {
        const req = res.request();
        const methodOk = !a.method || req.method().toUpperCase() === a.method;
        const urlOk = a.fragments.length === 0 || a.fragments.some((f) => res.url().includes(f));
        return methodOk && urlOk;
      };
      const capture = async (res) => {
        const req = res.request();
        let body = null;
        try { body = req.postDataJSON(); } catch (_) { body = req.postData(); }
        return {
          request_url: req.url(),
          request_method: req.method(),
          request_body: body,
          response_status: res.status(),
          response_body: await readBody(res),
        };
      };
      let handler;
      const pending = new Promise((resolve) => {
        handler = (res) => {
          if (!matches(res)) return;
          page.off('response', handler);
          resolve(capture(res));
        };
        page.on('response', handler);
      });
      pending.catch(() => {});
      listeners.set(a.listener, { pending, handler });
    },
    await_response: async (a) => {
      const entry = listeners.get(a.listener);
      if (!entry) throw new Error(`unknown listener ${a.listener}`);
      let timer;
      const expired = new Promise((_, reject) => {
        timer = setTimeout(() => {
          const err = new Error(`no matching response within ${a.timeout} ms`);
          err.name = 'TimeoutError';
          reject(err);
        }, a.timeout);
      });
      try {
        return await Promise.race([entry.pending, expired]);
      } finally {
        clearTimeout(timer);
        page.off('response', entry.handler);
        listeners.delete(a.listener);
      }
    },
    disarm: async (a) => {
      const entry = listeners.get(a.listener);
      if (entry) page.off('response', entry.handler);
      listeners.delete(a.listener);
    },
    observed_requests: async () => requests.map(({ method, url, status }) => ({ method, url, status })),
    screenshot: async (a) => { await page.screenshot({ path: a.path, fullPage: a.full_page }); },
    clear_cookies: async () => { await context.clearCookies(); },
    clear_storage: async () => {
      await page.evaluate(() => { try { localStorage.clear(); sessionStorage.clear(); } catch (_) {} });
    },
    close: async () => { await browser.close(); process.exit(0); },
  };

  send({ id: 0, ok: true, value: 'ready' });

  const rl = readline.createInterface({ input: process.stdin });
  rl.on('line', async (line) => {
    let msg;
    try { msg = JSON.parse(line); } catch (e) { return; }
    const op = ops[msg.op];
    if (!op) { send({ id: msg.id, ok: false, kind: 'protocol', error: `unknown op ${msg.op}` }); return; }
    try {
      const value = await op(msg.args || {});
      send({ id: msg.id, ok: true, value: value === undefined ? null : value });
    } catch (e) {
      const kind = e && e.name === 'TimeoutError' ? 'timeout' : 'error';
      send({ id: msg.id, ok: false, kind, error: String(e && e.message ? e.message : e) });
    }
  });
  rl.on('close', async () => { await browser.close(); process.exit(0); });
})().catch((e) => {
  send({ id: 0, ok: false, kind: 'launch', error: String(e && e.message ? e.message : e) });
  process.exit(1);
});
"#;

#[derive(Debug, Deserialize)]
struct Reply {
    id: u64,
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// One browser page behind a Node bridge process
pub struct PlaywrightDriver {
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: Pending,
    next_id: AtomicU64,
    child: Mutex<Child>,
    _script_dir: tempfile::TempDir,
}

impl PlaywrightDriver {
    pub async fn launch(config: &PlaywrightConfig) -> HarnessResult<Self> {
        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("bridge.js");
        std::fs::write(&script_path, build_bridge_script(config))?;

        // Resolve `playwright` from the project, not from the temp dir
        let cwd = std::env::current_dir()?;
        let mut child = TokioCommand::new("node")
            .arg(&script_path)
            .current_dir(&cwd)
            .env("NODE_PATH", cwd.join("node_modules"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HarnessError::Bridge(format!("failed to spawn node: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HarnessError::Bridge("bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarnessError::Bridge("bridge stdout unavailable".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[bridge] {}", line);
                }
            });
        }

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (ready_tx, ready_rx) = oneshot::channel();
        pending.lock().insert(0, ready_tx);

        let reader_pending = pending.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<Reply>(&line) {
                    Ok(reply) => {
                        if let Some(tx) = reader_pending.lock().remove(&reply.id) {
                            let _ = tx.send(reply);
                        }
                    }
                    Err(_) => trace!("[bridge stdout] {}", line),
                }
            }
            // Dropping the senders fails every outstanding command
            reader_pending.lock().clear();
        });

        let ready = tokio::time::timeout(LAUNCH_TIMEOUT, ready_rx)
            .await
            .map_err(|_| HarnessError::Bridge("browser did not launch in time".to_string()))?
            .map_err(|_| HarnessError::Bridge("bridge exited during launch".to_string()))?;
        if !ready.ok {
            return Err(HarnessError::Bridge(format!(
                "browser launch failed: {}",
                ready.error.unwrap_or_default()
            )));
        }

        info!("Launched {} (headless: {})", config.browser.as_str(), config.headless);
        Ok(Self {
            stdin: tokio::sync::Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            child: Mutex::new(child),
            _script_dir: script_dir,
        })
    }

    async fn call(&self, op: &str, args: Value, timeout: Duration) -> HarnessResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let line = json!({ "id": id, "op": op, "args": args }).to_string();
        trace!("-> {}", line);
        {
            let mut stdin = self.stdin.lock().await;
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await?;
        }

        let what = describe(op, &args);
        let reply = match tokio::time::timeout(timeout + BRIDGE_GRACE, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(HarnessError::Bridge(format!("bridge exited during {what}"))),
            Err(_) => {
                self.pending.lock().remove(&id);
                return Err(HarnessError::Timeout {
                    what,
                    timeout_ms: timeout.as_millis() as u64,
                    context: "bridge did not answer".to_string(),
                });
            }
        };

        if reply.ok {
            return Ok(reply.value);
        }
        let message = reply.error.unwrap_or_default();
        match reply.kind.as_deref() {
            Some("timeout") => Err(HarnessError::Timeout {
                what,
                timeout_ms: timeout.as_millis() as u64,
                context: message,
            }),
            _ => Err(HarnessError::Bridge(format!("{what}: {message}"))),
        }
    }

    /// Ask the bridge to close the browser, then reap the process
    pub async fn close(&self) -> HarnessResult<()> {
        let _ = self.call("close", json!({}), COMMAND_TIMEOUT).await;
        self.stop();
        Ok(())
    }

    fn stop(&self) {
        let mut child = self.child.lock();
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }
        let _ = child.start_kill();
    }
}

impl Drop for PlaywrightDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn describe(op: &str, args: &Value) -> String {
    match args.get("selector").and_then(Value::as_str) {
        Some(selector) => format!("{op} {selector}"),
        None => match args.get("url").and_then(Value::as_str) {
            Some(url) => format!("{op} {url}"),
            None => op.to_string(),
        },
    }
}

fn ms(timeout: Duration) -> u64 {
    timeout.as_millis() as u64
}

#[async_trait]
impl BrowserDriver for PlaywrightDriver {
    async fn goto(&self, url: &str, timeout: Duration) -> HarnessResult<()> {
        self.call("goto", json!({ "url": url, "timeout": ms(timeout) }), timeout)
            .await?;
        Ok(())
    }

    async fn reload(&self, timeout: Duration) -> HarnessResult<()> {
        self.call("reload", json!({ "timeout": ms(timeout) }), timeout)
            .await?;
        Ok(())
    }

    async fn wait_for_load(&self, timeout: Duration) -> HarnessResult<()> {
        self.call("wait_for_load", json!({ "timeout": ms(timeout) }), timeout)
            .await?;
        Ok(())
    }

    async fn wait_for_url(&self, predicate: &UrlPredicate, timeout: Duration) -> HarnessResult<()> {
        let (kind, value) = match predicate {
            UrlPredicate::Contains(v) => ("contains", v),
            UrlPredicate::Excludes(v) => ("excludes", v),
        };
        self.call(
            "wait_for_url",
            json!({ "kind": kind, "value": value, "timeout": ms(timeout) }),
            timeout,
        )
        .await?;
        Ok(())
    }

    async fn current_url(&self) -> HarnessResult<String> {
        let value = self.call("current_url", json!({}), COMMAND_TIMEOUT).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn title(&self) -> HarnessResult<String> {
        let value = self.call("title", json!({}), COMMAND_TIMEOUT).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> HarnessResult<()> {
        self.call(
            "fill",
            json!({ "selector": selector, "value": value, "timeout": ms(timeout) }),
            timeout,
        )
        .await?;
        Ok(())
    }

    async fn click(&self, selector: &str, timeout: Duration) -> HarnessResult<()> {
        self.call(
            "click",
            json!({ "selector": selector, "timeout": ms(timeout) }),
            timeout,
        )
        .await?;
        Ok(())
    }

    async fn count(&self, selector: &str) -> HarnessResult<usize> {
        let value = self
            .call("count", json!({ "selector": selector }), COMMAND_TIMEOUT)
            .await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn is_visible(&self, selector: &str) -> HarnessResult<bool> {
        let value = self
            .call("is_visible", json!({ "selector": selector }), COMMAND_TIMEOUT)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn is_enabled(&self, selector: &str) -> HarnessResult<bool> {
        let value = self
            .call("is_enabled", json!({ "selector": selector }), COMMAND_TIMEOUT)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn text_content(&self, selector: &str) -> HarnessResult<Option<String>> {
        let value = self
            .call("text_content", json!({ "selector": selector }), COMMAND_TIMEOUT)
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn input_value(&self, selector: &str, timeout: Duration) -> HarnessResult<String> {
        let value = self
            .call(
                "input_value",
                json!({ "selector": selector, "timeout": ms(timeout) }),
                timeout,
            )
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn get_attribute(&self, selector: &str, name: &str) -> HarnessResult<Option<String>> {
        let value = self
            .call(
                "get_attribute",
                json!({ "selector": selector, "name": name }),
                COMMAND_TIMEOUT,
            )
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> HarnessResult<()> {
        self.call(
            "wait_for_selector",
            json!({ "selector": selector, "state": state.as_str(), "timeout": ms(timeout) }),
            timeout,
        )
        .await?;
        Ok(())
    }

    async fn arm_response(&self, matcher: &ResponseMatcher) -> HarnessResult<ListenerId> {
        let listener = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.call(
            "arm_response",
            json!({
                "listener": listener.0,
                "method": matcher.method,
                "fragments": matcher.url_contains_any,
            }),
            COMMAND_TIMEOUT,
        )
        .await?;
        Ok(listener)
    }

    async fn await_response(
        &self,
        listener: ListenerId,
        timeout: Duration,
    ) -> HarnessResult<CapturedExchange> {
        let value = self
            .call(
                "await_response",
                json!({ "listener": listener.0, "timeout": ms(timeout) }),
                timeout,
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn disarm(&self, listener: ListenerId) -> HarnessResult<()> {
        self.call("disarm", json!({ "listener": listener.0 }), COMMAND_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn observed_requests(&self) -> HarnessResult<Vec<ObservedRequest>> {
        let value = self
            .call("observed_requests", json!({}), COMMAND_TIMEOUT)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn screenshot(&self, path: &Path, full_page: bool) -> HarnessResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.call(
            "screenshot",
            json!({ "path": path.to_string_lossy(), "full_page": full_page }),
            COMMAND_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    async fn clear_cookies(&self) -> HarnessResult<()> {
        self.call("clear_cookies", json!({}), COMMAND_TIMEOUT).await?;
        Ok(())
    }

    async fn clear_storage(&self) -> HarnessResult<()> {
        self.call("clear_storage", json!({}), COMMAND_TIMEOUT).await?;
        Ok(())
    }
    async fn close(&self) -> HarnessResult<()> {
        PlaywrightDriver::close(self).await
    }
}

/// One browser process per driver, so tests never share cookies
pub struct PlaywrightDriverFactory {
    config: PlaywrightConfig,
}

impl PlaywrightDriverFactory {
    pub fn new(config: PlaywrightConfig) -> HarnessResult<Self> {
        check_playwright_installed()?;
        Ok(Self { config })
    }
}

#[async_trait]
impl DriverFactory for PlaywrightDriverFactory {
    async fn create(&self) -> HarnessResult<Box<dyn BrowserDriver>> {
        let driver = PlaywrightDriver::launch(&self.config).await?;
        Ok(Box::new(driver))
    }
}
