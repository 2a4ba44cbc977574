use std::{
    ffi::OsStr,
    path::PathBuf,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context, Result};
use headless_chrome::{
    browser::{
        default_executable,
        tab::RequestPausedDecision,
        transport::{SessionId, Transport},
    },
    protocol::cdp::{
        types::Method,
        Fetch::{events::RequestPausedEvent, FailRequest},
        Network::ErrorReason,
        Page::CaptureScreenshotFormatOption,
    },
    Browser, LaunchOptions, Tab,
};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};

use crate::{
    content_filter::{Decision, RequestFilter},
    devices::DeviceProfile,
    render::{RenderPage, RenderSession, ScriptEvaluator, SessionLauncher},
    types::ImageFormat,
};

const STATUS_SCRIPT: &str = r#"(() => {
    const nav = performance.getEntriesByType('navigation')[0];
    return nav && nav.responseStatus ? nav.responseStatus : 0;
})()"#;

// the timing buffer holds 250 entries by default, raise it so busy pages keep
// reporting new requests
const NETWORK_ACTIVITY_SCRIPT: &str = r#"(() => {
    performance.setResourceTimingBufferSize(100000);
    const entries = performance.getEntriesByType('resource');
    let bytes = 0;
    let lastEnd = 0;
    for (const e of entries) {
        bytes += e.transferSize || 0;
        if (e.responseEnd > lastEnd) lastEnd = e.responseEnd;
    }
    return { count: entries.length, bytes: bytes, lastEnd: Math.round(lastEnd) };
})()"#;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct NetworkActivity {
    count: f64,
    bytes: f64,
    last_end: f64,
}

/// Tracks how long the network activity fingerprint has stayed the same.
struct QuietWindow {
    window: Duration,
    last: Option<NetworkActivity>,
    since: Instant,
}

impl QuietWindow {
    fn new(window: Duration, now: Instant) -> Self {
        QuietWindow {
            window,
            last: None,
            since: now,
        }
    }

    fn observe(&mut self, activity: NetworkActivity, now: Instant) -> bool {
        if self.last.as_ref() != Some(&activity) {
            self.last = Some(activity);
            self.since = now;
            return false;
        }
        now.duration_since(self.since) >= self.window
    }
}

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct ControllerOptions {
    #[builder(default = "true")]
    headless: bool,
    // the sandbox does not work inside our docker images
    #[builder(default = "std::env::var(\"IN_DOCKER\").is_err()")]
    sandbox: bool,
    // explicit chrome binary, falls back to CHROME_PATH then the system default
    #[builder(default = "self.default_chrome_path()")]
    chrome_path: Option<PathBuf>,
    // how long the browser may stay without events before it is considered dead
    #[builder(default = "Duration::from_secs(60)")]
    idle_timeout: Duration,
    // no new or growing resource transfers for this long means the network is quiet
    #[builder(default = "Duration::from_millis(500)")]
    network_quiet: Duration,
    // upper bound for waiting on a quiet network after navigation
    #[builder(default = "Duration::from_secs(30)")]
    network_idle_timeout: Duration,
}

impl ControllerOptions {
    pub fn default_builder() -> ControllerOptionsBuilder {
        ControllerOptionsBuilder::default()
    }
}

impl ControllerOptionsBuilder {
    fn default_chrome_path(&self) -> Option<PathBuf> {
        std::env::var("CHROME_PATH").ok().map(PathBuf::from)
    }
}

/// Launches headless Chrome sessions.
pub struct ChromeLauncher {
    options: ControllerOptions,
}

impl ChromeLauncher {
    pub fn new(options: ControllerOptions) -> Self {
        ChromeLauncher { options }
    }
}

impl SessionLauncher for ChromeLauncher {
    type Session = ChromeSession;

    fn launch(&self, args: &[String]) -> Result<ChromeSession> {
        let path = match &self.options.chrome_path {
            Some(p) => p.clone(),
            None => default_executable().map_err(|e| anyhow!("no chrome binary found: {}", e))?,
        };
        let args = args.iter().map(OsStr::new).collect::<Vec<&OsStr>>();
        let launch_options = LaunchOptions::default_builder()
            .headless(self.options.headless)
            .sandbox(self.options.sandbox)
            .path(Some(path.clone()))
            .idle_browser_timeout(self.options.idle_timeout)
            .args(args)
            .build()
            .map_err(|e| anyhow!("invalid launch options: {}", e))?;
        debug!("launching chrome from {:?}", path);
        let browser = Browser::new(launch_options).context("browser launching error")?;
        let pid = browser.get_process_id();

        Ok(ChromeSession {
            browser: Some(browser),
            pid,
            network_quiet: self.options.network_quiet,
            network_idle_timeout: self.options.network_idle_timeout,
        })
    }
}

pub struct ChromeSession {
    browser: Option<Browser>,
    pid: Option<u32>,
    network_quiet: Duration,
    network_idle_timeout: Duration,
}

impl ChromeSession {
    fn kill(&self) -> bool {
        let pid = match self.pid {
            Some(pid) => Pid::from_u32(pid),
            None => return false,
        };
        let mut s = System::new();
        if !s.refresh_process(pid) {
            return false;
        }
        if let Some(process) = s.process(pid) {
            debug!("killing leftover browser process {}", pid);
            return process.kill();
        }
        false
    }
}

impl RenderSession for ChromeSession {
    type Page = ChromeTab;

    fn open_page(&self) -> Result<ChromeTab> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| anyhow!("browser already closed"))?;
        let tab = browser.new_tab().context("could not create new tab")?;
        Ok(ChromeTab {
            tab,
            network_quiet: self.network_quiet,
            network_idle_timeout: self.network_idle_timeout,
        })
    }

    fn close(&mut self) -> Result<()> {
        // dropping the browser asks chrome to exit
        if self.browser.take().is_some() {
            debug!("closing browser...");
        }
        self.kill();
        Ok(())
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if self.browser.is_some() {
            let _ = self.close();
        }
    }
}

pub struct ChromeTab {
    tab: Arc<Tab>,
    network_quiet: Duration,
    network_idle_timeout: Duration,
}

impl ChromeTab {
    fn wait_for_quiet_network(&self) -> Result<()> {
        let started = Instant::now();
        let mut quiet = QuietWindow::new(self.network_quiet, started);
        while started.elapsed() < self.network_idle_timeout {
            if quiet.observe(self.network_activity()?, Instant::now()) {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(100));
        }
        warn!(
            "network never went quiet on {} after {:?}",
            self.tab.get_url(),
            self.network_idle_timeout
        );
        Ok(())
    }

    fn network_activity(&self) -> Result<NetworkActivity> {
        let value = self.evaluate(NETWORK_ACTIVITY_SCRIPT)?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }
}

impl ScriptEvaluator for ChromeTab {
    fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let obj = self.tab.evaluate(script, true)?;
        Ok(obj.value.unwrap_or(serde_json::Value::Null))
    }
}

// the generated protocol struct changes shape between chrome releases, the
// fields below are the stable subset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetDeviceMetricsOverride {
    width: u32,
    height: u32,
    device_scale_factor: f64,
    mobile: bool,
}

impl Method for SetDeviceMetricsOverride {
    const NAME: &'static str = "Emulation.setDeviceMetricsOverride";
    type ReturnObject = serde_json::Value;
}

impl RenderPage for ChromeTab {
    fn set_request_filter(&self, filter: Arc<dyn RequestFilter>) -> Result<()> {
        self.tab
            .enable_fetch(None, None)
            .context("could not enable request interception")?;
        self.tab.enable_request_interception(Arc::new(
            move |_transport: Arc<Transport>, _session: SessionId, event: RequestPausedEvent| {
                let url = &event.params.request.url;
                match filter.decide(url) {
                    Decision::Allow => RequestPausedDecision::Continue(None),
                    Decision::Deny => {
                        trace!("blocked {}", url);
                        RequestPausedDecision::Fail(FailRequest {
                            request_id: event.params.request_id,
                            error_reason: ErrorReason::BlockedByClient,
                        })
                    }
                }
            },
        ))?;
        Ok(())
    }

    fn navigate(&self, url: &str) -> Result<Option<u16>> {
        self.tab
            .navigate_to(url)
            .context(format!("could not navigate to {}", url))?
            .wait_until_navigated()
            .context(format!("navigation to {} did not finish", url))?;
        self.wait_for_quiet_network()?;

        let status = self.evaluate(STATUS_SCRIPT)?.as_u64().unwrap_or(0);
        if status == 0 || status > u16::MAX as u64 {
            return Ok(None);
        }
        Ok(Some(status as u16))
    }

    fn emulate(&self, device: &DeviceProfile) -> Result<()> {
        self.tab
            .set_user_agent(device.user_agent, None, None)
            .context("could not set user agent")?;
        self.tab
            .call_method(SetDeviceMetricsOverride {
                width: device.viewport.width,
                height: device.viewport.height,
                device_scale_factor: 1.0,
                mobile: device.viewport.is_mobile,
            })
            .context(format!("could not emulate {}", device.kind.name()))?;
        Ok(())
    }

    fn pause(&self, duration: Duration) {
        thread::sleep(duration);
    }

    fn snapshot(&self, format: ImageFormat) -> Result<Vec<u8>> {
        let format = match format {
            ImageFormat::Jpeg => CaptureScreenshotFormatOption::Jpeg,
            ImageFormat::Png => CaptureScreenshotFormatOption::Png,
            ImageFormat::Webp => CaptureScreenshotFormatOption::Webp,
        };
        self.tab
            .capture_screenshot(format, None, None, true)
            .context(format!("screenshot for {} could not be captured", self.tab.get_url()))
    }

    fn close(&self) -> Result<()> {
        self.tab.close(false)?;
        Ok(())
    }
}
