use crate::{
    render::{RenderSession, SessionLauncher},
    types::ShotError,
};

lazy_static! {
    /// Launch flags that strip Chrome down to what a screenshot needs.
    pub static ref MINIMAL_ARGS: Vec<String> = [
        "--autoplay-policy=user-gesture-required",
        "--disable-background-networking",
        "--disable-background-timer-throttling",
        "--disable-backgrounding-occluded-windows",
        "--disable-blink-features=AutomationControlled",
        "--disable-breakpad",
        "--disable-client-side-phishing-detection",
        "--disable-component-update",
        "--disable-default-apps",
        "--disable-dev-shm-usage",
        "--disable-domain-reliability",
        "--disable-extensions",
        "--disable-features=AudioServiceOutOfProcess",
        "--disable-hang-monitor",
        "--disable-ipc-flooding-protection",
        "--disable-notifications",
        "--disable-offer-store-unmasked-wallet-cards",
        "--disable-popup-blocking",
        "--disable-print-preview",
        "--disable-prompt-on-repost",
        "--disable-renderer-backgrounding",
        "--disable-setuid-sandbox",
        "--disable-speech-api",
        "--disable-sync",
        "--hide-scrollbars",
        "--ignore-gpu-blacklist",
        "--metrics-recording-only",
        "--mute-audio",
        "--no-default-browser-check",
        "--no-first-run",
        "--no-pings",
        "--no-sandbox",
        "--no-zygote",
        "--password-store=basic",
        "--use-gl=swiftshader",
        "--use-mock-keychain",
    ]
    .iter()
    .map(|a| a.to_string())
    .collect();
}

/// Owns the rendering session of one batch. The session is launched on first
/// use and released by `shutdown` or on drop.
pub struct SessionManager<L: SessionLauncher> {
    launcher: L,
    args: Vec<String>,
    session: Option<L::Session>,
}

impl<L: SessionLauncher> SessionManager<L> {
    pub fn new(launcher: L, args: Vec<String>) -> Self {
        SessionManager {
            launcher,
            args,
            session: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.session.is_some()
    }

    pub fn ensure_started(&mut self) -> anyhow::Result<&L::Session> {
        if self.session.is_none() {
            debug!("launching render session with {} args", self.args.len());
            let session = self
                .launcher
                .launch(&self.args)
                .map_err(|e| ShotError::SessionLaunch(format!("{:#}", e)))?;
            info!("render session started");
            self.session = Some(session);
        }
        match self.session.as_ref() {
            Some(s) => Ok(s),
            None => Err(ShotError::SessionLaunch("session vanished after launch".into()).into()),
        }
    }

    pub fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            match session.close() {
                Ok(()) => info!("render session closed"),
                Err(e) => warn!("render session did not close cleanly: {}", e),
            }
        }
    }
}

impl<L: SessionLauncher> Drop for SessionManager<L> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
