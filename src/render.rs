//! Capabilities the capture engine needs from a rendering backend.
//!
//! The engine only talks to these traits; `browser_controller` implements them
//! on top of headless Chrome and the tests implement them in memory.

use std::{sync::Arc, time::Duration};

use crate::{content_filter::RequestFilter, devices::DeviceProfile, types::ImageFormat};

pub trait ScriptEvaluator {
    /// Evaluates `script` in the page and returns its JSON value
    /// (`Value::Null` when the script yields nothing serialisable).
    fn evaluate(&self, script: &str) -> anyhow::Result<serde_json::Value>;
}

pub trait RenderPage: ScriptEvaluator {
    fn set_request_filter(&self, filter: Arc<dyn RequestFilter>) -> anyhow::Result<()>;

    /// Navigates and waits for the document plus a quiet network window.
    /// Returns the status of the main document response, `None` if no
    /// response was observed.
    fn navigate(&self, url: &str) -> anyhow::Result<Option<u16>>;

    fn emulate(&self, device: &DeviceProfile) -> anyhow::Result<()>;

    fn pause(&self, duration: Duration);

    fn snapshot(&self, format: ImageFormat) -> anyhow::Result<Vec<u8>>;

    fn close(&self) -> anyhow::Result<()>;
}

pub trait RenderSession {
    type Page: RenderPage;

    fn open_page(&self) -> anyhow::Result<Self::Page>;

    fn close(&mut self) -> anyhow::Result<()>;
}

pub trait SessionLauncher {
    type Session: RenderSession;

    fn launch(&self, args: &[String]) -> anyhow::Result<Self::Session>;
}

/// Closes the wrapped page when dropped.
pub struct PageGuard<P: RenderPage> {
    page: P,
}

impl<P: RenderPage> PageGuard<P> {
    pub fn new(page: P) -> Self {
        PageGuard { page }
    }

    pub fn page(&self) -> &P {
        &self.page
    }
}

impl<P: RenderPage> Drop for PageGuard<P> {
    fn drop(&mut self) {
        if let Err(e) = self.page.close() {
            warn!("could not close page: {}", e);
        }
    }
}
