#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    rc::Rc,
    sync::Arc,
    time::Duration,
};

use anyhow::anyhow;
use shotter::{
    content_filter::RequestFilter,
    devices::{DeviceKind, DeviceProfile},
    render::{RenderPage, RenderSession, ScriptEvaluator, SessionLauncher},
    runner::{Runner, RunnerOptions},
    types::ImageFormat,
};

pub const FAKE_LIST: &str = "test://fake-list";

/// How the fake browser should misbehave, keyed by url.
#[derive(Default)]
pub struct Behaviour {
    pub fail_launch: bool,
    pub fail_navigation: HashSet<String>,
    pub no_response: HashSet<String>,
    pub statuses: HashMap<String, u16>,
    pub fail_snapshot: HashMap<String, DeviceKind>,
}

#[derive(Default)]
pub struct Events {
    pub launches: usize,
    pub session_closes: usize,
    pub pages_opened: usize,
    pub pages_closed: usize,
    pub navigations: Vec<String>,
    pub emulations: Vec<DeviceKind>,
    pub pauses: Vec<Duration>,
    pub snapshots: Vec<ImageFormat>,
    pub filter: Option<Arc<dyn RequestFilter>>,
}

#[derive(Default)]
struct State {
    behaviour: RefCell<Behaviour>,
    events: RefCell<Events>,
}

#[derive(Clone, Default)]
pub struct FakeBrowser {
    state: Rc<State>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        FakeBrowser::default()
    }

    pub fn behaviour(&self) -> std::cell::RefMut<'_, Behaviour> {
        self.state.behaviour.borrow_mut()
    }

    pub fn events(&self) -> std::cell::Ref<'_, Events> {
        self.state.events.borrow()
    }

    pub fn launcher(&self) -> FakeLauncher {
        FakeLauncher {
            state: self.state.clone(),
        }
    }
}

pub struct FakeLauncher {
    state: Rc<State>,
}

impl SessionLauncher for FakeLauncher {
    type Session = FakeSession;

    fn launch(&self, _args: &[String]) -> anyhow::Result<FakeSession> {
        self.state.events.borrow_mut().launches += 1;
        if self.state.behaviour.borrow().fail_launch {
            return Err(anyhow!("chrome exited during startup"));
        }
        Ok(FakeSession {
            state: self.state.clone(),
        })
    }
}

pub struct FakeSession {
    state: Rc<State>,
}

impl RenderSession for FakeSession {
    type Page = FakePage;

    fn open_page(&self) -> anyhow::Result<FakePage> {
        self.state.events.borrow_mut().pages_opened += 1;
        Ok(FakePage {
            state: self.state.clone(),
            url: RefCell::new(String::new()),
            device: Cell::new(None),
        })
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.state.events.borrow_mut().session_closes += 1;
        Ok(())
    }
}

pub struct FakePage {
    state: Rc<State>,
    url: RefCell<String>,
    device: Cell<Option<DeviceKind>>,
}

impl ScriptEvaluator for FakePage {
    fn evaluate(&self, _script: &str) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::Value::Bool(false))
    }
}

impl RenderPage for FakePage {
    fn set_request_filter(&self, filter: Arc<dyn RequestFilter>) -> anyhow::Result<()> {
        self.state.events.borrow_mut().filter = Some(filter);
        Ok(())
    }

    fn navigate(&self, url: &str) -> anyhow::Result<Option<u16>> {
        self.state.events.borrow_mut().navigations.push(url.into());
        *self.url.borrow_mut() = url.into();
        let behaviour = self.state.behaviour.borrow();
        if behaviour.fail_navigation.contains(url) {
            return Err(anyhow!("net::ERR_NAME_NOT_RESOLVED at {}", url));
        }
        if behaviour.no_response.contains(url) {
            return Ok(None);
        }
        Ok(Some(*behaviour.statuses.get(url).unwrap_or(&200)))
    }

    fn emulate(&self, device: &DeviceProfile) -> anyhow::Result<()> {
        self.state.events.borrow_mut().emulations.push(device.kind);
        self.device.set(Some(device.kind));
        Ok(())
    }

    fn pause(&self, duration: Duration) {
        self.state.events.borrow_mut().pauses.push(duration);
    }

    fn snapshot(&self, format: ImageFormat) -> anyhow::Result<Vec<u8>> {
        let url = self.url.borrow().clone();
        let device = self
            .device
            .get()
            .ok_or_else(|| anyhow!("snapshot before emulation"))?;
        if self.state.behaviour.borrow().fail_snapshot.get(&url) == Some(&device) {
            return Err(anyhow!("target crashed"));
        }
        self.state.events.borrow_mut().snapshots.push(format);
        Ok(format!("{}|{}|{}", url, device.name(), format).into_bytes())
    }

    fn close(&self) -> anyhow::Result<()> {
        self.state.events.borrow_mut().pages_closed += 1;
        Ok(())
    }
}

pub fn image_bytes(url: &str, device: DeviceKind, format: ImageFormat) -> Vec<u8> {
    format!("{}|{}|{}", url, device.name(), format).into_bytes()
}

pub fn options(dir: &Path) -> RunnerOptions {
    RunnerOptions::default_builder()
        .output_dir(dir.join("screenshots"))
        .archive_path(dir.join("screenshots.zip"))
        .run_log_path(dir.join("run_log.json"))
        .subscription_lists(vec![FAKE_LIST.to_string()])
        .build()
        .unwrap()
}

pub fn runner(dir: &Path, browser: &FakeBrowser) -> Runner<FakeLauncher> {
    Runner::new(
        options(dir),
        browser.launcher(),
        Box::new(|_: &str| -> anyhow::Result<String> {
            Ok("[Adblock Plus 2.0]\n! test list\n||ads.example^\n".into())
        }),
    )
    .unwrap()
}

pub fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(|u| u.to_string()).collect()
}

pub fn shot_path(dir: &Path, device: &str, file: &str) -> PathBuf {
    dir.join("screenshots").join(device).join(file)
}
