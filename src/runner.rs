use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};

use crate::{
    archive::export_archive,
    consent::{default_rules, ConsentAutomator, MAX_CONSENT_CANDIDATES},
    content_filter::{
        ContentFilterPolicy, DomainDenylist, ListFetcher, RequestFilter, DEFAULT_DENYLIST,
        DEFAULT_SUBSCRIPTION_LIST,
    },
    devices::catalog,
    render::{PageGuard, RenderPage, RenderSession, SessionLauncher},
    run_log::RunLog,
    session::{SessionManager, MINIMAL_ARGS},
    types::{
        is_success_status, BatchRequest, CaptureOutcome, CaptureResult, ImageFormat, ShotError,
        MAX_SETTLE_DELAY_MS,
    },
    utils::{
        file_stem, remove_file_if_exists, reset_output_dir, ARCHIVE_PATH, OUTPUT_DIR,
        RUN_LOG_PATH,
    },
};

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct RunnerOptions {
    // root of the per-device image folders, wiped at the start of every batch
    #[builder(default = "PathBuf::from(OUTPUT_DIR)")]
    output_dir: PathBuf,
    // where the zip export is written, removed at the start of every batch
    #[builder(default = "PathBuf::from(ARCHIVE_PATH)")]
    archive_path: PathBuf,
    #[builder(default = "PathBuf::from(RUN_LOG_PATH)")]
    run_log_path: PathBuf,
    // adblock-plus lists feeding the subscription layer of the content filter
    #[builder(default = "vec![DEFAULT_SUBSCRIPTION_LIST.to_string()]")]
    subscription_lists: Vec<String>,
    #[builder(default = "self.default_denylist()")]
    denylist: Vec<String>,
    #[builder(default = "MAX_CONSENT_CANDIDATES")]
    consent_candidates: usize,
    #[builder(default = "MINIMAL_ARGS.clone()")]
    launch_args: Vec<String>,
}

impl RunnerOptions {
    pub fn default_builder() -> RunnerOptionsBuilder {
        RunnerOptionsBuilder::default()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn run_log_path(&self) -> &Path {
        &self.run_log_path
    }
}

impl RunnerOptionsBuilder {
    fn default_denylist(&self) -> Vec<String> {
        DEFAULT_DENYLIST.iter().map(|d| d.to_string()).collect()
    }
}

/// Captures batches of urls across every device profile.
pub struct Runner<L: SessionLauncher> {
    options: RunnerOptions,
    session: SessionManager<L>,
    filter: ContentFilterPolicy,
    consent: ConsentAutomator,
    run_log: RunLog,
    fetcher: Box<dyn ListFetcher>,
}

impl<L: SessionLauncher> Runner<L> {
    pub fn new(
        options: RunnerOptions,
        launcher: L,
        fetcher: Box<dyn ListFetcher>,
    ) -> anyhow::Result<Self> {
        let run_log = RunLog::open(options.run_log_path.clone()).context(format!(
            "could not open run log at {:?}",
            options.run_log_path
        ))?;
        let filter = ContentFilterPolicy::new(
            options.subscription_lists.clone(),
            DomainDenylist::new(options.denylist.as_slice()),
        );
        let consent = ConsentAutomator::new(default_rules(), options.consent_candidates);
        let session = SessionManager::new(launcher, options.launch_args.clone());

        Ok(Runner {
            options,
            session,
            filter,
            consent,
            run_log,
            fetcher,
        })
    }

    pub fn run_log(&self) -> &RunLog {
        &self.run_log
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    pub fn run(&mut self, request: &BatchRequest) -> anyhow::Result<Vec<CaptureResult>> {
        self.capture_many(
            &request.urls,
            request.reset_errors,
            request.format,
            request.settle_delay,
        )
    }

    /// Captures every non-empty url in order. The result holds one entry per
    /// non-empty url whatever happened to it; only a session launch failure
    /// or a run log / output directory error aborts the batch.
    pub fn capture_many(
        &mut self,
        urls: &[String],
        reset_errors: bool,
        format: ImageFormat,
        settle_delay: Duration,
    ) -> anyhow::Result<Vec<CaptureResult>> {
        if settle_delay > Duration::from_millis(MAX_SETTLE_DELAY_MS) {
            let millis = u64::try_from(settle_delay.as_millis()).unwrap_or(u64::MAX);
            return Err(ShotError::InvalidSettleDelay(millis).into());
        }

        let started = Instant::now();
        let res = self.capture_batch(urls, reset_errors, format, settle_delay);
        self.session.shutdown();

        match &res {
            Ok(results) => info!(
                "captured {} urls in {:.2}s",
                results.len(),
                started.elapsed().as_secs_f64()
            ),
            Err(e) => error!(
                "batch aborted after {:.2}s: {:#}",
                started.elapsed().as_secs_f64(),
                e
            ),
        }
        res
    }

    fn capture_batch(
        &mut self,
        urls: &[String],
        reset_errors: bool,
        format: ImageFormat,
        settle_delay: Duration,
    ) -> anyhow::Result<Vec<CaptureResult>> {
        reset_output_dir(&self.options.output_dir).context(format!(
            "could not reset output directory {:?}",
            self.options.output_dir
        ))?;
        remove_file_if_exists(&self.options.archive_path).context(format!(
            "could not remove previous archive {:?}",
            self.options.archive_path
        ))?;
        if reset_errors {
            self.run_log.reset_errors()?;
        }

        let urls = urls
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .collect::<Vec<&str>>();
        debug!("starting batch of {} urls as {}", urls.len(), format);

        let mut results = Vec::with_capacity(urls.len());
        for (i, url) in urls.iter().enumerate() {
            let index = i + 1;
            self.run_log.record_attempt(index, url)?;
            let stem = file_stem(i);

            let outcome = self.capture(url, &stem, format, settle_delay, index)?;
            if let Some(status) = outcome.http_status() {
                if !is_success_status(status) {
                    debug!("{} answered with status {}", url, status);
                    self.run_log.record_http_error(index, url)?;
                }
            }
            if let CaptureOutcome::Failed { reason, .. } = &outcome {
                warn!("capture of {} ({}) failed: {:#}", url, index, reason);
                self.run_log.record_failure(index, url)?;
            }
            results.push(outcome.into_result());
        }
        Ok(results)
    }

    /// Captures one url into `<output>/<Device>/<stem>.<ext>`. Errors are
    /// only returned when the session can't be started.
    pub fn capture(
        &mut self,
        url: &str,
        stem: &str,
        format: ImageFormat,
        settle_delay: Duration,
        index: usize,
    ) -> anyhow::Result<CaptureOutcome> {
        self.filter.prepare(self.fetcher.as_ref());
        let session = self.session.ensure_started()?;

        let mut partial = CaptureResult::empty(index, url);
        let page = match session.open_page() {
            Ok(p) => PageGuard::new(p),
            Err(e) => {
                return Ok(CaptureOutcome::Failed {
                    partial,
                    http_status: None,
                    reason: e.context("could not open page"),
                })
            }
        };
        if url.trim().is_empty() {
            return Ok(CaptureOutcome::Skipped(partial));
        }

        let mut http_status = None;
        let job = CaptureJob {
            url,
            stem,
            format,
            settle_delay,
            output_dir: &self.options.output_dir,
            consent: &self.consent,
        };
        match job.render(page.page(), self.filter.request_filter(), &mut partial, &mut http_status) {
            Ok(()) => {
                partial.status = http_status.unwrap_or(0);
                Ok(CaptureOutcome::Captured(partial))
            }
            Err(reason) => {
                partial.status = 0;
                Ok(CaptureOutcome::Failed {
                    partial,
                    http_status,
                    reason,
                })
            }
        }
    }

    pub fn export(&self) -> anyhow::Result<Vec<u8>> {
        export_archive(&self.options.output_dir, &self.options.archive_path)
    }
}

struct CaptureJob<'a> {
    url: &'a str,
    stem: &'a str,
    format: ImageFormat,
    settle_delay: Duration,
    output_dir: &'a Path,
    consent: &'a ConsentAutomator,
}

impl<'a> CaptureJob<'a> {
    fn render<P: RenderPage>(
        &self,
        page: &P,
        filter: Arc<dyn RequestFilter>,
        result: &mut CaptureResult,
        http_status: &mut Option<u16>,
    ) -> anyhow::Result<()> {
        page.set_request_filter(filter)
            .context("could not install request filter")?;

        let status = page
            .navigate(self.url)?
            .ok_or_else(|| anyhow!("no response received for {}", self.url))?;
        *http_status = Some(status);
        debug!("navigated to {} with status {}", self.url, status);

        self.consent.run(page, self.url);

        for device in catalog() {
            page.emulate(device)?;
            if !self.settle_delay.is_zero() {
                page.pause(self.settle_delay);
            }
            let bytes = page.snapshot(self.format)?;

            let dir = self.output_dir.join(device.kind.dir_name());
            fs::create_dir_all(&dir).context(format!("could not create {:?}", dir))?;
            let file = dir.join(format!("{}.{}", self.stem, self.format.extension()));
            fs::write(&file, &bytes).context(format!("could not save {:?}", file))?;
            debug!("saved {} screenshot of {} to {:?}", device.kind.name(), self.url, file);

            result.images.insert(device.kind, bytes);
        }
        Ok(())
    }
}
