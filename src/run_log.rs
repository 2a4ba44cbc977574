//! Persisted record of the latest attempt and of every url that failed or
//! answered with a non-2xx status. The file is rewritten after each change so
//! an interrupted batch can be inspected and re-run by the caller.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ShotError;

pub const RUN_LOG_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub index: usize,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunLogRecord {
    pub version: u32,
    #[serde(with = "latest_attempt_format")]
    pub latest_attempt: Option<RunLogEntry>,
    pub failed: Vec<RunLogEntry>,
    #[serde(rename = "httpErrors")]
    pub http_errors: Vec<RunLogEntry>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for RunLogRecord {
    fn default() -> Self {
        RunLogRecord {
            version: RUN_LOG_VERSION,
            latest_attempt: None,
            failed: vec![],
            http_errors: vec![],
            updated_at: None,
        }
    }
}

// an empty latest attempt is written as "" and read back from "", null or a
// missing field
mod latest_attempt_format {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::RunLogEntry;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Entry(RunLogEntry),
        Other(serde_json::Value),
    }

    pub fn serialize<S>(entry: &Option<RunLogEntry>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match entry {
            Some(e) => e.serialize(s),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Option<RunLogEntry>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(d)? {
            Raw::Entry(e) => Ok(Some(e)),
            Raw::Other(_) => Ok(None),
        }
    }
}

pub struct RunLog {
    path: PathBuf,
    record: RunLogRecord,
}

impl RunLog {
    /// Loads the log at `path`, or creates and persists an empty one.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(log) = RunLog::load(&path)? {
            return Ok(log);
        }
        let mut log = RunLog {
            path,
            record: RunLogRecord::default(),
        };
        log.persist()?;
        Ok(log)
    }

    /// Reads the log at `path` without creating it. Returns `None` when no
    /// log has been written yet.
    pub fn load(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)
            .map_err(|e| ShotError::RunLog(format!("could not read {:?}: {}", path, e)))?;
        let mut record: RunLogRecord = serde_json::from_str(&raw)
            .map_err(|e| ShotError::RunLog(format!("could not parse {:?}: {}", path, e)))?;
        if record.version != RUN_LOG_VERSION {
            warn!(
                "run log {:?} has version {}, reading it as version {}",
                path, record.version, RUN_LOG_VERSION
            );
            record.version = RUN_LOG_VERSION;
        }
        dedup_by_url(&mut record.failed);
        dedup_by_url(&mut record.http_errors);
        debug!(
            "loaded run log {:?} ({} failed, {} http errors)",
            path,
            record.failed.len(),
            record.http_errors.len()
        );
        Ok(Some(RunLog {
            path: path.to_path_buf(),
            record,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> &RunLogRecord {
        &self.record
    }

    pub fn latest_attempt(&self) -> Option<&RunLogEntry> {
        self.record.latest_attempt.as_ref()
    }

    pub fn failed(&self) -> &[RunLogEntry] {
        &self.record.failed
    }

    pub fn http_errors(&self) -> &[RunLogEntry] {
        &self.record.http_errors
    }

    pub fn has_failed(&self, url: &str) -> bool {
        self.record.failed.iter().any(|e| e.url == url)
    }

    pub fn record_attempt(&mut self, index: usize, url: &str) -> anyhow::Result<()> {
        self.record.latest_attempt = Some(RunLogEntry {
            index,
            url: url.into(),
        });
        self.persist()
    }

    /// Returns false when the url was already recorded.
    pub fn record_failure(&mut self, index: usize, url: &str) -> anyhow::Result<bool> {
        if !insert_if_absent(&mut self.record.failed, index, url) {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    /// Returns false when the url was already recorded.
    pub fn record_http_error(&mut self, index: usize, url: &str) -> anyhow::Result<bool> {
        if !insert_if_absent(&mut self.record.http_errors, index, url) {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    pub fn reset_errors(&mut self) -> anyhow::Result<()> {
        self.record.failed.clear();
        self.record.http_errors.clear();
        self.persist()
    }

    fn persist(&mut self) -> anyhow::Result<()> {
        self.record.updated_at = Some(Utc::now());
        let body = serde_json::to_string_pretty(&self.record)
            .map_err(|e| ShotError::RunLog(format!("could not serialize {:?}: {}", self.path, e)))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    ShotError::RunLog(format!("could not create {:?}: {}", parent, e))
                })?;
            }
        }
        // write then rename so a crash never leaves a truncated log behind
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, body)
            .map_err(|e| ShotError::RunLog(format!("could not write {:?}: {}", tmp, e)))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            ShotError::RunLog(format!("could not replace {:?}: {}", self.path, e))
        })?;
        Ok(())
    }
}

fn insert_if_absent(entries: &mut Vec<RunLogEntry>, index: usize, url: &str) -> bool {
    if entries.iter().any(|e| e.url == url) {
        return false;
    }
    entries.push(RunLogEntry {
        index,
        url: url.into(),
    });
    true
}

fn dedup_by_url(entries: &mut Vec<RunLogEntry>) {
    let mut seen = std::collections::HashSet::new();
    entries.retain(|e| seen.insert(e.url.clone()));
}
