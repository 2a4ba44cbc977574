use std::{collections::BTreeMap, fmt, path::PathBuf, str::FromStr, time::Duration};

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::devices::DeviceKind;

/// Upper bound for the pause taken after switching device emulation.
pub const MAX_SETTLE_DELAY_MS: u64 = 10_000;

#[derive(Error, Debug)]
pub enum ShotError {
    #[error("session_launch: {0}")]
    SessionLaunch(String),
    #[error("invalid_settle_delay: {0}ms is above the 10000ms limit")]
    InvalidSettleDelay(u64),
    #[error("unsupported_format: {0}")]
    UnsupportedFormat(String),
    #[error("archive_source_missing: {0:?}")]
    ArchiveSourceMissing(PathBuf),
    #[error("run_log: {0}")]
    RunLog(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Jpeg,
    Png,
    Webp,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "webp",
        }
    }
}

impl FromStr for ImageFormat {
    type Err = ShotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            "png" => Ok(ImageFormat::Png),
            "webp" => Ok(ImageFormat::Webp),
            other => Err(ShotError::UnsupportedFormat(other.into())),
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Validated input for one batch.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub urls: Vec<String>,
    pub format: ImageFormat,
    pub settle_delay: Duration,
    pub reset_errors: bool,
}

impl BatchRequest {
    pub fn new(
        urls: Vec<String>,
        format: ImageFormat,
        settle_delay_ms: u64,
        reset_errors: bool,
    ) -> Result<Self, ShotError> {
        if settle_delay_ms > MAX_SETTLE_DELAY_MS {
            return Err(ShotError::InvalidSettleDelay(settle_delay_ms));
        }
        Ok(BatchRequest {
            urls,
            format,
            settle_delay: Duration::from_millis(settle_delay_ms),
            reset_errors,
        })
    }
}

/// Images and status captured for one URL of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureResult {
    pub index: usize,
    pub url: String,
    pub status: u16,
    #[serde(serialize_with = "serialize_images")]
    pub images: BTreeMap<DeviceKind, Vec<u8>>,
}

impl CaptureResult {
    pub fn empty(index: usize, url: &str) -> Self {
        CaptureResult {
            index,
            url: url.into(),
            status: 0,
            images: BTreeMap::new(),
        }
    }

    pub fn image(&self, device: DeviceKind) -> Option<&[u8]> {
        self.images.get(&device).map(|b| b.as_slice())
    }
}

fn serialize_images<S>(images: &BTreeMap<DeviceKind, Vec<u8>>, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = s.serialize_map(Some(images.len()))?;
    for (device, bytes) in images {
        map.serialize_entry(device.name(), &STANDARD.encode(bytes))?;
    }
    map.end()
}

/// What happened to a single URL. Only session-level problems are reported
/// as errors by the capture step; everything else lands here.
#[derive(Debug)]
pub enum CaptureOutcome {
    Captured(CaptureResult),
    Skipped(CaptureResult),
    Failed {
        partial: CaptureResult,
        http_status: Option<u16>,
        reason: anyhow::Error,
    },
}

impl CaptureOutcome {
    /// Status reported by the navigation response, if one was received.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            CaptureOutcome::Captured(r) => Some(r.status),
            CaptureOutcome::Skipped(_) => None,
            CaptureOutcome::Failed { http_status, .. } => *http_status,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CaptureOutcome::Failed { .. })
    }

    pub fn into_result(self) -> CaptureResult {
        match self {
            CaptureOutcome::Captured(r) | CaptureOutcome::Skipped(r) => r,
            CaptureOutcome::Failed { partial, .. } => partial,
        }
    }
}

pub fn is_success_status(status: u16) -> bool {
    (200..=299).contains(&status)
}
