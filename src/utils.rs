use std::{fs, path::Path};

use regex::Regex;

pub const OUTPUT_DIR: &str = "screenshots";
pub const ARCHIVE_PATH: &str = "screenshots.zip";
pub const RUN_LOG_PATH: &str = "run_log.json";

lazy_static! {
    static ref URL_SEPARATOR: Regex = Regex::new(r"[\s,\\]+").unwrap();
}

/// Splits pasted text into urls. Whitespace, commas and backslashes all
/// separate entries.
pub fn split_url_list(text: &str) -> Vec<String> {
    URL_SEPARATOR
        .split(text)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Zero padded file stem for the url at 0-based position `index`.
pub fn file_stem(index: usize) -> String {
    format!("{:05}", index + 1)
}

/// Leaves `dir` existing and empty.
pub fn reset_output_dir(dir: &Path) -> anyhow::Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

pub fn remove_file_if_exists(path: &Path) -> anyhow::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
