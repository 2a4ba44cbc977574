use std::{
    fs,
    io::{Cursor, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

use crate::types::ShotError;

/// Zips every file under `source_dir`, with entry names relative to it, and
/// writes the archive to `output_path`. Returns the archive bytes.
pub fn export_archive(source_dir: &Path, output_path: &Path) -> anyhow::Result<Vec<u8>> {
    if !source_dir.is_dir() {
        return Err(ShotError::ArchiveSourceMissing(source_dir.to_path_buf()).into());
    }

    let mut files = vec![];
    collect_files(source_dir, &mut files)?;
    files.sort();

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for file in &files {
        let name = entry_name(source_dir, file)?;
        let bytes = fs::read(file).with_context(|| format!("could not read {:?}", file))?;
        zip.start_file(name, options)?;
        zip.write_all(&bytes)?;
    }
    let bytes = zip.finish()?.into_inner();

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(output_path, &bytes)
        .with_context(|| format!("could not write archive {:?}", output_path))?;
    info!(
        "archived {} files from {:?} into {:?} ({} bytes)",
        files.len(),
        source_dir,
        output_path,
        bytes.len()
    );
    Ok(bytes)
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else if path.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

// zip entries always use forward slashes
fn entry_name(root: &Path, file: &Path) -> anyhow::Result<String> {
    let rel = file.strip_prefix(root)?;
    Ok(rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<String>>()
        .join("/"))
}
