//! Zip bundles of a session's composited outputs

use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{Error, Result};

/// Pack every file in `dir` into an in-memory zip archive
///
/// Blocking. Fails with `ResourceMissing` if the directory is gone or empty.
pub fn build_bundle(dir: &Path) -> Result<Vec<u8>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::missing("no outputs stored for this session"));
        }
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        // in-progress writes are dot-prefixed until renamed
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    if files.is_empty() {
        return Err(Error::missing("session has no composited outputs"));
    }

    // PNG is already compressed
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut buf = Vec::new();

    for path in &files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        buf.clear();
        File::open(path)?.read_to_end(&mut buf)?;

        writer.start_file(name, options)?;
        writer.write_all(&buf)?;
    }

    let cursor = writer.finish()?;
    tracing::debug!("Bundled {} file(s) from {}", files.len(), dir.display());
    Ok(cursor.into_inner())
}
