//! Atomic File Persistence
//!
//! Files shared with external processes (the workflow document, case
//! context files, accumulator bundles) are written to a temporary file in
//! the destination directory and renamed into place, so a reader never
//! sees a half-written file.

use std::fs;
use std::io::Write;
use std::path::Path;

use log::debug;
use tempfile::NamedTempFile;

use crate::error::{Result, WorkflowError};

/// Writes `contents` to `path` atomically, creating parent directories.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| WorkflowError::io(dir, e))?;

    let mut temp = NamedTempFile::new_in(dir).map_err(|e| WorkflowError::io(dir, e))?;
    temp.write_all(contents)
        .map_err(|e| WorkflowError::io(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| WorkflowError::io(temp.path(), e))?;
    temp.persist(path)
        .map_err(|e| WorkflowError::io(path, e.error))?;

    debug!("Wrote {} ({} bytes)", path.display(), contents.len());
    Ok(())
}
