//! Filesystem primitives shared by every store.
//!
//! Two write shapes keep multi-process workspaces safe: whole-file
//! rewrites go through a temp file + rename, incremental additions go
//! through O_APPEND. The appender caches the file length per path so
//! steady-state appends skip the `stat` call.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use bv_domain::error::{Error, Result};

/// Write `data` to `path` atomically: temp file, fsync, rename.
///
/// On rename failure the temp file is removed so no `.tmp` debris
/// accumulates next to the target.
pub fn write_file_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(Error::Io)?;
    }

    let tmp = tmp_path(path);
    {
        let mut file = std::fs::File::create(&tmp).map_err(Error::Io)?;
        file.write_all(data).map_err(Error::Io)?;
        file.sync_all().map_err(Error::Io)?;
    }

    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(Error::Io(e));
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_owned());
    name.push_str(".tmp");
    path.with_file_name(name)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSONL appender
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Appends JSON lines with a newline *prefix* once the file has
/// content, so the file never carries a trailing newline and a crash
/// mid-write tears at most the final line.
#[derive(Default)]
pub struct JsonlAppender {
    lengths: Mutex<HashMap<PathBuf, u64>>,
}

impl JsonlAppender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one serialized record to `path`. Returns the byte offset
    /// at which the record starts.
    pub fn append(&self, path: &Path, json: &str) -> Result<u64> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }

        let mut lengths = self.lengths.lock();
        let len = match lengths.get(path) {
            Some(len) => *len,
            // Cache miss (or external rewrite): consult the file size.
            None => std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
        };

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(Error::Io)?;

        let mut buf = String::with_capacity(json.len() + 1);
        if len > 0 {
            buf.push('\n');
        }
        buf.push_str(json);
        file.write_all(buf.as_bytes()).map_err(Error::Io)?;

        let offset = if len > 0 { len + 1 } else { 0 };
        lengths.insert(path.to_path_buf(), offset + json.len() as u64);
        Ok(offset)
    }

    /// Drop the cached length for `path` (after a rewrite or truncation
    /// this process did not perform through the appender).
    pub fn invalidate(&self, path: &Path) {
        self.lengths.lock().remove(path);
    }
}

/// Split a JSONL file into its non-empty lines. A missing file yields
/// no lines; parsing (and skipping torn lines) is the caller's concern.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
    Ok(raw
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_owned)
        .collect())
}
