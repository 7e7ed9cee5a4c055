// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Whole-file persistence helpers shared by the history store and the geo cache.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// How a state file was found at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// File existed and decoded cleanly
    Loaded,
    /// No file yet; started empty
    Absent,
    /// File existed but did not decode; started empty. Holds where the
    /// unreadable file was moved, if the move succeeded.
    CorruptReset { moved_to: Option<PathBuf> },
}

/// Replace `path` with `contents` through a temp file in the same
/// directory and a rename, so readers of `path` never see a partial write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.as_file_mut().write_all(contents)?;
    temp.as_file().sync_all()?;

    // A failed persist hands the temp file back; dropping it removes it.
    temp.persist(path).map_err(|e| {
        warn!(path = %path.display(), error = %e.error, "Failed to rename temp file into place");
        e.error
    })?;

    debug!(path = %path.display(), bytes = contents.len(), "Persisted file");
    Ok(())
}

/// Move an undecodable file out of the way so the next write does not
/// destroy it.
pub fn move_aside(path: &Path) -> Option<PathBuf> {
    let mut target = path.as_os_str().to_owned();
    target.push(".corrupt");
    let target = PathBuf::from(target);

    match fs::rename(path, &target) {
        Ok(()) => Some(target),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not move corrupt file aside");
            None
        }
    }
}
