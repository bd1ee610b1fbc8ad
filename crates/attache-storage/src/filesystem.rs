//! Local filesystem operations for attachment variants.

use std::io;
use std::path::Path;

use tempfile::TempPath;
use tokio::fs;
use tracing::{debug, error, warn};

use attache_core::error::is_vanished_kind;
use attache_core::{io_error_at, Result};

/// How a filesystem error during cleanup should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsErrorClass {
    /// The file is already gone (`ENOENT`, `ESTALE`).
    Transient,
    /// Normal end of an upward directory walk (non-empty, not a directory).
    ExpectedStop,
    /// Anything else; reported and not retried.
    Unexpected,
}

pub fn classify(err: &io::Error) -> FsErrorClass {
    if is_vanished_kind(err.kind()) {
        return FsErrorClass::Transient;
    }
    match err.kind() {
        io::ErrorKind::DirectoryNotEmpty
        | io::ErrorKind::AlreadyExists
        | io::ErrorKind::NotADirectory
        | io::ErrorKind::InvalidInput => FsErrorClass::ExpectedStop,
        _ => FsErrorClass::Unexpected,
    }
}

/// Move a staged temp file to `dest` and set its mode.
///
/// Parent directories are created as needed. Falls back to a copy when a
/// rename is not possible (e.g. across filesystems). On error the staged
/// file is left in place so the write can be retried; once this returns
/// `Ok` the caller drops `staged`.
pub async fn move_into_place(staged: &TempPath, dest: &Path, mode: u32) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            warn!(parent = %parent.display(), error = %e, "filesystem: create_dir_all failed");
            e
        })?;
    }

    if let Err(e) = fs::rename(&**staged, dest).await {
        debug!(
            from = %staged.display(),
            to = %dest.display(),
            error = %e,
            "filesystem: rename failed, copying"
        );
        fs::copy(&**staged, dest).await.map_err(|e| {
            warn!(from = %staged.display(), to = %dest.display(), error = %e, "filesystem: copy failed");
            e
        })?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dest, std::fs::Permissions::from_mode(mode)).await?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}

/// Delete `path`, then every ancestor directory that became empty, stopping
/// below `root`.
///
/// A file that is already gone is fine. Any other error removing the file is
/// returned. Pruning never fails: the walk ends quietly at the first
/// directory that is non-empty or missing, and any other error is logged and
/// ends the walk.
pub async fn delete_recursive(path: &Path, root: &Path) -> Result<()> {
    if let Err(e) = fs::remove_file(path).await {
        if classify(&e) != FsErrorClass::Transient {
            error!(
                subsystem = "storage",
                component = "filesystem",
                op = "delete_recursive",
                path = %path.display(),
                error = %e,
                "Failed to delete local file"
            );
            return Err(io_error_at(e, path).into());
        }
    }

    let mut current = path.parent();
    while let Some(dir) = current {
        if dir.as_os_str().is_empty() || dir == root {
            break;
        }
        match fs::remove_dir(dir).await {
            Ok(()) => current = dir.parent(),
            Err(e) => {
                if classify(&e) == FsErrorClass::Unexpected {
                    error!(
                        subsystem = "storage",
                        component = "filesystem",
                        op = "delete_recursive",
                        path = %dir.display(),
                        initial_path = %path.display(),
                        error = %e,
                        "Failed to remove empty directory"
                    );
                }
                break;
            }
        }
    }
    Ok(())
}

pub async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}
