//! Epiphany device node discovery and exclusive open

use rustix::fs::OFlags;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::error::{EhalError, Result};
use crate::mmio::OsBackend;

/// Device nodes tried in order: the mesh driver, the legacy driver, raw memory.
pub const DEFAULT_DEVICE_PATHS: [&str; 3] = ["/dev/epiphany/mesh0", "/dev/epiphany", "/dev/mem"];

/// Open the first usable device node.
///
/// Each node is opened read/write with `O_SYNC | O_EXCL`, so only one process
/// drives the mesh at a time.
///
/// # Errors
///
/// Returns [`EhalError::DeviceOpen`] listing every path with its OS error if
/// none can be opened.
pub fn open_first<P: AsRef<Path>>(paths: &[P]) -> Result<(File, PathBuf)> {
    let mut attempts = Vec::with_capacity(paths.len());

    // Flag bits are small positive values
    #[allow(clippy::cast_possible_wrap)]
    let flags = (OFlags::SYNC | OFlags::EXCL).bits() as i32;

    for path in paths {
        let path = path.as_ref();
        tracing::debug!("Opening {}", path.display());
        match OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(flags)
            .open(path)
        {
            Ok(file) => {
                tracing::info!("Opened Epiphany device {}", path.display());
                return Ok((file, path.to_path_buf()));
            }
            Err(e) => {
                tracing::debug!("{}: {e}", path.display());
                attempts.push((path.to_path_buf(), e));
            }
        }
    }

    for (path, err) in &attempts {
        tracing::error!("    '{}' ({err})", path.display());
    }
    Err(EhalError::DeviceOpen { attempts })
}

/// Open the first usable device node and wrap it in an [`OsBackend`].
///
/// # Errors
///
/// See [`open_first`].
pub fn open_backend<P: AsRef<Path>>(paths: &[P]) -> Result<OsBackend> {
    let (file, path) = open_first(paths)?;
    Ok(OsBackend::new(file, path))
}
