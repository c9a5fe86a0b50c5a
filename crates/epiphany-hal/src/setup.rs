//! Host preflight checks
//!
//! Conditions that make bootstrap impossible are caught here with a readable
//! message, before anything is opened or mapped.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::SessionConfig;

/// Host page size the identity mappings assume
pub const REQUIRED_PAGE_SIZE: usize = 4096;

/// Run every preflight check for `config`.
///
/// # Errors
///
/// Returns an error describing the first unmet requirement.
pub fn preflight(config: &SessionConfig) -> Result<()> {
    info!("Epiphany host preflight");
    check_privilege()?;
    check_page_size(rustix::param::page_size())?;
    let node = find_device_node(&config.device_paths)?;
    debug!("Device node present: {}", node.display());
    Ok(())
}

/// Mapping physical memory at fixed addresses requires root.
fn check_privilege() -> Result<()> {
    let uid = rustix::process::getuid();
    if !uid.is_root() {
        bail!(
            "Need root to map the Epiphany device (running as uid {}). Run with sudo.",
            uid.as_raw()
        );
    }
    Ok(())
}

fn check_page_size(size: usize) -> Result<()> {
    if size != REQUIRED_PAGE_SIZE {
        bail!("Host page size is {size} bytes, identity mapping needs {REQUIRED_PAGE_SIZE}");
    }
    Ok(())
}

fn find_device_node(paths: &[PathBuf]) -> Result<&Path> {
    if let Some(found) = paths.iter().find(|p| p.exists()) {
        return Ok(found);
    }
    let tried: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
    bail!(
        "No Epiphany device node found (tried {}). Is the epiphany driver loaded?",
        tried.join(", ")
    );
}
