//! Error types for Epiphany host access

use std::fmt::Write as _;
use std::io;
use std::path::PathBuf;

use epiphany_chip::AddrError;
use thiserror::Error;

use crate::mmio::Access;

/// Result type alias for Epiphany operations
pub type Result<T> = std::result::Result<T, EhalError>;

/// Errors that can occur while bringing up or using the coprocessor
#[derive(Debug, Error)]
pub enum EhalError {
    /// Configuration or description file is unusable
    #[error("Configuration error: {reason}")]
    Config {
        /// Reason for failure
        reason: String,
    },

    /// None of the candidate device nodes could be opened
    #[error("Could not open Epiphany device, tried:{}", format_attempts(.attempts))]
    DeviceOpen {
        /// Every path tried, in priority order, with the OS error it gave
        attempts: Vec<(PathBuf, io::Error)>,
    },

    /// A fixed-address mapping failed
    #[error("mmap of {region} at {base:#010x} ({len:#x} bytes) failed: {source}")]
    Map {
        /// Which window was being mapped (e.g. `core [32, 8] bank`)
        region: String,
        /// Requested (identity) address
        base: u32,
        /// Requested length
        len: usize,
        /// OS error
        #[source]
        source: io::Error,
    },

    /// Address codec rejected a coordinate
    #[error("Address error: {source}")]
    Address {
        /// Underlying codec error
        #[from]
        source: AddrError,
    },

    /// Malformed firmware image
    #[error("SREC line {line}: {reason}")]
    Protocol {
        /// 1-based line number of the offending record
        line: usize,
        /// Reason for failure
        reason: String,
    },

    /// Shared memory heap exhausted
    #[error("Shared heap exhausted: requested {requested} bytes, {available} available")]
    Resource {
        /// Bytes requested
        requested: usize,
        /// Largest free block
        available: usize,
    },

    /// Access outside every mapped window
    #[error("Access of {len} bytes at {addr:#010x} is outside the mapped windows")]
    OutOfWindow {
        /// Start address
        addr: u32,
        /// Access length
        len: usize,
    },

    /// Access against the rights a window was mapped with
    #[error(
        "{} of {len} bytes at {addr:#010x} refused, window is mapped {access:?}",
        access_kind(.store)
    )]
    Protection {
        /// True for a store, false for a load
        store: bool,
        /// Start address
        addr: u32,
        /// Access length
        len: usize,
        /// Rights of the window
        access: Access,
    },

    /// Operation not valid in the current lifecycle state
    #[error("Invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: io::Error,
    },
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn access_kind(store: &bool) -> &'static str {
    if *store {
        "Store"
    } else {
        "Load"
    }
}

fn format_attempts(attempts: &[(PathBuf, io::Error)]) -> String {
    let mut out = String::new();
    for (path, err) in attempts {
        let _ = write!(out, " '{}' ({err});", path.display());
    }
    out
}

impl EhalError {
    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a mapping error
    pub fn map(region: impl Into<String>, base: u32, len: usize, source: io::Error) -> Self {
        Self::Map {
            region: region.into(),
            base,
            len,
            source,
        }
    }

    /// Create a firmware image error
    pub fn protocol(line: usize, reason: impl Into<String>) -> Self {
        Self::Protocol {
            line,
            reason: reason.into(),
        }
    }

    /// Create an out-of-window error
    pub const fn out_of_window(addr: u32, len: usize) -> Self {
        Self::OutOfWindow { addr, len }
    }

    /// Create a protection error
    pub const fn protection(store: bool, addr: u32, len: usize, access: Access) -> Self {
        Self::Protection {
            store,
            addr,
            len,
            access,
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }
}
