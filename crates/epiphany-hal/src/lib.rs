//! Host-side hardware access for Epiphany many-core coprocessors.
//!
//! The cores, the bridge register page and the shared DRAM segment are
//! mapped into the host process at their own bus addresses (VA == PA), so a
//! pointer means the same thing on both sides. Bring-up follows a fixed
//! sequence and unwinds completely on failure.
//!
//! # Bootstrap sequence
//!
//! ```text
//! open device     /dev/epiphany/mesh0 → /dev/epiphany → /dev/mem (O_SYNC|O_EXCL)
//! system page     0x808F0000, 4 KiB, read ESYSINFO → chip kind
//! core grid       N×N cores: 32 KiB bank + 4 KiB registers each, NOREPLACE
//! link up         ESYSCONFIG ← 0x50000000, ELINKMODECFG ← 1, ESYSCONFIG ← 0
//! shared memory   0x8E000000 ← host 0x3E000000, 32 MiB, 2 MiB pages if possible
//! heap            allocator over the shared window
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use epiphany_hal::{Session, SessionConfig};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::from_env()?;
//! let mut session = Session::bootstrap(config)?;
//!
//! println!("{} ready", session.chip());
//! let stats = session.load_srec(Path::new("e_main.srec"))?;
//! println!("{} bytes loaded", stats.bytes_written);
//!
//! let buf = session.heap_mut().map(|h| h.alloc(4096)).transpose()?;
//! println!("shared buffer at {buf:?}");
//! session.teardown();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod config;
mod device;
mod error;
pub mod grid;
pub mod heap;
pub mod link;
pub mod mmio;
mod session;
pub mod setup;
pub mod srec;
pub mod system;

pub use config::{load_description, parse_description, Description, ExternalMemory, SessionConfig};
pub use device::{open_backend, open_first, DEFAULT_DEVICE_PATHS};
pub use error::{EhalError, Result};
pub use heap::SharedHeap;
pub use mmio::{HwBackend, MappedFile, OsBackend};
pub use session::{BootState, Session};
pub use srec::{ImageSink, LoadStats, SrecLoader};

/// Silicon model (re-exported from epiphany-chip).
pub use epiphany_chip as chip;

/// Common imports for applications.
pub mod prelude {
    pub use crate::chip::{Chip, ChipKind, CoreId, GridRect};
    pub use crate::{EhalError, Result, Session, SessionConfig};
}
