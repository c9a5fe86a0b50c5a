//! Motorola S-record firmware loading
//!
//! Images are parsed in one pass. Data records are routed by address class:
//!
//! | Address | Destination |
//! |---------|-------------|
//! | row = col = 0 | same local offset in every core of the target rectangle |
//! | row, col inside the rectangle | that core |
//! | inside shared DRAM | shared memory |
//! | anything else | skipped, still counted |

mod loader;
mod record;

pub use loader::{ImageSink, LoadStats, SrecLoader, SREC_EXTENSIONS};
pub use record::{parse_record, Record, RecordKind};
