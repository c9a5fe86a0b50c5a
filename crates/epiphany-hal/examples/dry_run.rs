//! Load an S-record image against the recording backend
//!
//! Shows what a load would do without touching hardware:
//!
//! ```text
//! cargo run --example dry_run -- firmware.srec
//! ```

use std::path::PathBuf;

use epiphany_hal::chip::sys::{ESYSINFO, SYS_BASE};
use epiphany_hal::mmio::mock::{Event, MockBackend};
use epiphany_hal::{Result, Session, SessionConfig};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("epiphany_hal=debug")
        .init();

    let Some(image) = std::env::args_os().nth(1).map(PathBuf::from) else {
        eprintln!("usage: dry_run <image.srec>");
        std::process::exit(2);
    };

    let mock = MockBackend::new();
    // Parallella E16, headless bitstream
    mock.poke32(SYS_BASE + ESYSINFO, 0x0001_0201);

    let mut session = Session::start(SessionConfig::default(), mock.clone())?;
    let stats = session.load_srec(&image)?;
    session.teardown();

    let events = mock.events();
    let maps = events.iter().filter(|e| matches!(e, Event::Map { .. })).count();
    println!("{} mappings, {} stores", maps, mock.writes().len());
    println!("{stats:#?}");
    Ok(())
}
