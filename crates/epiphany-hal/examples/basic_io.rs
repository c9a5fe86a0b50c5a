//! Basic I/O on an Epiphany board
//!
//! Bootstraps the coprocessor, writes a pattern into every core and into a
//! shared memory buffer, and reads it back. Run as root on the board.

use epiphany_hal::prelude::*;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("epiphany_hal=info")
        .init();

    let config = SessionConfig::from_env().unwrap_or_default();
    let mut session = Session::bootstrap(config)?;
    println!("Bootstrapped {}\n", session.chip());

    let pattern: Vec<u8> = (0..1024u32).map(|i| (i % 256) as u8).collect();
    let cores: Vec<CoreId> = session.chip().rect().iter().collect();
    let mut failures = 0;
    for core in &cores {
        session.write_core(*core, 0x2000, &pattern)?;
        let mut back = vec![0u8; pattern.len()];
        session.read_core(*core, 0x2000, &mut back)?;
        if back != pattern {
            println!("core {core}: data differs");
            failures += 1;
        }
    }
    println!("Core SRAM: {} of {} cores verified", cores.len() - failures, cores.len());

    let Some(heap) = session.heap_mut() else {
        return Err(EhalError::invalid_state("no shared heap"));
    };
    let buf = heap.alloc(pattern.len())?;
    session.write_shared(buf, &pattern)?;
    let mut back = vec![0u8; pattern.len()];
    session.read_shared(buf, &mut back)?;
    println!(
        "Shared memory at {buf:#010x}: {}",
        if back == pattern { "verified" } else { "data differs" }
    );

    session.teardown();
    Ok(())
}
