//! `ehal`: command-line interface for Epiphany coprocessor boards.
//!
//! ```text
//! USAGE:
//!   ehal [--hdf <file>] [--device <path>]... <command>
//!
//!   ehal layout                      Print the address map (no hardware access)
//!   ehal preflight                   Check privileges, page size, device node
//!   ehal info                        Bootstrap and print platform details
//!   ehal load <image> [--begin R,C] [--end R,C] [--reset]
//!                                    Load an S-record image into the cores
//! ```
//!
//! Without `--hdf` the description named by `$EPIPHANY_HDF` is used, and
//! without that a stock Parallella-16 layout.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use epiphany_chip::regs::{ELINKMODECFG, REGS_SIZE, SRAM_SIZE};
use epiphany_chip::sys::SYS_SIZE;
use epiphany_chip::{CoreId, GridRect, LinkDirection};
use epiphany_hal::{config, setup, Session, SessionConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ehal", about = "Epiphany host access CLI", version)]
struct Cli {
    /// Hardware description file (.hdf). Defaults to $EPIPHANY_HDF.
    #[arg(long, global = true)]
    hdf: Option<PathBuf>,

    /// Device node to open, may be repeated. Defaults to the standard list.
    #[arg(long = "device", global = true)]
    devices: Vec<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the address map for the configured board.
    Layout,
    /// Check that this host can run the bootstrap.
    Preflight,
    /// Bootstrap the board and print what was found.
    Info,
    /// Load an S-record image.
    Load {
        /// Image file (.srec, .s19, .s28, .s37, ...).
        image: PathBuf,
        /// First core of the target rectangle, as ROW,COL. Defaults to the chip origin.
        #[arg(long, value_parser = parse_core)]
        begin: Option<CoreId>,
        /// Last core of the target rectangle, as ROW,COL. Defaults to the chip's last core.
        #[arg(long, value_parser = parse_core)]
        end: Option<CoreId>,
        /// Reset the chip before loading.
        #[arg(long)]
        reset: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.hdf.as_deref(), cli.devices)?;

    match cli.command {
        Cmd::Layout => cmd_layout(&config)?,
        Cmd::Preflight => cmd_preflight(&config)?,
        Cmd::Info => cmd_info(config)?,
        Cmd::Load {
            image,
            begin,
            end,
            reset,
        } => cmd_load(config, &image, begin, end, reset)?,
    }

    Ok(())
}

fn load_config(hdf: Option<&Path>, devices: Vec<PathBuf>) -> Result<SessionConfig> {
    let mut cfg = if let Some(path) = hdf {
        SessionConfig::from_file(path)
            .with_context(|| format!("loading description {}", path.display()))?
    } else if std::env::var_os(config::HDF_ENV).is_some() {
        SessionConfig::from_env()?
    } else {
        tracing::warn!(
            "No description file ({} unset), assuming a Parallella-16",
            config::HDF_ENV
        );
        SessionConfig::default()
    };
    if !devices.is_empty() {
        cfg = cfg.with_device_paths(devices);
    }
    Ok(cfg)
}

fn parse_core(s: &str) -> std::result::Result<CoreId, String> {
    let (row, col) = s
        .split_once(',')
        .ok_or_else(|| format!("expected ROW,COL, got '{s}'"))?;
    let row: u32 = row.trim().parse().map_err(|e| format!("row '{row}': {e}"))?;
    let col: u32 = col.trim().parse().map_err(|e| format!("col '{col}': {e}"))?;
    CoreId::new(row, col).map_err(|e| e.to_string())
}

fn cmd_layout(cfg: &SessionConfig) -> Result<()> {
    let chip = cfg.chip;
    let link = chip.link_core(LinkDirection::East)?;

    if let Some(path) = &cfg.description {
        println!("Description  : {}", path.display());
    }
    println!("Chip         : {chip} ({} cores)", chip.kind().cores());
    println!("Cores        : {}", chip.rect());
    println!("System regs  : {:#010x} ({:#x} bytes)", cfg.sys_base, SYS_SIZE);
    println!(
        "Shared DRAM  : {:#010x} <- host {:#010x} ({} MiB, {:?})",
        cfg.emem.epi_base,
        cfg.emem.host_base,
        cfg.emem.size >> 20,
        cfg.emem.access
    );
    println!(
        "East link    : core {link}, ELINKMODECFG at {:#010x}",
        link.regs_base() + ELINKMODECFG
    );
    println!();
    println!("  core        bank                      registers");
    for core in chip.rect().iter() {
        println!(
            "  {core}   {:#010x}..{:#010x}   {:#010x}..{:#010x}",
            core.bank_base(),
            core.bank_base() + SRAM_SIZE,
            core.regs_base(),
            core.regs_base() + REGS_SIZE
        );
    }
    Ok(())
}

fn cmd_preflight(cfg: &SessionConfig) -> Result<()> {
    setup::preflight(cfg)?;
    println!("Preflight OK");
    Ok(())
}

fn cmd_info(cfg: SessionConfig) -> Result<()> {
    setup::preflight(&cfg)?;
    let mut session = Session::bootstrap(cfg)?;

    if let Some(info) = session.platform_info() {
        println!("Platform     : {} (id {})", info.platform.name(), info.platform_raw);
        println!("FPGA load    : {}", info.fpga_load_type.name());
        println!("Revision     : {}", info.revision);
    }
    println!("Device       : {}", session.backend().path().display());
    println!("Chip         : {}", session.chip());
    println!("Cores        : {}", session.chip().rect());
    if let Some(shm) = session.shared_memory() {
        println!(
            "Shared DRAM  : {:#010x} ({} MiB, {})",
            shm.base(),
            shm.len() >> 20,
            if shm.huge_pages() { "2 MiB pages" } else { "4 KiB pages" }
        );
    }
    if let Some(heap) = session.heap() {
        println!("Heap         : {} bytes free", heap.available());
    }

    session.teardown();
    Ok(())
}

fn cmd_load(
    cfg: SessionConfig,
    image: &Path,
    begin: Option<CoreId>,
    end: Option<CoreId>,
    reset: bool,
) -> Result<()> {
    setup::preflight(&cfg)?;
    let mut session = Session::bootstrap(cfg)?;

    let chip_rect = session.chip().rect();
    let rect = GridRect::new(
        begin.unwrap_or_else(|| chip_rect.begin()),
        end.unwrap_or_else(|| chip_rect.end()),
    )?;

    if reset {
        session.reset()?;
    }
    let stats = session
        .load_srec_into(image, rect)
        .with_context(|| format!("loading {}", image.display()))?;

    if let Some(header) = &stats.header {
        println!("Header       : {header}");
    }
    println!("Target       : {rect}");
    println!("Records      : {} ({} data)", stats.records, stats.data_records);
    println!("Bytes        : {}", stats.bytes_written);
    if stats.skipped > 0 {
        println!("Skipped      : {} (no destination)", stats.skipped);
    }
    if let Some(entry) = stats.entry {
        println!("Entry        : {entry:#010x}");
    }

    session.teardown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_core_coordinates() {
        let core = parse_core("33, 9").unwrap();
        assert_eq!((core.row(), core.col()), (33, 9));
        assert!(parse_core("33").is_err());
        assert!(parse_core("64,0").is_err());
        assert!(parse_core("a,b").is_err());
    }

    #[test]
    fn cli_parses_load() {
        let cli = Cli::try_parse_from([
            "ehal", "--device", "/dev/mem", "load", "fw.srec", "--begin", "32,8", "--end", "33,9",
        ])
        .unwrap();
        assert_eq!(cli.devices, vec![PathBuf::from("/dev/mem")]);
        match cli.command {
            Cmd::Load { image, begin, end, reset } => {
                assert_eq!(image, PathBuf::from("fw.srec"));
                assert_eq!(begin.map(|c| c.row()), Some(32));
                assert_eq!(end.map(|c| c.col()), Some(9));
                assert!(!reset);
            }
            _ => panic!("expected load"),
        }
    }

    #[test]
    fn layout_runs_without_hardware() {
        cmd_layout(&SessionConfig::default()).unwrap();
    }
}
