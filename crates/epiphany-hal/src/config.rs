//! Session configuration and the hardware description (`.hdf`) file
//!
//! The description file is the board support package's view of the topology:
//! one `KEY value` pair per line. Only the first chip and the first external
//! memory segment are used. Hardware identification read at bootstrap takes
//! precedence over what the file says.
//!
//! ```text
//! PLATFORM_VERSION    PARALLELLA1601
//! ESYS_REGS_BASE      0x808f0000
//! NUM_CHIPS           1
//! CHIP                E16G301
//! CHIP_ROW            32
//! CHIP_COL            8
//! NUM_EXT_MEMS        1
//! EMEM                ext-DRAM
//! EMEM_BASE_ADDRESS   0x3e000000
//! EMEM_EPI_BASE       0x8e000000
//! EMEM_SIZE           0x02000000
//! EMEM_TYPE           RDWR
//! ```

use std::path::{Path, PathBuf};

use epiphany_chip::addr;
use epiphany_chip::sys::SYS_BASE;
use epiphany_chip::{Chip, ChipKind};

use crate::device::DEFAULT_DEVICE_PATHS;
use crate::error::{EhalError, Result};
use crate::mmio::Access;

/// Environment variable naming the description file
pub const HDF_ENV: &str = "EPIPHANY_HDF";

/// Addresses and sizes in the description must sit on 4 KiB pages.
const PAGE_MASK: u32 = !0xFFF;

/// Shared DRAM segment visible to both host and cores
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalMemory {
    /// Host physical address (device file offset)
    pub host_base: u32,
    /// Address the cores (and, identity-mapped, the host) use
    pub epi_base: u32,
    /// Size in bytes
    pub size: u32,
    /// Access rights of the host mapping
    pub access: Access,
}

impl Default for ExternalMemory {
    /// Parallella: 32 MiB at host `0x3E000000`, seen by the cores at `0x8E000000`
    fn default() -> Self {
        Self {
            host_base: 0x3E00_0000,
            epi_base: 0x8E00_0000,
            size: 0x0200_0000,
            access: Access::ReadWrite,
        }
    }
}

impl ExternalMemory {
    /// True if `[addr, addr + len)` lies inside the coprocessor-visible window
    #[must_use]
    pub fn contains(&self, addr: u32, len: usize) -> bool {
        let end = u64::from(addr) + len as u64;
        self.epi_base <= addr && end <= u64::from(self.epi_base) + u64::from(self.size)
    }
}

/// Parsed description file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description {
    /// Board name
    pub platform_version: Option<String>,
    /// Bridge register page
    pub sys_base: u32,
    /// Declared chip count (only the first chip is used)
    pub num_chips: u32,
    /// First chip, placed at its origin
    pub chip: Chip,
    /// Declared external memory count (only the first segment is used)
    pub num_ext_mems: u32,
    /// Name of the external memory segment
    pub emem_name: Option<String>,
    /// First external memory segment
    pub emem: ExternalMemory,
}

/// Parse description text.
///
/// Unknown keys are ignored, `#` starts a comment. `CHIP`, `CHIP_ROW` and
/// `CHIP_COL` are required; everything else defaults to the Parallella layout.
///
/// # Errors
///
/// Returns [`EhalError::Config`] on malformed values or missing chip keys.
pub fn parse_description(text: &str) -> Result<Description> {
    let mut platform_version = None;
    let mut sys_base = SYS_BASE;
    let mut num_chips = 1;
    let mut kind = None;
    let mut row = None;
    let mut col = None;
    let mut num_ext_mems = 1;
    let mut emem_name = None;
    let mut emem = ExternalMemory::default();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("");
        let mut fields = line.split_whitespace();
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };
        let lineno = idx + 1;

        match key {
            "PLATFORM_VERSION" => platform_version = Some(value.to_string()),
            "ESYS_REGS_BASE" => sys_base = page_aligned(key, parse_hex(key, value, lineno)?),
            "NUM_CHIPS" => num_chips = parse_dec(key, value, lineno)?,
            "CHIP" => {
                kind = ChipKind::from_name(value);
                if kind.is_none() {
                    tracing::warn!("CHIP {value} is not known");
                }
            }
            "CHIP_ROW" => row = Some(parse_dec(key, value, lineno)?),
            "CHIP_COL" => col = Some(parse_dec(key, value, lineno)?),
            "NUM_EXT_MEMS" => num_ext_mems = parse_dec(key, value, lineno)?,
            "EMEM" => emem_name = Some(value.to_string()),
            "EMEM_BASE_ADDRESS" => {
                emem.host_base = page_aligned(key, parse_hex(key, value, lineno)?);
            }
            "EMEM_EPI_BASE" => emem.epi_base = page_aligned(key, parse_hex(key, value, lineno)?),
            "EMEM_SIZE" => emem.size = page_aligned(key, parse_hex(key, value, lineno)?),
            "EMEM_TYPE" => match parse_access(value) {
                Some(access) => emem.access = access,
                None => tracing::warn!(
                    "EMEM_TYPE {value} not recognised, keeping {:?}",
                    emem.access
                ),
            },
            _ => tracing::trace!("ignoring description key {key}"),
        }
    }

    let (Some(kind), Some(row), Some(col)) = (kind, row, col) else {
        return Err(EhalError::config(
            "description does not determine chip type, row and column",
        ));
    };
    let chip = Chip::new(kind, row, col)?;

    if num_chips > 1 {
        tracing::warn!("NUM_CHIPS {num_chips}: only the first chip is used");
    }
    if num_ext_mems > 1 {
        tracing::warn!("NUM_EXT_MEMS {num_ext_mems}: only the first segment is used");
    }
    if sys_base & !addr::LOCAL_MASK == chip.origin().base() {
        tracing::debug!("ESYS_REGS_BASE {sys_base:#010x} overlaps the origin core's slot");
    }

    let desc = Description {
        platform_version,
        sys_base,
        num_chips,
        chip,
        num_ext_mems,
        emem_name,
        emem,
    };
    tracing::debug!("Description: {desc:?}");
    Ok(desc)
}

/// Read and parse a description file; the extension must be `.hdf`.
///
/// # Errors
///
/// Returns [`EhalError::Config`] if the file is missing, unreadable, has the
/// wrong extension or does not parse.
pub fn load_description(path: &Path) -> Result<Description> {
    if path.extension().and_then(|e| e.to_str()) != Some("hdf") {
        return Err(EhalError::config(format!(
            "{}: description files must have the .hdf extension",
            path.display()
        )));
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| EhalError::config(format!("cannot read {}: {e}", path.display())))?;
    parse_description(&text)
}

fn parse_hex(key: &str, value: &str, line: usize) -> Result<u32> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u32::from_str_radix(digits, 16)
        .map_err(|e| EhalError::config(format!("line {line}: {key} {value}: {e}")))
}

fn parse_dec(key: &str, value: &str, line: usize) -> Result<u32> {
    value
        .parse()
        .map_err(|e| EhalError::config(format!("line {line}: {key} {value}: {e}")))
}

fn page_aligned(key: &str, value: u32) -> u32 {
    if value & !PAGE_MASK != 0 {
        tracing::warn!("{key} not 4K page aligned: {value:#010x}");
    }
    value & PAGE_MASK
}

fn parse_access(value: &str) -> Option<Access> {
    match value {
        "RD" => Some(Access::Read),
        "WR" => Some(Access::Write),
        "RDWR" | "WRRD" => Some(Access::ReadWrite),
        _ => None,
    }
}

/// Everything [`crate::Session::bootstrap`] needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Device nodes, tried in order
    pub device_paths: Vec<PathBuf>,
    /// Bridge register page
    pub sys_base: u32,
    /// Expected chip; hardware identification overrides the kind
    pub chip: Chip,
    /// Shared DRAM segment
    pub emem: ExternalMemory,
    /// Description file the values came from, if any
    pub description: Option<PathBuf>,
}

impl Default for SessionConfig {
    /// A Parallella-16 with the stock bitstream
    fn default() -> Self {
        Self {
            device_paths: DEFAULT_DEVICE_PATHS.iter().map(PathBuf::from).collect(),
            sys_base: SYS_BASE,
            chip: Chip::parallella(ChipKind::E16G301),
            emem: ExternalMemory::default(),
            description: None,
        }
    }
}

impl SessionConfig {
    /// Build from a parsed description
    #[must_use]
    pub fn from_description(desc: &Description, path: Option<PathBuf>) -> Self {
        Self {
            sys_base: desc.sys_base,
            chip: desc.chip,
            emem: desc.emem,
            description: path,
            ..Self::default()
        }
    }

    /// Load the description file named by `path`
    ///
    /// # Errors
    ///
    /// See [`load_description`].
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let desc = load_description(&path)?;
        Ok(Self::from_description(&desc, Some(path)))
    }

    /// Load the description file named by `$EPIPHANY_HDF`
    ///
    /// # Errors
    ///
    /// Returns [`EhalError::Config`] if the variable is unset or the file is unusable.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var_os(HDF_ENV)
            .ok_or_else(|| EhalError::config(format!("{HDF_ENV} is not set")))?;
        Self::from_file(PathBuf::from(path))
    }

    /// Replace the device node list
    #[must_use]
    pub fn with_device_paths<P: Into<PathBuf>>(mut self, paths: impl IntoIterator<Item = P>) -> Self {
        self.device_paths = paths.into_iter().map(Into::into).collect();
        self
    }
}
