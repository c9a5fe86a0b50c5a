//! Host bridge ("system") register page.
//!
//! The FPGA bridge between the host and the chip exposes one 4 KiB page that
//! aliases the register window of the chip-origin core. Only the top of the
//! page is populated. Offsets below are relative to the page base
//! ([`SYS_BASE`] by default).

use crate::regs::Field;

/// Default bridge page base (register window of core `[32, 8]`).
pub const SYS_BASE: u32 = 0x808F_0000;
/// Bridge page size.
pub const SYS_SIZE: u32 = 0x1000;

// ── Registers ────────────────────────────────────────────────────────────────

/// System configuration (link control, mesh control mode).
pub const ESYSCONFIG: u32 = 0xF00;
/// System reset (write any value).
pub const ESYSRESET: u32 = 0xF04;
/// Platform information (read-only).
pub const ESYSINFO: u32 = 0xF08;
/// Transaction filter, low address.
pub const ESYSFILTERL: u32 = 0xF0C;
/// Transaction filter, high address.
pub const ESYSFILTERH: u32 = 0xF10;
/// Transaction filter capture.
pub const ESYSFILTERC: u32 = 0xF14;

/// `ESYSCONFIG` fields.
pub mod esysconfig {
    use super::Field;
    /// Read timeout enable.
    pub const TRANS_READ_TIMEOUT: Field = Field::bit(0);
    /// Filter mode.
    pub const FILTER: Field = Field::new(1, 2);
    /// Link enable.
    pub const ELINK_ENABLE: Field = Field::bit(3);
    /// Control mode applied to bridge-issued transactions.
    pub const TRANS_CTRL_MODE: Field = Field::new(28, 4);
}

/// `ESYSINFO` fields.
pub mod esysinfo {
    use super::Field;
    /// Platform id, see [`super::Platform`].
    pub const PLATFORM: Field = Field::new(0, 8);
    /// FPGA bitstream flavour, see [`super::FpgaLoadType`].
    pub const FPGA_LOAD_TYPE: Field = Field::new(8, 8);
    /// Bitstream revision.
    pub const REVISION: Field = Field::new(16, 8);
}

/// `ESYSFILTERC` fields.
pub mod esysfilterc {
    use super::Field;
    /// Capture status.
    pub const STATUS: Field = Field::new(0, 2);
    /// Captured address (word aligned).
    pub const CAPTURED_ADDR: Field = Field::new(2, 30);
}

// ── Platform decoding ────────────────────────────────────────────────────────

/// Board platform reported by `ESYSINFO.platform`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Unknown or not programmed.
    Undefined,
    /// Parallella 1.x, E16, Zynq 7020, GPIO wired.
    E16Z7020Gpio,
    /// Parallella 1.x, E16, Zynq 7020, no GPIO.
    E16Z7020NoGpio,
    /// Parallella 1.x, E16, Zynq 7010, GPIO wired.
    E16Z7010Gpio,
    /// Parallella 1.x, E16, Zynq 7010, no GPIO.
    E16Z7010NoGpio,
    /// Parallella 1.x, E64, Zynq 7020, GPIO wired.
    E64Z7020Gpio,
}

impl Platform {
    /// Decode the raw platform id.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::E16Z7020Gpio,
            2 => Self::E16Z7020NoGpio,
            3 => Self::E16Z7010Gpio,
            4 => Self::E16Z7010NoGpio,
            5 => Self::E64Z7020Gpio,
            _ => Self::Undefined,
        }
    }

    /// Board description string.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::E16Z7020Gpio => "parallella-1.x,e16,7z020,gpio",
            Self::E16Z7020NoGpio => "parallella-1.x,e16,7z020,no-gpio",
            Self::E16Z7010Gpio => "parallella-1.x,e16,7z010,gpio",
            Self::E16Z7010NoGpio => "parallella-1.x,e16,7z010,no-gpio",
            Self::E64Z7020Gpio => "parallella-1.x,e64,7z020,gpio",
        }
    }
}

/// Bitstream flavour reported by `ESYSINFO.fpga_load_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpgaLoadType {
    /// Unknown.
    Undefined,
    /// HDMI bitstream.
    Hdmi,
    /// Headless bitstream.
    Headless,
}

impl FpgaLoadType {
    /// Decode the raw load type.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Hdmi,
            2 => Self::Headless,
            _ => Self::Undefined,
        }
    }

    /// Description string.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Hdmi => "hdmi, gpio unused",
            Self::Headless => "headless, gpio unused",
        }
    }
}

/// Decoded `ESYSINFO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformInfo {
    /// Board.
    pub platform: Platform,
    /// Raw platform id as read.
    pub platform_raw: u32,
    /// Bitstream flavour.
    pub fpga_load_type: FpgaLoadType,
    /// Bitstream revision.
    pub revision: u32,
}

impl PlatformInfo {
    /// Decode a raw `ESYSINFO` value.
    #[must_use]
    pub const fn decode(raw: u32) -> Self {
        let platform_raw = esysinfo::PLATFORM.get(raw);
        Self {
            platform: Platform::from_raw(platform_raw),
            platform_raw,
            fpga_load_type: FpgaLoadType::from_raw(esysinfo::FPGA_LOAD_TYPE.get(raw)),
            revision: esysinfo::REVISION.get(raw),
        }
    }
}
