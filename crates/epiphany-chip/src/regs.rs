//! Per-core memory and register map.
//!
//! Every core slot (see [`crate::addr`]) contains 32 KiB of SRAM at local
//! offset 0 and a 4 KiB memory-mapped register window at local `0xF0000`.
//! All register offsets below are relative to [`REGS_LOCAL`].
//!
//! ```text
//! 0x00000 ┌────────────────┐ bank 0  (IVT lives at the start)
//! 0x02000 │                │ bank 1
//! 0x04000 │   32 KiB SRAM  │ bank 2
//! 0x06000 │                │ bank 3
//! 0x08000 └────────────────┘
//!    ...      (reserved)
//! 0xF0000 ┌────────────────┐ R0..R63
//! 0xF0300 │  4 KiB regs    │ chip I/O (link) registers
//! 0xF0400 │                │ core control / status / IRQ
//! 0xF0500 │                │ DMA channels
//! 0xF0600 │                │ memory protection
//! 0xF0700 └────────────────┘ mesh node control
//! ```
//!
//! Source: Epiphany Architecture Reference REV 14.03.11, §6–§8 and Appendix B.

// ── Local memory ─────────────────────────────────────────────────────────────

/// Local offset of SRAM bank 0.
pub const BANK_LOCAL: u32 = 0x0000_0000;
/// Size of one SRAM bank.
pub const BANK_SIZE: u32 = 0x2000;
/// Number of SRAM banks per core.
pub const BANK_COUNT: u32 = 4;
/// Total core SRAM (all banks).
pub const SRAM_SIZE: u32 = BANK_SIZE * BANK_COUNT;

/// Local offset of the register window.
pub const REGS_LOCAL: u32 = 0x000F_0000;
/// Size of the register window (one host page).
pub const REGS_SIZE: u32 = 0x1000;

/// Interrupt vector table, byte offsets from local address 0.
pub mod ivt {
    /// Sync (reset) vector.
    pub const SYNC: u32 = 0x00;
    /// Software exception.
    pub const SOFTWARE_EXCEPTION: u32 = 0x04;
    /// Memory protection fault.
    pub const MEMORY_FAULT: u32 = 0x08;
    /// Core timer 0 expired.
    pub const TIMER0: u32 = 0x0C;
    /// Core timer 1 expired.
    pub const TIMER1: u32 = 0x10;
    /// Message interrupt.
    pub const MESSAGE: u32 = 0x14;
    /// DMA channel 0 done.
    pub const DMA0: u32 = 0x18;
    /// DMA channel 1 done.
    pub const DMA1: u32 = 0x1C;
    /// WAND barrier.
    pub const WAND: u32 = 0x20;
    /// User (software) interrupt.
    pub const USER: u32 = 0x24;
    /// Number of vectors.
    pub const COUNT: u32 = 10;
}

// ── Bit field accessor ───────────────────────────────────────────────────────

/// A contiguous bit field inside a 32-bit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Position of the least significant bit.
    pub shift: u32,
    /// Width in bits (1..=32).
    pub width: u32,
}

impl Field {
    /// Field of `width` bits starting at `shift`.
    #[must_use]
    pub const fn new(shift: u32, width: u32) -> Self {
        Self { shift, width }
    }

    /// Single-bit field.
    #[must_use]
    pub const fn bit(shift: u32) -> Self {
        Self { shift, width: 1 }
    }

    /// Mask of the field, shifted into position.
    #[must_use]
    pub const fn mask(self) -> u32 {
        let raw = if self.width >= 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        };
        raw << self.shift
    }

    /// Extract the field from a register value.
    #[must_use]
    pub const fn get(self, reg: u32) -> u32 {
        (reg & self.mask()) >> self.shift
    }

    /// Return `reg` with the field replaced by `value` (excess bits dropped).
    #[must_use]
    pub const fn set(self, reg: u32, value: u32) -> u32 {
        (reg & !self.mask()) | ((value << self.shift) & self.mask())
    }
}

// ── General purpose registers ────────────────────────────────────────────────

/// R0.
pub const R0: u32 = 0x000;
/// Number of general purpose registers.
pub const GPR_COUNT: u32 = 64;

/// Offset of general purpose register `n` (`0..64`).
#[must_use]
pub const fn gpr(n: u32) -> u32 {
    R0 + 4 * (n % GPR_COUNT)
}

// ── Chip I/O (link) registers ────────────────────────────────────────────────
// Only present on the cores adjacent to a chip edge link; see `chip::link_core`.

/// Link mode (clock divider) configuration.
pub const ELINKMODECFG: u32 = 0x300;
/// Link transmit configuration.
pub const ELINKTXCFG: u32 = 0x304;
/// Link receive configuration.
pub const ELINKRXCFG: u32 = 0x308;
/// GPIO configuration.
pub const GPIOCFG: u32 = 0x30C;
/// Flag pin configuration.
pub const FLAGCFG: u32 = 0x318;
/// Chip sync.
pub const CHIPSYNC: u32 = 0x31C;
/// Chip halt.
pub const CHIPHALT: u32 = 0x320;
/// Chip reset.
pub const CHIPRESET: u32 = 0x324;
/// Link debug.
pub const ELINKDEBUG: u32 = 0x328;

/// `ELINKMODECFG` fields.
pub mod elinkmodecfg {
    use super::Field;
    /// Link clock divider. `0` = cclk/2, `1` = cclk/4, `2` = cclk/8.
    pub const LCLK: Field = Field::new(0, 4);
    /// Link clock at cclk/4.
    pub const LCLK_DIV4: u32 = 1;
}

/// `ELINKTXCFG` / `ELINKRXCFG` fields.
pub mod elinkcfg {
    use super::Field;
    /// Per-lane low power control.
    pub const LOW_POWER: Field = Field::new(0, 12);
}

/// `FLAGCFG` fields.
pub mod flagcfg {
    use super::Field;
    /// Flag pin selection.
    pub const FLAG: Field = Field::new(0, 6);
}

/// `ELINKDEBUG` fields.
pub mod elinkdebug {
    use super::Field;
    /// Drive a constant pattern on the transmit link.
    pub const SET_CONSTANT_ON_LINK_TX: Field = Field::bit(0);
    /// Loop transmit back to receive.
    pub const LOOPBACK: Field = Field::bit(1);
    /// Constant pattern.
    pub const CONSTANT: Field = Field::new(2, 12);
    /// Force address match.
    pub const FORCE_MATCH: Field = Field::bit(14);
}

// ── Core control and status ──────────────────────────────────────────────────

/// Core configuration.
pub const CONFIG: u32 = 0x400;
/// Core status.
pub const STATUS: u32 = 0x404;
/// Program counter.
pub const PC: u32 = 0x408;
/// Debug status.
pub const DEBUGSTATUS: u32 = 0x40C;
/// Loop counter.
pub const LC: u32 = 0x414;
/// Loop start.
pub const LS: u32 = 0x418;
/// Loop end.
pub const LE: u32 = 0x41C;
/// Interrupt return address.
pub const IRET: u32 = 0x420;
/// Interrupt mask.
pub const IMASK: u32 = 0x424;
/// Interrupt latch.
pub const ILAT: u32 = 0x428;
/// Interrupt latch set (write-only).
pub const ILATST: u32 = 0x42C;
/// Interrupt latch clear (write-only).
pub const ILATCL: u32 = 0x430;
/// Interrupts pending.
pub const IPEND: u32 = 0x434;
/// Core timer 0.
pub const CTIMER0: u32 = 0x438;
/// Core timer 1.
pub const CTIMER1: u32 = 0x43C;
/// Alternate status write (debug).
pub const FSTATUS: u32 = 0x440;
/// Debug command.
pub const DEBUG: u32 = 0x448;

/// `CONFIG` fields.
pub mod config {
    use super::Field;
    /// Rounding mode (truncate when set).
    pub const RMODE: Field = Field::bit(0);
    /// Invalid exception enable.
    pub const IEN: Field = Field::bit(1);
    /// Overflow exception enable.
    pub const OEN: Field = Field::bit(2);
    /// Underflow exception enable.
    pub const UEN: Field = Field::bit(3);
    /// Timer 0 event select.
    pub const CTIMER0CFG: Field = Field::new(4, 4);
    /// Timer 1 event select.
    pub const CTIMER1CFG: Field = Field::new(8, 4);
    /// Mesh control mode for outgoing transactions.
    pub const CTRLMODE: Field = Field::new(12, 4);
    /// Arithmetic mode (FPU / signed / unsigned integer).
    pub const ARITHMODE: Field = Field::new(17, 3);
    /// Low power mode.
    pub const LPMODE: Field = Field::bit(22);
    /// Timer wrap.
    pub const TIMERWRAP: Field = Field::bit(26);
    /// Clock divider ratio.
    pub const CLKDIVRATIO: Field = Field::new(28, 4);
}

/// `STATUS` fields.
pub mod status {
    use super::Field;
    /// Core is running.
    pub const ACTIVE: Field = Field::bit(0);
    /// Global interrupt disable.
    pub const GID: Field = Field::bit(1);
    /// WAND barrier flag.
    pub const WAND: Field = Field::bit(3);
    /// Integer zero.
    pub const AZ: Field = Field::bit(4);
    /// Integer negative.
    pub const AN: Field = Field::bit(5);
    /// Integer carry.
    pub const AC: Field = Field::bit(6);
    /// Integer overflow.
    pub const AV: Field = Field::bit(7);
    /// FPU zero.
    pub const BZ: Field = Field::bit(8);
    /// FPU negative.
    pub const BN: Field = Field::bit(9);
    /// FPU overflow.
    pub const BV: Field = Field::bit(10);
    /// Sticky integer overflow.
    pub const AVS: Field = Field::bit(12);
    /// Sticky FPU invalid.
    pub const BIS: Field = Field::bit(13);
    /// Sticky FPU overflow.
    pub const BVS: Field = Field::bit(14);
    /// Sticky FPU underflow.
    pub const BUS: Field = Field::bit(15);
    /// Exception cause.
    pub const EXCAUSE: Field = Field::new(16, 2);
    /// External load stalled.
    pub const EXT_LOAD_STALLED: Field = Field::bit(18);
    /// External fetch stalled.
    pub const EXT_FETCH_STALLED: Field = Field::bit(19);
}

/// `DEBUGSTATUS` fields.
pub mod debugstatus {
    use super::Field;
    /// Core halted.
    pub const HALT: Field = Field::bit(0);
    /// External load pending.
    pub const EXT_PEND: Field = Field::bit(1);
    /// Multicore breakpoint.
    pub const MBKPT: Field = Field::bit(2);
}

/// `DEBUG` fields.
pub mod debug {
    use super::Field;
    /// Debug command.
    pub const COMMAND: Field = Field::new(0, 2);
    /// Halt the core.
    pub const HALT: u32 = 1;
    /// Resume the core.
    pub const RUN: u32 = 0;
}

// ── DMA ──────────────────────────────────────────────────────────────────────

/// DMA channel 0 register block.
pub const DMA0: u32 = 0x500;
/// DMA channel 1 register block.
pub const DMA1: u32 = DMA0 + DMA_STRIDE;
/// Stride between DMA channel blocks.
pub const DMA_STRIDE: u32 = 0x20;
/// Number of DMA channels.
pub const DMA_CHANNELS: u32 = 2;

/// Register offsets inside a DMA channel block.
pub mod dma {
    use super::Field;

    /// Channel configuration.
    pub const CONFIG: u32 = 0x00;
    /// Source/destination strides.
    pub const STRIDE: u32 = 0x04;
    /// Inner/outer loop counts.
    pub const COUNT: u32 = 0x08;
    /// Source address.
    pub const SRCADDR: u32 = 0x0C;
    /// Destination address.
    pub const DSTADDR: u32 = 0x10;
    /// Auto-DMA register 0.
    pub const AUTODMA0: u32 = 0x14;
    /// Auto-DMA register 1.
    pub const AUTODMA1: u32 = 0x18;
    /// Channel status.
    pub const STATUS: u32 = 0x1C;

    /// `CONFIG` fields.
    pub mod config {
        use super::Field;
        /// Channel enable.
        pub const DMAEN: Field = Field::bit(0);
        /// Master mode.
        pub const MASTER: Field = Field::bit(1);
        /// Chain to next descriptor.
        pub const CHAINMODE: Field = Field::bit(2);
        /// Fetch descriptor on start.
        pub const STARTUP: Field = Field::bit(3);
        /// Interrupt on completion.
        pub const IRQEN: Field = Field::bit(4);
        /// Transfer element size (byte, half, word, double).
        pub const DATASIZE: Field = Field::new(5, 2);
        /// Message mode.
        pub const MSGMODE: Field = Field::bit(10);
        /// Shift source address inner stride.
        pub const SHIFT_SRC_IN: Field = Field::bit(12);
        /// Shift destination address inner stride.
        pub const SHIFT_DST_IN: Field = Field::bit(13);
        /// Shift source address outer stride.
        pub const SHIFT_SRC_OUT: Field = Field::bit(14);
        /// Shift destination address outer stride.
        pub const SHIFT_DST_OUT: Field = Field::bit(15);
        /// Next descriptor pointer.
        pub const NEXT_PTR: Field = Field::new(16, 16);
    }

    /// `COUNT` fields.
    pub mod count {
        use super::Field;
        /// Inner loop count.
        pub const INNER: Field = Field::new(0, 16);
        /// Outer loop count.
        pub const OUTER: Field = Field::new(16, 16);
    }

    /// `STATUS` fields.
    pub mod status {
        use super::Field;
        /// Channel state machine.
        pub const DMASTATE: Field = Field::new(0, 4);
        /// Current descriptor pointer.
        pub const CURR_PTR: Field = Field::new(16, 16);
    }
}

/// Offset of register `reg` (a [`dma`] offset) in DMA channel `ch`.
#[must_use]
pub const fn dma_reg(ch: u32, reg: u32) -> u32 {
    DMA0 + (ch % DMA_CHANNELS) * DMA_STRIDE + reg
}

// ── Memory protection ────────────────────────────────────────────────────────

/// Memory fault status.
pub const MEMSTATUS: u32 = 0x604;
/// Memory protection configuration.
pub const MEMPROTECT: u32 = 0x608;

/// `MEMSTATUS` fields.
pub mod memstatus {
    use super::Field;
    /// Memory fault occurred.
    pub const MEM_FAULT: Field = Field::bit(2);
    /// Protected read breach.
    pub const READ_BREACH: Field = Field::bit(10);
    /// Protected write breach.
    pub const WRITE_BREACH: Field = Field::bit(11);
    /// Core write breach.
    pub const CWRITE_BREACH: Field = Field::bit(12);
    /// External write breach.
    pub const XWRITE_BREACH: Field = Field::bit(13);
}

/// `MEMPROTECT` fields.
pub mod memprotect {
    use super::Field;
    /// Per-page write protection (8 × 4 KiB pages).
    pub const PAGES: Field = Field::new(0, 8);
    /// Disable external reads.
    pub const DIS_EXT_RD: Field = Field::bit(10);
    /// Disable external writes to register window.
    pub const DIS_EXT_WR_MMR: Field = Field::bit(11);
    /// Disable external writes to SRAM.
    pub const DIS_EXT_WR_MEM: Field = Field::bit(12);
    /// Disable core writes to its own memory.
    pub const DIS_CORE_CWR: Field = Field::bit(13);
    /// Disable core writes to other cores.
    pub const DIS_CORE_XWR: Field = Field::bit(14);
    /// Raise exception on breach.
    pub const EXC_EN: Field = Field::bit(15);
}

// ── Mesh node control ────────────────────────────────────────────────────────

/// Mesh node configuration.
pub const MESHCONFIG: u32 = 0x700;
/// Core id (row/col), read-only.
pub const COREID: u32 = 0x704;
/// Multicast group id.
pub const MULTICAST: u32 = 0x708;
/// Core reset.
pub const CORERESET: u32 = 0x70C;
/// cMesh route configuration.
pub const CMESHROUTE: u32 = 0x710;
/// xMesh route configuration.
pub const XMESHROUTE: u32 = 0x714;
/// rMesh route configuration.
pub const RMESHROUTE: u32 = 0x718;

/// `MESHCONFIG` fields.
pub mod meshconfig {
    use super::Field;
    /// Mesh low power mode.
    pub const LPMODE: Field = Field::bit(1);
    /// Mesh event 1 select.
    pub const MESHEVENT1: Field = Field::new(4, 4);
    /// Mesh event 0 select.
    pub const MESHEVENT0: Field = Field::new(8, 4);
    /// Block west.
    pub const WEST: Field = Field::bit(12);
    /// Block east.
    pub const EAST: Field = Field::bit(13);
    /// Block north.
    pub const NORTH: Field = Field::bit(14);
    /// Block south.
    pub const SOUTH: Field = Field::bit(15);
}

/// `COREID` fields.
pub mod coreid {
    use super::Field;
    /// Column id.
    pub const COL: Field = Field::new(0, 6);
    /// Row id.
    pub const ROW: Field = Field::new(6, 6);
}

/// `MULTICAST` fields.
pub mod multicast {
    use super::Field;
    /// Multicast group.
    pub const ID: Field = Field::new(0, 12);
}

/// `CORERESET` fields.
pub mod corereset {
    use super::Field;
    /// Hold core in reset.
    pub const RESET: Field = Field::bit(0);
}

/// `CMESHROUTE` / `XMESHROUTE` / `RMESHROUTE` fields.
pub mod meshroute {
    use super::Field;
    /// North port.
    pub const NORTH: Field = Field::new(0, 3);
    /// East port.
    pub const EAST: Field = Field::new(3, 3);
    /// South port.
    pub const SOUTH: Field = Field::new(6, 3);
    /// West port.
    pub const WEST: Field = Field::new(9, 3);
}
