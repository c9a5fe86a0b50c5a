//! Mesh address codec.
//!
//! Every core owns a 1 MiB slot in the flat 32-bit coprocessor address space.
//! The slot index is the core's mesh coordinate:
//!
//! ```text
//!  31      26 25      20 19                              0
//! ┌──────────┬──────────┬─────────────────────────────────┐
//! │  row (6) │  col (6) │         local offset (20)       │
//! └──────────┴──────────┴─────────────────────────────────┘
//! ```
//!
//! A row/col of zero addresses the *issuing* core's own memory ("local"
//! address), which is why firmware images can be linked once and replicated.
//! Source: Epiphany Architecture Reference REV 14.03.11, §2.

use std::fmt;

/// Maximum mesh side length encodable in the 6-bit row/col fields.
pub const MAX_DIM: u32 = 64;

/// Bit position of the row field.
pub const ROW_SHIFT: u32 = 26;
/// Bit position of the column field.
pub const COL_SHIFT: u32 = 20;
/// Mask of a row or column id once shifted down.
pub const ID_MASK: u32 = MAX_DIM - 1;
/// Row field mask in a flat address.
pub const ROW_MASK: u32 = ID_MASK << ROW_SHIFT;
/// Column field mask in a flat address.
pub const COL_MASK: u32 = ID_MASK << COL_SHIFT;
/// Local offset mask (1 MiB per core).
pub const LOCAL_MASK: u32 = 0x000F_FFFF;
/// Size of one core's address slot.
pub const CORE_SLOT_SIZE: u32 = LOCAL_MASK + 1;

/// Address codec error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrError {
    /// Row outside `0..64`.
    RowOutOfRange(u32),
    /// Column outside `0..64`.
    ColOutOfRange(u32),
    /// Local offset outside the 1 MiB core slot.
    LocalOutOfRange(u32),
    /// Rectangle corners are not ordered (`begin` must be top-left).
    InvertedRect {
        /// Top-left corner as given.
        begin: CoreId,
        /// Bottom-right corner as given.
        end: CoreId,
    },
    /// Rectangle or square with no cores.
    EmptyRect,
}

impl fmt::Display for AddrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RowOutOfRange(r) => write!(f, "row {r} out of range 0..{MAX_DIM}"),
            Self::ColOutOfRange(c) => write!(f, "column {c} out of range 0..{MAX_DIM}"),
            Self::LocalOutOfRange(l) => {
                write!(f, "local offset {l:#x} exceeds core slot {CORE_SLOT_SIZE:#x}")
            }
            Self::InvertedRect { begin, end } => {
                write!(f, "grid corners {begin} .. {end} are not top-left/bottom-right")
            }
            Self::EmptyRect => f.write_str("grid must contain at least one core"),
        }
    }
}

impl std::error::Error for AddrError {}

/// Row id of a flat address.
#[must_use]
pub const fn row_of(addr: u32) -> u32 {
    (addr >> ROW_SHIFT) & ID_MASK
}

/// Column id of a flat address.
#[must_use]
pub const fn col_of(addr: u32) -> u32 {
    (addr >> COL_SHIFT) & ID_MASK
}

/// Local offset of a flat address.
#[must_use]
pub const fn local_of(addr: u32) -> u32 {
    addr & LOCAL_MASK
}

/// True if the address carries no row/col, i.e. refers to the issuing core.
#[must_use]
pub const fn is_local(addr: u32) -> bool {
    addr & (ROW_MASK | COL_MASK) == 0
}

/// Encode `(row, col, local)` into a flat address.
///
/// # Errors
///
/// Returns an error if any component exceeds its field width.
pub const fn encode(row: u32, col: u32, local: u32) -> Result<u32, AddrError> {
    if row >= MAX_DIM {
        return Err(AddrError::RowOutOfRange(row));
    }
    if col >= MAX_DIM {
        return Err(AddrError::ColOutOfRange(col));
    }
    if local > LOCAL_MASK {
        return Err(AddrError::LocalOutOfRange(local));
    }
    Ok((row << ROW_SHIFT) | (col << COL_SHIFT) | local)
}

/// Decode a flat address into `(row, col, local)`.
#[must_use]
pub const fn decode(addr: u32) -> (u32, u32, u32) {
    (row_of(addr), col_of(addr), local_of(addr))
}

/// Side length of a square sub-grid from its two diagonal corner addresses.
///
/// Core slots are numbered `row * 64 + col`, so walking the diagonal advances
/// 65 slots per step: `side = delta / 65 + 1`.
#[must_use]
pub const fn square_side(begin: u32, end: u32) -> u32 {
    let delta = (end >> COL_SHIFT).wrapping_sub(begin >> COL_SHIFT);
    delta / (MAX_DIM + 1) + 1
}

/// Mesh coordinate of one core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoreId {
    row: u8,
    col: u8,
}

impl CoreId {
    /// Create a validated core id.
    ///
    /// # Errors
    ///
    /// Returns an error if `row` or `col` is 64 or more.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(row: u32, col: u32) -> Result<Self, AddrError> {
        if row >= MAX_DIM {
            return Err(AddrError::RowOutOfRange(row));
        }
        if col >= MAX_DIM {
            return Err(AddrError::ColOutOfRange(col));
        }
        Ok(Self {
            row: row as u8,
            col: col as u8,
        })
    }

    /// Core owning a flat address.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_addr(addr: u32) -> Self {
        Self {
            row: row_of(addr) as u8,
            col: col_of(addr) as u8,
        }
    }

    /// Row id.
    #[must_use]
    pub const fn row(self) -> u32 {
        self.row as u32
    }

    /// Column id.
    #[must_use]
    pub const fn col(self) -> u32 {
        self.col as u32
    }

    /// Base address of this core's 1 MiB slot.
    #[must_use]
    pub const fn base(self) -> u32 {
        (self.row() << ROW_SHIFT) | (self.col() << COL_SHIFT)
    }

    /// Global address of SRAM bank 0.
    #[must_use]
    pub const fn bank_base(self) -> u32 {
        self.base() | crate::regs::BANK_LOCAL
    }

    /// Global address of the register window.
    #[must_use]
    pub const fn regs_base(self) -> u32 {
        self.base() | crate::regs::REGS_LOCAL
    }

    /// Flat address of `local` within this core.
    ///
    /// # Errors
    ///
    /// Returns an error if `local` is outside the core slot.
    pub const fn addr(self, local: u32) -> Result<u32, AddrError> {
        if local > LOCAL_MASK {
            return Err(AddrError::LocalOutOfRange(local));
        }
        Ok(self.base() | local)
    }

    /// Core at a row/column offset from this one.
    ///
    /// # Errors
    ///
    /// Returns an error if the result leaves the 64×64 mesh.
    pub const fn offset(self, rows: u32, cols: u32) -> Result<Self, AddrError> {
        let Some(row) = self.row().checked_add(rows) else {
            return Err(AddrError::RowOutOfRange(u32::MAX));
        };
        let Some(col) = self.col().checked_add(cols) else {
            return Err(AddrError::ColOutOfRange(u32::MAX));
        };
        Self::new(row, col)
    }

    /// Linear slot index (`row * 64 + col`).
    #[must_use]
    pub const fn slot(self) -> u32 {
        self.row() * MAX_DIM + self.col()
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:2},{:2}]", self.row, self.col)
    }
}

/// Core coordinate plus local offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoreAddress {
    /// Owning core.
    pub core: CoreId,
    /// Offset inside the core slot.
    pub local: u32,
}

impl CoreAddress {
    /// Decode a flat address.
    #[must_use]
    pub const fn from_addr(addr: u32) -> Self {
        Self {
            core: CoreId::from_addr(addr),
            local: local_of(addr),
        }
    }

    /// Encode back to a flat address.
    ///
    /// # Errors
    ///
    /// Returns an error if `local` is outside the core slot.
    pub const fn to_addr(self) -> Result<u32, AddrError> {
        self.core.addr(self.local)
    }
}

/// Inclusive rectangle of cores, `begin` top-left, `end` bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridRect {
    begin: CoreId,
    end: CoreId,
}

impl GridRect {
    /// Create a rectangle from its corners.
    ///
    /// # Errors
    ///
    /// Returns an error if `begin` is below or right of `end`.
    pub const fn new(begin: CoreId, end: CoreId) -> Result<Self, AddrError> {
        if begin.row > end.row || begin.col > end.col {
            return Err(AddrError::InvertedRect { begin, end });
        }
        Ok(Self { begin, end })
    }

    /// Square of `side` cores starting at `origin`.
    ///
    /// # Errors
    ///
    /// Returns an error if the square leaves the 64×64 mesh or `side` is 0.
    pub const fn square(origin: CoreId, side: u32) -> Result<Self, AddrError> {
        if side == 0 {
            return Err(AddrError::EmptyRect);
        }
        match origin.offset(side - 1, side - 1) {
            Ok(end) => Ok(Self { begin: origin, end }),
            Err(e) => Err(e),
        }
    }

    /// Square whose far corner is known to fit (origin row/col + side ≤ 64).
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn square_unchecked(origin: CoreId, side: u32) -> Self {
        Self {
            begin: origin,
            end: CoreId {
                row: (origin.row() + side - 1) as u8,
                col: (origin.col() + side - 1) as u8,
            },
        }
    }

    /// Top-left core.
    #[must_use]
    pub const fn begin(&self) -> CoreId {
        self.begin
    }

    /// Bottom-right core.
    #[must_use]
    pub const fn end(&self) -> CoreId {
        self.end
    }

    /// Number of rows.
    #[must_use]
    pub const fn rows(&self) -> u32 {
        self.end.row() - self.begin.row() + 1
    }

    /// Number of columns.
    #[must_use]
    pub const fn cols(&self) -> u32 {
        self.end.col() - self.begin.col() + 1
    }

    /// Number of cores.
    #[must_use]
    pub const fn len(&self) -> usize {
        (self.rows() * self.cols()) as usize
    }

    /// Always false, a rectangle holds at least one core.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// True if `core` lies inside the rectangle.
    #[must_use]
    pub const fn contains(&self, core: CoreId) -> bool {
        self.begin.row <= core.row
            && core.row <= self.end.row
            && self.begin.col <= core.col
            && core.col <= self.end.col
    }

    /// Row-major iterator over the cores.
    pub fn iter(&self) -> impl Iterator<Item = CoreId> + '_ {
        let (b, e) = (self.begin, self.end);
        (b.row..=e.row).flat_map(move |row| (b.col..=e.col).map(move |col| CoreId { row, col }))
    }
}

impl fmt::Display for GridRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} .. {}", self.begin, self.end)
    }
}
