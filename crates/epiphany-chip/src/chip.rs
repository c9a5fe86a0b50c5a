//! Chip variants and link geometry.
//!
//! A chip is a square grid of cores placed somewhere in the 64×64 mesh. Each
//! edge of the chip carries one off-chip link, driven by the core that sits
//! on that edge (the "link core"). The host bridge reaches the chip through
//! the East link on Parallella boards.

use std::fmt;

use crate::addr::{AddrError, CoreId, GridRect};
use crate::sys::Platform;

/// Default chip origin row on Parallella boards.
pub const DEFAULT_ORIGIN_ROW: u32 = 32;
/// Default chip origin column on Parallella boards.
pub const DEFAULT_ORIGIN_COL: u32 = 8;

/// Supported chip variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipKind {
    /// 16-core, 4×4.
    E16G301,
    /// 64-core, 8×8.
    E64G401,
}

impl ChipKind {
    /// Grid side length.
    #[must_use]
    pub const fn side(self) -> u32 {
        match self {
            Self::E16G301 => 4,
            Self::E64G401 => 8,
        }
    }

    /// Number of cores.
    #[must_use]
    pub const fn cores(self) -> u32 {
        self.side() * self.side()
    }

    /// Part name as printed on the package.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::E16G301 => "E16G301",
            Self::E64G401 => "E64G401",
        }
    }

    /// Chip fitted on a board platform, if known.
    #[must_use]
    pub const fn from_platform(platform: Platform) -> Option<Self> {
        match platform {
            Platform::E16Z7020Gpio
            | Platform::E16Z7020NoGpio
            | Platform::E16Z7010Gpio
            | Platform::E16Z7010NoGpio => Some(Self::E16G301),
            Platform::E64Z7020Gpio => Some(Self::E64G401),
            Platform::Undefined => None,
        }
    }

    /// Parse a part name (case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("E16G301") {
            Some(Self::E16G301)
        } else if name.eq_ignore_ascii_case("E64G401") {
            Some(Self::E64G401)
        } else {
            None
        }
    }

    /// Position of the link core for `dir`, relative to the chip origin.
    #[must_use]
    pub const fn link_core(self, dir: LinkDirection) -> (u32, u32) {
        let last = self.side() - 1;
        match (self, dir) {
            (_, LinkDirection::North) => (0, 2),
            (Self::E16G301, LinkDirection::East) => (2, last),
            (Self::E64G401, LinkDirection::East) => (2, 7),
            (_, LinkDirection::South) => (last, 2),
            (Self::E16G301, LinkDirection::West) => (2, 0),
            (Self::E64G401, LinkDirection::West) => (2, 4),
        }
    }

    /// True if the host bridge link needs the explicit enable sequence.
    #[must_use]
    pub const fn needs_link_enable(self) -> bool {
        matches!(self, Self::E16G301)
    }
}

impl fmt::Display for ChipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Off-chip link direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    /// North edge.
    North = 0,
    /// East edge.
    East = 1,
    /// South edge.
    South = 2,
    /// West edge.
    West = 3,
}

impl LinkDirection {
    /// Mesh control mode routing a bridge transaction out of this link.
    ///
    /// Written to `ESYSCONFIG.trans_ctrl_mode`: North `0x1`, East `0x5`,
    /// South `0x9`, West `0xD`.
    #[must_use]
    pub const fn routing_mask(self) -> u32 {
        ((self as u32) << 2) | 1
    }
}

/// A chip placed in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chip {
    kind: ChipKind,
    rect: GridRect,
}

impl Chip {
    /// Place a chip with its top-left core at `(row, col)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the chip does not fit in the 64×64 mesh.
    pub const fn new(kind: ChipKind, row: u32, col: u32) -> Result<Self, AddrError> {
        let origin = match CoreId::new(row, col) {
            Ok(o) => o,
            Err(e) => return Err(e),
        };
        match GridRect::square(origin, kind.side()) {
            Ok(rect) => Ok(Self { kind, rect }),
            Err(e) => Err(e),
        }
    }

    /// Chip at the default Parallella origin `[32, 8]`.
    #[must_use]
    pub const fn parallella(kind: ChipKind) -> Self {
        let origin = CoreId::from_addr((DEFAULT_ORIGIN_ROW << 26) | (DEFAULT_ORIGIN_COL << 20));
        Self {
            kind,
            rect: GridRect::square_unchecked(origin, kind.side()),
        }
    }

    /// Variant.
    #[must_use]
    pub const fn kind(&self) -> ChipKind {
        self.kind
    }

    /// Top-left core.
    #[must_use]
    pub const fn origin(&self) -> CoreId {
        self.rect.begin()
    }

    /// Cores covered by the chip.
    #[must_use]
    pub const fn rect(&self) -> GridRect {
        self.rect
    }

    /// Absolute id of the link core for `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the link core lies outside the mesh.
    pub const fn link_core(&self, dir: LinkDirection) -> Result<CoreId, AddrError> {
        let (r, c) = self.kind.link_core(dir);
        self.origin().offset(r, c)
    }
}

impl fmt::Display for Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.kind, self.origin())
    }
}
