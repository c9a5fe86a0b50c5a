//! Silicon model for the Adapteva Epiphany E16G301 / E64G401.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the silicon: the mesh address encoding, the per-core memory
//! and register map, the host bridge register page, and chip/link geometry.
//!
//! Everything here follows the Epiphany Architecture Reference (REV 14.03.11)
//! and the Parallella board reference design.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`addr`] | Row/col/local address codec, `CoreId`, `GridRect` |
//! | [`regs`] | Core SRAM banks, IVT, register window offsets and bit fields |
//! | [`sys`] | Host bridge page (`ESYSCONFIG`, `ESYSRESET`, `ESYSINFO`, filter) |
//! | [`chip`] | Chip variants, origin, link cores and routing masks |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod addr;
pub mod chip;
pub mod regs;
pub mod sys;

pub use addr::{AddrError, CoreAddress, CoreId, GridRect};
pub use chip::{Chip, ChipKind, LinkDirection};
pub use regs::Field;
pub use sys::PlatformInfo;
