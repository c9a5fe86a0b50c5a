//! Per-core identity mapping of a rectangle of the mesh
//!
//! Each core contributes two windows: its 32 KiB SRAM and its 4 KiB register
//! page. Both are mapped `NoReplace`, so a second mapping of the same core (or
//! any stray mapping in the range) fails with `EEXIST` instead of silently
//! aliasing.
//!
//! The bridge register page sits in the register window of the chip-origin
//! core. When that page is already mapped, the grid leaves the origin core's
//! register window to it.

use epiphany_chip::regs::{REGS_SIZE, SRAM_SIZE};
use epiphany_chip::{CoreId, GridRect};

use crate::error::{EhalError, Result};
use crate::mmio::{Access, HwBackend, MapRequest, Placement};

/// Which of a core's two windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreWindow {
    /// 32 KiB SRAM at local 0
    Bank,
    /// 4 KiB register page at local `0xF0000`
    Regs,
}

impl CoreWindow {
    /// Global address of this window in `core`
    #[must_use]
    pub const fn base(self, core: CoreId) -> u32 {
        match self {
            Self::Bank => core.bank_base(),
            Self::Regs => core.regs_base(),
        }
    }

    /// Window length
    #[must_use]
    pub const fn len(self) -> usize {
        match self {
            Self::Bank => SRAM_SIZE as usize,
            Self::Regs => REGS_SIZE as usize,
        }
    }

    /// Local offset range covered by this window
    #[must_use]
    pub const fn local_range(self) -> (u32, u32) {
        match self {
            Self::Bank => (0, SRAM_SIZE),
            Self::Regs => (
                epiphany_chip::regs::REGS_LOCAL,
                epiphany_chip::regs::REGS_LOCAL + REGS_SIZE,
            ),
        }
    }

    /// Window containing `[local, local + len)`, if any
    #[must_use]
    pub fn of_local(local: u32, len: usize) -> Option<Self> {
        let end = u64::from(local) + len as u64;
        [Self::Bank, Self::Regs].into_iter().find(|w| {
            let (lo, hi) = w.local_range();
            lo <= local && end <= u64::from(hi)
        })
    }

    fn name(self) -> &'static str {
        match self {
            Self::Bank => "bank",
            Self::Regs => "regs",
        }
    }
}

/// A mapped rectangle of cores
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridMapping {
    rect: GridRect,
    /// Core whose register window belongs to the bridge page mapping
    shared_regs: Option<CoreId>,
}

impl GridMapping {
    /// Mapped cores
    #[must_use]
    pub const fn rect(&self) -> GridRect {
        self.rect
    }

    /// True if `[local, local + len)` of `core` is backed by a mapping
    #[must_use]
    pub fn covers(&self, core: CoreId, local: u32, len: usize) -> bool {
        self.rect.contains(core) && CoreWindow::of_local(local, len).is_some()
    }

    fn maps(&self, core: CoreId, window: CoreWindow) -> bool {
        !(window == CoreWindow::Regs && self.shared_regs == Some(core))
    }
}

/// Progress of one core during mapping
#[derive(Debug, Clone, Copy)]
struct Entry {
    core: CoreId,
    bank: bool,
    regs: bool,
}

/// Map every core of `rect`, row-major, bank before registers.
///
/// `sys_page` is the address of an already mapped bridge register page; a
/// core whose register window starts there is left to that mapping.
///
/// On failure every window mapped so far is unmapped in reverse completion
/// order before the error is returned, so no partial grid survives.
///
/// # Errors
///
/// Returns [`EhalError::Map`] naming the failing core and window.
pub fn map_grid<B: HwBackend + ?Sized>(
    backend: &mut B,
    rect: GridRect,
    sys_page: Option<u32>,
) -> Result<GridMapping> {
    let mapping = GridMapping {
        rect,
        shared_regs: sys_page.and_then(|base| rect.iter().find(|c| c.regs_base() == base)),
    };
    tracing::debug!("Mapping cores {rect} ({} cores)", rect.len());

    let mut stack: Vec<Entry> = Vec::with_capacity(rect.len());
    for core in rect.iter() {
        stack.push(Entry {
            core,
            bank: false,
            regs: false,
        });
        if let Err(e) = map_core(backend, &mapping, &mut stack) {
            tracing::error!("{e}! Cleaning up...");
            rollback(backend, &mapping, stack);
            return Err(e);
        }
    }

    tracing::info!("Mapped {} cores {rect}", rect.len());
    Ok(mapping)
}

fn map_core<B: HwBackend + ?Sized>(
    backend: &mut B,
    mapping: &GridMapping,
    stack: &mut [Entry],
) -> Result<()> {
    let Some(entry) = stack.last_mut() else {
        return Ok(());
    };
    map_window(backend, entry.core, CoreWindow::Bank)?;
    entry.bank = true;
    if mapping.maps(entry.core, CoreWindow::Regs) {
        map_window(backend, entry.core, CoreWindow::Regs)?;
        entry.regs = true;
    } else {
        tracing::debug!("{} regs served by the system page", entry.core);
    }
    Ok(())
}

fn map_window<B: HwBackend + ?Sized>(
    backend: &mut B,
    core: CoreId,
    window: CoreWindow,
) -> Result<()> {
    let region = format!("core {core} {}", window.name());
    let base = window.base(core);
    backend
        .map(&MapRequest {
            region: &region,
            base,
            offset: u64::from(base),
            len: window.len(),
            access: Access::ReadWrite,
            placement: Placement::NoReplace,
            huge_pages: false,
        })
        .map_err(|e| EhalError::map(region.clone(), base, window.len(), e))
}

fn rollback<B: HwBackend + ?Sized>(backend: &mut B, mapping: &GridMapping, stack: Vec<Entry>) {
    for entry in stack.into_iter().rev() {
        if entry.regs {
            unmap_window(backend, entry.core, CoreWindow::Regs);
        }
        if entry.bank {
            unmap_window(backend, entry.core, CoreWindow::Bank);
        }
    }
    tracing::debug!("Rolled back mapping of {}", mapping.rect);
}

fn unmap_window<B: HwBackend + ?Sized>(backend: &mut B, core: CoreId, window: CoreWindow) {
    if let Err(e) = backend.unmap(window.base(core), window.len()) {
        tracing::warn!("munmap core {core} {} failed: {e}", window.name());
    }
}

/// Unmap every core of a grid mapping. Best effort, never fails.
pub fn unmap_grid<B: HwBackend + ?Sized>(backend: &mut B, mapping: &GridMapping) {
    for core in mapping.rect.iter() {
        if mapping.maps(core, CoreWindow::Regs) {
            unmap_window(backend, core, CoreWindow::Regs);
        }
        unmap_window(backend, core, CoreWindow::Bank);
    }
    tracing::debug!("Unmapped cores {}", mapping.rect);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmio::mock::{Event, MockBackend};

    fn rect(r0: u32, c0: u32, r1: u32, c1: u32) -> GridRect {
        GridRect::new(CoreId::new(r0, c0).unwrap(), CoreId::new(r1, c1).unwrap()).unwrap()
    }

    fn maps(events: &[Event]) -> Vec<u32> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Map { base, .. } => Some(*base),
                _ => None,
            })
            .collect()
    }

    fn unmaps(events: &[Event]) -> Vec<u32> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Unmap { base, .. } => Some(*base),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn maps_row_major_bank_first() {
        let mut mock = MockBackend::new();
        let mapping = map_grid(&mut mock, rect(32, 8, 33, 9), None).unwrap();
        assert_eq!(
            maps(&mock.events()),
            vec![
                0x8080_0000,
                0x808F_0000,
                0x8090_0000,
                0x809F_0000,
                0x8480_0000,
                0x848F_0000,
                0x8490_0000,
                0x849F_0000,
            ]
        );
        assert!(mock.events().iter().all(|e| !matches!(
            e,
            Event::Map {
                placement: Placement::Replace,
                ..
            }
        )));
        assert_eq!(mock.mapped().len(), 8);

        unmap_grid(&mut mock, &mapping);
        assert!(mock.mapped().is_empty());
    }

    #[test]
    fn failure_rolls_back_in_reverse() {
        // Third core's register window fails.
        let mut mock = MockBackend::new().with_map_failure(0x8480_0000 | 0xF_0000);
        let err = map_grid(&mut mock, rect(32, 8, 33, 9), None).unwrap_err();

        match &err {
            EhalError::Map { region, base, .. } => {
                assert_eq!(*base, 0x848F_0000);
                assert!(region.contains("[33, 8]"));
                assert!(region.contains("regs"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            unmaps(&mock.events()),
            vec![0x8480_0000, 0x809F_0000, 0x8090_0000, 0x808F_0000, 0x8080_0000]
        );
        assert!(mock.mapped().is_empty());
    }

    #[test]
    fn first_window_failure_leaves_nothing() {
        let mut mock = MockBackend::new().with_map_failure(0x8080_0000);
        assert!(map_grid(&mut mock, rect(32, 8, 35, 11), None).is_err());
        assert!(unmaps(&mock.events()).is_empty());
        assert!(mock.mapped().is_empty());
    }

    #[test]
    fn overlapping_grid_fails_loudly() {
        let mut mock = MockBackend::new();
        map_grid(&mut mock, rect(32, 8, 32, 9), None).unwrap();
        let err = map_grid(&mut mock, rect(32, 9, 32, 10), None).unwrap_err();
        match err {
            EhalError::Map { source, .. } => assert_eq!(source.raw_os_error(), Some(17)),
            other => panic!("unexpected {other:?}"),
        }
        // The first grid is untouched.
        assert_eq!(mock.mapped().len(), 4);
    }

    #[test]
    fn system_page_keeps_origin_regs() {
        let mut mock = MockBackend::new();
        let mapping = map_grid(&mut mock, rect(32, 8, 32, 9), Some(0x808F_0000)).unwrap();
        assert_eq!(
            maps(&mock.events()),
            vec![0x8080_0000, 0x8090_0000, 0x809F_0000]
        );
        unmap_grid(&mut mock, &mapping);
        assert!(!unmaps(&mock.events()).contains(&0x808F_0000));
    }

    #[test]
    fn covers_only_mapped_windows() {
        let mut mock = MockBackend::new();
        let mapping = map_grid(&mut mock, rect(32, 8, 33, 9), None).unwrap();
        let core = CoreId::new(33, 9).unwrap();
        assert!(mapping.covers(core, 0x7FF0, 0x10));
        assert!(!mapping.covers(core, 0x7FF0, 0x11));
        assert!(mapping.covers(core, 0xF_0400, 4));
        assert!(!mapping.covers(core, 0x1_0000, 4));
        assert!(!mapping.covers(CoreId::new(34, 9).unwrap(), 0, 4));
    }
}
