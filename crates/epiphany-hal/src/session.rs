//! Bootstrap sequence and the mapped coprocessor session
//!
//! ```text
//! Closed ─▶ DeviceOpen ─▶ RegistersMapped ─▶ GridMapped ─▶ LinkUp ─▶ MemoryMapped ─▶ Ready
//!   ▲                                                                                  │
//!   └──────────────────────────── teardown / unwind (reverse) ◀────────────────────────┘
//! ```
//!
//! A failing step unwinds every completed one before the error is returned,
//! so a `Session` either exists fully mapped or not at all. Teardown walks the
//! same states backwards and is also run from `Drop`.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

use epiphany_chip::{Chip, ChipKind, CoreId, GridRect, PlatformInfo};

use crate::config::SessionConfig;
use crate::device::open_backend;
use crate::error::{EhalError, Result};
use crate::grid::{map_grid, unmap_grid, GridMapping};
use crate::heap::SharedHeap;
use crate::link;
use crate::mmio::{HwBackend, OsBackend};
use crate::srec::{ImageSink, LoadStats, SrecLoader};
use crate::system::{
    map_shared_memory, map_system_registers, unmap_shared_memory, unmap_system_registers,
    SharedMemory, SystemRegs,
};

/// Bootstrap progress, in acquisition order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BootState {
    /// Nothing held
    Closed,
    /// Device file open
    DeviceOpen,
    /// Bridge register page mapped
    RegistersMapped,
    /// Core windows mapped
    GridMapped,
    /// Host link enabled
    LinkUp,
    /// Shared DRAM mapped
    MemoryMapped,
    /// Heap initialised, session usable
    Ready,
}

impl fmt::Display for BootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A bootstrapped coprocessor
///
/// Owns the device handle and every mapped window. `Send` but not `Sync`:
/// all hardware access goes through `&mut self`, and a session must not be
/// shared between threads without external locking.
#[derive(Debug)]
pub struct Session<B: HwBackend = OsBackend> {
    backend: B,
    state: BootState,
    config: SessionConfig,
    chip: Chip,
    platform: Option<PlatformInfo>,
    sys: Option<SystemRegs>,
    grid: Option<GridMapping>,
    shm: Option<SharedMemory>,
    heap: Option<SharedHeap>,
    _not_sync: PhantomData<Cell<()>>,
}

impl Session<OsBackend> {
    /// Open the first usable device node and bring the coprocessor up.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error; everything acquired before it
    /// has been released.
    pub fn bootstrap(config: SessionConfig) -> Result<Self> {
        let backend = open_backend(&config.device_paths)?;
        Self::start(config, backend)
    }
}

impl<B: HwBackend> Session<B> {
    /// Bring the coprocessor up on an already opened backend.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error after unwinding, in which case
    /// the backend has been closed.
    pub fn start(config: SessionConfig, backend: B) -> Result<Self> {
        let mut session = Self {
            backend,
            state: BootState::DeviceOpen,
            chip: config.chip,
            config,
            platform: None,
            sys: None,
            grid: None,
            shm: None,
            heap: None,
            _not_sync: PhantomData,
        };

        if let Err(e) = session.bring_up() {
            tracing::error!("Bootstrap failed at {}: {e}", session.state);
            session.unwind();
            return Err(e);
        }
        Ok(session)
    }

    fn bring_up(&mut self) -> Result<()> {
        let sys = map_system_registers(&mut self.backend, self.config.sys_base)?;
        self.sys = Some(sys);
        self.advance(BootState::RegistersMapped);

        let info = sys.platform_info(&self.backend)?;
        self.platform = Some(info);
        self.chip = self.resolve_chip(&info)?;

        let grid = map_grid(&mut self.backend, self.chip.rect(), Some(sys.base()))?;
        self.grid = Some(grid);
        self.advance(BootState::GridMapped);

        link::link_up(&mut self.backend, &sys, &self.chip)?;
        self.advance(BootState::LinkUp);

        let shm = map_shared_memory(&mut self.backend, &self.config.emem)?;
        self.shm = Some(shm);
        self.advance(BootState::MemoryMapped);

        self.heap = Some(SharedHeap::new(shm.base(), shm.len()));
        self.advance(BootState::Ready);

        tracing::info!(
            "Platform: {} ({}), rev {}; {} with {} cores at {}; shared memory {:#010x} ({} MiB{})",
            info.platform.name(),
            info.fpga_load_type.name(),
            info.revision,
            self.chip.kind(),
            self.chip.kind().cores(),
            self.chip.origin(),
            shm.base(),
            shm.len() >> 20,
            if shm.huge_pages() { ", huge pages" } else { "" },
        );
        Ok(())
    }

    /// Hardware identification wins over the configured hint.
    fn resolve_chip(&self, info: &PlatformInfo) -> Result<Chip> {
        let hint = self.config.chip;
        match ChipKind::from_platform(info.platform) {
            Some(kind) if kind == hint.kind() => Ok(hint),
            Some(kind) => {
                tracing::warn!(
                    "Hardware reports {kind}, configuration says {}; using {kind}",
                    hint.kind()
                );
                let origin = hint.origin();
                Ok(Chip::new(kind, origin.row(), origin.col())?)
            }
            None => {
                tracing::warn!(
                    "Unknown platform id {:#x}, keeping configured {}",
                    info.platform_raw,
                    hint.kind()
                );
                Ok(hint)
            }
        }
    }

    fn advance(&mut self, state: BootState) {
        tracing::debug!("{} -> {state}", self.state);
        self.state = state;
    }

    /// Release everything held, newest first.
    fn unwind(&mut self) {
        while self.state != BootState::Closed {
            match self.state {
                BootState::Ready => {
                    self.heap = None;
                    self.state = BootState::MemoryMapped;
                }
                BootState::MemoryMapped => {
                    if let Some(shm) = self.shm.take() {
                        unmap_shared_memory(&mut self.backend, &shm);
                    }
                    self.state = BootState::LinkUp;
                }
                BootState::LinkUp => self.state = BootState::GridMapped,
                BootState::GridMapped => {
                    if let Some(grid) = self.grid.take() {
                        unmap_grid(&mut self.backend, &grid);
                    }
                    self.state = BootState::RegistersMapped;
                }
                BootState::RegistersMapped => {
                    if let Some(sys) = self.sys.take() {
                        unmap_system_registers(&mut self.backend, &sys);
                    }
                    self.state = BootState::DeviceOpen;
                }
                BootState::DeviceOpen => {
                    self.backend.close();
                    self.state = BootState::Closed;
                }
                BootState::Closed => {}
            }
        }
    }

    /// Unmap everything and close the device. A second call does nothing.
    pub fn teardown(&mut self) {
        if self.state == BootState::Closed {
            tracing::debug!("Session already torn down");
            return;
        }
        tracing::info!("Tearing down {}", self.chip);
        self.unwind();
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    /// Current lifecycle state
    pub const fn state(&self) -> BootState {
        self.state
    }

    /// Chip as resolved from hardware
    pub const fn chip(&self) -> &Chip {
        &self.chip
    }

    /// Decoded `ESYSINFO`, once read
    pub const fn platform_info(&self) -> Option<&PlatformInfo> {
        self.platform.as_ref()
    }

    /// Configuration the session was started with
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Underlying backend
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Mapped core rectangle
    pub const fn grid(&self) -> Option<&GridMapping> {
        self.grid.as_ref()
    }

    /// Mapped shared DRAM window
    pub const fn shared_memory(&self) -> Option<&SharedMemory> {
        self.shm.as_ref()
    }

    /// Shared DRAM allocator
    pub const fn heap(&self) -> Option<&SharedHeap> {
        self.heap.as_ref()
    }

    /// Shared DRAM allocator, mutable
    pub fn heap_mut(&mut self) -> Option<&mut SharedHeap> {
        self.heap.as_mut()
    }

    fn require_ready(&self) -> Result<()> {
        if self.state == BootState::Ready {
            Ok(())
        } else {
            Err(EhalError::invalid_state(format!(
                "session is {}, not Ready",
                self.state
            )))
        }
    }

    // ── Operations ───────────────────────────────────────────────────────────

    /// Reset the chip and bring the host link back up.
    ///
    /// # Errors
    ///
    /// Returns [`EhalError::InvalidState`] unless the session is ready, or
    /// the register access error.
    pub fn reset(&mut self) -> Result<()> {
        self.require_ready()?;
        let sys = self
            .sys
            .ok_or_else(|| EhalError::invalid_state("system registers not mapped"))?;
        link::reset(&mut self.backend, &sys, &self.chip)
    }

    /// Copy `data` into `core` at local offset `local`.
    ///
    /// # Errors
    ///
    /// Returns [`EhalError::OutOfWindow`] if the range is not inside a
    /// mapped bank or register window of `core`.
    pub fn write_core(&mut self, core: CoreId, local: u32, data: &[u8]) -> Result<()> {
        let addr = self.core_addr(core, local, data.len())?;
        self.backend.write_bytes(addr, data)
    }

    /// Copy from `core` at local offset `local` into `buf`.
    ///
    /// # Errors
    ///
    /// As [`Session::write_core`].
    pub fn read_core(&self, core: CoreId, local: u32, buf: &mut [u8]) -> Result<()> {
        let addr = self.core_addr(core, local, buf.len())?;
        self.backend.read_bytes(addr, buf)
    }

    /// Store one word to a core register or memory location.
    ///
    /// # Errors
    ///
    /// As [`Session::write_core`]; `local` must be word aligned.
    pub fn write_core_u32(&mut self, core: CoreId, local: u32, value: u32) -> Result<()> {
        let addr = self.core_addr(core, local, 4)?;
        self.backend.write32(addr, value)
    }

    /// Load one word from a core register or memory location.
    ///
    /// # Errors
    ///
    /// As [`Session::write_core`]; `local` must be word aligned.
    pub fn read_core_u32(&self, core: CoreId, local: u32) -> Result<u32> {
        let addr = self.core_addr(core, local, 4)?;
        self.backend.read32(addr)
    }

    fn core_addr(&self, core: CoreId, local: u32, len: usize) -> Result<u32> {
        self.require_ready()?;
        let addr = core.addr(local)?;
        match &self.grid {
            Some(grid) if grid.covers(core, local, len) => Ok(addr),
            _ => Err(EhalError::out_of_window(addr, len)),
        }
    }

    /// Copy `data` into shared memory at coprocessor address `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`EhalError::OutOfWindow`] if the range leaves the window, or
    /// [`EhalError::Protection`] if the segment is mapped read-only.
    pub fn write_shared(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.check_shared(addr, data.len())?;
        self.backend.write_bytes(addr, data)
    }

    /// Copy from shared memory at coprocessor address `addr` into `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`EhalError::OutOfWindow`] if the range leaves the window, or
    /// [`EhalError::Protection`] if the segment is mapped write-only.
    pub fn read_shared(&self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.check_shared(addr, buf.len())?;
        self.backend.read_bytes(addr, buf)
    }

    fn check_shared(&self, addr: u32, len: usize) -> Result<()> {
        self.require_ready()?;
        match &self.shm {
            Some(shm) if shm.contains(addr, len) => Ok(()),
            _ => Err(EhalError::out_of_window(addr, len)),
        }
    }

    /// Load an S-record file into every core of the chip.
    ///
    /// # Errors
    ///
    /// See [`SrecLoader::load_file`].
    pub fn load_srec(&mut self, path: &Path) -> Result<LoadStats> {
        self.load_srec_into(path, self.chip.rect())
    }

    /// Load an S-record file into the cores of `rect`.
    ///
    /// # Errors
    ///
    /// Returns [`EhalError::Config`] if `rect` is not inside the mapped grid,
    /// otherwise see [`SrecLoader::load_file`].
    pub fn load_srec_into(&mut self, path: &Path, rect: GridRect) -> Result<LoadStats> {
        self.require_ready()?;
        let chip_rect = self.chip.rect();
        if !(chip_rect.contains(rect.begin()) && chip_rect.contains(rect.end())) {
            return Err(EhalError::config(format!(
                "{rect} is outside the mapped cores {chip_rect}"
            )));
        }
        SrecLoader::new(rect, self.config.emem).load_file(path, self)
    }
}

impl<B: HwBackend> ImageSink for Session<B> {
    fn write_core(&mut self, core: CoreId, local: u32, data: &[u8]) -> Result<()> {
        Session::write_core(self, core, local, data)
    }

    fn write_shared(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        Session::write_shared(self, addr, data)
    }
}

impl<B: HwBackend> Drop for Session<B> {
    fn drop(&mut self) {
        if self.state != BootState::Closed {
            tracing::debug!("Session dropped at {}, tearing down", self.state);
            self.unwind();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmio::mock::MockBackend;
    use crate::mmio::Access;
    use epiphany_chip::sys::{ESYSINFO, SYS_BASE};
    use std::io::Write;

    fn ready() -> (MockBackend, Session<MockBackend>) {
        let mock = MockBackend::new();
        mock.poke32(SYS_BASE + ESYSINFO, 0x0001_0201);
        let session = Session::start(SessionConfig::default(), mock.clone()).unwrap();
        (mock, session)
    }

    #[test]
    fn reaches_ready() {
        let (mock, session) = ready();
        assert_eq!(session.state(), BootState::Ready);
        assert_eq!(session.chip().kind(), ChipKind::E16G301);
        assert_eq!(session.heap().unwrap().footprint_limit(), 0x0200_0000);
        assert!(!mock.is_closed());
    }

    #[test]
    fn core_access_is_window_checked() {
        let (mock, mut session) = ready();
        let core = CoreId::new(33, 10).unwrap();
        session.write_core(core, 0x100, &[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(mock.peek_bytes(0x84A0_0100, 5), vec![1, 2, 3, 4, 5]);

        let mut buf = [0u8; 5];
        session.read_core(core, 0x100, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5]);

        assert!(matches!(
            session.write_core(core, 0x7FFE, &[0; 4]),
            Err(EhalError::OutOfWindow { .. })
        ));
        assert!(session
            .write_core(CoreId::new(40, 8).unwrap(), 0, &[0])
            .is_err());
        session.write_core_u32(core, 0xF_0400, 0x1).unwrap();
        assert_eq!(session.read_core_u32(core, 0xF_0400).unwrap(), 0x1);
    }

    #[test]
    fn shared_access_is_window_checked() {
        let (_mock, mut session) = ready();
        let addr = session.heap_mut().unwrap().alloc(16).unwrap();
        session.write_shared(addr, b"0123456789abcdef").unwrap();
        let mut back = [0u8; 16];
        session.read_shared(addr, &mut back).unwrap();
        assert_eq!(&back, b"0123456789abcdef");
        assert!(session.write_shared(0x8FFF_FFFE, &[0; 4]).is_err());
    }

    #[test]
    fn read_only_segment_refuses_stores() {
        let mock = MockBackend::new();
        mock.poke32(SYS_BASE + ESYSINFO, 0x0001_0201);
        let mut config = SessionConfig::default();
        config.emem.access = Access::Read;
        let mut session = Session::start(config, mock.clone()).unwrap();

        assert!(matches!(
            session.write_shared(0x8E00_0000, &[1, 2, 3, 4]),
            Err(EhalError::Protection { store: true, .. })
        ));
        assert_eq!(mock.peek32(0x8E00_0000), 0);
        let mut buf = [0u8; 4];
        session.read_shared(0x8E00_0000, &mut buf).unwrap();

        let mut image = tempfile::Builder::new().suffix(".srec").tempfile().unwrap();
        image
            .write_all(b"S3098E000000010203045E\n")
            .unwrap();
        assert!(matches!(
            session.load_srec(image.path()),
            Err(EhalError::Protection { .. })
        ));
        assert_eq!(session.state(), BootState::Ready);
    }

    #[test]
    fn srec_running_off_shared_end_fails() {
        let (_mock, mut session) = ready();
        let mut image = tempfile::Builder::new().suffix(".srec").tempfile().unwrap();
        image
            .write_all(b"S3098FFFFFFE0102030461\n")
            .unwrap();
        assert!(matches!(
            session.load_srec(image.path()),
            Err(EhalError::OutOfWindow { addr: 0x8FFF_FFFE, len: 4 })
        ));
    }

    #[test]
    fn access_after_teardown_is_invalid_state() {
        let (mock, mut session) = ready();
        session.teardown();
        assert!(mock.is_closed());
        assert!(mock.mapped().is_empty());
        assert!(matches!(
            session.write_shared(0x8E00_0000, &[1]),
            Err(EhalError::InvalidState { .. })
        ));
        assert!(session.reset().is_err());
    }

    #[test]
    fn hardware_kind_overrides_hint() {
        let mock = MockBackend::new();
        mock.poke32(SYS_BASE + ESYSINFO, 0x05);
        let session = Session::start(SessionConfig::default(), mock.clone()).unwrap();
        assert_eq!(session.chip().kind(), ChipKind::E64G401);
        assert_eq!(session.grid().unwrap().rect().len(), 64);
        // E64 links need no enable writes.
        assert!(mock.writes().is_empty());
    }

    #[test]
    fn unknown_platform_keeps_hint() {
        let mock = MockBackend::new();
        let session = Session::start(SessionConfig::default(), mock).unwrap();
        assert_eq!(session.chip().kind(), ChipKind::E16G301);
        assert_eq!(session.platform_info().unwrap().platform_raw, 0);
    }
}
