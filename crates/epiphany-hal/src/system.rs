//! System register page and shared DRAM windows
//!
//! Both windows are identity-mapped like the cores. The bridge page replaces
//! whatever sits at its address; the shared DRAM window is backed by the host
//! physical segment and prefers 2 MiB pages.

use epiphany_chip::sys::{ESYSINFO, SYS_SIZE};
use epiphany_chip::PlatformInfo;

use crate::config::ExternalMemory;
use crate::error::{EhalError, Result};
use crate::mmio::{Access, HwBackend, MapRequest, Placement};

/// Huge page size used for the shared DRAM window
pub const HUGE_PAGE_SIZE: u32 = 2 * 1024 * 1024;

/// Mapped bridge register page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemRegs {
    base: u32,
}

impl SystemRegs {
    /// Page base address
    #[must_use]
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// Absolute address of a register at page offset `reg`
    #[must_use]
    pub const fn addr(&self, reg: u32) -> u32 {
        self.base + reg
    }

    /// Read and decode `ESYSINFO`
    ///
    /// # Errors
    ///
    /// Returns an error if the page is no longer mapped.
    pub fn platform_info<B: HwBackend + ?Sized>(&self, backend: &B) -> Result<PlatformInfo> {
        Ok(PlatformInfo::decode(backend.read32(self.addr(ESYSINFO))?))
    }
}

/// Map the 4 KiB bridge register page at `base`.
///
/// # Errors
///
/// Returns [`EhalError::Map`] if the kernel refuses the mapping.
pub fn map_system_registers<B: HwBackend + ?Sized>(backend: &mut B, base: u32) -> Result<SystemRegs> {
    let len = SYS_SIZE as usize;
    backend
        .map(&MapRequest {
            region: "system registers",
            base,
            offset: u64::from(base),
            len,
            access: Access::ReadWrite,
            placement: Placement::Replace,
            huge_pages: false,
        })
        .map_err(|e| EhalError::map("system registers", base, len, e))?;
    Ok(SystemRegs { base })
}

/// Unmap the bridge register page. Failures are logged.
pub fn unmap_system_registers<B: HwBackend + ?Sized>(backend: &mut B, regs: &SystemRegs) {
    if let Err(e) = backend.unmap(regs.base, SYS_SIZE as usize) {
        tracing::warn!("munmap system registers failed: {e}");
    }
}

/// Mapped shared DRAM window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedMemory {
    emem: ExternalMemory,
    huge_pages: bool,
}

impl SharedMemory {
    /// Segment this window maps
    #[must_use]
    pub const fn segment(&self) -> &ExternalMemory {
        &self.emem
    }

    /// Coprocessor-visible (and host virtual) base
    #[must_use]
    pub const fn base(&self) -> u32 {
        self.emem.epi_base
    }

    /// Window length in bytes
    #[must_use]
    pub const fn len(&self) -> usize {
        self.emem.size as usize
    }

    /// True for a zero-sized window (never produced by [`map_shared_memory`])
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.emem.size == 0
    }

    /// True if the window was mapped with explicit 2 MiB pages
    #[must_use]
    pub const fn huge_pages(&self) -> bool {
        self.huge_pages
    }

    /// True if `[addr, addr + len)` lies inside the window
    #[must_use]
    pub fn contains(&self, addr: u32, len: usize) -> bool {
        self.emem.contains(addr, len)
    }
}

/// Map the shared DRAM segment at its coprocessor-visible address.
///
/// A size that is a non-zero multiple of 2 MiB is first tried with explicit
/// huge pages. Otherwise, or if that fails, the window is mapped with normal
/// pages and the kernel is asked to back it with transparent huge pages.
/// Neither huge-page failure is an error.
///
/// # Errors
///
/// Returns [`EhalError::Map`] if the normal-page mapping fails.
pub fn map_shared_memory<B: HwBackend + ?Sized>(
    backend: &mut B,
    emem: &ExternalMemory,
) -> Result<SharedMemory> {
    let len = emem.size as usize;
    let mut req = MapRequest {
        region: "shared memory",
        base: emem.epi_base,
        offset: u64::from(emem.host_base),
        len,
        access: emem.access,
        placement: Placement::Replace,
        huge_pages: true,
    };

    if emem.size != 0 && emem.size % HUGE_PAGE_SIZE == 0 {
        match backend.map(&req) {
            Ok(()) => {
                tracing::debug!("Shared memory mapped with 2 MiB pages");
                return Ok(SharedMemory {
                    emem: *emem,
                    huge_pages: true,
                });
            }
            Err(e) => tracing::warn!("Huge page mapping of shared memory failed ({e}), falling back"),
        }
    }

    req.huge_pages = false;
    backend
        .map(&req)
        .map_err(|e| EhalError::map("shared memory", emem.epi_base, len, e))?;
    if let Err(e) = backend.advise_hugepage(emem.epi_base, len) {
        tracing::debug!("MADV_HUGEPAGE on shared memory: {e}");
    }

    Ok(SharedMemory {
        emem: *emem,
        huge_pages: false,
    })
}

/// Unmap the shared DRAM window. Failures are logged.
pub fn unmap_shared_memory<B: HwBackend + ?Sized>(backend: &mut B, shm: &SharedMemory) {
    if let Err(e) = backend.unmap(shm.base(), shm.len()) {
        tracing::warn!("munmap shared memory failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmio::mock::{Event, MockBackend};
    use epiphany_chip::sys::{Platform, SYS_BASE};

    fn map_events(mock: &MockBackend) -> Vec<(u32, u64, bool)> {
        mock.events()
            .iter()
            .filter_map(|e| match e {
                Event::Map {
                    base,
                    offset,
                    huge_pages,
                    ..
                } => Some((*base, *offset, *huge_pages)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn system_page_replaces_and_reads_platform() {
        let mut mock = MockBackend::new();
        mock.poke32(SYS_BASE + ESYSINFO, 0x0001_0101);
        let regs = map_system_registers(&mut mock, SYS_BASE).unwrap();
        assert!(matches!(
            mock.events()[0],
            Event::Map {
                placement: Placement::Replace,
                len: 0x1000,
                ..
            }
        ));
        let info = regs.platform_info(&mock).unwrap();
        assert_eq!(info.platform, Platform::E16Z7020Gpio);
        assert_eq!(info.revision, 1);

        unmap_system_registers(&mut mock, &regs);
        assert!(regs.platform_info(&mock).is_err());
    }

    #[test]
    fn shared_memory_prefers_huge_pages() {
        let mut mock = MockBackend::new();
        let shm = map_shared_memory(&mut mock, &ExternalMemory::default()).unwrap();
        assert!(shm.huge_pages());
        assert_eq!(map_events(&mock), vec![(0x8E00_0000, 0x3E00_0000, true)]);
        assert!(!mock.events().iter().any(|e| matches!(e, Event::Advise { .. })));
    }

    #[test]
    fn huge_page_failure_falls_back_with_advice() {
        let mut mock = MockBackend::new().without_huge_pages();
        let shm = map_shared_memory(&mut mock, &ExternalMemory::default()).unwrap();
        assert!(!shm.huge_pages());
        assert_eq!(
            map_events(&mock),
            vec![
                (0x8E00_0000, 0x3E00_0000, true),
                (0x8E00_0000, 0x3E00_0000, false)
            ]
        );
        assert!(mock.events().contains(&Event::Advise {
            base: 0x8E00_0000,
            len: 0x0200_0000
        }));
        assert!(mock.is_mapped(0x8FFF_FFFF));
    }

    #[test]
    fn odd_size_skips_huge_pages() {
        let mut mock = MockBackend::new().without_hugepage_advice();
        let emem = ExternalMemory {
            size: 0x0010_0000,
            ..ExternalMemory::default()
        };
        let shm = map_shared_memory(&mut mock, &emem).unwrap();
        assert!(!shm.huge_pages());
        assert_eq!(map_events(&mock), vec![(0x8E00_0000, 0x3E00_0000, false)]);

        unmap_shared_memory(&mut mock, &shm);
        assert!(!mock.is_mapped(0x8E00_0000));
    }

    #[test]
    fn shared_memory_failure_is_map_error() {
        let mut mock = MockBackend::new().with_map_failure(0x8E00_0000);
        let err = map_shared_memory(&mut mock, &ExternalMemory::default()).unwrap_err();
        match err {
            EhalError::Map { region, base, .. } => {
                assert_eq!(region, "shared memory");
                assert_eq!(base, 0x8E00_0000);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(mock.mapped().is_empty());
    }
}
