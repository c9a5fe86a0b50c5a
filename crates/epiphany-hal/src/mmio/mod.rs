//! Identity-mapped hardware windows
//!
//! Every window this crate maps lands at a host virtual address equal to the
//! coprocessor address it represents (VA == PA), so pointers handed to and
//! from the cores need no translation. [`HwBackend`] is the seam between the
//! bring-up logic and the OS: [`OsBackend`] issues real `mmap(2)` calls on the
//! device file, [`mock::MockBackend`] records them for tests.
//!
//! All `unsafe` in the crate lives in this module.

// Identity mapping converts 32-bit bus addresses into host pointers
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_ptr_alignment)]

mod file;
pub mod mock;

pub use file::MappedFile;

use std::ffi::c_void;
use std::fmt::Debug;
use std::fs::File;
use std::io;
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{fence, Ordering};

use rustix::mm::{madvise, mmap, munmap, Advice, MapFlags, ProtFlags};

use crate::error::{EhalError, Result};

/// Access rights of a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Read only
    Read,
    /// Write only
    Write,
    /// Read and write
    ReadWrite,
}

impl Access {
    fn prot(self) -> ProtFlags {
        match self {
            Self::Read => ProtFlags::READ,
            Self::Write => ProtFlags::WRITE,
            Self::ReadWrite => ProtFlags::READ | ProtFlags::WRITE,
        }
    }

    /// Loads are permitted
    pub const fn readable(self) -> bool {
        !matches!(self, Self::Write)
    }

    /// Stores are permitted
    pub const fn writable(self) -> bool {
        !matches!(self, Self::Read)
    }
}

/// How a fixed mapping treats whatever already occupies the range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Fail with `EEXIST` if the range is already mapped (`MAP_FIXED_NOREPLACE`)
    NoReplace,
    /// Replace any existing mapping (`MAP_FIXED`)
    Replace,
}

/// One fixed-address mapping request
#[derive(Debug, Clone)]
pub struct MapRequest<'a> {
    /// Human readable window name, used in logs and errors
    pub region: &'a str,
    /// Virtual address, also the coprocessor address
    pub base: u32,
    /// Offset into the device file (physical address)
    pub offset: u64,
    /// Length in bytes
    pub len: usize,
    /// Access rights
    pub access: Access,
    /// Placement policy
    pub placement: Placement,
    /// Request 2 MiB huge pages
    pub huge_pages: bool,
}

/// Mapping and access primitives the bring-up logic is written against
pub trait HwBackend: Debug + Send {
    /// Map `req.len` bytes of the device at exactly `req.base`
    ///
    /// # Errors
    ///
    /// Returns the OS error if the kernel refuses or places the mapping elsewhere.
    fn map(&mut self, req: &MapRequest<'_>) -> io::Result<()>;

    /// Remove a mapping created by [`HwBackend::map`]
    ///
    /// # Errors
    ///
    /// Returns the OS error from `munmap(2)`.
    fn unmap(&mut self, base: u32, len: usize) -> io::Result<()>;

    /// Hint that a mapped range should be backed by transparent huge pages
    ///
    /// # Errors
    ///
    /// Returns the OS error from `madvise(2)`.
    fn advise_hugepage(&mut self, base: u32, len: usize) -> io::Result<()>;

    /// Volatile 8-bit load
    ///
    /// # Errors
    ///
    /// Returns [`EhalError::OutOfWindow`] if `addr` is not mapped, or
    /// [`EhalError::Protection`] if its window is write-only.
    fn read8(&self, addr: u32) -> Result<u8>;

    /// Volatile 8-bit store
    ///
    /// # Errors
    ///
    /// Returns [`EhalError::OutOfWindow`] if `addr` is not mapped, or
    /// [`EhalError::Protection`] if its window is read-only.
    fn write8(&mut self, addr: u32, value: u8) -> Result<()>;

    /// Volatile 32-bit load; `addr` must be word aligned
    ///
    /// # Errors
    ///
    /// Returns an error if `addr` is unaligned, not mapped or not readable.
    fn read32(&self, addr: u32) -> Result<u32>;

    /// Volatile 32-bit store; `addr` must be word aligned
    ///
    /// # Errors
    ///
    /// Returns an error if `addr` is unaligned, not mapped or not writable.
    fn write32(&mut self, addr: u32, value: u32) -> Result<()>;

    /// Order all preceding stores before any following store
    fn fence(&mut self);

    /// Release the device handle. Existing mappings stay valid.
    fn close(&mut self);

    /// Copy `data` to `addr`: bytes up to the first word boundary, then
    /// 32-bit stores, then the remaining tail bytes
    ///
    /// A range wrapping past 4 GiB fails the window check of its next access.
    ///
    /// # Errors
    ///
    /// Returns an error if any part of the range is not mapped.
    fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let mut cur = addr;
        let mut rest = data;
        while cur % 4 != 0 && !rest.is_empty() {
            self.write8(cur, rest[0])?;
            cur = cur.wrapping_add(1);
            rest = &rest[1..];
        }
        let mut words = rest.chunks_exact(4);
        for word in &mut words {
            self.write32(cur, u32::from_ne_bytes([word[0], word[1], word[2], word[3]]))?;
            cur = cur.wrapping_add(4);
        }
        for &byte in words.remainder() {
            self.write8(cur, byte)?;
            cur = cur.wrapping_add(1);
        }
        Ok(())
    }

    /// Copy from `addr` into `buf` with the same access pattern as
    /// [`HwBackend::write_bytes`]
    ///
    /// # Errors
    ///
    /// Returns an error if any part of the range is not mapped.
    fn read_bytes(&self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let total = buf.len();
        let mut cur = addr;
        let mut idx = 0;
        while cur % 4 != 0 && idx < total {
            buf[idx] = self.read8(cur)?;
            cur = cur.wrapping_add(1);
            idx += 1;
        }
        while total - idx >= 4 {
            buf[idx..idx + 4].copy_from_slice(&self.read32(cur)?.to_ne_bytes());
            cur = cur.wrapping_add(4);
            idx += 4;
        }
        while idx < total {
            buf[idx] = self.read8(cur)?;
            cur = cur.wrapping_add(1);
            idx += 1;
        }
        Ok(())
    }
}

// ── Window bookkeeping ───────────────────────────────────────────────────────

/// A mapped address range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// First byte
    pub base: u32,
    /// Length in bytes
    pub len: usize,
    /// Rights the window was mapped with
    pub access: Access,
}

impl Span {
    fn end(self) -> u64 {
        u64::from(self.base) + self.len as u64
    }

    fn overlaps(self, base: u32, len: usize) -> bool {
        let end = u64::from(base) + len as u64;
        u64::from(base) < self.end() && u64::from(self.base) < end
    }
}

/// Set of live mappings, in creation order
#[derive(Debug, Clone, Default)]
pub(crate) struct Windows {
    spans: Vec<Span>,
}

impl Windows {
    pub(crate) fn contains(&self, addr: u32, len: usize) -> bool {
        let end = u64::from(addr) + len as u64;
        self.spans
            .iter()
            .any(|s| u64::from(s.base) <= u64::from(addr) && end <= s.end())
    }

    pub(crate) fn overlaps(&self, base: u32, len: usize) -> bool {
        self.spans.iter().any(|s| s.overlaps(base, len))
    }

    /// Find the window holding `[addr, addr + len)` and check it permits a
    /// load, or a store if `store` is set.
    pub(crate) fn check(&self, addr: u32, len: usize, store: bool) -> Result<()> {
        let end = u64::from(addr) + len as u64;
        let span = self
            .spans
            .iter()
            .find(|s| u64::from(s.base) <= u64::from(addr) && end <= s.end())
            .ok_or_else(|| EhalError::out_of_window(addr, len))?;
        let permitted = if store {
            span.access.writable()
        } else {
            span.access.readable()
        };
        if permitted {
            Ok(())
        } else {
            Err(EhalError::protection(store, addr, len, span.access))
        }
    }

    pub(crate) fn insert(&mut self, base: u32, len: usize, access: Access) {
        self.spans.push(Span { base, len, access });
    }

    /// Forget every span inside `[base, base + len)`.
    pub(crate) fn remove(&mut self, base: u32, len: usize) {
        let end = u64::from(base) + len as u64;
        self.spans
            .retain(|s| !(u64::from(s.base) >= u64::from(base) && s.end() <= end));
    }

    pub(crate) fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub(crate) fn take(&mut self) -> Vec<Span> {
        std::mem::take(&mut self.spans)
    }
}

// ── OS backend ───────────────────────────────────────────────────────────────

/// Real backend: fixed `mmap(2)` of the Epiphany device file
#[derive(Debug)]
pub struct OsBackend {
    file: Option<File>,
    path: PathBuf,
    windows: Windows,
}

impl OsBackend {
    /// Wrap an already opened device file
    pub fn new(file: File, path: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(file),
            path: path.into(),
            windows: Windows::default(),
        }
    }

    /// Path the device was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check(&self, addr: u32, len: usize, store: bool) -> Result<()> {
        self.windows.check(addr, len, store)
    }

    fn check_word(&self, addr: u32, store: bool) -> Result<()> {
        if addr % 4 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unaligned 32-bit access at {addr:#010x}"),
            )
            .into());
        }
        self.check(addr, 4, store)
    }
}

const fn ptr_of(addr: u32) -> *mut c_void {
    addr as usize as *mut c_void
}

impl HwBackend for OsBackend {
    fn map(&mut self, req: &MapRequest<'_>) -> io::Result<()> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "device closed"))?;
        if req.len == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty mapping"));
        }

        let mut flags = MapFlags::SHARED_VALIDATE | MapFlags::LOCKED;
        flags |= match req.placement {
            Placement::NoReplace => MapFlags::FIXED_NOREPLACE,
            Placement::Replace => MapFlags::FIXED,
        };
        if req.huge_pages {
            flags |= MapFlags::HUGETLB | MapFlags::HUGE_2MB;
        }

        let want = ptr_of(req.base);
        // SAFETY: mmap at a fixed address is the whole point of identity mapping.
        // Invariants: (1) the range is the coprocessor window, which no Rust object
        // occupies; NoReplace refuses to clobber anything already there, Replace is
        // only used for windows whose previous occupant is our own mapping;
        // (2) fd is open; (3) the result is checked against `want` below.
        let got = unsafe {
            mmap(
                want,
                req.len,
                req.access.prot(),
                flags,
                file.as_fd(),
                req.offset,
            )?
        };
        if got != want {
            // SAFETY: `got` was just returned by mmap for req.len bytes and is unused.
            unsafe {
                let _ = munmap(got, req.len);
            }
            return Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("kernel placed mapping at {got:p}, wanted {want:p}"),
            ));
        }

        self.windows.insert(req.base, req.len, req.access);
        tracing::debug!(
            "VA {:#010x}, PA {:#010x} ({:#x} bytes) - {}",
            req.base,
            req.offset,
            req.len,
            req.region
        );
        Ok(())
    }

    fn unmap(&mut self, base: u32, len: usize) -> io::Result<()> {
        // SAFETY: munmap of a range this backend mapped. Invariants: (1) the range
        // came from map(); (2) callers no longer hold references into it (all
        // access goes through read*/write*, which check `windows`, updated below).
        unsafe { munmap(ptr_of(base), len)? };
        self.windows.remove(base, len);
        Ok(())
    }

    fn advise_hugepage(&mut self, base: u32, len: usize) -> io::Result<()> {
        // SAFETY: madvise is advisory; range validity is checked by the kernel.
        unsafe { madvise(ptr_of(base), len, Advice::LinuxHugepage)? };
        Ok(())
    }

    fn read8(&self, addr: u32) -> Result<u8> {
        self.check(addr, 1, false)?;
        // SAFETY: read_volatile necessary for MMIO - hardware can change value.
        // Invariants: (1) addr lies in a live, readable identity mapping (checked above).
        Ok(unsafe { std::ptr::read_volatile(ptr_of(addr).cast::<u8>()) })
    }

    fn write8(&mut self, addr: u32, value: u8) -> Result<()> {
        self.check(addr, 1, true)?;
        // SAFETY: write_volatile necessary for MMIO - triggers hardware side effects.
        // Invariants: (1) addr lies in a live, writable identity mapping (checked above).
        unsafe { std::ptr::write_volatile(ptr_of(addr).cast::<u8>(), value) };
        Ok(())
    }

    fn read32(&self, addr: u32) -> Result<u32> {
        self.check_word(addr, false)?;
        // SAFETY: read_volatile necessary for MMIO - hardware can change value.
        // Invariants: (1) addr..addr+4 is mapped readable; (2) addr is u32 aligned.
        Ok(unsafe { std::ptr::read_volatile(ptr_of(addr).cast::<u32>()) })
    }

    fn write32(&mut self, addr: u32, value: u32) -> Result<()> {
        self.check_word(addr, true)?;
        // SAFETY: write_volatile necessary for MMIO - triggers hardware side effects.
        // Invariants: (1) addr..addr+4 is mapped writable; (2) addr is u32 aligned.
        unsafe { std::ptr::write_volatile(ptr_of(addr).cast::<u32>(), value) };
        Ok(())
    }

    fn fence(&mut self) {
        fence(Ordering::SeqCst);
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            tracing::debug!("Closed {}", self.path.display());
        }
    }
}

impl Drop for OsBackend {
    fn drop(&mut self) {
        for span in self.windows.take().into_iter().rev() {
            tracing::warn!(
                "Backend dropped with {:#010x} ({:#x} bytes) still mapped, unmapping",
                span.base,
                span.len
            );
            // SAFETY: same invariants as unmap(); the backend is going away so no
            // further accesses can be issued through it.
            if let Err(e) = unsafe { munmap(ptr_of(span.base), span.len) } {
                tracing::error!("munmap {:#010x} failed: {e}", span.base);
            }
        }
    }
}
