//! Recording backend for tests and dry runs
//!
//! [`MockBackend`] behaves like the kernel as far as bring-up can tell: it
//! keeps track of live mappings and their rights, refuses overlapping
//! `NoReplace` requests with `EEXIST`, rejects accesses outside mapped windows
//! or against a window's rights, and stores written bytes
//! so they can be read back. Every call is appended to an event log.
//!
//! Clones share state, so a test can keep a handle while a session owns the
//! backend and inspect the log after the session is gone.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{HwBackend, MapRequest, Placement, Span, Windows};
use crate::error::Result;

const ENOMEM: i32 = 12;
const EEXIST: i32 = 17;
const EBADF: i32 = 9;
const EINVAL: i32 = 22;
const EIO: i32 = 5;

/// A single store as seen by the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Store {
    /// Bus address
    pub addr: u32,
    /// Access width in bytes (1 or 4)
    pub width: u8,
    /// Value written
    pub value: u32,
}

/// One backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Successful or attempted mapping
    Map {
        /// Window name
        region: String,
        /// Identity address
        base: u32,
        /// File offset
        offset: u64,
        /// Length
        len: usize,
        /// Placement policy
        placement: Placement,
        /// Huge pages requested
        huge_pages: bool,
    },
    /// Unmapping
    Unmap {
        /// Base address
        base: u32,
        /// Length
        len: usize,
    },
    /// `MADV_HUGEPAGE` advice
    Advise {
        /// Base address
        base: u32,
        /// Length
        len: usize,
    },
    /// Load
    Read {
        /// Bus address
        addr: u32,
        /// Access width in bytes
        width: u8,
    },
    /// Store
    Write(Store),
    /// Store fence
    Fence,
    /// Device closed
    Close,
}

#[derive(Debug, Default)]
struct State {
    events: Vec<Event>,
    windows: Windows,
    memory: HashMap<u32, u8>,
    fail_map: Vec<u32>,
    fail_write: Vec<u32>,
    reject_huge_pages: bool,
    reject_advice: bool,
    closed: bool,
}

impl State {
    fn check_read(&self, addr: u32, len: usize) -> Result<()> {
        self.windows.check(addr, len, false)
    }

    fn check_write(&self, addr: u32, len: usize) -> Result<()> {
        if self.fail_write.contains(&addr) {
            return Err(io::Error::from_raw_os_error(EIO).into());
        }
        self.windows.check(addr, len, true)
    }

    fn load32(&self, addr: u32) -> u32 {
        let mut bytes = [0u8; 4];
        for (i, b) in (0u32..).zip(bytes.iter_mut()) {
            *b = self.memory.get(&addr.wrapping_add(i)).copied().unwrap_or(0);
        }
        u32::from_ne_bytes(bytes)
    }

    fn store32(&mut self, addr: u32, value: u32) {
        for (i, b) in (0u32..).zip(value.to_ne_bytes()) {
            self.memory.insert(addr.wrapping_add(i), b);
        }
    }
}

/// In-memory stand-in for the device file
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<State>>,
}

impl MockBackend {
    /// Empty backend: nothing mapped, memory reads as zero
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make any mapping starting at `base` fail with `ENOMEM`
    #[must_use]
    pub fn with_map_failure(self, base: u32) -> Self {
        self.state().fail_map.push(base);
        self
    }

    /// Make any store to `addr` fail with `EIO`
    #[must_use]
    pub fn with_write_failure(self, addr: u32) -> Self {
        self.state().fail_write.push(addr);
        self
    }

    /// Make huge-page mapping requests fail, as on kernels without a hugetlb pool
    #[must_use]
    pub fn without_huge_pages(self) -> Self {
        self.state().reject_huge_pages = true;
        self
    }

    /// Make `MADV_HUGEPAGE` fail, as on kernels without transparent huge pages
    #[must_use]
    pub fn without_hugepage_advice(self) -> Self {
        self.state().reject_advice = true;
        self
    }

    /// Preload a word, bypassing window checks and the event log
    pub fn poke32(&self, addr: u32, value: u32) {
        self.state().store32(addr, value);
    }

    /// Inspect a word, bypassing window checks and the event log
    pub fn peek32(&self, addr: u32) -> u32 {
        self.state().load32(addr)
    }

    /// Inspect a byte range, bypassing window checks and the event log
    pub fn peek_bytes(&self, addr: u32, len: usize) -> Vec<u8> {
        let state = self.state();
        (0u32..)
            .take(len)
            .map(|i| {
                state
                    .memory
                    .get(&addr.wrapping_add(i))
                    .copied()
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Full event log
    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    /// Forget the event log (mappings and memory are kept)
    pub fn clear_events(&self) {
        self.state().events.clear();
    }

    /// Stores, in issue order
    pub fn writes(&self) -> Vec<Store> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Write(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    /// Live mappings, in creation order
    pub fn mapped(&self) -> Vec<Span> {
        self.state().windows.spans().to_vec()
    }

    /// True if `addr` lies inside a live mapping
    pub fn is_mapped(&self, addr: u32) -> bool {
        self.state().windows.contains(addr, 1)
    }

    /// True once [`HwBackend::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

impl HwBackend for MockBackend {
    fn map(&mut self, req: &MapRequest<'_>) -> io::Result<()> {
        let mut state = self.state();
        state.events.push(Event::Map {
            region: req.region.to_string(),
            base: req.base,
            offset: req.offset,
            len: req.len,
            placement: req.placement,
            huge_pages: req.huge_pages,
        });
        if state.closed {
            return Err(io::Error::from_raw_os_error(EBADF));
        }
        if req.len == 0 {
            return Err(io::Error::from_raw_os_error(EINVAL));
        }
        if state.fail_map.contains(&req.base) {
            return Err(io::Error::from_raw_os_error(ENOMEM));
        }
        if req.huge_pages && state.reject_huge_pages {
            return Err(io::Error::from_raw_os_error(ENOMEM));
        }
        if req.placement == Placement::NoReplace && state.windows.overlaps(req.base, req.len) {
            return Err(io::Error::from_raw_os_error(EEXIST));
        }
        if req.placement == Placement::Replace {
            state.windows.remove(req.base, req.len);
        }
        state.windows.insert(req.base, req.len, req.access);
        Ok(())
    }

    fn unmap(&mut self, base: u32, len: usize) -> io::Result<()> {
        let mut state = self.state();
        state.events.push(Event::Unmap { base, len });
        state.windows.remove(base, len);
        Ok(())
    }

    fn advise_hugepage(&mut self, base: u32, len: usize) -> io::Result<()> {
        let mut state = self.state();
        state.events.push(Event::Advise { base, len });
        if state.reject_advice {
            return Err(io::Error::from_raw_os_error(EINVAL));
        }
        Ok(())
    }

    fn read8(&self, addr: u32) -> Result<u8> {
        let mut state = self.state();
        state.events.push(Event::Read { addr, width: 1 });
        state.check_read(addr, 1)?;
        Ok(state.memory.get(&addr).copied().unwrap_or(0))
    }

    fn write8(&mut self, addr: u32, value: u8) -> Result<()> {
        let mut state = self.state();
        state.events.push(Event::Write(Store {
            addr,
            width: 1,
            value: u32::from(value),
        }));
        state.check_write(addr, 1)?;
        state.memory.insert(addr, value);
        Ok(())
    }

    fn read32(&self, addr: u32) -> Result<u32> {
        let mut state = self.state();
        state.events.push(Event::Read { addr, width: 4 });
        if addr % 4 != 0 {
            return Err(io::Error::from_raw_os_error(EINVAL).into());
        }
        state.check_read(addr, 4)?;
        Ok(state.load32(addr))
    }

    fn write32(&mut self, addr: u32, value: u32) -> Result<()> {
        let mut state = self.state();
        state.events.push(Event::Write(Store {
            addr,
            width: 4,
            value,
        }));
        if addr % 4 != 0 {
            return Err(io::Error::from_raw_os_error(EINVAL).into());
        }
        state.check_write(addr, 4)?;
        state.store32(addr, value);
        Ok(())
    }

    fn fence(&mut self) {
        self.state().events.push(Event::Fence);
    }

    fn close(&mut self) {
        let mut state = self.state();
        state.events.push(Event::Close);
        state.closed = true;
    }
}
