//! Read-only mapping of a whole file

use std::ffi::c_void;
use std::fs::File;
use std::io;
use std::path::Path;

use rustix::mm::{madvise, mmap, munmap, Advice, MapFlags, ProtFlags};

/// A file mapped private and read-only for a single sequential pass
#[derive(Debug)]
pub struct MappedFile {
    ptr: *mut c_void,
    len: usize,
}

// SAFETY: the mapping is private and read-only; nothing mutates it.
unsafe impl Send for MappedFile {}

impl MappedFile {
    /// Map `path`. Empty files yield an empty mapping without calling `mmap`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, is too large for the
    /// address space or cannot be mapped.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = usize::try_from(file.metadata()?.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "file too large to map"))?;
        if len == 0 {
            return Ok(Self {
                ptr: std::ptr::null_mut(),
                len: 0,
            });
        }

        // SAFETY: kernel-chosen placement of a private read-only mapping.
        // Invariants: (1) fd is open for reading; (2) len matches the file size.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ,
                MapFlags::PRIVATE | MapFlags::POPULATE,
                &file,
                0,
            )?
        };
        // SAFETY: advisory only, on the range just mapped.
        unsafe {
            if let Err(e) = madvise(ptr, len, Advice::Sequential) {
                tracing::debug!("MADV_SEQUENTIAL: {e}");
            }
            if let Err(e) = madvise(ptr, len, Advice::WillNeed) {
                tracing::debug!("MADV_WILLNEED: {e}");
            }
        }
        Ok(Self { ptr, len })
    }

    /// Mapped contents
    pub fn as_bytes(&self) -> &[u8] {
        if self.len == 0 {
            return &[];
        }
        // SAFETY: ptr..ptr+len is a live read-only mapping owned by self,
        // unmapped only in Drop.
        unsafe { std::slice::from_raw_parts(self.ptr.cast::<u8>(), self.len) }
    }

    /// Length in bytes
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True for an empty file
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        if self.len == 0 {
            return;
        }
        // SAFETY: mapping created in open(); no borrow of it outlives self.
        if let Err(e) = unsafe { munmap(self.ptr, self.len) } {
            tracing::warn!("munmap of image failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn maps_contents() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"S00600004844521B\n").unwrap();
        let mapped = MappedFile::open(f.path()).unwrap();
        assert_eq!(mapped.as_bytes(), b"S00600004844521B\n");
    }

    #[test]
    fn empty_file_is_empty() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let mapped = MappedFile::open(f.path()).unwrap();
        assert!(mapped.is_empty());
        assert!(mapped.as_bytes().is_empty());
    }

    #[test]
    fn missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MappedFile::open(&dir.path().join("nope.srec")).is_err());
    }
}
