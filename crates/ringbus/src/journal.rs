//! Memory-mapped append journal, the LOW-priority transport.
//!
//! Records are appended to a file-backed ring at `/tmp/<namespace>.queue`,
//! truncated to the configured size on open. Durability is best-effort:
//! records survive until the ring wraps or the file is re-opened. Each
//! record carries its own CRC32C so torn writes surface as `Corrupt`
//! instead of garbage payloads.

use crate::checksum::crc32c;
use crate::error::{PlatformError, ReadError, WriteError};
use crate::lane::{Lane, LEN_PREFIX};
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Bytes of the per-record CRC32C stored ahead of the payload.
const CRC_LEN: usize = 4;

/// Single-producer single-consumer journal over a file mapping.
pub struct MappedJournal {
    lane: Lane,
    mapping: FileMapping,
}

impl MappedJournal {
    /// Open (and truncate) the journal file. `capacity` must be a power of
    /// two.
    pub fn open(path: &Path, capacity: usize) -> Result<Self, PlatformError> {
        assert!(capacity.is_power_of_two(), "journal capacity must be a power of two");
        let mapping = FileMapping::create(path, capacity)?;
        // SAFETY: the mapping is exclusive to this journal and lives in
        // `self.mapping` for the lane's whole lifetime.
        let lane = unsafe { Lane::from_raw(mapping.ptr, capacity) };
        Ok(Self { lane, mapping })
    }

    /// Append one record. Returns `Full` when unread records occupy the
    /// ring; the caller decides whether to retry, drop, or spill.
    pub fn append(&self, payload: &[u8]) -> Result<(), WriteError> {
        if payload.len() + CRC_LEN > self.lane.max_message() {
            return Err(WriteError::TooLarge {
                len: payload.len(),
                max: self.lane.max_message() - CRC_LEN,
            });
        }
        let mut record = Vec::with_capacity(CRC_LEN + payload.len());
        record.extend_from_slice(&crc32c(payload).to_le_bytes());
        record.extend_from_slice(payload);
        self.lane.write(&record)
    }

    /// Read the next record into `dest`, verifying its checksum.
    pub fn read(&self, dest: &mut [u8]) -> Result<usize, ReadError> {
        let mut scratch = vec![0u8; self.lane.max_message()];
        let n = self.lane.read(&mut scratch)?;
        if n < CRC_LEN {
            return Err(ReadError::Corrupt { at: 0 });
        }
        let stored = u32::from_le_bytes(scratch[..CRC_LEN].try_into().unwrap());
        let payload = &scratch[CRC_LEN..n];
        if crc32c(payload) != stored {
            return Err(ReadError::Corrupt { at: 0 });
        }
        if dest.len() < payload.len() {
            return Err(ReadError::DestTooSmall {
                have: dest.len(),
                want: payload.len(),
            });
        }
        dest[..payload.len()].copy_from_slice(payload);
        Ok(payload.len())
    }

    /// Largest accepted payload.
    pub fn max_payload(&self) -> usize {
        self.lane.max_message() - CRC_LEN
    }

    /// Unread bytes currently in the ring.
    pub fn backlog(&self) -> usize {
        self.lane.len()
    }

    /// Flush dirty pages to the backing file, best-effort.
    pub fn sync(&self) {
        self.mapping.sync();
    }
}

/// A read-write shared mapping of a truncated file.
struct FileMapping {
    ptr: *mut u8,
    len: usize,
    _file: File,
}

// SAFETY: raw bytes; synchronization is the wrapping Lane's concern.
unsafe impl Send for FileMapping {}
unsafe impl Sync for FileMapping {}

impl FileMapping {
    #[cfg(unix)]
    fn create(path: &Path, len: usize) -> Result<Self, PlatformError> {
        use std::os::unix::io::AsRawFd;

        let fail = |source: std::io::Error| PlatformError::MappingFailed {
            name: path.display().to_string(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(fail)?;
        file.set_len(len as u64).map_err(fail)?;

        // SAFETY: fd is valid and sized; MAP_SHARED writes reach the file.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(fail(std::io::Error::last_os_error()));
        }
        Ok(Self {
            ptr: ptr.cast(),
            len,
            _file: file,
        })
    }

    #[cfg(not(unix))]
    fn create(path: &Path, _len: usize) -> Result<Self, PlatformError> {
        Err(PlatformError::MappingFailed {
            name: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Unsupported, "journal requires unix"),
        })
    }

    fn sync(&self) {
        #[cfg(unix)]
        // SAFETY: ptr/len are the live mapping.
        unsafe {
            libc::msync(self.ptr.cast(), self.len, libc::MS_ASYNC);
        }
    }
}

impl Drop for FileMapping {
    fn drop(&mut self) {
        #[cfg(unix)]
        // SAFETY: established at construction, unmapped exactly once.
        unsafe {
            libc::munmap(self.ptr.cast(), self.len);
        }
    }
}
