//! OS-backed shared memory region hosting cross-process ring lanes.
//!
//! The region is an arena of bytes; ring lanes address it through index
//! cursors, never through long-lived raw pointer graphs. 2 MiB huge pages
//! are attempted first (first-touch keeps them NUMA-local), with a
//! transparent fallback to regular 4 KiB pages.

use crate::error::PlatformError;
use std::sync::Arc;

/// A named or anonymous shared mapping.
///
/// Named regions are visible to cooperating processes under
/// `/dev/shm/<namespace>`; anonymous regions serve single-process fabrics
/// and tests.
pub struct SharedRegion {
    name: String,
    ptr: *mut u8,
    len: usize,
    huge: bool,
    kind: RegionKind,
}

enum RegionKind {
    /// shm_open-backed; the creator unlinks the name on drop.
    Named { owner: bool },
    Anonymous,
}

// SAFETY: the region itself is just bytes; all synchronization lives in
// the lanes carved out of it.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Create (or replace) a named region of `len` bytes.
    pub fn create(namespace: &str, len: usize) -> Result<Arc<Self>, PlatformError> {
        Self::open_named(namespace, len, true)
    }

    /// Open an existing named region created by a cooperating process.
    pub fn open(namespace: &str, len: usize) -> Result<Arc<Self>, PlatformError> {
        Self::open_named(namespace, len, false)
    }

    /// Anonymous region for single-process fabrics.
    pub fn anonymous(len: usize) -> Result<Arc<Self>, PlatformError> {
        let (ptr, huge) = Self::map_anonymous(len).map_err(|source| PlatformError::MappingFailed {
            name: "<anonymous>".to_string(),
            source,
        })?;
        Ok(Arc::new(Self {
            name: "<anonymous>".to_string(),
            ptr,
            len,
            huge,
            kind: RegionKind::Anonymous,
        }))
    }

    /// Region name (the namespace for named regions).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Region length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for zero-length regions.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when the mapping landed on huge pages.
    pub fn uses_huge_pages(&self) -> bool {
        self.huge
    }

    /// Base pointer of the arena.
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    #[cfg(unix)]
    fn open_named(namespace: &str, len: usize, create: bool) -> Result<Arc<Self>, PlatformError> {
        use std::ffi::CString;

        let shm_name = CString::new(format!("/{namespace}")).map_err(|_| {
            PlatformError::MappingFailed {
                name: namespace.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "namespace contains NUL"),
            }
        })?;

        let fail = |source: std::io::Error| PlatformError::MappingFailed {
            name: namespace.to_string(),
            source,
        };

        // SAFETY: shm_name is a valid NUL-terminated string; flags and mode
        // are plain constants.
        let fd = unsafe {
            let flags = if create {
                libc::O_CREAT | libc::O_RDWR
            } else {
                libc::O_RDWR
            };
            libc::shm_open(shm_name.as_ptr(), flags, 0o600 as libc::mode_t)
        };
        if fd < 0 {
            return Err(fail(std::io::Error::last_os_error()));
        }

        // SAFETY: fd is the shm object just opened.
        let rc = unsafe { libc::ftruncate(fd, len as libc::off_t) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            unsafe {
                libc::close(fd);
            }
            return Err(fail(err));
        }

        let mapped = Self::map_fd(fd, len);
        // The mapping keeps its own reference to the object.
        unsafe {
            libc::close(fd);
        }
        let (ptr, huge) = mapped.map_err(fail)?;

        Ok(Arc::new(Self {
            name: namespace.to_string(),
            ptr,
            len,
            huge,
            kind: RegionKind::Named { owner: create },
        }))
    }

    #[cfg(not(unix))]
    fn open_named(namespace: &str, _len: usize, _create: bool) -> Result<Arc<Self>, PlatformError> {
        Err(PlatformError::MappingFailed {
            name: namespace.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Unsupported, "shared regions require unix"),
        })
    }

    #[cfg(unix)]
    fn map_fd(fd: libc::c_int, len: usize) -> Result<(*mut u8, bool), std::io::Error> {
        // Huge pages first; shm objects usually refuse MAP_HUGETLB, in
        // which case the regular mapping below takes over.
        #[cfg(target_os = "linux")]
        {
            // SAFETY: len is nonzero and fd is a valid shm descriptor.
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED | libc::MAP_HUGETLB,
                    fd,
                    0,
                )
            };
            if ptr != libc::MAP_FAILED {
                return Ok((ptr.cast(), true));
            }
            tracing::debug!(len, "huge-page mapping unavailable, falling back to 4 KiB pages");
        }

        // SAFETY: as above.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        Ok((ptr.cast(), false))
    }

    #[cfg(unix)]
    fn map_anonymous(len: usize) -> Result<(*mut u8, bool), std::io::Error> {
        #[cfg(target_os = "linux")]
        {
            // SAFETY: anonymous mapping, no fd involved.
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED | libc::MAP_ANONYMOUS | libc::MAP_HUGETLB,
                    -1,
                    0,
                )
            };
            if ptr != libc::MAP_FAILED {
                return Ok((ptr.cast(), true));
            }
            tracing::debug!(len, "huge-page mapping unavailable, falling back to 4 KiB pages");
        }

        // SAFETY: as above.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        Ok((ptr.cast(), false))
    }

    #[cfg(not(unix))]
    fn map_anonymous(_len: usize) -> Result<(*mut u8, bool), std::io::Error> {
        Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "shared regions require unix"))
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            // SAFETY: ptr/len are the mapping established at construction.
            unsafe {
                libc::munmap(self.ptr.cast(), self.len);
            }
            if let RegionKind::Named { owner: true } = self.kind {
                if let Ok(shm_name) = std::ffi::CString::new(format!("/{}", self.name)) {
                    // SAFETY: valid NUL-terminated name.
                    unsafe {
                        libc::shm_unlink(shm_name.as_ptr());
                    }
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_region_is_writable() {
        let region = SharedRegion::anonymous(1 << 16).unwrap();
        assert_eq!(region.len(), 1 << 16);
        // SAFETY: fresh region, single thread.
        unsafe {
            region.as_ptr().write(0xAB);
            assert_eq!(region.as_ptr().read(), 0xAB);
        }
    }

    #[test]
    fn test_named_region_round_trip() {
        let ns = format!("ringbus-test-{}", std::process::id());
        let region = SharedRegion::create(&ns, 1 << 16).unwrap();
        assert_eq!(region.name(), ns);
        // SAFETY: fresh mapping.
        unsafe {
            region.as_ptr().add(7).write(0x5A);
        }

        let peer = SharedRegion::open(&ns, 1 << 16).unwrap();
        // SAFETY: both regions map the same shm object.
        unsafe {
            assert_eq!(peer.as_ptr().add(7).read(), 0x5A);
        }
    }
}
