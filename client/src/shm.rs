//! Shared buffer manager.
//!
//! Packets delivered through shared memory only carry a handle name and an
//! offset range.  The named OS region is mapped on first reference and
//! reference-counted across every packet slicing into it.
//!
//! Reaching a count of zero does not unmap: the device reuses its ring
//! buffers, so a mapping stays cached until [`SharedBuffers::evict_unused`]
//! is called explicitly.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// One mapped shared-memory region.
pub struct Mapping {
    region: sys::Region,
}

impl Mapping {
    fn open(handle: &str, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::shared_memory(handle, "zero-sized mapping"));
        }
        let region = sys::open(handle, size).map_err(|e| Error::shared_memory(handle, e))?;
        Ok(Self { region })
    }

    #[cfg(all(test, unix))]
    pub(crate) fn anonymous(len: usize) -> Self {
        Self {
            region: memmap2::MmapMut::map_anon(len).unwrap(),
        }
    }

    #[cfg(all(test, unix))]
    pub(crate) fn fill(&mut self, bytes: &[u8]) {
        self.region[..bytes.len()].copy_from_slice(bytes);
    }
}

impl Deref for Mapping {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.region
    }
}

struct Entry {
    mapping: Arc<Mapping>,
    refs: usize,
}

/// Process-wide table of mapped regions, keyed by handle name.
#[derive(Default)]
pub struct SharedBuffers {
    entries: Mutex<HashMap<String, Entry>>,
}

impl SharedBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// The table shared by every [`Client`](crate::Client) that was not
    /// given its own.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<SharedBuffers>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(Self::new())).clone()
    }

    /// Map `handle` if needed and take one reference on it.
    pub fn acquire(self: &Arc<Self>, handle: &str, size: usize) -> Result<BufferLease> {
        let mut entries = self.entries.lock();
        if !entries.contains_key(handle) {
            let mapping = Mapping::open(handle, size)?;
            info!("Mapped shared buffer {handle} ({size} bytes)");
            entries.insert(
                handle.to_string(),
                Entry {
                    mapping: Arc::new(mapping),
                    refs: 0,
                },
            );
        }
        let entry = entries
            .get_mut(handle)
            .ok_or_else(|| Error::shared_memory(handle, "not found"))?;
        entry.refs += 1;

        Ok(BufferLease {
            buffers: self.clone(),
            handle: handle.to_string(),
            mapping: entry.mapping.clone(),
        })
    }

    /// Drop one reference on `handle`.  Unknown handles are ignored.
    pub fn release(&self, handle: &str) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(handle) {
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs == 0 {
                debug!("Shared buffer {handle} unreferenced, keeping it mapped");
            }
        }
    }

    /// Current reference count of `handle`, zero when unmapped.
    pub fn refs(&self, handle: &str) -> usize {
        self.entries.lock().get(handle).map_or(0, |e| e.refs)
    }

    pub fn is_mapped(&self, handle: &str) -> bool {
        self.entries.lock().contains_key(handle)
    }

    /// Unmap every region nobody references.  Returns how many were removed.
    ///
    /// A region still borrowed through a lease is unmapped once that lease
    /// is dropped.
    pub fn evict_unused(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|handle, e| {
            let keep = e.refs > 0;
            if !keep {
                info!("Unmapping shared buffer {handle}");
            }
            keep
        });
        before - entries.len()
    }

    #[cfg(all(test, unix))]
    pub(crate) fn preload(&self, handle: &str, mapping: Mapping) {
        self.entries.lock().insert(
            handle.to_string(),
            Entry {
                mapping: Arc::new(mapping),
                refs: 0,
            },
        );
    }
}

/// One reference on a mapped region.  Dropping it releases the reference.
pub struct BufferLease {
    buffers: Arc<SharedBuffers>,
    handle: String,
    mapping: Arc<Mapping>,
}

impl BufferLease {
    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn bytes(&self) -> &[u8] {
        &self.mapping
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        self.buffers.release(&self.handle);
    }
}

// ── platform mapping ─────────────────────────────────────────────────────

#[cfg(unix)]
mod sys {
    use std::ffi::CString;
    use std::fs::File;
    use std::io;
    use std::os::unix::io::FromRawFd;

    use memmap2::{MmapMut, MmapOptions};

    pub type Region = MmapMut;

    /// Open the POSIX shared-memory object `handle` (`/dev/shm/<handle>` on
    /// Linux), size it and map it read-write.
    pub fn open(handle: &str, size: usize) -> io::Result<Region> {
        let name = CString::new(format!("/{}", handle.trim_start_matches('/')))?;
        let mode = (libc::S_IRUSR | libc::S_IWUSR | libc::S_IRGRP | libc::S_IWGRP) as libc::c_uint;
        // SAFETY: `name` is a valid NUL-terminated string.
        let fd = unsafe { libc::shm_open(name.as_ptr(), libc::O_RDWR, mode) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `fd` was just opened and is owned by nobody else.
        let file = unsafe { File::from_raw_fd(fd) };
        file.set_len(size as u64)?;
        // SAFETY: the region is shared with the device by contract; its
        // length was fixed above.
        unsafe { MmapOptions::new().len(size).map_mut(&file) }
    }
}

#[cfg(windows)]
mod sys {
    use std::ffi::OsStr;
    use std::io;
    use std::ops::Deref;
    use std::os::windows::ffi::OsStrExt;

    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
    use windows::Win32::System::Memory::{
        CreateFileMappingW, MapViewOfFile, UnmapViewOfFile, FILE_MAP_READ,
        MEMORYMAPPEDVIEW_ADDRESS, PAGE_READONLY,
    };

    /// Read-only view of a named file mapping.
    pub struct Region {
        handle: HANDLE,
        view: MEMORYMAPPEDVIEW_ADDRESS,
        len: usize,
    }

    // SAFETY: the view is immutable from this process and lives until drop.
    unsafe impl Send for Region {}
    unsafe impl Sync for Region {}

    pub fn open(handle: &str, size: usize) -> io::Result<Region> {
        let name: Vec<u16> = OsStr::new(handle)
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();
        // SAFETY: `name` is NUL-terminated and outlives the call.
        let mapping = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                None,
                PAGE_READONLY,
                0,
                size as u32,
                PCWSTR(name.as_ptr()),
            )
        }?;
        // SAFETY: `mapping` is a valid file-mapping handle.
        let view = unsafe { MapViewOfFile(mapping, FILE_MAP_READ, 0, 0, size) };
        if view.Value.is_null() {
            let err = io::Error::last_os_error();
            // SAFETY: closing the handle we just created.
            unsafe {
                let _ = CloseHandle(mapping);
            }
            return Err(err);
        }
        Ok(Region {
            handle: mapping,
            view,
            len: size,
        })
    }

    impl Deref for Region {
        type Target = [u8];

        fn deref(&self) -> &[u8] {
            // SAFETY: the view spans `len` readable bytes until drop.
            unsafe { std::slice::from_raw_parts(self.view.Value as *const u8, self.len) }
        }
    }

    impl Drop for Region {
        fn drop(&mut self) {
            // SAFETY: both were obtained in `open` and are released once.
            unsafe {
                let _ = UnmapViewOfFile(self.view);
                let _ = CloseHandle(self.handle);
            }
        }
    }
}
