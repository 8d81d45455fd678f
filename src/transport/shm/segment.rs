// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Injected shared-memory provider.
//!
//! Defines the `create/open/unlink` + mapped-bytes capability set the
//! region manager depends on, plus two implementations: [`PosixProvider`],
//! a POSIX `shm_open`/`mmap` backend (the usual `shm_open`/`ftruncate`/
//! `mmap`/`munmap` sequence, with a leading-slash name-validation rule),
//! and [`InMemoryProvider`], a `DashMap`-backed test double standing in
//! for real shared memory.

use std::ffi::CString;
use std::io;
use std::ptr;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{FlexShmError, Result};

/// Mapped bytes of one open or created region.
pub trait ShmHandle: Send + Sync {
    fn bytes(&self) -> &[u8];
    fn bytes_mut(&mut self) -> &mut [u8];
}

/// Named shared-memory backend, injected into the region manager.
pub trait ShmProvider: Send + Sync {
    type Handle: ShmHandle;

    /// Create a new named region of exactly `n_bytes`, replacing any
    /// existing region of the same name.
    fn create(&self, name: &str, n_bytes: usize) -> Result<Self::Handle>;

    /// Open and map an existing named region.
    fn open(&self, name: &str) -> Result<Self::Handle>;

    /// Remove the name. Idempotent: removing an already-removed name is
    /// not an error.
    fn unlink(&self, name: &str) -> Result<()>;
}

fn validate_name(name: &str) -> Result<()> {
    if !name.starts_with('/') {
        return Err(FlexShmError::ProviderError(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("segment name must start with '/': {name}"),
        )));
    }
    if name.len() > 1 && name[1..].contains('/') {
        return Err(FlexShmError::ProviderError(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("segment name cannot contain '/' after the prefix: {name}"),
        )));
    }
    if name.len() > 255 {
        return Err(FlexShmError::ProviderError(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("segment name too long (max 255): {name}"),
        )));
    }
    Ok(())
}

/// POSIX `shm_open`/`mmap` mapping. Unmaps on drop; does not unlink.
pub struct PosixHandle {
    ptr: *mut u8,
    size: usize,
}

// SAFETY: the mapping is `MAP_SHARED` memory; synchronization is the
// caller's responsibility (the slot protocol).
unsafe impl Send for PosixHandle {}
unsafe impl Sync for PosixHandle {}

impl ShmHandle for PosixHandle {
    fn bytes(&self) -> &[u8] {
        // SAFETY: ptr/size come from a successful mmap of exactly `size` bytes,
        // held for the lifetime of this handle.
        unsafe { std::slice::from_raw_parts(self.ptr, self.size) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: see `bytes`.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.size) }
    }
}

impl Drop for PosixHandle {
    fn drop(&mut self) {
        // SAFETY: ptr/size are the exact mapping returned by the mmap call
        // that produced this handle; munmap runs at most once (Drop semantics).
        unsafe {
            libc::munmap(self.ptr.cast(), self.size);
        }
    }
}

/// POSIX shared memory provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixProvider;

impl ShmProvider for PosixProvider {
    type Handle = PosixHandle;

    fn create(&self, name: &str, n_bytes: usize) -> Result<PosixHandle> {
        validate_name(name)?;
        let c_name = CString::new(name).map_err(|e| {
            FlexShmError::ProviderError(io::Error::new(io::ErrorKind::InvalidInput, e))
        })?;

        // SAFETY: c_name is a valid NUL-terminated string; shm_unlink is safe
        // to call unconditionally (errors ignored) to clear a stale segment
        // before O_EXCL create.
        let fd = unsafe {
            libc::shm_unlink(c_name.as_ptr());
            libc::shm_open(c_name.as_ptr(), libc::O_CREAT | libc::O_RDWR | libc::O_EXCL, 0o600)
        };
        if fd < 0 {
            return Err(FlexShmError::ProviderError(io::Error::last_os_error()));
        }

        // SAFETY: fd is the valid descriptor returned above.
        let truncated = unsafe { libc::ftruncate(fd, n_bytes as libc::off_t) };
        if truncated < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is still open and owned by this function on this error path.
            unsafe { libc::close(fd) };
            return Err(FlexShmError::ProviderError(err));
        }

        let ptr = map_fd(fd, n_bytes)?;
        // SAFETY: fd is valid; mmap above retains its own reference via the mapping.
        unsafe { libc::close(fd) };

        // SAFETY: ptr/n_bytes are the just-established mapping, writable, not aliased yet.
        unsafe { ptr::write_bytes(ptr, 0, n_bytes) };

        Ok(PosixHandle { ptr, size: n_bytes })
    }

    fn open(&self, name: &str) -> Result<PosixHandle> {
        validate_name(name)?;
        let c_name = CString::new(name).map_err(|e| {
            FlexShmError::ProviderError(io::Error::new(io::ErrorKind::InvalidInput, e))
        })?;

        // SAFETY: c_name is a valid NUL-terminated string.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::NotFound {
                return Err(FlexShmError::NotFound(name.to_string()));
            }
            return Err(FlexShmError::ProviderError(err));
        }

        // SAFETY: fd is the valid descriptor returned above.
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut stat) } < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(FlexShmError::ProviderError(err));
        }
        let size = stat.st_size as usize;

        let ptr = map_fd(fd, size).inspect_err(|_| {
            // SAFETY: fd owned by this call on the error path.
            unsafe { libc::close(fd) };
        })?;
        // SAFETY: fd valid; mapping retains its own reference.
        unsafe { libc::close(fd) };

        Ok(PosixHandle { ptr, size })
    }

    fn unlink(&self, name: &str) -> Result<()> {
        let c_name = CString::new(name).map_err(|e| {
            FlexShmError::ProviderError(io::Error::new(io::ErrorKind::InvalidInput, e))
        })?;
        // SAFETY: c_name is a valid NUL-terminated string; unlinking a
        // nonexistent name is reported via errno and treated as success below.
        let ret = unsafe { libc::shm_unlink(c_name.as_ptr()) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                return Err(FlexShmError::ProviderError(err));
            }
        }
        Ok(())
    }
}

fn map_fd(fd: libc::c_int, size: usize) -> Result<*mut u8> {
    // SAFETY: fd is a valid, open descriptor sized to at least `size` bytes
    // by the caller; null first argument lets the kernel place the mapping.
    let ptr = unsafe {
        libc::mmap(ptr::null_mut(), size, libc::PROT_READ | libc::PROT_WRITE, libc::MAP_SHARED, fd, 0)
    };
    if ptr == libc::MAP_FAILED {
        return Err(FlexShmError::ProviderError(io::Error::last_os_error()));
    }
    Ok(ptr.cast())
}

struct InMemoryBacking {
    data: std::cell::UnsafeCell<Box<[u8]>>,
}

// SAFETY: mirrors real shared memory — concurrent access is synchronized by
// the slot protocol, not by Rust's aliasing rules.
unsafe impl Send for InMemoryBacking {}
unsafe impl Sync for InMemoryBacking {}

/// In-process stand-in for shared memory. Every open handle for a given
/// name shares the same backing bytes, so producer and reader handles
/// created from the same provider instance observe each other's writes
/// exactly as real shared memory would.
#[derive(Default)]
pub struct InMemoryProvider {
    segments: DashMap<String, Arc<InMemoryBacking>>,
}

impl InMemoryProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct InMemoryHandle {
    backing: Arc<InMemoryBacking>,
}

impl ShmHandle for InMemoryHandle {
    fn bytes(&self) -> &[u8] {
        // SAFETY: shared by construction; readers/writers serialize through
        // the slot protocol, not through this accessor.
        unsafe { &*self.backing.data.get() }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: see `bytes`.
        unsafe { &mut *self.backing.data.get() }
    }
}

impl ShmProvider for InMemoryProvider {
    type Handle = InMemoryHandle;

    fn create(&self, name: &str, n_bytes: usize) -> Result<InMemoryHandle> {
        let backing = Arc::new(InMemoryBacking {
            data: std::cell::UnsafeCell::new(vec![0u8; n_bytes].into_boxed_slice()),
        });
        self.segments.insert(name.to_string(), backing.clone());
        Ok(InMemoryHandle { backing })
    }

    fn open(&self, name: &str) -> Result<InMemoryHandle> {
        let backing = self
            .segments
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FlexShmError::NotFound(name.to_string()))?;
        Ok(InMemoryHandle { backing })
    }

    fn unlink(&self, name: &str) -> Result<()> {
        self.segments.remove(name);
        Ok(())
    }
}
