// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! SharedMemoryRegion - POSIX shared memory segment holding control blocks.
//!
//! Wraps shm_open/mmap and places `#[repr(C)]` control structures at fixed
//! offsets so several processes see the same atomics.

use std::ffi::CString;
use std::ptr::NonNull;

use crate::error::SharedMemoryError;

/// Represents a mapped shared memory region.
///
/// This struct owns the mapped memory and will unmap it on drop.
/// The memory can be shared between processes using the same name.
pub struct SharedMemoryRegion {
    /// Name of the shared memory object.
    name: String,
    /// Pointer to the mapped memory.
    ptr: NonNull<u8>,
    /// Size of the mapped region in bytes.
    size: usize,
    /// File descriptor for the shared memory object.
    fd: i32,
    /// Whether this instance created the SHM (and should unlink on drop).
    is_owner: bool,
}

// SAFETY: SharedMemoryRegion can be sent between threads as it owns its memory.
unsafe impl Send for SharedMemoryRegion {}

// SAFETY: shared access only goes through SharedMemoryLayout types, which are
// made of atomics.
unsafe impl Sync for SharedMemoryRegion {}

/// Types that may live inside a shared memory segment.
///
/// # Safety
/// Implementors must be `#[repr(C)]`, contain no pointers or references, be
/// valid when all bytes are zero, and only be mutated through atomics.
pub unsafe trait SharedMemoryLayout: Sync {}

impl SharedMemoryRegion {
    /// Minimum size for a shared memory region.
    pub const MIN_SIZE: usize = 4096;

    /// Maximum size for a shared memory region (1 GB).
    pub const MAX_SIZE: usize = 1024 * 1024 * 1024;

    /// Create and zero a new segment. The creator unlinks it on drop.
    ///
    /// # Errors
    /// Fails if the size is out of bounds, the name is empty or already
    /// taken, or the kernel refuses the mapping.
    pub fn create(name: &str, size: usize) -> Result<Self, SharedMemoryError> {
        let c_name = Self::validated_name(name, size)?;
        let create_failed = |reason: String| SharedMemoryError::CreateFailed {
            name: name.to_string(),
            reason,
        };

        // SAFETY: c_name is a valid CString, flags are valid POSIX flags
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };
        if fd < 0 {
            let errno = std::io::Error::last_os_error();
            if errno.raw_os_error() == Some(libc::EEXIST) {
                return Err(create_failed("Shared memory already exists".to_string()));
            }
            return Err(create_failed(format!("shm_open failed: {}", errno)));
        }

        // SAFETY: fd is a valid descriptor we just opened
        if unsafe { libc::ftruncate(fd, size as libc::off_t) } < 0 {
            let errno = std::io::Error::last_os_error();
            Self::discard_fd(fd, Some(&c_name));
            return Err(create_failed(format!("ftruncate failed: {}", errno)));
        }

        // A fresh POSIX shm object reads as zeroes, which is the valid initial
        // state of every SharedMemoryLayout type.
        let ptr = Self::map_len(fd, size).inspect_err(|_| Self::discard_fd(fd, Some(&c_name)))?;

        tracing::debug!(name = %name, size = size, "Created shared memory region");

        Ok(Self {
            name: name.to_string(),
            ptr,
            size,
            fd,
            is_owner: true,
        })
    }

    /// Attach to a segment created by another process.
    pub fn open(name: &str, size: usize) -> Result<Self, SharedMemoryError> {
        let c_name = Self::validated_name(name, size)?;

        // SAFETY: c_name is a valid CString
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("shm_open failed: {}", std::io::Error::last_os_error()),
            });
        }

        let ptr = Self::map_len(fd, size).inspect_err(|_| Self::discard_fd(fd, None))?;

        tracing::debug!(name = %name, size = size, "Opened shared memory region");

        Ok(Self {
            name: name.to_string(),
            ptr,
            size,
            fd,
            is_owner: false,
        })
    }

    fn validated_name(name: &str, size: usize) -> Result<CString, SharedMemoryError> {
        let invalid = |reason: String| SharedMemoryError::CreateFailed {
            name: name.to_string(),
            reason,
        };
        if !(Self::MIN_SIZE..=Self::MAX_SIZE).contains(&size) {
            return Err(invalid(format!(
                "Size {} outside [{}, {}]",
                size,
                Self::MIN_SIZE,
                Self::MAX_SIZE
            )));
        }
        if name.is_empty() {
            return Err(invalid("Name cannot be empty".to_string()));
        }
        CString::new(format!("/{}", name)).map_err(|e| invalid(format!("Invalid name: {}", e)))
    }

    fn map_len(fd: i32, size: usize) -> Result<NonNull<u8>, SharedMemoryError> {
        // SAFETY: fd is valid, size is bounds checked, offset 0 is valid
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(SharedMemoryError::MapFailed {
                reason: format!("mmap failed: {}", std::io::Error::last_os_error()),
            });
        }
        NonNull::new(ptr as *mut u8).ok_or_else(|| SharedMemoryError::MapFailed {
            reason: "mmap returned null".to_string(),
        })
    }

    fn discard_fd(fd: i32, unlink: Option<&CString>) {
        // SAFETY: fd was opened by us and is not used afterwards
        unsafe { libc::close(fd) };
        if let Some(c_name) = unlink {
            // SAFETY: c_name is a valid CString
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }

    /// Get the name of this shared memory region.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the size of this shared memory region.
    pub fn size(&self) -> usize {
        self.size
    }

    fn check_placement<T>(&self, offset: usize, count: usize) -> Result<(), SharedMemoryError> {
        let align = std::mem::align_of::<T>();
        let len = std::mem::size_of::<T>()
            .checked_mul(count)
            .ok_or(SharedMemoryError::OutOfBounds {
                offset,
                len: usize::MAX,
                size: self.size,
            })?;
        if offset.checked_add(len).map_or(true, |end| end > self.size) {
            return Err(SharedMemoryError::OutOfBounds {
                offset,
                len,
                size: self.size,
            });
        }
        // The mapping itself is page aligned.
        if offset % align != 0 {
            return Err(SharedMemoryError::Misaligned { offset, align });
        }
        Ok(())
    }

    /// Move `value` into the region at `offset` and return a shared view.
    ///
    /// Only the creator should emplace; openers use [`Self::view`].
    pub fn emplace<T: SharedMemoryLayout>(
        &self,
        offset: usize,
        value: T,
    ) -> Result<&T, SharedMemoryError> {
        self.check_placement::<T>(offset, 1)?;
        // SAFETY: bounds and alignment checked; T is valid to overwrite
        // since any prior content is plain data.
        unsafe {
            let ptr = self.ptr.as_ptr().add(offset) as *mut T;
            std::ptr::write(ptr, value);
            Ok(&*ptr)
        }
    }

    /// Initialize `count` consecutive values at `offset`.
    pub fn emplace_slice<T: SharedMemoryLayout>(
        &self,
        offset: usize,
        count: usize,
        mut init: impl FnMut(usize) -> T,
    ) -> Result<&[T], SharedMemoryError> {
        self.check_placement::<T>(offset, count)?;
        // SAFETY: bounds and alignment checked for the whole slice.
        unsafe {
            let base = self.ptr.as_ptr().add(offset) as *mut T;
            for i in 0..count {
                std::ptr::write(base.add(i), init(i));
            }
            Ok(std::slice::from_raw_parts(base, count))
        }
    }

    /// View a value another process already emplaced at `offset`.
    pub fn view<T: SharedMemoryLayout>(&self, offset: usize) -> Result<&T, SharedMemoryError> {
        self.check_placement::<T>(offset, 1)?;
        // SAFETY: checked placement; the bytes are either zero (fresh mapping)
        // or a value of T emplaced by a peer, both valid for T.
        unsafe { Ok(&*(self.ptr.as_ptr().add(offset) as *const T)) }
    }

    /// View `count` values another process already emplaced at `offset`.
    pub fn view_slice<T: SharedMemoryLayout>(
        &self,
        offset: usize,
        count: usize,
    ) -> Result<&[T], SharedMemoryError> {
        self.check_placement::<T>(offset, count)?;
        // SAFETY: see `view`.
        unsafe {
            Ok(std::slice::from_raw_parts(
                self.ptr.as_ptr().add(offset) as *const T,
                count,
            ))
        }
    }
}

impl Drop for SharedMemoryRegion {
    fn drop(&mut self) {
        // Unmap the memory
        // SAFETY: ptr and size were set during creation
        let result = unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size) };
        if result < 0 {
            tracing::error!(
                name = %self.name,
                error = %std::io::Error::last_os_error(),
                "Failed to unmap shared memory"
            );
        }

        // Close the file descriptor
        // SAFETY: fd was opened during creation
        unsafe { libc::close(self.fd) };

        // If we're the owner, unlink the shared memory
        if self.is_owner {
            let shm_name = format!("/{}", self.name);
            if let Ok(c_name) = CString::new(shm_name.as_str()) {
                // SAFETY: c_name is a valid CString
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                tracing::debug!(name = %self.name, "Unlinked shared memory region");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    #[repr(C)]
    struct Counter(AtomicU64);

    // SAFETY: single atomic, zero is valid.
    unsafe impl SharedMemoryLayout for Counter {}

    fn unique_name(tag: &str) -> String {
        format!("shmcom-region-{}-{}", tag, std::process::id())
    }

    #[test]
    fn test_shm_size_validation() {
        // Too small
        assert!(SharedMemoryRegion::create("test-small", 100).is_err());

        // Too large
        assert!(
            SharedMemoryRegion::create("test-large", SharedMemoryRegion::MAX_SIZE + 1).is_err()
        );
    }

    #[test]
    fn test_shm_empty_name() {
        assert!(SharedMemoryRegion::create("", 4096).is_err());
    }

    #[test]
    fn test_placement_bounds_and_alignment() {
        let region = SharedMemoryRegion::create(&unique_name("bounds"), 4096).unwrap();

        assert!(matches!(
            region.emplace(4090, Counter(AtomicU64::new(0))),
            Err(SharedMemoryError::OutOfBounds { .. })
        ));
        assert!(matches!(
            region.emplace(3, Counter(AtomicU64::new(0))),
            Err(SharedMemoryError::Misaligned { offset: 3, align: 8 })
        ));
        assert!(region.emplace(8, Counter(AtomicU64::new(0))).is_ok());
    }

    #[test]
    fn test_two_mappings_share_atomics() {
        let name = unique_name("shared");
        let owner = SharedMemoryRegion::create(&name, 4096).unwrap();
        let peer = SharedMemoryRegion::open(&name, 4096).unwrap();

        let mine = owner.emplace(64, Counter(AtomicU64::new(7))).unwrap();
        let theirs: &Counter = peer.view(64).unwrap();

        mine.0.fetch_add(1, Ordering::AcqRel);
        assert_eq!(theirs.0.load(Ordering::Acquire), 8);

        let counters = owner.emplace_slice(128, 4, |i| Counter(AtomicU64::new(i as u64))).unwrap();
        let seen: &[Counter] = peer.view_slice(128, 4).unwrap();
        counters[3].0.store(42, Ordering::Release);
        assert_eq!(seen[3].0.load(Ordering::Acquire), 42);
        assert_eq!(seen[2].0.load(Ordering::Acquire), 2);
    }
}
