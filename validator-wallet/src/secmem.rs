//! Page locking for in-memory secrets.
//!
//! Recovery phrases and decrypted seeds are pinned in RAM with `mlock()`
//! (unix) or `VirtualLock()` (windows) so they are not written to swap.
//! Locking is best effort: a failure is logged and the caller carries on,
//! relying on `zeroize` to clear the bytes when they are dropped.

use std::ptr::NonNull;

/// Outcome of a page-lock request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResult {
    Locked,
    Failed,
    Unsupported,
}

/// Lock `len` bytes starting at `ptr` into physical memory.
///
/// # Safety
/// `ptr` must point to valid memory of at least `len` bytes.
pub unsafe fn mlock(ptr: NonNull<u8>, len: usize) -> LockResult {
    if len == 0 {
        return LockResult::Locked;
    }

    #[cfg(unix)]
    {
        if libc::mlock(ptr.as_ptr() as *const libc::c_void, len) == 0 {
            tracing::debug!("locked {} bytes of secret memory", len);
            return LockResult::Locked;
        }
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        let reason = match errno {
            libc::ENOMEM => "exceeds RLIMIT_MEMLOCK",
            libc::EPERM => "missing CAP_IPC_LOCK",
            libc::EINVAL => "invalid address range",
            _ => "unknown error",
        };
        tracing::warn!(
            "could not lock secret memory: {} (errno {}), it may be swapped to disk",
            reason,
            errno
        );
        LockResult::Failed
    }

    #[cfg(windows)]
    {
        use windows::Win32::System::Memory::VirtualLock;

        if VirtualLock(ptr.as_ptr() as *const std::ffi::c_void, len).is_ok() {
            tracing::debug!("locked {} bytes of secret memory", len);
            LockResult::Locked
        } else {
            tracing::warn!(
                "could not lock secret memory: {}, it may be swapped to disk",
                windows::core::Error::from_win32()
            );
            LockResult::Failed
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = ptr;
        tracing::warn!("memory locking is not supported on this platform");
        LockResult::Unsupported
    }
}

/// Release a region previously locked with [`mlock`].
///
/// # Safety
/// `ptr` must point to valid memory of at least `len` bytes that was
/// locked with [`mlock`].
pub unsafe fn munlock(ptr: NonNull<u8>, len: usize) {
    if len == 0 {
        return;
    }

    #[cfg(unix)]
    {
        if libc::munlock(ptr.as_ptr() as *const libc::c_void, len) != 0 {
            tracing::debug!("munlock returned non-zero (already unlocked?)");
        }
    }

    #[cfg(windows)]
    {
        use windows::Win32::System::Memory::VirtualUnlock;

        if VirtualUnlock(ptr.as_ptr() as *const std::ffi::c_void, len).is_err() {
            tracing::debug!("VirtualUnlock failed (already unlocked?)");
        }
    }

    #[cfg(not(any(unix, windows)))]
    let _ = ptr;
}

/// RAII guard that keeps a memory region locked until dropped.
///
/// The guard must be dropped before the memory it covers is freed. Owners
/// declare it as their first field so it drops first.
#[derive(Debug)]
pub struct LockedRegion {
    ptr: NonNull<u8>,
    len: usize,
    was_locked: bool,
}

impl LockedRegion {
    /// # Safety
    /// `ptr` must point to `len` valid bytes that outlive the returned guard.
    pub unsafe fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Self {
            ptr,
            len,
            was_locked: mlock(ptr, len) == LockResult::Locked,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.was_locked
    }
}

impl Drop for LockedRegion {
    fn drop(&mut self) {
        if self.was_locked {
            // SAFETY: owners drop the guard before the locked memory.
            unsafe { munlock(self.ptr, self.len) }
        }
    }
}

// SAFETY: the pointer is never dereferenced, only handed to the OS.
unsafe impl Send for LockedRegion {}
unsafe impl Sync for LockedRegion {}

/// Lock the heap bytes behind `bytes`.
///
/// # Safety
/// The buffer must not be reallocated or freed while the guard lives.
pub unsafe fn lock_bytes(bytes: &[u8]) -> LockedRegion {
    match NonNull::new(bytes.as_ptr() as *mut u8) {
        Some(ptr) if !bytes.is_empty() => LockedRegion::new(ptr, bytes.len()),
        _ => LockedRegion {
            ptr: NonNull::dangling(),
            len: 0,
            was_locked: true,
        },
    }
}

/// Lock the heap bytes behind a string.
///
/// # Safety
/// Same contract as [`lock_bytes`].
pub unsafe fn lock_string(s: &str) -> LockedRegion {
    lock_bytes(s.as_bytes())
}
