// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Access to caller-provided memory at the C boundaries.

use mage_common_posix::errno::Errno;

/// View `len` bytes at `ptr`. A zero length never touches `ptr`, so it may be null.
///
/// # Safety
///
/// Unless null, `ptr` must be valid for reads of `len` bytes for `'a`, with no concurrent writes.
pub(crate) unsafe fn slice<'a>(ptr: *const u8, len: usize) -> Result<&'a [u8], Errno> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(Errno::EFAULT);
    }
    // SAFETY: non-null, and the caller vouches for the rest.
    Ok(unsafe { core::slice::from_raw_parts(ptr, len) })
}

/// Mutable counterpart of [`slice`].
///
/// # Safety
///
/// Unless null, `ptr` must be valid for reads and writes of `len` bytes for `'a`, with no other
/// access in the meantime.
pub(crate) unsafe fn slice_mut<'a>(ptr: *mut u8, len: usize) -> Result<&'a mut [u8], Errno> {
    if len == 0 {
        return Ok(&mut []);
    }
    if ptr.is_null() {
        return Err(Errno::EFAULT);
    }
    // SAFETY: non-null, and the caller vouches for the rest.
    Ok(unsafe { core::slice::from_raw_parts_mut(ptr, len) })
}

/// Copy as much of `src` as fits into the `cap` bytes at `dst`, returning how much was copied.
///
/// # Safety
///
/// Unless null, `dst` must be valid for writes of `cap` bytes.
pub(crate) unsafe fn copy_truncated(src: &[u8], dst: *mut u8, cap: usize) -> usize {
    if dst.is_null() {
        return 0;
    }
    let n = src.len().min(cap);
    // SAFETY: `n <= cap`, and `src` is a live slice that cannot overlap caller memory we were
    // handed for writing.
    unsafe { core::ptr::copy_nonoverlapping(src.as_ptr(), dst, n) };
    n
}
