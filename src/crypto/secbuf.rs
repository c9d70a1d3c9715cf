//! Secure scratch memory for key material and decrypted payloads.
//!
//! A `SecureBuffer` owns a fixed allocation that is locked out of swap
//! where the platform supports it and is always zeroized before the
//! memory returns to the allocator.  Every buffer that has held key or
//! plaintext bytes must live in one of these.

use std::ops::{Deref, DerefMut};

use zeroize::Zeroize;

/// An owned byte region with destroy-on-release semantics.
///
/// The backing allocation is a `Box<[u8]>` so it can never silently
/// reallocate and leave an unzeroized copy behind.  Growing a buffer
/// goes through [`SecureBuffer::resize`], which moves the contents to a
/// fresh region and destroys the old one.
pub struct SecureBuffer {
    buf: Box<[u8]>,
    locked: bool,
}

impl SecureBuffer {
    /// Allocate a zero-filled buffer of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        let buf = vec![0u8; len].into_boxed_slice();
        let locked = mlock(&buf);
        Self { buf, locked }
    }

    /// Allocate a buffer holding a copy of `data`.
    ///
    /// Note: the source slice is not destroyed; callers that own
    /// sensitive source bytes must zeroize them separately.
    pub fn from_slice(data: &[u8]) -> Self {
        let mut sb = Self::zeroed(data.len());
        sb.buf.copy_from_slice(data);
        sb
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Move the contents into a fresh buffer of `new_len` bytes.
    ///
    /// Bytes beyond `new_len` are discarded; a larger buffer is
    /// zero-extended.  The old region is destroyed before this returns.
    pub fn resize(self, new_len: usize) -> Self {
        let mut next = Self::zeroed(new_len);
        let n = self.buf.len().min(new_len);
        next.buf[..n].copy_from_slice(&self.buf[..n]);
        next
    }
}

impl Deref for SecureBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for SecureBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for SecureBuffer {
    fn drop(&mut self) {
        self.buf.zeroize();
        if self.locked {
            munlock(&self.buf);
        }
    }
}

impl std::fmt::Debug for SecureBuffer {
    /// Never print the contents.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecureBuffer({} bytes)", self.buf.len())
    }
}

/// Try to lock the region out of swap.  Failure (no privilege, limits)
/// falls back to zeroize-only; the destroy-on-release contract holds
/// either way.
#[cfg(unix)]
fn mlock(buf: &[u8]) -> bool {
    if buf.is_empty() {
        return false;
    }
    // SAFETY: the pointer and length describe our own live allocation.
    unsafe { libc::mlock(buf.as_ptr().cast(), buf.len()) == 0 }
}

#[cfg(unix)]
fn munlock(buf: &[u8]) {
    // SAFETY: only called on a region that mlock() succeeded for.
    unsafe {
        libc::munlock(buf.as_ptr().cast(), buf.len());
    }
}

#[cfg(not(unix))]
fn mlock(_buf: &[u8]) -> bool {
    false
}

#[cfg(not(unix))]
fn munlock(_buf: &[u8]) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_buffer_is_zero() {
        let sb = SecureBuffer::zeroed(64);
        assert_eq!(sb.len(), 64);
        assert!(sb.iter().all(|&b| b == 0));
    }

    #[test]
    fn from_slice_copies_contents() {
        let sb = SecureBuffer::from_slice(b"top secret");
        assert_eq!(&sb[..], b"top secret");
    }

    #[test]
    fn resize_preserves_prefix() {
        let sb = SecureBuffer::from_slice(b"abcdef");
        let grown = sb.resize(8);
        assert_eq!(&grown[..6], b"abcdef");
        assert_eq!(&grown[6..], &[0, 0]);

        let shrunk = grown.resize(3);
        assert_eq!(&shrunk[..], b"abc");
    }

    #[test]
    fn empty_buffer_is_fine() {
        let sb = SecureBuffer::zeroed(0);
        assert!(sb.is_empty());
    }
}
