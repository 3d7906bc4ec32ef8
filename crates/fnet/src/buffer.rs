//! Per-connection byte buffer with cursor-based incremental consumption
//!
//! A `SockBuffer` is a fixed-capacity slab with a read cursor and a write
//! cursor (`0 <= rd <= wd <= capacity`). Bytes between the cursors are
//! "pending"; bytes past the write cursor are free space. [`SockBuffer::fill`]
//! appends from the socket without blocking, the `read_*` methods consume
//! pending bytes, and [`SockBuffer::compact`] reclaims consumed space.
//!
//! Returned views borrow the buffer, so the borrow checker enforces the
//! aliasing contract: a view cannot be held across `compact`, `fill` or any
//! other mutating call.

use std::os::fd::RawFd;

/// Fixed-capacity connection buffer.
pub struct SockBuffer {
    slab: Box<[u8]>,
    rd: usize,
    wd: usize,
    fd: RawFd,
}

impl SockBuffer {
    /// Create a buffer of `capacity` bytes reading from `fd`.
    ///
    /// `fd` is borrowed, not owned: the buffer never closes it. Pass `-1`
    /// for a buffer fed purely through [`SockBuffer::append`].
    pub fn new(fd: RawFd, capacity: usize) -> Self {
        Self {
            slab: vec![0u8; capacity].into_boxed_slice(),
            rd: 0,
            wd: 0,
            fd,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn capacity(&self) -> usize {
        self.slab.len()
    }

    /// Unconsumed bytes between the read and write cursors.
    pub fn pending(&self) -> usize {
        self.wd - self.rd
    }

    /// Writable bytes past the write cursor.
    pub fn free_space(&self) -> usize {
        self.slab.len() - self.wd
    }

    /// Read from the socket into free space until the read would block,
    /// the peer closes, an error occurs, or free space runs out.
    ///
    /// Returns the number of bytes appended. Zero means no progress: the
    /// caller decides whether that is "wait for more" or "connection gone"
    /// based on its own readiness context.
    pub fn fill(&mut self) -> usize {
        let mut count = 0;
        loop {
            let free = self.free_space();
            if free == 0 {
                break;
            }
            let n = unsafe {
                libc::recv(
                    self.fd,
                    self.slab[self.wd..].as_mut_ptr() as *mut libc::c_void,
                    free,
                    libc::MSG_DONTWAIT,
                )
            };
            if n <= 0 {
                break;
            }
            self.wd += n as usize;
            count += n as usize;
        }
        count
    }

    /// Copy `bytes` into free space, stopping at capacity.
    ///
    /// Returns the number of bytes actually copied. The in-memory
    /// counterpart of [`SockBuffer::fill`].
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.free_space());
        self.slab[self.wd..self.wd + n].copy_from_slice(&bytes[..n]);
        self.wd += n;
        n
    }

    /// Scan the pending region for `delim`. On a match, return the bytes
    /// before it and consume through the delimiter. On no match, return
    /// `None` and consume nothing, so re-scanning with no new data is safe
    /// and cheap.
    pub fn read_line(&mut self, delim: &[u8]) -> Option<&[u8]> {
        if delim.is_empty() || self.pending() < delim.len() {
            return None;
        }
        let pos = self.slab[self.rd..self.wd]
            .windows(delim.len())
            .position(|w| w == delim)?;
        let start = self.rd;
        self.rd += pos + delim.len();
        Some(&self.slab[start..start + pos])
    }

    /// Consume and return up to `len` pending bytes.
    ///
    /// Never blocks and never errors; the returned slice is shorter than
    /// `len` when fewer bytes are pending.
    pub fn read_text(&mut self, len: usize) -> &[u8] {
        let n = len.min(self.pending());
        let start = self.rd;
        self.rd += n;
        &self.slab[start..start + n]
    }

    /// Drop all pending content by resetting the cursors.
    pub fn clear(&mut self) {
        self.rd = 0;
        self.wd = 0;
    }

    /// Move the pending region to the front of the slab, reclaiming the
    /// consumed prefix as free space. Invalidates previously returned views
    /// (enforced by the borrow checker).
    pub fn compact(&mut self) {
        let n = self.pending();
        self.slab.copy_within(self.rd..self.wd, 0);
        self.rd = 0;
        self.wd = n;
    }

    /// Swap in a freshly allocated slab of `new_capacity` bytes, discarding
    /// unread content. Returns the old slab to the caller instead of
    /// destroying it, so a buffer upgrade costs no extra copy.
    pub fn replace(&mut self, new_capacity: usize) -> Box<[u8]> {
        self.replace_with(vec![0u8; new_capacity].into_boxed_slice())
    }

    /// Swap in a caller-provided slab, discarding unread content, and
    /// return the old one.
    pub fn replace_with(&mut self, slab: Box<[u8]>) -> Box<[u8]> {
        let old = std::mem::replace(&mut self.slab, slab);
        self.clear();
        old
    }
}

impl std::fmt::Debug for SockBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SockBuffer")
            .field("fd", &self.fd)
            .field("capacity", &self.capacity())
            .field("pending", &self.pending())
            .field("free_space", &self.free_space())
            .finish()
    }
}
