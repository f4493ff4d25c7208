//! Fixed-capacity record buffer.
//!
//! The interceptors may not allocate, so records are formatted into this
//! stack buffer and handed to the emitter as-is. Overlong records are
//! silently truncated; a cut record beats failing inside the kernel.

use core::fmt;

/// Room for one record. The widest allocate record with a full-length
/// process name stays well under this.
pub const LINE_CAP: usize = 384;

/// A `fmt::Write` sink over a fixed byte array, always NUL-terminated so it
/// can be passed to the kernel log routine directly.
pub struct LineBuf {
    buf: [u8; LINE_CAP + 1],
    len: usize,
}

impl LineBuf {
    pub const fn new() -> Self {
        Self {
            buf: [0; LINE_CAP + 1],
            len: 0,
        }
    }

    /// The formatted record. Falls back to the longest valid prefix if a
    /// truncation split a multi-byte character.
    pub fn as_str(&self) -> &str {
        match core::str::from_utf8(&self.buf[..self.len]) {
            Ok(s) => s,
            Err(e) => {
                let valid = e.valid_up_to();
                core::str::from_utf8(&self.buf[..valid]).unwrap_or("")
            }
        }
    }

    /// Pointer to the NUL-terminated record, for the kernel log capability.
    pub fn as_cstr_ptr(&self) -> *const u8 {
        self.buf.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for LineBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Write for LineBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = LINE_CAP - self.len;
        let n = s.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        self.buf[self.len] = 0;
        Ok(())
    }
}
