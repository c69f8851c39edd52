//! Growable input/output byte buffers with a hard ceiling.
//!
//! Grounded in `src/util/input_buffer.c` / `src/util/output_buffer.c` /
//! `include/luasandbox/util/{input,output}_buffer.h`: growth doubles
//! capacity until it meets the requested size, capped at `maxsize`; the
//! input buffer additionally tracks `scanpos` (never moves backward) and
//! compacts live bytes to offset zero on growth.

use heka_util::pow2::next_power_of_two;

/// Outcome of a buffer-growth request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandResult {
    Ok,
    /// Growing past `maxsize` was requested.
    Full,
    /// The system allocator refused the request (unreachable in practice for
    /// `Vec`-backed buffers short of real OOM, kept for parity with the C
    /// API's three-way result).
    Oom,
}

/// A growable byte buffer fed by a byte stream, tracking how far a scanner
/// has progressed so repeated scans don't re-examine already-consumed bytes.
#[derive(Debug, Clone)]
pub struct InputBuffer {
    buf: Vec<u8>,
    maxsize: usize,
    /// Write position: bytes `[0, readpos)` are valid data.
    readpos: usize,
    /// Scan position: bytes `[0, scanpos)` have already been examined by the
    /// framer. Never moves backward.
    scanpos: usize,
    /// Cached "expected message length" so the framer doesn't need to
    /// re-parse the header while waiting for more bytes.
    msglen: usize,
}

impl InputBuffer {
    /// `max_message_size` bounds how large the buffer may grow; it is not a
    /// starting capacity.
    pub fn new(max_message_size: usize) -> Self {
        InputBuffer {
            buf: Vec::new(),
            maxsize: max_message_size,
            readpos: 0,
            scanpos: 0,
            msglen: 0,
        }
    }

    pub fn maxsize(&self) -> usize {
        self.maxsize
    }

    pub fn readpos(&self) -> usize {
        self.readpos
    }

    pub fn scanpos(&self) -> usize {
        self.scanpos
    }

    pub fn msglen(&self) -> usize {
        self.msglen
    }

    pub fn set_msglen(&mut self, len: usize) {
        self.msglen = len;
    }

    /// The bytes written so far that have not yet been scanned.
    pub fn unscanned(&self) -> &[u8] {
        &self.buf[self.scanpos..self.readpos]
    }

    /// All valid bytes currently in the buffer.
    pub fn filled(&self) -> &[u8] {
        &self.buf[..self.readpos]
    }

    /// Advances the scan position. Panics if this would move it backward or
    /// past `readpos` — a framer bug, not a data error.
    pub fn advance_scan(&mut self, n: usize) {
        let new_pos = self.scanpos + n;
        assert!(new_pos <= self.readpos, "scan position cannot pass readpos");
        self.scanpos = new_pos;
        if self.readpos == self.scanpos {
            self.reset_to_start();
        }
    }

    fn reset_to_start(&mut self) {
        self.buf.clear();
        self.readpos = 0;
        self.scanpos = 0;
        self.msglen = 0;
    }

    /// Ensures at least `len` more bytes can be written after `readpos`,
    /// growing in power-of-two steps up to `maxsize` and compacting
    /// `[scanpos, readpos)` down to offset zero first.
    pub fn expand(&mut self, len: usize) -> ExpandResult {
        if self.scanpos > 0 {
            self.buf.copy_within(self.scanpos..self.readpos, 0);
            self.readpos -= self.scanpos;
            self.scanpos = 0;
        }
        let needed_after_compaction = self.readpos + len;
        if self.buf.len() >= needed_after_compaction {
            return ExpandResult::Ok;
        }
        if self.maxsize != 0 && needed_after_compaction > self.maxsize {
            return ExpandResult::Full;
        }
        let mut new_cap = next_power_of_two(needed_after_compaction.max(1));
        if self.maxsize != 0 {
            new_cap = new_cap.min(self.maxsize).max(needed_after_compaction);
        }
        if new_cap < needed_after_compaction {
            return ExpandResult::Full;
        }
        self.buf.resize(new_cap, 0);
        ExpandResult::Ok
    }

    /// Appends bytes at `readpos`, growing first if needed.
    pub fn write(&mut self, data: &[u8]) -> ExpandResult {
        match self.expand(data.len()) {
            ExpandResult::Ok => {}
            other => return other,
        }
        let end = self.readpos + data.len();
        self.buf[self.readpos..end].copy_from_slice(data);
        self.readpos = end;
        ExpandResult::Ok
    }

    pub fn free(&mut self) {
        self.buf = Vec::new();
        self.readpos = 0;
        self.scanpos = 0;
        self.msglen = 0;
    }
}

/// A growable output byte buffer with a hard ceiling; overflow is a
/// distinguishable error, never a silent truncation.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    buf: Vec<u8>,
    maxsize: usize,
    pos: usize,
}

impl OutputBuffer {
    pub fn new(max_size: usize) -> Self {
        OutputBuffer { buf: Vec::new(), maxsize: max_size, pos: 0 }
    }

    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    pub fn maxsize(&self) -> usize {
        self.maxsize
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    pub fn clear(&mut self) {
        self.pos = 0;
    }

    pub fn free(&mut self) {
        self.buf = Vec::new();
        self.pos = 0;
    }

    pub fn expand(&mut self, needed: usize) -> ExpandResult {
        let needed_total = self.pos + needed;
        if self.buf.len() >= needed_total {
            return ExpandResult::Ok;
        }
        if self.maxsize != 0 && needed_total > self.maxsize {
            return ExpandResult::Full;
        }
        let mut new_cap = next_power_of_two(needed_total.max(1));
        if self.maxsize != 0 {
            new_cap = new_cap.min(self.maxsize).max(needed_total);
        }
        if new_cap < needed_total {
            return ExpandResult::Full;
        }
        self.buf.resize(new_cap, 0);
        ExpandResult::Ok
    }

    pub fn write_byte(&mut self, byte: u8) -> ExpandResult {
        match self.expand(1) {
            ExpandResult::Ok => {}
            other => return other,
        }
        self.buf[self.pos] = byte;
        self.pos += 1;
        ExpandResult::Ok
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> ExpandResult {
        match self.expand(data.len()) {
            ExpandResult::Ok => {}
            other => return other,
        }
        let end = self.pos + data.len();
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
        ExpandResult::Ok
    }

    pub fn write_fmt_str(&mut self, s: &str) -> ExpandResult {
        self.write_bytes(s.as_bytes())
    }

    /// Overwrites a single already-written byte. Used by the protobuf codec
    /// to rewrite a length placeholder once the real length is known.
    pub fn set_byte(&mut self, idx: usize, byte: u8) {
        assert!(idx < self.pos, "set_byte out of range");
        self.buf[idx] = byte;
    }

    /// Grows the buffer in place by `extra` bytes at the end, then shifts
    /// `len` bytes starting at `src` rightward by `extra`, leaving an
    /// `extra`-byte gap at `src` for the caller to fill in. Used by
    /// `update_field_length` when a varint length needs more than one byte.
    pub fn memmove_body(&mut self, src: usize, extra: usize, len: usize) {
        self.pos += extra;
        self.buf.copy_within(src..src + len, src + extra);
    }

    /// Overwrites the `bytes.len()` bytes starting at `at` (which must have
    /// been vacated by a prior [`memmove_body`] call).
    pub fn splice_in(&mut self, at: usize, bytes: &[u8]) {
        self.buf[at..at + bytes.len()].copy_from_slice(bytes);
    }

    /// Renders a double the way a script would read it back: NaN/±Inf as
    /// `nan`/`inf`/`-inf`.
    pub fn write_double(&mut self, d: f64) -> ExpandResult {
        let rendered = if d.is_nan() {
            "nan".to_string()
        } else if d.is_infinite() {
            if d > 0.0 { "inf".to_string() } else { "-inf".to_string() }
        } else {
            format_double(d)
        };
        self.write_fmt_str(&rendered)
    }

    /// Renders a double for state-file serialization: NaN/±Inf become the
    /// legal-Lua-literal escapes `0/0`, `1/0`, `-1/0`.
    pub fn write_double_for_serialization(&mut self, d: f64) -> ExpandResult {
        let rendered = if d.is_nan() {
            "0/0".to_string()
        } else if d.is_infinite() {
            if d > 0.0 { "1/0".to_string() } else { "-1/0".to_string() }
        } else {
            format_double(d)
        };
        self.write_fmt_str(&rendered)
    }
}

fn format_double(d: f64) -> String {
    if d == d.trunc() && d.abs() < 1e15 {
        format!("{d:.1}")
    } else {
        format!("{d}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_buffer_grows_in_power_of_two_steps_capped_at_max() {
        let mut ib = InputBuffer::new(64);
        assert_eq!(ib.write(&[1, 2, 3]), ExpandResult::Ok);
        assert_eq!(ib.filled(), &[1, 2, 3]);
        assert_eq!(ib.write(&vec![0u8; 61]), ExpandResult::Ok);
        assert_eq!(ib.write(&[9]), ExpandResult::Full);
    }

    #[test]
    fn input_buffer_compacts_on_scan_advance_to_readpos() {
        let mut ib = InputBuffer::new(0);
        ib.write(b"hello world");
        ib.advance_scan(6);
        assert_eq!(ib.unscanned(), b"world");
        ib.write(b"!");
        assert_eq!(ib.unscanned(), b"world!");
    }

    #[test]
    fn input_buffer_resets_when_fully_consumed() {
        let mut ib = InputBuffer::new(0);
        ib.write(b"abc");
        ib.advance_scan(3);
        assert_eq!(ib.readpos(), 0);
        assert_eq!(ib.scanpos(), 0);
    }

    #[test]
    fn output_buffer_overflow_is_distinguishable() {
        let mut ob = OutputBuffer::new(4);
        assert_eq!(ob.write_bytes(b"abcd"), ExpandResult::Ok);
        assert_eq!(ob.write_bytes(b"e"), ExpandResult::Full);
        assert_eq!(ob.as_slice(), b"abcd");
    }

    #[test]
    fn output_buffer_double_formatting_round_trips_nan_and_inf() {
        let mut ob = OutputBuffer::new(0);
        ob.write_double(f64::NAN);
        ob.write_byte(b' ');
        ob.write_double(f64::INFINITY);
        ob.write_byte(b' ');
        ob.write_double(f64::NEG_INFINITY);
        assert_eq!(ob.as_slice(), b"nan inf -inf");
    }

    #[test]
    fn serialization_double_formatting_uses_legal_lua_literals() {
        let mut ob = OutputBuffer::new(0);
        ob.write_double_for_serialization(f64::NAN);
        ob.write_byte(b' ');
        ob.write_double_for_serialization(f64::INFINITY);
        ob.write_byte(b' ');
        ob.write_double_for_serialization(f64::NEG_INFINITY);
        assert_eq!(ob.as_slice(), b"0/0 1/0 -1/0");
    }
}
