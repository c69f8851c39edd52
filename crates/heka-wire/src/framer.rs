//! Stream framer: locates the next `0x1E`-delimited record in an
//! [`InputBuffer`], resyncing one byte at a time on corruption.
//!
//! Grounded in `lsb_find_heka_message` in `src/util/heka_message.c`. The
//! C function recurses on resync; this port loops instead so a long run of
//! garbage bytes can't blow the stack, but every skip/resync decision
//! matches it exactly, including charging exactly one byte to `discarded`
//! per resync step.

use crate::buf::InputBuffer;
use crate::protobuf::read_varint;

const RECORD_START: u8 = 0x1e;
const HEADER_END_MARKER: u8 = 0x1f;
/// `start byte + length byte + end-marker byte` (the header's fixed overhead
/// around its variable-length protobuf body).
const HEADER_FRAME_SIZE: usize = 3;

/// The result of one [`find_message`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindResult {
    /// No complete record is available yet; more bytes are needed.
    NeedMoreData,
    /// A record's raw (still protobuf-encoded) bytes. Copied out of the
    /// input buffer, since consuming the last record in the buffer
    /// compacts it back to offset zero and would otherwise invalidate a
    /// borrow into it.
    Found(Vec<u8>),
}

fn decode_header(header_body: &[u8], max_message_size: usize) -> usize {
    if header_body.first() != Some(&0x08) {
        return 0;
    }
    match read_varint(header_body, 1) {
        Some((len, _)) if len > 0 && len as usize <= max_message_size => len as usize,
        _ => 0,
    }
}

/// Scans `ib` for the next framed record, advancing `scanpos` past whatever
/// is consumed (the record itself, or skipped garbage) and returning how
/// many bytes were discarded as unrecoverable noise along the way.
pub fn find_message(ib: &mut InputBuffer) -> (FindResult, usize) {
    let mut discarded = 0usize;
    loop {
        if ib.readpos() == ib.scanpos() {
            return (FindResult::NeedMoreData, discarded);
        }

        let unscanned = ib.unscanned();
        let Some(rel_start) = unscanned.iter().position(|&b| b == RECORD_START) else {
            discarded += unscanned.len();
            ib.advance_scan(unscanned.len());
            return (FindResult::NeedMoreData, discarded);
        };

        if rel_start != 0 {
            discarded += rel_start;
            ib.advance_scan(rel_start);
        }

        if ib.readpos() - ib.scanpos() < 2 {
            return (FindResult::NeedMoreData, discarded);
        }

        let scanpos = ib.scanpos();
        let hlen = ib.filled()[scanpos + 1] as usize;
        let hend = scanpos + hlen + HEADER_FRAME_SIZE;
        if hend > ib.readpos() {
            return (FindResult::NeedMoreData, discarded);
        }
        if ib.filled()[hend - 1] != HEADER_END_MARKER {
            ib.advance_scan(1);
            discarded += 1;
            continue;
        }

        if ib.msglen() == 0 {
            let header_body = &ib.filled()[scanpos + 2..hend - 1];
            let max_message_size = if ib.maxsize() == 0 {
                usize::MAX
            } else {
                ib.maxsize().saturating_sub(255 + HEADER_FRAME_SIZE)
            };
            ib.set_msglen(decode_header(header_body, max_message_size));
        }

        if ib.msglen() == 0 {
            ib.advance_scan(1);
            discarded += 1;
            continue;
        }

        let mend = hend + ib.msglen();
        if mend > ib.readpos() {
            return (FindResult::NeedMoreData, discarded);
        }

        let message = ib.filled()[hend..mend].to_vec();
        ib.advance_scan(mend - scanpos);
        ib.set_msglen(0);
        return (FindResult::Found(message), discarded);
    }
}
