//! Byte stuffing for control characters that would otherwise be eaten or
//! misinterpreted by a terminal: anything below 0x20 except tab/LF/CR,
//! plus DEL, is sent as `ESCAPE (byte ^ 0x40)`.
//!
//! The marker is `0x10` (the same byte [`super::segment::Segment`] uses
//! for its own stuffing), not the `ESC` (0x1b) that [`super::terminal`]
//! reserves for the envelope. `Terminal` wraps this layer's output
//! verbatim without re-escaping it, so if raw `ESC` bytes could still
//! reach it — say from a `Crc16`/`Arq` header byte skipping this layer's
//! escaping — they'd be indistinguishable from the envelope's own
//! escape sequences. Since `0x10 < 0x20`, it is itself always in the set
//! of bytes this layer escapes, so it can never appear unescaped either,
//! and this layer's output is guaranteed free of raw `ESC` bytes.
//!
//! XOR rather than OR on the second byte: DEL (0x7f) already has bit 6
//! set, so `0x7f | 0x40 == 0x7f` would be unescapable. XOR is reversible
//! for every byte value, not just the low ones.

use super::{Decoded, Layer, Up};

const ESCAPE: u8 = 0x10;
const XOR_BIT: u8 = 0x40;

fn needs_escape(b: u8) -> bool {
    (b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r') || b == 0x7f
}

/// Stateful only across `decode` calls, to handle the escape marker
/// landing at the end of one read and its partner byte at the start of
/// the next.
#[derive(Default)]
pub struct AsciiEscape {
    pending_escape: bool,
}

impl AsciiEscape {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for AsciiEscape {
    fn decode(&mut self, data: &[u8]) -> Decoded {
        let mut out = Vec::with_capacity(data.len());
        for &b in data {
            if self.pending_escape {
                out.push(b ^ XOR_BIT);
                self.pending_escape = false;
            } else if b == ESCAPE {
                self.pending_escape = true;
            } else {
                out.push(b);
            }
        }
        Decoded {
            up: vec![Up::Debug(out)],
            reply: Vec::new(),
        }
    }

    fn encode(&mut self, data: &[u8], _last: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());
        for &b in data {
            if needs_escape(b) || b == ESCAPE {
                out.push(ESCAPE);
                out.push(b ^ XOR_BIT);
            } else {
                out.push(b);
            }
        }
        out
    }
}
