//! MTU-bounded fragmentation.
//!
//! Every `mtu - 1` bytes of payload are followed by a one-byte marker:
//! `C` (more fragments follow) or `E` (this was the last one, deliver
//! the reassembled frame). Payload bytes that collide with `C`, `E`, or
//! the escape byte itself are stuffed behind an escape byte so marker
//! recognition never depends on where in a fragment a byte falls —
//! a short final fragment is as unambiguous as a full one.

use super::{Decoded, Layer, Up};

const ESCAPE: u8 = 0x10;
const CONTINUE: u8 = b'C';
const END: u8 = b'E';

pub struct Segment {
    max_payload: usize,
    buffer: Vec<u8>,
    escaped: bool,
}

impl Segment {
    #[must_use]
    pub fn new(mtu: usize) -> Self {
        assert!(mtu > 1, "segment mtu must leave room for a trailer byte");
        Self {
            max_payload: mtu - 1,
            buffer: Vec::new(),
            escaped: false,
        }
    }
}

impl Layer for Segment {
    fn decode(&mut self, data: &[u8]) -> Decoded {
        let mut up = Vec::new();
        for &b in data {
            if self.escaped {
                self.buffer.push(b);
                self.escaped = false;
                continue;
            }
            match b {
                ESCAPE => self.escaped = true,
                CONTINUE => {}
                END => up.push(Up::Debug(std::mem::take(&mut self.buffer))),
                _ => self.buffer.push(b),
            }
        }
        Decoded {
            up,
            reply: Vec::new(),
        }
    }

    fn encode(&mut self, data: &[u8], _last: bool) -> Vec<u8> {
        if data.is_empty() {
            return vec![END];
        }
        let mut out = Vec::with_capacity(data.len() + data.len() / self.max_payload + 1);
        let total = data.len().div_ceil(self.max_payload);
        for (i, chunk) in data.chunks(self.max_payload).enumerate() {
            for &b in chunk {
                if matches!(b, ESCAPE | CONTINUE | END) {
                    out.push(ESCAPE);
                }
                out.push(b);
            }
            out.push(if i + 1 == total { END } else { CONTINUE });
        }
        out
    }

    fn mtu(&self) -> Option<usize> {
        Some(self.max_payload + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_at_mtu_boundaries() {
        let mut seg = Segment::new(4);
        let encoded = seg.encode(b"abcdefg", true);
        assert_eq!(encoded, b"abcCdefCgE");
    }

    #[test]
    fn round_trips_through_small_decode_calls() {
        let mut seg = Segment::new(4);
        let encoded = seg.encode(b"abcdefg", true);
        let mut up = Vec::new();
        for &b in &encoded {
            up.extend(seg.decode(&[b]).up);
        }
        assert_eq!(up, vec![Up::Debug(b"abcdefg".to_vec())]);
    }

    #[test]
    fn empty_payload_is_one_end_fragment() {
        let mut seg = Segment::new(4);
        assert_eq!(seg.encode(b"", true), vec![END]);
    }

    #[test]
    fn marker_bytes_in_payload_are_escaped() {
        let mut enc = Segment::new(64);
        let mut dec = Segment::new(64);
        let input = [b'C', b'E', ESCAPE, b'x'];
        let encoded = enc.encode(&input, true);
        assert_eq!(dec.decode(&encoded).up, vec![Up::Debug(input.to_vec())]);
    }
}
