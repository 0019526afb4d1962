//! A small LZSS compressor in the shape of heatshrink: an 8-bit window
//! (256 bytes of history) and a 4-bit lookahead (matches of 2 to 17
//! bytes), chosen to be cheap enough for an embedded encoder's stack.
//! Hand-rolled rather than pulled from a crate — a generic compressor
//! would need sliding-window and bit-packing configuration that ends up
//! being its own small implementation anyway, and this one intentionally
//! matches the debug protocol's own length-prefix conventions.
//!
//! Used for stream buffers, not the main transport pipeline. [`compress`]
//! and [`decompress`] are the self-contained, length-prefixed whole-buffer
//! form, which is what the [`Compress`] [`Layer`] adapter buffers up to
//! (it holds everything until `last`). [`StreamCompressor`] is the other
//! shape: a persistent encoder for the debugger's `s`/`f` commands, whose
//! window survives across reads until `f` resets it.

use crate::error::Error;
use crate::vlq;

use super::{Decoded, Layer, Up};

const WINDOW_BITS: u32 = 8;
const LOOKAHEAD_BITS: u32 = 4;
const WINDOW_SIZE: usize = 1 << WINDOW_BITS;
const MIN_MATCH: usize = 2;
const MAX_MATCH: usize = MIN_MATCH + (1 << LOOKAHEAD_BITS) - 1;

#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
    cur: u8,
    filled: u32,
}

impl BitWriter {
    fn new() -> Self {
        Self::default()
    }

    fn push_bit(&mut self, bit: bool) {
        self.cur = (self.cur << 1) | u8::from(bit);
        self.filled += 1;
        if self.filled == 8 {
            self.bytes.push(self.cur);
            self.cur = 0;
            self.filled = 0;
        }
    }

    fn push_bits(&mut self, value: u32, nbits: u32) {
        for i in (0..nbits).rev() {
            self.push_bit(value & (1 << i) != 0);
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.filled > 0 {
            self.cur <<= 8 - self.filled;
            self.bytes.push(self.cur);
        }
        self.bytes
    }

    /// Whole bytes completed so far, leaving any partial byte buffered
    /// for the next call. Unlike [`Self::finish`], this doesn't consume
    /// `self` or pad the tail — the caller isn't done yet.
    fn take_ready(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }
}

struct BitReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    bit: u32,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            bit: 0,
        }
    }

    fn read_bit(&mut self) -> Option<bool> {
        let byte = *self.bytes.get(self.pos)?;
        let value = byte & (0x80 >> self.bit) != 0;
        self.bit += 1;
        if self.bit == 8 {
            self.bit = 0;
            self.pos += 1;
        }
        Some(value)
    }

    fn read_bits(&mut self, nbits: u32) -> Option<u32> {
        let mut value = 0u32;
        for _ in 0..nbits {
            value = (value << 1) | u32::from(self.read_bit()?);
        }
        Some(value)
    }
}

fn best_match(data: &[u8], pos: usize) -> Option<(usize, usize)> {
    let window_start = pos.saturating_sub(WINDOW_SIZE);
    let max_len = (data.len() - pos).min(MAX_MATCH);
    if max_len < MIN_MATCH {
        return None;
    }
    let mut best: Option<(usize, usize)> = None;
    for start in window_start..pos {
        let mut len = 0;
        while len < max_len && data[start + len] == data[pos + len] {
            len += 1;
        }
        if len >= MIN_MATCH && best.is_none_or(|(_, best_len)| len > best_len) {
            best = Some((pos - start, len));
        }
    }
    best
}

/// Compress a complete buffer.
#[must_use]
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    vlq::encode(data.len() as u32, &mut out);
    let mut w = BitWriter::new();
    let mut pos = 0;
    while pos < data.len() {
        match best_match(data, pos) {
            Some((offset, len)) => {
                w.push_bit(false);
                w.push_bits((offset - 1) as u32, WINDOW_BITS);
                w.push_bits((len - MIN_MATCH) as u32, LOOKAHEAD_BITS);
                pos += len;
            }
            None => {
                w.push_bit(true);
                w.push_bits(u32::from(data[pos]), 8);
                pos += 1;
            }
        }
    }
    out.extend(w.finish());
    out
}

/// Decompress a buffer produced by [`compress`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, Error> {
    let (len, header_len) = vlq::decode(data).map_err(|_| Error::BadFrame)?;
    let len = len as usize;
    let mut out = Vec::with_capacity(len);
    let mut r = BitReader::new(&data[header_len..]);
    while out.len() < len {
        let literal = r.read_bit().ok_or(Error::BadFrame)?;
        if literal {
            let byte = r.read_bits(8).ok_or(Error::BadFrame)?;
            out.push(byte as u8);
        } else {
            let offset = r.read_bits(WINDOW_BITS).ok_or(Error::BadFrame)? as usize + 1;
            let match_len = r.read_bits(LOOKAHEAD_BITS).ok_or(Error::BadFrame)? as usize + MIN_MATCH;
            if offset > out.len() {
                return Err(Error::BadFrame);
            }
            let start = out.len() - offset;
            for i in 0..match_len {
                out.push(out[start + i]);
            }
        }
    }
    Ok(out)
}

/// A `heatshrink`-style encoder whose match window and bit buffer persist
/// across calls, for the debugger's `s` stream reads. Unlike [`compress`],
/// output has no length header and a chunk from one call is only
/// meaningful appended after every earlier chunk from the same instance —
/// a decoder has to be fed from stream start, in order.
///
/// `reset` is what `f` (flush) calls: it drops the window and any
/// buffered partial byte, so the next [`Self::push`] starts a fresh
/// stream with no back-reference to bytes already sent.
#[derive(Default)]
pub struct StreamCompressor {
    history: Vec<u8>,
    writer: BitWriter,
}

impl StreamCompressor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compress newly available bytes against the running window and
    /// return whatever whole bytes are ready to send now. Bits that
    /// don't yet fill a byte stay buffered for the next call.
    pub fn push(&mut self, data: &[u8]) -> Vec<u8> {
        let mut pos = self.history.len();
        self.history.extend_from_slice(data);
        while pos < self.history.len() {
            match best_match(&self.history, pos) {
                Some((offset, len)) => {
                    self.writer.push_bit(false);
                    self.writer.push_bits((offset - 1) as u32, WINDOW_BITS);
                    self.writer.push_bits((len - MIN_MATCH) as u32, LOOKAHEAD_BITS);
                    pos += len;
                }
                None => {
                    self.writer.push_bit(true);
                    self.writer.push_bits(u32::from(self.history[pos]), 8);
                    pos += 1;
                }
            }
        }
        self.writer.take_ready()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.writer = BitWriter::new();
    }
}

/// Adapts [`compress`]/[`decompress`] to the [`Layer`] interface for a
/// whole-buffer stream, rather than the continuously segmented main
/// pipeline.
#[derive(Default)]
pub struct Compress {
    pending: Vec<u8>,
}

impl Compress {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for Compress {
    fn decode(&mut self, data: &[u8]) -> Decoded {
        match decompress(data) {
            Ok(bytes) => Decoded {
                up: vec![Up::Debug(bytes)],
                reply: Vec::new(),
            },
            Err(_) => Decoded::default(),
        }
    }

    fn encode(&mut self, data: &[u8], last: bool) -> Vec<u8> {
        self.pending.extend_from_slice(data);
        if last {
            compress(&std::mem::take(&mut self.pending))
        } else {
            Vec::new()
        }
    }
}
