//! The application-layer command processor: one ASCII command byte plus
//! command-specific arguments in, one response frame out.
//!
//! [`Debugger`] owns a [`Store`] and layers aliases, macros, streams, and
//! tracing on top of it. It never touches the transport stack or any I/O;
//! [`Debugger::process`] is a pure function of a request buffer and
//! mutable debugger state.

use std::collections::{HashMap, VecDeque};

use crate::protocol::compress;
use crate::store::{Capabilities, Store};
use crate::types::{DebugVariant, Kind, Type};

/// Protocol version advertised by `v`. The store embedder's own version,
/// if any, is appended by [`Debugger::with_app_version`].
pub const PROTOCOL_VERSION: &str = "1";

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Decode a hex string into exactly `len` bytes, left-padding (zero
/// extending, matching big-endian semantics) if the string is shorter.
/// `None` if the string has too many digits or contains non-hex bytes.
fn hex_decode_padded(hex: &[u8], len: usize) -> Option<Vec<u8>> {
    if hex.len() > len * 2 {
        return None;
    }
    let mut digits = vec![0u8; len * 2 - hex.len()];
    digits.extend_from_slice(hex);
    let mut out = Vec::with_capacity(len);
    for pair in digits.chunks(2) {
        let hi = hex_digit(pair[0])?;
        let lo = hex_digit(pair[1])?;
        out.push((hi << 4) | lo);
    }
    Some(out)
}

fn hex_decode(hex: &[u8]) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    hex_decode_padded(hex, hex.len() / 2)
}

fn parse_hex_u32(hex: &[u8]) -> Option<u32> {
    if hex.is_empty() {
        return None;
    }
    hex.iter().try_fold(0u32, |acc, &c| {
        Some(acc.checked_shl(4)? | u32::from(hex_digit(c)?))
    })
}

fn elide_leading_zeros(hex: &str) -> &str {
    let trimmed = hex.trim_start_matches('0');
    if trimmed.is_empty() { "0" } else { trimmed }
}

/// Reverses byte order for fixed-size numeric types on little-endian
/// hosts. Fixed types are stored host-order internally, big-endian on
/// the wire (spec.md §4.2); variable-length types are opaque bytes and
/// pass through unchanged. Self-inverse, so the same function converts
/// both directions.
fn wire_order(ty: Type, bytes: &[u8]) -> Vec<u8> {
    if ty.fixed_size().is_none() || bytes.len() <= 1 {
        return bytes.to_vec();
    }
    #[cfg(target_endian = "little")]
    {
        let mut v = bytes.to_vec();
        v.reverse();
        v
    }
    #[cfg(target_endian = "big")]
    {
        bytes.to_vec()
    }
}

/// A single armed trace: invoke `macro_char` every `decimate`th call to
/// [`Debugger::trace`], appending its output to `stream`.
struct TraceConfig {
    macro_char: u8,
    stream: u8,
    decimate: u32,
    counter: u32,
}

pub struct Debugger<'dir, 'func> {
    store: Store<'dir, 'func>,
    identification: String,
    app_version: Option<String>,
    aliases: HashMap<u8, DebugVariant>,
    macros: HashMap<u8, Vec<Vec<u8>>>,
    macro_bytes_used: usize,
    streams: HashMap<u8, VecDeque<u8>>,
    stream_encoders: HashMap<u8, compress::StreamCompressor>,
    trace: Option<TraceConfig>,
}

impl<'dir, 'func> Debugger<'dir, 'func> {
    #[must_use]
    pub fn new(store: Store<'dir, 'func>, identification: impl Into<String>) -> Self {
        Self {
            store,
            identification: identification.into(),
            app_version: None,
            aliases: HashMap::new(),
            macros: HashMap::new(),
            macro_bytes_used: 0,
            streams: HashMap::new(),
            stream_encoders: HashMap::new(),
            trace: None,
        }
    }

    #[must_use]
    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = Some(version.into());
        self
    }

    #[must_use]
    pub fn store(&self) -> &Store<'dir, 'func> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store<'dir, 'func> {
        &mut self.store
    }

    /// Append bytes to a stream's FIFO, dropping the oldest bytes on
    /// overflow. Streams are created on first write.
    pub fn stream_write(&mut self, ch: u8, data: &[u8]) {
        let cap = self.store.config().stream_buffer_capacity;
        let stream = self.streams.entry(ch).or_default();
        for &b in data {
            if stream.len() >= cap {
                stream.pop_front();
            }
            stream.push_back(b);
        }
    }

    /// Invoke the armed trace hook, if any. Call this from wherever the
    /// embedder's own periodic tick lives.
    pub fn trace(&mut self) {
        let Some(trace) = &mut self.trace else {
            return;
        };
        trace.counter += 1;
        if trace.counter % trace.decimate != 0 {
            return;
        }
        let macro_char = trace.macro_char;
        let stream = trace.stream;
        let out = self.dispatch(macro_char, &[], 0);
        self.stream_write(stream, &out);
    }

    fn resolve(&self, token: &[u8]) -> DebugVariant {
        if token.len() == 1 {
            if let Some(&v) = self.aliases.get(&token[0]) {
                return v;
            }
        }
        self.store.find(token)
    }

    fn capabilities(&self) -> String {
        let caps = self.store.capabilities();
        let cfg = *self.store.config();
        let mut s = String::from("?");
        if caps.contains(Capabilities::READ) {
            s.push('r');
        }
        if caps.contains(Capabilities::WRITE) {
            s.push('w');
        }
        s.push_str("laemiv");
        if caps.contains(Capabilities::READ) {
            s.push('R');
        }
        if caps.contains(Capabilities::WRITE) {
            s.push('W');
        }
        if cfg.stream_buffer_capacity > 0 {
            s.push_str("sf");
        }
        s.push('t');
        s
    }

    /// Process one complete request, returning the response frame.
    #[must_use]
    pub fn process(&mut self, request: &[u8]) -> Vec<u8> {
        match request.split_first() {
            Some((&cmd, rest)) => self.dispatch(cmd, rest, 0),
            None => b"?".to_vec(),
        }
    }

    fn dispatch(&mut self, cmd: u8, rest: &[u8], depth: usize) -> Vec<u8> {
        match cmd {
            b'?' => self.capabilities().into_bytes(),
            b'e' => rest.to_vec(),
            b'r' => self.cmd_read(rest),
            b'w' => self.cmd_write(rest),
            b'l' => self.cmd_list(),
            b'a' => self.cmd_alias(rest),
            b'm' => self.cmd_macro(rest),
            b'i' => self.identification.clone().into_bytes(),
            b'v' => self.cmd_version(),
            b'R' => self.cmd_read_memory(rest),
            b'W' => self.cmd_write_memory(rest),
            b's' => self.cmd_stream(rest),
            b'f' => self.cmd_flush(rest),
            b't' => self.cmd_trace(rest),
            other => self.run_macro(other, depth),
        }
    }

    fn run_macro(&mut self, ch: u8, depth: usize) -> Vec<u8> {
        let Some(body) = self.macros.get(&ch).cloned() else {
            return b"?".to_vec();
        };
        if depth >= self.store.config().macro_max_depth {
            log::debug!("macro '{}' recursion depth exceeded", ch as char);
            return b"?".to_vec();
        }
        let mut out = Vec::new();
        for step in &body {
            if let Some((&cc, r)) = step.split_first() {
                out.extend(self.dispatch(cc, r, depth + 1));
            }
        }
        out
    }

    fn cmd_read(&mut self, rest: &[u8]) -> Vec<u8> {
        let slot = self.resolve(rest);
        if !slot.valid() {
            return b"?".to_vec();
        }
        let mut buf = vec![0u8; slot.len()];
        if self.store.get(&slot, &mut buf).is_err() {
            return b"?".to_vec();
        }
        let wire = wire_order(slot.ty(), &buf);
        let hex = hex_encode(&wire);
        let hex = if slot.ty().fixed_size().is_some() {
            elide_leading_zeros(&hex)
        } else {
            hex.as_str()
        };
        hex.as_bytes().to_vec()
    }

    /// `<hex><name-or-alias>` with no separator between them (per the
    /// worked examples in spec.md §8, which concatenate the two rather
    /// than space-separating them as the command table's notation might
    /// suggest). Since a single-char alias can itself be a hex digit,
    /// disambiguation tries the longest run of leading hex digits first
    /// and shrinks it until the remaining suffix resolves to a slot.
    fn cmd_write(&mut self, rest: &[u8]) -> Vec<u8> {
        let max_hex_len = rest.iter().take_while(|&&b| hex_digit(b).is_some()).count();
        for hex_len in (0..=max_hex_len).rev() {
            let (hex_tok, name_tok) = rest.split_at(hex_len);
            if name_tok.is_empty() {
                continue;
            }
            let slot = self.resolve(name_tok);
            if !slot.valid() {
                continue;
            }
            let Some(wire) = hex_decode_padded(hex_tok, slot.len()) else {
                continue;
            };
            let host = wire_order(slot.ty(), &wire);
            return match self.store.set(&slot, &host) {
                Ok(_) => b"!".to_vec(),
                Err(_) => b"?".to_vec(),
            };
        }
        b"?".to_vec()
    }

    fn cmd_list(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.store.list(&mut |name: &[u8], slot: DebugVariant| {
            let tag = slot.ty().to_tag_byte(matches!(slot.kind(), Kind::Func));
            out.extend(format!("{:02x}{:x} ", tag, slot.len()).into_bytes());
            out.extend_from_slice(name);
            out.push(b'\n');
        });
        out
    }

    /// `<ch>[<name-or-abbreviation>]`, the name (if any) immediately
    /// following the alias character with no separator (per the worked
    /// example in spec.md §8b: `a0/a/b`). Omitting the name removes the
    /// alias.
    fn cmd_alias(&mut self, rest: &[u8]) -> Vec<u8> {
        let Some((&ch, name)) = rest.split_first() else {
            return b"?".to_vec();
        };
        if name.is_empty() {
            self.aliases.remove(&ch);
            return b"!".to_vec();
        }
        let slot = self.store.find(name);
        if !slot.valid() {
            return b"?".to_vec();
        }
        if !self.aliases.contains_key(&ch) && self.aliases.len() >= self.store.config().alias_capacity
        {
            log::warn!("alias table full, rejecting '{}'", ch as char);
            return b"?".to_vec();
        }
        self.aliases.insert(ch, slot);
        b"!".to_vec()
    }

    fn cmd_macro(&mut self, rest: &[u8]) -> Vec<u8> {
        if rest.len() < 2 {
            return b"?".to_vec();
        }
        let ch = rest[0];
        let sep = rest[1];
        let body = &rest[2..];
        if body.is_empty() {
            if let Some(old) = self.macros.remove(&ch) {
                self.macro_bytes_used -= old.iter().map(Vec::len).sum::<usize>();
            }
            return b"!".to_vec();
        }
        let parts: Vec<Vec<u8>> = body.split(|&b| b == sep).map(<[u8]>::to_vec).collect();
        let size: usize = parts.iter().map(Vec::len).sum();
        let previous = self.macros.get(&ch).map(|old| old.iter().map(Vec::len).sum::<usize>()).unwrap_or(0);
        if self.macro_bytes_used - previous + size > self.store.config().macro_byte_budget {
            log::warn!("macro table full, rejecting '{}'", ch as char);
            return b"?".to_vec();
        }
        self.macro_bytes_used = self.macro_bytes_used - previous + size;
        self.macros.insert(ch, parts);
        b"!".to_vec()
    }

    fn cmd_version(&self) -> Vec<u8> {
        let mut s = PROTOCOL_VERSION.to_string();
        if let Some(app) = &self.app_version {
            s.push(' ');
            s.push_str(app);
        }
        s.into_bytes()
    }

    fn cmd_read_memory(&mut self, rest: &[u8]) -> Vec<u8> {
        let mut parts = rest.split(|&b| b == b' ');
        let Some(ptr_tok) = parts.next() else {
            return b"?".to_vec();
        };
        let Some(ptr) = parse_hex_u32(ptr_tok) else {
            return b"?".to_vec();
        };
        let len = match parts.next() {
            Some(tok) if !tok.is_empty() => match parse_hex_u32(tok) {
                Some(n) => n as usize,
                None => return b"?".to_vec(),
            },
            _ => 1,
        };
        match self.store.read_memory(ptr, len) {
            Ok(bytes) => hex_encode(bytes).into_bytes(),
            Err(_) => b"?".to_vec(),
        }
    }

    fn cmd_write_memory(&mut self, rest: &[u8]) -> Vec<u8> {
        let Some(sp) = rest.iter().position(|&b| b == b' ') else {
            return b"?".to_vec();
        };
        let (ptr_tok, hex_tok) = (&rest[..sp], &rest[sp + 1..]);
        let Some(ptr) = parse_hex_u32(ptr_tok) else {
            return b"?".to_vec();
        };
        let Some(bytes) = hex_decode(hex_tok) else {
            return b"?".to_vec();
        };
        match self.store.write_memory(ptr, &bytes) {
            Ok(()) => b"!".to_vec(),
            Err(_) => b"?".to_vec(),
        }
    }

    fn cmd_stream(&mut self, rest: &[u8]) -> Vec<u8> {
        if rest.is_empty() {
            let mut chars: Vec<u8> = self
                .streams
                .iter()
                .filter(|(_, buf)| !buf.is_empty())
                .map(|(&ch, _)| ch)
                .collect();
            chars.sort_unstable();
            return chars;
        }
        let ch = rest[0];
        let suffix = &rest[1..];
        let Some(stream) = self.streams.get_mut(&ch) else {
            return b"?".to_vec();
        };
        let drained: Vec<u8> = stream.drain(..).collect();
        let mut out = if self.store.config().compression_enabled {
            self.stream_encoders.entry(ch).or_default().push(&drained)
        } else {
            drained
        };
        out.extend_from_slice(suffix);
        out
    }

    /// `f`: clear the named stream's pending bytes and, since a
    /// [`compress::StreamCompressor`]'s window only makes sense against
    /// bytes a decoder actually saw, drop its encoder too — resuming
    /// that channel later starts a fresh, independently decodable
    /// stream rather than one that silently depends on history already
    /// discarded here.
    fn cmd_flush(&mut self, rest: &[u8]) -> Vec<u8> {
        if rest.is_empty() {
            self.streams.values_mut().for_each(VecDeque::clear);
            self.stream_encoders.clear();
        } else if let Some(stream) = self.streams.get_mut(&rest[0]) {
            stream.clear();
            self.stream_encoders.remove(&rest[0]);
        }
        b"!".to_vec()
    }

    fn cmd_trace(&mut self, rest: &[u8]) -> Vec<u8> {
        if rest.is_empty() {
            self.trace = None;
            return b"!".to_vec();
        }
        if rest.len() < 2 {
            return b"?".to_vec();
        }
        let decimate = if rest.len() > 2 {
            match parse_hex_u32(&rest[2..]) {
                Some(0) | None => return b"?".to_vec(),
                Some(n) => n,
            }
        } else {
            1
        };
        self.trace = Some(TraceConfig {
            macro_char: rest[0],
            stream: rest[1],
            decimate,
            counter: 0,
        });
        b"!".to_vec()
    }
}
