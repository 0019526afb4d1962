//! The layered transport stack between the debugger and the wire.
//!
//! Each [`Layer`] only knows how to transform bytes one hop towards the
//! wire (`encode`) or one hop away from it (`decode`); a [`Stack`] owns an
//! ordered pipeline of them and drives both directions end to end. Layers
//! are listed nearest-wire first: decoding runs the list forward (wire
//! bytes in, debug/application bytes out the far end), encoding runs it
//! in reverse (a debugger response in, wire bytes out).
//!
//! Wire nesting, outermost to innermost:
//!
//! ```text
//! ESC '_' AsciiEscape( Segment( ARQ-header | payload | CRC16(header+payload) ) ) ESC '\'
//! ```
//!
//! so in encode order (payload to wire) ARQ runs first, then CRC16, then
//! Segment, then AsciiEscape, then Terminal — the reverse of the decode
//! list `[Terminal, AsciiEscape, Segment, Crc16, Arq]`.

pub mod arq;
pub mod ascii_escape;
pub mod compress;
pub mod crc16;
pub mod segment;
pub mod terminal;

pub use arq::Arq;
pub use ascii_escape::AsciiEscape;
pub use crc16::Crc16;
pub use segment::Segment;
pub use terminal::Terminal;

/// A frame handed up out of the top of the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Up {
    /// A complete, verified debug-protocol frame.
    Debug(Vec<u8>),
    /// Bytes that arrived outside the debug envelope — application
    /// stdout/stderr sharing the same channel.
    App(Vec<u8>),
}

/// The result of feeding bytes into a layer's decode side.
#[derive(Debug, Default)]
pub struct Decoded {
    /// Frames to hand to the layer above, in arrival order.
    pub up: Vec<Up>,
    /// Frames this layer wants sent back down immediately (e.g. an ARQ
    /// ack). These are already framed *at this layer's level* and still
    /// need to pass through every layer strictly nearer the wire before
    /// they can be written out.
    pub reply: Vec<Vec<u8>>,
}

/// One stage of the transport pipeline.
pub trait Layer {
    /// Consume bytes arriving from the wire side, producing zero or more
    /// frames for the layer above and/or replies to send back down.
    fn decode(&mut self, data: &[u8]) -> Decoded;

    /// Produce wire-ward bytes for one complete unit of data from the
    /// layer above. `last` marks the final call for that unit (relevant
    /// to layers that buffer, like segmentation).
    fn encode(&mut self, data: &[u8], last: bool) -> Vec<u8>;

    /// Flush any buffered output that a layer is allowed to hold back.
    fn flush(&mut self) -> Vec<u8> {
        Vec::new()
    }

    /// Advance time-driven state (ARQ retransmit deadlines). Returns
    /// bytes to resend, if a deadline has passed. Most layers are
    /// stateless with respect to time and use the default no-op.
    fn tick(&mut self, _elapsed: std::time::Duration) -> Option<Vec<u8>> {
        None
    }

    /// The largest payload this layer accepts in one `encode` call, if it
    /// imposes a limit.
    fn mtu(&self) -> Option<usize> {
        None
    }
}

/// An ordered transport pipeline, nearest-wire layer first.
pub struct Stack {
    layers: Vec<Box<dyn Layer>>,
}

impl Stack {
    #[must_use]
    pub fn new(layers: Vec<Box<dyn Layer>>) -> Self {
        Self { layers }
    }

    /// The pipeline's effective MTU: the smallest limit reported by any
    /// layer that has one.
    #[must_use]
    pub fn mtu(&self) -> Option<usize> {
        self.layers.iter().filter_map(|l| l.mtu()).min()
    }

    /// Feed bytes that arrived from the wire through the whole pipeline.
    ///
    /// `wire_out` receives any reply frames (e.g. ARQ acks) that must go
    /// back out immediately; `up_out` receives decoded application and
    /// debug frames in order.
    pub fn decode(
        &mut self,
        data: &[u8],
        up_out: &mut dyn FnMut(Up),
        wire_out: &mut dyn FnMut(&[u8]),
    ) {
        self.decode_at(0, data, up_out, wire_out);
    }

    fn decode_at(
        &mut self,
        index: usize,
        data: &[u8],
        up_out: &mut dyn FnMut(Up),
        wire_out: &mut dyn FnMut(&[u8]),
    ) {
        let Some(layer) = self.layers.get_mut(index) else {
            return;
        };
        let decoded = layer.decode(data);
        for reply in decoded.reply {
            let wire_bytes = self.encode_below(index, &reply);
            wire_out(&wire_bytes);
        }
        for frame in decoded.up {
            match frame {
                Up::App(bytes) => up_out(Up::App(bytes)),
                Up::Debug(bytes) => {
                    if index + 1 < self.layers.len() {
                        self.decode_at(index + 1, &bytes, up_out, wire_out);
                    } else {
                        up_out(Up::Debug(bytes));
                    }
                }
            }
        }
    }

    /// Encode `data` through layers strictly nearer the wire than `index`
    /// (i.e. indices `0..index`), in reverse order, without re-running
    /// layer `index` itself. Used to route an immediate reply (an ARQ
    /// ack already carrying its own header) the rest of the way out.
    fn encode_below(&mut self, index: usize, data: &[u8]) -> Vec<u8> {
        let mut bytes = data.to_vec();
        for layer in self.layers[..index].iter_mut().rev() {
            bytes = layer.encode(&bytes, true);
        }
        bytes
    }

    /// Encode one complete debugger frame through the whole pipeline,
    /// producing the bytes to write to the wire.
    #[must_use]
    pub fn encode(&mut self, data: &[u8]) -> Vec<u8> {
        let mut bytes = data.to_vec();
        for layer in self.layers.iter_mut().rev() {
            bytes = layer.encode(&bytes, true);
        }
        bytes
    }

    /// Flush every layer, nearest-payload first, returning the combined
    /// wire-ward bytes.
    #[must_use]
    pub fn flush(&mut self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for layer in self.layers.iter_mut().rev() {
            let mut flushed = layer.flush();
            if !flushed.is_empty() && !bytes.is_empty() {
                flushed = layer.encode(&flushed, true);
            }
            bytes.extend_from_slice(&flushed);
        }
        bytes
    }

    /// Advance time for every layer, collecting retransmits in pipeline
    /// order and routing each through the layers nearer the wire.
    pub fn tick(&mut self, elapsed: std::time::Duration, wire_out: &mut dyn FnMut(&[u8])) {
        for index in (0..self.layers.len()).rev() {
            if let Some(resend) = self.layers[index].tick(elapsed) {
                let bytes = self.encode_below(index, &resend);
                wire_out(&bytes);
            }
        }
    }
}
