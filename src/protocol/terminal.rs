//! The outermost framing: a debug frame rides inside an APC-style escape
//! envelope (`ESC '_' ... ESC '\'`) on a channel shared with an
//! application's own stdout/stderr. Bytes outside the envelope are
//! passed up as [`Up::App`] instead of being interpreted at all.
//!
//! `encode` wraps its input verbatim, with no escaping of its own — the
//! layer immediately underneath ([`super::ascii_escape::AsciiEscape`])
//! is relied on to have already stuffed away every raw `ESC` byte, so an
//! `ESC` seen mid-envelope here always means either the real terminator
//! or genuine corruption, never a false match against inner payload
//! bytes.

use super::{Decoded, Layer, Up};

const ESC: u8 = 0x1b;
const ENVELOPE_START: u8 = b'_';
const ENVELOPE_END: u8 = b'\\';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    SawEscIdle,
    InEnvelope,
    SawEscInEnvelope,
}

pub struct Terminal {
    state: State,
    buffer: Vec<u8>,
}

impl Default for Terminal {
    fn default() -> Self {
        Self {
            state: State::Idle,
            buffer: Vec::new(),
        }
    }
}

impl Terminal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for Terminal {
    fn decode(&mut self, data: &[u8]) -> Decoded {
        let mut up = Vec::new();
        let mut app_run = Vec::new();
        macro_rules! flush_app {
            () => {
                if !app_run.is_empty() {
                    up.push(Up::App(std::mem::take(&mut app_run)));
                }
            };
        }
        for &b in data {
            match self.state {
                State::Idle => {
                    if b == ESC {
                        self.state = State::SawEscIdle;
                    } else {
                        app_run.push(b);
                    }
                }
                State::SawEscIdle => {
                    if b == ENVELOPE_START {
                        flush_app!();
                        self.buffer.clear();
                        self.state = State::InEnvelope;
                    } else {
                        app_run.push(ESC);
                        if b == ESC {
                            self.state = State::SawEscIdle;
                        } else {
                            app_run.push(b);
                            self.state = State::Idle;
                        }
                    }
                }
                State::InEnvelope => {
                    if b == ESC {
                        self.state = State::SawEscInEnvelope;
                    } else {
                        self.buffer.push(b);
                    }
                }
                State::SawEscInEnvelope => {
                    if b == ENVELOPE_END {
                        up.push(Up::Debug(std::mem::take(&mut self.buffer)));
                        self.state = State::Idle;
                    } else if b == ENVELOPE_START {
                        // A second envelope start mid-frame: resync onto a
                        // fresh envelope, the previous one was corrupt.
                        self.buffer.clear();
                        self.state = State::InEnvelope;
                    } else {
                        self.buffer.clear();
                        if b == ESC {
                            self.state = State::SawEscIdle;
                        } else {
                            app_run.push(b);
                            self.state = State::Idle;
                        }
                    }
                }
            }
        }
        flush_app!();
        Decoded {
            up,
            reply: Vec::new(),
        }
    }

    fn encode(&mut self, data: &[u8], _last: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() + 4);
        out.push(ESC);
        out.push(ENVELOPE_START);
        out.extend_from_slice(data);
        out.push(ESC);
        out.push(ENVELOPE_END);
        out
    }
}
