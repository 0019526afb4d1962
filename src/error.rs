//! The error kinds surfaced at API boundaries, per the error handling
//! policy: a small closed set shared across the store, protocol stack,
//! debugger, and synchronizer, rather than one ad-hoc enum per call site.
//!
//! Recoverable transport conditions (a bad CRC, an out-of-order segment, a
//! duplicate ARQ sequence number) are *not* represented here — those are
//! swallowed inside the protocol stack per spec and never reach this type.
//! `ArqLost` is the one transport condition that does surface, because
//! retransmission is exhausted and there is nothing left to retry.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Name lookup failed.
    NotFound,
    /// Payload size did not match the slot's size.
    TypeMismatch,
    /// An index or length fell outside a valid range.
    Bounds,
    /// An alias, macro, or stream table is at capacity.
    Full,
    /// A protocol layer rejected malformed input.
    BadFrame,
    /// ARQ retransmission budget exhausted.
    ArqLost,
    /// The transport would block.
    IoAgain,
    /// The transport is closed.
    IoClosed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotFound => "object not found",
            Self::TypeMismatch => "payload size does not match slot size",
            Self::Bounds => "index or length out of range",
            Self::Full => "table at capacity",
            Self::BadFrame => "malformed frame",
            Self::ArqLost => "retransmission budget exhausted",
            Self::IoAgain => "transport would block",
            Self::IoClosed => "transport closed",
        })
    }
}

impl std::error::Error for Error {}
