//! Stop-and-wait ARQ: one outstanding frame at a time, a 6-bit sequence
//! number, and a reset flag to resynchronize a fresh connection.
//!
//! Header byte layout: bit 7 `RESET`, bit 6 `ACK`, bits 0-5 `seq`. An ack
//! carries the sequence number it is acknowledging (a "precise" ack,
//! rather than a single toggle bit), so a receiver restarting mid-session
//! can tell a late duplicate from a genuinely new frame.

use std::time::Duration;

use super::{Decoded, Layer, Up};

const ACK_FLAG: u8 = 0x40;
const RESET_FLAG: u8 = 0x80;
const SEQ_MASK: u8 = 0x3f;
const SEQ_MODULUS: u8 = 0x40;

struct Pending {
    seq: u8,
    frame: Vec<u8>,
    elapsed: Duration,
    attempts: u8,
}

/// Sequencing and retransmission for one direction of a duplex channel.
/// `decode` handles both incoming data frames (acked and delivered
/// upward) and incoming acks for frames this side has sent.
pub struct Arq {
    retransmit_timeout: Duration,
    max_retransmits: u8,
    send_seq: u8,
    expect_seq: u8,
    reset_pending: bool,
    pending: Option<Pending>,
    lost: bool,
}

impl Arq {
    #[must_use]
    pub fn new(retransmit_timeout: Duration, max_retransmits: u8) -> Self {
        Self {
            retransmit_timeout,
            max_retransmits,
            send_seq: 0,
            expect_seq: 0,
            reset_pending: true,
            pending: None,
            lost: false,
        }
    }

    /// Whether the retransmit budget has been exhausted since the last
    /// call. Clears the flag: callers should check this after every
    /// `tick` and surface [`crate::error::Error::ArqLost`] once.
    pub fn take_lost(&mut self) -> bool {
        std::mem::take(&mut self.lost)
    }

    fn previous_seq(seq: u8) -> u8 {
        (seq + SEQ_MODULUS - 1) % SEQ_MODULUS
    }
}

impl Layer for Arq {
    fn decode(&mut self, data: &[u8]) -> Decoded {
        let Some((&header, payload)) = data.split_first() else {
            return Decoded::default();
        };
        let seq = header & SEQ_MASK;

        if header & ACK_FLAG != 0 {
            if let Some(pending) = &self.pending {
                if pending.seq == seq {
                    self.pending = None;
                    self.send_seq = (self.send_seq + 1) % SEQ_MODULUS;
                }
            }
            return Decoded::default();
        }

        if header & RESET_FLAG != 0 {
            self.expect_seq = seq;
        }

        let ack_header = seq | ACK_FLAG;
        if seq == self.expect_seq {
            self.expect_seq = (self.expect_seq + 1) % SEQ_MODULUS;
            Decoded {
                up: vec![Up::Debug(payload.to_vec())],
                reply: vec![vec![ack_header]],
            }
        } else if seq == Self::previous_seq(self.expect_seq) {
            // Our ack was lost; re-ack without delivering a duplicate.
            Decoded {
                up: Vec::new(),
                reply: vec![vec![ack_header]],
            }
        } else {
            Decoded::default()
        }
    }

    fn encode(&mut self, data: &[u8], _last: bool) -> Vec<u8> {
        let seq = self.send_seq;
        let mut header = seq;
        if self.reset_pending {
            header |= RESET_FLAG;
            self.reset_pending = false;
        }
        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.push(header);
        frame.extend_from_slice(data);
        self.pending = Some(Pending {
            seq,
            frame: frame.clone(),
            elapsed: Duration::ZERO,
            attempts: 0,
        });
        frame
    }

    fn tick(&mut self, elapsed: Duration) -> Option<Vec<u8>> {
        let pending = self.pending.as_mut()?;
        pending.elapsed += elapsed;
        if pending.elapsed < self.retransmit_timeout {
            return None;
        }
        if pending.attempts >= self.max_retransmits {
            self.lost = true;
            self.pending = None;
            return None;
        }
        pending.attempts += 1;
        pending.elapsed = Duration::ZERO;
        Some(pending.frame.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_carries_reset() {
        let mut arq = Arq::new(Duration::from_millis(100), 3);
        let frame = arq.encode(b"hi", true);
        assert_eq!(frame[0] & RESET_FLAG, RESET_FLAG);
        assert_eq!(&frame[1..], b"hi");
    }

    #[test]
    fn ack_clears_pending_and_advances_seq() {
        let mut arq = Arq::new(Duration::from_millis(100), 3);
        let frame = arq.encode(b"hi", true);
        let seq = frame[0] & SEQ_MASK;
        let decoded = arq.decode(&[seq | ACK_FLAG]);
        assert!(decoded.up.is_empty());
        assert!(decoded.reply.is_empty());
        assert_eq!(arq.send_seq, (seq + 1) % SEQ_MODULUS);
        assert!(arq.pending.is_none());
    }

    #[test]
    fn new_data_frame_is_delivered_and_acked() {
        let mut arq = Arq::new(Duration::from_millis(100), 3);
        let decoded = arq.decode(&[0x00, b'x', b'y']);
        assert_eq!(decoded.up, vec![Up::Debug(b"xy".to_vec())]);
        assert_eq!(decoded.reply, vec![vec![ACK_FLAG]]);
        assert_eq!(arq.expect_seq, 1);
    }

    #[test]
    fn duplicate_frame_is_reacked_not_redelivered() {
        let mut arq = Arq::new(Duration::from_millis(100), 3);
        arq.decode(&[0x00, b'x']);
        let decoded = arq.decode(&[0x00, b'x']);
        assert!(decoded.up.is_empty());
        assert_eq!(decoded.reply, vec![vec![ACK_FLAG]]);
    }

    #[test]
    fn retransmits_then_gives_up() {
        let mut arq = Arq::new(Duration::from_millis(10), 2);
        arq.encode(b"hi", true);
        assert!(arq.tick(Duration::from_millis(20)).is_some());
        assert!(arq.tick(Duration::from_millis(20)).is_some());
        assert!(arq.tick(Duration::from_millis(20)).is_none());
        assert!(arq.take_lost());
    }
}
