//! End-to-end scenarios spanning the debugger, the store, and the
//! transport stack together, rather than one layer in isolation.

use libstored::protocol::{Arq, AsciiEscape, Crc16, Layer, Segment, Stack, Terminal, Up};
use libstored::{Config, Debugger, Store, Type};
use std::time::Duration;

fn directory_with_int32(name: &[u8]) -> Vec<u8> {
    let mut dir = Vec::new();
    dir.push(name.len() as u8);
    dir.extend_from_slice(name);
    dir.push(0x80 | Type::Int32 as u8);
    dir.push(0);
    dir
}

fn directory_with_int16(name: &[u8]) -> Vec<u8> {
    let mut dir = Vec::new();
    dir.push(name.len() as u8);
    dir.extend_from_slice(name);
    dir.push(0x80 | Type::Int16 as u8);
    dir.push(0);
    dir
}

fn debugger_with(dir: Vec<u8>, buffer_size: usize) -> Debugger<'static, 'static> {
    let dir: &'static [u8] = Box::leak(dir.into_boxed_slice());
    let store = Store::new(buffer_size, dir, Config::default());
    Debugger::new(store, "test-target")
}

/// Scenario (a): `int32 /x = 0`, `wdeadbeef/x` then `r/x`.
#[test]
fn scenario_write_then_read_int32() {
    let mut dbg = debugger_with(directory_with_int32(b"/x"), 4);
    assert_eq!(dbg.process(b"wdeadbeef/x"), b"!");
    assert_eq!(dbg.process(b"r/x"), b"deadbeef");
}

/// Scenario (b): `int16 /a/b = 0` aliased to `0`, written through the
/// alias with leading zero nibbles elided on read back.
#[test]
fn scenario_alias_write_elides_leading_zeros() {
    let mut dbg = debugger_with(directory_with_int16(b"/a/b"), 2);
    assert_eq!(dbg.process(b"a0/a/b"), b"!");
    assert_eq!(dbg.process(b"w00ff0"), b"!");
    assert_eq!(dbg.process(b"r0"), b"ff");
}

/// Scenario (c): `?` on a fully-capable store advertises every command.
#[test]
fn scenario_capability_string_contains_every_command() {
    let mut dbg = debugger_with(directory_with_int32(b"/x"), 4);
    let caps = dbg.process(b"?");
    for c in "?rwlaemivRWsft".bytes() {
        assert!(caps.contains(&c), "missing {}", c as char);
    }
    assert!(!caps.ends_with(b"\n"));
}

/// Scenario (d): a macro concatenating sub-command responses.
#[test]
fn scenario_macro_concatenates_two_reads() {
    let mut dbg = debugger_with(directory_with_int32(b"/x"), 4);
    dbg.process(b"w10/x");
    assert_eq!(dbg.process(b"mZ r/x e;"), b"!");
    assert_eq!(dbg.process(b"Z"), b"10;");
}

/// Scenario (e): segmentation at MTU=4 splits "hello" into two fragments,
/// each at most MTU bytes, that reassemble to the original payload.
#[test]
fn scenario_segmentation_reassembles_across_mtu() {
    let mut enc = Segment::new(4);
    let mut dec = Segment::new(4);
    let encoded = enc.encode(b"hello", true);
    assert_eq!(encoded, b"helCloE");
    for fragment in encoded.split_inclusive(|&b| b == b'C' || b == b'E') {
        assert!(fragment.len() <= 4);
    }
    let decoded = dec.decode(&encoded);
    assert_eq!(decoded.up, vec![Up::Debug(b"hello".to_vec())]);
}

/// Scenario (f): CRC over `"?"` is the protocol's own worked example, and
/// a single flipped bit in the payload is caught.
#[test]
fn scenario_crc_detects_single_bit_flip() {
    let crc = libstored::protocol::crc16::compute(b"?");
    assert_eq!(crc.to_be_bytes(), [0xA5, 0x51]);

    let flipped = libstored::protocol::crc16::compute(&[b'?' ^ 0x80]);
    assert_ne!(flipped, crc);
}

/// Invariant 1 (round-trip) and invariant 2 (directory totality) together,
/// driven through the debugger rather than the store directly.
#[test]
fn round_trip_and_directory_totality() {
    let mut dbg = debugger_with(directory_with_int32(b"/count"), 4);
    assert_eq!(dbg.process(b"wcafebabe/count"), b"!");
    assert_eq!(dbg.process(b"r/count"), b"cafebabe");
}

/// Invariant 3: a branch with two siblings (`/a`, `/b`) accepts each
/// sibling's full name but rejects the ambiguous empty-suffix prefix,
/// driven end to end through the debugger's own resolver.
#[test]
fn ambiguous_abbreviation_is_rejected() {
    // `/` (Hierarchy) -> Char 'a' { jmp_lo: END, fall-through: Var int8@0,
    // jmp_hi: Char 'b' { jmp_lo: END, fall-through: Var int8@1, jmp_hi: END } }
    let mut dir = Vec::new();
    dir.push(0x2f); // Hierarchy
    dir.push(b'a'); // Char 'a'
    let jmp_lo_a = dir.len();
    dir.push(0);
    let jmp_hi_a = dir.len();
    dir.push(0);
    dir.push(0x80 | Type::Int8 as u8);
    dir.push(0); // offset 0

    let end_lo_a = dir.len();
    dir.push(0x00); // END

    let char_b = dir.len();
    dir.push(b'b');
    let jmp_lo_b = dir.len();
    dir.push(0);
    let jmp_hi_b = dir.len();
    dir.push(0);
    dir.push(0x80 | Type::Int8 as u8);
    dir.push(1); // offset 1

    let end_lo_b = dir.len();
    dir.push(0x00);
    let end_hi_b = dir.len();
    dir.push(0x00);

    dir[jmp_lo_a] = end_lo_a as u8;
    dir[jmp_hi_a] = char_b as u8;
    dir[jmp_lo_b] = end_lo_b as u8;
    dir[jmp_hi_b] = end_hi_b as u8;

    let mut dbg = debugger_with(dir, 2);
    assert_eq!(dbg.process(b"waa/a"), b"!");
    assert_eq!(dbg.process(b"r/a"), b"aa");
    assert_eq!(dbg.process(b"r/"), b"?"); // ambiguous: both /a and /b reachable
}

/// Full transport stack: a debugger response framed through
/// Terminal/AsciiEscape/Segment/Crc16/Arq round-trips back to the
/// original bytes at the far end.
#[test]
fn transport_stack_round_trips_a_debug_frame() {
    let mut sender = Stack::new(vec![
        Box::new(Terminal::new()),
        Box::new(AsciiEscape::new()),
        Box::new(Segment::new(32)),
        Box::new(Crc16::new(true)),
        Box::new(Arq::new(Duration::from_millis(100), 3)),
    ]);
    let mut receiver = Stack::new(vec![
        Box::new(Terminal::new()),
        Box::new(AsciiEscape::new()),
        Box::new(Segment::new(32)),
        Box::new(Crc16::new(true)),
        Box::new(Arq::new(Duration::from_millis(100), 3)),
    ]);

    let payload = b"wdeadbeef/x".to_vec();
    let wire = sender.encode(&payload);

    let mut received = Vec::new();
    let mut replies = Vec::new();
    receiver.decode(&wire, &mut |up| received.push(up), &mut |reply| {
        replies.push(reply.to_vec())
    });

    assert_eq!(received, vec![Up::Debug(payload)]);

    // Route any ARQ ack back to the sender so its retransmit timer clears
    // and no spurious retransmit fires on the next tick.
    for reply in &replies {
        let mut acked = Vec::new();
        sender.decode(reply, &mut |up| acked.push(up), &mut |_| {});
    }
    let mut resent = Vec::new();
    sender.tick(Duration::from_secs(1), &mut |bytes| resent.push(bytes.to_vec()));
    assert!(resent.is_empty());
}

fn full_stack() -> Stack {
    Stack::new(vec![
        Box::new(Terminal::new()),
        Box::new(AsciiEscape::new()),
        Box::new(Segment::new(32)),
        Box::new(Crc16::new(true)),
        Box::new(Arq::new(Duration::from_millis(100), 3)),
    ])
}

/// A second frame's ARQ header is a plain sequence number with no
/// reset/ack flag set (`0x01`), a control byte `AsciiEscape` must stuff
/// rather than pass through raw. The first frame's header (`0x80`,
/// reset flag only) happens to need no stuffing at all, so a suite that
/// only ever sends one frame per direction would never catch a
/// `Terminal`/`AsciiEscape` escape-marker collision.
#[test]
fn transport_stack_round_trips_a_second_frame_needing_escape() {
    let mut sender = full_stack();
    let mut receiver = full_stack();

    let mut received = Vec::new();
    let mut replies = Vec::new();

    let first = b"r/x".to_vec();
    let wire = sender.encode(&first);
    receiver.decode(&wire, &mut |up| received.push(up), &mut |reply| {
        replies.push(reply.to_vec())
    });
    for reply in replies.drain(..) {
        sender.decode(&reply, &mut |_| {}, &mut |_| {});
    }

    let second = b"r/y".to_vec();
    let wire2 = sender.encode(&second);
    assert!(
        wire2.contains(&0x10),
        "expected the second frame's unflagged ARQ header to require ascii-escape stuffing"
    );
    receiver.decode(&wire2, &mut |up| received.push(up), &mut |reply| {
        replies.push(reply.to_vec())
    });

    assert_eq!(received, vec![Up::Debug(first), Up::Debug(second)]);
}
