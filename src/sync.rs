//! Hello/Welcome/Update/Bye: keeps replicas of a store consistent across a
//! byte-oriented channel.
//!
//! A [`Synchronizer`] holds per-channel protocol state but not the store
//! itself — `receive`/`process` take `&mut Store`/`&Schema` as arguments,
//! the same buffer-in/buffer-out shape as [`crate::debugger::Debugger`].
//! This keeps a store usable by a debugger and a synchronizer at once
//! without either owning it exclusively.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use crate::directory::list;
use crate::store::{Hooks, Store};
use crate::types::{DebugVariant, Kind, Type};

/// Identifies a physical link (socket, serial port, ...) the caller is
/// multiplexing channels over. Opaque to this module; the caller picks
/// the numbering.
pub type ChannelId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyWidth {
    U16,
    U32,
}

impl KeyWidth {
    /// Widest key that still leaves an all-ones value free as the
    /// "buffer follows" sentinel (spec: "A key of all-ones means 'buffer
    /// content follows'"). A 16-bit key covers stores up to 64KiB minus
    /// one; anything larger needs 32-bit keys.
    fn for_buffer_size(size: usize) -> Self {
        if size < 0xffff {
            KeyWidth::U16
        } else {
            KeyWidth::U32
        }
    }

    fn len(self) -> usize {
        match self {
            KeyWidth::U16 => 2,
            KeyWidth::U32 => 4,
        }
    }

    fn all_ones(self) -> u32 {
        match self {
            KeyWidth::U16 => 0xffff,
            KeyWidth::U32 => 0xffff_ffff,
        }
    }

    fn read(self, bytes: &[u8]) -> u32 {
        match self {
            KeyWidth::U16 => u32::from(u16::from_be_bytes([bytes[0], bytes[1]])),
            KeyWidth::U32 => u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }

    fn write(self, out: &mut Vec<u8>, key: u32) {
        match self {
            KeyWidth::U16 => out.extend_from_slice(&(key as u16).to_be_bytes()),
            KeyWidth::U32 => out.extend_from_slice(&key.to_be_bytes()),
        }
    }
}

/// A store's synchronization identity: its schema hash, and the key width
/// derived from its buffer size (both sides of a channel must agree on
/// both, which the hash comparison in Hello enforces).
pub struct Schema<'dir> {
    directory: &'dir [u8],
    hash: u64,
    key_width: KeyWidth,
}

impl<'dir> Schema<'dir> {
    #[must_use]
    pub fn new(directory: &'dir [u8], buffer_size: usize) -> Self {
        Self {
            directory,
            hash: schema_hash(directory),
            key_width: KeyWidth::for_buffer_size(buffer_size),
        }
    }

    #[must_use]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    fn slot_at_offset(&self, offset: u32) -> Option<DebugVariant> {
        let mut found = None;
        list(self.directory, &mut |_name, slot| {
            if slot.kind() == Kind::Var && slot.offset() == Some(offset) {
                found = Some(slot);
            }
        });
        found
    }

    fn slot_len_at(&self, offset: u32) -> Option<usize> {
        self.slot_at_offset(offset).map(|slot| slot.len())
    }
}

/// 64-bit FNV-1a over the `(type, size, full_name)` tuple of every
/// variable, in directory traversal order. Two schemas with the same hash
/// agree on layout; function slots are excluded, they carry no buffer
/// storage to synchronize.
#[must_use]
pub fn schema_hash(directory: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut h = OFFSET_BASIS;
    let mut feed = |bytes: &[u8]| {
        for &b in bytes {
            h ^= u64::from(b);
            h = h.wrapping_mul(PRIME);
        }
    };
    list(directory, &mut |name, slot| {
        if slot.kind() != Kind::Var {
            return;
        }
        feed(&[slot.ty() as u8]);
        feed(&(slot.len() as u32).to_be_bytes());
        feed(name);
    });
    h
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Disconnected,
    HelloSent,
    Connected,
}

struct Channel {
    state: ChannelState,
    local_id: u16,
    remote_id: Option<u16>,
    journal: BTreeSet<u32>,
}

enum Bye {
    All,
    Id(u16),
    Hash(u64),
}

enum Message {
    Hello { hash: u64, id: u16 },
    Welcome { their_id: u16, my_id: u16, buffer: Vec<u8> },
    Update { id: u16, entries: Vec<(u32, Vec<u8>)> },
    Bye(Bye),
}

fn decode_message(data: &[u8], schema: &Schema) -> Option<Message> {
    let (&cmd, rest) = data.split_first()?;
    match cmd {
        b'h' => {
            if rest.len() != 10 {
                return None;
            }
            let hash = u64::from_be_bytes(rest[0..8].try_into().ok()?);
            let id = u16::from_be_bytes(rest[8..10].try_into().ok()?);
            Some(Message::Hello { hash, id })
        }
        b'w' => {
            let kw = schema.key_width.len();
            if rest.len() < 4 + kw {
                return None;
            }
            let their_id = u16::from_be_bytes(rest[0..2].try_into().ok()?);
            let my_id = u16::from_be_bytes(rest[2..4].try_into().ok()?);
            let key = schema.key_width.read(&rest[4..4 + kw]);
            if key != schema.key_width.all_ones() {
                return None;
            }
            Some(Message::Welcome {
                their_id,
                my_id,
                buffer: rest[4 + kw..].to_vec(),
            })
        }
        b'u' => {
            if rest.len() < 2 {
                return None;
            }
            let id = u16::from_be_bytes(rest[0..2].try_into().ok()?);
            let kw = schema.key_width.len();
            let mut pos = 2;
            let mut entries = Vec::new();
            while pos < rest.len() {
                if pos + kw > rest.len() {
                    return None;
                }
                let offset = schema.key_width.read(&rest[pos..pos + kw]);
                pos += kw;
                let len = schema.slot_len_at(offset)?;
                if pos + len > rest.len() {
                    return None;
                }
                entries.push((offset, rest[pos..pos + len].to_vec()));
                pos += len;
            }
            Some(Message::Update { id, entries })
        }
        b'b' => match rest.len() {
            0 => Some(Message::Bye(Bye::All)),
            2 => Some(Message::Bye(Bye::Id(u16::from_be_bytes(rest.try_into().ok()?)))),
            8 => Some(Message::Bye(Bye::Hash(u64::from_be_bytes(rest.try_into().ok()?)))),
            _ => None,
        },
        _ => None,
    }
}

fn encode_hello(hash: u64, id: u16) -> Vec<u8> {
    let mut out = vec![b'h'];
    out.extend_from_slice(&hash.to_be_bytes());
    out.extend_from_slice(&id.to_be_bytes());
    out
}

fn encode_welcome(their_id: u16, my_id: u16, buffer: &[u8], kw: KeyWidth) -> Vec<u8> {
    let mut out = vec![b'w'];
    out.extend_from_slice(&their_id.to_be_bytes());
    out.extend_from_slice(&my_id.to_be_bytes());
    kw.write(&mut out, kw.all_ones());
    out.extend_from_slice(buffer);
    out
}

fn encode_update(id: u16, entries: &[(u32, Vec<u8>)], kw: KeyWidth) -> Vec<u8> {
    let mut out = vec![b'u'];
    out.extend_from_slice(&id.to_be_bytes());
    for (offset, data) in entries {
        kw.write(&mut out, *offset);
        out.extend_from_slice(data);
    }
    out
}

/// `b` with no id or hash: tear down every association on the channel.
#[must_use]
pub fn encode_bye_all() -> Vec<u8> {
    vec![b'b']
}

/// Per-(store, channel) protocol state and pending outbound changes. One
/// `Synchronizer` drives one store's associations across any number of
/// channels; a store synced over several links gets one entry per link.
#[derive(Default)]
pub struct Synchronizer {
    next_local_id: u16,
    channels: HashMap<ChannelId, Channel>,
}

impl Synchronizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_local_id: 1,
            channels: HashMap::new(),
        }
    }

    fn alloc_local_id(&mut self) -> u16 {
        let id = self.next_local_id;
        self.next_local_id = match self.next_local_id.checked_add(1) {
            Some(0) | None => 1,
            Some(n) => n,
        };
        id
    }

    /// Begin an association on `channel`, returning the Hello to send.
    pub fn connect(&mut self, channel: ChannelId, schema: &Schema) -> Vec<u8> {
        let local_id = self.alloc_local_id();
        self.channels.insert(
            channel,
            Channel {
                state: ChannelState::HelloSent,
                local_id,
                remote_id: None,
                journal: BTreeSet::new(),
            },
        );
        encode_hello(schema.hash(), local_id)
    }

    /// Tear down the association on `channel` and return the Bye to send.
    pub fn disconnect(&mut self, channel: ChannelId) -> Vec<u8> {
        self.channels.remove(&channel);
        encode_bye_all()
    }

    #[must_use]
    pub fn is_connected(&self, channel: ChannelId) -> bool {
        self.channels
            .get(&channel)
            .is_some_and(|c| c.state == ChannelState::Connected)
    }

    /// Mark a buffer offset dirty in every connected channel's journal.
    /// Call this from the store's change hook (`Hooks::exit_x` with
    /// `changed = true`) for locally-originated writes — writes applied
    /// from an inbound Update are journaled directly by `receive`, which
    /// already knows which channel to exclude, so this isn't re-entered
    /// from there.
    pub fn note_dirty(&mut self, offset: u32) {
        for ch in self.channels.values_mut() {
            if ch.state == ChannelState::Connected {
                ch.journal.insert(offset);
            }
        }
    }

    /// Handle one incoming message on `channel`, applying any Update to
    /// `store` and returning bytes to send back (empty if nothing is
    /// owed in response).
    pub fn receive(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        schema: &Schema,
        store: &mut Store,
    ) -> Vec<u8> {
        let Some(msg) = decode_message(data, schema) else {
            return Vec::new();
        };
        match msg {
            Message::Hello { hash, id } => {
                if hash != schema.hash() {
                    log::warn!("channel {channel}: schema hash mismatch, ignoring hello from {id}");
                    return Vec::new();
                }
                let entry = self.channels.entry(channel).or_insert_with(|| Channel {
                    state: ChannelState::Disconnected,
                    local_id: 0,
                    remote_id: None,
                    journal: BTreeSet::new(),
                });
                if entry.state == ChannelState::Connected {
                    return Vec::new();
                }
                if entry.local_id == 0 {
                    entry.local_id = self.next_local_id;
                    self.next_local_id = match self.next_local_id.checked_add(1) {
                        Some(0) | None => 1,
                        Some(n) => n,
                    };
                }
                entry.remote_id = Some(id);
                entry.state = ChannelState::Connected;
                encode_welcome(id, entry.local_id, store.buffer(), schema.key_width)
            }
            Message::Welcome {
                their_id,
                my_id,
                buffer,
            } => {
                let Some(entry) = self.channels.get_mut(&channel) else {
                    return Vec::new();
                };
                if entry.state != ChannelState::HelloSent || entry.local_id != their_id {
                    return Vec::new();
                }
                entry.remote_id = Some(my_id);
                entry.state = ChannelState::Connected;
                let _ = store.write_memory(0, &buffer);
                Vec::new()
            }
            Message::Update { id, entries } => {
                let matches = self
                    .channels
                    .get(&channel)
                    .is_some_and(|c| c.state == ChannelState::Connected && c.local_id == id);
                if !matches {
                    return Vec::new();
                }
                // Write directly (bypassing Hooks::exit_x) and journal the
                // change onto every *other* connected channel ourselves:
                // going through Store::set here would re-enter a hook that
                // may itself be bridged back into this Synchronizer.
                for (offset, bytes) in &entries {
                    if store.write_memory(*offset, bytes).is_ok() {
                        for (cid, ch) in &mut self.channels {
                            if *cid != channel && ch.state == ChannelState::Connected {
                                ch.journal.insert(*offset);
                            }
                        }
                    }
                }
                Vec::new()
            }
            Message::Bye(bye) => {
                let should_remove = match bye {
                    Bye::All => true,
                    Bye::Id(id) => self.channels.get(&channel).map(|c| c.local_id) == Some(id),
                    Bye::Hash(h) => h == schema.hash(),
                };
                if should_remove {
                    log::debug!("channel {channel}: association torn down by bye");
                    self.channels.remove(&channel);
                }
                Vec::new()
            }
        }
    }

    /// Build (and clear) the pending Update for `channel` from its
    /// journal, or `None` if there's nothing dirty to send.
    pub fn process(&mut self, channel: ChannelId, store: &Store, schema: &Schema) -> Option<Vec<u8>> {
        let entry = self.channels.get_mut(&channel)?;
        if entry.state != ChannelState::Connected || entry.journal.is_empty() {
            return None;
        }
        let remote_id = entry.remote_id?;
        let offsets: Vec<u32> = std::mem::take(&mut entry.journal).into_iter().collect();
        let mut entries = Vec::with_capacity(offsets.len());
        for offset in offsets {
            let len = schema.slot_len_at(offset)?;
            let data = store.buffer().get(offset as usize..offset as usize + len)?.to_vec();
            entries.push((offset, data));
        }
        Some(encode_update(remote_id, &entries, schema.key_width))
    }
}

/// Bridges a store's change hooks to a [`Synchronizer`]'s journals, for
/// locally-originated writes (e.g. through a [`crate::debugger::Debugger`]
/// command) — install with `store.set_hooks(Box::new(SyncHooks(sync.clone())))`,
/// sharing the same handle the embedder drives `connect`/`receive`/
/// `process` through. Updates applied from a remote peer go through
/// `Synchronizer::receive` directly and never re-enter this hook.
pub struct SyncHooks(pub Rc<RefCell<Synchronizer>>);

impl Hooks for SyncHooks {
    fn exit_x(&mut self, _ty: Type, offset: u32, _len: usize, changed: bool) {
        if changed {
            self.0.borrow_mut().note_dirty(offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Config;

    /// A two-variable directory: `/a` (int32 @0), `/b` (int32 @4).
    fn two_var_directory() -> Vec<u8> {
        let mut dir = Vec::new();
        dir.push(2u8);
        dir.extend_from_slice(b"/a");
        dir.push(0x80 | Type::Int32 as u8);
        dir.push(0);
        dir.push(2u8);
        dir.extend_from_slice(b"/b");
        dir.push(0x80 | Type::Int32 as u8);
        dir.push(4);
        dir
    }

    #[test]
    fn schema_hash_is_stable_and_layout_sensitive() {
        let dir = two_var_directory();
        let h1 = schema_hash(&dir);
        let h2 = schema_hash(&dir);
        assert_eq!(h1, h2);

        let mut other = two_var_directory();
        other[0] = 3; // corrupt the first slot's name length
        assert_ne!(schema_hash(&other), h1);
    }

    #[test]
    fn handshake_completes_and_welcome_carries_buffer() {
        let dir = two_var_directory();
        let schema = Schema::new(&dir, 8);
        let mut a = Synchronizer::new();
        let mut b = Synchronizer::new();
        let mut store_a = Store::new(8, &dir, Config::default());
        let mut store_b = Store::new(8, &dir, Config::default());
        // b is the one who will reply with Welcome, so b's buffer is the
        // one that should end up mirrored onto a.
        store_b
            .set(&DebugVariant::new_var(Type::Int32, 0, 4), &[1, 2, 3, 4])
            .unwrap();

        let hello_a = a.connect(1, &schema);
        let welcome = b.receive(1, &hello_a, &schema, &mut store_b);
        assert!(!welcome.is_empty());
        let empty = a.receive(1, &welcome, &schema, &mut store_a);
        assert!(empty.is_empty());

        assert!(a.is_connected(1));
        assert!(b.is_connected(1));
        assert_eq!(store_a.buffer(), store_b.buffer());
    }

    #[test]
    fn update_applies_and_echo_suppresses_only_the_originating_channel() {
        // a is connected to both b (channel 1) and c (channel 2); b sends
        // an Update to a, which must forward it on to c but not echo it
        // straight back to b.
        let dir = two_var_directory();
        let schema = Schema::new(&dir, 8);
        let mut a = Synchronizer::new();
        let mut b = Synchronizer::new();
        let mut c = Synchronizer::new();
        let mut store_a = Store::new(8, &dir, Config::default());
        let mut store_b = Store::new(8, &dir, Config::default());
        let mut store_c = Store::new(8, &dir, Config::default());

        let hello_b = a.connect(1, &schema);
        let welcome = b.receive(1, &hello_b, &schema, &mut store_b);
        a.receive(1, &welcome, &schema, &mut store_a);

        let hello_c = a.connect(2, &schema);
        let welcome = c.receive(2, &hello_c, &schema, &mut store_c);
        a.receive(2, &welcome, &schema, &mut store_a);

        store_b
            .set(&DebugVariant::new_var(Type::Int32, 0, 4), &[9, 9, 9, 9])
            .unwrap();
        b.note_dirty(0);
        let update = b.process(1, &store_b, &schema).unwrap();

        let reply = a.receive(1, &update, &schema, &mut store_a);
        assert!(reply.is_empty());
        let mut out = [0u8; 4];
        store_a
            .get(&DebugVariant::new_var(Type::Int32, 0, 4), &mut out)
            .unwrap();
        assert_eq!(out, [9, 9, 9, 9]);

        // Not echoed back to b, the channel it just arrived from...
        assert!(a.process(1, &store_a, &schema).is_none());
        // ...but forwarded on to c.
        let forwarded = a.process(2, &store_a, &schema).unwrap();
        c.receive(2, &forwarded, &schema, &mut store_c);
        let mut out = [0u8; 4];
        store_c
            .get(&DebugVariant::new_var(Type::Int32, 0, 4), &mut out)
            .unwrap();
        assert_eq!(out, [9, 9, 9, 9]);
    }

    #[test]
    fn local_write_journals_via_sync_hooks() {
        let dir = two_var_directory();
        let schema = Schema::new(&dir, 8);
        let a = Rc::new(RefCell::new(Synchronizer::new()));
        let mut b = Synchronizer::new();
        let mut store_a = Store::new(8, &dir, Config::default());
        let mut store_b = Store::new(8, &dir, Config::default());
        store_a.set_hooks(Box::new(SyncHooks(a.clone())));

        let hello_b = a.borrow_mut().connect(1, &schema);
        let welcome = b.receive(1, &hello_b, &schema, &mut store_b);
        a.borrow_mut().receive(1, &welcome, &schema, &mut store_a);

        // A local write through the store's own hook path must land in
        // the journal without panicking on a double borrow of `a`.
        store_a
            .set(&DebugVariant::new_var(Type::Int32, 0, 4), &[7, 7, 7, 7])
            .unwrap();
        let update = a.borrow_mut().process(1, &store_a, &schema).unwrap();
        b.receive(1, &update, &schema, &mut store_b);
        let mut out = [0u8; 4];
        store_b
            .get(&DebugVariant::new_var(Type::Int32, 0, 4), &mut out)
            .unwrap();
        assert_eq!(out, [7, 7, 7, 7]);
    }

    #[test]
    fn bye_tears_down_association() {
        let dir = two_var_directory();
        let schema = Schema::new(&dir, 8);
        let mut a = Synchronizer::new();
        let mut b = Synchronizer::new();
        let mut store_b = Store::new(8, &dir, Config::default());

        let hello_a = a.connect(1, &schema);
        b.receive(1, &hello_a, &schema, &mut store_b);
        assert!(b.is_connected(1));

        b.receive(1, &encode_bye_all(), &schema, &mut store_b);
        assert!(!b.is_connected(1));
    }

    #[test]
    fn mismatched_schema_hash_is_ignored() {
        let dir = two_var_directory();
        let schema = Schema::new(&dir, 8);
        let mut b = Synchronizer::new();
        let mut store_b = Store::new(8, &dir, Config::default());

        let bogus_hello = encode_hello(!schema.hash(), 7);
        let reply = b.receive(1, &bogus_hello, &schema, &mut store_b);
        assert!(reply.is_empty());
        assert!(!b.is_connected(1));
    }
}
