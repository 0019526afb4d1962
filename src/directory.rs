//! The directory: a serialized prefix trie mapping object names to slots.
//!
//! Node kinds, in the order a decoder must recognize them:
//!
//! - `0x00` — `End`: no match.
//! - `0x01..=0x1f` — `Skip n`: the next `n` directory bytes are a literal
//!   string that must match the next `n` name bytes exactly.
//! - `0x2f` (`'/'`) — `Hierarchy`: consume name bytes up to and including
//!   the next `/`.
//! - any other byte in `0x20..=0x7e` — `Char c`: a three-way branch. Two
//!   VLQs follow (`jmp_lo`, `jmp_hi`); the node after them is the
//!   fall-through (`name_char == c`) continuation.
//! - `0x80 | type` — `Var`: a terminal. Non-fixed types are followed by a
//!   VLQ length, then always a VLQ offset (buffer offset, or function
//!   index when the function flag is set).
//!
//! `jmp_lo`/`jmp_hi` are absolute byte offsets into the directory blob.
//!
//! The `Var` tag byte needs its own bit layout distinct from the wire type
//! tag ([`Type::to_tag_byte`]): bit 7 there already doubles as "is a
//! function", so OR-ing it again with the node's own "this is a Var" marker
//! would make the function flag unrecoverable. The directory reserves bit 7
//! for the Var marker, bit 6 for the function flag, and the low 6 bits for
//! the type index (11 variants, comfortably under 64).

use crate::types::{DebugVariant, Type};
use crate::vlq;

const END: u8 = 0x00;
const SKIP_MIN: u8 = 0x01;
const SKIP_MAX: u8 = 0x1f;
const HIERARCHY: u8 = 0x2f;
const VAR_MARKER: u8 = 0x80;
const VAR_FUNCTION_FLAG: u8 = 0x40;
const VAR_TYPE_MASK: u8 = 0x3f;

fn encode_var_tag(ty: Type, is_function: bool) -> u8 {
    VAR_MARKER | if is_function { VAR_FUNCTION_FLAG } else { 0 } | (ty as u8)
}

fn decode_var_tag(byte: u8) -> Option<(Type, bool)> {
    if byte & VAR_MARKER == 0 {
        return None;
    }
    let is_function = byte & VAR_FUNCTION_FLAG != 0;
    let ty = Type::try_from(byte & VAR_TYPE_MASK).ok()?;
    Some((ty, is_function))
}

/// Errors from malformed directory bytes. Ordinary "no such object" is not
/// an error — [`find`] returns [`DebugVariant::INVALID`] for that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Truncated,
    BadVlq,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Truncated => "directory truncated",
            Self::BadVlq => "malformed directory vlq",
        })
    }
}

impl std::error::Error for Error {}

impl From<vlq::Error> for Error {
    fn from(_: vlq::Error) -> Self {
        Self::BadVlq
    }
}

fn parse_var(dir: &[u8], pos: usize) -> Result<Option<(DebugVariant, usize)>, Error> {
    let Some(&tag) = dir.get(pos) else {
        return Ok(None);
    };
    let Some((ty, is_function)) = decode_var_tag(tag) else {
        return Ok(None);
    };
    let mut p = pos + 1;
    let len = if ty.is_variable_length() {
        let (len, consumed) = vlq::decode(dir.get(p..).ok_or(Error::Truncated)?)?;
        p += consumed;
        len as usize
    } else {
        // `Invalid` (type index 0x0f) has neither a fixed nor a variable
        // size — a directory that encodes it as a terminal is malformed,
        // not a real slot.
        let Some(size) = ty.fixed_size() else {
            return Ok(None);
        };
        size
    };
    let (offset, consumed) = vlq::decode(dir.get(p..).ok_or(Error::Truncated)?)?;
    p += consumed;
    let variant = if is_function {
        DebugVariant::new_func(ty, offset, len)
    } else {
        DebugVariant::new_var(ty, offset, len)
    };
    Ok(Some((variant, p)))
}

/// Walk the trie matching `name` against it, honoring unambiguous prefix
/// abbreviation. `max_len` bounds how many bytes of `name` are considered
/// (callers carving a name out of a larger request buffer pass the name's
/// length explicitly rather than relying on a terminator byte).
#[must_use]
pub fn find(dir: &[u8], name: &[u8], max_len: usize) -> DebugVariant {
    let name = &name[..max_len.min(name.len())];
    find_at(dir, 0, name).unwrap_or(DebugVariant::INVALID)
}

fn find_at(dir: &[u8], mut pos: usize, mut name: &[u8]) -> Option<DebugVariant> {
    loop {
        let node = *dir.get(pos)?;
        match node {
            END => return None,
            SKIP_MIN..=SKIP_MAX => {
                let n = node as usize;
                let literal = dir.get(pos + 1..pos + 1 + n)?;
                let next = pos + 1 + n;
                if name.len() >= n {
                    if &name[..n] != literal {
                        return None;
                    }
                    name = &name[n..];
                    pos = next;
                } else {
                    if name != &literal[..name.len()] {
                        return None;
                    }
                    return resolve_unique(dir, next);
                }
            }
            HIERARCHY => {
                let next = pos + 1;
                match name.iter().position(|&b| b == b'/') {
                    Some(idx) => {
                        name = &name[idx + 1..];
                        pos = next;
                    }
                    None if name.is_empty() => return resolve_unique(dir, next),
                    None => return None,
                }
            }
            _ if node & VAR_MARKER != 0 => {
                if !name.is_empty() {
                    return None;
                }
                return parse_var(dir, pos).ok().flatten().map(|(v, _)| v);
            }
            c => {
                let mut p = pos + 1;
                let (jmp_lo, consumed) = vlq::decode(dir.get(p..)?).ok()?;
                p += consumed;
                let (jmp_hi, consumed) = vlq::decode(dir.get(p..)?).ok()?;
                p += consumed;
                match name.first() {
                    None => return resolve_branch_unique(dir, jmp_lo as usize, jmp_hi as usize, p),
                    Some(&nc) if nc < c => pos = jmp_lo as usize,
                    Some(&nc) if nc > c => pos = jmp_hi as usize,
                    Some(_) => {
                        name = &name[1..];
                        pos = p;
                    }
                }
            }
        }
    }
}

/// Collect the unique terminal reachable from `pos` ignoring name content,
/// used when the name is exhausted mid-trie. Returns `None` if zero or more
/// than one terminal is reachable (not found, or ambiguous abbreviation).
fn resolve_unique(dir: &[u8], pos: usize) -> Option<DebugVariant> {
    let mut found = None;
    let mut count = 0usize;
    collect(dir, pos, &mut found, &mut count);
    (count == 1).then_some(found).flatten()
}

fn resolve_branch_unique(dir: &[u8], lo: usize, hi: usize, eq: usize) -> Option<DebugVariant> {
    let mut found = None;
    let mut count = 0usize;
    collect(dir, lo, &mut found, &mut count);
    if count <= 1 {
        collect(dir, hi, &mut found, &mut count);
    }
    if count <= 1 {
        collect(dir, eq, &mut found, &mut count);
    }
    (count == 1).then_some(found).flatten()
}

fn collect(dir: &[u8], pos: usize, found: &mut Option<DebugVariant>, count: &mut usize) {
    if *count > 1 {
        return;
    }
    let Some(&node) = dir.get(pos) else {
        return;
    };
    match node {
        END => {}
        SKIP_MIN..=SKIP_MAX => {
            let n = node as usize;
            collect(dir, pos + 1 + n, found, count);
        }
        HIERARCHY => collect(dir, pos + 1, found, count),
        _ if node & VAR_MARKER != 0 => {
            if let Ok(Some((variant, _))) = parse_var(dir, pos) {
                *count += 1;
                *found = (*count == 1).then_some(variant);
            }
        }
        _ => {
            let mut p = pos + 1;
            let Some(rest) = dir.get(p..) else { return };
            let Ok((jmp_lo, consumed)) = vlq::decode(rest) else {
                return;
            };
            p += consumed;
            let Some(rest) = dir.get(p..) else { return };
            let Ok((jmp_hi, consumed)) = vlq::decode(rest) else {
                return;
            };
            p += consumed;
            collect(dir, jmp_lo as usize, found, count);
            if *count <= 1 {
                collect(dir, jmp_hi as usize, found, count);
            }
            if *count <= 1 {
                collect(dir, p, found, count);
            }
        }
    }
}

/// Pre-order traversal emitting every object's full name, in directory
/// order (lexicographic by encoded branches: `jmp_lo`, then `c`, then
/// `jmp_hi`).
pub fn list(dir: &[u8], cb: &mut dyn FnMut(&[u8], DebugVariant)) {
    let mut name = Vec::new();
    list_at(dir, 0, &mut name, cb);
}

fn list_at(dir: &[u8], pos: usize, name: &mut Vec<u8>, cb: &mut dyn FnMut(&[u8], DebugVariant)) {
    let Some(&node) = dir.get(pos) else {
        return;
    };
    match node {
        END => {}
        SKIP_MIN..=SKIP_MAX => {
            let n = node as usize;
            let Some(literal) = dir.get(pos + 1..pos + 1 + n) else {
                return;
            };
            name.extend_from_slice(literal);
            list_at(dir, pos + 1 + n, name, cb);
            name.truncate(name.len() - n);
        }
        HIERARCHY => {
            name.push(b'/');
            list_at(dir, pos + 1, name, cb);
            name.pop();
        }
        _ if node & VAR_MARKER != 0 => {
            if let Ok(Some((variant, _))) = parse_var(dir, pos) {
                cb(name, variant);
            }
        }
        c => {
            let mut p = pos + 1;
            let Some(rest) = dir.get(p..) else { return };
            let Ok((jmp_lo, consumed)) = vlq::decode(rest) else {
                return;
            };
            p += consumed;
            let Some(rest) = dir.get(p..) else { return };
            let Ok((jmp_hi, consumed)) = vlq::decode(rest) else {
                return;
            };
            p += consumed;
            list_at(dir, jmp_lo as usize, name, cb);
            name.push(c);
            list_at(dir, p, name, cb);
            name.pop();
            list_at(dir, jmp_hi as usize, name, cb);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build `/x -> Uint32@offset` as a directory blob by hand, the way a
    /// real code generator would emit it: a `Skip 2` over the literal `/x`
    /// followed directly by a `Var` terminal.
    fn single_var_dir(name: &[u8], ty: Type, offset: u32) -> Vec<u8> {
        let mut dir = Vec::new();
        dir.push(name.len() as u8);
        dir.extend_from_slice(name);
        dir.push(encode_var_tag(ty, false));
        vlq::encode(offset, &mut dir);
        dir
    }

    #[test]
    fn finds_exact_name() {
        let dir = single_var_dir(b"/x", Type::Int32, 0);
        let v = find(&dir, b"/x", 2);
        assert!(v.valid());
        assert_eq!(v.ty(), Type::Int32);
        assert_eq!(v.offset(), Some(0));
        assert_eq!(v.len(), 4);
    }

    #[test]
    fn mismatched_name_is_invalid() {
        let dir = single_var_dir(b"/x", Type::Int32, 0);
        assert!(!find(&dir, b"/y", 2).valid());
    }

    #[test]
    fn unambiguous_prefix_succeeds() {
        // single-variable directory: any non-empty prefix of "/x" is unique.
        let dir = single_var_dir(b"/x", Type::Int32, 0);
        assert!(find(&dir, b"/", 1).valid());
    }

    #[test]
    fn blob_type_reads_length_then_offset() {
        let mut dir = Vec::new();
        dir.push(1);
        dir.push(b'b');
        dir.push(encode_var_tag(Type::Blob, false));
        vlq::encode(16, &mut dir); // length
        vlq::encode(4, &mut dir); // offset
        let v = find(&dir, b"b", 1);
        assert!(v.valid());
        assert_eq!(v.ty(), Type::Blob);
        assert_eq!(v.len(), 16);
        assert_eq!(v.offset(), Some(4));
    }

    #[test]
    fn function_slot_reports_fidx() {
        let mut dir = Vec::new();
        dir.push(1);
        dir.push(b'f');
        dir.push(encode_var_tag(Type::Uint8, true));
        vlq::encode(7, &mut dir); // function index
        let v = find(&dir, b"f", 1);
        assert!(v.valid());
        assert_eq!(v.kind(), crate::types::Kind::Func);
        assert_eq!(v.fidx(), Some(7));
    }

    /// Two variables sharing a branch node: `/a` and `/b`.
    ///
    /// A `Char` node's `jmp_lo`/`jmp_hi` branches re-examine the *same*
    /// unconsumed name character against a different pivot — only the
    /// fall-through (equal) branch advances the name. So `/b` is reached
    /// through a second nested `Char 'b'` node off the first node's
    /// `jmp_hi`, not as a direct `Var`.
    fn two_var_dir() -> Vec<u8> {
        let mut dir = Vec::new();
        dir.push(HIERARCHY); // pos 0: consume leading '/'

        dir.push(b'a'); // pos 1: Char 'a'
        let jmp_lo_a = dir.len();
        dir.push(0); // patched below
        let jmp_hi_a = dir.len();
        dir.push(0); // patched below
        // fall-through (name_char == 'a'): Var /a
        dir.push(encode_var_tag(Type::Int8, false));
        vlq::encode(0, &mut dir);

        // jmp_lo target for 'a': nothing is less than 'a' here.
        let end_lo_a = dir.len();
        dir.push(END);

        // jmp_hi target for 'a': another decision node for 'b'.
        let char_b = dir.len();
        dir.push(b'b');
        let jmp_lo_b = dir.len();
        dir.push(0);
        let jmp_hi_b = dir.len();
        dir.push(0);
        // fall-through (name_char == 'b'): Var /b
        dir.push(encode_var_tag(Type::Int8, false));
        vlq::encode(1, &mut dir);

        let end_lo_b = dir.len();
        dir.push(END);
        let end_hi_b = dir.len();
        dir.push(END);

        dir[jmp_lo_a] = end_lo_a as u8;
        dir[jmp_hi_a] = char_b as u8;
        dir[jmp_lo_b] = end_lo_b as u8;
        dir[jmp_hi_b] = end_hi_b as u8;
        dir
    }

    #[test]
    fn branch_resolves_both_sides() {
        let dir = two_var_dir();
        let a = find(&dir, b"/a", 2);
        assert!(a.valid());
        assert_eq!(a.offset(), Some(0));
        let b = find(&dir, b"/b", 2);
        assert!(b.valid());
        assert_eq!(b.offset(), Some(1));
        assert!(!find(&dir, b"/c", 2).valid());
    }

    #[test]
    fn ambiguous_prefix_at_branch_fails() {
        let dir = two_var_dir();
        // name ends right at the branch node: two terminals reachable ('a' and 'b').
        assert!(!find(&dir, b"/", 1).valid());
    }

    #[test]
    fn list_visits_in_directory_order() {
        let dir = two_var_dir();
        let mut names = Vec::new();
        list(&dir, &mut |name, variant| {
            names.push((name.to_vec(), variant.offset()));
        });
        assert_eq!(
            names,
            vec![(b"/a".to_vec(), Some(0)), (b"/b".to_vec(), Some(1))]
        );
    }
}
