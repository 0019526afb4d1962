//! Type tags and the type-erased [`DebugVariant`] handle to a slot.

use num_enum::TryFromPrimitive;

/// Upper bit of a directory type byte marks a function slot rather than a
/// variable.
pub const FUNCTION_FLAG: u8 = 0x80;

/// The lower-bits type tag. Fixed-size numeric/bool/pointer types have a
/// size known at compile time; `Blob`/`String` carry an explicit runtime
/// length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum Type {
    Int8 = 0,
    Int16 = 1,
    Int32 = 2,
    Int64 = 3,
    Uint8 = 4,
    Uint16 = 5,
    Uint32 = 6,
    Uint64 = 7,
    Float = 8,
    Double = 9,
    Bool = 10,
    Pointer32 = 11,
    Pointer64 = 12,
    Blob = 13,
    String = 14,
    Invalid = 15,
}

impl Type {
    /// Fixed wire size in bytes, or `None` for variable-length types.
    #[must_use]
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Type::Int8 | Type::Uint8 | Type::Bool => Some(1),
            Type::Int16 | Type::Uint16 => Some(2),
            Type::Int32 | Type::Uint32 | Type::Float | Type::Pointer32 => Some(4),
            Type::Int64 | Type::Uint64 | Type::Double | Type::Pointer64 => Some(8),
            Type::Blob | Type::String | Type::Invalid => None,
        }
    }

    /// Whether this type's storage size can vary between slots.
    #[must_use]
    pub fn is_variable_length(self) -> bool {
        matches!(self, Type::Blob | Type::String)
    }

    /// Decode a directory type byte, stripping and reporting the function flag.
    #[must_use]
    pub fn from_tag_byte(tag: u8) -> Option<(Self, bool)> {
        let is_function = tag & FUNCTION_FLAG != 0;
        let ty = Self::try_from_primitive(tag & !FUNCTION_FLAG).ok()?;
        Some((ty, is_function))
    }

    /// Encode this type plus a function flag into a directory type byte.
    #[must_use]
    pub fn to_tag_byte(self, is_function: bool) -> u8 {
        (self as u8) | if is_function { FUNCTION_FLAG } else { 0 }
    }
}

/// Whether a slot is backed by a byte range in the store buffer, or
/// dispatched to a function callback by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Var,
    Func,
}

/// A type-erased, non-owning handle to a slot inside a [`crate::store::Store`].
///
/// Invariant: `ty` and `len` never change after construction. `valid()`
/// reports whether this handle came from a successful directory lookup.
#[derive(Debug, Clone, Copy)]
pub struct DebugVariant {
    ty: Type,
    kind: Kind,
    /// Byte offset into the store buffer (`Kind::Var`) or function index
    /// (`Kind::Func`).
    offset_or_fidx: u32,
    len: usize,
}

impl DebugVariant {
    /// The invalid variant returned by failed lookups.
    pub const INVALID: Self = Self {
        ty: Type::Invalid,
        kind: Kind::Var,
        offset_or_fidx: 0,
        len: 0,
    };

    #[must_use]
    pub fn new_var(ty: Type, offset: u32, len: usize) -> Self {
        Self {
            ty,
            kind: Kind::Var,
            offset_or_fidx: offset,
            len,
        }
    }

    #[must_use]
    pub fn new_func(ty: Type, fidx: u32, len: usize) -> Self {
        Self {
            ty,
            kind: Kind::Func,
            offset_or_fidx: fidx,
            len,
        }
    }

    #[must_use]
    pub fn valid(&self) -> bool {
        self.ty != Type::Invalid
    }

    #[must_use]
    pub fn ty(&self) -> Type {
        self.ty
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte offset into the store buffer. Only meaningful for `Kind::Var`.
    #[must_use]
    pub fn offset(&self) -> Option<u32> {
        matches!(self.kind, Kind::Var).then_some(self.offset_or_fidx)
    }

    /// Function table index. Only meaningful for `Kind::Func`.
    #[must_use]
    pub fn fidx(&self) -> Option<u32> {
        matches!(self.kind, Kind::Func).then_some(self.offset_or_fidx)
    }
}
