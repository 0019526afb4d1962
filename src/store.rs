//! The store: a buffer, a directory, function dispatch, and change hooks.
//!
//! A [`Store`] owns its buffer exclusively; [`DebugVariant`] handles
//! obtained from [`Store::find`] are non-owning views into it. All
//! configuration (table capacities, budgets) is passed in once at
//! construction via [`Config`] — there is no process-wide default.

use bitflags::bitflags;

use crate::directory;
use crate::error::Error;
use crate::types::{DebugVariant, Kind, Type};

bitflags! {
    /// Which store operations a particular embedding permits. Mirrors the
    /// capability set a generated store is parameterized over in the
    /// source design; here it's a runtime set rather than a type parameter
    /// so one `Store` type serves every configuration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u8 {
        const READ = 0b0001;
        const WRITE = 0b0010;
        const FUNCTION_CALL = 0b0100;
        const HOOK_CHANGE = 0b1000;
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::all()
    }
}

/// Construction-time limits and feature toggles, passed by value rather
/// than read from a global.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub alias_capacity: usize,
    pub macro_byte_budget: usize,
    pub macro_max_depth: usize,
    pub stream_buffer_capacity: usize,
    pub mtu: usize,
    pub arq_max_retransmits: u8,
    pub crc_enabled: bool,
    pub compression_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            alias_capacity: 0x5f,
            macro_byte_budget: 256,
            macro_max_depth: 8,
            stream_buffer_capacity: 256,
            mtu: 64,
            arq_max_retransmits: 5,
            crc_enabled: true,
            compression_enabled: false,
        }
    }
}

/// Hooks fired around reads (`_ro`) and writes (`_x`), all default no-op.
/// A store dispatches through this trait object instead of through
/// inheritance (the redesign flagged for the CRTP store base).
pub trait Hooks {
    fn entry_ro(&mut self, _ty: Type, _offset: u32, _len: usize) {}
    fn exit_ro(&mut self, _ty: Type, _offset: u32, _len: usize) {}
    fn entry_x(&mut self, _ty: Type, _offset: u32, _len: usize) {}
    /// `changed` reports whether the post-image differs from the pre-image.
    fn exit_x(&mut self, _ty: Type, _offset: u32, _len: usize, _changed: bool) {}
}

/// The default, all-no-op hook set.
#[derive(Debug, Default)]
pub struct NullHooks;

impl Hooks for NullHooks {}

/// A function slot's callback: given whether this is a set (`true`) or get
/// (`false`), and the slot's fixed-size in/out buffer, returns the number
/// of bytes touched.
pub type FunctionCallback<'a> = dyn FnMut(bool, &mut [u8]) -> usize + 'a;

/// A typed, debuggable buffer plus directory plus function table.
pub struct Store<'dir, 'func> {
    buffer: Vec<u8>,
    directory: &'dir [u8],
    functions: Vec<Box<FunctionCallback<'func>>>,
    capabilities: Capabilities,
    hooks: Box<dyn Hooks + 'func>,
    config: Config,
}

impl<'dir, 'func> Store<'dir, 'func> {
    #[must_use]
    pub fn new(buffer_size: usize, directory: &'dir [u8], config: Config) -> Self {
        Self {
            buffer: vec![0u8; buffer_size],
            directory,
            functions: Vec::new(),
            capabilities: Capabilities::default(),
            hooks: Box::new(NullHooks),
            config,
        }
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn set_hooks(&mut self, hooks: Box<dyn Hooks + 'func>) {
        self.hooks = hooks;
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Register a function callback, returning its function index.
    pub fn register_function(&mut self, f: Box<FunctionCallback<'func>>) -> u32 {
        self.functions.push(f);
        (self.functions.len() - 1) as u32
    }

    #[must_use]
    pub fn directory(&self) -> &'dir [u8] {
        self.directory
    }

    #[must_use]
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Look up an object by (possibly abbreviated) name.
    #[must_use]
    pub fn find(&self, name: &[u8]) -> DebugVariant {
        directory::find(self.directory, name, name.len())
    }

    /// Pre-order traversal of every object's full name.
    pub fn list(&self, cb: &mut dyn FnMut(&[u8], DebugVariant)) {
        directory::list(self.directory, cb);
    }

    /// The byte offset of a variable inside the buffer, or `None` if the
    /// offset falls outside it. Used as a stable cross-replica identifier.
    #[must_use]
    pub fn buffer_to_key(&self, offset: u32) -> Option<u32> {
        (offset as usize <= self.buffer.len()).then_some(offset)
    }

    fn require(&self, cap: Capabilities) -> Result<(), Error> {
        self.capabilities
            .contains(cap)
            .then_some(())
            .ok_or(Error::Bounds)
    }

    /// Copy a variable's or function's current value into `dst`.
    ///
    /// `dst` must be exactly `slot.len()` bytes.
    pub fn get(&mut self, slot: &DebugVariant, dst: &mut [u8]) -> Result<usize, Error> {
        self.require(Capabilities::READ)?;
        if dst.len() != slot.len() {
            return Err(Error::TypeMismatch);
        }
        match slot.kind() {
            Kind::Var => {
                let offset = slot.offset().ok_or(Error::Bounds)? as usize;
                let src = self
                    .buffer
                    .get(offset..offset + slot.len())
                    .ok_or(Error::Bounds)?;
                self.hooks.entry_ro(slot.ty(), offset as u32, slot.len());
                dst.copy_from_slice(src);
                self.hooks.exit_ro(slot.ty(), offset as u32, slot.len());
                Ok(dst.len())
            }
            Kind::Func => {
                self.require(Capabilities::FUNCTION_CALL)?;
                let fidx = slot.fidx().ok_or(Error::Bounds)?;
                self.call_function(fidx, false, dst)
            }
        }
    }

    /// Overwrite a variable's value, or invoke a function's setter, from `src`.
    ///
    /// `src` must be exactly `slot.len()` bytes.
    pub fn set(&mut self, slot: &DebugVariant, src: &[u8]) -> Result<usize, Error> {
        self.require(Capabilities::WRITE)?;
        if src.len() != slot.len() {
            return Err(Error::TypeMismatch);
        }
        match slot.kind() {
            Kind::Var => {
                let offset = slot.offset().ok_or(Error::Bounds)? as usize;
                let len = slot.len();
                if offset + len > self.buffer.len() {
                    return Err(Error::Bounds);
                }
                let hooked = self.capabilities.contains(Capabilities::HOOK_CHANGE);
                if hooked {
                    self.hooks.entry_x(slot.ty(), offset as u32, len);
                }
                let changed = self.buffer[offset..offset + len] != *src;
                self.buffer[offset..offset + len].copy_from_slice(src);
                if hooked {
                    self.hooks.exit_x(slot.ty(), offset as u32, len, changed);
                }
                Ok(len)
            }
            Kind::Func => {
                self.require(Capabilities::FUNCTION_CALL)?;
                let fidx = slot.fidx().ok_or(Error::Bounds)?;
                let mut buf = src.to_vec();
                self.call_function(fidx, true, &mut buf)
            }
        }
    }

    /// Read raw bytes from the buffer at an arbitrary offset, bypassing
    /// the directory and any type interpretation. Used by the debugger's
    /// `R` command.
    pub fn read_memory(&mut self, offset: u32, len: usize) -> Result<&[u8], Error> {
        self.require(Capabilities::READ)?;
        let offset = offset as usize;
        self.buffer.get(offset..offset + len).ok_or(Error::Bounds)
    }

    /// Overwrite raw bytes in the buffer at an arbitrary offset, bypassing
    /// the directory. Used by the debugger's `W` command.
    pub fn write_memory(&mut self, offset: u32, src: &[u8]) -> Result<(), Error> {
        self.require(Capabilities::WRITE)?;
        let offset = offset as usize;
        let dst = self
            .buffer
            .get_mut(offset..offset + src.len())
            .ok_or(Error::Bounds)?;
        dst.copy_from_slice(src);
        Ok(())
    }

    /// Dispatch to a registered function by index.
    pub fn call_function(
        &mut self,
        fidx: u32,
        is_set: bool,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        self.require(Capabilities::FUNCTION_CALL)?;
        let f = self
            .functions
            .get_mut(fidx as usize)
            .ok_or(Error::NotFound)?;
        Ok(f(is_set, buf))
    }
}
