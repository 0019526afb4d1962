//! A typed, debuggable embedded data store: a directory-addressed buffer,
//! an application-layer debug protocol riding on a layered byte-oriented
//! transport stack, and a Hello/Welcome/Update/Bye synchronizer for
//! keeping replicas consistent across a channel.

/// Variable-length quantity encoding used by the directory and the
/// compressor's length prefix.
pub mod vlq;

/// Type tags and the type-erased slot handle.
pub mod types;

/// The compact trie encoding a store's name-to-slot mapping.
pub mod directory;

/// The buffer, directory, function dispatch, and change hooks.
pub mod store;

/// Shared error type for store, protocol, and synchronizer operations.
pub mod error;

/// The layered transport: ARQ, CRC16, segmentation, ASCII escaping,
/// terminal framing, and stream compression.
pub mod protocol;

/// The application-layer command processor (Embedded Debugger).
pub mod debugger;

/// Hello/Welcome/Update/Bye store replication.
pub mod sync;

pub use self::debugger::Debugger;
pub use self::error::Error;
pub use self::store::{Capabilities, Config, Store};
pub use self::sync::{Schema, Synchronizer};
pub use self::types::{DebugVariant, Type};
