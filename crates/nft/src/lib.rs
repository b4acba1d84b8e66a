#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`expr`]: Expression model (`Expression`, `Register`, `MetaKey`, `PayloadBase`, `CmpOp`)
//! - [`rule`]: Tables, chains and rules (`Table`, `Chain`, `Hook`, `Rule`)
//! - [`compiler`]: `CounterSpec` → `Rule`
//! - [`decoder`]: `Rule` → `CounterSpec`
//! - [`transport`]: Kernel seam (`Transport` trait, `Batch`)
//! - [`netlink`]: `NetlinkTransport` (Linux)
//! - [`memory`]: `MemoryTransport`
//! - [`reconciler`]: Setup / ListCounters / Cleanup (`Reconciler`)
//! - [`error`]: `TransportError`, `DecodeError`, `ReconcileError`
//!
//! # Data flow
//!
//! ```text
//! CounterSet --compile--> Rule* --Batch--> Transport.commit()
//!                                             |
//! CounterSet <--decode--- Rule* <--reset_rules-+
//! ```

pub mod compiler;
pub mod decoder;
pub mod error;
pub mod expr;
pub mod memory;
pub mod netlink;
pub mod reconciler;
pub mod rule;
pub mod transport;

// Reconciler
pub use reconciler::{Reconciler, ReconcilerConfig};

// Compile / decode
pub use compiler::{compile, compile_set};
pub use decoder::decode;

// Errors
pub use error::{DecodeError, ReconcileError, TransportError};

// Model
pub use expr::{CmpOp, Expression, MetaKey, PayloadBase, Register};
pub use rule::{Chain, ChainHook, Hook, Rule, Table};

// Transports
pub use memory::{Fault, MemoryTransport, Packet};
#[cfg(target_os = "linux")]
pub use netlink::NetlinkTransport;
pub use transport::{Batch, BatchOp, Transport};
