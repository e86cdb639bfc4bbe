//! Minidriver-style adapter presenting a cryptographic token as a virtual
//! card file system.
//!
//! The host framework thinks in files, directories, and a fixed table of
//! synchronous operations; the token thinks in objects queried by class and
//! attribute. This crate is the translation layer between the two: it
//! enumerates the token's private keys as numbered containers, derives
//! stable GUIDs for them, renders public keys into the host's binary blob
//! layouts, synthesizes the small directory tree the host expects, and
//! answers the host's property catalogue, all from live token state, with
//! no caching and no persistent state of its own.
//!
//! ```no_run
//! use cardbridge_core::host::HostDescriptor;
//! use cardbridge_core::token::{SoftConnector, SoftToken};
//! use cardbridge_core::{Operation, acquire_context, delete_context};
//!
//! let token = SoftToken::new(*b"DECC0100123456  ");
//! let connector = SoftConnector::new(token);
//! let mut descriptor = HostDescriptor::new("demo card", &[0x3b, 0x8e, 0x80, 0x01], 1);
//! let mut ctx = acquire_context(&connector, &mut descriptor, 0)?;
//!
//! let _serial = ctx
//!     .call(Operation::ReadFile { directory: None, file: "cardid", flags: 0 })?
//!     .into_data();
//! delete_context(ctx);
//! # Ok::<(), cardbridge_core::Status>(())
//! ```

#![forbid(unsafe_code)]

pub mod blob;
pub mod containers;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod props;
pub mod token;
pub mod vfs;

pub use context::{AdapterContext, acquire_context, delete_context};
pub use dispatch::{ContainerInfo, FileInfo, OpCode, Operation, OperationTable, Reply};
pub use error::Status;
pub use host::{HostBuf, HostCallbacks, HostDescriptor};
