//! Replication core for an offline-first journaling service.
//!
//! User-facing writes resolve against the local [`store::NoteStore`]; a
//! background [`worker`] and an [`immediate`] fast path asynchronously ship
//! changes to a per-user remote object store reached through the
//! [`capability::RemoteCapability`] boundary. [`core::Core`] is the
//! bootstrapper-constructed facade that wires all of this together and is
//! the crate's intended entry point for embedders.

pub mod capability;
pub mod clock;
pub mod config;
pub mod core;
pub mod credential;
pub mod error;
pub mod immediate;
pub mod importer;
pub mod model;
pub mod remote_naming;
pub mod store;
pub mod sync_batch;
pub mod worker;

#[cfg(feature = "http-capability")]
pub mod default_capability;
#[cfg(feature = "http-capability")]
pub mod default_refresher;

pub use capability::{RemoteCapability, RemoteCapabilityFactory};
pub use core::Core;
pub use credential::{Credential, CredentialProvider, TokenRefresher};
pub use error::CoreError;
pub use model::{Context, Note, SyncStatus};
