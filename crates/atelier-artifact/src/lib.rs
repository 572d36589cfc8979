//! Atelier Artifact System
//!
//! Immutable, versioned artifacts plus the durable per-run workspace:
//! an append-only event log and a snapshot index of every artifact a
//! run produced.
//!
//! # Core Concepts
//!
//! - [`Artifact`]: versioned unit of produced content; a new version is
//!   a new record, never an in-place mutation
//! - [`ArtifactKind`]: open string vocabulary (`prd`, `persona`, ...)
//! - [`WorkspaceEvent`]: one append-only log line per state transition
//! - [`WorkspaceStore`]: per-run on-disk layout (artifact snapshots,
//!   `index.json`, `events.jsonl`)

#![warn(unreachable_pub)]

mod artifact;
mod error;
mod event;
mod store;

pub use artifact::{Artifact, ArtifactId, ArtifactKind, ArtifactSummary};
pub use error::StoreError;
pub use event::{EventId, EventKind, RunId, WorkspaceEvent};
pub use store::{WorkspaceHandle, WorkspaceStore};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
