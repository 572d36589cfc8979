//! Atelier Subagent Registry
//!
//! Subagents are pluggable capabilities: each declares what artifact
//! kind it produces and what kinds it consumes, and may pause mid-run
//! to wait for human approval.
//!
//! Manifests are data; lifecycles are executable instances resolved
//! through a statically-typed registration table, loaded lazily and
//! cached for the process lifetime. Concurrent requests for the same
//! subagent share one in-flight load.

#![warn(unreachable_pub)]

mod error;
mod lifecycle;
mod manifest;
mod registry;

pub use error::RegistryError;
pub use lifecycle::{
    ProgressEmitter, SubagentError, SubagentOutcome, SubagentRequest, SubagentLifecycle,
};
pub use manifest::SubagentManifest;
pub use registry::{LifecycleFactory, SubagentRegistry};
