//! Bootstrapper - one-shot, retry-until-success creation of bundled resources
//! in a logical-cluster control plane
//!
//! The API server's schema may not be registered yet when the process
//! starts, and writes can fail transiently while it converges. Every stage
//! therefore retries its whole resource set until it succeeds, fails for a
//! reason that will not heal, or the process is asked to stop.
//!
//! # Modules
//!
//! - [`resources`] - Embedded resource sets and their validation
//! - [`apply`] - Ensure-presence applier and the remote API it drives
//! - [`scope`] - Logical scopes, connection descriptors and scoped clients
//! - [`orchestrator`] - Fixed stage sequence and failure policy

#![deny(missing_docs)]

pub mod apply;
pub mod orchestrator;
pub mod resources;
pub mod scope;

#[cfg(test)]
mod testing;

pub use bootstrapper_common::{Error, Result};
