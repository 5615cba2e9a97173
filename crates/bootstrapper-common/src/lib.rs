//! Shared building blocks for the bootstrapper: errors, retry, YAML, telemetry

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Logical scope every control plane has
pub const ROOT_SCOPE: &str = "root";

/// URL path prefix that selects a logical scope on the API server
pub const SCOPE_PATH_PREFIX: &str = "/clusters/";
