//! Read-only Azure facts modules
//!
//! A single fact-module template driven by a declarative catalog of
//! resource descriptors.

pub mod azure;
pub mod config;
pub mod facts;
pub mod resource;

/// Version injected at compile time via AZFACTS_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("AZFACTS_VERSION") {
    Some(v) => v,
    None => "dev",
};
