//! Resource abstraction layer
//!
//! Fact modules are data: every supported resource kind is a descriptor in
//! the JSON catalog under `src/resources/`, compiled into the binary. Adding a
//! resource kind is a catalog change, not a code change.
//!
//! # Architecture
//!
//! - [`registry`] - Loads and validates descriptors from embedded JSON
//! - [`dispatch`] - Maps a descriptor lookup to a concrete REST request
//! - [`fetcher`] - Normalizes responses into the lookup's shape
//!
//! # Example
//!
//! ```ignore
//! use azfacts::resource::{get_registry, dispatch};
//!
//! let catalog = get_registry()?;
//! let lb = catalog.get("load_balancer").unwrap();
//! let request = dispatch::prepare(&client, catalog, lb, &lb.lookups[0], &invocation)?;
//! ```

pub mod dispatch;
pub mod fetcher;
mod registry;

pub use registry::*;
