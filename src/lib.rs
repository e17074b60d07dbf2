//! Multi-tenant artifact repository: typed, versioned artifacts with
//! blob payloads, a lifecycle/visibility state machine, and a
//! filterable catalog. Module layout mirrors a typical service crate: one
//! top-level module per component, re-exported from here the same way
//! a database crate's `lib.rs` re-exports its subsystems.

pub mod blob;
pub mod config;
pub mod error;
pub mod http;
pub mod identity;
pub mod lifecycle;
pub mod notify;
pub mod patch;
pub mod query;
pub mod store;
pub mod types;
pub mod validators;
pub mod value;

pub use error::{ApiError, ApiResult};
pub use http::{build_router, AppState};
pub use lifecycle::LifecycleEngine;
