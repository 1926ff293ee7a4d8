//! rusty-forum/crates/rf-core/src/lib.rs
//!
//! The central domain logic and interface definitions for Rusty-Forum.

pub mod error;
pub mod models;
pub mod roles;
pub mod service;
pub mod traits;

// Re-exporting for easier access in other crates
pub use error::*;
pub use models::*;
pub use roles::*;
pub use service::ForumService;
pub use traits::*;
