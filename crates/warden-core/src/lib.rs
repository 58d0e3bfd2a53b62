//! Shared value types and collaborator traits for the warden ABAC engine.
//!
//! This crate carries only data and interfaces: the attribute model
//! (`Attribute`, `AttributeType`, `ScopedAttribute`), the four-way
//! `Effect`, typed identifiers, and the store/zone-resolver traits the
//! engine consumes. All evaluation behavior lives in `warden-engine`.

pub mod error;
pub mod traits;
pub mod types;

pub use error::*;
pub use traits::*;
pub use types::*;
