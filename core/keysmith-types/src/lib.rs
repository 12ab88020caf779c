//! Core type definitions for keysmith.
//!
//! This crate defines the identifiers shared by the licensing crates:
//! - Activation code, code batch and audit log identifiers (UUID v7,
//!   time-ordered)
//! - Product, product version and user identifiers (opaque UUIDs owned by
//!   the surrounding platform)
//!
//! Domain types (activation codes, license files, validation results) live
//! in their respective crates, not here.

mod ids;

pub use ids::{BatchId, CodeId, LogId, ProductId, ProductVersionId, UserId};

