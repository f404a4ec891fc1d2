//! # table-backup
//!
//! Checkpointed, paginated export of a wide-column table into an append-only
//! blob. A run pages through the table one activity at a time, appends every
//! page to a single destination, and can be replayed from recorded history
//! after a crash without re-exporting completed pages.
//!
//! This crate follows the **Hexagonal Architecture** (Ports and Adapters):
//! `domain` and `application` never touch a filesystem or a table store
//! directly, only the traits in `ports`.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod ports;
