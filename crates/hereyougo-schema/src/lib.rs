//! Schema synchronization for Here You Go.
//!
//! This crate provides:
//! - An explicit catalog of entity classes to synchronize
//! - A backend trait for live-schema introspection and DDL
//! - The MySQL backend
//! - The updater, which creates missing tables and fixes drifted columns,
//!   primary keys and indexes without dropping anything

pub mod backend;
pub mod catalog;
pub mod mysql;
pub mod updater;

pub use backend::{SchemaBackend, backend_for};
pub use catalog::EntityCatalog;
pub use mysql::{LiveIndex, MysqlBackend, normalize_type, quote_identifier};
pub use updater::{SchemaReport, SchemaUpdater};
