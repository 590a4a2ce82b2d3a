//! Scoped join query compiler for the Here You Go entity layer.
//!
//! `hereyougo-query` turns structured criteria into SQL for one entity class
//! or a tree of joined classes:
//!
//! - **Expressions**: `Expr` references properties by name; scoping is a tree
//!   transform, literals are always bound.
//! - **Join trees**: every `Query` node gets its own alias, placeholders are
//!   namespaced per node and fetched rows are split back per node.
//! - **Result caching**: `Query::cache_key` fingerprints the whole tree.
//!
//! Queries are built fresh for each fetch and executed by the session crate.

pub mod expr;
pub mod query;

pub use expr::{BinaryOp, Expr};
pub use query::{CompiledQuery, Join, Query};
