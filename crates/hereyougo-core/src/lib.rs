//! Core types and traits for the Here You Go entity layer.
//!
//! This crate provides the foundational abstractions shared by the query
//! compiler, the session and the schema updater:
//!
//! - `Error` taxonomy with machine codes and public detail payloads
//! - `Value` / `Row` for data flowing to and from storage
//! - `Connection` trait for the single synchronous database handle
//! - `Property` descriptors, parsed or built, with storage casting
//! - `Entity` trait, `Declaration` and the memoized `Models` registry

pub mod config;
pub mod connection;
pub mod converter;
pub mod entity;
pub mod error;
pub mod model;
pub mod property;
pub mod relationship;
pub mod row;
pub mod types;
pub mod validate;
pub mod value;

pub use config::DatabaseConfig;
pub use connection::{Connection, Params};
pub use converter::{Converter, ConverterRegistry, JsonConverter};
pub use entity::{
    AnyEntity, Entity, EntityClass, EntityHandle, EntityRef, EntityState, KeyParts, PrimaryKey,
    downcast, new_entity, same_entity,
};
pub use error::{Error, Result};
pub use model::{DataMapHook, Declaration, Junction, Model, Models};
pub use property::{IndexDecl, Property, PropertyDef};
pub use relationship::{RelationKind, Side};
pub use row::{ColumnInfo, Row};
pub use types::{DataType, IntSize, TypeKeyword};
pub use validate::{is_identifier, is_placeholder};
pub use value::Value;
