//! Here You Go - hand-rolled entity mapping over a single MySQL connection.
//!
//! The entity layer maps plain Rust structs to MySQL tables:
//!
//! - Declarative properties with validation and storage casting
//! - Models built once per unit of work, with relation columns derived from
//!   the related class's primary key
//! - Scoped join queries with aggregated placeholders
//! - A request cache acting as identity map, relation cache and query
//!   result cache
//! - Schema synchronization from declared models
//!
//! # Quick Start
//!
//! ```ignore
//! use hereyougo::prelude::*;
//!
//! #[derive(Default)]
//! struct User {
//!     id: String,
//!     email: String,
//!     state: EntityState,
//! }
//!
//! impl Entity for User {
//!     const CLASS: &'static str = "User";
//!
//!     fn declare() -> Declaration {
//!         Declaration::new()
//!             .property(PropertyDef::string("id", 32).primary())
//!             .property(PropertyDef::string("email", 128).unique(None))
//!             .has_many::<Trip>()
//!     }
//!
//!     // blank, read, write, state, state_mut ...
//! }
//!
//! fn example(conn: impl Connection) -> Result<()> {
//!     let mut session = Session::new(conn);
//!
//!     let user = session.get::<User>("u1")?;
//!     user.write().unwrap().email = "new@example.com".to_string();
//!     session.save(&user)?;
//!
//!     let trips = session.get_related::<User, Trip>(&user)?;
//!     Ok(())
//! }
//! ```
//!
//! # Crates
//!
//! - `hereyougo-core`: values, properties, models, the entity trait and the
//!   connection boundary
//! - `hereyougo-query`: criteria expressions and the join query compiler
//! - `hereyougo-session`: cache, context and the session
//! - `hereyougo-schema`: the schema updater and its MySQL backend

// Re-export all public types from sub-crates
pub use hereyougo_core::{
    AnyEntity,
    ColumnInfo,
    // Connection boundary
    Connection,
    Converter,
    ConverterRegistry,
    DataMapHook,
    DataType,
    DatabaseConfig,
    Declaration,
    // Entities
    Entity,
    EntityClass,
    EntityHandle,
    EntityRef,
    EntityState,
    // Errors
    Error,
    IndexDecl,
    IntSize,
    JsonConverter,
    Junction,
    KeyParts,
    // Models
    Model,
    Models,
    Params,
    PrimaryKey,
    // Properties
    Property,
    PropertyDef,
    RelationKind,
    Result,
    Row,
    Side,
    TypeKeyword,
    Value,
    downcast,
    is_identifier,
    is_placeholder,
    new_entity,
    same_entity,
};
pub use hereyougo_core::error;

pub use hereyougo_query::{BinaryOp, CompiledQuery, Expr, Join, Query};

pub use hereyougo_session::{
    Cache, Collection, Context, JoinCollection, JoinedEntities, Node, Session, Slot,
};

pub use hereyougo_schema::{
    EntityCatalog, LiveIndex, MysqlBackend, SchemaBackend, SchemaReport, SchemaUpdater,
    backend_for,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        // Entities
        Connection,
        Declaration,
        Entity,
        EntityCatalog,
        EntityClass,
        EntityRef,
        EntityState,
        Error,
        // Query building
        Expr,
        IntSize,
        JoinCollection,
        Params,
        PrimaryKey,
        PropertyDef,
        Query,
        Result,
        Row,
        SchemaUpdater,
        // Session
        Session,
        Value,
        new_entity,
    };
}
