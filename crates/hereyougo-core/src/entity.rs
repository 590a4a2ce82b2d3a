//! Entity trait and type-erased entity handles.
//!
//! An entity class is a plain struct implementing [`Entity`]: it declares its
//! storage shape once through [`Declaration`], exposes explicit per-property
//! accessors (`read`/`write`) and embeds an [`EntityState`] holding the
//! persistence flag, loaded relation keys and extension values.
//!
//! Live instances are shared as [`EntityRef<E>`] (`Arc<RwLock<E>>`) so that
//! the identity map hands the same instance to every caller. Code that works
//! across classes (cache, joins, relation resolution) uses the type-erased
//! [`EntityHandle`].

use crate::converter::Converter;
use crate::error::Result;
use crate::model::Declaration;
use crate::value::Value;
use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

/// Primary key parts by property name.
pub type KeyParts = BTreeMap<String, Value>;

/// Bookkeeping every entity carries next to its own fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityState {
    /// Whether a row exists for this entity (UPDATE instead of INSERT)
    pub persisted: bool,
    /// Primary key as stored, used to address UPDATE and DELETE
    pub primary_key: Option<KeyParts>,
    /// Related class name -> that class's primary key parts, for relations
    /// where this class stores the foreign key
    pub relation_keys: BTreeMap<String, KeyParts>,
    /// Values of extension properties, which have no struct field
    pub extension: BTreeMap<String, Value>,
}

/// A persisted record type.
pub trait Entity: Send + Sync + Sized + 'static {
    /// Class name, used in cache paths, relation declarations and errors.
    const CLASS: &'static str;

    /// Storage shape of the class.
    fn declare() -> Declaration;

    /// Allocate an instance without running constructor validation.
    fn blank() -> Self;

    /// Read a declared property, `None` when the class has no such field.
    fn read(&self, property: &str) -> Option<Value>;

    /// Assign a declared property.
    ///
    /// Returns `Ok(false)` when the class has no field with that name; the
    /// value then goes to [`EntityState::extension`].
    fn write(&mut self, property: &str, value: Value) -> Result<bool>;

    fn state(&self) -> &EntityState;

    fn state_mut(&mut self) -> &mut EntityState;

    /// Class-specific converter factory for `convert=<Name>`.
    fn converter(_name: &str) -> Option<Arc<dyn Converter>> {
        None
    }
}

/// A shared, lockable entity instance.
pub type EntityRef<E> = Arc<RwLock<E>>;

/// Type-erased shared entity instance.
pub type EntityHandle = Arc<dyn AnyEntity>;

/// Wrap an entity into a shared reference.
pub fn new_entity<E: Entity>(entity: E) -> EntityRef<E> {
    Arc::new(RwLock::new(entity))
}

/// Object-safe view of an [`EntityRef`].
pub trait AnyEntity: Any + Send + Sync {
    fn class(&self) -> EntityClass;

    /// Current value of a property, extension values included; NULL when unset.
    fn value(&self, property: &str) -> Value;

    fn set_value(&self, property: &str, value: Value) -> Result<()>;

    /// Snapshot of the entity state.
    fn state(&self) -> EntityState;

    fn update_state(&self, update: &mut dyn FnMut(&mut EntityState));

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<E: Entity> AnyEntity for RwLock<E> {
    fn class(&self) -> EntityClass {
        EntityClass::of::<E>()
    }

    fn value(&self, property: &str) -> Value {
        let entity = self.read().unwrap_or_else(|e| e.into_inner());
        entity
            .read(property)
            .or_else(|| entity.state().extension.get(property).cloned())
            .unwrap_or(Value::Null)
    }

    fn set_value(&self, property: &str, value: Value) -> Result<()> {
        let mut entity = self.write().unwrap_or_else(|e| e.into_inner());
        if !entity.write(property, value.clone())? {
            entity
                .state_mut()
                .extension
                .insert(property.to_string(), value);
        }
        Ok(())
    }

    fn state(&self) -> EntityState {
        let entity = self.read().unwrap_or_else(|e| e.into_inner());
        entity.state().clone()
    }

    fn update_state(&self, update: &mut dyn FnMut(&mut EntityState)) {
        let mut entity = self.write().unwrap_or_else(|e| e.into_inner());
        update(entity.state_mut());
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Recover the typed reference behind a handle.
pub fn downcast<E: Entity>(handle: EntityHandle) -> Option<EntityRef<E>> {
    handle.into_any().downcast::<RwLock<E>>().ok()
}

/// Whether two handles point at the same instance.
pub fn same_entity(a: &EntityHandle, b: &EntityHandle) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Runtime descriptor of an entity class.
#[derive(Clone, Copy)]
pub struct EntityClass {
    name: &'static str,
    type_id: TypeId,
    declare: fn() -> Declaration,
    converter: fn(&str) -> Option<Arc<dyn Converter>>,
    blank: fn() -> EntityHandle,
}

fn blank_handle<E: Entity>() -> EntityHandle {
    new_entity(E::blank())
}

impl EntityClass {
    pub fn of<E: Entity>() -> Self {
        Self {
            name: E::CLASS,
            type_id: TypeId::of::<E>(),
            declare: E::declare,
            converter: E::converter,
            blank: blank_handle::<E>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn declare(&self) -> Declaration {
        (self.declare)()
    }

    pub fn converter(&self, name: &str) -> Option<Arc<dyn Converter>> {
        (self.converter)(name)
    }

    /// A fresh, unpersisted instance.
    pub fn blank(&self) -> EntityHandle {
        (self.blank)()
    }

    pub fn is<E: Entity>(&self) -> bool {
        self.type_id == TypeId::of::<E>()
    }
}

impl PartialEq for EntityClass {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for EntityClass {}

impl Hash for EntityClass {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for EntityClass {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EntityClass {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(other.name)
    }
}

impl fmt::Debug for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityClass({})", self.name)
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A primary key as given by a caller, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimaryKey {
    /// Single value, for classes with exactly one primary key property
    Scalar(Value),
    /// Property name -> value
    Parts(KeyParts),
}

impl From<Value> for PrimaryKey {
    fn from(value: Value) -> Self {
        PrimaryKey::Scalar(value)
    }
}

impl From<&str> for PrimaryKey {
    fn from(value: &str) -> Self {
        PrimaryKey::Scalar(Value::from(value))
    }
}

impl From<String> for PrimaryKey {
    fn from(value: String) -> Self {
        PrimaryKey::Scalar(Value::from(value))
    }
}

impl From<i64> for PrimaryKey {
    fn from(value: i64) -> Self {
        PrimaryKey::Scalar(Value::Int(value))
    }
}

impl From<i32> for PrimaryKey {
    fn from(value: i32) -> Self {
        PrimaryKey::Scalar(Value::from(value))
    }
}

impl From<KeyParts> for PrimaryKey {
    fn from(parts: KeyParts) -> Self {
        PrimaryKey::Parts(parts)
    }
}

impl From<Vec<(&str, Value)>> for PrimaryKey {
    fn from(parts: Vec<(&str, Value)>) -> Self {
        PrimaryKey::Parts(
            parts
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        )
    }
}

impl<const N: usize> From<[(&str, Value); N]> for PrimaryKey {
    fn from(parts: [(&str, Value); N]) -> Self {
        PrimaryKey::from(Vec::from(parts))
    }
}
