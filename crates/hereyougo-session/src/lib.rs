//! Request-scoped session for Here You Go.
//!
//! `hereyougo-session` is the **unit-of-work layer**. A [`Session`] owns one
//! database connection and one [`Context`] (model registry plus cache) and
//! runs every entity operation through them.
//!
//! # Role In The Architecture
//!
//! - **Identity map**: one live instance per `(class, primary key)`; every
//!   fetch path returns that instance.
//! - **Relation cache**: related pairs are recorded in both directions and
//!   answered from memory once a direction is completely loaded.
//! - **Collection cache**: query results are kept as references, so evicting
//!   an entity also removes it from every cached result.
//!
//! # Design Philosophy
//!
//! - **Explicit over implicit**: nothing is written until `save`/`delete`;
//!   relation keys set on the owning side are consumed by the next `save`.
//! - **Request scope**: nothing is global; dropping the session drops its
//!   cache.
//! - **Type erasure**: cache and join results hold [`EntityHandle`]s, typed
//!   accessors downcast back to [`EntityRef<E>`].
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::new(connection);
//!
//! let user = session.get::<User>("u1")?;
//! let trip = new_entity(Trip::new("Lisbon"));
//! session.save(&trip)?;
//! session.set_related(&user, &trip)?;
//!
//! // Same instance, no second round trip
//! let again = session.get::<User>("u1")?;
//! assert!(Arc::ptr_eq(&user, &again));
//! ```

pub mod cache;
pub mod context;
pub mod joined;
mod relation;

pub use cache::{Cache, Collection, Node, Slot};
pub use context::Context;
pub use joined::{JoinCollection, JoinedEntities};

use hereyougo_core::error::BadTypeError;
use hereyougo_core::{
    Connection, Entity, EntityClass, EntityHandle, EntityRef, Error, KeyParts, Model, Models,
    Params, PrimaryKey, Property, Result, Row, Value, downcast,
};
use hereyougo_query::{Expr, Query};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Per-node entities of one fetched row.
type LoadedRow = Vec<Option<EntityHandle>>;

// ============================================================================
// Session
// ============================================================================

/// Connection plus request-scoped context.
pub struct Session<C: Connection> {
    connection: C,
    context: Context,
}

impl<C: Connection> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("connection", &self.connection.id())
            .field("driver", &self.connection.driver())
            .field("context", &self.context)
            .finish()
    }
}

impl<C: Connection> Session<C> {
    pub fn new(connection: C) -> Self {
        Self::with_context(connection, Context::new())
    }

    pub fn with_context(connection: C, context: Context) -> Self {
        Self {
            connection,
            context,
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Model registry, for converters and extension hooks.
    pub fn models_mut(&mut self) -> &mut Models {
        &mut self.context.models
    }

    pub fn cache(&self) -> &Cache {
        &self.context.cache
    }

    /// Forget every cached entity, relation and collection.
    pub fn reset(&mut self) {
        self.context.reset();
    }

    pub fn into_parts(self) -> (C, Context) {
        (self.connection, self.context)
    }

    // ------------------------------------------------------------------------
    // Models and keys
    // ------------------------------------------------------------------------

    pub fn model<E: Entity>(&mut self) -> Result<Arc<Model>> {
        self.context.models.model_of::<E>()
    }

    pub fn model_of(&mut self, class: EntityClass) -> Result<Arc<Model>> {
        self.context.models.model(class)
    }

    /// Normalize a caller-supplied primary key into sorted, typed parts.
    ///
    /// A scalar is accepted only for single-column keys; missing or unknown
    /// parts are rejected.
    pub fn check_primary_key<E: Entity>(&mut self, key: impl Into<PrimaryKey>) -> Result<KeyParts> {
        let model = self.model::<E>()?;
        normalize_key(&model, key.into())
    }

    /// Deterministic cache key of a primary key.
    pub fn build_cache_key<E: Entity>(&mut self, key: impl Into<PrimaryKey>) -> Result<String> {
        let model = self.model::<E>()?;
        let parts = normalize_key(&model, key.into())?;
        cache_key(&model, &parts)
    }

    // ------------------------------------------------------------------------
    // Fetching
    // ------------------------------------------------------------------------

    /// Build a query over `E`.
    pub fn query<E: Entity>(&mut self, criteria: Option<Expr>, placeholders: Params) -> Result<Query> {
        let model = self.model::<E>()?;
        Query::new(model, criteria, placeholders)
    }

    /// Every `E` matching `criteria`.
    #[tracing::instrument(level = "debug", skip(self, criteria, placeholders), fields(class = E::CLASS))]
    pub fn all<E: Entity>(
        &mut self,
        criteria: Option<Expr>,
        placeholders: Params,
    ) -> Result<Vec<EntityRef<E>>> {
        let query = self.query::<E>(criteria, placeholders)?;
        self.fetch(&query)
    }

    /// Distinct root entities of a query, in first-seen order.
    pub fn fetch<E: Entity>(&mut self, query: &Query) -> Result<Vec<EntityRef<E>>> {
        let rows = self.load(query)?;
        let mut seen = HashSet::new();
        rows.into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .filter(|entity| seen.insert(Arc::as_ptr(entity).cast::<()>()))
            .map(typed::<E>)
            .collect()
    }

    /// Root entities of a join query with their joined entities nested per
    /// join name.
    pub fn fetch_joined(&mut self, query: &Query) -> Result<JoinCollection> {
        let rows = self.load(query)?;
        let rows: Vec<&[Option<EntityHandle>]> = rows.iter().map(Vec::as_slice).collect();
        Ok(JoinCollection::group(query, 0, &rows))
    }

    /// Look up an entity by primary key, cache first.
    ///
    /// With `fatal`, a missing row is [`Error::NotFound`]; otherwise `None`.
    pub fn from_primary_key<E: Entity>(
        &mut self,
        key: impl Into<PrimaryKey>,
        fatal: bool,
    ) -> Result<Option<EntityRef<E>>> {
        self.from_primary_key_dyn(EntityClass::of::<E>(), key.into(), fatal)?
            .map(typed::<E>)
            .transpose()
    }

    /// Fetch an entity that must exist.
    pub fn get<E: Entity>(&mut self, key: impl Into<PrimaryKey>) -> Result<EntityRef<E>> {
        let class = EntityClass::of::<E>();
        let key = key.into();
        let selector = format!("{:?}", key);
        self.from_primary_key_dyn(class, key, true)?
            .map(typed::<E>)
            .transpose()?
            .ok_or_else(|| Error::not_found(class.name(), serde_json::Value::String(selector)))
    }

    #[tracing::instrument(level = "debug", skip(self, class, key), fields(class = class.name()))]
    pub fn from_primary_key_dyn(
        &mut self,
        class: EntityClass,
        key: PrimaryKey,
        fatal: bool,
    ) -> Result<Option<EntityHandle>> {
        let model = self.model_of(class)?;
        let parts = normalize_key(&model, key)?;
        let key = cache_key(&model, &parts)?;
        if let Some(entity) = self.context.cache.get_entity(class.name(), &key) {
            tracing::trace!(key = %key, "Identity map hit");
            return Ok(Some(entity));
        }

        let pairs = key_pairs(&model, &parts)?;
        let query = Query::new(Arc::clone(&model), Expr::all_equal(pairs), Params::new())?;
        let compiled = query.compile()?;
        let rows = self.run_query(&compiled.to_sql(), &compiled.params)?;

        match rows.as_slice() {
            [] if fatal => Err(Error::not_found(class.name(), selector(&parts))),
            [] => Ok(None),
            [row] => match query.categorize(row).into_iter().next().flatten() {
                Some(slice) => self.hydrate(class, &slice).map(|(entity, _)| Some(entity)),
                None => Ok(None),
            },
            _ => Err(Error::broken(
                class.name(),
                format!("more than one entity matches primary key {}", selector(&parts)),
            )),
        }
    }

    /// Materialize a row keyed by column names, through the identity map.
    pub fn from_data<E: Entity>(&mut self, row: &Row) -> Result<EntityRef<E>> {
        let entity = self.from_data_dyn(EntityClass::of::<E>(), row)?;
        typed::<E>(entity)
    }

    /// Materialize a row as `class`.
    ///
    /// An instance already in the identity map is reused; only its
    /// non-primary properties are reapplied.
    pub fn from_data_dyn(&mut self, class: EntityClass, row: &Row) -> Result<EntityHandle> {
        self.hydrate(class, row).map(|(entity, _)| entity)
    }

    fn hydrate(&mut self, class: EntityClass, row: &Row) -> Result<(EntityHandle, String)> {
        let model = self.model_of(class)?;

        let mut given = KeyParts::new();
        for property in model.primary_keys() {
            let raw = row.get_by_name(property.column()).ok_or_else(|| {
                Error::broken(
                    class.name(),
                    format!("row has no {} column", property.column()),
                )
            })?;
            given.insert(property.name().to_string(), property.cast_from_storage(raw)?);
        }
        let parts = normalize_key(&model, PrimaryKey::Parts(given))?;
        let key = cache_key(&model, &parts)?;

        let cached = self.context.cache.get_entity(class.name(), &key);
        let existing = cached.is_some();
        let entity = cached.unwrap_or_else(|| class.blank());

        let mut values = Vec::new();
        for property in model.data_map(false) {
            if existing && property.primary() {
                continue;
            }
            if let Some(raw) = row.get_by_name(property.column()) {
                values.push((property.name(), property.cast_from_storage(raw)?));
            }
        }
        let relation_keys = stored_relation_keys(&model, row)?;

        for (name, value) in values {
            entity.set_value(name, value)?;
        }
        entity.update_state(&mut |state| {
            state.persisted = true;
            state.primary_key = Some(parts.clone());
            for (other, keys) in &relation_keys {
                match keys {
                    Some(keys) => {
                        state.relation_keys.insert(other.clone(), keys.clone());
                    }
                    None => {
                        state.relation_keys.remove(other);
                    }
                }
            }
        });

        if !existing {
            self.context
                .cache
                .set_entity(class.name(), &key, Arc::clone(&entity));
        }
        Ok((entity, key))
    }

    /// Run a query tree, answering from the collection cache when every
    /// referenced entity is still live.
    fn load(&mut self, query: &Query) -> Result<Vec<LoadedRow>> {
        let root = query.model().class();
        let query_key = query.cache_key();
        if let Some(rows) = self.cached_rows(root.name(), &query_key) {
            tracing::debug!(class = root.name(), rows = rows.len(), "Collection cache hit");
            return Ok(rows);
        }

        let nodes = query.nodes();
        let compiled = query.compile()?;
        let rows = self.run_query(&compiled.to_sql(), &compiled.params)?;

        let mut loaded = Vec::with_capacity(rows.len());
        let mut references = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut entities = Vec::with_capacity(nodes.len());
            let mut keys = Vec::with_capacity(nodes.len());
            for (node, slice) in nodes.iter().zip(query.categorize(row)) {
                match slice {
                    Some(slice) => {
                        let (entity, key) = self.hydrate(node.model().class(), &slice)?;
                        entities.push(Some(entity));
                        keys.push(Some(key));
                    }
                    None => {
                        entities.push(None);
                        keys.push(None);
                    }
                }
            }
            loaded.push(entities);
            references.push(keys);
        }

        let collection = Collection {
            classes: nodes.iter().map(|node| node.model().class()).collect(),
            rows: references,
        };
        self.context
            .cache
            .set_collection(root.name(), &query_key, collection);
        Ok(loaded)
    }

    fn cached_rows(&self, root: &str, query_key: &str) -> Option<Vec<LoadedRow>> {
        let cache = &self.context.cache;
        let collection = cache.get_collection(root, query_key)?;
        collection
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&collection.classes)
                    .map(|(key, class)| match key {
                        Some(key) => cache.get_entity(class.name(), key).map(Some),
                        None => Some(None),
                    })
                    .collect::<Option<LoadedRow>>()
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// INSERT a new entity or UPDATE a persisted one.
    pub fn save<E: Entity>(&mut self, entity: &EntityRef<E>) -> Result<()> {
        let entity: EntityHandle = Arc::clone(entity) as EntityHandle;
        self.save_dyn(&entity)
    }

    #[tracing::instrument(level = "debug", skip(self, entity), fields(class = entity.class().name()))]
    pub fn save_dyn(&mut self, entity: &EntityHandle) -> Result<()> {
        let class = entity.class();
        let model = self.model_of(class)?;
        let state = entity.state();

        let generated = if state.persisted {
            None
        } else {
            model
                .auto_increment()
                .filter(|p| p.primary() && is_unset(&entity.value(p.name())))
        };

        let mut values: Vec<(&Property, Value)> = Vec::new();
        for property in model.data_map(false) {
            if generated.is_some_and(|g| g.name() == property.name()) {
                continue;
            }
            values.push((property, storage_value(property, &entity.value(property.name()))?));
        }
        for property in model.relation_properties() {
            let value = match property.related_class() {
                Some(other) => match state.relation_keys.get(other) {
                    Some(parts) => storage_value(property, relation_part(class.name(), parts, property)?)?,
                    None => Value::Null,
                },
                None => Value::Null,
            };
            values.push((property, value));
        }

        if state.persisted {
            let current = normalize_key(&model, PrimaryKey::Parts(entity_key(&model, entity)))?;
            let stored = state.primary_key.clone().unwrap_or_else(|| current.clone());
            if current != stored {
                return Err(Error::broken(
                    class.name(),
                    "primary key of a persisted entity cannot change",
                ));
            }

            let mut params = Params::new();
            let assignments: Vec<String> = values
                .iter()
                .filter(|(property, _)| !property.primary())
                .map(|(property, value)| {
                    params.insert(format!(":{}", property.column()), value.clone());
                    format!("{col} = :{col}", col = property.column())
                })
                .collect();
            if assignments.is_empty() {
                tracing::trace!("Nothing to update");
            } else {
                let condition = key_condition(&model, &stored, &mut params)?;
                let sql = format!(
                    "UPDATE {} SET {} WHERE {}",
                    model.table(),
                    assignments.join(", "),
                    condition
                );
                self.run_execute(&sql, &params)?;
            }
        } else {
            let mut params = Params::new();
            let columns: Vec<&str> = values.iter().map(|(p, _)| p.column()).collect();
            for (property, value) in &values {
                params.insert(format!(":{}", property.column()), value.clone());
            }
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                model.table(),
                columns.join(", "),
                columns
                    .iter()
                    .map(|c| format!(":{}", c))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            self.run_execute(&sql, &params)?;

            if let Some(property) = generated {
                let id = self.connection.last_insert_id(None)?.ok_or_else(|| {
                    Error::broken(class.name(), "no auto increment value after insert")
                })?;
                entity.set_value(property.name(), property.cast_from_storage(&Value::Text(id))?)?;
            }
        }

        let parts = normalize_key(&model, PrimaryKey::Parts(entity_key(&model, entity)))?;
        let key = cache_key(&model, &parts)?;
        entity.update_state(&mut |state| {
            state.persisted = true;
            state.primary_key = Some(parts.clone());
        });

        let cache = &mut self.context.cache;
        cache.drop_collections_of(class.name());
        cache.set_entity(class.name(), &key, Arc::clone(entity));
        self.sync_stored_relations(&model, &key, &state.relation_keys)?;
        tracing::debug!(key = %key, "Saved entity");
        Ok(())
    }

    /// Align the relation cache with the relation columns just written.
    fn sync_stored_relations(
        &mut self,
        model: &Model,
        key: &str,
        stored: &BTreeMap<String, KeyParts>,
    ) -> Result<()> {
        let class = model.class().name();
        for (other, _) in model.relations() {
            if model.relation_properties_for(other.name()).is_empty() {
                continue;
            }
            let other_key = match stored.get(other.name()) {
                Some(parts) => Some(cache_key(&*self.model_of(other)?, parts)?),
                None => None,
            };
            self.context
                .cache
                .replace_relation(class, key, other.name(), other_key.as_deref());
        }
        Ok(())
    }

    /// DELETE a persisted entity and evict it; unsaved entities are ignored.
    pub fn delete<E: Entity>(&mut self, entity: &EntityRef<E>) -> Result<()> {
        let entity: EntityHandle = Arc::clone(entity) as EntityHandle;
        self.delete_dyn(&entity)
    }

    #[tracing::instrument(level = "debug", skip(self, entity), fields(class = entity.class().name()))]
    pub fn delete_dyn(&mut self, entity: &EntityHandle) -> Result<()> {
        let state = entity.state();
        if !state.persisted {
            tracing::trace!("Entity not persisted, nothing to delete");
            return Ok(());
        }

        let class = entity.class();
        let model = self.model_of(class)?;
        let parts = match state.primary_key {
            Some(parts) => parts,
            None => normalize_key(&model, PrimaryKey::Parts(entity_key(&model, entity)))?,
        };

        let mut params = Params::new();
        let condition = key_condition(&model, &parts, &mut params)?;
        let sql = format!("DELETE FROM {} WHERE {}", model.table(), condition);
        self.run_execute(&sql, &params)?;

        entity.update_state(&mut |state| {
            state.persisted = false;
            state.primary_key = None;
        });
        let key = cache_key(&model, &parts)?;
        self.context.cache.drop_entity(class.name(), &key);
        tracing::debug!(key = %key, "Deleted entity");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------------

    fn run_query(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        tracing::debug!(sql = %sql, params = params.len(), "Executing query");
        self.connection.query(sql, params)
    }

    fn run_execute(&self, sql: &str, params: &Params) -> Result<u64> {
        tracing::debug!(sql = %sql, params = params.len(), "Executing statement");
        let affected = self.connection.execute(sql, params)?;
        tracing::trace!(affected = affected, "Statement done");
        Ok(affected)
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub(crate) fn typed<E: Entity>(entity: EntityHandle) -> Result<EntityRef<E>> {
    let actual = entity.class();
    downcast::<E>(entity).ok_or_else(|| {
        Error::BadType(BadTypeError {
            what: E::CLASS.to_string(),
            expected: E::CLASS.to_string(),
            actual: Some(actual.name().to_string()),
        })
    })
}

/// Validate and cast key parts against the model's primary keys.
pub(crate) fn normalize_key(model: &Model, key: PrimaryKey) -> Result<KeyParts> {
    let class = model.class().name();
    let primary = model.primary_keys();

    let mut given = match key {
        PrimaryKey::Scalar(value) => match primary.as_slice() {
            [only] => KeyParts::from([(only.name().to_string(), value)]),
            _ => {
                return Err(Error::broken(
                    class,
                    format!("primary key has {} parts, got a single value", primary.len()),
                ));
            }
        },
        PrimaryKey::Parts(parts) => parts,
    };

    let mut parts = KeyParts::new();
    for property in &primary {
        let value = given.remove(property.name()).ok_or_else(|| {
            Error::broken(class, format!("missing primary key part {}", property.name()))
        })?;
        let stored = property.cast_to_storage(&value)?.ok_or_else(|| {
            Error::broken(class, format!("primary key part {} is null", property.name()))
        })?;
        parts.insert(
            property.name().to_string(),
            property.cast_from_storage(&Value::Text(stored))?,
        );
    }
    if let Some(extra) = given.keys().next() {
        return Err(Error::broken(
            class,
            format!("unknown primary key part {}", extra),
        ));
    }
    Ok(parts)
}

/// `[[name, stored], ...]` in property name order.
pub(crate) fn cache_key(model: &Model, parts: &KeyParts) -> Result<String> {
    let mut pairs = Vec::with_capacity(parts.len());
    for (name, value) in parts {
        let stored = match model.property(name) {
            Some(property) => property.cast_to_storage(value)?,
            None => None,
        };
        pairs.push(serde_json::json!([name, stored]));
    }
    Ok(serde_json::Value::Array(pairs).to_string())
}

/// Current primary key values of an entity.
pub(crate) fn entity_key(model: &Model, entity: &EntityHandle) -> KeyParts {
    model
        .primary_keys()
        .into_iter()
        .map(|p| (p.name().to_string(), entity.value(p.name())))
        .collect()
}

/// Stored key of a persisted entity.
pub(crate) fn persisted_key(model: &Model, entity: &EntityHandle) -> Result<Option<(KeyParts, String)>> {
    let state = entity.state();
    match state.primary_key {
        Some(parts) if state.persisted => {
            let key = cache_key(model, &parts)?;
            Ok(Some((parts, key)))
        }
        _ => Ok(None),
    }
}

pub(crate) fn storage_value(property: &Property, value: &Value) -> Result<Value> {
    Ok(property
        .cast_to_storage(value)?
        .map_or(Value::Null, Value::Text))
}

/// The key part a relation or junction column references.
pub(crate) fn relation_part<'a>(
    class: &str,
    parts: &'a KeyParts,
    property: &Property,
) -> Result<&'a Value> {
    let source = property.source().unwrap_or_else(|| property.name());
    parts.get(source).ok_or_else(|| {
        Error::broken(
            class,
            format!("relation key {} is partial", property.name()),
        )
    })
}

fn key_pairs<'a>(model: &Model, parts: &'a KeyParts) -> Result<Vec<(&'a str, Value)>> {
    parts
        .iter()
        .map(|(name, value)| {
            let property = model.property(name).ok_or_else(|| {
                Error::broken(model.class().name(), format!("unknown primary key part {}", name))
            })?;
            Ok((name.as_str(), storage_value(property, value)?))
        })
        .collect()
}

/// `pk = :key_pk AND ...` over unqualified columns.
fn key_condition(model: &Model, parts: &KeyParts, params: &mut Params) -> Result<String> {
    let mut conditions = Vec::with_capacity(parts.len());
    for (name, value) in key_pairs(model, parts)? {
        let column = model.property(name).map_or(name, Property::column);
        let param = format!(":key_{}", column);
        conditions.push(format!("{} = {}", column, param));
        params.insert(param, value);
    }
    Ok(conditions.join(" AND "))
}

fn selector(parts: &KeyParts) -> serde_json::Value {
    serde_json::Value::Object(
        parts
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect(),
    )
}

fn is_unset(value: &Value) -> bool {
    value.is_null() || value.as_i64() == Some(0)
}

/// Relation keys present in a row, by related class.
///
/// `None` marks a relation whose columns are NULL.
fn stored_relation_keys(model: &Model, row: &Row) -> Result<BTreeMap<String, Option<KeyParts>>> {
    let mut keys: BTreeMap<String, Option<KeyParts>> = BTreeMap::new();
    for property in model.relation_properties() {
        let (Some(other), Some(source)) = (property.related_class(), property.source()) else {
            continue;
        };
        let Some(raw) = row.get_by_name(property.column()) else {
            continue;
        };
        let value = property.cast_from_storage(raw)?;
        let entry = keys
            .entry(other.to_string())
            .or_insert_with(|| Some(KeyParts::new()));
        if value.is_null() {
            *entry = None;
        } else if let Some(parts) = entry {
            parts.insert(source.to_string(), value);
        }
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hereyougo_core::{Declaration, EntityState, PropertyDef, new_entity};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Pair {
        owner: String,
        slot: i64,
        label: String,
        weight: i64,
        state: EntityState,
    }

    impl Entity for Pair {
        const CLASS: &'static str = "Pair";

        fn declare() -> Declaration {
            Declaration::new()
                .property(PropertyDef::string("owner", 16).primary())
                .property(PropertyDef::int("slot", hereyougo_core::IntSize::Int32).primary())
                .property(PropertyDef::string("label", 32))
                .property(PropertyDef::int("weight", hereyougo_core::IntSize::Int32))
        }

        fn blank() -> Self {
            Self::default()
        }

        fn read(&self, property: &str) -> Option<Value> {
            match property {
                "owner" => Some(Value::from(self.owner.as_str())),
                "slot" => Some(Value::Int(self.slot)),
                "label" => Some(Value::from(self.label.as_str())),
                "weight" => Some(Value::Int(self.weight)),
                _ => None,
            }
        }

        fn write(&mut self, property: &str, value: Value) -> Result<bool> {
            match property {
                "owner" => self.owner = value.try_into()?,
                "slot" => self.slot = value.try_into()?,
                "label" => self.label = value.try_into()?,
                "weight" => self.weight = value.try_into()?,
                _ => return Ok(false),
            }
            Ok(true)
        }

        fn state(&self) -> &EntityState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut EntityState {
            &mut self.state
        }
    }

    #[derive(Default)]
    struct Recorder {
        statements: Mutex<Vec<(String, Params)>>,
    }

    impl Connection for Recorder {
        fn id(&self) -> &str {
            "test"
        }

        fn driver(&self) -> &str {
            "mysql"
        }

        fn query(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
            self.statements
                .lock()
                .unwrap()
                .push((sql.to_string(), params.clone()));
            Ok(Vec::new())
        }

        fn execute(&self, sql: &str, params: &Params) -> Result<u64> {
            self.statements
                .lock()
                .unwrap()
                .push((sql.to_string(), params.clone()));
            Ok(1)
        }

        fn last_insert_id(&self, _sequence: Option<&str>) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[test]
    fn composite_key_checks() {
        let mut session = Session::new(Recorder::default());
        let parts = session
            .check_primary_key::<Pair>([("slot", Value::from("7")), ("owner", Value::from("a"))])
            .unwrap();
        assert_eq!(parts.keys().collect::<Vec<_>>(), ["owner", "slot"]);
        assert_eq!(parts["slot"], Value::Int(7));

        assert!(session.check_primary_key::<Pair>("a").unwrap_err().is_broken());
        assert!(
            session
                .check_primary_key::<Pair>([("owner", Value::from("a"))])
                .unwrap_err()
                .is_broken()
        );
        assert!(
            session
                .check_primary_key::<Pair>([
                    ("owner", Value::from("a")),
                    ("slot", Value::Int(1)),
                    ("extra", Value::Int(1)),
                ])
                .unwrap_err()
                .is_broken()
        );
    }

    #[test]
    fn cache_key_ignores_part_order_and_representation() {
        let mut session = Session::new(Recorder::default());
        let a = session
            .build_cache_key::<Pair>([("owner", Value::from("a")), ("slot", Value::Int(7))])
            .unwrap();
        let b = session
            .build_cache_key::<Pair>([("slot", Value::from("7")), ("owner", Value::from("a"))])
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a, r#"[["owner","a"],["slot","7"]]"#);
    }

    #[test]
    fn from_data_returns_cached_instance() {
        let mut session = Session::new(Recorder::default());
        let row = Row::from_pairs([("owner", "a"), ("slot", "1"), ("label", "first")]);
        let first = session.from_data::<Pair>(&row).unwrap();
        let row = Row::from_pairs([("owner", "a"), ("slot", "1"), ("label", "second")]);
        let second = session.from_data::<Pair>(&row).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.read().unwrap().label, "second");
        assert!(first.read().unwrap().state.persisted);
    }

    #[test]
    fn bad_row_leaves_cached_instance_untouched() {
        let mut session = Session::new(Recorder::default());
        let row = |label, weight| {
            Row::from_pairs([("owner", "a"), ("slot", "1"), ("label", label), ("weight", weight)])
        };
        let pair = session.from_data::<Pair>(&row("first", "3")).unwrap();

        let row = row("second", "heavy");
        assert_eq!(session.from_data::<Pair>(&row).unwrap_err().code(), "bad_type");
        assert_eq!(pair.read().unwrap().label, "first");
        assert_eq!(pair.read().unwrap().weight, 3);
    }

    #[test]
    fn save_inserts_then_updates() {
        let mut session = Session::new(Recorder::default());
        let pair = new_entity(Pair {
            owner: "a".into(),
            slot: 1,
            label: "x".into(),
            ..Pair::default()
        });
        session.save(&pair).unwrap();
        pair.write().unwrap().label = "y".into();
        session.save(&pair).unwrap();

        let statements = session.connection().statements.lock().unwrap();
        assert_eq!(
            statements[0].0,
            "INSERT INTO pairs (owner, slot, label, weight) VALUES (:owner, :slot, :label, :weight)"
        );
        assert_eq!(
            statements[1].0,
            "UPDATE pairs SET label = :label, weight = :weight WHERE owner = :key_owner AND slot = :key_slot"
        );
        assert_eq!(statements[1].1[":label"], Value::from("y"));
        assert_eq!(statements[1].1[":key_slot"], Value::from("1"));
    }

    #[test]
    fn persisted_key_is_immutable() {
        let mut session = Session::new(Recorder::default());
        let pair = new_entity(Pair {
            owner: "a".into(),
            slot: 1,
            ..Pair::default()
        });
        session.save(&pair).unwrap();
        pair.write().unwrap().slot = 2;
        assert!(session.save(&pair).unwrap_err().is_broken());
    }

    #[test]
    fn missing_row_is_not_found_when_fatal() {
        let mut session = Session::new(Recorder::default());
        let key = [("owner", Value::from("a")), ("slot", Value::Int(1))];
        assert!(session.from_primary_key::<Pair>(key.clone(), false).unwrap().is_none());
        assert!(session.get::<Pair>(key).unwrap_err().is_not_found());
    }
}
