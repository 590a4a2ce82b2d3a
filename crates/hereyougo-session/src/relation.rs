//! Relation traversal and linking.
//!
//! Where the keys live depends on the resolved [`RelationKind`]:
//!
//! - `OneToMany`: this entity stores the other's key in its relation
//!   columns, kept in [`EntityState::relation_keys`] until the next save
//! - `ManyToOne`: the other entity stores this one's key; writes are
//!   delegated to the other side
//! - `ManyToMany`: a junction table holds both keys and is written
//!   immediately
//!
//! [`EntityState::relation_keys`]: hereyougo_core::EntityState::relation_keys

use crate::{Session, cache_key, persisted_key, relation_part, storage_value, typed};
use hereyougo_core::{
    Connection, Entity, EntityClass, EntityHandle, EntityRef, Error, KeyParts, Model, Params,
    PrimaryKey, RelationKind, Result,
};
use hereyougo_query::{CompiledQuery, Expr, Query};
use std::sync::Arc;

impl<C: Connection> Session<C> {
    /// Entities of class `O` related to `entity`.
    pub fn get_related<E: Entity, O: Entity>(
        &mut self,
        entity: &EntityRef<E>,
    ) -> Result<Vec<EntityRef<O>>> {
        let entity: EntityHandle = Arc::clone(entity) as EntityHandle;
        self.get_related_dyn(&entity, EntityClass::of::<O>())?
            .into_iter()
            .map(typed::<O>)
            .collect()
    }

    /// The single `O` referenced by `entity`, for relations where `E`
    /// stores the key.
    pub fn get_related_one<E: Entity, O: Entity>(
        &mut self,
        entity: &EntityRef<E>,
    ) -> Result<Option<EntityRef<O>>> {
        let (_, _, kind) = self.relation(EntityClass::of::<E>(), EntityClass::of::<O>())?;
        if kind != RelationKind::OneToMany {
            return Err(Error::broken(
                E::CLASS,
                format!("has many {}, not one", O::CLASS),
            ));
        }
        Ok(self.get_related::<E, O>(entity)?.into_iter().next())
    }

    /// Link two entities.
    pub fn set_related<E: Entity, O: Entity>(
        &mut self,
        entity: &EntityRef<E>,
        other: &EntityRef<O>,
    ) -> Result<()> {
        let entity: EntityHandle = Arc::clone(entity) as EntityHandle;
        let other: EntityHandle = Arc::clone(other) as EntityHandle;
        self.set_related_dyn(&entity, &other)
    }

    /// Unlink two entities; unrelated pairs are left alone.
    pub fn drop_related<E: Entity, O: Entity>(
        &mut self,
        entity: &EntityRef<E>,
        other: &EntityRef<O>,
    ) -> Result<()> {
        let entity: EntityHandle = Arc::clone(entity) as EntityHandle;
        let other: EntityHandle = Arc::clone(other) as EntityHandle;
        self.drop_related_dyn(&entity, &other)
    }

    #[tracing::instrument(level = "debug", skip(self, entity, other), fields(class = entity.class().name(), other = other.name()))]
    pub fn get_related_dyn(
        &mut self,
        entity: &EntityHandle,
        other: EntityClass,
    ) -> Result<Vec<EntityHandle>> {
        let class = entity.class();
        let (model, other_model, kind) = self.relation(class, other)?;

        if kind == RelationKind::OneToMany {
            let Some(parts) = entity.state().relation_keys.get(other.name()).cloned() else {
                return Ok(Vec::new());
            };
            let related = self.from_primary_key_dyn(other, PrimaryKey::Parts(parts), false)?;
            return Ok(related.into_iter().collect());
        }

        let Some((parts, key)) = persisted_key(&model, entity)? else {
            return Ok(Vec::new());
        };

        if let Some(keys) = self
            .context
            .cache
            .get_relation(class.name(), &key, other.name())
        {
            let cached: Option<Vec<EntityHandle>> = keys
                .iter()
                .map(|k| self.context.cache.get_entity(other.name(), k))
                .collect();
            if let Some(cached) = cached {
                tracing::trace!(count = cached.len(), "Relation cache hit");
                return Ok(cached);
            }
        }

        let (query, compiled) = if kind == RelationKind::ManyToOne {
            let criteria = owned_by(&other_model, class.name(), &parts)?;
            let query = Query::new(Arc::clone(&other_model), criteria, Params::new())?;
            let compiled = query.compile()?;
            (query, compiled)
        } else {
            let query = Query::all(Arc::clone(&other_model));
            let compiled = through_junction(&query, &model, &other_model, &parts)?;
            (query, compiled)
        };
        let rows = self.run_query(&compiled.to_sql(), &compiled.params)?;

        let mut related = Vec::with_capacity(rows.len());
        for row in &rows {
            let Some(slice) = query.categorize(row).into_iter().next().flatten() else {
                continue;
            };
            let (found, found_key) = self.hydrate(other, &slice)?;
            self.context
                .cache
                .set_relation(class.name(), &key, other.name(), &found_key);
            related.push(found);
        }
        self.context
            .cache
            .mark_relation_complete(class.name(), &key, other.name());
        tracing::debug!(count = related.len(), "Loaded related entities");
        Ok(related)
    }

    #[tracing::instrument(level = "debug", skip(self, entity, other), fields(class = entity.class().name(), other = other.class().name()))]
    pub fn set_related_dyn(&mut self, entity: &EntityHandle, other: &EntityHandle) -> Result<()> {
        let class = entity.class();
        let (model, other_model, kind) = self.relation(class, other.class())?;

        match kind {
            RelationKind::ManyToOne => {
                self.get_related_dyn(entity, other.class())?;
                self.set_related_dyn(other, entity)
            }
            RelationKind::OneToMany => {
                let (other_parts, other_key) = linked_key(&other_model, other)?;
                let other_name = other.class().name();
                let mut previous = None;
                entity.update_state(&mut |state| {
                    previous = state
                        .relation_keys
                        .insert(other_name.to_string(), other_parts.clone());
                });

                if let Some((_, key)) = persisted_key(&model, entity)? {
                    let cache = &mut self.context.cache;
                    if let Some(previous) = previous.filter(|p| *p != other_parts) {
                        let previous_key = cache_key(&other_model, &previous)?;
                        cache.drop_relation(class.name(), &key, other_name, &previous_key);
                    }
                    cache.set_relation(class.name(), &key, other_name, &other_key);
                }
                Ok(())
            }
            RelationKind::ManyToMany => {
                let (parts, key) = linked_key(&model, entity)?;
                let (other_parts, other_key) = linked_key(&other_model, other)?;
                let other_name = other.class().name();

                self.get_related_dyn(entity, other.class())?;
                if self
                    .context
                    .cache
                    .has_relation(class.name(), &key, other_name, &other_key)
                {
                    tracing::trace!("Already related");
                    return Ok(());
                }

                let junction = model.junction_with(&other_model)?;
                let mut params = Params::new();
                let mut columns = Vec::new();
                for (side, side_parts) in [(class.name(), &parts), (other_name, &other_parts)] {
                    for property in junction.keys_for(side) {
                        let value = relation_part(side, side_parts, property)?;
                        params.insert(
                            format!(":{}", property.column()),
                            storage_value(property, value)?,
                        );
                        columns.push(property.column());
                    }
                }
                let sql = format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    junction.table(),
                    columns.join(", "),
                    columns
                        .iter()
                        .map(|c| format!(":{}", c))
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                self.run_execute(&sql, &params)?;

                self.context
                    .cache
                    .set_relation(class.name(), &key, other_name, &other_key);
                Ok(())
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self, entity, other), fields(class = entity.class().name(), other = other.class().name()))]
    pub fn drop_related_dyn(&mut self, entity: &EntityHandle, other: &EntityHandle) -> Result<()> {
        let class = entity.class();
        let (model, other_model, kind) = self.relation(class, other.class())?;
        let other_name = other.class().name();

        match kind {
            RelationKind::ManyToOne => self.drop_related_dyn(other, entity),
            RelationKind::OneToMany => {
                let Some((other_parts, other_key)) = persisted_key(&other_model, other)? else {
                    return Ok(());
                };
                let mut removed = false;
                entity.update_state(&mut |state| {
                    if state.relation_keys.get(other_name) == Some(&other_parts) {
                        state.relation_keys.remove(other_name);
                        removed = true;
                    }
                });
                if removed {
                    if let Some((_, key)) = persisted_key(&model, entity)? {
                        self.context
                            .cache
                            .drop_relation(class.name(), &key, other_name, &other_key);
                    }
                }
                Ok(())
            }
            RelationKind::ManyToMany => {
                let (Some((parts, key)), Some((other_parts, other_key))) =
                    (persisted_key(&model, entity)?, persisted_key(&other_model, other)?)
                else {
                    return Ok(());
                };

                let junction = model.junction_with(&other_model)?;
                let mut params = Params::new();
                let mut conditions = Vec::new();
                for (side, side_parts) in [(class.name(), &parts), (other_name, &other_parts)] {
                    for property in junction.keys_for(side) {
                        let value = relation_part(side, side_parts, property)?;
                        let param = format!(":{}", property.column());
                        conditions.push(format!("{} = {}", property.column(), param));
                        params.insert(param, storage_value(property, value)?);
                    }
                }
                let sql = format!(
                    "DELETE FROM {} WHERE {}",
                    junction.table(),
                    conditions.join(" AND ")
                );
                self.run_execute(&sql, &params)?;

                self.context
                    .cache
                    .drop_relation(class.name(), &key, other_name, &other_key);
                Ok(())
            }
        }
    }

    /// Models of both classes with their resolved relation kind.
    fn relation(
        &mut self,
        class: EntityClass,
        other: EntityClass,
    ) -> Result<(Arc<Model>, Arc<Model>, RelationKind)> {
        let model = self.model_of(class)?;
        let other_model = self.model_of(other)?;
        let kind = model.relation_with(&other_model)?.ok_or_else(|| {
            Error::broken(class.name(), format!("has no relation with {}", other))
        })?;
        Ok((model, other_model, kind))
    }
}

/// Key of an entity that must already be persisted to take part in a link.
fn linked_key(model: &Model, entity: &EntityHandle) -> Result<(KeyParts, String)> {
    persisted_key(model, entity)?.ok_or_else(|| {
        Error::broken(
            model.class().name(),
            "cannot relate an entity that is not saved",
        )
    })
}

/// `other` rows whose relation columns reference `class`'s key.
fn owned_by(other_model: &Model, class: &str, parts: &KeyParts) -> Result<Option<Expr>> {
    let mut pairs = Vec::new();
    for property in other_model.relation_properties_for(class) {
        let value = relation_part(class, parts, property)?;
        pairs.push((property.name(), storage_value(property, value)?));
    }
    Ok(Expr::all_equal(pairs))
}

/// `other` rows linked to `model`'s key through the junction table.
fn through_junction(
    query: &Query,
    model: &Model,
    other_model: &Model,
    parts: &KeyParts,
) -> Result<CompiledQuery> {
    let class = model.class().name();
    let other = other_model.class().name();
    let junction = model.junction_with(other_model)?;
    let alias = format!("{}_junction", query.scope());
    let mut compiled = query.compile()?;

    let mut on = Vec::new();
    for property in junction.keys_for(other) {
        let source = property.source().unwrap_or_else(|| property.name());
        let target = other_model.property(source).ok_or_else(|| {
            Error::broken(other, format!("unknown primary key part {}", source))
        })?;
        on.push(format!(
            "{}.{} = {}.{}",
            alias,
            property.column(),
            query.scope(),
            target.column()
        ));
    }
    compiled.from.push(format!(
        "JOIN {} AS {} ON ({})",
        junction.table(),
        alias,
        on.join(" AND ")
    ));

    for property in junction.keys_for(class) {
        let value = relation_part(class, parts, property)?;
        let param = format!(":{}_{}", alias, property.column());
        compiled
            .criteria
            .push(format!("{}.{} = {}", alias, property.column(), param));
        compiled.params.insert(param, storage_value(property, value)?);
    }
    Ok(compiled)
}
