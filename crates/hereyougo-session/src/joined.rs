//! Results of join queries, grouped by entity identity.

use crate::typed;
use hereyougo_core::{Entity, EntityHandle, EntityRef};
use hereyougo_query::Query;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Distinct entities of one query node, in first-seen order.
#[derive(Clone, Default)]
pub struct JoinCollection {
    entries: Vec<JoinedEntities>,
}

/// One entity with, per join name, the entities joined to it.
#[derive(Clone)]
pub struct JoinedEntities {
    entity: EntityHandle,
    joins: BTreeMap<String, JoinCollection>,
}

impl JoinCollection {
    /// Group loaded rows on the node at `offset` (in [`Query::nodes`] order).
    pub(crate) fn group(query: &Query, offset: usize, rows: &[&[Option<EntityHandle>]]) -> Self {
        let mut index: HashMap<*const (), usize> = HashMap::new();
        let mut groups: Vec<(EntityHandle, Vec<&[Option<EntityHandle>]>)> = Vec::new();

        for &row in rows {
            let Some(Some(entity)) = row.get(offset) else {
                continue;
            };
            let identity = Arc::as_ptr(entity).cast::<()>();
            let position = *index.entry(identity).or_insert_with(|| {
                groups.push((EntityHandle::clone(entity), Vec::new()));
                groups.len() - 1
            });
            groups[position].1.push(row);
        }

        let entries = groups
            .into_iter()
            .map(|(entity, rows)| {
                let mut joins = BTreeMap::new();
                let mut child_offset = offset + 1;
                for join in query.joins() {
                    joins.insert(
                        join.name().to_string(),
                        JoinCollection::group(join.query(), child_offset, &rows),
                    );
                    child_offset += join.query().nodes().len();
                }
                JoinedEntities { entity, joins }
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &JoinedEntities> {
        self.entries.iter()
    }

    pub fn get(&self, index: usize) -> Option<&JoinedEntities> {
        self.entries.get(index)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityHandle> {
        self.entries.iter().map(|entry| &entry.entity)
    }

    /// Entities downcast to `E`, skipping other classes.
    pub fn typed<E: Entity>(&self) -> Vec<EntityRef<E>> {
        self.entries
            .iter()
            .filter_map(|entry| entry.typed::<E>())
            .collect()
    }
}

impl<'a> IntoIterator for &'a JoinCollection {
    type Item = &'a JoinedEntities;
    type IntoIter = std::slice::Iter<'a, JoinedEntities>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl JoinedEntities {
    pub fn entity(&self) -> &EntityHandle {
        &self.entity
    }

    pub fn typed<E: Entity>(&self) -> Option<EntityRef<E>> {
        typed::<E>(EntityHandle::clone(&self.entity)).ok()
    }

    /// Entities joined under `name`; `None` for an unknown join name.
    pub fn join(&self, name: &str) -> Option<&JoinCollection> {
        self.joins.get(name)
    }

    pub fn joins(&self) -> &BTreeMap<String, JoinCollection> {
        &self.joins
    }
}

impl fmt::Debug for JoinCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.entries).finish()
    }
}

impl fmt::Debug for JoinedEntities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinedEntities")
            .field("class", &self.entity.class())
            .field("joins", &self.joins)
            .finish()
    }
}
