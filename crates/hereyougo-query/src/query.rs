//! Scoped join query trees.
//!
//! A [`Query`] selects every column of one entity class. Child queries are
//! attached with [`Query::on`] + [`Query::join`] and form a tree rooted at
//! the main query. Each node gets a process-unique scope alias
//! (`scope_<id>`), so the same class may appear several times in one
//! statement without ambiguity:
//!
//! ```text
//! SELECT scope_1.id AS scope_1__id, ..., scope_2.id AS scope_2__id, ...
//! FROM tasks AS scope_1
//! JOIN tasks AS scope_2 ON (scope_2.task_id = scope_1.id)
//! WHERE (scope_1.id = :scope_1_root)
//! ```

use crate::expr::{Expr, RenderContext};
use hereyougo_core::{Error, Model, Params, Result, Row, is_placeholder};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

/// A child query with its join condition.
#[derive(Debug, Clone)]
pub struct Join {
    name: String,
    on: Expr,
    query: Query,
}

impl Join {
    /// Human-readable join name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn on(&self) -> &Expr {
        &self.on
    }

    pub fn query(&self) -> &Query {
        &self.query
    }
}

/// One node of a join tree.
#[derive(Debug, Clone)]
pub struct Query {
    id: u64,
    scope: String,
    model: Arc<Model>,
    criteria: Option<Expr>,
    placeholders: Params,
    pending_on: Option<(Expr, String)>,
    joins: Vec<Join>,
}

/// SQL fragments of a compiled join tree, in preorder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledQuery {
    /// `scope.column AS scope__column`
    pub columns: Vec<String>,
    /// Root `table AS scope`, then one `JOIN ... ON (...)` per child
    pub from: Vec<String>,
    /// One scoped criteria fragment per node that has criteria
    pub criteria: Vec<String>,
    /// Aggregated placeholders plus bound literals
    pub params: Params,
}

impl CompiledQuery {
    /// Assemble the SELECT statement.
    pub fn to_sql(&self) -> String {
        let mut sql = format!(
            "SELECT {} FROM {}",
            self.columns.join(", "),
            self.from.join(" ")
        );
        if !self.criteria.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.criteria.join(" AND "));
        }
        sql
    }
}

impl Query {
    /// Create a query over `model`.
    ///
    /// Placeholder keys must carry the leading `:` marker.
    pub fn new(model: Arc<Model>, criteria: Option<Expr>, placeholders: Params) -> Result<Self> {
        for key in placeholders.keys() {
            if !is_placeholder(key) {
                return Err(Error::broken(
                    key.as_str(),
                    "placeholders must start with \":\"",
                ));
            }
        }

        let id = NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed);
        Ok(Self {
            id,
            scope: format!("scope_{}", id),
            model,
            criteria,
            placeholders,
            pending_on: None,
            joins: Vec::new(),
        })
    }

    /// Query without criteria.
    pub fn all(model: Arc<Model>) -> Self {
        let id = NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            scope: format!("scope_{}", id),
            model,
            criteria: None,
            placeholders: Params::new(),
            pending_on: None,
            joins: Vec::new(),
        }
    }

    /// Set the join condition and name used by the next [`Query::join`].
    ///
    /// In the condition, [`Expr::col`] refers to the joined query's class
    /// and [`Expr::parent`] to this query's class.
    pub fn on(mut self, criteria: Expr, name: impl Into<String>) -> Self {
        self.pending_on = Some((criteria, name.into()));
        self
    }

    /// Attach a child query using the condition set by [`Query::on`].
    pub fn join(mut self, child: Query) -> Result<Self> {
        let (on, name) = self.pending_on.take().ok_or_else(|| {
            Error::broken(child.model.class().name(), "cannot join without criteria")
        })?;
        self.joins.push(Join {
            name,
            on,
            query: child,
        });
        Ok(self)
    }

    /// Shorthand for `on(criteria, name).join(child)`.
    pub fn join_on(self, child: Query, criteria: Expr, name: impl Into<String>) -> Result<Self> {
        self.on(criteria, name).join(child)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Generated SQL alias of this node.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn criteria(&self) -> Option<&Expr> {
        self.criteria.as_ref()
    }

    pub fn placeholders(&self) -> &Params {
        &self.placeholders
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    /// Every node of the tree, root first, depth first.
    pub fn nodes(&self) -> Vec<&Query> {
        let mut nodes = vec![self];
        for join in &self.joins {
            nodes.extend(join.query.nodes());
        }
        nodes
    }

    /// Compile the tree into scoped SQL fragments.
    pub fn compile(&self) -> Result<CompiledQuery> {
        let mut compiled = CompiledQuery::default();
        self.compile_node(None, &mut compiled)?;
        compiled.params.extend(self.aggregated_placeholders());
        tracing::trace!(
            class = self.model.class().name(),
            scope = %self.scope,
            nodes = self.nodes().len(),
            "Compiled query"
        );
        Ok(compiled)
    }

    /// Compile straight to a statement and its parameters.
    pub fn to_sql(&self) -> Result<(String, Params)> {
        let compiled = self.compile()?;
        Ok((compiled.to_sql(), compiled.params))
    }

    fn compile_node(&self, joined: Option<(&Query, &Expr)>, out: &mut CompiledQuery) -> Result<()> {
        for property in self.model.data_map(true) {
            out.columns.push(format!(
                "{scope}.{column} AS {scope}__{column}",
                scope = self.scope,
                column = property.column()
            ));
        }

        let mut literals = 0;
        match joined {
            None => out.from.push(format!("{} AS {}", self.model.table(), self.scope)),
            Some((parent, on)) => {
                let mut ctx = RenderContext {
                    scope: &self.scope,
                    model: &self.model,
                    parent: Some((parent.scope.as_str(), parent.model.as_ref())),
                    placeholders: &self.placeholders,
                    bindings: &mut out.params,
                    literals,
                };
                let on = on.render(&mut ctx)?;
                literals = ctx.literals;
                out.from.push(format!(
                    "JOIN {} AS {} ON ({})",
                    self.model.table(),
                    self.scope,
                    on
                ));
            }
        }

        if let Some(criteria) = &self.criteria {
            let mut ctx = RenderContext {
                scope: &self.scope,
                model: &self.model,
                parent: None,
                placeholders: &self.placeholders,
                bindings: &mut out.params,
                literals,
            };
            let rendered = criteria.render(&mut ctx)?;
            out.criteria.push(rendered);
        }

        for join in &self.joins {
            join.query.compile_node(Some((self, &join.on)), out)?;
        }
        Ok(())
    }

    /// Placeholders of every node, renamed `:<scope>_<name>`.
    pub fn aggregated_placeholders(&self) -> Params {
        let mut aggregated = Params::new();
        for node in self.nodes() {
            for (key, value) in &node.placeholders {
                let name = key.trim_start_matches(':');
                aggregated.insert(format!(":{}_{}", node.scope, name), value.clone());
            }
        }
        aggregated
    }

    /// Split a fetched row into one slice per node, in [`Query::nodes`] order.
    ///
    /// A slice is `None` when the node matched nothing (outer NULLs).
    pub fn categorize(&self, row: &Row) -> Vec<Option<Row>> {
        self.nodes()
            .into_iter()
            .map(|node| row.slice(&format!("{}__", node.scope)))
            .collect()
    }

    /// Stable fingerprint of the tree: classes, criteria, join names and
    /// conditions, placeholder values. Scopes and ids are left out.
    pub fn cache_key(&self) -> String {
        let canonical = self.fingerprint().to_string();
        let digest = Sha256::digest(canonical.as_bytes());
        digest.iter().map(|byte| format!("{:02x}", byte)).collect()
    }

    fn fingerprint(&self) -> serde_json::Value {
        let placeholders: serde_json::Map<String, serde_json::Value> = self
            .placeholders
            .iter()
            .map(|(key, value)| (key.clone(), value.to_json()))
            .collect();
        let joins: Vec<serde_json::Value> = self
            .joins
            .iter()
            .map(|join| {
                json!({
                    "name": join.name,
                    "on": join.on,
                    "query": join.query.fingerprint(),
                })
            })
            .collect();
        json!({
            "class": self.model.class().name(),
            "criteria": self.criteria,
            "placeholders": placeholders,
            "joins": joins,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hereyougo_core::{
        Declaration, Entity, EntityState, IntSize, Models, PropertyDef, Value,
    };
    use std::collections::BTreeMap;

    macro_rules! entity {
        ($name:ident, $declaration:expr) => {
            #[derive(Default)]
            struct $name {
                values: BTreeMap<String, Value>,
                state: EntityState,
            }

            impl Entity for $name {
                const CLASS: &'static str = stringify!($name);

                fn declare() -> Declaration {
                    $declaration
                }

                fn blank() -> Self {
                    Self::default()
                }

                fn read(&self, property: &str) -> Option<Value> {
                    self.values.get(property).cloned()
                }

                fn write(&mut self, property: &str, value: Value) -> Result<bool> {
                    self.values.insert(property.to_string(), value);
                    Ok(true)
                }

                fn state(&self) -> &EntityState {
                    &self.state
                }

                fn state_mut(&mut self) -> &mut EntityState {
                    &mut self.state
                }
            }
        };
    }

    entity!(
        User,
        Declaration::new()
            .property(PropertyDef::string("id", 64).primary())
            .property(PropertyDef::string("email", 128).column("mail").unique(None))
    );
    entity!(
        Task,
        Declaration::new()
            .property(PropertyDef::int("id", IntSize::Int32).primary().auto_increment())
            .property(PropertyDef::int("parent_id", IntSize::Int32).nullable())
            .property(PropertyDef::string("title", 64))
    );

    fn params(pairs: &[(&str, Value)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn compiles_scoped_criteria() {
        let mut models = Models::new();
        let query = Query::new(
            models.model_of::<User>().unwrap(),
            Some(Expr::col("email").eq(Expr::placeholder("email"))),
            params(&[(":email", Value::from("a@b.c"))]),
        )
        .unwrap();
        let scope = query.scope().to_string();

        let (sql, bound) = query.to_sql().unwrap();
        assert_eq!(
            sql,
            format!(
                "SELECT {s}.id AS {s}__id, {s}.mail AS {s}__mail FROM users AS {s} WHERE {s}.mail = :{s}_email",
                s = scope
            )
        );
        assert_eq!(bound.get(&format!(":{}_email", scope)), Some(&Value::from("a@b.c")));
        assert_eq!(bound.len(), 1);
    }

    #[test]
    fn literals_are_bound() {
        let mut models = Models::new();
        let query = Query::new(
            models.model_of::<User>().unwrap(),
            Some(Expr::col("id").eq("it's")),
            Params::new(),
        )
        .unwrap();
        let compiled = query.compile().unwrap();
        assert!(!compiled.to_sql().contains("it's"));
        assert_eq!(compiled.params.values().next(), Some(&Value::from("it's")));
    }

    #[test]
    fn rejects_bad_references() {
        let mut models = Models::new();
        let model = models.model_of::<User>().unwrap();

        let err = Query::new(Arc::clone(&model), None, params(&[("email", Value::Null)]))
            .unwrap_err();
        assert!(err.is_broken());

        let unknown = Query::new(Arc::clone(&model), Some(Expr::col("age").gt(3)), Params::new())
            .unwrap();
        assert!(unknown.compile().unwrap_err().to_string().contains("unknown property or column age"));

        let unbound = Query::new(
            Arc::clone(&model),
            Some(Expr::col("id").eq(Expr::placeholder("id"))),
            Params::new(),
        )
        .unwrap();
        assert!(unbound.compile().unwrap_err().to_string().contains("unbound placeholder :id"));

        let parent = Query::new(model, Some(Expr::parent("id").eq(1)), Params::new()).unwrap();
        assert!(parent.compile().is_err());
    }

    #[test]
    fn join_requires_condition() {
        let mut models = Models::new();
        let model = models.model_of::<Task>().unwrap();
        let err = Query::all(Arc::clone(&model))
            .join(Query::all(model))
            .unwrap_err();
        assert!(err.to_string().contains("cannot join without criteria"));
    }

    #[test]
    fn self_join_is_unambiguous() {
        let mut models = Models::new();
        let model = models.model_of::<Task>().unwrap();
        let child = Query::all(Arc::clone(&model));
        let root = Query::new(
            Arc::clone(&model),
            Some(Expr::col("id").eq(Expr::placeholder("root"))),
            params(&[(":root", Value::Int(1))]),
        )
        .unwrap();
        let (p, c) = (root.scope().to_string(), child.scope().to_string());
        let query = root
            .on(Expr::col("parent_id").eq(Expr::parent("id")), "subtasks")
            .join(child)
            .unwrap();

        let compiled = query.compile().unwrap();
        assert_eq!(compiled.columns.len(), 6);
        assert_eq!(
            compiled.from,
            [
                format!("tasks AS {}", p),
                format!("JOIN tasks AS {c} ON ({c}.parent_id = {p}.id)", c = c, p = p),
            ]
        );
        assert_eq!(query.joins()[0].name(), "subtasks");

        let row = Row::from_pairs([
            (format!("{}__id", p), Value::from("1")),
            (format!("{}__parent_id", p), Value::Null),
            (format!("{}__title", p), Value::from("root")),
            (format!("{}__id", c), Value::from("2")),
            (format!("{}__parent_id", c), Value::from("1")),
            (format!("{}__title", c), Value::from("leaf")),
        ]);
        let slices = query.categorize(&row);
        assert_eq!(slices.len(), 2);
        let root_slice = slices[0].as_ref().unwrap();
        let child_slice = slices[1].as_ref().unwrap();
        assert_eq!(root_slice.get_text("title").as_deref(), Some("root"));
        assert_eq!(child_slice.get_text("title").as_deref(), Some("leaf"));
        assert_eq!(child_slice.get_text("parent_id").as_deref(), Some("1"));

        let orphan = Row::from_pairs([
            (format!("{}__id", p), Value::from("3")),
            (format!("{}__id", c), Value::Null),
        ]);
        assert!(query.categorize(&orphan)[1].is_none());
    }

    #[test]
    fn aggregated_placeholders_are_scoped() {
        let mut models = Models::new();
        let model = models.model_of::<Task>().unwrap();
        let child = Query::new(
            Arc::clone(&model),
            Some(Expr::col("title").eq(Expr::placeholder("title"))),
            params(&[(":title", Value::from("x"))]),
        )
        .unwrap();
        let root = Query::new(
            Arc::clone(&model),
            Some(Expr::col("title").eq(Expr::placeholder("title"))),
            params(&[(":title", Value::from("y"))]),
        )
        .unwrap();
        let child_key = format!(":{}_title", child.scope());
        let root_key = format!(":{}_title", root.scope());
        let query = root
            .join_on(child, Expr::col("parent_id").eq(Expr::parent("id")), "sub")
            .unwrap();

        let aggregated = query.aggregated_placeholders();
        assert_eq!(aggregated.len(), 2);
        assert_eq!(aggregated.get(&root_key), Some(&Value::from("y")));
        assert_eq!(aggregated.get(&child_key), Some(&Value::from("x")));
    }

    #[test]
    fn cache_key_ignores_scopes() {
        let mut models = Models::new();
        let model = models.model_of::<User>().unwrap();
        let build = |email: &str| {
            Query::new(
                Arc::clone(&model),
                Some(Expr::col("email").eq(Expr::placeholder("email"))),
                params(&[(":email", Value::from(email))]),
            )
            .unwrap()
        };

        let a = build("a@b.c");
        let b = build("a@b.c");
        assert_ne!(a.scope(), b.scope());
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key().len(), 64);
        assert_ne!(a.cache_key(), build("x@y.z").cache_key());
        assert_ne!(a.cache_key(), Query::all(Arc::clone(&model)).cache_key());
    }
}
