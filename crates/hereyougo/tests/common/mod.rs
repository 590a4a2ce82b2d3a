//! Shared fixtures for the integration tests: a recording mock connection
//! and a small set of entity classes.

#![allow(dead_code)]

use hereyougo::error::DatabaseError;
use hereyougo::{
    Connection, Declaration, Entity, EntityState, Error, IntSize, Params, PropertyDef, Result,
    Row, Value,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

// ============================================================================
// Mock connection
// ============================================================================

/// Computes rows for a statement that matched a responder's needle.
pub type Responder = Box<dyn Fn(&str, &Params) -> Vec<Row> + Send>;

#[derive(Default)]
pub struct MockState {
    pub query_calls: usize,
    pub execute_calls: usize,
    pub queries: Vec<String>,
    pub statements: Vec<(String, Params)>,
    /// Unprefixed rows per table, answered to `SELECT ... FROM <table> AS <scope>`
    pub tables: BTreeMap<String, Vec<Vec<(String, Value)>>>,
    /// Later responders take precedence
    pub responders: Vec<(String, Responder)>,
    pub inserts: i64,
    /// Statements containing this text fail
    pub fail_on: Option<String>,
}

#[derive(Clone, Default)]
pub struct MockConnection {
    pub state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a row in `table`; values are given as the database returns them.
    pub fn insert_row(&self, table: &str, row: &[(&str, Option<&str>)]) {
        let row = row
            .iter()
            .map(|(column, value)| {
                (
                    (*column).to_string(),
                    value.map_or(Value::Null, Value::from),
                )
            })
            .collect();
        self.lock().tables.entry(table.to_string()).or_default().push(row);
    }

    /// Answer statements containing `needle` with `responder`.
    pub fn respond<F>(&self, needle: &str, responder: F)
    where
        F: Fn(&str, &Params) -> Vec<Row> + Send + 'static,
    {
        self.lock()
            .responders
            .push((needle.to_string(), Box::new(responder)));
    }

    pub fn fail_on(&self, needle: &str) {
        self.lock().fail_on = Some(needle.to_string());
    }

    pub fn query_calls(&self) -> usize {
        self.lock().query_calls
    }

    pub fn execute_calls(&self) -> usize {
        self.lock().execute_calls
    }

    pub fn last_query(&self) -> Option<String> {
        self.lock().queries.last().cloned()
    }

    pub fn statements(&self) -> Vec<(String, Params)> {
        self.lock().statements.clone()
    }

    pub fn statement_sql(&self) -> Vec<String> {
        self.lock()
            .statements
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

impl Connection for MockConnection {
    fn id(&self) -> &str {
        "mock"
    }

    fn driver(&self) -> &str {
        "mysql"
    }

    fn query(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        let mut state = self.lock();
        state.query_calls += 1;
        state.queries.push(sql.to_string());

        if let Some((_, responder)) = state
            .responders
            .iter()
            .rev()
            .find(|(needle, _)| sql.contains(needle.as_str()))
        {
            return Ok(responder(sql, params));
        }

        let Some((table, scope)) = root_of(sql) else {
            return Ok(Vec::new());
        };
        let filters = root_filters(sql, &scope, params);
        let rows = state
            .tables
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| {
                        filters.iter().all(|(column, expected)| {
                            row.iter()
                                .find(|(name, _)| name == column)
                                .is_some_and(|(_, value)| value.as_str() == Some(expected.as_str()))
                        })
                    })
                    .map(|row| scoped_row(&scope, row))
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    fn execute(&self, sql: &str, params: &Params) -> Result<u64> {
        let mut state = self.lock();
        state.execute_calls += 1;
        if state.fail_on.as_deref().is_some_and(|needle| sql.contains(needle)) {
            return Err(Error::Database(DatabaseError::call_failed(
                "execute",
                "mock",
                Some(sql),
                std::io::Error::other("statement rejected"),
            )));
        }
        if sql.starts_with("INSERT INTO") {
            state.inserts += 1;
        }
        state.statements.push((sql.to_string(), params.clone()));
        Ok(1)
    }

    fn last_insert_id(&self, _sequence: Option<&str>) -> Result<Option<String>> {
        Ok(Some((100 + self.lock().inserts).to_string()))
    }
}

/// Root table and alias of a `SELECT ... FROM <table> AS <scope>`.
pub fn root_of(sql: &str) -> Option<(String, String)> {
    let (_, from) = sql.split_once(" FROM ")?;
    let mut tokens = from.split_whitespace();
    let table = tokens.next()?;
    (tokens.next()? == "AS").then_some(())?;
    let scope = tokens.next()?;
    Some((table.to_string(), scope.to_string()))
}

/// Every alias given to `table`, in order of appearance.
pub fn scopes_of(sql: &str, table: &str) -> Vec<String> {
    let marker = format!("{} AS ", table);
    sql.match_indices(&marker)
        .filter_map(|(at, _)| {
            sql[at + marker.len()..]
                .split_whitespace()
                .next()
                .map(str::to_string)
        })
        .collect()
}

/// `column = :param` conditions on the root alias, with the bound text.
fn root_filters(sql: &str, scope: &str, params: &Params) -> Vec<(String, String)> {
    let Some((_, criteria)) = sql.split_once(" WHERE ") else {
        return Vec::new();
    };
    let prefix = format!("{}.", scope);
    criteria
        .split(" AND ")
        .filter_map(|condition| {
            let (left, right) = condition.split_once(" = ")?;
            let column = left.trim_start_matches('(').strip_prefix(&prefix)?;
            let value = params.get(right.trim_end_matches(')'))?;
            Some((column.to_string(), value.as_str().unwrap_or_default().to_string()))
        })
        .collect()
}

/// Prefix every column with `<scope>__`, the way compiled queries alias them.
pub fn scoped_row(scope: &str, row: &[(String, Value)]) -> Row {
    Row::from_pairs(
        row.iter()
            .map(|(column, value)| (format!("{}__{}", scope, column), value.clone())),
    )
}

pub fn text(value: &str) -> Value {
    Value::from(value)
}

// ============================================================================
// Entity fixtures
// ============================================================================

/// `users`: string key, many trips, many cars.
#[derive(Debug, Default)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub state: EntityState,
}

impl User {
    pub fn new(id: &str, email: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            email: email.to_string(),
            name: name.to_string(),
            state: EntityState::default(),
        }
    }
}

impl Entity for User {
    const CLASS: &'static str = "User";

    fn declare() -> Declaration {
        Declaration::new()
            .property(PropertyDef::string("id", 32).primary())
            .property(PropertyDef::string("email", 128).unique(None))
            .property(PropertyDef::string("name", 64))
            .has_many::<Trip>()
            .has_many::<Car>()
    }

    fn blank() -> Self {
        Self::default()
    }

    fn read(&self, property: &str) -> Option<Value> {
        match property {
            "id" => Some(Value::from(self.id.as_str())),
            "email" => Some(Value::from(self.email.as_str())),
            "name" => Some(Value::from(self.name.as_str())),
            _ => None,
        }
    }

    fn write(&mut self, property: &str, value: Value) -> Result<bool> {
        match property {
            "id" => self.id = value.try_into()?,
            "email" => self.email = value.try_into()?,
            "name" => self.name = value.try_into()?,
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

/// `trips`: auto-increment key, many users.
#[derive(Debug, Default)]
pub struct Trip {
    pub id: i64,
    pub title: String,
    pub state: EntityState,
}

impl Trip {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }
}

impl Entity for Trip {
    const CLASS: &'static str = "Trip";

    fn declare() -> Declaration {
        Declaration::new()
            .property(
                PropertyDef::int("id", IntSize::Int32)
                    .unsigned()
                    .primary()
                    .auto_increment(),
            )
            .property(PropertyDef::string("title", 64))
            .has_many::<User>()
    }

    fn blank() -> Self {
        Self::default()
    }

    fn read(&self, property: &str) -> Option<Value> {
        match property {
            "id" => Some(Value::Int(self.id)),
            "title" => Some(Value::from(self.title.as_str())),
            _ => None,
        }
    }

    fn write(&mut self, property: &str, value: Value) -> Result<bool> {
        match property {
            "id" => self.id = value.try_into()?,
            "title" => self.title = value.try_into()?,
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

/// `cars`: stores its owner's key in `user_id`.
#[derive(Debug, Default)]
pub struct Car {
    pub plate: String,
    pub model: String,
    pub state: EntityState,
}

impl Car {
    pub fn new(plate: &str, model: &str) -> Self {
        Self {
            plate: plate.to_string(),
            model: model.to_string(),
            state: EntityState::default(),
        }
    }
}

impl Entity for Car {
    const CLASS: &'static str = "Car";

    fn declare() -> Declaration {
        Declaration::new()
            .property(PropertyDef::string("plate", 16).primary())
            .property(PropertyDef::string("model", 32))
            .has_one::<User>()
    }

    fn blank() -> Self {
        Self::default()
    }

    fn read(&self, property: &str) -> Option<Value> {
        match property {
            "plate" => Some(Value::from(self.plate.as_str())),
            "model" => Some(Value::from(self.model.as_str())),
            _ => None,
        }
    }

    fn write(&mut self, property: &str, value: Value) -> Result<bool> {
        match property {
            "plate" => self.plate = value.try_into()?,
            "model" => self.model = value.try_into()?,
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

/// `tasks`: composite key, optional parent task for self joins.
#[derive(Debug, Default)]
pub struct Task {
    pub board: String,
    pub number: i64,
    pub title: String,
    pub parent: Option<i64>,
    pub state: EntityState,
}

impl Entity for Task {
    const CLASS: &'static str = "Task";

    fn declare() -> Declaration {
        Declaration::new()
            .property(PropertyDef::string("board", 16).primary())
            .property(PropertyDef::int("number", IntSize::Int32).unsigned().primary())
            .property(PropertyDef::string("title", 64))
            .property(PropertyDef::int("parent", IntSize::Int32).unsigned().nullable())
    }

    fn blank() -> Self {
        Self::default()
    }

    fn read(&self, property: &str) -> Option<Value> {
        match property {
            "board" => Some(Value::from(self.board.as_str())),
            "number" => Some(Value::Int(self.number)),
            "title" => Some(Value::from(self.title.as_str())),
            "parent" => Some(self.parent.map_or(Value::Null, Value::Int)),
            _ => None,
        }
    }

    fn write(&mut self, property: &str, value: Value) -> Result<bool> {
        match property {
            "board" => self.board = value.try_into()?,
            "number" => self.number = value.try_into()?,
            "title" => self.title = value.try_into()?,
            "parent" => {
                self.parent = if value.is_null() {
                    None
                } else {
                    Some(value.try_into()?)
                };
            }
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
