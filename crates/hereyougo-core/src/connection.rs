//! Database connection boundary.
//!
//! The entity layer talks to exactly one synchronous connection handle.
//! Statements use named placeholders (`:name`) bound from a [`Params`] map.
//! Drivers report failures as [`Error::Database`](crate::Error::Database)
//! built with [`DatabaseError::call_failed`](crate::error::DatabaseError::call_failed).

use crate::error::Result;
use crate::row::Row;
use crate::value::Value;
use std::collections::BTreeMap;

/// Named statement parameters, keyed with their leading `:`.
pub type Params = BTreeMap<String, Value>;

/// A synchronous database handle.
pub trait Connection {
    /// Connection identifier, used as error target (`dbi#<id>`).
    fn id(&self) -> &str;

    /// Driver name as it appears in the DSN prefix (`mysql`, ...).
    fn driver(&self) -> &str;

    /// Run a statement returning rows.
    fn query(&self, sql: &str, params: &Params) -> Result<Vec<Row>>;

    /// Run a statement returning the number of affected rows.
    fn execute(&self, sql: &str, params: &Params) -> Result<u64>;

    /// Most recent auto-increment value, optionally for a named sequence.
    fn last_insert_id(&self, sequence: Option<&str>) -> Result<Option<String>>;

    /// Quote a string literal for inclusion in DDL.
    fn quote(&self, text: &str) -> String {
        format!("'{}'", text.replace('\\', "\\\\").replace('\'', "''"))
    }
}

impl<C: Connection + ?Sized> Connection for &C {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn driver(&self) -> &str {
        (**self).driver()
    }

    fn query(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        (**self).query(sql, params)
    }

    fn execute(&self, sql: &str, params: &Params) -> Result<u64> {
        (**self).execute(sql, params)
    }

    fn last_insert_id(&self, sequence: Option<&str>) -> Result<Option<String>> {
        (**self).last_insert_id(sequence)
    }

    fn quote(&self, text: &str) -> String {
        (**self).quote(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Null;

    impl Connection for Null {
        fn id(&self) -> &str {
            "local"
        }

        fn driver(&self) -> &str {
            "mysql"
        }

        fn query(&self, _sql: &str, _params: &Params) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }

        fn execute(&self, _sql: &str, _params: &Params) -> Result<u64> {
            Ok(0)
        }

        fn last_insert_id(&self, _sequence: Option<&str>) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[test]
    fn default_quote_escapes() {
        assert_eq!(Null.quote("it's"), "'it''s'");
        assert_eq!(Null.quote("a\\b"), "'a\\\\b'");
    }

    #[test]
    fn reference_forwards() {
        let conn = &Null;
        assert_eq!(Connection::id(&conn), "local");
        assert!(conn.query("SELECT 1", &Params::new()).unwrap().is_empty());
    }
}
