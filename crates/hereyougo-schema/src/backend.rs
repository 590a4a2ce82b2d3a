//! Database specific introspection and DDL.

use crate::mysql::MysqlBackend;
use hereyougo_core::{Connection, Error, Property, Result};

/// Schema operations the updater needs from a database.
///
/// Methods inspect the live schema through `conn` and return the DDL
/// statements to apply; they never execute DDL themselves.
pub trait SchemaBackend {
    /// Driver name this backend serves.
    fn driver(&self) -> &'static str;

    fn table_exists(&self, conn: &dyn Connection, table: &str) -> Result<bool>;

    /// Statement bringing one live column in line with `property`, `None`
    /// when it already matches.
    fn check_column(
        &self,
        conn: &dyn Connection,
        table: &str,
        property: &Property,
    ) -> Result<Option<String>>;

    /// Statements fixing the primary key and declared indexes.
    fn check_constraints(
        &self,
        conn: &dyn Connection,
        table: &str,
        map: &[&Property],
    ) -> Result<Vec<String>>;

    fn create_table(&self, conn: &dyn Connection, table: &str, map: &[&Property]) -> Result<String>;
}

/// Backend for a configured driver name.
pub fn backend_for(driver: &str) -> Result<Box<dyn SchemaBackend>> {
    match driver {
        "mysql" => Ok(Box::new(MysqlBackend::new())),
        other => Err(Error::broken(other, "unknown backend type")),
    }
}
