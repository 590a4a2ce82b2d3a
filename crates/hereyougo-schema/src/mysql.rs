//! MySQL schema backend.
//!
//! Live state comes from `information_schema.TABLES`, `SHOW COLUMNS` and
//! `SHOW INDEX`. Type strings are normalized before comparison (case,
//! whitespace, integer display width) so that a second run over an
//! up-to-date schema issues nothing.

use crate::backend::SchemaBackend;
use hereyougo_core::{Connection, DataType, IntSize, Params, Property, Result, Row, Value};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Declared shape of one index: columns in declaration order, uniqueness.
type IndexShape<'a> = (Vec<&'a str>, bool);

/// An index as reported by `SHOW INDEX`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveIndex {
    pub columns: Vec<String>,
    pub unique: bool,
}

/// MySQL / MariaDB backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlBackend;

impl MysqlBackend {
    pub fn new() -> Self {
        Self
    }

    /// SQL type of a property.
    pub fn column_type(property: &Property) -> String {
        let unsigned = if property.unsigned() { " UNSIGNED" } else { "" };
        match property.data_type() {
            DataType::Bool => "TINYINT(1) UNSIGNED".to_string(),
            DataType::Int(size) => format!("{}{}", int_type(size), unsigned),
            DataType::Decimal { precision, scale } => {
                format!("DECIMAL({},{}){}", precision, scale, unsigned)
            }
            DataType::Float => "FLOAT".to_string(),
            DataType::Double => "DOUBLE".to_string(),
            DataType::Date => "DATE".to_string(),
            DataType::DateTime => "DATETIME".to_string(),
            DataType::Time => "TIME".to_string(),
            DataType::String(size) => format!("VARCHAR({})", size),
            DataType::Text => "TEXT".to_string(),
            DataType::LongText => "LONGTEXT".to_string(),
        }
    }

    /// Type, nullability, default and auto increment flag.
    pub fn column_definition(conn: &dyn Connection, property: &Property) -> Result<String> {
        let mut sql = Self::column_type(property);
        sql.push_str(if property.nullable() { " NULL" } else { " NOT NULL" });
        if let Some(default) = expected_default(property)? {
            let literal = match property.data_type() {
                DataType::Bool
                | DataType::Int(_)
                | DataType::Decimal { .. }
                | DataType::Float
                | DataType::Double => default,
                _ => conn.quote(&default),
            };
            sql.push_str(" DEFAULT ");
            sql.push_str(&literal);
        }
        if property.auto_increment() {
            sql.push_str(" AUTO_INCREMENT");
        }
        Ok(sql)
    }

    /// Every index of a table by name, `PRIMARY` included.
    pub fn indexes(&self, conn: &dyn Connection, table: &str) -> Result<BTreeMap<String, LiveIndex>> {
        let sql = format!("SHOW INDEX FROM {}", quote_identifier(table));
        let rows = conn.query(&sql, &Params::new())?;

        let mut indexes: BTreeMap<String, LiveIndex> = BTreeMap::new();
        for row in &rows {
            let (Some(name), Some(column)) = (row.get_text("Key_name"), row.get_text("Column_name"))
            else {
                continue;
            };
            let non_unique = row.get_named::<i64>("Non_unique").unwrap_or(1);
            let index = indexes.entry(name).or_insert_with(|| LiveIndex {
                columns: Vec::new(),
                unique: non_unique == 0,
            });
            index.columns.push(column);
        }
        Ok(indexes)
    }

    fn primary_statements(
        &self,
        conn: &dyn Connection,
        table: &str,
        map: &[&Property],
        live: &[String],
    ) -> Result<Vec<String>> {
        let required: Vec<&str> = map
            .iter()
            .filter(|p| p.primary())
            .map(|p| p.column())
            .collect();
        if live.iter().map(String::as_str).eq(required.iter().copied()) || required.is_empty() {
            return Ok(Vec::new());
        }

        let mut statements = Vec::new();
        for column in live.iter().filter(|c| !required.contains(&c.as_str())) {
            match map.iter().find(|p| p.column() == column.as_str()) {
                Some(property) => statements.push(format!(
                    "ALTER TABLE {} MODIFY COLUMN {} {}",
                    quote_identifier(table),
                    quote_identifier(column),
                    Self::column_definition(conn, property)?
                )),
                None => tracing::warn!(
                    table = table,
                    column = %column,
                    "Undeclared primary key column left in place"
                ),
            }
        }

        let columns = quote_list(&required);
        statements.push(if live.is_empty() {
            format!(
                "ALTER TABLE {} ADD PRIMARY KEY ({})",
                quote_identifier(table),
                columns
            )
        } else {
            format!(
                "ALTER TABLE {} DROP PRIMARY KEY, ADD PRIMARY KEY ({})",
                quote_identifier(table),
                columns
            )
        });
        Ok(statements)
    }
}

impl SchemaBackend for MysqlBackend {
    fn driver(&self) -> &'static str {
        "mysql"
    }

    fn table_exists(&self, conn: &dyn Connection, table: &str) -> Result<bool> {
        let sql = "SELECT COUNT(*) AS found FROM information_schema.TABLES \
                   WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = :table";
        let params = Params::from([(":table".to_string(), Value::from(table))]);
        let rows = conn.query(sql, &params)?;
        let found = match rows.first() {
            Some(row) => row.get_named::<i64>("found")?,
            None => 0,
        };
        Ok(found > 0)
    }

    fn check_column(
        &self,
        conn: &dyn Connection,
        table: &str,
        property: &Property,
    ) -> Result<Option<String>> {
        let sql = format!(
            "SHOW COLUMNS FROM {} WHERE Field = :column",
            quote_identifier(table)
        );
        let params = Params::from([(":column".to_string(), Value::from(property.column()))]);
        let rows = conn.query(&sql, &params)?;
        let definition = Self::column_definition(conn, property)?;

        let Some(live) = rows.first() else {
            return Ok(Some(format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote_identifier(table),
                quote_identifier(property.column()),
                definition
            )));
        };

        let drift = column_drift(live, property)?;
        if drift.is_empty() {
            return Ok(None);
        }
        tracing::debug!(
            table = table,
            column = property.column(),
            drift = ?drift,
            "Column differs from declaration"
        );
        Ok(Some(format!(
            "ALTER TABLE {} MODIFY COLUMN {} {}",
            quote_identifier(table),
            quote_identifier(property.column()),
            definition
        )))
    }

    fn check_constraints(
        &self,
        conn: &dyn Connection,
        table: &str,
        map: &[&Property],
    ) -> Result<Vec<String>> {
        let live = self.indexes(conn, table)?;
        let live_primary = live
            .get("PRIMARY")
            .map(|index| index.columns.clone())
            .unwrap_or_default();
        let mut statements = self.primary_statements(conn, table, map, &live_primary)?;

        let required = declared_indexes(map);
        for (name, (columns, unique)) in &required {
            match live.get(*name) {
                Some(found) if same_columns(&found.columns, columns) && found.unique == *unique => {
                    continue;
                }
                Some(_) => statements.push(format!(
                    "ALTER TABLE {} DROP INDEX {}",
                    quote_identifier(table),
                    quote_identifier(name)
                )),
                None => {}
            }
            statements.push(format!(
                "ALTER TABLE {} ADD {} {} ({})",
                quote_identifier(table),
                if *unique { "UNIQUE" } else { "INDEX" },
                quote_identifier(name),
                quote_list(columns)
            ));
        }

        for name in live.keys() {
            if name != "PRIMARY" && !required.contains_key(name.as_str()) {
                tracing::warn!(table = table, index = %name, "Undeclared index left in place");
            }
        }
        Ok(statements)
    }

    fn create_table(&self, conn: &dyn Connection, table: &str, map: &[&Property]) -> Result<String> {
        let mut definitions = Vec::with_capacity(map.len() + 1);
        for property in map {
            definitions.push(format!(
                "{} {}",
                quote_identifier(property.column()),
                Self::column_definition(conn, property)?
            ));
        }

        let primary: Vec<&str> = map
            .iter()
            .filter(|p| p.primary())
            .map(|p| p.column())
            .collect();
        if !primary.is_empty() {
            definitions.push(format!("PRIMARY KEY ({})", quote_list(&primary)));
        }

        for (name, (columns, unique)) in declared_indexes(map) {
            definitions.push(format!(
                "{} {} ({})",
                if unique { "UNIQUE" } else { "INDEX" },
                quote_identifier(name),
                quote_list(&columns)
            ));
        }

        Ok(format!(
            "CREATE TABLE {} ({})",
            quote_identifier(table),
            definitions.join(", ")
        ))
    }
}

fn int_type(size: IntSize) -> &'static str {
    match size {
        IntSize::Int8 => "TINYINT",
        IntSize::Int16 => "SMALLINT",
        IntSize::Int24 => "MEDIUMINT",
        IntSize::Int32 => "INT",
        IntSize::Int64 => "BIGINT",
    }
}

/// Stored default as MySQL reports it; TEXT columns take none.
fn expected_default(property: &Property) -> Result<Option<String>> {
    match property.data_type() {
        DataType::Text | DataType::LongText => Ok(None),
        _ => property.storage_default(),
    }
}

/// Aspects of a live `SHOW COLUMNS` row that differ from `property`.
fn column_drift(live: &Row, property: &Property) -> Result<Vec<&'static str>> {
    let mut drift = Vec::new();

    let live_type = live.get_text("Type").unwrap_or_default();
    if normalize_type(&live_type) != normalize_type(&MysqlBackend::column_type(property)) {
        drift.push("type");
    }

    let live_nullable = live.get_text("Null").is_some_and(|n| n.eq_ignore_ascii_case("YES"));
    if live_nullable != property.nullable() {
        drift.push("null");
    }

    if live.get_text("Default") != expected_default(property)? {
        drift.push("default");
    }

    let live_auto_increment = live
        .get_text("Extra")
        .is_some_and(|extra| extra.to_lowercase().contains("auto_increment"));
    if live_auto_increment != property.auto_increment() {
        drift.push("auto_increment");
    }

    Ok(drift)
}

fn int_display_width() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\b(tinyint|smallint|mediumint|int|bigint)\s*\(\d+\)").ok())
        .as_ref()
}

/// Lowercase, single-spaced, without integer display width.
pub fn normalize_type(sql_type: &str) -> String {
    let collapsed = sql_type
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    match int_display_width() {
        Some(pattern) => pattern.replace_all(&collapsed, "$1").into_owned(),
        None => collapsed,
    }
}

/// Index name -> (columns, unique) over every property of a table.
fn declared_indexes<'a>(map: &[&'a Property]) -> BTreeMap<&'a str, IndexShape<'a>> {
    let mut indexes: BTreeMap<&str, IndexShape<'_>> = BTreeMap::new();
    for &property in map {
        for (name, unique) in property.indexes() {
            let entry = indexes.entry(name.as_str()).or_default();
            entry.0.push(property.column());
            entry.1 |= *unique;
        }
    }
    indexes
}

fn same_columns(live: &[String], declared: &[&str]) -> bool {
    let mut live: Vec<&str> = live.iter().map(String::as_str).collect();
    let mut declared = declared.to_vec();
    live.sort_unstable();
    declared.sort_unstable();
    live == declared
}

pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn quote_list(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use hereyougo_core::{Converter, PropertyDef};
    use std::sync::Arc;

    fn no_converter(_name: &str) -> Option<Arc<dyn Converter>> {
        None
    }

    fn build(def: PropertyDef) -> Property {
        Property::build("User", def, &no_converter).unwrap()
    }

    /// Answers `SHOW COLUMNS` / `SHOW INDEX` with canned rows.
    struct Live {
        columns: Vec<Row>,
        indexes: Vec<Row>,
    }

    impl Connection for Live {
        fn id(&self) -> &str {
            "live"
        }

        fn driver(&self) -> &str {
            "mysql"
        }

        fn query(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
            if sql.starts_with("SHOW COLUMNS") {
                let wanted = params.get(":column").and_then(Value::as_str).unwrap_or("");
                return Ok(self
                    .columns
                    .iter()
                    .filter(|row| row.get_text("Field").as_deref() == Some(wanted))
                    .cloned()
                    .collect());
            }
            if sql.starts_with("SHOW INDEX") {
                return Ok(self.indexes.clone());
            }
            Ok(Vec::new())
        }

        fn execute(&self, _sql: &str, _params: &Params) -> Result<u64> {
            Ok(0)
        }

        fn last_insert_id(&self, _sequence: Option<&str>) -> Result<Option<String>> {
            Ok(None)
        }
    }

    fn column(field: &str, sql_type: &str, null: &str, default: Option<&str>, extra: &str) -> Row {
        Row::from_pairs([
            ("Field", Value::from(field)),
            ("Type", Value::from(sql_type)),
            ("Null", Value::from(null)),
            ("Key", Value::from("")),
            ("Default", default.map_or(Value::Null, Value::from)),
            ("Extra", Value::from(extra)),
        ])
    }

    fn index(name: &str, column: &str, non_unique: &str) -> Row {
        Row::from_pairs([
            ("Key_name", name),
            ("Column_name", column),
            ("Non_unique", non_unique),
        ])
    }

    #[test]
    fn type_mapping() {
        assert_eq!(MysqlBackend::column_type(&build(PropertyDef::bool("ok"))), "TINYINT(1) UNSIGNED");
        assert_eq!(
            MysqlBackend::column_type(&build(PropertyDef::int("n", IntSize::Int24).unsigned())),
            "MEDIUMINT UNSIGNED"
        );
        assert_eq!(
            MysqlBackend::column_type(&build(PropertyDef::decimal("cost", 10, 2))),
            "DECIMAL(10,2)"
        );
        assert_eq!(
            MysqlBackend::column_type(&build(PropertyDef::string("email", 128))),
            "VARCHAR(128)"
        );
        assert_eq!(MysqlBackend::column_type(&build(PropertyDef::long_text("body"))), "LONGTEXT");
    }

    #[test]
    fn type_normalization() {
        assert_eq!(normalize_type("INT(11) UNSIGNED"), "int unsigned");
        assert_eq!(normalize_type("int  unsigned"), "int unsigned");
        assert_eq!(normalize_type("tinyint(1) unsigned"), normalize_type("TINYINT(1) UNSIGNED"));
        assert_eq!(normalize_type("varchar(64)"), "varchar(64)");
        assert_eq!(normalize_type("decimal(10,2)"), "decimal(10,2)");
    }

    #[test]
    fn definitions_quote_temporal_and_text_defaults() {
        let conn = Live {
            columns: Vec::new(),
            indexes: Vec::new(),
        };
        let name = build(PropertyDef::string("name", 64));
        assert_eq!(
            MysqlBackend::column_definition(&conn, &name).unwrap(),
            "VARCHAR(64) NOT NULL DEFAULT ''"
        );
        let id = build(PropertyDef::int("id", IntSize::Int32).unsigned().primary().auto_increment());
        assert_eq!(
            MysqlBackend::column_definition(&conn, &id).unwrap(),
            "INT UNSIGNED NOT NULL AUTO_INCREMENT"
        );
        let body = build(PropertyDef::text("body"));
        assert_eq!(MysqlBackend::column_definition(&conn, &body).unwrap(), "TEXT NOT NULL");
        let ends = build(PropertyDef::datetime("ends").nullable());
        assert_eq!(MysqlBackend::column_definition(&conn, &ends).unwrap(), "DATETIME NULL");
    }

    #[test]
    fn column_checks() {
        let conn = Live {
            columns: vec![
                column("email", "varchar(64)", "NO", Some(""), ""),
                column("id", "int(10) unsigned", "NO", None, "auto_increment"),
            ],
            indexes: Vec::new(),
        };
        let backend = MysqlBackend::new();

        let email = build(PropertyDef::string("email", 128));
        assert_eq!(
            backend.check_column(&conn, "users", &email).unwrap().as_deref(),
            Some("ALTER TABLE `users` MODIFY COLUMN `email` VARCHAR(128) NOT NULL DEFAULT ''")
        );

        let id = build(PropertyDef::int("id", IntSize::Int32).unsigned().primary().auto_increment());
        assert_eq!(backend.check_column(&conn, "users", &id).unwrap(), None);

        let name = build(PropertyDef::string("name", 64).nullable());
        assert_eq!(
            backend.check_column(&conn, "users", &name).unwrap().as_deref(),
            Some("ALTER TABLE `users` ADD COLUMN `name` VARCHAR(64) NULL")
        );
    }

    #[test]
    fn constraints_are_left_alone_when_matching() {
        let conn = Live {
            columns: Vec::new(),
            indexes: vec![
                index("PRIMARY", "id", "0"),
                index("email", "email", "0"),
            ],
        };
        let id = build(PropertyDef::string("id", 32).primary());
        let email = build(PropertyDef::string("email", 128).unique(None));
        let statements = MysqlBackend::new()
            .check_constraints(&conn, "users", &[&id, &email])
            .unwrap();
        assert!(statements.is_empty(), "{:?}", statements);
    }

    #[test]
    fn constraints_are_rebuilt_on_drift() {
        let conn = Live {
            columns: Vec::new(),
            indexes: vec![
                index("PRIMARY", "id", "0"),
                index("email", "email", "1"),
            ],
        };
        let id = build(PropertyDef::string("id", 32).primary());
        let code = build(PropertyDef::string("code", 8).primary());
        let email = build(PropertyDef::string("email", 128).unique(None));
        let statements = MysqlBackend::new()
            .check_constraints(&conn, "users", &[&id, &code, &email])
            .unwrap();
        assert_eq!(
            statements,
            [
                "ALTER TABLE `users` DROP PRIMARY KEY, ADD PRIMARY KEY (`id`, `code`)",
                "ALTER TABLE `users` DROP INDEX `email`",
                "ALTER TABLE `users` ADD UNIQUE `email` (`email`)",
            ]
        );
    }

    #[test]
    fn create_table_statement() {
        let conn = Live {
            columns: Vec::new(),
            indexes: Vec::new(),
        };
        let id = build(PropertyDef::string("id", 32).primary());
        let email = build(PropertyDef::string("email", 128).unique(None));
        let city = build(PropertyDef::string("city", 32).nullable().index(Some("place")));
        let sql = MysqlBackend::new()
            .create_table(&conn, "users", &[&id, &email, &city])
            .unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE `users` (`id` VARCHAR(32) NOT NULL DEFAULT '', \
             `email` VARCHAR(128) NOT NULL DEFAULT '', `city` VARCHAR(32) NULL, \
             PRIMARY KEY (`id`), UNIQUE `email` (`email`), INDEX `place` (`city`))"
        );
    }
}
