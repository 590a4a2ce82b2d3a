//! Schema updater: brings live tables in line with declared models.

use crate::backend::{SchemaBackend, backend_for};
use crate::catalog::EntityCatalog;
use hereyougo_core::{
    Connection, DatabaseConfig, EntityClass, Params, Property, RelationKind, Result,
};
use hereyougo_session::Session;
use std::collections::BTreeSet;

// ============================================================================
// Report
// ============================================================================

/// What a run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaReport {
    /// Executed DDL, in order
    pub statements: Vec<String>,
    /// Tables that did not exist and were created
    pub tables_created: Vec<String>,
}

impl SchemaReport {
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

// ============================================================================
// Updater
// ============================================================================

/// Creates missing tables and columns and fixes drifted columns, primary
/// keys and indexes for every registered class and each many-to-many
/// junction between them.
///
/// Nothing is ever dropped: undeclared columns and indexes are reported
/// through `tracing` and left in place.
///
/// # Example
///
/// ```ignore
/// let catalog = EntityCatalog::new().with::<User>().with::<Trip>();
/// let report = SchemaUpdater::new(config, catalog).run(&mut session)?;
/// for sql in &report.statements {
///     println!("{sql}");
/// }
/// ```
#[derive(Debug, Clone)]
pub struct SchemaUpdater {
    config: DatabaseConfig,
    catalog: EntityCatalog,
}

impl SchemaUpdater {
    pub fn new(config: DatabaseConfig, catalog: EntityCatalog) -> Self {
        Self { config, catalog }
    }

    pub fn catalog(&self) -> &EntityCatalog {
        &self.catalog
    }

    /// Synchronize every registered class, stopping at the first failing
    /// statement.
    #[tracing::instrument(level = "info", skip_all, fields(classes = self.catalog.len()))]
    pub fn run<C: Connection>(&self, session: &mut Session<C>) -> Result<SchemaReport> {
        tracing::info!("Starting schema update");
        let backend = backend_for(&self.config.driver_name()?)?;
        let mut report = SchemaReport::default();

        let mut pairs: BTreeSet<(EntityClass, EntityClass)> = BTreeSet::new();
        for &class in self.catalog.classes() {
            tracing::info!(class = class.name(), "Checking class");
            let model = session.model_of(class)?;
            let conn = session.connection();
            check_table(
                backend.as_ref(),
                conn,
                model.table(),
                &model.data_map(true),
                &mut report,
            )?;

            for (other, _) in model.relations() {
                let other_model = session.model_of(other)?;
                if model.relation_with(&other_model)? == Some(RelationKind::ManyToMany) {
                    pairs.insert(if class <= other { (class, other) } else { (other, class) });
                }
            }
        }

        for (class, other) in pairs {
            let model = session.model_of(class)?;
            let other_model = session.model_of(other)?;
            let junction = model.junction_with(&other_model)?;
            tracing::info!(
                class = class.name(),
                other = other.name(),
                table = junction.table(),
                "Checking junction table"
            );
            let map: Vec<&Property> = junction.properties().collect();
            check_table(
                backend.as_ref(),
                session.connection(),
                junction.table(),
                &map,
                &mut report,
            )?;
        }

        tracing::info!(
            statements = report.statements.len(),
            created = report.tables_created.len(),
            "Schema update finished"
        );
        Ok(report)
    }
}

fn check_table<C: Connection>(
    backend: &dyn SchemaBackend,
    conn: &C,
    table: &str,
    map: &[&Property],
    report: &mut SchemaReport,
) -> Result<()> {
    if !backend.table_exists(conn, table)? {
        tracing::info!(table = table, "Table is missing, creating it");
        let sql = backend.create_table(conn, table, map)?;
        apply(conn, sql, report)?;
        report.tables_created.push(table.to_string());
        return Ok(());
    }

    for property in map {
        tracing::info!(table = table, column = property.column(), "Checking column");
        if let Some(sql) = backend.check_column(conn, table, property)? {
            apply(conn, sql, report)?;
        }
    }

    tracing::info!(table = table, "Checking constraints");
    for sql in backend.check_constraints(conn, table, map)? {
        apply(conn, sql, report)?;
    }
    Ok(())
}

fn apply<C: Connection>(conn: &C, sql: String, report: &mut SchemaReport) -> Result<()> {
    tracing::debug!(sql = %sql, "Applying schema change");
    conn.execute(&sql, &Params::new())?;
    report.statements.push(sql);
    Ok(())
}
