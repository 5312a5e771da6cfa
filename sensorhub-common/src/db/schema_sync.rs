//! Column-level schema reconciliation
//!
//! Fixed tables describe their columns through [`TableSchema`]; on startup
//! [`sync_table`] adds whatever an older database file is missing. The
//! reading-table migrator reuses [`ColumnDefinition`] and [`table_columns`]
//! for measurement columns, so the helpers here accept any SQLite executor
//! (pool, pooled connection, or an open transaction).

use crate::Result;
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use tracing::{debug, info, warn};

/// A column a table is expected to carry
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub sql_type: String,
    pub not_null: bool,
    pub primary_key: bool,
    /// Literal SQL default, already quoted where needed
    pub default_sql: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
            primary_key: false,
            default_sql: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn default(mut self, value: impl Into<String>) -> Self {
        self.default_sql = Some(value.into());
        self
    }

    /// `ALTER TABLE ... ADD COLUMN` statement for this column
    ///
    /// SQLite rejects added PRIMARY KEY columns and NOT NULL columns without a
    /// default, so those constraints are left off the statement.
    pub fn add_column_sql(&self, table: &str) -> String {
        let mut sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_ident(table),
            quote_ident(&self.name),
            self.sql_type
        );

        if let Some(default) = &self.default_sql {
            if self.not_null {
                sql.push_str(" NOT NULL");
            }
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }

        sql
    }

    /// Constraints `add_column_sql` cannot express
    fn lost_constraints(&self) -> Vec<&'static str> {
        let mut lost = Vec::new();
        if self.primary_key {
            lost.push("PRIMARY KEY");
        }
        if self.not_null && self.default_sql.is_none() {
            lost.push("NOT NULL");
        }
        lost
    }
}

/// Double-quote an identifier for interpolation into SQL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// One row of `PRAGMA table_info`
#[derive(Debug, Clone)]
pub struct ActualColumn {
    pub name: String,
    pub type_name: String,
    pub not_null: bool,
}

/// SQLite column affinity, derived from a declared type name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Integer,
    Text,
    Blob,
    Real,
    Numeric,
}

impl Affinity {
    /// Apply SQLite's affinity rules in their documented order
    pub fn of(declared: &str) -> Self {
        let t = declared.to_ascii_uppercase();
        if t.contains("INT") {
            Affinity::Integer
        } else if t.contains("CHAR") || t.contains("CLOB") || t.contains("TEXT") {
            Affinity::Text
        } else if t.is_empty() || t.contains("BLOB") {
            Affinity::Blob
        } else if t.contains("REAL") || t.contains("FLOA") || t.contains("DOUB") {
            Affinity::Real
        } else {
            Affinity::Numeric
        }
    }
}

/// True when two declared types store values the same way
pub fn same_affinity(a: &str, b: &str) -> bool {
    Affinity::of(a) == Affinity::of(b)
}

/// Columns of `table` in declaration order; empty if the table is missing
pub async fn table_columns<'c, E>(executor: E, table: &str) -> Result<Vec<ActualColumn>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let sql = format!("PRAGMA table_info({})", quote_ident(table));
    let rows = sqlx::query(&sql).fetch_all(executor).await?;

    let mut indexed = rows
        .iter()
        .map(|row| {
            Ok((
                row.try_get::<i64, _>("cid")?,
                ActualColumn {
                    name: row.try_get("name")?,
                    type_name: row.try_get("type")?,
                    not_null: row.try_get::<i64, _>("notnull")? != 0,
                },
            ))
        })
        .collect::<Result<Vec<(i64, ActualColumn)>>>()?;
    indexed.sort_by_key(|(cid, _)| *cid);

    Ok(indexed.into_iter().map(|(_, column)| column).collect())
}

/// Fixed table whose columns are reconciled on startup
pub trait TableSchema {
    fn table_name() -> &'static str;

    fn expected_columns() -> Vec<ColumnDefinition>;
}

/// Difference between a declared column and the database
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnDrift {
    Missing(ColumnDefinition),
    WrongType { column: String, declared: String, found: String },
    Nullable { column: String },
}

/// Compare declared columns against introspected ones
pub fn column_drift(expected: &[ColumnDefinition], actual: &[ActualColumn]) -> Vec<ColumnDrift> {
    expected
        .iter()
        .flat_map(|want| match actual.iter().find(|have| have.name == want.name) {
            None => vec![ColumnDrift::Missing(want.clone())],
            Some(have) => {
                let mut found = Vec::new();
                if !same_affinity(&want.sql_type, &have.type_name) {
                    found.push(ColumnDrift::WrongType {
                        column: want.name.clone(),
                        declared: want.sql_type.clone(),
                        found: have.type_name.clone(),
                    });
                }
                // PRAGMA reports primary keys as nullable unless declared otherwise
                if want.not_null && !want.primary_key && !have.not_null {
                    found.push(ColumnDrift::Nullable { column: want.name.clone() });
                }
                found
            }
        })
        .collect()
}

/// Add any declared column the table lacks; report drift that needs a manual fix
///
/// Tables that do not exist yet are skipped; CREATE TABLE owns them.
pub async fn sync_table<T: TableSchema>(pool: &SqlitePool) -> Result<usize> {
    let table = T::table_name();
    let actual = table_columns(pool, table).await?;
    if actual.is_empty() {
        warn!("Schema sync skipped '{}': table not created", table);
        return Ok(0);
    }

    let mut added = 0;
    for drift in column_drift(&T::expected_columns(), &actual) {
        match drift {
            ColumnDrift::Missing(column) => {
                if add_column(pool, table, &column).await? {
                    added += 1;
                }
            }
            ColumnDrift::WrongType { column, declared, found } => warn!(
                "{}.{} is declared {} but stored as {}; leaving as is",
                table, column, declared, found
            ),
            ColumnDrift::Nullable { column } => {
                warn!("{}.{} should be NOT NULL; leaving as is", table, column)
            }
        }
    }

    if added == 0 {
        debug!("Schema sync: '{}' up to date", table);
    }
    Ok(added)
}

/// Run `ALTER TABLE ADD COLUMN`; returns false if the column already existed
pub async fn add_column<'c, E>(executor: E, table: &str, column: &ColumnDefinition) -> Result<bool>
where
    E: Executor<'c, Database = Sqlite>,
{
    for constraint in column.lost_constraints() {
        warn!("{}.{} added without {}", table, column.name, constraint);
    }

    match sqlx::query(&column.add_column_sql(table)).execute(executor).await {
        Ok(_) => {
            info!("Added column {}.{} ({})", table, column.name, column.sql_type);
            Ok(true)
        }
        Err(sqlx::Error::Database(e)) if e.message().contains("duplicate column") => Ok(false),
        Err(e) => Err(e.into()),
    }
}
