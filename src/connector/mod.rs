// src/connector/mod.rs

pub mod sqlite;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

pub use sqlite::SqliteConnector;

/// One result cell rendered as text; `None` is SQL NULL.
pub type Cell = Option<String>;
pub type Rows = Vec<Vec<Cell>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Categorical,
    Numerical,
    Other,
}

impl ColumnKind {
    /// Classify a declared SQL type by SQLite affinity.
    pub fn from_declared_type(declared: &str) -> Self {
        let t = declared.trim().to_ascii_uppercase();
        if t.is_empty() || ["CHAR", "CLOB", "TEXT"].iter().any(|k| t.contains(k)) {
            ColumnKind::Categorical
        } else if ["INT", "REAL", "FLOA", "DOUB", "NUM", "DEC"]
            .iter()
            .any(|k| t.contains(k))
        {
            ColumnKind::Numerical
        } else {
            ColumnKind::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub declared_type: String,
    pub kind: ColumnKind,
    /// A few distinct non-null values.
    pub sample_data: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Column of the owning table.
    pub parent_column: String,
    pub child_table: String,
    pub child_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub columns: Vec<ColumnMeta>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableMeta {
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn columns_of_kind(&self, kind: ColumnKind) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.name.clone())
            .collect()
    }
}

/// Backtick-quote an identifier.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// The SQL side of generation: table metadata plus query execution.
pub trait TableConnector {
    fn db_id(&self) -> &str;
    fn db_path(&self) -> &str;

    fn load_tables(&self) -> Result<Vec<TableMeta>, ConnectorError>;

    /// All `CREATE TABLE` statements, newline separated.
    fn database_schema(&self) -> Result<String, ConnectorError>;
    fn table_schema(&self, table: &str) -> Result<String, ConnectorError>;

    fn run_query(&self, sql: &str) -> Result<Rows, ConnectorError>;
    fn run_query_with_timeout(&self, sql: &str, timeout: Duration) -> Result<Rows, ConnectorError>;

    /// First `limit` rows of two columns.
    fn fetch_pairs(
        &self,
        table: &str,
        col1: &str,
        col2: &str,
        limit: usize,
    ) -> Result<Vec<(Cell, Cell)>, ConnectorError> {
        let sql = format!(
            "SELECT {}, {} FROM {} LIMIT {}",
            quote_ident(col1),
            quote_ident(col2),
            quote_ident(table),
            limit
        );

        Ok(self
            .run_query(&sql)?
            .into_iter()
            .map(|mut row| {
                let b = row.pop().flatten();
                let a = row.pop().flatten();
                (a, b)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affinity_classification() {
        assert_eq!(ColumnKind::from_declared_type("VARCHAR(20)"), ColumnKind::Categorical);
        assert_eq!(ColumnKind::from_declared_type(""), ColumnKind::Categorical);
        assert_eq!(ColumnKind::from_declared_type("bigint"), ColumnKind::Numerical);
        assert_eq!(ColumnKind::from_declared_type("DOUBLE PRECISION"), ColumnKind::Numerical);
        assert_eq!(ColumnKind::from_declared_type("DECIMAL(10,2)"), ColumnKind::Numerical);
        assert_eq!(ColumnKind::from_declared_type("BLOB"), ColumnKind::Other);
        assert_eq!(ColumnKind::from_declared_type("DATE"), ColumnKind::Other);
    }

    #[test]
    fn quote_ident_escapes_backticks() {
        assert_eq!(quote_ident("a`b"), "`a``b`");
    }
}
