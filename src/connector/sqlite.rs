// src/connector/sqlite.rs
//
// Read-only SQLite connector. Timeouts interrupt the running statement from
// a watchdog thread.

use std::path::Path;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, warn};

use crate::connector::{
    quote_ident, Cell, ColumnKind, ColumnMeta, ForeignKey, Rows, TableConnector, TableMeta,
};
use crate::error::ConnectorError;

const SAMPLE_VALUES: usize = 3;

pub struct SqliteConnector {
    conn: Connection,
    db_id: String,
    db_path: String,
}

impl SqliteConnector {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ConnectorError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let db_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            conn,
            db_id,
            db_path: path.to_string_lossy().into_owned(),
        })
    }

    fn table_names(&self) -> Result<Vec<String>, ConnectorError> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn load_table(&self, name: &str) -> Result<TableMeta, ConnectorError> {
        /* ---------- columns + primary key ---------- */
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(name)))?;
        let infos = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut pk: Vec<(i64, String)> = Vec::new();
        let mut columns = Vec::with_capacity(infos.len());
        for (col, declared_type, pk_pos) in infos {
            if pk_pos > 0 {
                pk.push((pk_pos, col.clone()));
            }
            columns.push(ColumnMeta {
                sample_data: self.sample_values(name, &col)?,
                kind: ColumnKind::from_declared_type(&declared_type),
                declared_type,
                name: col,
            });
        }
        pk.sort();

        /* ---------- foreign keys ---------- */
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA foreign_key_list({})", quote_ident(name)))?;
        let foreign_keys = stmt
            .query_map([], |row| {
                Ok(ForeignKey {
                    child_table: row.get::<_, String>(2)?,
                    parent_column: row.get::<_, String>(3)?,
                    child_column: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TableMeta {
            name: name.to_string(),
            columns,
            primary_key: pk.into_iter().map(|(_, c)| c).collect(),
            foreign_keys,
        })
    }

    fn sample_values(&self, table: &str, column: &str) -> Result<Vec<String>, ConnectorError> {
        let sql = format!(
            "SELECT DISTINCT {col} FROM {tbl} WHERE {col} IS NOT NULL LIMIT {n}",
            col = quote_ident(column),
            tbl = quote_ident(table),
            n = SAMPLE_VALUES,
        );
        Ok(self.run_query(&sql)?.into_iter().flatten().flatten().collect())
    }
}

fn cell(v: ValueRef<'_>) -> Cell {
    match v {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Some(hex::encode(b)),
    }
}

impl TableConnector for SqliteConnector {
    fn db_id(&self) -> &str {
        &self.db_id
    }

    fn db_path(&self) -> &str {
        &self.db_path
    }

    fn load_tables(&self) -> Result<Vec<TableMeta>, ConnectorError> {
        let tables = self
            .table_names()?
            .iter()
            .map(|t| self.load_table(t))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(db = %self.db_id, tables = tables.len(), "tables loaded");
        Ok(tables)
    }

    fn database_schema(&self) -> Result<String, ConnectorError> {
        let mut stmt = self.conn.prepare(
            "SELECT sql FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND sql IS NOT NULL \
             ORDER BY name",
        )?;
        let ddl = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ddl.join(";\n\n"))
    }

    fn table_schema(&self, table: &str) -> Result<String, ConnectorError> {
        let mut stmt = self
            .conn
            .prepare("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
        let mut rows = stmt.query([table])?;
        match rows.next()? {
            Some(row) => Ok(row.get::<_, String>(0)?),
            None => Err(ConnectorError::TableNotFound(table.to_string())),
        }
    }

    fn run_query(&self, sql: &str) -> Result<Rows, ConnectorError> {
        let mut stmt = self.conn.prepare(sql)?;
        let width = stmt.column_count();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get_ref(i).map(cell))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn run_query_with_timeout(&self, sql: &str, timeout: Duration) -> Result<Rows, ConnectorError> {
        let handle = self.conn.get_interrupt_handle();
        let (done_tx, done_rx) = bounded::<()>(1);

        let watchdog = thread::spawn(move || match done_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                handle.interrupt();
                true
            }
            _ => false,
        });

        let result = self.run_query(sql);
        let _ = done_tx.send(());
        let fired = watchdog.join().unwrap_or(false);

        match result {
            Err(_) if fired => {
                warn!(timeout_ms = timeout.as_millis() as u64, "query interrupted");
                Err(ConnectorError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            Err(ConnectorError::Timeout { .. }) => Err(ConnectorError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, SqliteConnector) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("league.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE teams (team_id INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE players (
                 player_id INTEGER PRIMARY KEY,
                 team_id INTEGER REFERENCES teams(team_id),
                 name VARCHAR(40),
                 height REAL,
                 photo BLOB
             );
             INSERT INTO teams VALUES (1, 'Lions'), (2, 'Tigers');
             INSERT INTO players VALUES
                 (1, 1, 'Ann', 1.70, NULL),
                 (2, 1, 'Bob', 1.82, NULL),
                 (3, 2, 'Cid', NULL, NULL),
                 (4, 2, 'Dee', 1.65, NULL);",
        )
        .unwrap();
        drop(conn);

        let c = SqliteConnector::open(&path).unwrap();
        (dir, c)
    }

    #[test]
    fn loads_columns_keys_and_samples() {
        let (_dir, c) = fixture();
        assert_eq!(c.db_id(), "league");

        let tables = c.load_tables().unwrap();
        assert_eq!(tables.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(), ["players", "teams"]);

        let players = &tables[0];
        assert_eq!(players.primary_key, vec!["player_id".to_string()]);
        assert_eq!(
            players.foreign_keys,
            vec![ForeignKey {
                parent_column: "team_id".into(),
                child_table: "teams".into(),
                child_column: "team_id".into(),
            }]
        );

        let name = players.column("name").unwrap();
        assert_eq!(name.kind, ColumnKind::Categorical);
        assert_eq!(name.sample_data.len(), 3);
        assert_eq!(players.column("height").unwrap().kind, ColumnKind::Numerical);
        assert_eq!(players.column("photo").unwrap().kind, ColumnKind::Other);
        assert!(players.column("photo").unwrap().sample_data.is_empty());
    }

    #[test]
    fn missing_column_and_function_are_distinguishable() {
        let (_dir, c) = fixture();
        assert!(matches!(
            c.run_query("SELECT `weight` FROM `players`"),
            Err(ConnectorError::MissingColumn(_))
        ));
        assert!(matches!(
            c.run_query("SELECT bmi(`height`) FROM `players`"),
            Err(ConnectorError::MissingFunction(_))
        ));
    }

    #[test]
    fn connection_is_read_only() {
        let (_dir, c) = fixture();
        assert!(c.run_query("DELETE FROM teams").is_err());
    }

    #[test]
    fn runaway_query_times_out() {
        let (_dir, c) = fixture();
        let sql = "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) \
                   SELECT COUNT(*) FROM n";
        let err = c
            .run_query_with_timeout(sql, Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Timeout { timeout_ms: 50 }));
    }

    #[test]
    fn fast_query_is_unaffected_by_timeout() {
        let (_dir, c) = fixture();
        let rows = c
            .run_query_with_timeout("SELECT name FROM teams ORDER BY team_id", Duration::from_secs(5))
            .unwrap();
        assert_eq!(rows, vec![vec![Some("Lions".to_string())], vec![Some("Tigers".to_string())]]);
    }

    #[test]
    fn table_schema_reports_unknown_tables() {
        let (_dir, c) = fixture();
        assert!(c.table_schema("teams").unwrap().starts_with("CREATE TABLE teams"));
        assert!(matches!(c.table_schema("nope"), Err(ConnectorError::TableNotFound(_))));
    }
}
