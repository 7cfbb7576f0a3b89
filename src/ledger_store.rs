use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{Error, Result};

const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_init.sql",
    include_str!("../db/migrations/0001_init.sql"),
)];

/// External tabular ledger: named partitions in display order, each a grid
/// of positional cells carrying a value plus optional note and background.
/// The core treats a partition as exclusively owned for the duration of one
/// placement or split call.
pub trait LedgerStore {
    /// Partition names in display order.
    fn partition_names(&self) -> Result<Vec<String>>;

    /// A rectangular block of cell values; absent cells read as empty
    /// strings.
    fn read_rows(
        &self,
        partition: &str,
        start_row: usize,
        rows: usize,
        start_col: usize,
        cols: usize,
    ) -> Result<Vec<Vec<String>>>;

    /// Writes values into one row starting at `start_col`.
    fn write_row(&self, partition: &str, row: usize, start_col: usize, values: &[String])
        -> Result<()>;

    fn set_note(&self, partition: &str, row: usize, col: usize, note: &str) -> Result<()>;

    fn set_background(&self, partition: &str, row: usize, col: usize, color: &str) -> Result<()>;

    /// Copies cell content (value, note, background) across a column span.
    fn copy_row(
        &self,
        partition: &str,
        src_row: usize,
        dst_row: usize,
        start_col: usize,
        cols: usize,
    ) -> Result<()>;

    fn clear_row(&self, partition: &str, row: usize, start_col: usize, cols: usize) -> Result<()>;

    /// Realizes a new partition by duplicating the template's cells and
    /// inserting the copy at `insert_at` in display order.
    fn duplicate_partition(&self, template: &str, new_name: &str, insert_at: usize) -> Result<()>;

    fn set_tab_color(&self, partition: &str, color: &str) -> Result<()>;
}

/// SQLite-backed ledger. Schema lives in embedded migrations applied at
/// open time; re-applying is a no-op.
pub struct SqliteLedgerStore {
    conn: Connection,
}

impl SqliteLedgerStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        apply_migrations(&conn)?;
        Ok(SqliteLedgerStore { conn })
    }

    /// Appends a partition after the current display order. Used to seed a
    /// template or an initial dated partition.
    pub fn create_partition(&self, name: &str) -> Result<()> {
        let next: i64 = self
            .conn
            .query_row("SELECT COALESCE(MAX(position), -1) + 1 FROM partitions", [], |row| {
                row.get(0)
            })?;
        self.conn.execute(
            "INSERT INTO partitions(name, position) VALUES (?1, ?2)",
            params![name, next],
        )?;
        Ok(())
    }

    fn require_partition(&self, name: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT position FROM partitions WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::UnknownPartition(name.to_string()))
    }
}

impl LedgerStore for SqliteLedgerStore {
    fn partition_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM partitions ORDER BY position ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    fn read_rows(
        &self,
        partition: &str,
        start_row: usize,
        rows: usize,
        start_col: usize,
        cols: usize,
    ) -> Result<Vec<Vec<String>>> {
        self.require_partition(partition)?;
        let mut grid = vec![vec![String::new(); cols]; rows];
        let mut stmt = self.conn.prepare(
            "SELECT row_idx, col_idx, value FROM cells
             WHERE partition = ?1 AND row_idx BETWEEN ?2 AND ?3 AND col_idx BETWEEN ?4 AND ?5",
        )?;
        let found = stmt.query_map(
            params![
                partition,
                start_row as i64,
                (start_row + rows - 1) as i64,
                start_col as i64,
                (start_col + cols - 1) as i64
            ],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )?;
        for cell in found {
            let (row, col, value) = cell?;
            grid[row as usize - start_row][col as usize - start_col] = value;
        }
        Ok(grid)
    }

    fn write_row(
        &self,
        partition: &str,
        row: usize,
        start_col: usize,
        values: &[String],
    ) -> Result<()> {
        self.require_partition(partition)?;
        for (offset, value) in values.iter().enumerate() {
            self.conn.execute(
                "INSERT INTO cells(partition, row_idx, col_idx, value) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(partition, row_idx, col_idx) DO UPDATE SET value = excluded.value",
                params![partition, row as i64, (start_col + offset) as i64, value],
            )?;
        }
        Ok(())
    }

    fn set_note(&self, partition: &str, row: usize, col: usize, note: &str) -> Result<()> {
        self.require_partition(partition)?;
        self.conn.execute(
            "INSERT INTO cells(partition, row_idx, col_idx, value, note) VALUES (?1, ?2, ?3, '', ?4)
             ON CONFLICT(partition, row_idx, col_idx) DO UPDATE SET note = excluded.note",
            params![partition, row as i64, col as i64, note],
        )?;
        Ok(())
    }

    fn set_background(&self, partition: &str, row: usize, col: usize, color: &str) -> Result<()> {
        self.require_partition(partition)?;
        self.conn.execute(
            "INSERT INTO cells(partition, row_idx, col_idx, value, background) VALUES (?1, ?2, ?3, '', ?4)
             ON CONFLICT(partition, row_idx, col_idx) DO UPDATE SET background = excluded.background",
            params![partition, row as i64, col as i64, color],
        )?;
        Ok(())
    }

    fn copy_row(
        &self,
        partition: &str,
        src_row: usize,
        dst_row: usize,
        start_col: usize,
        cols: usize,
    ) -> Result<()> {
        self.require_partition(partition)?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM cells
             WHERE partition = ?1 AND row_idx = ?2 AND col_idx BETWEEN ?3 AND ?4",
            params![
                partition,
                dst_row as i64,
                start_col as i64,
                (start_col + cols - 1) as i64
            ],
        )?;
        tx.execute(
            "INSERT INTO cells(partition, row_idx, col_idx, value, note, background)
             SELECT partition, ?3, col_idx, value, note, background FROM cells
             WHERE partition = ?1 AND row_idx = ?2 AND col_idx BETWEEN ?4 AND ?5",
            params![
                partition,
                src_row as i64,
                dst_row as i64,
                start_col as i64,
                (start_col + cols - 1) as i64
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn clear_row(&self, partition: &str, row: usize, start_col: usize, cols: usize) -> Result<()> {
        self.require_partition(partition)?;
        self.conn.execute(
            "DELETE FROM cells
             WHERE partition = ?1 AND row_idx = ?2 AND col_idx BETWEEN ?3 AND ?4",
            params![
                partition,
                row as i64,
                start_col as i64,
                (start_col + cols - 1) as i64
            ],
        )?;
        Ok(())
    }

    fn duplicate_partition(&self, template: &str, new_name: &str, insert_at: usize) -> Result<()> {
        self.require_partition(template)?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE partitions SET position = position + 1 WHERE position >= ?1",
            params![insert_at as i64],
        )?;
        tx.execute(
            "INSERT INTO partitions(name, position) VALUES (?1, ?2)",
            params![new_name, insert_at as i64],
        )?;
        tx.execute(
            "INSERT INTO cells(partition, row_idx, col_idx, value, note, background)
             SELECT ?1, row_idx, col_idx, value, note, background FROM cells WHERE partition = ?2",
            params![new_name, template],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn set_tab_color(&self, partition: &str, color: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE partitions SET tab_color = ?1 WHERE name = ?2",
            params![color, partition],
        )?;
        if changed == 0 {
            return Err(Error::UnknownPartition(partition.to_string()));
        }
        Ok(())
    }
}

fn ensure_schema_migrations_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )
}

fn load_applied_versions(conn: &Connection) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut versions = HashSet::new();
    for row in rows {
        versions.insert(row?);
    }
    Ok(versions)
}

fn apply_migrations(conn: &Connection) -> Result<()> {
    ensure_schema_migrations_table(conn)?;
    let applied = load_applied_versions(conn)?;
    for (version, sql) in MIGRATIONS {
        if applied.contains(*version) {
            continue;
        }
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_migrations(version) VALUES (?1)",
            [*version],
        )?;
        tx.commit()?;
    }
    Ok(())
}
