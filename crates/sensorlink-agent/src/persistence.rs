//! `SQLite` persistence layer.

use crate::storage::{Sample, StorageAdapter, StorageError};
use async_trait::async_trait;
use rusqlite::{Connection, Result as SqliteResult};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// `SQLite`-backed sample store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a `SQLite` database.
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be opened or initialized.
    pub fn open(path: &Path) -> SqliteResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be created.
    pub fn in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> SqliteResult<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a query on the blocking pool.
    async fn with_conn<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> SqliteResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StorageError("connection lock poisoned".to_string()))?;
            op(&conn).map_err(|e| StorageError(e.to_string()))
        })
        .await
        .map_err(|e| StorageError(e.to_string()))?
    }
}

/// Initialize database schema.
fn init_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        r"
        -- Field readings, one row per sample
        CREATE TABLE IF NOT EXISTS samples (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            node_id TEXT NOT NULL,
            field_name TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            kind TEXT NOT NULL,
            value TEXT NOT NULL,
            unit TEXT,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_samples_series
            ON samples(node_id, field_name, timestamp);
        ",
    )?;

    Ok(())
}

#[async_trait]
impl StorageAdapter for SqliteStore {
    async fn append(&self, sample: Sample) -> Result<(), StorageError> {
        let now = chrono::Utc::now().timestamp_millis();
        self.with_conn(move |conn| {
            conn.execute(
                r"
                INSERT INTO samples (node_id, field_name, timestamp, kind, value, unit, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ",
                (
                    &sample.node_id,
                    &sample.field_name,
                    &sample.timestamp,
                    &sample.kind,
                    &sample.value,
                    &sample.unit,
                    now,
                ),
            )?;
            Ok(())
        })
        .await
    }

    async fn range_query(
        &self,
        node_id: &str,
        field_name: &str,
        from: &str,
        to: &str,
    ) -> Result<Vec<Sample>, StorageError> {
        let params = (
            node_id.to_string(),
            field_name.to_string(),
            from.to_string(),
            to.to_string(),
        );
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r"
                SELECT timestamp, node_id, kind, field_name, value, unit FROM samples
                WHERE node_id = ?1 AND field_name = ?2 AND timestamp > ?3 AND timestamp < ?4
                ORDER BY timestamp ASC, id ASC
                ",
            )?;

            let samples = stmt
                .query_map(params, |row| {
                    Ok(Sample {
                        timestamp: row.get(0)?,
                        node_id: row.get(1)?,
                        kind: row.get(2)?,
                        field_name: row.get(3)?,
                        value: row.get(4)?,
                        unit: row.get(5)?,
                    })
                })?
                .collect::<SqliteResult<Vec<Sample>>>()?;

            Ok(samples)
        })
        .await
    }

    async fn nodes(&self) -> Result<Vec<String>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r"
                SELECT node_id FROM samples
                GROUP BY node_id
                ORDER BY MIN(id)
                ",
            )?;
            let nodes = stmt
                .query_map([], |row| row.get(0))?
                .collect::<SqliteResult<Vec<String>>>()?;
            Ok(nodes)
        })
        .await
    }

    async fn field_names(&self, node_id: &str) -> Result<Vec<String>, StorageError> {
        let node_id = node_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r"
                SELECT field_name FROM samples
                WHERE node_id = ?1
                GROUP BY field_name
                ORDER BY MIN(id)
                ",
            )?;
            let names = stmt
                .query_map([node_id], |row| row.get(0))?
                .collect::<SqliteResult<Vec<String>>>()?;
            Ok(names)
        })
        .await
    }
}
