use std::collections::HashMap;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use tracing::info;

use crate::errors::AppError;
use crate::models::result::PersistedRecord;

/// Append-only store of optimizer results, keyed by context id.
pub trait ResultStore: Send + Sync {
    /// Add records after any already stored for the context. Never replaces.
    fn append(&self, context_id: &str, records: &[PersistedRecord]) -> Result<(), AppError>;

    /// All records for a context, oldest first.
    fn load(&self, context_id: &str) -> Result<Vec<PersistedRecord>, AppError>;
}

/// Open (or create) the database and ensure the schema exists.
pub fn initialize_database(path: &str) -> Result<Connection, AppError> {
    let conn = Connection::open(path)?;
    create_tables(&conn)?;
    Ok(conn)
}

fn create_tables(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS optimization_results (
             seq         INTEGER PRIMARY KEY AUTOINCREMENT,
             id          TEXT NOT NULL UNIQUE,
             context_id  TEXT NOT NULL,
             created_at  TEXT NOT NULL,
             record_json TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_results_context
             ON optimization_results(context_id, seq);",
    )?;
    Ok(())
}

pub fn insert_results(
    conn: &mut Connection,
    context_id: &str,
    records: &[PersistedRecord],
) -> Result<(), AppError> {
    let created_at = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO optimization_results (id, context_id, created_at, record_json)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for record in records {
            let id = uuid::Uuid::new_v4().to_string();
            let json = serde_json::to_string(record)?;
            stmt.execute(params![id, context_id, created_at, json])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn get_results(conn: &Connection, context_id: &str) -> Result<Vec<PersistedRecord>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT record_json FROM optimization_results WHERE context_id = ?1 ORDER BY seq",
    )?;
    let rows = stmt.query_map(params![context_id], |row| row.get::<_, String>(0))?;

    let mut records = Vec::new();
    for json in rows {
        records.push(serde_json::from_str(&json?)?);
    }
    Ok(records)
}

pub fn get_context_ids(conn: &Connection) -> Result<Vec<String>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT context_id FROM optimization_results GROUP BY context_id ORDER BY MIN(seq)",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let ids = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// SQLite-backed [`ResultStore`]. One JSON record per row.
pub struct SqliteResultStore {
    db: Mutex<Connection>,
}

impl SqliteResultStore {
    pub fn open(path: &str) -> Result<Self, AppError> {
        let conn = initialize_database(path)?;
        info!("Result store ready at {}", path);
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()?;
        create_tables(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn context_ids(&self) -> Result<Vec<String>, AppError> {
        let db = self.lock()?;
        get_context_ids(&db)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AppError> {
        self.db
            .lock()
            .map_err(|_| AppError::Database("connection lock poisoned".into()))
    }
}

impl ResultStore for SqliteResultStore {
    fn append(&self, context_id: &str, records: &[PersistedRecord]) -> Result<(), AppError> {
        let mut db = self.lock()?;
        insert_results(&mut db, context_id, records)
    }

    fn load(&self, context_id: &str) -> Result<Vec<PersistedRecord>, AppError> {
        let db = self.lock()?;
        get_results(&db, context_id)
    }
}

/// Process-local store, useful when results only need to outlive a single call.
#[derive(Default)]
pub struct MemoryResultStore {
    records: Mutex<HashMap<String, Vec<PersistedRecord>>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultStore for MemoryResultStore {
    fn append(&self, context_id: &str, records: &[PersistedRecord]) -> Result<(), AppError> {
        let mut map = self
            .records
            .lock()
            .map_err(|_| AppError::Database("store lock poisoned".into()))?;
        map.entry(context_id.to_string())
            .or_default()
            .extend_from_slice(records);
        Ok(())
    }

    fn load(&self, context_id: &str) -> Result<Vec<PersistedRecord>, AppError> {
        let map = self
            .records
            .lock()
            .map_err(|_| AppError::Database("store lock poisoned".into()))?;
        Ok(map.get(context_id).cloned().unwrap_or_default())
    }
}
