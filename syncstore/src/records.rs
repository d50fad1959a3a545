use crate::config::StoreConfig;
use crate::errors::{Result, StoreError};
use crate::models::NormalizedRecord;
use crate::stores::RecordStore;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Target collections for normalized records, one SQLite table shared by all collections.
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let conn = Connection::open(&config.records_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::LockPoisoned("records"))
    }

    pub fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                record_key TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (collection, record_key)
            );",
        )?;
        Ok(())
    }

    pub fn upsert_sync(
        &self,
        collection: &str,
        record: &NormalizedRecord,
        conflict_key: &str,
    ) -> Result<()> {
        if let Some(issue) = record.issues().first() {
            return Err(StoreError::Validation(issue.to_string()));
        }

        let key = match record.get(conflict_key) {
            None | Some(Value::Null) => {
                log::debug!(
                    "Record for '{collection}' has no '{conflict_key}', inserting under a generated key"
                );
                Uuid::new_v4().to_string()
            }
            Some(value) => key_text(conflict_key, value)?,
        };

        let body = serde_json::to_string(record.fields())?;
        let now = Utc::now().timestamp_millis();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO records (collection, record_key, body, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(collection, record_key) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at",
            params![collection, key, body, now],
        )?;
        Ok(())
    }

    /// Looks up a stored record by its conflict-key value.
    pub fn get(&self, collection: &str, key: &Value) -> Result<Option<Value>> {
        let key = key_text("key", key)?;
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM records WHERE collection = ?1 AND record_key = ?2",
                params![collection, key],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|body| serde_json::from_str(&body).map_err(StoreError::from))
            .transpose()
    }

    pub fn count(&self, collection: &str) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    pub fn list(&self, collection: &str) -> Result<Vec<Value>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT body FROM records WHERE collection = ?1 ORDER BY record_key",
        )?;
        let bodies = stmt
            .query_map(params![collection], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(StoreError::from))
            .collect()
    }
}

/// Canonical text form of a scalar key. Strings are stored bare, so `"42"`
/// and `42` address the same row.
fn key_text(field: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        Value::Null => Err(StoreError::Validation(format!("'{field}' is null"))),
        Value::Array(_) | Value::Object(_) => Err(StoreError::Validation(format!(
            "'{field}' must be a scalar to be used as a key"
        ))),
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn upsert(
        &self,
        collection: &str,
        record: &NormalizedRecord,
        conflict_key: &str,
    ) -> Result<()> {
        self.upsert_sync(collection, record, conflict_key)
    }
}
