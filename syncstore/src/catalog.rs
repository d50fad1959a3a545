use crate::config::StoreConfig;
use crate::errors::{Result, StoreError};
use crate::models::{
    ErrorCategory, IntegrationConfig, NewSyncError, NewSyncRun, RunPatch, SyncDirection,
    SyncErrorRecord, SyncRun, SyncRunStatus, SyncType,
};
use crate::stores::{AuditLog, IntegrationStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// SQLite catalog holding integration definitions and the sync audit trail.
pub struct Catalog {
    conn: Arc<Mutex<Connection>>,
}

const RUN_COLUMNS: &str = "id, integration_id, sync_type, direction, entity_type, status, started_at, completed_at, records_total, records_processed, records_success, records_failed, records_skipped, duration_ms, error_message";

impl Catalog {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let conn = Connection::open(&config.catalog_path)?;
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
            .map_err(|_| StoreError::LockPoisoned("catalog"))
    }

    pub fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS integrations (
                id TEXT PRIMARY KEY,
                definition TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_sync_at INTEGER,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS sync_runs (
                id TEXT PRIMARY KEY,
                integration_id TEXT NOT NULL,
                sync_type TEXT NOT NULL,
                direction TEXT NOT NULL,
                entity_type TEXT,
                status TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                completed_at INTEGER,
                records_total INTEGER NOT NULL DEFAULT 0,
                records_processed INTEGER NOT NULL DEFAULT 0,
                records_success INTEGER NOT NULL DEFAULT 0,
                records_failed INTEGER NOT NULL DEFAULT 0,
                records_skipped INTEGER NOT NULL DEFAULT 0,
                duration_ms INTEGER,
                error_message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_sync_runs_integration
                ON sync_runs (integration_id, started_at);
            CREATE TABLE IF NOT EXISTS sync_errors (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES sync_runs(id),
                integration_id TEXT NOT NULL,
                category TEXT NOT NULL,
                message TEXT NOT NULL,
                entity_type TEXT,
                raw_record TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sync_errors_run ON sync_errors (run_id);
            COMMIT;",
        )?;
        Ok(())
    }

    // --- Integrations ---

    pub fn upsert_integration(&self, integration: &IntegrationConfig) -> Result<()> {
        let definition = serde_json::to_string(integration)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO integrations (id, definition, is_active, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                definition = excluded.definition,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at",
            params![
                integration.id,
                definition,
                integration.is_active,
                Utc::now().timestamp_millis(),
            ],
        )?;
        log::info!("Registered integration '{}'", integration.id);
        Ok(())
    }

    pub fn set_integration_active(&self, id: &str, active: bool) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE integrations SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            params![active, Utc::now().timestamp_millis(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("integration '{id}'")));
        }
        Ok(())
    }

    pub fn get_integration_sync(&self, id: &str) -> Result<Option<IntegrationConfig>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT definition, is_active, last_sync_at FROM integrations WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((definition, is_active, last_sync_at)) => {
                let mut integration: IntegrationConfig = serde_json::from_str(&definition)?;
                integration.is_active = is_active;
                integration.last_sync_at = last_sync_at.and_then(DateTime::from_timestamp_millis);
                Ok(Some(integration))
            }
            None => Ok(None),
        }
    }

    pub fn list_integrations(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM integrations ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    // --- Runs ---

    pub fn create_run_sync(&self, run: &NewSyncRun) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_runs (id, integration_id, sync_type, direction, entity_type, status, started_at)
             VALUES (?1, ?2, ?3, 'inbound', ?4, ?5, ?6)",
            params![
                id.to_string(),
                run.integration_id,
                run.sync_type.as_str(),
                run.entity_type,
                SyncRunStatus::Started.as_str(),
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(id)
    }

    pub fn update_run_sync(&self, run_id: Uuid, patch: &RunPatch) -> Result<()> {
        if patch.status == Some(SyncRunStatus::Started) {
            return Err(StoreError::InvalidArg(
                "a run cannot move back to 'started'".to_string(),
            ));
        }

        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sync_runs SET
                status = COALESCE(?1, status),
                records_total = COALESCE(?2, records_total),
                records_processed = COALESCE(?3, records_processed),
                records_success = COALESCE(?4, records_success),
                records_failed = COALESCE(?5, records_failed),
                records_skipped = COALESCE(?6, records_skipped),
                completed_at = COALESCE(?7, completed_at),
                duration_ms = COALESCE(?8, duration_ms),
                error_message = COALESCE(?9, error_message)
             WHERE id = ?10 AND status IN ('started', 'in_progress')",
            params![
                patch.status.map(|status| status.as_str()),
                patch.records_total.map(to_sql_count),
                patch.records_processed.map(to_sql_count),
                patch.records_success.map(to_sql_count),
                patch.records_failed.map(to_sql_count),
                patch.records_skipped.map(to_sql_count),
                patch.completed_at.map(|at| at.timestamp_millis()),
                patch.duration_ms.map(to_sql_count),
                patch.error_message,
                run_id.to_string(),
            ],
        )?;

        if changed == 0 {
            let exists: Option<String> = conn
                .query_row(
                    "SELECT status FROM sync_runs WHERE id = ?1",
                    params![run_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            return match exists {
                Some(_) => Err(StoreError::RunFinalized(run_id.to_string())),
                None => Err(StoreError::NotFound(format!("sync run {run_id}"))),
            };
        }
        Ok(())
    }

    pub fn get_run(&self, run_id: Uuid) -> Result<Option<SyncRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {RUN_COLUMNS} FROM sync_runs WHERE id = ?1"))?;
        let mut rows = stmt.query(params![run_id.to_string()])?;
        let run = match rows.next()? {
            Some(row) => Some(run_from_row(row)?),
            None => None,
        };
        Ok(run)
    }

    pub fn list_runs(&self, integration_id: &str) -> Result<Vec<SyncRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM sync_runs WHERE integration_id = ?1 ORDER BY started_at"
        ))?;
        let mut rows = stmt.query(params![integration_id])?;
        let mut runs = Vec::new();
        while let Some(row) = rows.next()? {
            runs.push(run_from_row(row)?);
        }
        Ok(runs)
    }

    // --- Errors ---

    pub fn append_error_sync(&self, run_id: Uuid, error: &NewSyncError) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let raw_record = serde_json::to_string(&error.raw_record)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_errors (id, run_id, integration_id, category, message, entity_type, raw_record, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id.to_string(),
                run_id.to_string(),
                error.integration_id,
                error.category.as_str(),
                error.message,
                error.entity_type,
                raw_record,
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(id)
    }

    pub fn list_errors(&self, run_id: Uuid) -> Result<Vec<SyncErrorRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, integration_id, category, message, entity_type, raw_record, created_at
             FROM sync_errors WHERE run_id = ?1 ORDER BY created_at, rowid",
        )?;
        let mut rows = stmt.query(params![run_id.to_string()])?;
        let mut errors = Vec::new();
        while let Some(row) = rows.next()? {
            let raw_record: String = row.get(6)?;
            errors.push(SyncErrorRecord {
                id: parse_uuid(&row.get::<_, String>(0)?)?,
                run_id: parse_uuid(&row.get::<_, String>(1)?)?,
                integration_id: row.get(2)?,
                category: row.get::<_, String>(3)?.parse::<ErrorCategory>()?,
                message: row.get(4)?,
                entity_type: row.get(5)?,
                raw_record: serde_json::from_str(&raw_record)?,
                created_at: timestamp(row.get(7)?)?,
            });
        }
        Ok(errors)
    }
}

#[async_trait]
impl IntegrationStore for Catalog {
    async fn get_integration(&self, id: &str) -> Result<Option<IntegrationConfig>> {
        self.get_integration_sync(id)
    }

    async fn record_successful_sync(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE integrations SET last_sync_at = ?1 WHERE id = ?2",
            params![at.timestamp_millis(), id],
        )?;
        Ok(())
    }
}

#[async_trait]
impl AuditLog for Catalog {
    async fn create_run(&self, run: NewSyncRun) -> Result<Uuid> {
        self.create_run_sync(&run)
    }

    async fn update_run(&self, run_id: Uuid, patch: RunPatch) -> Result<()> {
        self.update_run_sync(run_id, &patch)
    }

    async fn append_error(&self, run_id: Uuid, error: NewSyncError) -> Result<()> {
        self.append_error_sync(run_id, &error).map(|_| ())
    }
}

fn to_sql_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|err| StoreError::InvalidArg(format!("bad uuid '{raw}': {err}")))
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::InvalidArg(format!("timestamp out of range: {millis}")))
}

fn run_from_row(row: &Row<'_>) -> Result<SyncRun> {
    let sync_type: String = row.get(2)?;
    let status: String = row.get(5)?;
    let completed_at: Option<i64> = row.get(7)?;
    let duration_ms: Option<i64> = row.get(13)?;
    Ok(SyncRun {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        integration_id: row.get(1)?,
        sync_type: sync_type.parse::<SyncType>()?,
        direction: SyncDirection::Inbound,
        entity_type: row.get(4)?,
        status: status.parse::<SyncRunStatus>()?,
        started_at: timestamp(row.get(6)?)?,
        completed_at: completed_at.map(timestamp).transpose()?,
        records_total: from_sql_count(row.get(8)?),
        records_processed: from_sql_count(row.get(9)?),
        records_success: from_sql_count(row.get(10)?),
        records_failed: from_sql_count(row.get(11)?),
        records_skipped: from_sql_count(row.get(12)?),
        duration_ms: duration_ms.map(from_sql_count),
        error_message: row.get(14)?,
    })
}
