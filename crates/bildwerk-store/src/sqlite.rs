// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SQLite-backed status store.
//
// Schema:
//   images(
//     image_key              TEXT PRIMARY KEY,
//     owner_id               TEXT NOT NULL,
//     business_unit          TEXT NOT NULL,   -- "adult" | "kids"
//     status                 TEXT NOT NULL,   -- see ImageStatus::as_str
//     moderation_label_count INTEGER,
//     failure_reason         TEXT,            -- FailureReason JSON
//     created_at             TEXT NOT NULL,   -- RFC 3339
//     updated_at             TEXT NOT NULL    -- RFC 3339
//   )
// plus an index on owner_id for the owner listing.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::{debug, info, instrument, warn};

use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::types::{BusinessUnit, ImageRecord, ImageStatus};

use crate::status::{StatusStore, StatusUpdate};

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS images (
        image_key TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        business_unit TEXT NOT NULL,
        status TEXT NOT NULL,
        moderation_label_count INTEGER,
        failure_reason TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS images_by_owner ON images (owner_id);
"#;

const SELECT_COLUMNS: &str = "SELECT image_key, owner_id, business_unit, status,
        moderation_label_count, failure_reason, created_at, updated_at
     FROM images";

/// Status store backed by a single SQLite connection.
///
/// The connection sits behind a `Mutex` so the store is `Sync`; every method
/// takes and releases the lock within one synchronous call.
pub struct SqliteStatusStore {
    conn: Mutex<Connection>,
}

fn db_err(context: &str) -> impl FnOnce(rusqlite::Error) -> BildwerkError + '_ {
    move |e| BildwerkError::Database(format!("{context}: {e}"))
}

impl SqliteStatusStore {
    /// Open (or create) the status database at `path` in WAL mode.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err("open"))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err("WAL pragma"))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(db_err("create table"))?;

        info!("status database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("open in-memory"))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(db_err("create table"))?;

        debug!("in-memory status database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| BildwerkError::Database("connection lock poisoned".into()))
    }

    /// Insert a new record.  Called by the upload coordinator; a duplicate
    /// key is an error.
    #[instrument(skip(self, record), fields(image_key = %record.image_key))]
    pub fn create(&self, record: &ImageRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO images (image_key, owner_id, business_unit, status,
             moderation_label_count, failure_reason, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.image_key,
                record.owner_id,
                record.business_unit.as_str(),
                record.status.as_str(),
                record.moderation_label_count,
                record.failure_reason,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )
        .map_err(db_err("insert image"))?;

        info!(status = %record.status, "image record created");
        Ok(())
    }

    /// All records for an owner, newest first.
    #[instrument(skip(self))]
    pub fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ImageRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "{SELECT_COLUMNS} WHERE owner_id = ?1 ORDER BY created_at DESC"
            ))
            .map_err(db_err("prepare list_by_owner"))?;

        let records = stmt
            .query_map(params![owner_id], row_to_record)
            .map_err(db_err("query list_by_owner"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("collect rows"))?;

        debug!(count = records.len(), "listed images for owner");
        Ok(records)
    }
}

impl StatusStore for SqliteStatusStore {
    #[instrument(skip(self))]
    fn get(&self, image_key: &str) -> Result<Option<ImageRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("{SELECT_COLUMNS} WHERE image_key = ?1"),
            params![image_key],
            row_to_record,
        )
        .optional()
        .map_err(db_err("get image"))
    }

    #[instrument(skip(self, update), fields(status = %update.status))]
    fn update(&self, image_key: &str, update: &StatusUpdate) -> Result<()> {
        let predecessors = update.status.predecessors();
        let placeholders = (0..predecessors.len())
            .map(|i| format!("?{}", i + 6))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE images SET status = ?1,
                 moderation_label_count = COALESCE(?2, moderation_label_count),
                 failure_reason = ?3,
                 updated_at = ?4
             WHERE image_key = ?5 AND status IN ({placeholders})"
        );

        let mut values = vec![
            Value::Text(update.status.as_str().into()),
            update
                .moderation_label_count
                .map_or(Value::Null, |n| Value::Integer(n.into())),
            update
                .failure_reason
                .clone()
                .map_or(Value::Null, Value::Text),
            Value::Text(Utc::now().to_rfc3339()),
            Value::Text(image_key.into()),
        ];
        values.extend(predecessors.iter().map(|s| Value::Text(s.as_str().into())));

        let conn = self.lock()?;
        let rows = conn
            .execute(&sql, params_from_iter(values.iter()))
            .map_err(db_err("update status"))?;

        if rows == 0 {
            let current: Option<String> = conn
                .query_row(
                    "SELECT status FROM images WHERE image_key = ?1",
                    params![image_key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err("read current status"))?;
            let detail = match current {
                Some(current) => format!("cannot move from {current} to {}", update.status),
                None => "record does not exist".to_string(),
            };
            warn!(%detail, "conditional status update rejected");
            return Err(BildwerkError::ConditionFailed {
                image_key: image_key.into(),
                detail,
            });
        }

        debug!("image status updated");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn conversion_error(column: usize, detail: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        detail.into(),
    )
}

fn parse_timestamp(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e.to_string()))
}

/// Map a SQLite row to an `ImageRecord`.
///
/// Column indices must match `SELECT_COLUMNS`.
fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImageRecord> {
    let business_unit: String = row.get(2)?;
    let status: String = row.get(3)?;
    let label_count: Option<i64> = row.get(4)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;

    Ok(ImageRecord {
        image_key: row.get(0)?,
        owner_id: row.get(1)?,
        business_unit: BusinessUnit::parse(&business_unit)
            .ok_or_else(|| conversion_error(2, format!("unknown business unit {business_unit:?}")))?,
        status: ImageStatus::parse(&status)
            .ok_or_else(|| conversion_error(3, format!("unknown status {status:?}")))?,
        moderation_label_count: label_count
            .map(|n| u32::try_from(n).map_err(|e| conversion_error(4, e.to_string())))
            .transpose()?,
        failure_reason: row.get(5)?,
        created_at: parse_timestamp(6, &created_at)?,
        updated_at: parse_timestamp(7, &updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(record: &ImageRecord) -> SqliteStatusStore {
        let store = SqliteStatusStore::open_in_memory().expect("open in-memory db");
        store.create(record).expect("create");
        store
    }

    #[test]
    fn create_and_get() {
        let record = ImageRecord::new("cat.jpg", "owner-1", BusinessUnit::Kids);
        let store = store_with(&record);

        let fetched = store.get("cat.jpg").expect("get").expect("found");
        assert_eq!(fetched.image_key, "cat.jpg");
        assert_eq!(fetched.owner_id, "owner-1");
        assert_eq!(fetched.business_unit, BusinessUnit::Kids);
        assert_eq!(fetched.status, ImageStatus::Initialized);
        assert_eq!(fetched.moderation_label_count, None);
    }

    #[test]
    fn get_unknown_key_returns_none() {
        let store = SqliteStatusStore::open_in_memory().expect("open");
        assert!(store.get("missing.png").expect("get").is_none());
    }

    #[test]
    fn duplicate_create_is_an_error() {
        let record = ImageRecord::new("dup.jpg", "owner-1", BusinessUnit::Adult);
        let store = store_with(&record);
        assert!(matches!(
            store.create(&record),
            Err(BildwerkError::Database(_))
        ));
    }

    #[test]
    fn forward_updates_apply_extra_fields() {
        let record = ImageRecord::new("dog.png", "owner-2", BusinessUnit::Adult);
        let store = store_with(&record);

        store
            .update("dog.png", &StatusUpdate::to(ImageStatus::InitProcessing))
            .expect("init processing");
        store
            .update(
                "dog.png",
                &StatusUpdate::to(ImageStatus::Complete).with_label_count(Some(2)),
            )
            .expect("complete");

        let fetched = store.get("dog.png").expect("get").expect("found");
        assert_eq!(fetched.status, ImageStatus::Complete);
        assert_eq!(fetched.moderation_label_count, Some(2));
    }

    #[test]
    fn absent_label_count_keeps_stored_value() {
        let record = ImageRecord::new("k.png", "o", BusinessUnit::Adult);
        let store = store_with(&record);
        store
            .update(
                "k.png",
                &StatusUpdate::to(ImageStatus::InitProcessing).with_label_count(Some(1)),
            )
            .expect("init");
        store
            .update(
                "k.png",
                &StatusUpdate::to(ImageStatus::Failed).with_failure_reason("{}"),
            )
            .expect("failed");

        let fetched = store.get("k.png").expect("get").expect("found");
        assert_eq!(fetched.moderation_label_count, Some(1));
        assert_eq!(fetched.failure_reason.as_deref(), Some("{}"));
    }

    #[test]
    fn regression_is_condition_failed() {
        let record = ImageRecord::new("done.png", "o", BusinessUnit::Adult);
        let store = store_with(&record);
        store
            .update("done.png", &StatusUpdate::to(ImageStatus::InitProcessing))
            .expect("init");
        store
            .update("done.png", &StatusUpdate::to(ImageStatus::Complete))
            .expect("complete");

        let err = store
            .update("done.png", &StatusUpdate::to(ImageStatus::InitProcessing))
            .unwrap_err();
        assert!(matches!(err, BildwerkError::ConditionFailed { .. }));

        // Skipping straight to a terminal status is not allowed either.
        let fresh = ImageRecord::new("fresh.png", "o", BusinessUnit::Adult);
        store.create(&fresh).expect("create");
        let err = store
            .update("fresh.png", &StatusUpdate::to(ImageStatus::Complete))
            .unwrap_err();
        assert!(matches!(err, BildwerkError::ConditionFailed { .. }));
    }

    #[test]
    fn update_missing_record_is_condition_failed() {
        let store = SqliteStatusStore::open_in_memory().expect("open");
        let err = store
            .update("ghost.png", &StatusUpdate::to(ImageStatus::InitProcessing))
            .unwrap_err();
        match err {
            BildwerkError::ConditionFailed { detail, .. } => {
                assert_eq!(detail, "record does not exist")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn failed_can_be_reset_for_retry() {
        let record = ImageRecord::new("retry.png", "o", BusinessUnit::Kids);
        let store = store_with(&record);
        store
            .update(
                "retry.png",
                &StatusUpdate::to(ImageStatus::Failed).with_failure_reason("boom"),
            )
            .expect("failed");
        store
            .update("retry.png", &StatusUpdate::to(ImageStatus::Initialized))
            .expect("reset");

        let fetched = store.get("retry.png").expect("get").expect("found");
        assert_eq!(fetched.status, ImageStatus::Initialized);
        assert_eq!(fetched.failure_reason, None);
    }

    #[test]
    fn list_by_owner_filters() {
        let store = SqliteStatusStore::open_in_memory().expect("open");
        store
            .create(&ImageRecord::new("a.png", "alice", BusinessUnit::Adult))
            .expect("a");
        store
            .create(&ImageRecord::new("b.png", "bob", BusinessUnit::Adult))
            .expect("b");
        store
            .create(&ImageRecord::new("c.png", "alice", BusinessUnit::Kids))
            .expect("c");

        let alice = store.list_by_owner("alice").expect("list");
        assert_eq!(alice.len(), 2);
        assert!(alice.iter().all(|r| r.owner_id == "alice"));
        assert!(alice[0].created_at >= alice[1].created_at);
        assert!(store.list_by_owner("carol").expect("list").is_empty());
    }

    #[test]
    fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("status.db");
        {
            let store = SqliteStatusStore::open(&path).expect("open");
            store
                .create(&ImageRecord::new("keep.png", "o", BusinessUnit::Adult))
                .expect("create");
        }
        let store = SqliteStatusStore::open(&path).expect("reopen");
        assert!(store.get("keep.png").expect("get").is_some());
    }
}
