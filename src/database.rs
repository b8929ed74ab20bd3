use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{ffi, params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};

use crate::error::{RepoResult, RepositoryError};
use crate::models::{DownloadRecord, ErrorKind, NetworkType, Priority, Status};

/// Durable store of download records.
///
/// Every method is atomic for the rows it touches; reads return snapshots.
/// Controller and transfer worker share one implementation and never hold
/// in-memory state of each other.
pub trait Repository: Send + Sync {
    /// Fails with [`RepositoryError::DuplicateId`] when the id exists and
    /// [`RepositoryError::DuplicateFile`] when another record already writes
    /// to the same file.
    fn insert(&self, record: &DownloadRecord) -> RepoResult<()>;

    /// All-or-nothing: a single duplicate rejects the whole batch.
    fn insert_batch(&self, records: &[DownloadRecord]) -> RepoResult<()>;

    fn get(&self, id: i64) -> RepoResult<DownloadRecord>;

    /// Missing ids are skipped.
    fn get_many(&self, ids: &[i64]) -> RepoResult<Vec<DownloadRecord>>;

    fn get_all(&self) -> RepoResult<Vec<DownloadRecord>>;

    fn get_by_group(&self, group_id: &str) -> RepoResult<Vec<DownloadRecord>>;

    fn get_by_status(&self, status: Status) -> RepoResult<Vec<DownloadRecord>>;

    fn get_by_group_and_status(&self, group_id: &str, status: Status) -> RepoResult<Vec<DownloadRecord>>;

    fn set_status_and_error(&self, id: i64, status: Status, error: ErrorKind) -> RepoResult<()>;

    /// Compare-and-set: writes only while the current status is one of `from`.
    /// Returns whether the row changed.
    fn set_status_and_error_if(
        &self,
        id: i64,
        status: Status,
        error: ErrorKind,
        from: &[Status],
    ) -> RepoResult<bool>;

    fn set_progress(&self, id: i64, downloaded_bytes: u64, total_bytes: Option<u64>) -> RepoResult<()>;

    /// No-op when the id is absent.
    fn remove(&self, id: i64) -> RepoResult<()>;

    fn contains(&self, id: i64) -> RepoResult<bool>;
}

/// Sentinel stored in `total_bytes` while the size is unknown.
const UNKNOWN_TOTAL: i64 = -1;

const SELECT_COLUMNS: &str =
    "SELECT id, url, file_path, group_id, name, headers, priority, network_type, status, error,
            downloaded_bytes, total_bytes, created_at
       FROM downloads";

pub struct Database {
    conn: Mutex<Connection>,
}

/* -------------------------------- database -------------------------------- */
impl Database {
    pub fn open(db_path: &Path) -> RepoResult<Self> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> RepoResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> RepoResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        let db = Database { conn: Mutex::new(conn) };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> RepoResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS downloads (
                id INTEGER PRIMARY KEY,
                url TEXT NOT NULL,
                file_path TEXT NOT NULL,
                group_id TEXT NOT NULL DEFAULT '',
                name TEXT NOT NULL DEFAULT '',
                headers TEXT NOT NULL DEFAULT '{}',
                priority INTEGER NOT NULL DEFAULT 0,
                network_type TEXT NOT NULL DEFAULT 'all',
                status TEXT NOT NULL,
                error TEXT NOT NULL DEFAULT 'none',
                downloaded_bytes INTEGER NOT NULL DEFAULT 0,
                total_bytes INTEGER NOT NULL DEFAULT -1,
                created_at INTEGER NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_downloads_file_path ON downloads(file_path);
            CREATE INDEX IF NOT EXISTS idx_downloads_group_status ON downloads(group_id, status);
            CREATE INDEX IF NOT EXISTS idx_downloads_status ON downloads(status);",
        )?;
        Ok(())
    }

    fn lock(&self) -> RepoResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| RepositoryError::Poisoned)
    }

    fn query_records<P: rusqlite::Params>(&self, filter: &str, params: P) -> RepoResult<Vec<DownloadRecord>> {
        let conn = self.lock()?;
        let sql = format!("{SELECT_COLUMNS} {filter} ORDER BY created_at, id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params, row_to_record)?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

/* ----------------------------- row conversion ----------------------------- */

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<DownloadRecord> {
    let headers_json: String = row.get(5)?;
    let headers: BTreeMap<String, String> = serde_json::from_str(&headers_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e)))?;
    let priority: i64 = row.get(6)?;
    let network_type: String = row.get(7)?;
    let status: String = row.get(8)?;
    let error: String = row.get(9)?;
    let downloaded: i64 = row.get(10)?;
    let total: i64 = row.get(11)?;
    let downloaded = u64::try_from(downloaded)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Integer, Box::new(e)))?;

    Ok(DownloadRecord {
        id: row.get(0)?,
        url: row.get(1)?,
        file_path: row.get(2)?,
        group_id: row.get(3)?,
        name: row.get(4)?,
        headers,
        priority: Priority::from(priority),
        network_type: NetworkType::from(network_type),
        status: Status::from(status),
        error: ErrorKind::from(error),
        downloaded_bytes: downloaded,
        total_bytes: u64::try_from(total).ok(),
        created_at: row.get(12)?,
    })
}

fn bytes_to_sql(id: i64, bytes: u64) -> RepoResult<i64> {
    i64::try_from(bytes).map_err(|_| RepositoryError::ByteCountOverflow { id, bytes })
}

fn total_to_sql(id: i64, total_bytes: Option<u64>) -> RepoResult<i64> {
    match total_bytes {
        Some(total) => bytes_to_sql(id, total),
        None => Ok(UNKNOWN_TOTAL),
    }
}

/// Only an `ERROR` record may carry an error code.
fn normalized_error(status: Status, error: ErrorKind) -> ErrorKind {
    if status == Status::Error { error } else { ErrorKind::None }
}

fn insert_row(conn: &Connection, record: &DownloadRecord) -> RepoResult<()> {
    let headers = serde_json::to_string(&record.headers)?;
    let downloaded = bytes_to_sql(record.id, record.downloaded_bytes)?;
    let total = total_to_sql(record.id, record.total_bytes)?;
    let result = conn.execute(
        "INSERT INTO downloads (id, url, file_path, group_id, name, headers, priority, network_type,
                                status, error, downloaded_bytes, total_bytes, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            record.id,
            record.url,
            record.file_path,
            record.group_id,
            record.name,
            headers,
            record.priority.value(),
            record.network_type.as_str(),
            record.status.as_str(),
            normalized_error(record.status, record.error).as_str(),
            downloaded,
            total,
            record.created_at,
        ],
    );
    match result {
        Ok(_) => Ok(()),
        // The rowid conflict reports PRIMARYKEY; the file_path index reports UNIQUE.
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE => {
            Err(RepositoryError::DuplicateFile { id: record.id, file_path: record.file_path.clone() })
        }
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Err(RepositoryError::DuplicateId(record.id))
        }
        Err(e) => Err(e.into()),
    }
}

impl Repository for Database {
    fn insert(&self, record: &DownloadRecord) -> RepoResult<()> {
        let conn = self.lock()?;
        insert_row(&conn, record)
    }

    fn insert_batch(&self, records: &[DownloadRecord]) -> RepoResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for record in records {
            // Dropping `tx` on the error path rolls the whole batch back.
            insert_row(&tx, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get(&self, id: i64) -> RepoResult<DownloadRecord> {
        let conn = self.lock()?;
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        conn.query_row(&sql, [id], row_to_record)
            .optional()?
            .ok_or(RepositoryError::NotFound(id))
    }

    fn get_many(&self, ids: &[i64]) -> RepoResult<Vec<DownloadRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        self.query_records(&format!("WHERE id IN ({placeholders})"), params_from_iter(ids.iter()))
    }

    fn get_all(&self) -> RepoResult<Vec<DownloadRecord>> {
        self.query_records("", [])
    }

    fn get_by_group(&self, group_id: &str) -> RepoResult<Vec<DownloadRecord>> {
        self.query_records("WHERE group_id = ?1", [group_id])
    }

    fn get_by_status(&self, status: Status) -> RepoResult<Vec<DownloadRecord>> {
        self.query_records("WHERE status = ?1", [status.as_str()])
    }

    fn get_by_group_and_status(&self, group_id: &str, status: Status) -> RepoResult<Vec<DownloadRecord>> {
        self.query_records("WHERE group_id = ?1 AND status = ?2", [group_id, status.as_str()])
    }

    fn set_status_and_error(&self, id: i64, status: Status, error: ErrorKind) -> RepoResult<()> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE downloads SET status = ?1, error = ?2 WHERE id = ?3",
            params![status.as_str(), normalized_error(status, error).as_str(), id],
        )?;
        if n == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }

    fn set_status_and_error_if(
        &self,
        id: i64,
        status: Status,
        error: ErrorKind,
        from: &[Status],
    ) -> RepoResult<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let conn = self.lock()?;
        let placeholders: Vec<String> = (0..from.len()).map(|i| format!("?{}", i + 4)).collect();
        let sql = format!(
            "UPDATE downloads SET status = ?1, error = ?2 WHERE id = ?3 AND status IN ({})",
            placeholders.join(", ")
        );

        let mut values: Vec<rusqlite::types::Value> = vec![
            status.as_str().to_string().into(),
            normalized_error(status, error).as_str().to_string().into(),
            id.into(),
        ];
        values.extend(from.iter().map(|s| s.as_str().to_string().into()));

        let n = conn.execute(&sql, params_from_iter(values))?;
        Ok(n == 1)
    }

    fn set_progress(&self, id: i64, downloaded_bytes: u64, total_bytes: Option<u64>) -> RepoResult<()> {
        if let Some(total) = total_bytes {
            if downloaded_bytes > total {
                return Err(RepositoryError::InvalidProgress { id, downloaded: downloaded_bytes, total });
            }
        }
        let downloaded = bytes_to_sql(id, downloaded_bytes)?;
        let total = total_to_sql(id, total_bytes)?;
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE downloads SET downloaded_bytes = ?1, total_bytes = ?2 WHERE id = ?3",
            params![downloaded, total, id],
        )?;
        if n == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }

    fn remove(&self, id: i64) -> RepoResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM downloads WHERE id = ?1", [id])?;
        Ok(())
    }

    fn contains(&self, id: i64) -> RepoResult<bool> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM downloads WHERE id = ?1", [id], |r| r.get(0))
            .optional()?;
        Ok(found.is_some())
    }
}
