use rusqlite::{params, Row};

use super::Database;
use crate::error::{ProxyError, ProxyResult};

/// 每个经过传输队列的流一行，服务重启后历史与中断的传输仍可恢复
pub(crate) const TRANSFERS_TABLE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS transfers (
    stream_id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    file_id TEXT NOT NULL,
    title TEXT,
    status INTEGER NOT NULL,
    unit INTEGER NOT NULL,
    bytes_processed INTEGER NOT NULL,
    total_bytes INTEGER NOT NULL,
    local_path TEXT,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    error_message TEXT,
    updated_at_millis INTEGER NOT NULL
);";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub stream_id: String,
    pub kind: String,
    pub file_id: String,
    pub title: Option<String>,
    pub status: i64,
    pub unit: i64,
    pub bytes_processed: i64,
    pub total_bytes: i64,
    pub local_path: Option<String>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub error_message: Option<String>,
    pub updated_at_millis: i64,
}

impl Database {
    pub fn upsert_transfer(&self, record: &TransferRecord) -> ProxyResult<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO transfers (
                    stream_id,
                    kind,
                    file_id,
                    title,
                    status,
                    unit,
                    bytes_processed,
                    total_bytes,
                    local_path,
                    started_at,
                    completed_at,
                    error_message,
                    updated_at_millis
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(stream_id) DO UPDATE SET
                    kind = excluded.kind,
                    file_id = excluded.file_id,
                    title = excluded.title,
                    status = excluded.status,
                    unit = excluded.unit,
                    bytes_processed = excluded.bytes_processed,
                    total_bytes = excluded.total_bytes,
                    local_path = excluded.local_path,
                    started_at = excluded.started_at,
                    completed_at = excluded.completed_at,
                    error_message = excluded.error_message,
                    updated_at_millis = excluded.updated_at_millis",
                params![
                    record.stream_id,
                    record.kind,
                    record.file_id,
                    record.title,
                    record.status,
                    record.unit,
                    record.bytes_processed,
                    record.total_bytes,
                    record.local_path,
                    record.started_at,
                    record.completed_at,
                    record.error_message,
                    record.updated_at_millis,
                ],
            )
            .map_err(|e| ProxyError::Storage(format!("failed to upsert transfer: {e}")))?;
            Ok(())
        })
    }

    pub fn load_transfers(&self) -> ProxyResult<Vec<TransferRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT
                        stream_id,
                        kind,
                        file_id,
                        title,
                        status,
                        unit,
                        bytes_processed,
                        total_bytes,
                        local_path,
                        started_at,
                        completed_at,
                        error_message,
                        updated_at_millis
                    FROM transfers
                    ORDER BY started_at ASC",
                )
                .map_err(|e| ProxyError::Storage(format!("failed to prepare transfer query: {e}")))?;
            let rows = stmt
                .query_map([], map_transfer)
                .map_err(|e| ProxyError::Storage(format!("failed to query transfers: {e}")))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ProxyError::Storage(format!("failed to parse transfer row: {e}")))?;
            Ok(rows)
        })
    }

    pub fn delete_transfer(&self, stream_id: &str) -> ProxyResult<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM transfers WHERE stream_id = ?", params![stream_id])
                .map_err(|e| {
                    ProxyError::Storage(format!("failed to delete transfer {stream_id}: {e}"))
                })?;
            Ok(())
        })
    }
}

fn map_transfer(row: &Row) -> rusqlite::Result<TransferRecord> {
    Ok(TransferRecord {
        stream_id: row.get(0)?,
        kind: row.get(1)?,
        file_id: row.get(2)?,
        title: row.get(3)?,
        status: row.get(4)?,
        unit: row.get(5)?,
        bytes_processed: row.get(6)?,
        total_bytes: row.get(7)?,
        local_path: row.get(8)?,
        started_at: row.get(9)?,
        completed_at: row.get(10)?,
        error_message: row.get(11)?,
        updated_at_millis: row.get(12)?,
    })
}
