use super::{
    queue::TransferEntry,
    status::{ProgressUnit, StreamStatus},
};
use crate::db::{current_timestamp_millis, Database, TransferRecord};
use crate::recover_lock;
use std::path::PathBuf;
use std::sync::Mutex;

/// 传输队列的持久化接口。实现自行记录错误，不向队列返回失败。
pub trait TransferStore: Send + Sync {
    /// 读取全部记录
    fn load(&self) -> Vec<TransferEntry>;
    /// 按 `stream_id` 插入或覆盖
    fn upsert(&self, entry: &TransferEntry);
    /// 删除一条记录（历史淘汰时调用）
    fn remove(&self, stream_id: &str);
}

/// 基于 `transfers` 表的默认实现
pub struct SqliteTransferStore {
    db: Database,
}

impl SqliteTransferStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl TransferStore for SqliteTransferStore {
    fn load(&self) -> Vec<TransferEntry> {
        match self.db.load_transfers() {
            Ok(records) => records.into_iter().map(entry_from_record).collect(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to load transfer history");
                Vec::new()
            }
        }
    }

    fn upsert(&self, entry: &TransferEntry) {
        if let Err(err) = self.db.upsert_transfer(&record_from_entry(entry)) {
            tracing::warn!(stream_id = %entry.stream_id, error = %err, "failed to persist transfer");
        }
    }

    fn remove(&self, stream_id: &str) {
        if let Err(err) = self.db.delete_transfer(stream_id) {
            tracing::warn!(stream_id, error = %err, "failed to delete transfer");
        }
    }
}

/// 仅存于内存的实现，用于测试和一次性调用
#[derive(Default)]
pub struct MemoryTransferStore {
    entries: Mutex<Vec<TransferEntry>>,
}

impl TransferStore for MemoryTransferStore {
    fn load(&self) -> Vec<TransferEntry> {
        let mut entries = recover_lock(&self.entries).clone();
        entries.sort_by_key(|entry| entry.started_at);
        entries
    }

    fn upsert(&self, entry: &TransferEntry) {
        let mut entries = recover_lock(&self.entries);
        match entries.iter_mut().find(|e| e.stream_id == entry.stream_id) {
            Some(existing) => *existing = entry.clone(),
            None => entries.push(entry.clone()),
        }
    }

    fn remove(&self, stream_id: &str) {
        recover_lock(&self.entries).retain(|e| e.stream_id != stream_id);
    }
}

fn record_from_entry(entry: &TransferEntry) -> TransferRecord {
    TransferRecord {
        stream_id: entry.stream_id.clone(),
        kind: entry.kind.clone(),
        file_id: entry.file_id.clone(),
        title: entry.title.clone(),
        status: entry.status.to_i64(),
        unit: entry.unit.to_i64(),
        bytes_processed: i64::try_from(entry.bytes_processed).unwrap_or(i64::MAX),
        total_bytes: i64::try_from(entry.total_bytes).unwrap_or(i64::MAX),
        local_path: entry
            .local_path
            .as_ref()
            .map(|path| path.to_string_lossy().into_owned()),
        started_at: entry.started_at,
        completed_at: entry.completed_at,
        error_message: entry.error_message.clone(),
        updated_at_millis: current_timestamp_millis(),
    }
}

fn entry_from_record(record: TransferRecord) -> TransferEntry {
    TransferEntry {
        stream_id: record.stream_id,
        kind: record.kind,
        file_id: record.file_id,
        title: record.title,
        status: StreamStatus::from_i64(record.status),
        unit: ProgressUnit::from_i64(record.unit),
        bytes_processed: u64::try_from(record.bytes_processed).unwrap_or(0),
        total_bytes: u64::try_from(record.total_bytes).unwrap_or(0),
        local_path: record.local_path.map(PathBuf::from),
        started_at: record.started_at,
        completed_at: record.completed_at,
        error_message: record.error_message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_store_round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTransferStore::new(Database::open(dir.path().join("t.db")).unwrap());
        let entry = TransferEntry {
            stream_id: "s1".into(),
            kind: "Upload".into(),
            file_id: "f1".into(),
            title: Some("notes.txt".into()),
            status: StreamStatus::Processing,
            unit: ProgressUnit::Bytes,
            bytes_processed: 5,
            total_bytes: 10,
            local_path: Some(PathBuf::from("/mirror/notes.txt")),
            started_at: 1,
            completed_at: None,
            error_message: None,
        };
        store.upsert(&entry);
        assert_eq!(store.load(), vec![entry.clone()]);

        let finished = TransferEntry {
            status: StreamStatus::Completed,
            completed_at: Some(2),
            ..entry
        };
        store.upsert(&finished);
        assert_eq!(store.load(), vec![finished]);
        store.remove("s1");
        assert!(store.load().is_empty());
    }
}
