mod settings;
mod transfers;

use crate::error::{ProxyError, ProxyResult};
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub use transfers::TransferRecord;

use settings::SETTINGS_TABLE_SCHEMA;
use transfers::TRANSFERS_TABLE_SCHEMA;

/// 保存设置与传输历史的 SQLite 数据库句柄。
///
/// 每次操作单独打开连接，句柄可随意克隆并在管道工作线程与流线程间共享。
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    /// 创建上级目录并执行一次建表迁移
    pub fn open(path: impl Into<PathBuf>) -> ProxyResult<Self> {
        let db = Self { path: path.into() };
        db.with_connection(|_| Ok(()))?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn with_connection<T, F>(&self, operation: F) -> ProxyResult<T>
    where
        F: FnOnce(&Connection) -> ProxyResult<T>,
    {
        let conn = self.open_connection()?;
        operation(&conn)
    }

    fn open_connection(&self) -> ProxyResult<Connection> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).map_err(|e| {
                    ProxyError::Storage(format!("failed to create database directory {dir:?}: {e}"))
                })?;
            }
        }

        let conn = Connection::open(&self.path)
            .map_err(|e| ProxyError::Storage(format!("failed to open SQLite database: {e}")))?;
        apply_migrations(&conn)?;
        Ok(conn)
    }
}

fn apply_migrations(conn: &Connection) -> ProxyResult<()> {
    conn.execute_batch(SETTINGS_TABLE_SCHEMA)
        .map_err(|e| ProxyError::Storage(format!("failed to initialize settings schema: {e}")))?;
    conn.execute_batch(TRANSFERS_TABLE_SCHEMA)
        .map_err(|e| ProxyError::Storage(format!("failed to initialize transfers schema: {e}")))?;
    Ok(())
}

pub(crate) fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}
