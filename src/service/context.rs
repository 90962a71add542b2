use crate::api::drive::{DriveClient, MemoryDrive, RemoteFileService};
use crate::config::{DriveBackend, ProxyConfig};
use crate::db::Database;
use crate::error::ProxyResult;
use crate::logging::{LogSettings, LOG_LEVEL_SETTING};
use crate::stream::{
    MemoryTransferStore, SqliteTransferStore, StreamFactory, TransferQueue, TransferStore,
};
use std::sync::Arc;

/// 方法处理器所需的全部依赖，每个进程构建一次并按引用传递
pub struct ServiceContext {
    config: ProxyConfig,
    drive: Arc<dyn RemoteFileService>,
    factory: StreamFactory,
    log: Arc<LogSettings>,
    db: Option<Database>,
}

impl ServiceContext {
    pub fn new(
        config: ProxyConfig,
        drive: Arc<dyn RemoteFileService>,
        log: Arc<LogSettings>,
        db: Option<Database>,
    ) -> Self {
        let store: Arc<dyn TransferStore> = match &db {
            Some(db) => Arc::new(SqliteTransferStore::new(db.clone())),
            None => Arc::new(MemoryTransferStore::default()),
        };
        let factory = StreamFactory::new(drive.clone(), TransferQueue::new(store))
            .with_chunk_size(config.drive.chunk_size);
        Self {
            config,
            drive,
            factory,
            log,
            db,
        }
    }

    /// 打开数据库与配置的网盘后端
    pub fn from_config(config: ProxyConfig, log: Arc<LogSettings>) -> ProxyResult<Self> {
        let drive: Arc<dyn RemoteFileService> = match config.drive.backend {
            DriveBackend::Google => Arc::new(DriveClient::new(&config.drive)?),
            DriveBackend::Memory => Arc::new(MemoryDrive::new(config.drive.cache_root.clone())),
        };
        let db = Database::open(config.storage.database.clone())?;
        tracing::info!(
            backend = ?config.drive.backend,
            database = %db.path().display(),
            "service context ready"
        );
        Ok(Self::new(config, drive, log, Some(db)))
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn drive(&self) -> &Arc<dyn RemoteFileService> {
        &self.drive
    }

    pub fn factory(&self) -> &StreamFactory {
        &self.factory
    }

    pub fn transfers(&self) -> &TransferQueue {
        self.factory.transfers()
    }

    pub fn log(&self) -> &LogSettings {
        &self.log
    }

    pub fn db(&self) -> Option<&Database> {
        self.db.as_ref()
    }

    /// 之前通过 `GetLog` 保存的日志级别
    pub fn persisted_log_level(&self) -> Option<String> {
        let db = self.db.as_ref()?;
        match db.get_setting(LOG_LEVEL_SETTING) {
            Ok(level) => level,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read persisted log level");
                None
            }
        }
    }

    pub(crate) fn persist_log_level(&self, level: &str) {
        if let Some(db) = &self.db {
            if let Err(err) = db.set_setting(LOG_LEVEL_SETTING, level) {
                tracing::warn!(error = %err, "failed to persist log level");
            }
        }
    }
}
