use crate::config::{LogConfig, LogFormat};
use crate::error::{ProxyError, ProxyResult};
use crate::recover_lock;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

pub const LOG_FILE_NAME: &str = "drive-proxy.log";

/// `GetLog` 设置的日志级别在 settings 表中的键名
pub const LOG_LEVEL_SETTING: &str = "log_level";

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// `GetLog` 返回的当前日志配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSnapshot {
    pub level: String,
    pub format: LogFormat,
    pub directory: Option<PathBuf>,
    pub file_name: Option<String>,
}

/// 已安装的日志订阅器的运行时视图。
///
/// 运行中可切换级别；没有 reload 句柄时只更新记录。
pub struct LogSettings {
    current: Mutex<LogSnapshot>,
    handle: Option<FilterHandle>,
}

impl LogSettings {
    /// 不绑定订阅器的设置（测试、一次性命令行调用）
    pub fn detached(config: &LogConfig) -> Self {
        Self {
            current: Mutex::new(LogSnapshot {
                level: config.level.clone(),
                format: config.format,
                directory: config.directory.clone(),
                file_name: None,
            }),
            handle: None,
        }
    }

    pub fn current(&self) -> LogSnapshot {
        recover_lock(&self.current).clone()
    }

    pub fn set_level(&self, level: &str) -> ProxyResult<LogSnapshot> {
        let level = level.trim();
        let filter = EnvFilter::try_new(level)
            .map_err(|e| ProxyError::invalid_argument(format!("invalid log level {level:?}: {e}")))?;
        if let Some(handle) = &self.handle {
            handle
                .reload(filter)
                .map_err(|e| ProxyError::Config(format!("failed to change log level: {e}")))?;
        }
        let mut current = recover_lock(&self.current);
        current.level = level.to_string();
        tracing::info!(level = %current.level, "log level changed");
        Ok(current.clone())
    }
}

/// 安装全局日志订阅器。
///
/// 已有订阅器时保留原有的，并返回不绑定的设置。
pub fn init_logging(config: &LogConfig) -> LogSettings {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(filter);

    let (text_layer, json_layer) = match config.format {
        LogFormat::Text => (Some(fmt::layer().with_target(false)), None),
        LogFormat::Json => (None, Some(fmt::layer().json())),
    };

    let mut file_name = None;
    let file_layer = config.directory.as_ref().and_then(|dir| {
        let path = dir.join(LOG_FILE_NAME);
        let opened = fs::create_dir_all(dir)
            .and_then(|_| OpenOptions::new().create(true).append(true).open(&path));
        match opened {
            Ok(file) => {
                file_name = Some(LOG_FILE_NAME.to_string());
                Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            }
            Err(err) => {
                eprintln!("[drive-proxy] cannot open log file {}: {err}", path.display());
                None
            }
        }
    });

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    LogSettings {
        current: Mutex::new(LogSnapshot {
            level: config.level.clone(),
            format: config.format,
            directory: config.directory.clone(),
            file_name,
        }),
        handle: installed.then_some(handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_settings_track_level_changes() {
        let settings = LogSettings::detached(&LogConfig {
            level: "info".into(),
            format: LogFormat::Json,
            directory: None,
        });
        let updated = settings.set_level("debug").unwrap();
        assert_eq!(updated.level, "debug");
        assert_eq!(settings.current().format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        let settings = LogSettings::detached(&LogConfig::default());
        let err = settings.set_level("drive_proxy=verbose").unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
        assert_eq!(settings.current().level, "info");
    }
}
