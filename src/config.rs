use crate::error::{ProxyError, ProxyResult};
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const QUALIFIER: &str = "com";
const ORGANIZATION: &str = "DriveProxy";
const APPLICATION: &str = "DriveProxy";
const DB_FILE_NAME: &str = "drive-proxy.db";

pub const DEFAULT_PIPE_NAME: &str = "DriveProxy.Service";

/// 顶层配置（从 drive-proxy.toml 加载）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub service: ServiceConfig,
    pub drive: DriveConfig,
    pub log: LogConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// 公共管道的基础名称
    pub pipe_name: String,
    /// 同时服务的重定向会话上限
    pub max_sessions: usize,
    /// 客户端等待回复的时长
    pub client_timeout_secs: u64,
    /// 私有管道等待客户端连接的时长
    pub redirect_accept_timeout_secs: u64,
    /// 服务端等待已连接客户端发送请求的时长
    pub request_read_timeout_secs: u64,
    /// 客户端连接失败前的尝试次数
    pub connect_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveBackend {
    Google,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub backend: DriveBackend,
    /// Drive v2 元数据接口地址
    pub api_base: String,
    /// Drive v2 上传接口地址
    pub upload_base: String,
    /// 本地镜像根目录，远程路径按标题逐级映射到其下
    pub cache_root: PathBuf,
    /// 存放 bearer token 的文件（未配置时读 DRIVE_PROXY_ACCESS_TOKEN）
    pub credentials_file: Option<PathBuf>,
    /// 默认传输块大小（字节）
    pub chunk_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// 日志级别或 EnvFilter 指令（默认 info）
    pub level: String,
    pub format: LogFormat,
    /// drive-proxy.log 所在目录；未设置时只输出到控制台
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 保存设置与传输历史的 SQLite 数据库
    pub database: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            pipe_name: DEFAULT_PIPE_NAME.to_string(),
            max_sessions: 16,
            client_timeout_secs: 30,
            redirect_accept_timeout_secs: 15,
            request_read_timeout_secs: 10,
            connect_retries: 10,
        }
    }
}

impl ServiceConfig {
    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs.max(1))
    }

    pub fn redirect_accept_timeout(&self) -> Duration {
        Duration::from_secs(self.redirect_accept_timeout_secs.max(1))
    }

    pub fn request_read_timeout(&self) -> Duration {
        Duration::from_secs(self.request_read_timeout_secs.max(1))
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            backend: DriveBackend::Google,
            api_base: "https://www.googleapis.com/drive/v2".to_string(),
            upload_base: "https://www.googleapis.com/upload/drive/v2".to_string(),
            cache_root: default_cache_root(),
            credentials_file: None,
            chunk_size: crate::stream::DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            directory: project_dirs().map(|dirs| dirs.data_local_dir().join("logs")),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let database = project_dirs()
            .map(|dirs| dirs.data_dir().join(DB_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(DB_FILE_NAME));
        Self { database }
    }
}

impl ProxyConfig {
    /// 读取 `path` 处的 TOML 文件；文件不存在时使用默认值
    pub fn load(path: &Path) -> ProxyResult<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found (using defaults)");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml(&content)
            .map_err(|e| ProxyError::Config(format!("parsing {}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

pub fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.config_dir().join("drive-proxy.toml"))
        .unwrap_or_else(|| PathBuf::from("drive-proxy.toml"))
}

fn default_cache_root() -> PathBuf {
    if let Some(user_dirs) = UserDirs::new() {
        let base = user_dirs.document_dir().unwrap_or(user_dirs.home_dir());
        return base.join("Google Drive");
    }
    PathBuf::from("Google Drive")
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
}
