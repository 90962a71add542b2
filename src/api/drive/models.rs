use chrono::{DateTime, Utc};
use std::path::PathBuf;

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
pub const DEFAULT_FILE_MIME_TYPE: &str = "application/octet-stream";

/// 远程文件或文件夹的元数据；`file_path` 为其在本地镜像中的位置
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FileInfo {
    pub id: String,
    pub title: String,
    pub mime_type: String,
    pub is_folder: bool,
    pub is_root: bool,
    pub parent_id: Option<String>,
    pub file_path: Option<PathBuf>,
    pub modified_date: Option<DateTime<Utc>>,
    pub file_size: u64,
    pub download_url: Option<String>,
    pub alternate_link: Option<String>,
    pub trashed: bool,
    pub md5_checksum: Option<String>,
}

/// 账户概况，供 `Authenticate` 与 `GetAbout` 使用
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AboutInfo {
    pub name: String,
    pub user: Option<String>,
    pub quota_total: Option<u64>,
    pub quota_used: Option<u64>,
    pub root_folder_id: String,
}

/// 回写远程修改时间的方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModifiedDateMode {
    /// 带 `setModifiedDate` 的完整更新请求
    Update,
    /// 带 `setModifiedDate` 的 patch 请求
    Patch,
}
