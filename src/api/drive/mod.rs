mod client;
mod download;
mod files;
mod memory;
mod models;
mod mutate;
mod upload;

pub(crate) use client::sanitize_title;
pub use client::DriveClient;
pub use memory::MemoryDrive;
pub use models::{AboutInfo, FileInfo, ModifiedDateMode, DEFAULT_FILE_MIME_TYPE, FOLDER_MIME_TYPE};

use crate::error::ProxyResult;
use crate::stream::CancelToken;
use chrono::{DateTime, Utc};
use std::io::{Read, Write};
use std::path::Path;

/// 进度回调，参数为 `(已传输字节, 总字节)`
pub type ProgressFn<'a> = dyn FnMut(u64, u64) + 'a;

/// 流所依赖的远程文件服务：元数据与内容读写
pub trait RemoteFileService: Send + Sync {
    /// 本地镜像根目录，`FileInfo::file_path` 都位于其下
    fn cache_root(&self) -> &Path;

    fn get_file(&self, file_id: &str) -> ProxyResult<FileInfo>;

    /// `parent_id` 下未删除的直接子项
    fn get_children(&self, parent_id: &str) -> ProxyResult<Vec<FileInfo>>;

    fn get_about(&self) -> ProxyResult<AboutInfo>;

    /// 按 `chunk_size` 分块把 `file` 的内容写入 `writer`，返回写入的字节数
    fn download(
        &self,
        file: &FileInfo,
        writer: &mut dyn Write,
        chunk_size: u64,
        cancel: &CancelToken,
        progress: &mut ProgressFn<'_>,
    ) -> ProxyResult<u64>;

    /// 用 `reader` 中的 `length` 字节替换 `file_id` 的内容
    fn upload(
        &self,
        file_id: &str,
        reader: &mut dyn Read,
        length: u64,
        chunk_size: u64,
        cancel: &CancelToken,
        progress: &mut ProgressFn<'_>,
    ) -> ProxyResult<FileInfo>;

    fn insert(&self, parent_id: &str, title: &str, mime_type: &str) -> ProxyResult<FileInfo>;

    fn copy(&self, file_id: &str, parent_id: &str) -> ProxyResult<FileInfo>;

    fn move_file(&self, file_id: &str, parent_id: &str) -> ProxyResult<FileInfo>;

    fn rename(&self, file_id: &str, title: &str) -> ProxyResult<FileInfo>;

    fn trash(&self, file_id: &str) -> ProxyResult<FileInfo>;

    fn untrash(&self, file_id: &str) -> ProxyResult<FileInfo>;

    fn set_modified_date(
        &self,
        file_id: &str,
        modified: DateTime<Utc>,
        mode: ModifiedDateMode,
    ) -> ProxyResult<FileInfo>;
}
