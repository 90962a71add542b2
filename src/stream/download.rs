use super::{
    core::{FileAccess, Operation, StreamContext},
    status::{ProgressUnit, StreamKind},
    sync::{is_synced, reconcile_modified_date},
};
use crate::api::drive::FileInfo;
use crate::error::{ProxyError, ProxyResult};
use std::{
    fs,
    io::{BufWriter, Write},
};

/// 把远程文件内容下载到本地镜像目录
pub struct DownloadOperation {
    file: FileInfo,
    check_if_synced: bool,
    chunk_size: Option<u64>,
}

impl DownloadOperation {
    /// 默认在本地副本已同步时跳过下载
    pub fn new(file: FileInfo) -> Self {
        Self {
            file,
            check_if_synced: true,
            chunk_size: None,
        }
    }

    /// 本地副本已同步时是否跳过
    pub fn check_if_synced(mut self, check: bool) -> Self {
        self.check_if_synced = check;
        self
    }

    /// 指定块大小，`None` 表示使用工厂默认值
    pub fn chunk_size(mut self, chunk_size: Option<u64>) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

impl Operation for DownloadOperation {
    fn kind(&self) -> StreamKind {
        StreamKind::Download
    }

    fn file_id(&self) -> &str {
        &self.file.id
    }

    fn title(&self) -> Option<&str> {
        Some(&self.file.title)
    }

    fn validate(&self) -> ProxyResult<()> {
        if self.file.id.trim().is_empty() {
            return Err(ProxyError::invalid_argument("file id is required"));
        }
        if self.file.is_folder {
            return Err(ProxyError::invalid_argument(format!(
                "{} is a folder and cannot be downloaded",
                self.file.title
            )));
        }
        if self.file.file_path.is_none() {
            return Err(ProxyError::invalid_argument(format!(
                "{} has no local path",
                self.file.title
            )));
        }
        Ok(())
    }

    fn execute(&self, ctx: &StreamContext<'_>) -> ProxyResult<Option<FileInfo>> {
        let file = ctx.service().get_file(&self.file.id)?;
        if file.is_folder || file.trashed {
            return Err(ProxyError::invalid_state(format!(
                "{} can no longer be downloaded",
                file.title
            )));
        }
        let path = file
            .file_path
            .clone()
            .ok_or_else(|| ProxyError::invalid_state(format!("{} has no local path", file.title)))?;
        ctx.set_file(file.clone());

        if self.check_if_synced && is_synced(&file, &path) {
            ctx.begin_processing(0, ProgressUnit::Bytes)?;
            tracing::info!(path = %path.display(), "local copy already in sync");
            return Ok(Some(file));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        ctx.begin_processing(file.file_size, ProgressUnit::Bytes)?;
        let handle = ctx.lock_file(&path, FileAccess::Write)?;
        handle.set_len(0)?;

        let chunk_size = ctx.factory().chunk_size(self.chunk_size);
        let mut writer = BufWriter::new(handle);
        let written = ctx.service().download(
            &file,
            &mut writer,
            chunk_size,
            ctx.cancel_token(),
            &mut |done, total| ctx.report(done, total),
        )?;
        writer.flush()?;
        drop(writer);
        tracing::info!(path = %path.display(), bytes = written, "download finished");

        Ok(Some(reconcile_modified_date(ctx.service().as_ref(), file, &path)))
    }
}
