use super::{
    core::{FileAccess, Operation, StreamContext},
    status::{ProgressUnit, StreamKind},
    sync::{is_synced, reconcile_modified_date},
};
use crate::api::drive::FileInfo;
use crate::error::{ProxyError, ProxyResult};
use std::io::BufReader;

/// 用本地镜像中的副本替换远程文件内容
pub struct UploadOperation {
    file: FileInfo,
    check_if_synced: bool,
    chunk_size: Option<u64>,
}

impl UploadOperation {
    pub fn new(file: FileInfo) -> Self {
        Self {
            file,
            check_if_synced: true,
            chunk_size: None,
        }
    }

    /// 远程已与本地一致时是否跳过
    pub fn check_if_synced(mut self, check: bool) -> Self {
        self.check_if_synced = check;
        self
    }

    pub fn chunk_size(mut self, chunk_size: Option<u64>) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

impl Operation for UploadOperation {
    fn kind(&self) -> StreamKind {
        StreamKind::Upload
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
                "{} is a folder and cannot be uploaded",
                self.file.title
            )));
        }
        match &self.file.file_path {
            Some(path) if path.is_file() => Ok(()),
            Some(path) => Err(ProxyError::invalid_argument(format!(
                "local file {} does not exist",
                path.display()
            ))),
            None => Err(ProxyError::invalid_argument(format!(
                "{} has no local path",
                self.file.title
            ))),
        }
    }

    fn execute(&self, ctx: &StreamContext<'_>) -> ProxyResult<Option<FileInfo>> {
        let file = ctx.service().get_file(&self.file.id)?;
        if file.is_folder || file.trashed {
            return Err(ProxyError::invalid_state(format!(
                "{} can no longer be uploaded",
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
            tracing::info!(path = %path.display(), "remote copy already in sync");
            return Ok(Some(file));
        }

        let handle = ctx.lock_file(&path, FileAccess::Read)?;
        let length = handle.metadata()?.len();
        ctx.begin_processing(length, ProgressUnit::Bytes)?;

        let chunk_size = ctx.factory().chunk_size(self.chunk_size);
        let mut reader = BufReader::new(handle);
        let uploaded = ctx.service().upload(
            &file.id,
            &mut reader,
            length,
            chunk_size,
            ctx.cancel_token(),
            &mut |done, total| ctx.report(done, total),
        )?;
        drop(reader);
        tracing::info!(path = %path.display(), bytes = length, "upload finished");

        Ok(Some(reconcile_modified_date(ctx.service().as_ref(), uploaded, &path)))
    }
}
