use super::{
    core::{Operation, StreamContext},
    status::{ProgressUnit, StreamKind},
};
use crate::api::drive::FileInfo;
use crate::error::{ProxyError, ProxyResult};
use std::{fs, io::ErrorKind, path::Path};

/// 将文件移入远程回收站，并删除本地副本。
pub struct TrashOperation {
    file: FileInfo,
}

impl TrashOperation {
    pub fn new(file: FileInfo) -> Self {
        Self { file }
    }
}

impl Operation for TrashOperation {
    fn kind(&self) -> StreamKind {
        StreamKind::Trash
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
        if self.file.is_root {
            return Err(ProxyError::invalid_argument("the root folder cannot be trashed"));
        }
        Ok(())
    }

    fn execute(&self, ctx: &StreamContext<'_>) -> ProxyResult<Option<FileInfo>> {
        // 本地路径以远程当前位置为准，避免删错已被移走的副本
        let current = ctx.service().get_file(&self.file.id)?;
        ctx.begin_processing(1, ProgressUnit::Items)?;
        let trashed = ctx.service().trash(&current.id)?;
        if let Some(path) = &current.file_path {
            remove_local_copy(path);
        }
        ctx.report(1, 1);
        Ok(Some(trashed))
    }
}

/// 删除本地文件或目录，不存在时静默跳过
fn remove_local_copy(path: &Path) {
    let removed = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match removed {
        Ok(()) => tracing::debug!(path = %path.display(), "removed local copy"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(path = %path.display(), error = %err, "failed to remove local copy"),
    }
}

/// 从远程回收站恢复文件。
pub struct UntrashOperation {
    file_id: String,
}

impl UntrashOperation {
    pub fn new(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
        }
    }
}

impl Operation for UntrashOperation {
    fn kind(&self) -> StreamKind {
        StreamKind::Untrash
    }

    fn file_id(&self) -> &str {
        &self.file_id
    }

    fn validate(&self) -> ProxyResult<()> {
        if self.file_id.trim().is_empty() {
            return Err(ProxyError::invalid_argument("file id is required"));
        }
        Ok(())
    }

    fn execute(&self, ctx: &StreamContext<'_>) -> ProxyResult<Option<FileInfo>> {
        let current = ctx.service().get_file(&self.file_id)?;
        ctx.set_file(current);
        ctx.begin_processing(1, ProgressUnit::Items)?;
        let restored = ctx.service().untrash(&self.file_id)?;
        ctx.report(1, 1);
        Ok(Some(restored))
    }
}
