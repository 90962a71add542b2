use super::{
    core::{Operation, StreamContext},
    moving::relocate_local_copy,
    status::{ProgressUnit, StreamKind},
    sync::set_local_modified,
};
use crate::api::drive::FileInfo;
use crate::error::{ProxyError, ProxyResult};

/// 重命名远程文件，并同步本地副本的文件名与修改时间。
pub struct RenameOperation {
    file: FileInfo,
    title: String,
}

impl RenameOperation {
    /// 创建重命名操作，`title` 为新的标题
    pub fn new(file: FileInfo, title: impl Into<String>) -> Self {
        Self {
            file,
            title: title.into(),
        }
    }
}

impl Operation for RenameOperation {
    fn kind(&self) -> StreamKind {
        StreamKind::Rename
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
            return Err(ProxyError::invalid_argument("the root folder cannot be renamed"));
        }
        if self.title.trim().is_empty() {
            return Err(ProxyError::invalid_argument("title is required"));
        }
        Ok(())
    }

    fn execute(&self, ctx: &StreamContext<'_>) -> ProxyResult<Option<FileInfo>> {
        let current = ctx.service().get_file(&self.file.id)?;
        ctx.begin_processing(1, ProgressUnit::Items)?;

        let renamed = ctx.service().rename(&current.id, &self.title)?;
        if renamed.title != self.title {
            return Err(ProxyError::Remote(format!(
                "{} was not renamed, remote title is still {:?}",
                current.id, renamed.title
            )));
        }

        if let (Some(old_path), Some(new_path)) = (&current.file_path, &renamed.file_path) {
            relocate_local_copy(old_path, new_path);
            if let Some(modified) = renamed.modified_date {
                if new_path.exists() {
                    if let Err(err) = set_local_modified(new_path, modified) {
                        tracing::warn!(path = %new_path.display(), error = %err, "failed to sync modified time");
                    }
                }
            }
        }

        ctx.report(1, 1);
        Ok(Some(renamed))
    }
}
