use super::{
    core::{Operation, StreamContext},
    status::{ProgressUnit, StreamKind},
};
use crate::api::drive::FileInfo;
use crate::error::{ProxyError, ProxyResult};
use std::{fs, path::Path};

/// 将文件移动到另一个远程文件夹，并同步搬动本地副本。
pub struct MoveOperation {
    file: FileInfo,
    parent_id: String,
}

impl MoveOperation {
    /// 创建移动操作，`parent_id` 为目标文件夹 ID
    pub fn new(file: FileInfo, parent_id: impl Into<String>) -> Self {
        Self {
            file,
            parent_id: parent_id.into(),
        }
    }
}

/// 移动与复制共用的参数校验：不能操作根目录，也不能放进自身。
pub(super) fn validate_relocation(file: &FileInfo, parent_id: &str) -> ProxyResult<()> {
    if file.id.trim().is_empty() {
        return Err(ProxyError::invalid_argument("file id is required"));
    }
    if parent_id.trim().is_empty() {
        return Err(ProxyError::invalid_argument("parent id is required"));
    }
    if file.is_root {
        return Err(ProxyError::invalid_argument("the root folder cannot be relocated"));
    }
    if file.id == parent_id {
        return Err(ProxyError::invalid_argument(format!(
            "{} cannot be placed inside itself",
            file.title
        )));
    }
    Ok(())
}

/// 远程操作成功后搬动本地副本。
///
/// 本地失败只记录警告，不影响流的结果：远程状态才是准的，
/// 下次下载会按新路径重新落盘。
pub(super) fn relocate_local_copy(old_path: &Path, new_path: &Path) {
    if old_path == new_path || !old_path.exists() {
        return;
    }
    let relocated = new_path
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|_| fs::rename(old_path, new_path));
    match relocated {
        Ok(()) => tracing::debug!(
            from = %old_path.display(),
            to = %new_path.display(),
            "relocated local copy"
        ),
        Err(err) => tracing::warn!(
            from = %old_path.display(),
            to = %new_path.display(),
            error = %err,
            "failed to relocate local copy"
        ),
    }
}

impl Operation for MoveOperation {
    fn kind(&self) -> StreamKind {
        StreamKind::Move
    }

    fn file_id(&self) -> &str {
        &self.file.id
    }

    fn title(&self) -> Option<&str> {
        Some(&self.file.title)
    }

    fn validate(&self) -> ProxyResult<()> {
        validate_relocation(&self.file, &self.parent_id)
    }

    fn execute(&self, ctx: &StreamContext<'_>) -> ProxyResult<Option<FileInfo>> {
        // 调用方手里的元数据可能已过期，以远程当前的父目录为准
        let current = ctx.service().get_file(&self.file.id)?;
        if current.parent_id.as_deref() == Some(self.parent_id.as_str()) {
            ctx.enter_processing()?;
            tracing::info!(parent_id = %self.parent_id, "already in target folder");
            return Ok(Some(current));
        }

        ctx.begin_processing(1, ProgressUnit::Items)?;
        let moved = ctx.service().move_file(&current.id, &self.parent_id)?;
        if let (Some(old_path), Some(new_path)) = (&current.file_path, &moved.file_path) {
            relocate_local_copy(old_path, new_path);
        }

        ctx.report(1, 1);
        Ok(Some(moved))
    }
}
