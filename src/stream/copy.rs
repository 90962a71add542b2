use super::{
    core::{Operation, StreamContext},
    moving::validate_relocation,
    status::{ProgressUnit, StreamKind},
};
use crate::api::drive::{FileInfo, FOLDER_MIME_TYPE};
use crate::error::{ProxyError, ProxyResult};
use std::{fs, time::Duration};

const CHILD_WAIT_SLICE: Duration = Duration::from_millis(250);

/// 复制单个文件；若源是文件夹，则按目录树逐个文件复制。
///
/// 文件夹复制的进度以条目数计（文件夹与文件各算一项）。
pub struct CopyOperation {
    file: FileInfo,
    parent_id: String,
}

/// 预先枚举出的源目录树节点
struct CopyNode {
    file: FileInfo,
    children: Vec<CopyNode>,
}

impl CopyNode {
    fn count(&self) -> u64 {
        1 + self.children.iter().map(CopyNode::count).sum::<u64>()
    }
}

impl CopyOperation {
    /// 创建复制操作，副本放在 `parent_id` 下
    pub fn new(file: FileInfo, parent_id: impl Into<String>) -> Self {
        Self {
            file,
            parent_id: parent_id.into(),
        }
    }

    /// 递归枚举源文件夹，每进入一层都检查取消
    fn enumerate(&self, ctx: &StreamContext<'_>, folder: &FileInfo) -> ProxyResult<CopyNode> {
        ctx.check_cancelled()?;
        let mut children = Vec::new();
        for child in ctx.service().get_children(&folder.id)? {
            if child.id == self.parent_id {
                return Err(ProxyError::invalid_argument(format!(
                    "{} cannot be copied into its own subtree",
                    self.file.title
                )));
            }
            if child.is_folder {
                children.push(self.enumerate(ctx, &child)?);
            } else {
                children.push(CopyNode {
                    file: child,
                    children: Vec::new(),
                });
            }
        }
        Ok(CopyNode {
            file: folder.clone(),
            children,
        })
    }

    /// 在远程重建文件夹并逐个复制子项；每个子项之后检查取消
    fn copy_folder(
        &self,
        ctx: &StreamContext<'_>,
        node: &CopyNode,
        parent_id: &str,
        progress: &mut Progress,
    ) -> ProxyResult<FileInfo> {
        ctx.check_cancelled()?;
        let created = ctx
            .service()
            .insert(parent_id, &node.file.title, FOLDER_MIME_TYPE)?;
        if let Some(path) = &created.file_path {
            if let Err(err) = fs::create_dir_all(path) {
                tracing::warn!(path = %path.display(), error = %err, "failed to create local folder");
            }
        }
        progress.advance(ctx);

        for child in &node.children {
            if child.file.is_folder {
                self.copy_folder(ctx, child, &created.id, progress)?;
            } else {
                copy_child_file(ctx, &child.file, &created.id)?;
                progress.advance(ctx);
            }
            ctx.check_cancelled()?;
        }
        Ok(created)
    }
}

struct Progress {
    processed: u64,
    total: u64,
}

impl Progress {
    fn advance(&mut self, ctx: &StreamContext<'_>) {
        self.processed += 1;
        ctx.report(self.processed, self.total);
    }
}

/// 以嵌套的单文件复制流完成一次复制，并把父流的取消传递给子流。
fn copy_child_file(ctx: &StreamContext<'_>, file: &FileInfo, parent_id: &str) -> ProxyResult<FileInfo> {
    let child = ctx
        .factory()
        .spawn(CopyOperation::new(file.clone(), parent_id))?;
    let snapshot = loop {
        if let Some(snapshot) = child.wait_timeout(CHILD_WAIT_SLICE) {
            break snapshot;
        }
        if ctx.cancel_token().is_cancelled() {
            child.cancel();
        }
    };
    tracing::debug!(child_stream = %snapshot.id, status = %snapshot.status, "nested copy finished");
    snapshot.into_file()
}

impl Operation for CopyOperation {
    fn kind(&self) -> StreamKind {
        StreamKind::Copy
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
        let current = ctx.service().get_file(&self.file.id)?;
        if !current.is_folder {
            ctx.begin_processing(1, ProgressUnit::Items)?;
            let copied = ctx.service().copy(&current.id, &self.parent_id)?;
            ctx.check_cancelled()?;
            ctx.report(1, 1);
            return Ok(Some(copied));
        }

        let tree = self.enumerate(ctx, &current)?;
        let mut progress = Progress {
            processed: 0,
            total: tree.count(),
        };
        ctx.begin_processing(progress.total, ProgressUnit::Items)?;
        tracing::info!(items = progress.total, "copying folder tree");
        let created = self.copy_folder(ctx, &tree, &self.parent_id, &mut progress)?;
        Ok(Some(created))
    }
}
