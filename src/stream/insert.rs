use super::{
    core::{Operation, StreamContext},
    status::{ProgressUnit, StreamKind},
};
use crate::api::drive::{FileInfo, DEFAULT_FILE_MIME_TYPE, FOLDER_MIME_TYPE};
use crate::error::{ProxyError, ProxyResult};
use std::fs;

/// 在 `parent_id` 下新建文件或文件夹；
/// 同类同名的兄弟项已存在时改名为 `名称 (n)`。
pub struct InsertOperation {
    parent_id: String,
    title: String,
    mime_type: String,
}

impl InsertOperation {
    /// `mime_type` 为空时按普通文件处理
    pub fn new(
        parent_id: impl Into<String>,
        title: impl Into<String>,
        mime_type: Option<String>,
    ) -> Self {
        Self {
            parent_id: parent_id.into(),
            title: title.into(),
            mime_type: mime_type
                .filter(|mime| !mime.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FILE_MIME_TYPE.to_string()),
        }
    }

    fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }
}

impl Operation for InsertOperation {
    fn kind(&self) -> StreamKind {
        StreamKind::Insert
    }

    fn file_id(&self) -> &str {
        &self.parent_id
    }

    fn title(&self) -> Option<&str> {
        Some(&self.title)
    }

    fn validate(&self) -> ProxyResult<()> {
        if self.parent_id.trim().is_empty() {
            return Err(ProxyError::invalid_argument("parent id is required"));
        }
        if self.title.trim().is_empty() {
            return Err(ProxyError::invalid_argument("title is required"));
        }
        Ok(())
    }

    fn execute(&self, ctx: &StreamContext<'_>) -> ProxyResult<Option<FileInfo>> {
        ctx.begin_processing(1, ProgressUnit::Items)?;
        let siblings = ctx.service().get_children(&self.parent_id)?;
        let title = disambiguate_title(&siblings, &self.title, self.is_folder());
        if title != self.title {
            tracing::info!(requested = %self.title, title = %title, "title already taken");
        }
        ctx.check_cancelled()?;

        let created = ctx
            .service()
            .insert(&self.parent_id, &title, &self.mime_type)?;
        if created.is_folder {
            if let Some(path) = &created.file_path {
                if let Err(err) = fs::create_dir_all(path) {
                    tracing::warn!(path = %path.display(), error = %err, "failed to create local folder");
                }
            }
        }
        ctx.report(1, 1);
        Ok(Some(created))
    }
}

/// 依次尝试 `title`、`stem (1).ext`、`stem (2).ext`……，返回第一个未被
/// 同类未删除兄弟项占用的名称。文件夹对整个标题编号。
pub fn disambiguate_title(siblings: &[FileInfo], title: &str, is_folder: bool) -> String {
    let taken = |candidate: &str| {
        siblings
            .iter()
            .any(|f| !f.trashed && f.is_folder == is_folder && f.title == candidate)
    };
    if !taken(title) {
        return title.to_string();
    }
    let (stem, extension) = if is_folder {
        (title, "")
    } else {
        split_extension(title)
    };
    let mut n: u32 = 1;
    loop {
        let candidate = format!("{stem} ({n}){extension}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn split_extension(title: &str) -> (&str, &str) {
    match title.rfind('.') {
        Some(index) if index > 0 => title.split_at(index),
        _ => (title, ""),
    }
}
