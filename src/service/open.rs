use super::context::ServiceContext;
use crate::api::drive::{sanitize_title, FileInfo};
use crate::error::{ProxyError, ProxyResult};
use std::path::{Component, Path};

/// 从网盘根目录按标题逐级查找，把本地镜像中的路径映射回远程文件
pub fn resolve_local_path(ctx: &ServiceContext, path: &Path) -> ProxyResult<FileInfo> {
    let drive = ctx.drive();
    let relative = if path.is_absolute() {
        path.strip_prefix(drive.cache_root()).map_err(|_| {
            ProxyError::invalid_argument(format!(
                "{} is not inside {}",
                path.display(),
                drive.cache_root().display()
            ))
        })?
    } else {
        path
    };

    let about = drive.get_about()?;
    let mut current = drive.get_file(&about.root_folder_id)?;
    for component in relative.components() {
        let segment = match component {
            Component::Normal(segment) => segment.to_string_lossy(),
            Component::CurDir => continue,
            _ => {
                return Err(ProxyError::invalid_argument(format!(
                    "unsupported path component in {}",
                    path.display()
                )))
            }
        };
        let children = drive.get_children(&current.id)?;
        current = children
            .into_iter()
            .find(|child| child.title == segment || sanitize_title(&child.title) == segment)
            .ok_or_else(|| ProxyError::NotFound(format!("{} in {}", segment, current.title)))?;
    }
    Ok(current)
}

/// 在浏览器中打开 `path` 对应的远程文件
pub fn open_remote_file(ctx: &ServiceContext, path: &Path) -> ProxyResult<FileInfo> {
    let file = resolve_local_path(ctx, path)?;
    let link = file
        .alternate_link
        .clone()
        .ok_or_else(|| ProxyError::NotFound(format!("{} has no web link", file.title)))?;
    tracing::info!(file_id = %file.id, link = %link, "opening remote file");
    webbrowser::open(&link)?;
    Ok(file)
}
