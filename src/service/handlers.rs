use super::{
    context::ServiceContext,
    open::resolve_local_path,
    registry::{MethodHandler, MethodId, Parameter, ParameterKind},
    xml,
};
use crate::api::drive::FileInfo;
use crate::error::{ProxyError, ProxyResult};
use crate::stream::{
    CopyOperation, DownloadOperation, InsertOperation, MoveOperation, Operation, RenameOperation,
    TrashOperation, UntrashOperation, UploadOperation,
};
use std::path::Path;

/// 每种处理器一个实例，按 ID 排序
pub(super) fn all() -> Vec<Box<dyn MethodHandler>> {
    vec![
        Box::new(GetFiles),
        Box::new(DownloadFile),
        Box::new(RenameFile),
        Box::new(TrashFiles),
        Box::new(UntrashFiles),
        Box::new(UploadFile),
        Box::new(Authenticate),
        Box::new(InsertFile),
        Box::new(MoveFiles),
        Box::new(CopyFiles),
        Box::new(GetLog),
        Box::new(GetFilesFromPath),
        Box::new(GetAbout),
    ]
}

fn required<'a>(args: &'a [String], index: usize, name: &str) -> ProxyResult<&'a str> {
    args.get(index)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ProxyError::invalid_argument(format!("{name} is required")))
}

fn optional<'a>(args: &'a [String], index: usize) -> Option<&'a str> {
    args.get(index)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn optional_bool(args: &[String], index: usize, name: &str, default: bool) -> ProxyResult<bool> {
    match optional(args, index) {
        None => Ok(default),
        Some(value) if value.eq_ignore_ascii_case("true") || value == "1" => Ok(true),
        Some(value) if value.eq_ignore_ascii_case("false") || value == "0" => Ok(false),
        Some(value) => Err(ProxyError::invalid_argument(format!(
            "{name} must be true or false, got {value:?}"
        ))),
    }
}

fn optional_u64(args: &[String], index: usize, name: &str) -> ProxyResult<Option<u64>> {
    optional(args, index)
        .map(|value| {
            value.parse().map_err(|_| {
                ProxyError::invalid_argument(format!("{name} must be a number, got {value:?}"))
            })
        })
        .transpose()
}

/// 从 `start` 起的非空参数，至少需要一个
fn ids_from<'a>(args: &'a [String], start: usize, name: &str) -> ProxyResult<Vec<&'a str>> {
    let ids: Vec<&str> = args
        .iter()
        .skip(start)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .collect();
    if ids.is_empty() {
        return Err(ProxyError::invalid_argument(format!(
            "at least one {name} is required"
        )));
    }
    Ok(ids)
}

/// 在新流上执行 `operation` 并等待结果
fn run<O: Operation + 'static>(ctx: &ServiceContext, operation: O) -> ProxyResult<FileInfo> {
    ctx.factory().run(operation)?.into_file()
}

/// 依次对每个 ID 执行 `per_file`，遇到第一个失败即停止
fn for_each_file<F>(ctx: &ServiceContext, ids: &[&str], mut per_file: F) -> ProxyResult<String>
where
    F: FnMut(&ServiceContext, &str) -> ProxyResult<FileInfo>,
{
    let mut results = Vec::with_capacity(ids.len());
    for &id in ids {
        results.push(per_file(ctx, id)?);
    }
    Ok(xml::files(&results))
}

struct GetFiles;

impl MethodHandler for GetFiles {
    fn id(&self) -> MethodId {
        MethodId::GetFiles
    }

    fn parameters(&self) -> &'static [Parameter] {
        const PARAMETERS: &[Parameter] = &[
            Parameter::required("fileId", ParameterKind::String),
            Parameter::optional("childrenOnly", ParameterKind::Boolean),
        ];
        PARAMETERS
    }

    fn invoke(&self, ctx: &ServiceContext, args: &[String]) -> ProxyResult<String> {
        let file_id = required(args, 0, "fileId")?;
        let children_only = optional_bool(args, 1, "childrenOnly", false)?;
        let file = ctx.drive().get_file(file_id)?;
        let mut files = Vec::new();
        if file.is_folder {
            let children = ctx.drive().get_children(&file.id)?;
            if !children_only {
                files.push(file);
            }
            files.extend(children);
        } else {
            files.push(file);
        }
        Ok(xml::files(&files))
    }
}

struct DownloadFile;

impl MethodHandler for DownloadFile {
    fn id(&self) -> MethodId {
        MethodId::DownloadFile
    }

    fn parameters(&self) -> &'static [Parameter] {
        const PARAMETERS: &[Parameter] = &[
            Parameter::required("fileId", ParameterKind::String),
            Parameter::optional("checkIfSynced", ParameterKind::Boolean),
            Parameter::optional("chunkSize", ParameterKind::Integer),
        ];
        PARAMETERS
    }

    fn invoke(&self, ctx: &ServiceContext, args: &[String]) -> ProxyResult<String> {
        let file_id = required(args, 0, "fileId")?;
        let check_if_synced = optional_bool(args, 1, "checkIfSynced", true)?;
        let chunk_size = optional_u64(args, 2, "chunkSize")?;
        let file = ctx.drive().get_file(file_id)?;
        let operation = DownloadOperation::new(file)
            .check_if_synced(check_if_synced)
            .chunk_size(chunk_size);
        Ok(xml::file(&run(ctx, operation)?))
    }
}

struct RenameFile;

impl MethodHandler for RenameFile {
    fn id(&self) -> MethodId {
        MethodId::RenameFile
    }

    fn parameters(&self) -> &'static [Parameter] {
        const PARAMETERS: &[Parameter] = &[
            Parameter::required("fileId", ParameterKind::String),
            Parameter::required("title", ParameterKind::String),
        ];
        PARAMETERS
    }

    fn invoke(&self, ctx: &ServiceContext, args: &[String]) -> ProxyResult<String> {
        let file_id = required(args, 0, "fileId")?;
        let title = required(args, 1, "title")?;
        let file = ctx.drive().get_file(file_id)?;
        Ok(xml::file(&run(ctx, RenameOperation::new(file, title))?))
    }
}

struct TrashFiles;

impl MethodHandler for TrashFiles {
    fn id(&self) -> MethodId {
        MethodId::TrashFiles
    }

    fn parameters(&self) -> &'static [Parameter] {
        const PARAMETERS: &[Parameter] =
            &[Parameter::required("fileId", ParameterKind::StringList)];
        PARAMETERS
    }

    fn invoke(&self, ctx: &ServiceContext, args: &[String]) -> ProxyResult<String> {
        let ids = ids_from(args, 0, "fileId")?;
        for_each_file(ctx, &ids, |ctx, id| {
            let file = ctx.drive().get_file(id)?;
            run(ctx, TrashOperation::new(file))
        })
    }
}

struct UntrashFiles;

impl MethodHandler for UntrashFiles {
    fn id(&self) -> MethodId {
        MethodId::UntrashFiles
    }

    fn parameters(&self) -> &'static [Parameter] {
        const PARAMETERS: &[Parameter] =
            &[Parameter::required("fileId", ParameterKind::StringList)];
        PARAMETERS
    }

    fn invoke(&self, ctx: &ServiceContext, args: &[String]) -> ProxyResult<String> {
        let ids = ids_from(args, 0, "fileId")?;
        for_each_file(ctx, &ids, |ctx, id| run(ctx, UntrashOperation::new(id)))
    }
}

struct UploadFile;

impl MethodHandler for UploadFile {
    fn id(&self) -> MethodId {
        MethodId::UploadFile
    }

    fn parameters(&self) -> &'static [Parameter] {
        const PARAMETERS: &[Parameter] = &[
            Parameter::required("fileId", ParameterKind::String),
            Parameter::optional("checkIfSynced", ParameterKind::Boolean),
            Parameter::optional("chunkSize", ParameterKind::Integer),
        ];
        PARAMETERS
    }

    fn invoke(&self, ctx: &ServiceContext, args: &[String]) -> ProxyResult<String> {
        let file_id = required(args, 0, "fileId")?;
        let check_if_synced = optional_bool(args, 1, "checkIfSynced", true)?;
        let chunk_size = optional_u64(args, 2, "chunkSize")?;
        let file = ctx.drive().get_file(file_id)?;
        let operation = UploadOperation::new(file)
            .check_if_synced(check_if_synced)
            .chunk_size(chunk_size);
        Ok(xml::file(&run(ctx, operation)?))
    }
}

/// 确认当前凭据可用
struct Authenticate;

impl MethodHandler for Authenticate {
    fn id(&self) -> MethodId {
        MethodId::Authenticate
    }

    fn parameters(&self) -> &'static [Parameter] {
        &[]
    }

    fn invoke(&self, ctx: &ServiceContext, _args: &[String]) -> ProxyResult<String> {
        let about = ctx.drive().get_about()?;
        tracing::info!(user = ?about.user, "credentials accepted");
        Ok(xml::about(&about))
    }
}

struct InsertFile;

impl MethodHandler for InsertFile {
    fn id(&self) -> MethodId {
        MethodId::InsertFile
    }

    fn parameters(&self) -> &'static [Parameter] {
        const PARAMETERS: &[Parameter] = &[
            Parameter::required("parentId", ParameterKind::String),
            Parameter::required("title", ParameterKind::String),
            Parameter::optional("mimeType", ParameterKind::String),
        ];
        PARAMETERS
    }

    fn invoke(&self, ctx: &ServiceContext, args: &[String]) -> ProxyResult<String> {
        let parent_id = required(args, 0, "parentId")?;
        let title = required(args, 1, "title")?;
        let mime_type = optional(args, 2).map(str::to_string);
        let operation = InsertOperation::new(parent_id, title, mime_type);
        Ok(xml::file(&run(ctx, operation)?))
    }
}

struct MoveFiles;

impl MethodHandler for MoveFiles {
    fn id(&self) -> MethodId {
        MethodId::MoveFiles
    }

    fn parameters(&self) -> &'static [Parameter] {
        const PARAMETERS: &[Parameter] = &[
            Parameter::required("parentId", ParameterKind::String),
            Parameter::required("fileId", ParameterKind::StringList),
        ];
        PARAMETERS
    }

    fn invoke(&self, ctx: &ServiceContext, args: &[String]) -> ProxyResult<String> {
        let parent_id = required(args, 0, "parentId")?;
        let ids = ids_from(args, 1, "fileId")?;
        for_each_file(ctx, &ids, |ctx, id| {
            let file = ctx.drive().get_file(id)?;
            run(ctx, MoveOperation::new(file, parent_id))
        })
    }
}

struct CopyFiles;

impl MethodHandler for CopyFiles {
    fn id(&self) -> MethodId {
        MethodId::CopyFiles
    }

    fn parameters(&self) -> &'static [Parameter] {
        const PARAMETERS: &[Parameter] = &[
            Parameter::required("parentId", ParameterKind::String),
            Parameter::required("fileId", ParameterKind::StringList),
        ];
        PARAMETERS
    }

    fn invoke(&self, ctx: &ServiceContext, args: &[String]) -> ProxyResult<String> {
        let parent_id = required(args, 0, "parentId")?;
        let ids = ids_from(args, 1, "fileId")?;
        for_each_file(ctx, &ids, |ctx, id| {
            let file = ctx.drive().get_file(id)?;
            run(ctx, CopyOperation::new(file, parent_id))
        })
    }
}

/// 返回日志配置；带级别参数时修改并保存
struct GetLog;

impl MethodHandler for GetLog {
    fn id(&self) -> MethodId {
        MethodId::GetLog
    }

    fn parameters(&self) -> &'static [Parameter] {
        const PARAMETERS: &[Parameter] = &[Parameter::optional("level", ParameterKind::String)];
        PARAMETERS
    }

    fn invoke(&self, ctx: &ServiceContext, args: &[String]) -> ProxyResult<String> {
        let snapshot = match optional(args, 0) {
            Some(level) => {
                let snapshot = ctx.log().set_level(level)?;
                ctx.persist_log_level(&snapshot.level);
                snapshot
            }
            None => ctx.log().current(),
        };
        Ok(xml::log(&snapshot))
    }
}

struct GetFilesFromPath;

impl MethodHandler for GetFilesFromPath {
    fn id(&self) -> MethodId {
        MethodId::GetFilesFromPath
    }

    fn parameters(&self) -> &'static [Parameter] {
        const PARAMETERS: &[Parameter] = &[Parameter::required("localPath", ParameterKind::String)];
        PARAMETERS
    }

    fn invoke(&self, ctx: &ServiceContext, args: &[String]) -> ProxyResult<String> {
        let path = required(args, 0, "localPath")?;
        Ok(xml::file(&resolve_local_path(ctx, Path::new(path))?))
    }
}

struct GetAbout;

impl MethodHandler for GetAbout {
    fn id(&self) -> MethodId {
        MethodId::GetAbout
    }

    fn parameters(&self) -> &'static [Parameter] {
        &[]
    }

    fn invoke(&self, ctx: &ServiceContext, _args: &[String]) -> ProxyResult<String> {
        Ok(xml::about(&ctx.drive().get_about()?))
    }
}
