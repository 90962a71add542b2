use crate::api::drive::{FileInfo, ModifiedDateMode, RemoteFileService};
use chrono::{DateTime, Utc};
use filetime::FileTime;
use std::{fs, io, path::Path};

/// 本地副本与远程文件大小一致、修改时间在秒级相同时视为已同步
pub(crate) fn is_synced(file: &FileInfo, path: &Path) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() || metadata.len() != file.file_size {
        return false;
    }
    match (file.modified_date, local_modified(path)) {
        (Some(remote), Some(local)) => remote.timestamp() == local.timestamp(),
        _ => false,
    }
}

/// 读取本地文件的修改时间
pub(crate) fn local_modified(path: &Path) -> Option<DateTime<Utc>> {
    let metadata = fs::metadata(path).ok()?;
    let mtime = FileTime::from_last_modification_time(&metadata);
    DateTime::from_timestamp(mtime.unix_seconds(), mtime.nanoseconds())
}

/// 设置本地文件的修改时间
pub(crate) fn set_local_modified(path: &Path, modified: DateTime<Utc>) -> io::Result<()> {
    let mtime = FileTime::from_unix_time(modified.timestamp(), modified.timestamp_subsec_nanos());
    filetime::set_file_mtime(path, mtime)
}

/// 传输完成后对齐本地与远程的修改时间。
///
/// 依次尝试：写本地时间、远程 Update、远程 Patch；
/// 都未生效时以本地时间为准。
pub(crate) fn reconcile_modified_date(
    service: &dyn RemoteFileService,
    file: FileInfo,
    path: &Path,
) -> FileInfo {
    reconcile_with(service, file, path, set_local_modified)
}

/// `reconcile_modified_date` 的实现，本地写入方式可替换
fn reconcile_with<W>(
    service: &dyn RemoteFileService,
    mut file: FileInfo,
    path: &Path,
    write_local: W,
) -> FileInfo
where
    W: Fn(&Path, DateTime<Utc>) -> io::Result<()>,
{
    if let Some(remote) = file.modified_date {
        match write_local(path, remote) {
            Ok(()) if same_second(local_modified(path), remote) => return file,
            Ok(()) => tracing::debug!(path = %path.display(), "local modified time did not stick"),
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "failed to set local modified time")
            }
        }
    }

    let Some(local) = local_modified(path) else {
        tracing::warn!(path = %path.display(), "cannot read local modified time");
        return file;
    };
    for mode in [ModifiedDateMode::Update, ModifiedDateMode::Patch] {
        match service.set_modified_date(&file.id, local, mode) {
            Ok(updated) if same_second(updated.modified_date, local) => return updated,
            Ok(_) => {
                tracing::debug!(file_id = %file.id, ?mode, "remote modified time did not stick")
            }
            Err(err) => {
                tracing::debug!(file_id = %file.id, ?mode, error = %err, "failed to set remote modified time")
            }
        }
    }

    tracing::warn!(
        file_id = %file.id,
        path = %path.display(),
        "modified times could not be reconciled, keeping local time"
    );
    file.modified_date = Some(local);
    file
}

fn same_second(candidate: Option<DateTime<Utc>>, expected: DateTime<Utc>) -> bool {
    candidate.is_some_and(|value| value.timestamp() == expected.timestamp())
}
