use super::{
    client::sanitize_title,
    models::{AboutInfo, FileInfo, ModifiedDateMode, FOLDER_MIME_TYPE},
    ProgressFn, RemoteFileService,
};
use crate::error::{ProxyError, ProxyResult};
use crate::recover_lock;
use crate::stream::CancelToken;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use std::{
    collections::HashMap,
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    thread,
    time::Duration,
};

const ROOT_ID: &str = "root";

/// 进程内的网盘目录树，供 `backend = "memory"` 和测试使用。
///
/// 每次调用都会计数；可让任意操作失败，也可放慢传输以测试取消。
pub struct MemoryDrive {
    cache_root: PathBuf,
    state: Mutex<MemoryState>,
    calls: Mutex<HashMap<String, usize>>,
    failures: Mutex<HashMap<String, String>>,
    transfer_delay: Mutex<Duration>,
    ignore_renames: AtomicBool,
}

struct MemoryState {
    nodes: HashMap<String, Node>,
    next_id: u64,
}

#[derive(Clone)]
struct Node {
    id: String,
    title: String,
    mime_type: String,
    parent_id: Option<String>,
    content: Vec<u8>,
    modified: DateTime<Utc>,
    trashed: bool,
}

impl Node {
    fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }
}

impl MemoryDrive {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        let root = Node {
            id: ROOT_ID.to_string(),
            title: "My Drive".to_string(),
            mime_type: FOLDER_MIME_TYPE.to_string(),
            parent_id: None,
            content: Vec::new(),
            modified: now(),
            trashed: false,
        };
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_ID.to_string(), root);
        Self {
            cache_root: cache_root.into(),
            state: Mutex::new(MemoryState { nodes, next_id: 1 }),
            calls: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            transfer_delay: Mutex::new(Duration::ZERO),
            ignore_renames: AtomicBool::new(false),
        }
    }

    pub fn root_id(&self) -> String {
        ROOT_ID.to_string()
    }

    pub fn add_folder(&self, parent_id: &str, title: &str) -> String {
        self.add_node(parent_id, title, FOLDER_MIME_TYPE, Vec::new())
    }

    pub fn add_file(&self, parent_id: &str, title: &str, content: &[u8]) -> String {
        self.add_node(parent_id, title, "text/plain", content.to_vec())
    }

    pub fn content(&self, file_id: &str) -> Option<Vec<u8>> {
        recover_lock(&self.state)
            .nodes
            .get(file_id)
            .map(|node| node.content.clone())
    }

    pub fn set_remote_modified(&self, file_id: &str, modified: DateTime<Utc>) {
        if let Some(node) = recover_lock(&self.state).nodes.get_mut(file_id) {
            node.modified = modified;
        }
    }

    /// `operation`（如 `"move"`、`"set_modified_date.patch"`）被调用的次数
    pub fn call_count(&self, operation: &str) -> usize {
        recover_lock(&self.calls).get(operation).copied().unwrap_or(0)
    }

    /// 让之后所有 `operation` 调用以 `message` 失败
    pub fn fail_on(&self, operation: &str, message: &str) {
        recover_lock(&self.failures).insert(operation.to_string(), message.to_string());
    }

    pub fn clear_failure(&self, operation: &str) {
        recover_lock(&self.failures).remove(operation);
    }

    /// 每个传输块和每次文件复制前插入的停顿
    pub fn set_transfer_delay(&self, delay: Duration) {
        *recover_lock(&self.transfer_delay) = delay;
    }

    /// 接受重命名请求但不真正修改标题
    pub fn set_ignore_renames(&self, ignore: bool) {
        self.ignore_renames.store(ignore, Ordering::Relaxed);
    }

    fn add_node(&self, parent_id: &str, title: &str, mime_type: &str, content: Vec<u8>) -> String {
        let mut state = recover_lock(&self.state);
        let id = format!("mem-{}", state.next_id);
        state.next_id += 1;
        state.nodes.insert(
            id.clone(),
            Node {
                id: id.clone(),
                title: title.to_string(),
                mime_type: mime_type.to_string(),
                parent_id: Some(parent_id.to_string()),
                content,
                modified: now(),
                trashed: false,
            },
        );
        id
    }

    /// 计数并返回注入的失败（如有）
    fn enter(&self, operation: &str) -> ProxyResult<()> {
        *recover_lock(&self.calls)
            .entry(operation.to_string())
            .or_insert(0) += 1;
        match recover_lock(&self.failures).get(operation) {
            Some(message) => Err(ProxyError::Remote(message.clone())),
            None => Ok(()),
        }
    }

    fn pause(&self) {
        let delay = *recover_lock(&self.transfer_delay);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }

    fn info(&self, state: &MemoryState, node: &Node) -> FileInfo {
        FileInfo {
            id: node.id.clone(),
            title: node.title.clone(),
            mime_type: node.mime_type.clone(),
            is_folder: node.is_folder(),
            is_root: node.id == ROOT_ID,
            parent_id: node.parent_id.clone(),
            file_path: self.local_path(state, node),
            modified_date: Some(node.modified),
            file_size: node.content.len() as u64,
            download_url: (!node.is_folder()).then(|| format!("memory://{}", node.id)),
            alternate_link: Some(format!("https://drive.google.com/open?id={}", node.id)),
            trashed: node.trashed,
            md5_checksum: None,
        }
    }

    fn local_path(&self, state: &MemoryState, node: &Node) -> Option<PathBuf> {
        let mut segments = Vec::new();
        let mut current = Some(node);
        while let Some(entry) = current {
            if entry.id == ROOT_ID {
                break;
            }
            segments.push(sanitize_title(&entry.title));
            current = entry
                .parent_id
                .as_ref()
                .and_then(|parent| state.nodes.get(parent));
            if segments.len() > state.nodes.len() {
                return None;
            }
        }
        let mut path = self.cache_root.clone();
        for segment in segments.iter().rev() {
            path.push(segment);
        }
        Some(path)
    }

    fn lookup(&self, file_id: &str) -> ProxyResult<FileInfo> {
        let state = recover_lock(&self.state);
        let node = state
            .nodes
            .get(file_id)
            .ok_or_else(|| ProxyError::NotFound(format!("file {file_id}")))?;
        Ok(self.info(&state, node))
    }

    fn modify<F>(&self, file_id: &str, change: F) -> ProxyResult<FileInfo>
    where
        F: FnOnce(&mut Node) -> ProxyResult<()>,
    {
        let mut state = recover_lock(&self.state);
        let node = state
            .nodes
            .get_mut(file_id)
            .ok_or_else(|| ProxyError::NotFound(format!("file {file_id}")))?;
        change(node)?;
        let node = node.clone();
        Ok(self.info(&state, &node))
    }

    fn require_folder(&self, folder_id: &str) -> ProxyResult<()> {
        let state = recover_lock(&self.state);
        match state.nodes.get(folder_id) {
            Some(node) if node.is_folder() => Ok(()),
            Some(_) => Err(ProxyError::invalid_argument(format!(
                "{folder_id} is not a folder"
            ))),
            None => Err(ProxyError::NotFound(format!("folder {folder_id}"))),
        }
    }
}

impl RemoteFileService for MemoryDrive {
    fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    fn get_file(&self, file_id: &str) -> ProxyResult<FileInfo> {
        self.enter("get_file")?;
        self.lookup(file_id)
    }

    fn get_children(&self, parent_id: &str) -> ProxyResult<Vec<FileInfo>> {
        self.enter("get_children")?;
        self.require_folder(parent_id)?;
        let state = recover_lock(&self.state);
        let mut children: Vec<FileInfo> = state
            .nodes
            .values()
            .filter(|node| node.parent_id.as_deref() == Some(parent_id) && !node.trashed)
            .map(|node| self.info(&state, node))
            .collect();
        children.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));
        Ok(children)
    }

    fn get_about(&self) -> ProxyResult<AboutInfo> {
        self.enter("get_about")?;
        let state = recover_lock(&self.state);
        let used: u64 = state.nodes.values().map(|n| n.content.len() as u64).sum();
        Ok(AboutInfo {
            name: "Memory Drive".to_string(),
            user: whoami::username().ok(),
            quota_total: None,
            quota_used: Some(used),
            root_folder_id: ROOT_ID.to_string(),
        })
    }

    fn download(
        &self,
        file: &FileInfo,
        writer: &mut dyn Write,
        chunk_size: u64,
        cancel: &CancelToken,
        progress: &mut ProgressFn<'_>,
    ) -> ProxyResult<u64> {
        self.enter("download")?;
        let content = self
            .content(&file.id)
            .ok_or_else(|| ProxyError::NotFound(format!("file {}", file.id)))?;
        let total = content.len() as u64;
        if total == 0 {
            cancel.check()?;
            progress(0, 0);
            return Ok(0);
        }
        let mut written = 0u64;
        for chunk in content.chunks(chunk_size.max(1) as usize) {
            cancel.check()?;
            self.pause();
            cancel.check()?;
            writer.write_all(chunk)?;
            written += chunk.len() as u64;
            progress(written, total);
        }
        writer.flush()?;
        Ok(written)
    }

    fn upload(
        &self,
        file_id: &str,
        reader: &mut dyn Read,
        length: u64,
        chunk_size: u64,
        cancel: &CancelToken,
        progress: &mut ProgressFn<'_>,
    ) -> ProxyResult<FileInfo> {
        self.enter("upload")?;
        self.lookup(file_id)?;
        let mut received = Vec::with_capacity(length as usize);
        let mut buffer = vec![0u8; chunk_size.clamp(1, length.max(1)) as usize];
        loop {
            cancel.check()?;
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            self.pause();
            cancel.check()?;
            received.extend_from_slice(&buffer[..read]);
            progress(received.len() as u64, length);
        }
        if length == 0 {
            progress(0, 0);
        }
        self.modify(file_id, |node| {
            node.content = received;
            node.modified = now();
            Ok(())
        })
    }

    fn insert(&self, parent_id: &str, title: &str, mime_type: &str) -> ProxyResult<FileInfo> {
        self.enter("insert")?;
        self.require_folder(parent_id)?;
        let id = self.add_node(parent_id, title, mime_type, Vec::new());
        self.lookup(&id)
    }

    fn copy(&self, file_id: &str, parent_id: &str) -> ProxyResult<FileInfo> {
        self.enter("copy")?;
        self.pause();
        self.require_folder(parent_id)?;
        let source = {
            let state = recover_lock(&self.state);
            state
                .nodes
                .get(file_id)
                .cloned()
                .ok_or_else(|| ProxyError::NotFound(format!("file {file_id}")))?
        };
        if source.is_folder() {
            return Err(ProxyError::invalid_argument(
                "folders cannot be copied in a single call",
            ));
        }
        let id = self.add_node(parent_id, &source.title, &source.mime_type, source.content);
        self.lookup(&id)
    }

    fn move_file(&self, file_id: &str, parent_id: &str) -> ProxyResult<FileInfo> {
        self.enter("move")?;
        self.require_folder(parent_id)?;
        self.modify(file_id, |node| {
            node.parent_id = Some(parent_id.to_string());
            Ok(())
        })
    }

    fn rename(&self, file_id: &str, title: &str) -> ProxyResult<FileInfo> {
        self.enter("rename")?;
        let ignore = self.ignore_renames.load(Ordering::Relaxed);
        self.modify(file_id, |node| {
            if !ignore {
                node.title = title.to_string();
                node.modified = now();
            }
            Ok(())
        })
    }

    fn trash(&self, file_id: &str) -> ProxyResult<FileInfo> {
        self.enter("trash")?;
        self.modify(file_id, |node| {
            node.trashed = true;
            Ok(())
        })
    }

    fn untrash(&self, file_id: &str) -> ProxyResult<FileInfo> {
        self.enter("untrash")?;
        self.modify(file_id, |node| {
            node.trashed = false;
            Ok(())
        })
    }

    fn set_modified_date(
        &self,
        file_id: &str,
        modified: DateTime<Utc>,
        mode: ModifiedDateMode,
    ) -> ProxyResult<FileInfo> {
        match mode {
            ModifiedDateMode::Update => self.enter("set_modified_date.update")?,
            ModifiedDateMode::Patch => self.enter("set_modified_date.patch")?,
        }
        self.modify(file_id, |node| {
            node.modified = modified;
            Ok(())
        })
    }
}

/// Drive 的修改时间精确到毫秒
fn now() -> DateTime<Utc> {
    let current = Utc::now();
    current
        .duration_trunc(TimeDelta::milliseconds(1))
        .unwrap_or(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_follow_titles_below_cache_root() {
        let drive = MemoryDrive::new("/mirror");
        let docs = drive.add_folder(ROOT_ID, "Docs");
        let file = drive.add_file(&docs, "a.txt", b"abc");
        let info = drive.get_file(&file).unwrap();
        assert_eq!(info.file_path, Some(PathBuf::from("/mirror/Docs/a.txt")));
        assert_eq!(info.file_size, 3);
        assert!(drive.get_file(ROOT_ID).unwrap().is_root);
        assert_eq!(drive.call_count("get_file"), 2);
    }

    #[test]
    fn test_injected_failure_is_reported_until_cleared() {
        let drive = MemoryDrive::new("/mirror");
        drive.fail_on("get_about", "quota backend down");
        let err = drive.get_about().unwrap_err();
        assert!(err.to_string().contains("quota backend down"));
        drive.clear_failure("get_about");
        assert_eq!(drive.get_about().unwrap().root_folder_id, ROOT_ID);
    }

    #[test]
    fn test_trashed_children_are_hidden() {
        let drive = MemoryDrive::new("/mirror");
        let kept = drive.add_file(ROOT_ID, "b.txt", b"");
        let gone = drive.add_file(ROOT_ID, "a.txt", b"");
        drive.trash(&gone).unwrap();
        let children = drive.get_children(ROOT_ID).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, kept);
    }
}
