use super::{
    cancel::CancelToken,
    factory::StreamFactory,
    status::{ProgressUnit, StreamKind, StreamStatus},
};
use crate::api::drive::{FileInfo, RemoteFileService};
use crate::error::{ProxyError, ProxyResult};
use crate::recover_lock;
use fs2::FileExt;
use std::{
    fs::{File, OpenOptions},
    path::Path,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread,
    time::{Duration, Instant},
};
use uuid::Uuid;

const UNKNOWN_ERROR: &str = "Unknown error";

/// 流中与具体操作相关的部分。
///
/// `validate` 在初始化时调用，`execute` 在流的工作线程上运行。
/// `execute` 开始时应按 ID 重新获取远程元数据，调用方给的信息可能已过期。
pub trait Operation: Send + Sync {
    fn kind(&self) -> StreamKind;
    fn file_id(&self) -> &str;
    fn title(&self) -> Option<&str> {
        None
    }
    fn validate(&self) -> ProxyResult<()>;
    fn execute(&self, ctx: &StreamContext<'_>) -> ProxyResult<Option<FileInfo>>;
}

/// 流在某一时刻的只读快照
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSnapshot {
    pub id: String,
    pub kind: Option<StreamKind>,
    pub file_id: String,
    pub title: Option<String>,
    pub status: StreamStatus,
    pub finished: bool,
    pub bytes_processed: u64,
    pub total_bytes: u64,
    pub unit: ProgressUnit,
    pub percent_completed: f64,
    pub remaining_time: Option<Duration>,
    pub error: Option<String>,
    pub error_kind: Option<&'static str>,
    pub file: Option<FileInfo>,
}

impl StreamSnapshot {
    /// 完成时返回结果文件，否则把终态转换为错误
    pub fn into_file(self) -> ProxyResult<FileInfo> {
        match self.status {
            StreamStatus::Completed => self.file.ok_or_else(|| {
                ProxyError::invalid_state("stream completed without file metadata")
            }),
            StreamStatus::Cancelled => Err(ProxyError::Cancelled),
            StreamStatus::Failed => Err(ProxyError::Operation {
                kind: self.error_kind.unwrap_or("Remote"),
                message: self.error.unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
            }),
            other => Err(ProxyError::invalid_state(format!(
                "stream {} is still {other}",
                self.id
            ))),
        }
    }
}

/// 一次文件操作的状态机：
/// NotStarted → Queued → Starting → Processing → {Cancelling → Cancelled | Completed | Failed}。
///
/// 克隆得到的是同一个流的另一个句柄。
#[derive(Clone)]
pub struct Stream {
    shared: Arc<StreamShared>,
}

struct StreamShared {
    id: String,
    state: Mutex<StreamState>,
    finished_signal: Condvar,
    cancel: CancelToken,
    factory: StreamFactory,
}

struct StreamState {
    status: StreamStatus,
    operation: Option<Arc<dyn Operation>>,
    kind: Option<StreamKind>,
    file_id: String,
    title: Option<String>,
    finished: bool,
    finishing: bool,
    cancel_requested: bool,
    worker_spawned: bool,
    progress_started: bool,
    bytes_processed: u64,
    total_bytes: u64,
    unit: ProgressUnit,
    percent_completed: f64,
    remaining_time: Option<Duration>,
    started_at: Option<Instant>,
    elapsed: Option<Duration>,
    error: Option<String>,
    error_kind: Option<&'static str>,
    file: Option<FileInfo>,
    file_lock: Option<File>,
}

impl StreamState {
    fn new() -> Self {
        Self {
            status: StreamStatus::NotStarted,
            operation: None,
            kind: None,
            file_id: String::new(),
            title: None,
            finished: false,
            finishing: false,
            cancel_requested: false,
            worker_spawned: false,
            progress_started: false,
            bytes_processed: 0,
            total_bytes: 0,
            unit: ProgressUnit::Bytes,
            percent_completed: 0.0,
            remaining_time: None,
            started_at: None,
            elapsed: None,
            error: None,
            error_kind: None,
            file: None,
            file_lock: None,
        }
    }

    fn elapsed(&self) -> Duration {
        self.elapsed
            .or_else(|| self.started_at.map(|started| started.elapsed()))
            .unwrap_or_default()
    }

    fn recompute_estimates(&mut self) {
        self.percent_completed = if self.total_bytes > 0 {
            (self.bytes_processed as f64 * 100.0 / self.total_bytes as f64).min(100.0)
        } else {
            0.0
        };
        self.remaining_time = if self.percent_completed > 0.0 {
            let elapsed = self.elapsed().as_secs_f64();
            let remaining =
                elapsed * (100.0 - self.percent_completed) / self.percent_completed;
            Some(Duration::from_secs_f64(remaining.max(0.0)))
        } else {
            None
        };
    }

    fn release_file_lock(&mut self) {
        if let Some(file) = self.file_lock.take() {
            if let Err(err) = FileExt::unlock(&file) {
                tracing::debug!(error = %err, "failed to unlock local file");
            }
        }
    }

    fn dispose(&mut self) {
        self.release_file_lock();
        if self.elapsed.is_none() {
            self.elapsed = self.started_at.map(|started| started.elapsed());
        }
        self.operation = None;
    }
}

impl Stream {
    pub(super) fn new(factory: StreamFactory) -> Self {
        Self {
            shared: Arc::new(StreamShared {
                id: Uuid::new_v4().simple().to_string(),
                state: Mutex::new(StreamState::new()),
                finished_signal: Condvar::new(),
                cancel: CancelToken::new(),
                factory,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// 校验 `operation` 并绑定到本流，只能在 NotStarted 时调用一次
    pub fn init<O: Operation + 'static>(&self, operation: O) -> ProxyResult<()> {
        self.ensure_not_started()?;
        if let Err(err) = operation.validate() {
            tracing::warn!(
                stream_id = %self.id(),
                kind = %operation.kind(),
                file_id = %operation.file_id(),
                error = %err,
                "stream initialisation rejected"
            );
            return Err(err);
        }
        let mut state = self.lock_state();
        if state.status != StreamStatus::NotStarted {
            return Err(ProxyError::invalid_state(format!(
                "stream {} is already {}",
                self.id(),
                state.status
            )));
        }
        state.kind = Some(operation.kind());
        state.file_id = operation.file_id().to_string();
        state.title = operation.title().map(str::to_string);
        state.unit = if operation.kind().locks_local_file() {
            ProgressUnit::Bytes
        } else {
            ProgressUnit::Items
        };
        state.operation = Some(Arc::new(operation));
        Ok(())
    }

    /// 入队并登记到传输队列
    pub fn queue(&self) -> ProxyResult<()> {
        let snapshot = {
            let mut state = self.lock_state();
            if state.operation.is_none() {
                return Err(ProxyError::invalid_state(format!(
                    "stream {} has not been initialised",
                    self.id()
                )));
            }
            if state.status != StreamStatus::NotStarted {
                return Err(ProxyError::invalid_state(format!(
                    "stream {} cannot be queued while {}",
                    self.id(),
                    state.status
                )));
            }
            state.status = StreamStatus::Queued;
            self.snapshot_of(&state)
        };
        self.shared.factory.transfers().track(&snapshot);
        Ok(())
    }

    /// 将已入队的流置为 Starting，并交给独立的工作线程执行
    pub fn start(&self) -> ProxyResult<()> {
        let (operation, first_start, snapshot) = {
            let mut state = self.lock_state();
            if state.status != StreamStatus::Queued {
                return Err(ProxyError::invalid_state(format!(
                    "stream {} cannot start while {}",
                    self.id(),
                    state.status
                )));
            }
            let operation = match state.operation.clone() {
                Some(operation) => operation,
                None => {
                    return Err(ProxyError::invalid_state(format!(
                        "stream {} has no operation",
                        self.id()
                    )))
                }
            };
            state.status = StreamStatus::Starting;
            if state.started_at.is_none() {
                state.started_at = Some(Instant::now());
            }
            let first_start = !state.progress_started;
            state.progress_started = true;
            state.worker_spawned = true;
            (operation, first_start, self.snapshot_of(&state))
        };

        let transfers = self.shared.factory.transfers();
        if first_start {
            transfers.started(&snapshot);
        }
        transfers.changed(&snapshot);

        let worker = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("stream-{}", operation.kind()))
            .spawn(move || worker.run(operation));
        if let Err(err) = spawned {
            tracing::error!(stream_id = %self.id(), error = %err, "failed to spawn stream worker");
            self.lock_state().worker_spawned = false;
            self.apply_progress(
                StreamStatus::Failed,
                0,
                0,
                Some(("Io", format!("failed to start worker: {err}"))),
            );
            self.finish();
            return Err(ProxyError::Io(err));
        }
        Ok(())
    }

    /// 统一的状态迁移入口。
    ///
    /// 终态不可再改；进度只在 `bytes_processed` 增大时生效。
    /// 已请求取消的流即使报告失败也记为 Cancelled；失败信息为空时记为 "Unknown error"。
    pub fn update_progress(
        &self,
        status: StreamStatus,
        bytes_processed: u64,
        total_bytes: u64,
        error: Option<String>,
    ) {
        self.apply_progress(
            status,
            bytes_processed,
            total_bytes,
            error.map(|message| ("Remote", message)),
        );
    }

    fn apply_progress(
        &self,
        status: StreamStatus,
        bytes_processed: u64,
        total_bytes: u64,
        error: Option<(&'static str, String)>,
    ) {
        let snapshot = {
            let mut state = self.lock_state();
            if state.status.is_processed() {
                return;
            }
            match status {
                StreamStatus::Completed => {
                    let total = if total_bytes > 0 {
                        total_bytes
                    } else {
                        state.total_bytes.max(state.bytes_processed)
                    };
                    state.total_bytes = total;
                    state.bytes_processed = total;
                    state.percent_completed = 100.0;
                    state.remaining_time = Some(Duration::ZERO);
                    state.status = StreamStatus::Completed;
                }
                StreamStatus::Failed | StreamStatus::Cancelled => {
                    if state.cancel_requested || status == StreamStatus::Cancelled {
                        state.status = StreamStatus::Cancelled;
                    } else {
                        let (kind, message) =
                            error.unwrap_or(("Remote", UNKNOWN_ERROR.to_string()));
                        state.status = StreamStatus::Failed;
                        state.error_kind = Some(kind);
                        state.error = Some(if message.trim().is_empty() {
                            UNKNOWN_ERROR.to_string()
                        } else {
                            message
                        });
                    }
                }
                StreamStatus::Processing | StreamStatus::Cancelling => {
                    if !state.status.is_started() {
                        tracing::warn!(stream_id = %self.id(), status = %state.status, "progress before start ignored");
                        return;
                    }
                    state.status = if state.cancel_requested || status == StreamStatus::Cancelling
                    {
                        StreamStatus::Cancelling
                    } else {
                        StreamStatus::Processing
                    };
                    if bytes_processed > state.bytes_processed {
                        state.bytes_processed = bytes_processed;
                        state.total_bytes = total_bytes.max(bytes_processed);
                        state.recompute_estimates();
                    }
                }
                other => {
                    tracing::warn!(stream_id = %self.id(), status = %other, "ignored progress update");
                    return;
                }
            }
            if state.status.is_processed() {
                state.release_file_lock();
            }
            self.snapshot_of(&state)
        };
        self.shared.factory.transfers().changed(&snapshot);
    }

    /// 请求取消。
    ///
    /// 尚未进入 Processing 时直接变为 Cancelled；处理中则置为 Cancelling
    /// 并通知工作线程。已在终态时忽略。
    pub fn cancel(&self) {
        let (snapshot, finish_now) = {
            let mut state = self.lock_state();
            if state.status.is_processed() || state.cancel_requested {
                return;
            }
            state.cancel_requested = true;
            self.shared.cancel.cancel();
            let finish_now = match state.status {
                StreamStatus::Processing | StreamStatus::Cancelling => {
                    state.status = StreamStatus::Cancelling;
                    false
                }
                _ => {
                    state.status = StreamStatus::Cancelled;
                    state.release_file_lock();
                    !state.worker_spawned
                }
            };
            (self.snapshot_of(&state), finish_now)
        };
        tracing::info!(stream_id = %self.id(), status = %snapshot.status, "stream cancellation requested");
        self.shared.factory.transfers().changed(&snapshot);
        if finish_now {
            self.finish();
        }
    }

    /// 释放文件锁并停止计时，可重复调用
    pub fn dispose(&self) {
        self.lock_state().dispose();
    }

    /// 阻塞直到流结束
    pub fn wait(&self) -> StreamSnapshot {
        let mut state = self.lock_state();
        while !state.finished {
            state = self
                .shared
                .finished_signal
                .wait(state)
                .unwrap_or_else(|poison| poison.into_inner());
        }
        self.snapshot_of(&state)
    }

    /// 同 `wait`，超时返回 `None`
    pub fn wait_timeout(&self, timeout: Duration) -> Option<StreamSnapshot> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock_state();
        while !state.finished {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .shared
                .finished_signal
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poison| poison.into_inner());
            state = guard;
        }
        Some(self.snapshot_of(&state))
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        let state = self.lock_state();
        self.snapshot_of(&state)
    }

    pub fn status(&self) -> StreamStatus {
        self.lock_state().status
    }

    /// 已进入终态且完成收尾
    pub fn is_finished(&self) -> bool {
        let state = self.lock_state();
        state.finished && state.status.is_processed()
    }

    pub fn is_processed(&self) -> bool {
        self.status().is_processed()
    }

    pub fn is_started(&self) -> bool {
        self.status().is_started()
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.lock_state().cancel_requested
    }

    /// 是否仍持有本地文件锁
    pub fn holds_file_lock(&self) -> bool {
        self.lock_state().file_lock.is_some()
    }

    fn run(&self, operation: Arc<dyn Operation>) {
        let span = tracing::info_span!(
            "stream",
            stream_id = %self.id(),
            kind = %operation.kind(),
            file_id = %operation.file_id()
        );
        let _entered = span.enter();

        let ctx = StreamContext { stream: self };
        let result = if self.is_processed() {
            Err(ProxyError::Cancelled)
        } else {
            operation.execute(&ctx)
        };
        match result {
            Ok(file) => {
                if let Some(file) = file {
                    ctx.set_file(file);
                }
                self.apply_progress(StreamStatus::Completed, 0, 0, None);
            }
            Err(err) if err.is_cancelled() => {
                tracing::info!("stream cancelled");
                self.apply_progress(StreamStatus::Cancelled, 0, 0, None);
            }
            Err(err) => {
                tracing::warn!(error = %err, "stream failed");
                self.apply_progress(
                    StreamStatus::Failed,
                    0,
                    0,
                    Some((err.kind(), err.to_string())),
                );
            }
        }
        self.finish();
    }

    /// 收尾：释放资源、上报队列并唤醒等待者；只执行一次
    fn finish(&self) {
        let snapshot = {
            let mut state = self.lock_state();
            if state.finished || state.finishing {
                return;
            }
            state.finishing = true;
            state.dispose();
            let mut snapshot = self.snapshot_of(&state);
            snapshot.finished = true;
            snapshot
        };
        self.shared.factory.transfers().finished(&snapshot);
        self.lock_state().finished = true;
        self.shared.finished_signal.notify_all();
        tracing::debug!(stream_id = %self.id(), status = %snapshot.status, "stream finished");
    }

    fn ensure_not_started(&self) -> ProxyResult<()> {
        let state = self.lock_state();
        if state.status != StreamStatus::NotStarted {
            return Err(ProxyError::invalid_state(format!(
                "stream {} is already {}",
                self.id(),
                state.status
            )));
        }
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, StreamState> {
        recover_lock(&self.shared.state)
    }

    fn snapshot_of(&self, state: &StreamState) -> StreamSnapshot {
        StreamSnapshot {
            id: self.shared.id.clone(),
            kind: state.kind,
            file_id: state.file_id.clone(),
            title: state.title.clone(),
            status: state.status,
            finished: state.finished,
            bytes_processed: state.bytes_processed,
            total_bytes: state.total_bytes,
            unit: state.unit,
            percent_completed: state.percent_completed,
            remaining_time: state.remaining_time,
            error: state.error.clone(),
            error_kind: state.error_kind,
            file: state.file.clone(),
        }
    }
}

/// 锁定本地文件时的访问方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAccess {
    Read,
    Write,
}

/// 传给 `Operation::execute` 的上下文，用于汇报进度和访问资源
pub struct StreamContext<'a> {
    stream: &'a Stream,
}

impl<'a> StreamContext<'a> {
    pub fn stream_id(&self) -> &str {
        self.stream.id()
    }

    pub fn service(&self) -> &Arc<dyn RemoteFileService> {
        self.stream.shared.factory.service()
    }

    pub fn factory(&self) -> &StreamFactory {
        &self.stream.shared.factory
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.stream.shared.cancel
    }

    /// 已请求取消时返回 `ProxyError::Cancelled`
    pub fn check_cancelled(&self) -> ProxyResult<()> {
        self.stream.shared.cancel.check()
    }

    /// 进入 Processing，不改动进度总量
    pub fn enter_processing(&self) -> ProxyResult<()> {
        self.transition_to_processing(None)
    }

    /// 进入 Processing，并以给定单位重置进度总量。
    ///
    /// 若在 Starting 期间已被取消，返回 `ProxyError::Cancelled`。
    pub fn begin_processing(&self, total: u64, unit: ProgressUnit) -> ProxyResult<()> {
        self.transition_to_processing(Some((total, unit)))
    }

    fn transition_to_processing(&self, totals: Option<(u64, ProgressUnit)>) -> ProxyResult<()> {
        let snapshot = {
            let mut state = self.stream.lock_state();
            if state.cancel_requested || state.status.is_processed() {
                return Err(ProxyError::Cancelled);
            }
            match state.status {
                StreamStatus::Starting | StreamStatus::Processing => {}
                other => {
                    return Err(ProxyError::invalid_state(format!(
                        "stream {} cannot process while {other}",
                        self.stream.id()
                    )))
                }
            }
            state.status = StreamStatus::Processing;
            if let Some((total, unit)) = totals {
                state.total_bytes = total;
                state.unit = unit;
                state.bytes_processed = 0;
                state.recompute_estimates();
            }
            self.stream.snapshot_of(&state)
        };
        self.stream.shared.factory.transfers().changed(&snapshot);
        Ok(())
    }

    /// 汇报进度
    pub fn report(&self, processed: u64, total: u64) {
        self.stream
            .update_progress(StreamStatus::Processing, processed, total, None);
    }

    /// 记录操作涉及（或产出）的文件
    pub fn set_file(&self, file: FileInfo) {
        let mut state = self.stream.lock_state();
        if state.title.is_none() {
            state.title = Some(file.title.clone());
        }
        state.file = Some(file);
    }

    /// 打开 `path` 并加独占锁，锁由流持有直到进入终态；返回的句柄共享这把锁
    pub fn lock_file(&self, path: &Path, access: FileAccess) -> ProxyResult<File> {
        let file = match access {
            FileAccess::Read => OpenOptions::new().read(true).open(path)?,
            FileAccess::Write => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?,
        };
        file.try_lock_exclusive().map_err(|e| {
            ProxyError::invalid_state(format!("{} is locked: {e}", path.display()))
        })?;
        let handle = file.try_clone()?;

        let mut state = self.stream.lock_state();
        if state.cancel_requested || state.status.is_processed() {
            if let Err(err) = FileExt::unlock(&file) {
                tracing::debug!(error = %err, "failed to unlock local file");
            }
            return Err(ProxyError::Cancelled);
        }
        state.release_file_lock();
        state.file_lock = Some(file);
        Ok(handle)
    }
}
