use super::{
    core::StreamSnapshot,
    status::{ProgressUnit, StreamStatus},
    storage::{MemoryTransferStore, TransferStore},
};
use crate::recover_lock;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::{
    collections::HashMap,
    io,
    path::PathBuf,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

pub(crate) const INTERRUPTED_TRANSFER_MESSAGE: &str =
    "the service stopped before this transfer finished";
const PROGRESS_CHANNEL_CAP: usize = 64;
const PERSIST_BYTES_THRESHOLD: u64 = 256 * 1024;
const PERSIST_INTERVAL: Duration = Duration::from_secs(1);
const SPEED_SAMPLE_MIN_INTERVAL: Duration = Duration::from_millis(300);
/// 已完成、失败列表各自保留的最大条数，超出的最旧记录同时从存储中删除
pub const MAX_HISTORY: usize = 200;

/// 队列中一条流的记录，流本身结束后仍保留在历史里
#[derive(Debug, Clone, PartialEq)]
pub struct TransferEntry {
    pub stream_id: String,
    pub kind: String,
    pub file_id: String,
    pub title: Option<String>,
    pub status: StreamStatus,
    pub unit: ProgressUnit,
    pub bytes_processed: u64,
    pub total_bytes: u64,
    pub local_path: Option<PathBuf>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub error_message: Option<String>,
}

/// 队列的只读快照，历史列表按完成时间从新到旧排列
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueState {
    pub active: Vec<TransferEntry>,
    pub completed: Vec<TransferEntry>,
    pub failed: Vec<TransferEntry>,
}

/// 推送给订阅者的事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEventKind {
    Started,
    Changed,
    Finished,
}

/// 订阅者收到的事件；`speed_bps` 仅在采样间隔足够时给出
#[derive(Debug, Clone, PartialEq)]
pub struct TransferEvent {
    pub kind: TransferEventKind,
    pub entry: TransferEntry,
    pub speed_bps: Option<f64>,
    pub timestamp_millis: i64,
}

/// 进程内的流队列：维护进行中、已完成、失败三个列表，
/// 计算传输速度，向订阅者广播事件并持久化记录。
#[derive(Clone)]
pub struct TransferQueue {
    state: Arc<Mutex<InnerState>>,
    store: Arc<dyn TransferStore>,
    progress_meters: Arc<Mutex<HashMap<String, ProgressTick>>>,
    persist_markers: Arc<Mutex<HashMap<String, PersistMarker>>>,
    subscribers: Arc<Mutex<Vec<Sender<TransferEvent>>>>,
}

#[derive(Clone, Default)]
struct InnerState {
    active: Vec<TransferEntry>,
    completed: Vec<TransferEntry>,
    failed: Vec<TransferEntry>,
}

struct ProgressTick {
    bytes_processed: u64,
    instant: Instant,
}

struct PersistMarker {
    bytes_processed: u64,
    instant: Instant,
}

impl TransferQueue {
    /// 创建队列并从 `store` 恢复历史
    pub fn new(store: Arc<dyn TransferStore>) -> Self {
        let queue = Self {
            state: Arc::new(Mutex::new(InnerState::default())),
            store,
            progress_meters: Arc::new(Mutex::new(HashMap::new())),
            persist_markers: Arc::new(Mutex::new(HashMap::new())),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        };
        queue.restore_from_storage();
        queue
    }

    /// 不落盘的队列
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryTransferStore::default()))
    }

    /// 从存储加载历史记录。
    ///
    /// 仍处于进行中的记录属于上一个进程，一律标记为失败；
    /// 超出 `MAX_HISTORY` 的旧记录直接清理。
    fn restore_from_storage(&self) {
        let mut completed = Vec::new();
        let mut failed = Vec::new();
        for mut entry in self.store.load() {
            match entry.status {
                StreamStatus::Completed => completed.push(entry),
                StreamStatus::Cancelled | StreamStatus::Failed => failed.push(entry),
                _ => {
                    entry.status = StreamStatus::Failed;
                    entry.completed_at = Some(current_timestamp());
                    if entry.error_message.is_none() {
                        entry.error_message = Some(INTERRUPTED_TRANSFER_MESSAGE.to_string());
                    }
                    self.store.upsert(&entry);
                    failed.push(entry);
                }
            }
        }
        completed.sort_by_key(|entry| std::cmp::Reverse(entry.completed_at));
        failed.sort_by_key(|entry| std::cmp::Reverse(entry.completed_at));
        let mut evicted = trim_history(&mut completed);
        evicted.extend(trim_history(&mut failed));
        for entry in &evicted {
            self.store.remove(&entry.stream_id);
        }
        let mut state = recover_lock(&self.state);
        state.completed = completed;
        state.failed = failed;
    }

    /// 登记一个刚入队的流
    pub fn track(&self, snapshot: &StreamSnapshot) {
        let entry = entry_from_snapshot(snapshot, current_timestamp());
        let mut state = recover_lock(&self.state);
        state.active.retain(|e| e.stream_id != entry.stream_id);
        state.active.push(entry.clone());
        drop(state);
        self.store.upsert(&entry);
    }

    /// 流第一次启动
    pub fn started(&self, snapshot: &StreamSnapshot) {
        if let Some(entry) = self.update_active(snapshot) {
            self.store.upsert(&entry);
            self.broadcast(TransferEventKind::Started, entry, None);
        }
    }

    /// 状态或进度变化；进度按字节数或时间间隔节流后落盘
    pub fn changed(&self, snapshot: &StreamSnapshot) {
        if let Some(entry) = self.update_active(snapshot) {
            if self.should_persist_progress(&entry.stream_id, entry.bytes_processed) {
                self.store.upsert(&entry);
            }
            let speed = self.compute_speed_bps(&entry.stream_id, entry.bytes_processed);
            self.broadcast(TransferEventKind::Changed, entry, speed);
        }
    }

    /// 将结束的流移入已完成或失败列表，并淘汰超出上限的旧记录
    pub fn finished(&self, snapshot: &StreamSnapshot) {
        let mut state = recover_lock(&self.state);
        let Some(position) = state
            .active
            .iter()
            .position(|e| e.stream_id == snapshot.id)
        else {
            return;
        };
        let previous = state.active.remove(position);
        let mut entry = entry_from_snapshot(snapshot, previous.started_at);
        entry.completed_at = Some(current_timestamp());
        let history = if entry.status == StreamStatus::Completed {
            &mut state.completed
        } else {
            &mut state.failed
        };
        history.insert(0, entry.clone());
        let evicted = trim_history(history);
        drop(state);
        self.store.upsert(&entry);
        for old in &evicted {
            self.store.remove(&old.stream_id);
        }
        self.clear_trackers(&entry.stream_id);
        self.broadcast(TransferEventKind::Finished, entry, None);
    }

    pub fn snapshot(&self) -> QueueState {
        recover_lock(&self.state).clone().into()
    }

    pub fn active_count(&self) -> usize {
        recover_lock(&self.state).active.len()
    }

    /// 新建一个事件接收端；先补发当前进行中的流。
    ///
    /// 通道有界，接收端跟不上时事件被丢弃而不阻塞流；
    /// 接收端断开后下次广播时自动移除。
    pub fn subscribe(&self) -> Receiver<TransferEvent> {
        let (tx, rx) = bounded(PROGRESS_CHANNEL_CAP);
        let state = recover_lock(&self.state);
        for entry in &state.active {
            let _ = tx.try_send(TransferEvent {
                kind: TransferEventKind::Changed,
                entry: entry.clone(),
                speed_bps: None,
                timestamp_millis: current_timestamp(),
            });
        }
        drop(state);
        recover_lock(&self.subscribers).push(tx);
        rx
    }

    /// 启动后台线程，把队列事件写入日志（含传输速度）。
    ///
    /// 线程在队列的所有句柄释放后退出。
    pub fn spawn_event_logger(&self) -> io::Result<JoinHandle<()>> {
        let events = self.subscribe();
        thread::Builder::new()
            .name("transfer-log".to_string())
            .spawn(move || {
                for event in events {
                    log_event(&event);
                }
            })
    }

    fn update_active(&self, snapshot: &StreamSnapshot) -> Option<TransferEntry> {
        let mut state = recover_lock(&self.state);
        let entry = state
            .active
            .iter_mut()
            .find(|e| e.stream_id == snapshot.id)?;
        *entry = entry_from_snapshot(snapshot, entry.started_at);
        Some(entry.clone())
    }

    fn broadcast(&self, kind: TransferEventKind, entry: TransferEntry, speed_bps: Option<f64>) {
        let event = TransferEvent {
            kind,
            entry,
            speed_bps,
            timestamp_millis: current_timestamp(),
        };
        let mut subs = recover_lock(&self.subscribers);
        subs.retain(|sender| match sender.try_send(event.clone()) {
            Ok(_) => true,
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    fn compute_speed_bps(&self, stream_id: &str, bytes_processed: u64) -> Option<f64> {
        let now = Instant::now();
        let mut meters = recover_lock(&self.progress_meters);
        let entry = meters
            .entry(stream_id.to_string())
            .or_insert_with(|| ProgressTick {
                bytes_processed,
                instant: now,
            });
        let delta_bytes = bytes_processed.saturating_sub(entry.bytes_processed);
        let elapsed = now.duration_since(entry.instant);
        if delta_bytes == 0 || elapsed < SPEED_SAMPLE_MIN_INTERVAL {
            return None;
        }
        entry.bytes_processed = bytes_processed;
        entry.instant = now;
        Some(delta_bytes as f64 / elapsed.as_secs_f64())
    }

    fn should_persist_progress(&self, stream_id: &str, bytes_processed: u64) -> bool {
        let now = Instant::now();
        let mut inserted = false;
        let mut markers = recover_lock(&self.persist_markers);
        let entry = markers.entry(stream_id.to_string()).or_insert_with(|| {
            inserted = true;
            PersistMarker {
                bytes_processed,
                instant: now,
            }
        });
        if inserted {
            return true;
        }
        let delta_bytes = bytes_processed.saturating_sub(entry.bytes_processed);
        let elapsed = now.duration_since(entry.instant);
        if delta_bytes >= PERSIST_BYTES_THRESHOLD || elapsed >= PERSIST_INTERVAL {
            entry.bytes_processed = bytes_processed;
            entry.instant = now;
            return true;
        }
        false
    }

    fn clear_trackers(&self, stream_id: &str) {
        recover_lock(&self.progress_meters).remove(stream_id);
        recover_lock(&self.persist_markers).remove(stream_id);
    }
}

/// 截断到 `MAX_HISTORY` 条，返回被淘汰的记录
fn trim_history(history: &mut Vec<TransferEntry>) -> Vec<TransferEntry> {
    if history.len() > MAX_HISTORY {
        history.split_off(MAX_HISTORY)
    } else {
        Vec::new()
    }
}

fn log_event(event: &TransferEvent) {
    let entry = &event.entry;
    match event.kind {
        TransferEventKind::Started => tracing::info!(
            stream_id = %entry.stream_id,
            kind = %entry.kind,
            file_id = %entry.file_id,
            title = entry.title.as_deref().unwrap_or_default(),
            "transfer started"
        ),
        TransferEventKind::Changed => {
            if let Some(speed_bps) = event.speed_bps {
                tracing::debug!(
                    stream_id = %entry.stream_id,
                    processed = entry.bytes_processed,
                    total = entry.total_bytes,
                    speed_bps = speed_bps.round() as u64,
                    "transfer progress"
                );
            }
        }
        TransferEventKind::Finished => tracing::info!(
            stream_id = %entry.stream_id,
            kind = %entry.kind,
            status = %entry.status,
            processed = entry.bytes_processed,
            error = entry.error_message.as_deref().unwrap_or_default(),
            "transfer finished"
        ),
    }
}

impl From<InnerState> for QueueState {
    fn from(value: InnerState) -> Self {
        Self {
            active: value.active,
            completed: value.completed,
            failed: value.failed,
        }
    }
}

fn entry_from_snapshot(snapshot: &StreamSnapshot, started_at: i64) -> TransferEntry {
    TransferEntry {
        stream_id: snapshot.id.clone(),
        kind: snapshot
            .kind
            .map(|kind| kind.as_str().to_string())
            .unwrap_or_default(),
        file_id: snapshot.file_id.clone(),
        title: snapshot.title.clone(),
        status: snapshot.status,
        unit: snapshot.unit,
        bytes_processed: snapshot.bytes_processed,
        total_bytes: snapshot.total_bytes,
        local_path: snapshot.file.as_ref().and_then(|f| f.file_path.clone()),
        started_at,
        completed_at: None,
        error_message: snapshot.error.clone(),
    }
}

pub(crate) fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::status::StreamKind;

    fn snapshot(id: &str, status: StreamStatus, bytes: u64) -> StreamSnapshot {
        StreamSnapshot {
            id: id.to_string(),
            kind: Some(StreamKind::Download),
            file_id: "f1".to_string(),
            title: Some("a.bin".to_string()),
            status,
            finished: false,
            bytes_processed: bytes,
            total_bytes: 100,
            unit: ProgressUnit::Bytes,
            percent_completed: bytes as f64,
            remaining_time: None,
            error: None,
            error_kind: None,
            file: None,
        }
    }

    #[test]
    fn test_lifecycle_moves_entry_between_lists() {
        let queue = TransferQueue::in_memory();
        let events = queue.subscribe();
        queue.track(&snapshot("s1", StreamStatus::Queued, 0));
        queue.started(&snapshot("s1", StreamStatus::Starting, 0));
        queue.changed(&snapshot("s1", StreamStatus::Processing, 40));
        assert_eq!(queue.active_count(), 1);

        queue.finished(&snapshot("s1", StreamStatus::Completed, 100));
        let state = queue.snapshot();
        assert!(state.active.is_empty());
        assert_eq!(state.completed.len(), 1);
        assert!(state.completed[0].completed_at.is_some());

        let kinds: Vec<TransferEventKind> = events.try_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TransferEventKind::Started,
                TransferEventKind::Changed,
                TransferEventKind::Finished
            ]
        );
    }

    #[test]
    fn test_unfinished_entries_are_restored_as_failed() {
        let store = Arc::new(MemoryTransferStore::default());
        {
            let queue = TransferQueue::new(store.clone());
            queue.track(&snapshot("s1", StreamStatus::Queued, 0));
            queue.changed(&snapshot("s1", StreamStatus::Processing, 10));
        }
        let restored = TransferQueue::new(store);
        let state = restored.snapshot();
        assert!(state.active.is_empty());
        assert_eq!(state.failed.len(), 1);
        assert_eq!(state.failed[0].status, StreamStatus::Failed);
        assert_eq!(
            state.failed[0].error_message.as_deref(),
            Some(INTERRUPTED_TRANSFER_MESSAGE)
        );
    }

    #[test]
    fn test_cancelled_streams_land_in_failed_history() {
        let queue = TransferQueue::in_memory();
        queue.track(&snapshot("s2", StreamStatus::Queued, 0));
        queue.finished(&snapshot("s2", StreamStatus::Cancelled, 0));
        let failed = queue.snapshot().failed;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status, StreamStatus::Cancelled);
    }

    #[test]
    fn test_history_is_capped_in_memory_and_in_the_store() {
        let store = Arc::new(MemoryTransferStore::default());
        let queue = TransferQueue::new(store.clone());
        let runs = MAX_HISTORY + 25;
        for n in 0..runs {
            let id = format!("s{n}");
            queue.track(&snapshot(&id, StreamStatus::Queued, 0));
            queue.finished(&snapshot(&id, StreamStatus::Completed, 100));
        }
        queue.track(&snapshot("bad", StreamStatus::Queued, 0));
        queue.finished(&snapshot("bad", StreamStatus::Failed, 0));

        let state = queue.snapshot();
        assert_eq!(state.completed.len(), MAX_HISTORY);
        assert_eq!(state.completed[0].stream_id, format!("s{}", runs - 1));
        assert!(state.completed.iter().all(|e| e.stream_id != "s0"));
        assert_eq!(state.failed.len(), 1);
        assert_eq!(store.load().len(), MAX_HISTORY + 1);
    }

    #[test]
    fn test_restore_trims_oversized_history() {
        let store = Arc::new(MemoryTransferStore::default());
        for n in 0..MAX_HISTORY + 10 {
            let mut entry = entry_from_snapshot(
                &snapshot(&format!("s{n}"), StreamStatus::Completed, 100),
                n as i64,
            );
            entry.completed_at = Some(n as i64);
            store.upsert(&entry);
        }
        let queue = TransferQueue::new(store.clone());
        let completed = queue.snapshot().completed;
        assert_eq!(completed.len(), MAX_HISTORY);
        assert_eq!(completed[0].stream_id, format!("s{}", MAX_HISTORY + 9));
        assert_eq!(store.load().len(), MAX_HISTORY);
    }

    #[test]
    fn test_event_logger_drains_until_queue_is_dropped() {
        let queue = TransferQueue::in_memory();
        let logger = queue.spawn_event_logger().unwrap();
        queue.track(&snapshot("s1", StreamStatus::Queued, 0));
        queue.started(&snapshot("s1", StreamStatus::Starting, 0));
        queue.changed(&snapshot("s1", StreamStatus::Processing, 50));
        queue.finished(&snapshot("s1", StreamStatus::Completed, 100));
        drop(queue);
        logger.join().unwrap();
    }

    #[test]
    fn test_speed_is_sampled_between_progress_events() {
        let queue = TransferQueue::in_memory();
        let events = queue.subscribe();
        queue.track(&snapshot("s1", StreamStatus::Queued, 0));
        queue.changed(&snapshot("s1", StreamStatus::Processing, 10));
        thread::sleep(SPEED_SAMPLE_MIN_INTERVAL + Duration::from_millis(50));
        queue.changed(&snapshot("s1", StreamStatus::Processing, 60));

        let speeds: Vec<Option<f64>> = events.try_iter().map(|e| e.speed_bps).collect();
        assert_eq!(speeds.len(), 2);
        assert!(speeds[0].is_none());
        assert!(speeds[1].is_some_and(|bps| bps > 0.0));
    }
}
