use crossbeam_channel::{bounded, Receiver, Sender};
use drive_proxy::api::drive::{FileInfo, MemoryDrive, RemoteFileService, FOLDER_MIME_TYPE};
use drive_proxy::error::{ProxyError, ProxyResult};
use drive_proxy::stream::{
    CopyOperation, DownloadOperation, InsertOperation, MoveOperation, Operation, ProgressUnit,
    RenameOperation, StreamContext, StreamFactory, StreamKind, StreamStatus, TransferQueue,
    TrashOperation, UntrashOperation, UploadOperation, MIN_CHUNK_SIZE,
};
use std::{
    fs,
    path::PathBuf,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    drive: Arc<MemoryDrive>,
    factory: StreamFactory,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let drive = Arc::new(MemoryDrive::new(dir.path().join("mirror")));
    let service: Arc<dyn RemoteFileService> = drive.clone();
    let factory = StreamFactory::new(service, TransferQueue::in_memory());
    Harness {
        _dir: dir,
        drive,
        factory,
    }
}

impl Harness {
    fn file(&self, id: &str) -> FileInfo {
        self.drive.get_file(id).unwrap()
    }

    fn write_local(&self, id: &str, content: &[u8]) -> PathBuf {
        let path = self.file(id).file_path.unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }
}

fn wait_for_status(stream: &drive_proxy::stream::Stream, status: StreamStatus) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while stream.status() != status {
        assert!(Instant::now() < deadline, "stream never reached {status}");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Reports progress out of order.
struct Scripted;

impl Operation for Scripted {
    fn kind(&self) -> StreamKind {
        StreamKind::Insert
    }

    fn file_id(&self) -> &str {
        "scripted"
    }

    fn validate(&self) -> ProxyResult<()> {
        Ok(())
    }

    fn execute(&self, ctx: &StreamContext<'_>) -> ProxyResult<Option<FileInfo>> {
        ctx.begin_processing(100, ProgressUnit::Items)?;
        ctx.report(60, 100);
        ctx.report(30, 100);
        Ok(Some(FileInfo {
            id: "scripted".into(),
            title: "scripted".into(),
            ..FileInfo::default()
        }))
    }
}

/// Waits for cancellation, then fails the way a dropped connection would.
struct FailsOnceCancelled;

impl Operation for FailsOnceCancelled {
    fn kind(&self) -> StreamKind {
        StreamKind::Download
    }

    fn file_id(&self) -> &str {
        "fails-once-cancelled"
    }

    fn validate(&self) -> ProxyResult<()> {
        Ok(())
    }

    fn execute(&self, ctx: &StreamContext<'_>) -> ProxyResult<Option<FileInfo>> {
        ctx.begin_processing(10, ProgressUnit::Bytes)?;
        let deadline = Instant::now() + Duration::from_secs(5);
        while !ctx.cancel_token().is_cancelled() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        Err(ProxyError::Remote("connection dropped".into()))
    }
}

/// Fails with a blank message.
struct FailsSilently;

impl Operation for FailsSilently {
    fn kind(&self) -> StreamKind {
        StreamKind::Upload
    }

    fn file_id(&self) -> &str {
        "fails-silently"
    }

    fn validate(&self) -> ProxyResult<()> {
        Ok(())
    }

    fn execute(&self, ctx: &StreamContext<'_>) -> ProxyResult<Option<FileInfo>> {
        ctx.begin_processing(1, ProgressUnit::Items)?;
        Err(ProxyError::Operation {
            kind: "Remote",
            message: "  ".into(),
        })
    }
}

/// Blocks in Starting until the test opens the gate, then reports whether
/// it was still allowed to begin processing.
struct Gated {
    entered: Sender<()>,
    gate: Receiver<()>,
    began: Sender<bool>,
}

impl Operation for Gated {
    fn kind(&self) -> StreamKind {
        StreamKind::Insert
    }

    fn file_id(&self) -> &str {
        "gated"
    }

    fn validate(&self) -> ProxyResult<()> {
        Ok(())
    }

    fn execute(&self, ctx: &StreamContext<'_>) -> ProxyResult<Option<FileInfo>> {
        let _ = self.entered.send(());
        let _ = self.gate.recv();
        let began = ctx.begin_processing(1, ProgressUnit::Items);
        let _ = self.began.send(began.is_ok());
        began?;
        Ok(None)
    }
}

#[test]
fn lifecycle_calls_out_of_order_fail() {
    let h = harness();
    let stream = h.factory.create();
    assert!(stream.queue().is_err());

    let id = h.drive.add_file(&h.drive.root_id(), "a.txt", b"abc");
    stream.init(TrashOperation::new(h.file(&id))).unwrap();
    assert!(stream.start().is_err());
    stream.queue().unwrap();
    assert_eq!(stream.status(), StreamStatus::Queued);
    assert!(stream.init(TrashOperation::new(h.file(&id))).is_err());
    assert!(stream.queue().is_err());

    stream.start().unwrap();
    let snapshot = stream.wait();
    assert_eq!(snapshot.status, StreamStatus::Completed);
    assert!(stream.is_finished());
}

#[test]
fn progress_never_goes_backwards() {
    let h = harness();
    let events = h.factory.transfers().subscribe();
    let snapshot = h.factory.run(Scripted).unwrap();
    assert_eq!(snapshot.status, StreamStatus::Completed);
    assert_eq!(snapshot.bytes_processed, 100);
    assert_eq!(snapshot.unit, ProgressUnit::Items);

    let seen: Vec<u64> = events
        .try_iter()
        .filter(|event| event.entry.stream_id == snapshot.id)
        .map(|event| event.entry.bytes_processed)
        .collect();
    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]), "{seen:?}");
    assert!(seen.contains(&60));
    assert!(!seen.contains(&30));
}

#[test]
fn download_writes_local_copy_and_skips_when_synced() {
    let h = harness();
    let content = b"remote content".repeat(50);
    let id = h.drive.add_file(&h.drive.root_id(), "report.bin", &content);

    let snapshot = h.factory.run(DownloadOperation::new(h.file(&id))).unwrap();
    assert_eq!(snapshot.status, StreamStatus::Completed);
    assert_eq!(snapshot.bytes_processed, content.len() as u64);
    assert_eq!(snapshot.total_bytes, content.len() as u64);
    let file = snapshot.clone().into_file().unwrap();
    assert_eq!(fs::read(file.file_path.unwrap()).unwrap(), content);
    assert!(h
        .factory
        .transfers()
        .snapshot()
        .completed
        .iter()
        .any(|entry| entry.stream_id == snapshot.id));

    let again = h.factory.run(DownloadOperation::new(h.file(&id))).unwrap();
    assert_eq!(again.status, StreamStatus::Completed);
    assert_eq!(again.bytes_processed, 0);
    assert_eq!(h.drive.call_count("download"), 1);

    let forced = h
        .factory
        .run(DownloadOperation::new(h.file(&id)).check_if_synced(false))
        .unwrap();
    assert_eq!(forced.status, StreamStatus::Completed);
    assert_eq!(h.drive.call_count("download"), 2);
}

#[test]
fn upload_replaces_remote_content() {
    let h = harness();
    let id = h.drive.add_file(&h.drive.root_id(), "notes.txt", b"old");
    h.write_local(&id, b"new content");

    let snapshot = h.factory.run(UploadOperation::new(h.file(&id))).unwrap();
    assert_eq!(snapshot.status, StreamStatus::Completed);
    assert_eq!(snapshot.bytes_processed, 11);
    assert_eq!(h.drive.content(&id).unwrap(), b"new content");
    assert!(!snapshot.into_file().unwrap().is_folder);
}

#[test]
fn init_rejects_invalid_targets() {
    let h = harness();
    let root = h.file(&h.drive.root_id());
    assert!(matches!(
        h.factory.spawn(RenameOperation::new(root.clone(), "x")),
        Err(ProxyError::InvalidArgument(_))
    ));
    assert!(matches!(
        h.factory.spawn(DownloadOperation::new(root.clone())),
        Err(ProxyError::InvalidArgument(_))
    ));

    let id = h.drive.add_file(&h.drive.root_id(), "missing-locally.txt", b"x");
    assert!(h.factory.spawn(UploadOperation::new(h.file(&id))).is_err());
    assert!(h
        .factory
        .spawn(MoveOperation::new(h.file(&id), id.clone()))
        .is_err());
    assert!(h
        .factory
        .spawn(InsertOperation::new(root.id, "  ", None))
        .is_err());
}

#[test]
fn cancel_before_processing_is_immediate() {
    let h = harness();
    let id = h.drive.add_file(&h.drive.root_id(), "a.txt", b"abc");
    let stream = h.factory.create();
    stream.init(TrashOperation::new(h.file(&id))).unwrap();
    stream.queue().unwrap();

    stream.cancel();
    assert_eq!(stream.status(), StreamStatus::Cancelled);
    assert!(stream.is_finished());
    assert!(stream.start().is_err());
    assert_eq!(h.drive.call_count("trash"), 0);
    assert_eq!(h.factory.transfers().snapshot().failed.len(), 1);
}

#[test]
fn cancel_during_transfer_stops_it_and_releases_the_lock() {
    let h = harness();
    let content = vec![7u8; (4 * MIN_CHUNK_SIZE) as usize];
    let id = h.drive.add_file(&h.drive.root_id(), "big.bin", &content);
    h.drive.set_transfer_delay(Duration::from_millis(150));

    let stream = h
        .factory
        .spawn(DownloadOperation::new(h.file(&id)).chunk_size(Some(MIN_CHUNK_SIZE)))
        .unwrap();
    wait_for_status(&stream, StreamStatus::Processing);
    stream.cancel();
    assert!(matches!(
        stream.status(),
        StreamStatus::Cancelling | StreamStatus::Cancelled
    ));

    let snapshot = stream.wait();
    assert_eq!(snapshot.status, StreamStatus::Cancelled);
    assert!(snapshot.bytes_processed < content.len() as u64);
    assert!(!stream.holds_file_lock());
    assert!(matches!(snapshot.into_file(), Err(ProxyError::Cancelled)));
}

#[test]
fn cancel_after_completion_is_a_no_op() {
    let h = harness();
    let id = h.drive.add_file(&h.drive.root_id(), "a.txt", b"abc");
    let stream = h.factory.spawn(TrashOperation::new(h.file(&id))).unwrap();
    stream.wait();
    stream.cancel();
    assert_eq!(stream.status(), StreamStatus::Completed);
    assert!(!stream.is_cancellation_requested());
}

#[test]
fn move_into_current_parent_makes_no_remote_call() {
    let h = harness();
    let id = h.drive.add_file(&h.drive.root_id(), "a.txt", b"abc");
    let file = h.file(&id);

    let snapshot = h
        .factory
        .run(MoveOperation::new(file.clone(), h.drive.root_id()))
        .unwrap();
    assert_eq!(snapshot.status, StreamStatus::Completed);
    assert_eq!(snapshot.bytes_processed, snapshot.total_bytes);
    assert_eq!(h.drive.call_count("move"), 0);
    assert_eq!(snapshot.into_file().unwrap(), file);
}

#[test]
fn move_relocates_local_copy() {
    let h = harness();
    let dest = h.drive.add_folder(&h.drive.root_id(), "Dest");
    let id = h.drive.add_file(&h.drive.root_id(), "a.txt", b"abc");
    let old_path = h.write_local(&id, b"abc");

    let moved = h
        .factory
        .run(MoveOperation::new(h.file(&id), dest.clone()))
        .unwrap()
        .into_file()
        .unwrap();
    assert_eq!(moved.parent_id.as_deref(), Some(dest.as_str()));
    assert!(!old_path.exists());
    assert!(moved.file_path.unwrap().exists());
}

#[test]
fn insert_numbers_duplicate_titles() {
    let h = harness();
    let root = h.drive.root_id();
    h.drive.add_file(&root, "Report.txt", b"");

    let first = h
        .factory
        .run(InsertOperation::new(root.clone(), "Report.txt", None))
        .unwrap()
        .into_file()
        .unwrap();
    assert_eq!(first.title, "Report (1).txt");
    let second = h
        .factory
        .run(InsertOperation::new(root.clone(), "Report.txt", None))
        .unwrap()
        .into_file()
        .unwrap();
    assert_eq!(second.title, "Report (2).txt");

    let folder = h
        .factory
        .run(InsertOperation::new(
            root,
            "Report.txt",
            Some(FOLDER_MIME_TYPE.to_string()),
        ))
        .unwrap()
        .into_file()
        .unwrap();
    assert_eq!(folder.title, "Report.txt");
    assert!(folder.file_path.unwrap().is_dir());
}

#[test]
fn folder_copy_counts_every_item() {
    let h = harness();
    let root = h.drive.root_id();
    let source = h.drive.add_folder(&root, "Src");
    h.drive.add_file(&source, "a.txt", b"a");
    h.drive.add_file(&source, "b.txt", b"b");
    let dest = h.drive.add_folder(&root, "Dest");

    let events = h.factory.transfers().subscribe();
    let snapshot = h
        .factory
        .run(CopyOperation::new(h.file(&source), dest.clone()))
        .unwrap();
    assert_eq!(snapshot.status, StreamStatus::Completed);
    assert_eq!(snapshot.unit, ProgressUnit::Items);
    assert_eq!(snapshot.total_bytes, 3);
    assert_eq!(snapshot.bytes_processed, 3);

    let mut progress: Vec<u64> = events
        .try_iter()
        .filter(|event| event.entry.stream_id == snapshot.id)
        .map(|event| event.entry.bytes_processed)
        .collect();
    progress.dedup();
    assert_eq!(progress, vec![0, 1, 2, 3]);

    let copied = snapshot.into_file().unwrap();
    assert_eq!(copied.parent_id.as_deref(), Some(dest.as_str()));
    assert_eq!(h.drive.get_children(&copied.id).unwrap().len(), 2);
    assert_eq!(h.drive.call_count("copy"), 2);
}

#[test]
fn folder_copy_aborts_when_a_child_fails() {
    let h = harness();
    let root = h.drive.root_id();
    let source = h.drive.add_folder(&root, "Src");
    h.drive.add_file(&source, "a.txt", b"a");
    h.drive.fail_on("copy", "quota exceeded");

    let snapshot = h
        .factory
        .run(CopyOperation::new(h.file(&source), root))
        .unwrap();
    assert_eq!(snapshot.status, StreamStatus::Failed);
    assert!(snapshot.error.as_deref().unwrap().contains("quota exceeded"));
    assert_eq!(snapshot.error_kind, Some("Remote"));
}

#[test]
fn rename_moves_local_copy_and_checks_the_result() {
    let h = harness();
    let id = h.drive.add_file(&h.drive.root_id(), "old.txt", b"x");
    let old_path = h.write_local(&id, b"x");

    let renamed = h
        .factory
        .run(RenameOperation::new(h.file(&id), "new.txt"))
        .unwrap()
        .into_file()
        .unwrap();
    assert_eq!(renamed.title, "new.txt");
    assert!(!old_path.exists());
    assert!(renamed.file_path.unwrap().exists());

    h.drive.set_ignore_renames(true);
    let snapshot = h
        .factory
        .run(RenameOperation::new(h.file(&id), "other.txt"))
        .unwrap();
    assert_eq!(snapshot.status, StreamStatus::Failed);
    assert_eq!(snapshot.error_kind, Some("Remote"));
}

#[test]
fn trash_removes_local_copy_and_untrash_restores() {
    let h = harness();
    let root = h.drive.root_id();
    let id = h.drive.add_file(&root, "gone.txt", b"x");
    let path = h.write_local(&id, b"x");

    let trashed = h
        .factory
        .run(TrashOperation::new(h.file(&id)))
        .unwrap()
        .into_file()
        .unwrap();
    assert!(trashed.trashed);
    assert!(!path.exists());
    assert!(h.drive.get_children(&root).unwrap().is_empty());

    let restored = h
        .factory
        .run(UntrashOperation::new(id.clone()))
        .unwrap()
        .into_file()
        .unwrap();
    assert!(!restored.trashed);
    assert_eq!(h.drive.get_children(&root).unwrap().len(), 1);
}

#[test]
fn failure_after_cancel_counts_as_cancelled() {
    let h = harness();
    let stream = h.factory.spawn(FailsOnceCancelled).unwrap();
    wait_for_status(&stream, StreamStatus::Processing);
    stream.cancel();

    let snapshot = stream.wait();
    assert_eq!(snapshot.status, StreamStatus::Cancelled);
    assert_eq!(snapshot.error, None);
    assert!(matches!(snapshot.into_file(), Err(ProxyError::Cancelled)));
}

#[test]
fn blank_failure_message_becomes_unknown_error() {
    let h = harness();
    let snapshot = h.factory.run(FailsSilently).unwrap();
    assert_eq!(snapshot.status, StreamStatus::Failed);
    assert_eq!(snapshot.error.as_deref(), Some("Unknown error"));
    assert_eq!(snapshot.error_kind, Some("Remote"));

    let err = snapshot.into_file().unwrap_err();
    assert_eq!(err.kind(), "Remote");
    assert_eq!(err.to_string(), "Unknown error");
}

#[test]
fn cancel_while_starting_stops_the_worker_before_processing() {
    let h = harness();
    let (entered_tx, entered) = bounded(1);
    let (open, gate) = bounded(1);
    let (began_tx, began) = bounded(1);
    let stream = h
        .factory
        .spawn(Gated {
            entered: entered_tx,
            gate,
            began: began_tx,
        })
        .unwrap();
    entered.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(stream.status(), StreamStatus::Starting);

    stream.cancel();
    assert_eq!(stream.status(), StreamStatus::Cancelled);
    assert!(!stream.is_finished());
    assert!(stream.wait_timeout(Duration::from_millis(50)).is_none());

    open.send(()).unwrap();
    assert!(!began.recv_timeout(Duration::from_secs(5)).unwrap());
    let snapshot = stream.wait();
    assert_eq!(snapshot.status, StreamStatus::Cancelled);
    assert!(stream.is_finished());
    assert_eq!(h.factory.transfers().snapshot().failed.len(), 1);
}

#[test]
fn folder_copy_cancel_reaches_the_running_child() {
    let h = harness();
    let root = h.drive.root_id();
    let source = h.drive.add_folder(&root, "Src");
    h.drive.add_file(&source, "a.txt", b"a");
    h.drive.add_file(&source, "b.txt", b"b");
    let dest = h.drive.add_folder(&root, "Dest");
    h.drive.set_transfer_delay(Duration::from_millis(1000));

    let stream = h
        .factory
        .spawn(CopyOperation::new(h.file(&source), dest))
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while h.drive.call_count("copy") == 0 {
        assert!(Instant::now() < deadline, "child copy never started");
        thread::sleep(Duration::from_millis(5));
    }
    stream.cancel();

    let snapshot = stream.wait();
    assert_eq!(snapshot.status, StreamStatus::Cancelled);
    assert_eq!(h.drive.call_count("copy"), 1);
    let failed = h.factory.transfers().snapshot().failed;
    assert!(
        failed
            .iter()
            .any(|entry| entry.stream_id != snapshot.id && entry.status == StreamStatus::Cancelled),
        "{failed:?}"
    );
}

#[test]
fn move_checks_the_current_parent_not_the_callers_copy() {
    let h = harness();
    let root = h.drive.root_id();
    let other = h.drive.add_folder(&root, "Other");
    let id = h.drive.add_file(&root, "a.txt", b"abc");
    let stale = h.file(&id);
    h.drive.move_file(&id, &other).unwrap();

    let moved = h
        .factory
        .run(MoveOperation::new(stale.clone(), root.clone()))
        .unwrap()
        .into_file()
        .unwrap();
    assert_eq!(moved.parent_id.as_deref(), Some(root.as_str()));
    assert_eq!(h.drive.call_count("move"), 2);

    h.drive.move_file(&id, &other).unwrap();
    let snapshot = h.factory.run(MoveOperation::new(stale, other.clone())).unwrap();
    assert_eq!(snapshot.status, StreamStatus::Completed);
    assert_eq!(h.drive.call_count("move"), 3);
    assert_eq!(
        snapshot.into_file().unwrap().parent_id.as_deref(),
        Some(other.as_str())
    );
}

#[test]
fn trash_removes_the_local_copy_at_its_current_location() {
    let h = harness();
    let root = h.drive.root_id();
    let other = h.drive.add_folder(&root, "Other");
    let id = h.drive.add_file(&root, "a.txt", b"abc");
    let stale = h.file(&id);
    h.drive.move_file(&id, &other).unwrap();
    let current_path = h.write_local(&id, b"abc");
    assert_ne!(stale.file_path.as_ref(), Some(&current_path));

    let snapshot = h.factory.run(TrashOperation::new(stale)).unwrap();
    assert_eq!(snapshot.status, StreamStatus::Completed);
    assert!(!current_path.exists());
}

#[test]
fn rename_completes_when_the_local_copy_cannot_follow() {
    let h = harness();
    let id = h.drive.add_file(&h.drive.root_id(), "a.txt", b"abc");
    let old_path = h.write_local(&id, b"abc");
    let blocked = old_path.with_file_name("b.txt");
    fs::create_dir_all(blocked.join("occupied")).unwrap();

    let snapshot = h
        .factory
        .run(RenameOperation::new(h.file(&id), "b.txt"))
        .unwrap();
    assert_eq!(snapshot.status, StreamStatus::Completed);
    assert_eq!(snapshot.into_file().unwrap().title, "b.txt");
    assert_eq!(h.file(&id).title, "b.txt");
    assert!(old_path.exists());
}
