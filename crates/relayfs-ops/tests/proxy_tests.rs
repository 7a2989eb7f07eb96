use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use relayfs_backend::{LocalBackend, MemoryBackend};
use relayfs_core::{
    DirectoryListing, Entry, FileError, FileHandle, FileInfoReply, FileResult, FileSystemBackend,
    FileSystemPath, OpenFlags, Opened, OperationContext, RelayConfig, TransferOptions,
};
use relayfs_ops::{proxy, OpenedFile, Relay, ReplyLoop, Task, TaskRunner, WorkerPool};
use tokio::time::timeout;

struct Harness {
    pool: Arc<WorkerPool>,
    origin: ReplyLoop,
    relay: Relay,
    ctx: Arc<OperationContext>,
}

impl Harness {
    fn new() -> Self {
        let config = RelayConfig::builder()
            .worker_threads(2usize)
            .thread_name("test-worker")
            .build()
            .unwrap();
        let pool = Arc::new(WorkerPool::new(&config).unwrap());
        let origin = ReplyLoop::new();
        let relay = Relay::new(Arc::clone(&pool), origin.handle());
        Self {
            pool,
            origin,
            relay,
            ctx: Arc::new(OperationContext::new()),
        }
    }

    /// Run the next reply, failing the test if none arrives.
    async fn drive(&mut self) {
        let ran = timeout(Duration::from_secs(5), self.origin.run_one())
            .await
            .expect("no reply within 5s");
        assert!(ran);
    }
}

type Slot<T> = Arc<Mutex<Option<T>>>;

fn slot<T>() -> Slot<T> {
    Arc::new(Mutex::new(None))
}

fn fill<T: Send + 'static>(slot: &Slot<T>) -> Box<dyn FnOnce(T) + Send + 'static> {
    let slot = Arc::clone(slot);
    Box::new(move |value| {
        let mut guard = slot.lock().unwrap();
        assert!(guard.is_none(), "callback ran twice");
        *guard = Some(value);
    })
}

fn take<T>(slot: &Slot<T>) -> T {
    slot.lock().unwrap().take().expect("callback did not run")
}

fn p(path: &str) -> FileSystemPath {
    FileSystemPath::new(path)
}

async fn stat<B: FileSystemBackend + 'static>(
    h: &mut Harness,
    backend: &Arc<B>,
    path: &str,
) -> FileResult<FileInfoReply> {
    let out: Slot<FileResult<FileInfoReply>> = slot();
    assert!(proxy::get_file_info(&h.relay, &h.ctx, backend, &p(path), fill(&out)));
    h.drive().await;
    take(&out)
}

/// A runner whose queue is always full.
struct RejectingRunner;

impl TaskRunner for RejectingRunner {
    fn post_task(&self, _task: Task) -> bool {
        false
    }

    fn post_task_and_reply(&self, _task: Task, _reply: Task) -> bool {
        false
    }
}

/// Wraps a memory backend and injects failures into its file I/O.
struct FaultyBackend {
    inner: MemoryBackend,
    deny_open_for_write: bool,
    writes_before_full: Option<usize>,
    writes: AtomicUsize,
}

impl FaultyBackend {
    fn denying_open() -> Self {
        Self {
            inner: MemoryBackend::with_name("denying"),
            deny_open_for_write: true,
            writes_before_full: None,
            writes: AtomicUsize::new(0),
        }
    }

    fn full_after(writes: usize) -> Self {
        Self {
            inner: MemoryBackend::with_name("full"),
            deny_open_for_write: false,
            writes_before_full: Some(writes),
            writes: AtomicUsize::new(0),
        }
    }
}

impl FileSystemBackend for FaultyBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn create_or_open(
        &self,
        ctx: &OperationContext,
        path: &FileSystemPath,
        flags: OpenFlags,
    ) -> FileResult<Opened> {
        if self.deny_open_for_write && (flags.writes() || flags.may_create()) {
            return Err(FileError::AccessDenied);
        }
        self.inner.create_or_open(ctx, path, flags)
    }

    fn close(&self, ctx: &OperationContext, handle: FileHandle) -> FileResult<()> {
        self.inner.close(ctx, handle)
    }

    fn read(
        &self,
        ctx: &OperationContext,
        handle: FileHandle,
        offset: u64,
        buf: &mut [u8],
    ) -> FileResult<usize> {
        self.inner.read(ctx, handle, offset, buf)
    }

    fn write(
        &self,
        ctx: &OperationContext,
        handle: FileHandle,
        offset: u64,
        data: &[u8],
    ) -> FileResult<usize> {
        let done = self.writes.fetch_add(1, Ordering::SeqCst);
        if self.writes_before_full.is_some_and(|limit| done >= limit) {
            return Err(FileError::NoSpace);
        }
        self.inner.write(ctx, handle, offset, data)
    }

    fn ensure_file_exists(
        &self,
        ctx: &OperationContext,
        path: &FileSystemPath,
    ) -> FileResult<bool> {
        self.inner.ensure_file_exists(ctx, path)
    }

    fn create_directory(
        &self,
        ctx: &OperationContext,
        path: &FileSystemPath,
        exclusive: bool,
        recursive: bool,
    ) -> FileResult<()> {
        self.inner.create_directory(ctx, path, exclusive, recursive)
    }

    fn get_file_info(
        &self,
        ctx: &OperationContext,
        path: &FileSystemPath,
    ) -> FileResult<FileInfoReply> {
        self.inner.get_file_info(ctx, path)
    }

    fn read_directory(
        &self,
        ctx: &OperationContext,
        path: &FileSystemPath,
    ) -> FileResult<Vec<Entry>> {
        self.inner.read_directory(ctx, path)
    }

    fn touch(
        &self,
        ctx: &OperationContext,
        path: &FileSystemPath,
        last_access_time: SystemTime,
        last_modified_time: SystemTime,
    ) -> FileResult<()> {
        self.inner.touch(ctx, path, last_access_time, last_modified_time)
    }

    fn truncate(
        &self,
        ctx: &OperationContext,
        path: &FileSystemPath,
        length: u64,
    ) -> FileResult<()> {
        self.inner.truncate(ctx, path, length)
    }

    fn delete(
        &self,
        ctx: &OperationContext,
        path: &FileSystemPath,
        recursive: bool,
    ) -> FileResult<()> {
        self.inner.delete(ctx, path, recursive)
    }
}

#[test]
fn test_rejected_submission_never_calls_back() {
    let ctx = Arc::new(OperationContext::new());
    let backend = Arc::new(MemoryBackend::new());
    let called = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&called);
    let callback = move |_: FileResult<()>| flag.store(true, Ordering::SeqCst);
    let submitted = proxy::delete(&RejectingRunner, &ctx, &backend, &p("x"), false, callback);

    assert!(!submitted);
    assert!(!called.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_shut_down_pool_rejects_every_operation() {
    let mut h = Harness::new();
    let backend = Arc::new(MemoryBackend::new());
    let called = Arc::new(AtomicUsize::new(0));
    h.pool.shutdown();

    let c = Arc::clone(&called);
    let callback = move |_: FileResult<bool>| {
        c.fetch_add(1, Ordering::SeqCst);
    };
    assert!(!proxy::ensure_file_exists(&h.relay, &h.ctx, &backend, &p("a"), callback));
    let c = Arc::clone(&called);
    assert!(!proxy::create_or_open(
        &h.relay,
        &h.ctx,
        &backend,
        &p("a"),
        OpenFlags::OPEN_ALWAYS | OpenFlags::WRITE,
        move |_: FileResult<OpenedFile>| {
            c.fetch_add(1, Ordering::SeqCst);
        },
    ));
    let c = Arc::clone(&called);
    let callback = move |_: FileResult<()>| {
        c.fetch_add(1, Ordering::SeqCst);
    };
    assert!(!proxy::copy(&h.relay, &h.ctx, &backend, &backend, &p("a"), &p("b"), callback));

    assert_eq!(h.origin.run_pending(), 0);
    assert_eq!(called.load(Ordering::SeqCst), 0);
    assert!(backend.file_contents("a").is_err());
}

#[tokio::test]
async fn test_callback_waits_for_reply_loop() {
    let mut h = Harness::new();
    let backend = Arc::new(MemoryBackend::new());
    let out: Slot<FileResult<()>> = slot();

    assert!(proxy::create_directory(
        &h.relay,
        &h.ctx,
        &backend,
        &p("made"),
        true,
        false,
        fill(&out),
    ));

    // Join the workers: the work is done but the reply is still queued.
    h.pool.shutdown();
    assert!(out.lock().unwrap().is_none());
    assert_eq!(backend.file_contents("made"), Err(FileError::NotAFile));

    assert_eq!(h.origin.run_pending(), 1);
    assert_eq!(take(&out), Ok(()));
}

#[tokio::test]
async fn test_ensure_file_exists_is_idempotent() {
    let mut h = Harness::new();
    let backend = Arc::new(MemoryBackend::new());

    let first: Slot<FileResult<bool>> = slot();
    assert!(proxy::ensure_file_exists(&h.relay, &h.ctx, &backend, &p("new.txt"), fill(&first)));
    h.drive().await;
    assert_eq!(take(&first), Ok(true));

    let second: Slot<FileResult<bool>> = slot();
    assert!(proxy::ensure_file_exists(&h.relay, &h.ctx, &backend, &p("new.txt"), fill(&second)));
    h.drive().await;
    assert_eq!(take(&second), Ok(false));
}

#[tokio::test]
async fn test_copy_preserves_size() {
    let mut h = Harness::new();
    let src = Arc::new(MemoryBackend::with_name("src"));
    let dest = Arc::new(MemoryBackend::with_name("dest"));
    src.insert_file("docs/report.txt", vec![7u8; 200_000]).unwrap();

    let out: Slot<FileResult<()>> = slot();
    assert!(proxy::copy(
        &h.relay,
        &h.ctx,
        &src,
        &dest,
        &p("docs/report.txt"),
        &p("backup/report.txt"),
        fill(&out),
    ));
    h.drive().await;
    assert_eq!(take(&out), Ok(()));

    let original = stat(&mut h, &src, "docs/report.txt").await.unwrap();
    let copied = stat(&mut h, &dest, "backup/report.txt").await.unwrap();
    assert_eq!(copied.info.size, original.info.size);
    assert_eq!(copied.info.last_modified, original.info.last_modified);
    assert_eq!(h.ctx.bytes_written(), 200_000);
}

#[tokio::test]
async fn test_copy_without_timestamps() {
    let mut h = Harness::new();
    let src = Arc::new(MemoryBackend::new());
    let dest = Arc::new(MemoryBackend::new());
    src.insert_file("old", "data").unwrap();

    let past = UNIX_EPOCH + Duration::from_secs(1_000_000);
    let touched: Slot<FileResult<()>> = slot();
    assert!(proxy::touch(&h.relay, &h.ctx, &src, &p("old"), past, past, fill(&touched)));
    h.drive().await;
    assert_eq!(take(&touched), Ok(()));

    let options = TransferOptions {
        buffer_size: 3,
        preserve_timestamps: false,
    };
    let out: Slot<FileResult<()>> = slot();
    assert!(proxy::copy_with_options(
        &h.relay,
        &h.ctx,
        &src,
        &dest,
        &p("old"),
        &p("new"),
        options,
        fill(&out),
    ));
    h.drive().await;
    assert_eq!(take(&out), Ok(()));

    let copied = stat(&mut h, &dest, "new").await.unwrap();
    assert_ne!(copied.info.last_modified, past);
    assert_eq!(dest.file_contents("new").unwrap(), b"data");
}

#[tokio::test]
async fn test_move_removes_source() {
    let mut h = Harness::new();
    let src = Arc::new(MemoryBackend::with_name("src"));
    let dest = Arc::new(MemoryBackend::with_name("dest"));
    src.insert_file("inbox/mail.eml", "hello").unwrap();

    let out: Slot<FileResult<()>> = slot();
    assert!(proxy::move_to(
        &h.relay,
        &h.ctx,
        &src,
        &dest,
        &p("inbox/mail.eml"),
        &p("archive/mail.eml"),
        fill(&out),
    ));
    h.drive().await;
    assert_eq!(take(&out), Ok(()));

    assert_eq!(
        stat(&mut h, &src, "inbox/mail.eml").await.unwrap_err(),
        FileError::NotFound
    );
    assert!(stat(&mut h, &dest, "archive/mail.eml").await.is_ok());
}

#[tokio::test]
async fn test_move_within_one_backend() {
    let mut h = Harness::new();
    let backend = Arc::new(MemoryBackend::new());
    backend.insert_file("a/one", "1").unwrap();
    backend.insert_file("a/nested/two", "2").unwrap();

    let out: Slot<FileResult<()>> = slot();
    assert!(proxy::move_with_options(
        &h.relay,
        &h.ctx,
        &backend,
        &backend,
        &p("a"),
        &p("b"),
        TransferOptions::default(),
        fill(&out),
    ));
    h.drive().await;
    assert_eq!(take(&out), Ok(()));

    assert_eq!(backend.file_contents("b/one").unwrap(), b"1");
    assert_eq!(backend.file_contents("b/nested/two").unwrap(), b"2");
    assert_eq!(stat(&mut h, &backend, "a").await.unwrap_err(), FileError::NotFound);
}

#[tokio::test]
async fn test_directory_copy_across_backends() {
    let mut h = Harness::new();
    let src = Arc::new(MemoryBackend::with_name("src"));
    let dest = Arc::new(MemoryBackend::with_name("dest"));
    src.insert_file("project/readme.md", "# hi").unwrap();
    let ctx = OperationContext::new();
    src.create_directory(&ctx, &p("project/empty"), true, false).unwrap();

    let out: Slot<FileResult<()>> = slot();
    assert!(proxy::copy(
        &h.relay,
        &h.ctx,
        &src,
        &dest,
        &p("project"),
        &p("mirror"),
        fill(&out),
    ));
    h.drive().await;
    assert_eq!(take(&out), Ok(()));

    let listing: Slot<FileResult<DirectoryListing>> = slot();
    assert!(proxy::read_directory(&h.relay, &h.ctx, &dest, &p("mirror"), fill(&listing)));
    h.drive().await;
    let DirectoryListing { entries, has_more } = take(&listing).unwrap();
    assert!(!has_more);

    let names: BTreeSet<_> = entries
        .iter()
        .map(|entry| (entry.name.to_string(), entry.is_directory))
        .collect();
    let expected: BTreeSet<_> = [("readme.md".to_string(), false), ("empty".to_string(), true)]
        .into_iter()
        .collect();
    assert_eq!(names, expected);
}

#[tokio::test]
async fn test_destination_open_failure_leaves_source() {
    let mut h = Harness::new();
    let src = Arc::new(MemoryBackend::new());
    let dest = Arc::new(FaultyBackend::denying_open());
    src.insert_file("keep.txt", "precious").unwrap();

    let out: Slot<FileResult<()>> = slot();
    assert!(proxy::copy(
        &h.relay,
        &h.ctx,
        &src,
        &dest,
        &p("keep.txt"),
        &p("copy.txt"),
        fill(&out),
    ));
    h.drive().await;

    assert_eq!(take(&out), Err(FileError::AccessDenied));
    assert_eq!(src.file_contents("keep.txt").unwrap(), b"precious");
    assert_eq!(src.open_handle_count(), 0);
}

#[tokio::test]
async fn test_move_keeps_source_when_write_fails() {
    let mut h = Harness::new();
    let src = Arc::new(MemoryBackend::new());
    let dest = Arc::new(FaultyBackend::full_after(1));
    src.insert_file("big.bin", vec![1u8; 32]).unwrap();

    let options = TransferOptions {
        buffer_size: 8,
        preserve_timestamps: true,
    };
    let out: Slot<FileResult<()>> = slot();
    assert!(proxy::move_with_options(
        &h.relay,
        &h.ctx,
        &src,
        &dest,
        &p("big.bin"),
        &p("big.bin"),
        options,
        fill(&out),
    ));
    h.drive().await;

    assert_eq!(take(&out), Err(FileError::NoSpace));
    assert_eq!(src.file_contents("big.bin").unwrap(), vec![1u8; 32]);
    assert_eq!(src.open_handle_count(), 0);
    assert_eq!(dest.inner.open_handle_count(), 0);
}

#[tokio::test]
async fn test_dropping_opened_file_closes_handle() {
    let mut h = Harness::new();
    let backend = Arc::new(MemoryBackend::new());

    let out: Slot<FileResult<OpenedFile>> = slot();
    assert!(proxy::create_or_open(
        &h.relay,
        &h.ctx,
        &backend,
        &p("log.txt"),
        OpenFlags::CREATE | OpenFlags::WRITE,
        fill(&out),
    ));
    h.drive().await;

    let opened = take(&out).unwrap();
    assert!(opened.created());
    assert_eq!(backend.open_handle_count(), 1);

    drop(opened);
    h.pool.shutdown();
    assert_eq!(backend.open_handle_count(), 0);
}

#[tokio::test]
async fn test_into_handle_keeps_file_open() {
    let mut h = Harness::new();
    let backend = Arc::new(MemoryBackend::new());
    backend.insert_file("data", "abc").unwrap();

    let out: Slot<FileResult<OpenedFile>> = slot();
    assert!(proxy::create_or_open(
        &h.relay,
        &h.ctx,
        &backend,
        &p("data"),
        OpenFlags::OPEN | OpenFlags::READ,
        fill(&out),
    ));
    h.drive().await;

    let opened = take(&out).unwrap();
    assert!(!opened.created());
    let handle = opened.into_handle();
    h.pool.shutdown();
    assert_eq!(backend.open_handle_count(), 1);

    let mut buf = [0u8; 8];
    let read = backend.read(&h.ctx, handle, 0, &mut buf).unwrap();
    assert_eq!(&buf[..read], b"abc");
    backend.close(&h.ctx, handle).unwrap();
}

#[test]
fn test_open_handle_closed_when_reply_loop_is_gone() {
    let config = RelayConfig::builder().worker_threads(1usize).build().unwrap();
    let pool = Arc::new(WorkerPool::new(&config).unwrap());
    let origin = ReplyLoop::new();
    let relay = Relay::new(Arc::clone(&pool), origin.handle());
    drop(origin);

    let ctx = Arc::new(OperationContext::new());
    let backend = Arc::new(MemoryBackend::new());
    let called = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&called);
    assert!(proxy::create_or_open(
        &relay,
        &ctx,
        &backend,
        &p("orphan"),
        OpenFlags::OPEN_ALWAYS | OpenFlags::WRITE,
        move |_: FileResult<OpenedFile>| flag.store(true, Ordering::SeqCst),
    ));

    pool.shutdown();
    assert!(!called.load(Ordering::SeqCst));
    assert_eq!(backend.open_handle_count(), 0);
    assert!(backend.file_contents("orphan").is_ok());
}

#[tokio::test]
async fn test_delete_touch_and_truncate() {
    let mut h = Harness::new();
    let backend = Arc::new(MemoryBackend::new());
    backend.insert_file("dir/file", "0123456789").unwrap();

    let truncated: Slot<FileResult<()>> = slot();
    assert!(proxy::truncate(&h.relay, &h.ctx, &backend, &p("dir/file"), 4, fill(&truncated)));
    h.drive().await;
    assert_eq!(take(&truncated), Ok(()));
    assert_eq!(backend.file_contents("dir/file").unwrap(), b"0123");

    let when = UNIX_EPOCH + Duration::from_secs(86_400);
    let touched: Slot<FileResult<()>> = slot();
    assert!(proxy::touch(&h.relay, &h.ctx, &backend, &p("dir/file"), when, when, fill(&touched)));
    h.drive().await;
    assert_eq!(take(&touched), Ok(()));
    let info = stat(&mut h, &backend, "dir/file").await.unwrap().info;
    assert_eq!(info.last_modified, when);
    assert_eq!(info.last_accessed, when);

    let refused: Slot<FileResult<()>> = slot();
    assert!(proxy::delete(&h.relay, &h.ctx, &backend, &p("dir"), false, fill(&refused)));
    h.drive().await;
    assert_eq!(take(&refused), Err(FileError::NotEmpty));

    let deleted: Slot<FileResult<()>> = slot();
    assert!(proxy::delete(&h.relay, &h.ctx, &backend, &p("dir"), true, fill(&deleted)));
    h.drive().await;
    assert_eq!(take(&deleted), Ok(()));
    assert_eq!(stat(&mut h, &backend, "dir").await.unwrap_err(), FileError::NotFound);
}

#[tokio::test]
async fn test_read_only_context_is_forwarded() {
    let mut h = Harness::new();
    h.ctx = Arc::new(OperationContext::read_only());
    let backend = Arc::new(MemoryBackend::new());

    let out: Slot<FileResult<()>> = slot();
    let nope = p("nope");
    assert!(proxy::create_directory(&h.relay, &h.ctx, &backend, &nope, false, true, fill(&out)));
    h.drive().await;
    assert_eq!(take(&out), Err(FileError::AccessDenied));
}

#[tokio::test]
async fn test_local_to_memory_copy() {
    let temp = tempfile::tempdir().unwrap();
    std::fs::create_dir(temp.path().join("photos")).unwrap();
    std::fs::write(temp.path().join("photos/cat.jpg"), b"meow").unwrap();

    let mut h = Harness::new();
    let local = Arc::new(LocalBackend::new(temp.path()));
    let memory = Arc::new(MemoryBackend::new());

    let reply = stat(&mut h, &local, "photos/cat.jpg").await.unwrap();
    assert_eq!(reply.platform_path, temp.path().join("photos/cat.jpg"));

    let out: Slot<FileResult<()>> = slot();
    assert!(proxy::copy(
        &h.relay,
        &h.ctx,
        &local,
        &memory,
        &p("photos"),
        &p("imported"),
        fill(&out),
    ));
    h.drive().await;
    assert_eq!(take(&out), Ok(()));
    assert_eq!(memory.file_contents("imported/cat.jpg").unwrap(), b"meow");

    let mem_reply = stat(&mut h, &memory, "imported/cat.jpg").await.unwrap();
    assert!(mem_reply.platform_path.as_os_str().is_empty());
    assert_eq!(local.open_handle_count(), 0);
}

#[tokio::test]
async fn test_copy_missing_source_reports_not_found() {
    let mut h = Harness::new();
    let src = Arc::new(MemoryBackend::new());
    let dest = Arc::new(MemoryBackend::new());

    let copied: Slot<FileResult<()>> = slot();
    let ghost = p("ghost");
    assert!(proxy::copy(&h.relay, &h.ctx, &src, &dest, &ghost, &p("out/ghost"), fill(&copied)));
    h.drive().await;
    assert_eq!(take(&copied), Err(FileError::NotFound));

    let moved: Slot<FileResult<()>> = slot();
    assert!(proxy::move_to(
        &h.relay,
        &h.ctx,
        &src,
        &dest,
        &p("ghost"),
        &p("out/ghost"),
        fill(&moved),
    ));
    h.drive().await;
    assert_eq!(take(&moved), Err(FileError::NotFound));
    assert!(dest.file_contents("out/ghost").is_err());
}

#[tokio::test]
async fn test_directory_move_keeps_source_when_nested_write_fails() {
    let mut h = Harness::new();
    let src = Arc::new(MemoryBackend::new());
    let dest = Arc::new(FaultyBackend::full_after(1));
    src.insert_file("inbox/nested/big.bin", vec![2u8; 32]).unwrap();

    let options = TransferOptions {
        buffer_size: 8,
        preserve_timestamps: false,
    };
    let out: Slot<FileResult<()>> = slot();
    assert!(proxy::move_with_options(
        &h.relay,
        &h.ctx,
        &src,
        &dest,
        &p("inbox"),
        &p("archive"),
        options,
        fill(&out),
    ));
    h.drive().await;

    assert_eq!(take(&out), Err(FileError::NoSpace));
    assert_eq!(src.file_contents("inbox/nested/big.bin").unwrap(), vec![2u8; 32]);
    let inbox = stat(&mut h, &src, "inbox").await.unwrap();
    assert!(inbox.info.is_directory);
    let nested = stat(&mut h, &src, "inbox/nested").await.unwrap();
    assert!(nested.info.is_directory);
    assert_eq!(src.open_handle_count(), 0);
    assert_eq!(dest.inner.open_handle_count(), 0);
}

#[tokio::test]
async fn test_transfer_into_itself_through_second_backend_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    std::fs::create_dir(temp.path().join("a")).unwrap();
    std::fs::write(temp.path().join("a/file"), b"x").unwrap();

    let mut h = Harness::new();
    let first = Arc::new(LocalBackend::new(temp.path()));
    let second = Arc::new(LocalBackend::new(temp.path()));

    for dest in ["a/sub", "a"] {
        let out: Slot<FileResult<()>> = slot();
        assert!(proxy::copy(&h.relay, &h.ctx, &first, &second, &p("a"), &p(dest), fill(&out)));
        h.drive().await;
        assert_eq!(take(&out), Err(FileError::InvalidOperation), "{dest}");
    }
    assert!(!temp.path().join("a/sub").exists());

    let out: Slot<FileResult<()>> = slot();
    assert!(proxy::move_to(&h.relay, &h.ctx, &first, &second, &p("a"), &p("a/sub"), fill(&out)));
    h.drive().await;
    assert_eq!(take(&out), Err(FileError::InvalidOperation));
    assert_eq!(std::fs::read(temp.path().join("a/file")).unwrap(), b"x");
}

#[cfg(unix)]
#[tokio::test]
async fn test_move_never_deletes_through_directory_link() {
    let outside = tempfile::tempdir().unwrap();
    std::fs::write(outside.path().join("secret.txt"), b"keep me").unwrap();
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("tree")).unwrap();
    std::os::unix::fs::symlink(outside.path(), root.path().join("tree/link")).unwrap();

    let mut h = Harness::new();
    let local = Arc::new(LocalBackend::new(root.path()));
    let memory = Arc::new(MemoryBackend::new());

    for src in ["tree", "tree/link"] {
        let out: Slot<FileResult<()>> = slot();
        let moved = p("moved");
        assert!(proxy::move_to(&h.relay, &h.ctx, &local, &memory, &p(src), &moved, fill(&out)));
        h.drive().await;
        assert_eq!(take(&out), Err(FileError::InvalidOperation), "{src}");
    }

    assert_eq!(std::fs::read(outside.path().join("secret.txt")).unwrap(), b"keep me");
    assert!(std::fs::symlink_metadata(root.path().join("tree/link")).is_ok());
    assert!(memory.file_contents("moved/link/secret.txt").is_err());
}

#[cfg(unix)]
#[tokio::test]
async fn test_move_of_file_link_removes_only_the_link() {
    let outside = tempfile::tempdir().unwrap();
    std::fs::write(outside.path().join("target.txt"), b"payload").unwrap();
    let root = tempfile::tempdir().unwrap();
    std::os::unix::fs::symlink(outside.path().join("target.txt"), root.path().join("link"))
        .unwrap();

    let mut h = Harness::new();
    let local = Arc::new(LocalBackend::new(root.path()));
    let memory = Arc::new(MemoryBackend::new());

    let out: Slot<FileResult<()>> = slot();
    assert!(proxy::move_to(&h.relay, &h.ctx, &local, &memory, &p("link"), &p("copy"), fill(&out)));
    h.drive().await;
    assert_eq!(take(&out), Ok(()));

    assert_eq!(memory.file_contents("copy").unwrap(), b"payload");
    assert!(std::fs::symlink_metadata(root.path().join("link")).is_err());
    assert_eq!(std::fs::read(outside.path().join("target.txt")).unwrap(), b"payload");
}
