//! Native filesystem backend rooted at a local directory.

use std::fs::{self, File, FileTimes, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use compact_str::CompactString;
use dashmap::DashMap;

use relayfs_core::{
    Entry, FileError, FileHandle, FileInfo, FileInfoReply, FileResult, FileSystemBackend,
    FileSystemPath, OpenFlags, Opened, OperationContext,
};

#[derive(Debug)]
struct LocalFile {
    file: File,
    append: bool,
}

/// Backend that stores everything under `root` on local disk.
///
/// Virtual paths are joined onto the root after normalization, so no path
/// can escape it through `..`.
#[derive(Debug)]
pub struct LocalBackend {
    name: String,
    root: PathBuf,
    handles: DashMap<u64, LocalFile>,
    next_handle: AtomicU64,
}

impl LocalBackend {
    /// Create a backend rooted at an existing directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            name: format!("local:{}", root.display()),
            root,
            handles: DashMap::new(),
            next_handle: AtomicU64::new(1),
        }
    }

    /// The directory this backend is rooted at.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Native path for a virtual path.
    pub fn resolve(&self, path: &FileSystemPath) -> PathBuf {
        self.root.join(path.to_path_buf())
    }

    /// Number of handles currently open.
    pub fn open_handle_count(&self) -> usize {
        self.handles.len()
    }
}

fn metadata(path: &Path) -> FileResult<fs::Metadata> {
    fs::metadata(path).map_err(FileError::from)
}

fn file_info(path: &Path) -> FileResult<FileInfo> {
    let link = fs::symlink_metadata(path)?;
    let meta = if link.file_type().is_symlink() {
        metadata(path)?
    } else {
        link.clone()
    };

    let modified = meta.modified().unwrap_or(UNIX_EPOCH);
    Ok(FileInfo {
        size: if meta.is_dir() { 0 } else { meta.len() },
        is_directory: meta.is_dir(),
        is_symbolic_link: link.file_type().is_symlink(),
        last_modified: modified,
        last_accessed: meta.accessed().unwrap_or(modified),
        creation_time: meta.created().unwrap_or(modified),
    })
}

impl FileSystemBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_or_open(
        &self,
        ctx: &OperationContext,
        path: &FileSystemPath,
        flags: OpenFlags,
    ) -> FileResult<Opened> {
        if flags.may_create() || flags.writes() {
            ctx.ensure_writable()?;
        }

        let real = self.resolve(path);
        let existed = match fs::metadata(&real) {
            Ok(meta) if meta.is_dir() => return Err(FileError::NotAFile),
            Ok(_) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        let writable = flags.writes() || flags.may_create();
        let mut options = OpenOptions::new();
        options
            .read(flags.contains(OpenFlags::READ) || !writable)
            .write(writable && !flags.contains(OpenFlags::APPEND))
            .append(flags.contains(OpenFlags::APPEND));

        if flags.contains(OpenFlags::CREATE) {
            options.create_new(true);
        } else if flags.contains(OpenFlags::CREATE_ALWAYS) {
            options.create(true).truncate(true);
        } else if flags.contains(OpenFlags::OPEN_ALWAYS) {
            options.create(true);
        } else if flags.contains(OpenFlags::OPEN_TRUNCATED) {
            options.truncate(true);
        }

        let file = options.open(&real)?;
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(
            id,
            LocalFile {
                file,
                append: flags.contains(OpenFlags::APPEND),
            },
        );
        tracing::trace!(backend = %self.name, %path, handle = id, "opened");

        Ok(Opened {
            handle: FileHandle(id),
            created: !existed,
        })
    }

    fn close(&self, _ctx: &OperationContext, handle: FileHandle) -> FileResult<()> {
        self.handles
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(FileError::InvalidOperation)
    }

    fn read(
        &self,
        _ctx: &OperationContext,
        handle: FileHandle,
        offset: u64,
        buf: &mut [u8],
    ) -> FileResult<usize> {
        let mut local = self
            .handles
            .get_mut(&handle.0)
            .ok_or(FileError::InvalidOperation)?;
        local.file.seek(SeekFrom::Start(offset))?;
        Ok(local.file.read(buf)?)
    }

    fn write(
        &self,
        ctx: &OperationContext,
        handle: FileHandle,
        offset: u64,
        data: &[u8],
    ) -> FileResult<usize> {
        ctx.ensure_writable()?;
        let mut local = self
            .handles
            .get_mut(&handle.0)
            .ok_or(FileError::InvalidOperation)?;
        if !local.append {
            local.file.seek(SeekFrom::Start(offset))?;
        }
        local.file.write_all(data)?;
        ctx.record_written(data.len() as u64);
        Ok(data.len())
    }

    fn ensure_file_exists(
        &self,
        ctx: &OperationContext,
        path: &FileSystemPath,
    ) -> FileResult<bool> {
        ctx.ensure_writable()?;
        let real = self.resolve(path);
        match OpenOptions::new().write(true).create_new(true).open(&real) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if metadata(&real)?.is_dir() {
                    Err(FileError::NotAFile)
                } else {
                    Ok(false)
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn create_directory(
        &self,
        ctx: &OperationContext,
        path: &FileSystemPath,
        exclusive: bool,
        recursive: bool,
    ) -> FileResult<()> {
        ctx.ensure_writable()?;
        let real = self.resolve(path);
        match fs::metadata(&real) {
            Ok(meta) if meta.is_dir() => {
                return if exclusive { Err(FileError::Exists) } else { Ok(()) };
            }
            Ok(_) => return Err(FileError::Exists),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if recursive {
            fs::create_dir_all(&real)?;
        } else {
            fs::create_dir(&real)?;
        }
        Ok(())
    }

    fn get_file_info(
        &self,
        _ctx: &OperationContext,
        path: &FileSystemPath,
    ) -> FileResult<FileInfoReply> {
        let real = self.resolve(path);
        let info = file_info(&real)?;
        Ok(FileInfoReply {
            info,
            platform_path: real,
        })
    }

    fn read_directory(
        &self,
        _ctx: &OperationContext,
        path: &FileSystemPath,
    ) -> FileResult<Vec<Entry>> {
        let real = self.resolve(path);
        if !metadata(&real)?.is_dir() {
            return Err(FileError::NotADirectory);
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&real)? {
            let entry = entry?;
            let info = file_info(&entry.path())?;
            entries.push(Entry {
                name: CompactString::from(entry.file_name().to_string_lossy()),
                is_directory: info.is_directory,
                size: info.size,
                last_modified: info.last_modified,
            });
        }
        Ok(entries)
    }

    fn touch(
        &self,
        ctx: &OperationContext,
        path: &FileSystemPath,
        last_access_time: SystemTime,
        last_modified_time: SystemTime,
    ) -> FileResult<()> {
        ctx.ensure_writable()?;
        let real = self.resolve(path);
        let file = if metadata(&real)?.is_dir() {
            File::open(&real)?
        } else {
            OpenOptions::new().write(true).open(&real)?
        };
        let times = FileTimes::new()
            .set_accessed(last_access_time)
            .set_modified(last_modified_time);
        file.set_times(times)?;
        Ok(())
    }

    fn truncate(
        &self,
        ctx: &OperationContext,
        path: &FileSystemPath,
        length: u64,
    ) -> FileResult<()> {
        ctx.ensure_writable()?;
        let real = self.resolve(path);
        if metadata(&real)?.is_dir() {
            return Err(FileError::NotAFile);
        }
        let file = OpenOptions::new().write(true).open(&real)?;
        file.set_len(length)?;
        Ok(())
    }

    fn delete(
        &self,
        ctx: &OperationContext,
        path: &FileSystemPath,
        recursive: bool,
    ) -> FileResult<()> {
        ctx.ensure_writable()?;
        if path.is_root() {
            return Err(FileError::InvalidOperation);
        }

        let real = self.resolve(path);
        let meta = fs::symlink_metadata(&real)?;
        if meta.is_dir() {
            if recursive {
                fs::remove_dir_all(&real)?;
            } else {
                fs::remove_dir(&real)?;
            }
        } else {
            fs::remove_file(&real)?;
        }
        Ok(())
    }

    fn namespace(&self) -> Option<PathBuf> {
        fs::canonicalize(&self.root).ok()
    }
}
