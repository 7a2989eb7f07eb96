//! Sandboxed in-memory storage.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use compact_str::CompactString;
use dashmap::DashMap;

use relayfs_core::{
    Entry, FileError, FileHandle, FileInfo, FileInfoReply, FileResult, FileSystemBackend,
    FileSystemPath, OpenFlags, Opened, OperationContext,
};

#[derive(Debug, Clone)]
enum NodeKind {
    File { data: Vec<u8> },
    Directory,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    modified: SystemTime,
    accessed: SystemTime,
    created: SystemTime,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        let now = SystemTime::now();
        Self {
            kind,
            modified: now,
            accessed: now,
            created: now,
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory)
    }

    fn size(&self) -> u64 {
        match &self.kind {
            NodeKind::File { data } => data.len() as u64,
            NodeKind::Directory => 0,
        }
    }

    fn info(&self) -> FileInfo {
        FileInfo {
            size: self.size(),
            is_directory: self.is_dir(),
            is_symbolic_link: false,
            last_modified: self.modified,
            last_accessed: self.accessed,
            creation_time: self.created,
        }
    }

    fn data_mut(&mut self) -> FileResult<&mut Vec<u8>> {
        match &mut self.kind {
            NodeKind::File { data } => Ok(data),
            NodeKind::Directory => Err(FileError::NotAFile),
        }
    }
}

#[derive(Debug)]
struct OpenFile {
    path: FileSystemPath,
    writable: bool,
    append: bool,
}

type Tree = BTreeMap<FileSystemPath, Node>;

/// An in-memory filesystem with no native paths.
///
/// The tree always contains the root directory. Handles refer to paths, so
/// a file deleted while open reports `NotFound` on the next read or write.
#[derive(Debug)]
pub struct MemoryBackend {
    name: String,
    nodes: Mutex<Tree>,
    handles: DashMap<u64, OpenFile>,
    next_handle: AtomicU64,
}

impl MemoryBackend {
    /// Create an empty filesystem containing only the root directory.
    pub fn new() -> Self {
        Self::with_name("memory")
    }

    /// Create an empty filesystem with a custom log name.
    pub fn with_name(name: impl Into<String>) -> Self {
        let mut nodes = Tree::new();
        nodes.insert(FileSystemPath::root(), Node::new(NodeKind::Directory));
        Self {
            name: name.into(),
            nodes: Mutex::new(nodes),
            handles: DashMap::new(),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Number of handles currently open.
    pub fn open_handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Write a whole file, creating parents as needed. Test and seeding helper.
    pub fn insert_file(
        &self,
        path: impl Into<FileSystemPath>,
        data: impl Into<Vec<u8>>,
    ) -> FileResult<()> {
        let path = path.into();
        let mut nodes = self.lock()?;
        if let Some(parent) = path.parent() {
            create_dirs(&mut nodes, &parent)?;
        }
        if nodes.get(&path).is_some_and(Node::is_dir) {
            return Err(FileError::NotAFile);
        }
        nodes.insert(path, Node::new(NodeKind::File { data: data.into() }));
        Ok(())
    }

    /// Read a whole file. Test helper.
    pub fn file_contents(&self, path: impl Into<FileSystemPath>) -> FileResult<Vec<u8>> {
        let path = path.into();
        let nodes = self.lock()?;
        match nodes.get(&path).map(|node| &node.kind) {
            Some(NodeKind::File { data }) => Ok(data.clone()),
            Some(NodeKind::Directory) => Err(FileError::NotAFile),
            None => Err(FileError::NotFound),
        }
    }

    fn lock(&self) -> FileResult<MutexGuard<'_, Tree>> {
        self.nodes.lock().map_err(|_| FileError::Failed)
    }

    fn register(&self, open: OpenFile) -> FileHandle {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(id, open);
        FileHandle(id)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Fail unless the parent of `path` is an existing directory.
fn check_parent(nodes: &Tree, path: &FileSystemPath) -> FileResult<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    match nodes.get(&parent) {
        Some(node) if node.is_dir() => Ok(()),
        Some(_) => Err(FileError::NotADirectory),
        None => Err(FileError::NotFound),
    }
}

/// Create `path` and any missing ancestors as directories.
fn create_dirs(nodes: &mut Tree, path: &FileSystemPath) -> FileResult<()> {
    let mut current = FileSystemPath::root();
    for component in path.components() {
        current = current.join(component);
        match nodes.get(&current) {
            Some(node) if node.is_dir() => {}
            Some(_) => return Err(FileError::NotADirectory),
            None => {
                nodes.insert(current.clone(), Node::new(NodeKind::Directory));
            }
        }
    }
    Ok(())
}

fn descendants(nodes: &Tree, dir: &FileSystemPath) -> Vec<FileSystemPath> {
    nodes
        .range(dir.clone()..)
        .skip(1)
        .take_while(|(path, _)| dir.is_ancestor_of(path))
        .map(|(path, _)| path.clone())
        .collect()
}

impl FileSystemBackend for MemoryBackend {
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

        let mut nodes = self.lock()?;
        check_parent(&nodes, path)?;

        let created = match nodes.get_mut(path) {
            Some(node) if node.is_dir() => return Err(FileError::NotAFile),
            Some(_) if flags.contains(OpenFlags::CREATE) => return Err(FileError::Exists),
            Some(node) => {
                if flags.truncates() {
                    node.data_mut()?.clear();
                    node.modified = SystemTime::now();
                }
                false
            }
            None if flags.may_create() => {
                nodes.insert(path.clone(), Node::new(NodeKind::File { data: Vec::new() }));
                true
            }
            None => return Err(FileError::NotFound),
        };
        drop(nodes);

        let handle = self.register(OpenFile {
            path: path.clone(),
            writable: flags.writes() || flags.may_create(),
            append: flags.contains(OpenFlags::APPEND),
        });
        Ok(Opened { handle, created })
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
        let path = self
            .handles
            .get(&handle.0)
            .map(|open| open.path.clone())
            .ok_or(FileError::InvalidOperation)?;

        let nodes = self.lock()?;
        let data = match nodes.get(&path).map(|node| &node.kind) {
            Some(NodeKind::File { data }) => data,
            Some(NodeKind::Directory) => return Err(FileError::NotAFile),
            None => return Err(FileError::NotFound),
        };

        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let len = buf.len().min(data.len() - start);
        buf[..len].copy_from_slice(&data[start..start + len]);
        Ok(len)
    }

    fn write(
        &self,
        ctx: &OperationContext,
        handle: FileHandle,
        offset: u64,
        data: &[u8],
    ) -> FileResult<usize> {
        ctx.ensure_writable()?;
        let (path, append) = {
            let open = self.handles.get(&handle.0).ok_or(FileError::InvalidOperation)?;
            if !open.writable {
                return Err(FileError::AccessDenied);
            }
            (open.path.clone(), open.append)
        };

        let mut nodes = self.lock()?;
        let node = nodes.get_mut(&path).ok_or(FileError::NotFound)?;
        let contents = node.data_mut()?;
        let start = if append {
            contents.len()
        } else {
            usize::try_from(offset).map_err(|_| FileError::NoSpace)?
        };
        let end = start.checked_add(data.len()).ok_or(FileError::NoSpace)?;
        if contents.len() < end {
            contents.resize(end, 0);
        }
        contents[start..end].copy_from_slice(data);
        node.modified = SystemTime::now();

        ctx.record_written(data.len() as u64);
        Ok(data.len())
    }

    fn ensure_file_exists(
        &self,
        ctx: &OperationContext,
        path: &FileSystemPath,
    ) -> FileResult<bool> {
        ctx.ensure_writable()?;
        let mut nodes = self.lock()?;
        check_parent(&nodes, path)?;
        match nodes.get(path) {
            Some(node) if node.is_dir() => Err(FileError::NotAFile),
            Some(_) => Ok(false),
            None => {
                nodes.insert(path.clone(), Node::new(NodeKind::File { data: Vec::new() }));
                Ok(true)
            }
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
        let mut nodes = self.lock()?;
        match nodes.get(path) {
            Some(node) if node.is_dir() => {
                return if exclusive { Err(FileError::Exists) } else { Ok(()) };
            }
            Some(_) => return Err(FileError::Exists),
            None => {}
        }

        if recursive {
            create_dirs(&mut nodes, path)
        } else {
            check_parent(&nodes, path)?;
            nodes.insert(path.clone(), Node::new(NodeKind::Directory));
            Ok(())
        }
    }

    fn get_file_info(
        &self,
        _ctx: &OperationContext,
        path: &FileSystemPath,
    ) -> FileResult<FileInfoReply> {
        let nodes = self.lock()?;
        let node = nodes.get(path).ok_or(FileError::NotFound)?;
        Ok(FileInfoReply {
            info: node.info(),
            platform_path: PathBuf::new(),
        })
    }

    fn read_directory(
        &self,
        _ctx: &OperationContext,
        path: &FileSystemPath,
    ) -> FileResult<Vec<Entry>> {
        let nodes = self.lock()?;
        match nodes.get(path) {
            Some(node) if node.is_dir() => {}
            Some(_) => return Err(FileError::NotADirectory),
            None => return Err(FileError::NotFound),
        }

        let entries = nodes
            .range(path.clone()..)
            .skip(1)
            .take_while(|(child, _)| path.is_ancestor_of(child))
            .filter(|(child, _)| child.depth() == path.depth() + 1)
            .map(|(child, node)| Entry {
                name: CompactString::from(child.file_name().unwrap_or_default()),
                is_directory: node.is_dir(),
                size: node.size(),
                last_modified: node.modified,
            })
            .collect();
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
        let mut nodes = self.lock()?;
        let node = nodes.get_mut(path).ok_or(FileError::NotFound)?;
        node.accessed = last_access_time;
        node.modified = last_modified_time;
        Ok(())
    }

    fn truncate(
        &self,
        ctx: &OperationContext,
        path: &FileSystemPath,
        length: u64,
    ) -> FileResult<()> {
        ctx.ensure_writable()?;
        let mut nodes = self.lock()?;
        let node = nodes.get_mut(path).ok_or(FileError::NotFound)?;
        let length = usize::try_from(length).map_err(|_| FileError::NoSpace)?;
        node.data_mut()?.resize(length, 0);
        node.modified = SystemTime::now();
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

        let mut nodes = self.lock()?;
        let node = nodes.get(path).ok_or(FileError::NotFound)?;
        if node.is_dir() {
            let children = descendants(&nodes, path);
            if !children.is_empty() && !recursive {
                return Err(FileError::NotEmpty);
            }
            for child in children {
                nodes.remove(&child);
            }
        }
        nodes.remove(path);
        Ok(())
    }
}
