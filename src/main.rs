//! relayfs - run file operations on a worker pool and report the result.
//!
//! Usage:
//!   relayfs stat PATH             Show metadata for PATH
//!   relayfs ls [PATH]             List a directory
//!   relayfs mkdir [-p] PATH       Create a directory
//!   relayfs rm [-r] PATH          Delete a file or directory
//!   relayfs touch PATH            Set access and modification times
//!   relayfs truncate PATH LEN     Resize a file
//!   relayfs ensure PATH           Create an empty file if missing
//!   relayfs cp SRC DEST           Copy, optionally into --dest-root
//!   relayfs mv SRC DEST           Move, optionally into --dest-root
//!
//! Paths are virtual: they are resolved under `--root` and cannot escape it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{bail, eyre, Context, Result};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

use relayfs_backend::LocalBackend;
use relayfs_core::{
    DirectoryListing, Entry, FileInfoReply, FileResult, FileSystemPath, OperationContext,
    RelayConfig, TransferOptions,
};
use relayfs_ops::{proxy, Relay, ReplyLoop, WorkerPool};

#[derive(Parser)]
#[command(
    name = "relayfs",
    version,
    about = "Run file operations through an asynchronous relay",
    long_about = "relayfs submits each operation to a pool of worker threads and \
                  reports the result once the worker replies.\n\n\
                  All paths are resolved under --root."
)]
struct Cli {
    /// Directory that virtual paths are resolved under
    #[arg(short = 'C', long, global = true, default_value = ".")]
    root: PathBuf,

    /// Number of worker threads (defaults to one per CPU)
    #[arg(short = 'j', long, global = true)]
    threads: Option<usize>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Reject every mutation (useful for dry inspection)
    #[arg(long, global = true)]
    read_only: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show metadata for a path
    Stat { path: String },

    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },

    /// Create a directory
    Mkdir {
        path: String,

        /// Create missing parent directories
        #[arg(short, long)]
        parents: bool,

        /// Fail if the directory already exists
        #[arg(short = 'x', long)]
        exclusive: bool,
    },

    /// Delete a file or directory
    Rm {
        path: String,

        /// Delete directories and their contents
        #[arg(short, long)]
        recursive: bool,
    },

    /// Set access and modification times
    Touch {
        path: String,

        /// RFC 3339 timestamp (defaults to now)
        #[arg(short, long)]
        time: Option<String>,
    },

    /// Resize a file, zero-filling when it grows
    Truncate { path: String, length: u64 },

    /// Create an empty file unless it already exists
    Ensure { path: String },

    /// Copy a file or directory tree
    Cp(TransferArgs),

    /// Move a file or directory tree
    Mv(TransferArgs),
}

#[derive(Args)]
struct TransferArgs {
    src: String,
    dest: String,

    /// Root of the destination backend (defaults to --root)
    #[arg(long)]
    dest_root: Option<PathBuf>,

    /// Copy buffer size in bytes
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Do not copy source timestamps to the destination
    #[arg(long)]
    no_preserve: bool,
}

/// Serializable view of a stat result.
#[derive(Serialize)]
struct StatOutput {
    path: String,
    kind: &'static str,
    size: u64,
    modified: DateTime<Local>,
    accessed: DateTime<Local>,
    created: DateTime<Local>,
    native_path: PathBuf,
}

impl StatOutput {
    fn new(path: &FileSystemPath, reply: FileInfoReply) -> Self {
        let info = reply.info;
        let kind = if info.is_symbolic_link {
            "symlink"
        } else if info.is_directory {
            "directory"
        } else {
            "file"
        };
        Self {
            path: path.to_string(),
            kind,
            size: info.size,
            modified: info.last_modified.into(),
            accessed: info.last_accessed.into(),
            created: info.creation_time.into(),
            native_path: reply.platform_path,
        }
    }
}

#[derive(Serialize)]
struct EntryOutput {
    name: String,
    is_directory: bool,
    size: u64,
    modified: DateTime<Local>,
}

impl From<Entry> for EntryOutput {
    fn from(entry: Entry) -> Self {
        Self {
            name: entry.name.to_string(),
            is_directory: entry.is_directory,
            size: entry.size,
            modified: entry.last_modified.into(),
        }
    }
}

#[derive(Serialize)]
struct StatusOutput<'a> {
    operation: &'a str,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    dest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created: Option<bool>,
    bytes_written: u64,
}

/// Worker pool, reply loop, and the context shared by one CLI invocation.
struct Session {
    origin: ReplyLoop,
    relay: Relay,
    ctx: Arc<OperationContext>,
    config: RelayConfig,
    json: bool,
}

impl Session {
    fn new(cli: &Cli) -> Result<Self> {
        let config = RelayConfig::builder()
            .worker_threads(cli.threads.unwrap_or(0))
            .build()
            .map_err(|e| eyre!("Invalid configuration: {e}"))?;
        let pool = Arc::new(WorkerPool::new(&config).context("Failed to start workers")?);
        let origin = ReplyLoop::new();
        let relay = Relay::new(Arc::clone(&pool), origin.handle());
        let ctx = if cli.read_only {
            OperationContext::read_only()
        } else {
            OperationContext::new()
        };
        tracing::debug!(op = %ctx.id(), threads = pool.thread_count(), "session started");

        Ok(Self {
            origin,
            relay,
            ctx: Arc::new(ctx),
            config,
            json: cli.json,
        })
    }

    /// Submit one operation and block until its reply has run.
    fn wait<T, S>(&mut self, submit: S) -> Result<FileResult<T>>
    where
        T: Send + 'static,
        S: FnOnce(&Relay, &Arc<OperationContext>, Box<dyn FnOnce(FileResult<T>) + Send>) -> bool,
    {
        let (tx, mut rx) = oneshot::channel();
        let callback: Box<dyn FnOnce(FileResult<T>) + Send> =
            Box::new(move |result: FileResult<T>| {
                let _ = tx.send(result);
            });
        if !submit(&self.relay, &self.ctx, callback) {
            bail!("The worker pool refused the operation");
        }
        if !self.origin.blocking_run_one() {
            bail!("The reply loop closed before the operation finished");
        }
        rx.try_recv().context("The operation finished without a result")
    }

    fn transfer_options(&self, args: &TransferArgs) -> TransferOptions {
        let defaults = self.config.transfer_options();
        TransferOptions {
            buffer_size: args.buffer_size.unwrap_or(defaults.buffer_size).max(1),
            preserve_timestamps: defaults.preserve_timestamps && !args.no_preserve,
        }
    }

    fn report_status(&self, status: StatusOutput<'_>) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(&status)?);
            return Ok(());
        }
        match (&status.dest, status.created) {
            (Some(dest), _) => println!(
                "{} {} -> {} ({} written)",
                status.operation,
                status.path,
                dest,
                format_size(status.bytes_written)
            ),
            (None, Some(true)) => println!("{} {}: created", status.operation, status.path),
            (None, Some(false)) => println!("{} {}: already exists", status.operation, status.path),
            (None, None) => println!("{} {}: ok", status.operation, status.path),
        }
        Ok(())
    }

    fn status<'a>(&self, operation: &'a str, path: &FileSystemPath) -> StatusOutput<'a> {
        StatusOutput {
            operation,
            path: path.to_string(),
            dest: None,
            created: None,
            bytes_written: self.ctx.bytes_written(),
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut session = Session::new(&cli)?;
    let backend = Arc::new(LocalBackend::new(&cli.root));

    match cli.command {
        Command::Stat { path } => {
            let path = FileSystemPath::new(&path);
            let reply = session
                .wait::<FileInfoReply, _>(|relay, ctx, done| {
                    proxy::get_file_info(relay, ctx, &backend, &path, done)
                })?
                .with_context(|| format!("Cannot stat {path}"))?;
            print_stat(&StatOutput::new(&path, reply), session.json)?;
        }
        Command::Ls { path } => {
            let path = FileSystemPath::new(&path);
            let listing = session
                .wait::<DirectoryListing, _>(|relay, ctx, done| {
                    proxy::read_directory(relay, ctx, &backend, &path, done)
                })?
                .with_context(|| format!("Cannot list {path}"))?;
            let mut entries: Vec<EntryOutput> =
                listing.entries.into_iter().map(EntryOutput::from).collect();
            entries.sort_by(|a, b| {
                b.is_directory
                    .cmp(&a.is_directory)
                    .then_with(|| a.name.cmp(&b.name))
            });
            print_listing(&entries, session.json)?;
        }
        Command::Mkdir {
            path,
            parents,
            exclusive,
        } => {
            let path = FileSystemPath::new(&path);
            session
                .wait::<(), _>(|relay, ctx, done| {
                    proxy::create_directory(relay, ctx, &backend, &path, exclusive, parents, done)
                })?
                .with_context(|| format!("Cannot create directory {path}"))?;
            session.report_status(session.status("mkdir", &path))?;
        }
        Command::Rm { path, recursive } => {
            let path = FileSystemPath::new(&path);
            session
                .wait::<(), _>(|relay, ctx, done| {
                    proxy::delete(relay, ctx, &backend, &path, recursive, done)
                })?
                .with_context(|| format!("Cannot delete {path}"))?;
            session.report_status(session.status("rm", &path))?;
        }
        Command::Touch { path, time } => {
            let path = FileSystemPath::new(&path);
            let when = match time {
                Some(text) => parse_time(&text)?,
                None => SystemTime::now(),
            };
            session
                .wait::<(), _>(|relay, ctx, done| {
                    proxy::touch(relay, ctx, &backend, &path, when, when, done)
                })?
                .with_context(|| format!("Cannot touch {path}"))?;
            session.report_status(session.status("touch", &path))?;
        }
        Command::Truncate { path, length } => {
            let path = FileSystemPath::new(&path);
            session
                .wait::<(), _>(|relay, ctx, done| {
                    proxy::truncate(relay, ctx, &backend, &path, length, done)
                })?
                .with_context(|| format!("Cannot truncate {path}"))?;
            session.report_status(session.status("truncate", &path))?;
        }
        Command::Ensure { path } => {
            let path = FileSystemPath::new(&path);
            let created = session
                .wait::<bool, _>(|relay, ctx, done| {
                    proxy::ensure_file_exists(relay, ctx, &backend, &path, done)
                })?
                .with_context(|| format!("Cannot create {path}"))?;
            let mut status = session.status("ensure", &path);
            status.created = Some(created);
            session.report_status(status)?;
        }
        Command::Cp(args) => run_transfer(&mut session, &backend, args, false)?,
        Command::Mv(args) => run_transfer(&mut session, &backend, args, true)?,
    }

    Ok(())
}

/// Copy or move between `backend` and the optional `--dest-root` backend.
fn run_transfer(
    session: &mut Session,
    backend: &Arc<LocalBackend>,
    args: TransferArgs,
    remove_source: bool,
) -> Result<()> {
    let dest_backend = match &args.dest_root {
        Some(root) => Arc::new(LocalBackend::new(root)),
        None => Arc::clone(backend),
    };
    let src = FileSystemPath::new(&args.src);
    let dest = FileSystemPath::new(&args.dest);
    let options = session.transfer_options(&args);
    let (label, verb) = if remove_source {
        ("mv", "move")
    } else {
        ("cp", "copy")
    };

    session
        .wait::<(), _>(|relay, ctx, done| {
            if remove_source {
                proxy::move_with_options(
                    relay,
                    ctx,
                    backend,
                    &dest_backend,
                    &src,
                    &dest,
                    options,
                    done,
                )
            } else {
                proxy::copy_with_options(
                    relay,
                    ctx,
                    backend,
                    &dest_backend,
                    &src,
                    &dest,
                    options,
                    done,
                )
            }
        })?
        .with_context(|| format!("Cannot {verb} {src} to {dest}"))?;

    let mut status = session.status(label, &src);
    status.dest = Some(dest.to_string());
    session.report_status(status)
}

fn print_stat(stat: &StatOutput, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(stat)?);
        return Ok(());
    }

    println!("{}", "─".repeat(60));
    println!(" {} ({})", stat.path, stat.kind);
    println!("{}", "─".repeat(60));
    println!("   size:      {}", format_size(stat.size));
    println!("   modified:  {}", format_time(&stat.modified));
    println!("   accessed:  {}", format_time(&stat.accessed));
    println!("   created:   {}", format_time(&stat.created));
    if !stat.native_path.as_os_str().is_empty() {
        println!("   native:    {}", stat.native_path.display());
    }
    Ok(())
}

fn print_listing(entries: &[EntryOutput], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }

    for entry in entries {
        let marker = if entry.is_directory { "/" } else { "" };
        let size = if entry.is_directory {
            "-".to_string()
        } else {
            format_size(entry.size)
        };
        println!(
            " {:>10}  {}  {}{}",
            size,
            format_time(&entry.modified),
            entry.name,
            marker
        );
    }
    println!(" {} entries", entries.len());
    Ok(())
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

fn format_time(time: &DateTime<Local>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Parse an RFC 3339 timestamp such as `2024-05-01T12:00:00Z`.
fn parse_time(text: &str) -> Result<SystemTime> {
    let parsed = DateTime::parse_from_rfc3339(text.trim())
        .with_context(|| format!("Invalid timestamp '{text}'"))?;
    Ok(parsed.into())
}
