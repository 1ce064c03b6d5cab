//! File-backed metadata store
//!
//! Each metadata file is a regular file under `<meta_dir>/<array_name>/`.
//! Synchronous I/O runs on the caller's thread with positional reads and
//! writes. Asynchronous submissions are handed to a worker thread owned by
//! the open file; completions fire on that thread.
//!
//! # Scheduling
//!
//! ```text
//! submit_io ──▶ channel ──▶ worker ──┬─▶ urgent queue  (top priority)
//!                                    └─▶ normal queue
//!                                         │
//!                   urgent drained first  ▼
//!                               pread/pwrite + callback
//! ```
//!
//! Closing the file joins the worker after every queued request has
//! completed; nothing is cancelled.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::{alloc_fd, check_range, AsyncMetaFileIoCtx, MetaFileIntf, MetaFsIoOpcode, MetaIoStats};
use crate::error::{Error, Result, EIO};

/// Handle to an open file and its completion worker.
#[derive(Debug)]
struct OpenFile {
    file: Arc<File>,
    fd: i32,
    size: u64,
    submit_tx: Sender<AsyncMetaFileIoCtx>,
    worker: JoinHandle<()>,
}

/// Metadata file stored on the local filesystem.
#[derive(Debug)]
pub struct FileStore {
    name: String,
    path: PathBuf,
    open: Mutex<Option<OpenFile>>,
    stats: Arc<MetaIoStats>,
}

impl FileStore {
    /// Describe a metadata file `name` inside `dir`. Nothing is touched on disk.
    pub fn new(dir: impl AsRef<Path>, name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: dir.as_ref().join(name),
            open: Mutex::new(None),
            stats: Arc::new(MetaIoStats::new()),
        }
    }

    /// Full path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, opcode: MetaFsIoOpcode, offset: u64, err: &std::io::Error) -> Error {
        Error::MetaFileIo {
            file: self.name.clone(),
            opcode,
            offset,
            code: err.raw_os_error().unwrap_or(EIO),
        }
    }

    /// Validate a request against the open file and return the file handle.
    fn prepare(&self, opcode: MetaFsIoOpcode, offset: u64, length: u64) -> Result<Arc<File>> {
        let open = self.open.lock();
        let Some(open) = open.as_ref() else {
            return Err(Error::MetaFileNotOpen(self.name.clone()));
        };
        check_range(&self.name, opcode, offset, length, open.size)?;
        Ok(Arc::clone(&open.file))
    }
}

fn transfer(file: &File, opcode: MetaFsIoOpcode, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    match opcode {
        MetaFsIoOpcode::Read => file.read_exact_at(buf, offset),
        MetaFsIoOpcode::Write => file.write_all_at(buf, offset),
    }
}

fn run_request(file: &File, stats: &MetaIoStats, mut ctx: AsyncMetaFileIoCtx) {
    let code = match transfer(file, ctx.opcode, ctx.file_offset, &mut ctx.buffer) {
        Ok(()) => 0,
        Err(e) => e.raw_os_error().unwrap_or(EIO),
    };
    stats.record(ctx.opcode, ctx.length, code == 0);
    stats.record_complete();

    // The worker outlives any single callback.
    let (opcode, offset) = (ctx.opcode, ctx.file_offset);
    if panic::catch_unwind(AssertUnwindSafe(|| ctx.handle_io_complete(code))).is_err() {
        error!(opcode = %opcode, offset, "Metadata I/O completion callback panicked");
    }
}

fn enqueue(
    ctx: AsyncMetaFileIoCtx,
    urgent: &mut VecDeque<AsyncMetaFileIoCtx>,
    normal: &mut VecDeque<AsyncMetaFileIoCtx>,
) {
    if ctx.is_top_priority() {
        urgent.push_back(ctx);
    } else {
        normal.push_back(ctx);
    }
}

/// Worker loop: drain the channel into two queues and serve urgent first.
fn completion_worker(file: Arc<File>, stats: Arc<MetaIoStats>, rx: Receiver<AsyncMetaFileIoCtx>) {
    let mut urgent = VecDeque::new();
    let mut normal = VecDeque::new();

    // recv() fails only once every sender is gone and the channel is empty.
    while let Ok(first) = rx.recv() {
        enqueue(first, &mut urgent, &mut normal);
        loop {
            for ctx in rx.try_iter() {
                enqueue(ctx, &mut urgent, &mut normal);
            }
            let Some(ctx) = urgent.pop_front().or_else(|| normal.pop_front()) else {
                break;
            };
            run_request(&file, &stats, ctx);
        }
    }
}

impl MetaFileIntf for FileStore {
    fn file_name(&self) -> &str {
        &self.name
    }

    fn fd(&self) -> Option<i32> {
        self.open.lock().as_ref().map(|o| o.fd)
    }

    fn does_file_exist(&self) -> bool {
        self.path.is_file()
    }

    fn create(&self, size: u64) -> Result<()> {
        let create_err = |e: std::io::Error| Error::MetaFileCreate {
            file: self.name.clone(),
            code: e.raw_os_error().unwrap_or(EIO),
        };

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(create_err)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .map_err(create_err)?;
        if let Err(e) = file.set_len(size).and_then(|()| file.sync_all()) {
            drop(file);
            if let Err(rm) = std::fs::remove_file(&self.path) {
                warn!(file = %self.path.display(), error = %rm, "Failed to remove partial metadata file");
            }
            return Err(create_err(e));
        }

        info!(file = %self.path.display(), size, "Created metadata file");
        Ok(())
    }

    fn open(&self) -> Result<()> {
        let mut open = self.open.lock();
        if open.is_some() {
            return Ok(());
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| {
                warn!(file = %self.path.display(), error = %e, "Failed to open metadata file");
                Error::MetaFileNotOpen(self.name.clone())
            })?;
        let size = file.metadata()?.len();
        let file = Arc::new(file);

        let (submit_tx, submit_rx) = unbounded();
        let worker_file = Arc::clone(&file);
        let worker_stats = Arc::clone(&self.stats);
        let worker = std::thread::Builder::new()
            .name(format!("metafs-{}", self.name))
            .spawn(move || completion_worker(worker_file, worker_stats, submit_rx))?;

        let fd = alloc_fd();
        debug!(file = %self.name, fd, size, "Opened metadata file");
        *open = Some(OpenFile {
            file,
            fd,
            size,
            submit_tx,
            worker,
        });
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let Some(open) = self.open.lock().take() else {
            return Ok(());
        };
        let OpenFile {
            file, fd, worker, submit_tx, ..
        } = open;

        // Dropping the sender lets the worker exit after the queue drains.
        drop(submit_tx);
        if worker.join().is_err() {
            return Err(Error::Internal(format!(
                "completion worker for {} panicked",
                self.name
            )));
        }
        file.sync_all()?;
        debug!(file = %self.name, fd, "Closed metadata file");
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.open.lock().is_some()
    }

    fn file_size(&self) -> u64 {
        if let Some(open) = self.open.lock().as_ref() {
            return open.size;
        }
        std::fs::metadata(&self.path).map_or(0, |m| m.len())
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let opcode = MetaFsIoOpcode::Read;
        let file = self.prepare(opcode, offset, buf.len() as u64)?;
        let result = file.read_exact_at(buf, offset);
        self.stats.record(opcode, buf.len() as u64, result.is_ok());
        result.map_err(|e| self.io_error(opcode, offset, &e))
    }

    fn write(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let opcode = MetaFsIoOpcode::Write;
        let file = self.prepare(opcode, offset, buf.len() as u64)?;
        let result = file.write_all_at(buf, offset);
        self.stats.record(opcode, buf.len() as u64, result.is_ok());
        result.map_err(|e| self.io_error(opcode, offset, &e))
    }

    fn submit_io(&self, ctx: AsyncMetaFileIoCtx) -> Result<()> {
        let open = self.open.lock();
        let Some(open) = open.as_ref() else {
            return Err(Error::MetaFileNotOpen(self.name.clone()));
        };
        check_range(&self.name, ctx.opcode, ctx.file_offset, ctx.length, open.size)?;

        self.stats.record_submit(ctx.is_top_priority());
        open.submit_tx
            .send(ctx)
            .map_err(|_| Error::Internal(format!("completion worker for {} is gone", self.name)))
    }

    fn stats(&self) -> &MetaIoStats {
        &self.stats
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(file = %self.name, error = %e, "Failed to close metadata file on drop");
        }
    }
}
