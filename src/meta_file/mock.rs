//! In-memory metadata file for testing
//!
//! `MockFileIntf` keeps file contents in a `Vec<u8>` and counts every
//! request. Use this for:
//!
//! - Unit testing without a metadata directory
//! - Deterministic control over asynchronous completion timing
//! - Injecting I/O failures
//!
//! Select it with `store: mock` in the array configuration.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::debug;

use super::{alloc_fd, check_range, AsyncMetaFileIoCtx, MetaFileIntf, MetaFsIoOpcode, MetaIoStats};
use crate::error::{Error, Result};

/// When submitted asynchronous requests complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionMode {
    /// Complete inside `submit_io` before it returns
    #[default]
    Inline,
    /// Hold requests until [`MockFileIntf::complete_pending`]
    Deferred,
}

#[derive(Debug, Default)]
struct MockState {
    /// `None` until created
    data: Option<Vec<u8>>,
    fd: Option<i32>,
}

/// In-memory metadata file.
#[derive(Debug)]
pub struct MockFileIntf {
    name: String,
    array_id: u32,
    mode: CompletionMode,
    state: Mutex<MockState>,
    deferred: Mutex<VecDeque<AsyncMetaFileIoCtx>>,
    fail_next: Mutex<Option<i32>>,
    stats: MetaIoStats,
}

impl MockFileIntf {
    /// Create a mock file that completes requests inline.
    pub fn new(name: &str, array_id: u32) -> Self {
        Self::with_mode(name, array_id, CompletionMode::Inline)
    }

    /// Create a mock file with an explicit completion mode.
    pub fn with_mode(name: &str, array_id: u32, mode: CompletionMode) -> Self {
        Self {
            name: name.to_string(),
            array_id,
            mode,
            state: Mutex::new(MockState::default()),
            deferred: Mutex::new(VecDeque::new()),
            fail_next: Mutex::new(None),
            stats: MetaIoStats::new(),
        }
    }

    pub fn array_id(&self) -> u32 {
        self.array_id
    }

    pub fn mode(&self) -> CompletionMode {
        self.mode
    }

    /// Make the next request (sync or async) fail with `code`.
    pub fn fail_next_io(&self, code: i32) {
        *self.fail_next.lock() = Some(code);
    }

    /// Number of deferred requests awaiting completion.
    pub fn pending_count(&self) -> usize {
        self.deferred.lock().len()
    }

    /// Complete every deferred request, top-priority requests first.
    ///
    /// Returns the number of completions fired.
    pub fn complete_pending(&self) -> usize {
        let mut batch: Vec<AsyncMetaFileIoCtx> = self.deferred.lock().drain(..).collect();
        batch.sort_by_key(|ctx| !ctx.is_top_priority());

        let count = batch.len();
        for ctx in batch {
            self.complete(ctx);
        }
        count
    }

    /// Complete at most one deferred request. Returns whether one was fired.
    pub fn complete_one(&self) -> bool {
        let next = {
            let mut deferred = self.deferred.lock();
            let urgent = deferred.iter().position(|ctx| ctx.is_top_priority());
            match urgent {
                Some(idx) => deferred.remove(idx),
                None => deferred.pop_front(),
            }
        };
        match next {
            Some(ctx) => {
                self.complete(ctx);
                true
            }
            None => false,
        }
    }

    /// Copy of the current file contents.
    pub fn snapshot(&self) -> Option<Vec<u8>> {
        self.state.lock().data.clone()
    }

    fn take_injected_failure(&self) -> Option<i32> {
        self.fail_next.lock().take()
    }

    fn complete(&self, mut ctx: AsyncMetaFileIoCtx) {
        let code = match self.take_injected_failure() {
            Some(code) => code,
            None => self.transfer(ctx.opcode, ctx.file_offset, &mut ctx.buffer),
        };
        self.stats.record(ctx.opcode, ctx.length, code == 0);
        self.stats.record_complete();
        // Lock-free here: the callback may submit further I/O.
        ctx.handle_io_complete(code);
    }

    /// Move bytes between the file and `buf`; returns a status code.
    fn transfer(&self, opcode: MetaFsIoOpcode, offset: u64, buf: &mut [u8]) -> i32 {
        let mut state = self.state.lock();
        let Some(data) = state.data.as_mut() else {
            return crate::error::EIO;
        };
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            return crate::error::EINVAL;
        }
        match opcode {
            MetaFsIoOpcode::Read => buf.copy_from_slice(&data[start..end]),
            MetaFsIoOpcode::Write => data[start..end].copy_from_slice(buf),
        }
        0
    }

    fn check_open(&self, opcode: MetaFsIoOpcode, offset: u64, length: u64) -> Result<()> {
        let state = self.state.lock();
        if state.fd.is_none() {
            return Err(Error::MetaFileNotOpen(self.name.clone()));
        }
        let size = state.data.as_ref().map_or(0, |d| d.len() as u64);
        check_range(&self.name, opcode, offset, length, size)
    }

    fn sync_io(&self, opcode: MetaFsIoOpcode, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_open(opcode, offset, buf.len() as u64)?;
        let code = match self.take_injected_failure() {
            Some(code) => code,
            None => self.transfer(opcode, offset, buf),
        };
        self.stats.record(opcode, buf.len() as u64, code == 0);
        if code != 0 {
            return Err(Error::MetaFileIo {
                file: self.name.clone(),
                opcode,
                offset,
                code,
            });
        }
        Ok(())
    }
}

impl MetaFileIntf for MockFileIntf {
    fn file_name(&self) -> &str {
        &self.name
    }

    fn fd(&self) -> Option<i32> {
        self.state.lock().fd
    }

    fn does_file_exist(&self) -> bool {
        self.state.lock().data.is_some()
    }

    fn create(&self, size: u64) -> Result<()> {
        if let Some(code) = self.take_injected_failure() {
            return Err(Error::MetaFileCreate {
                file: self.name.clone(),
                code,
            });
        }
        let mut state = self.state.lock();
        if state.data.is_some() {
            return Err(Error::MetaFileCreate {
                file: self.name.clone(),
                code: 17,
            });
        }
        state.data = Some(vec![0u8; size as usize]);
        debug!(file = %self.name, size, "Created mock metadata file");
        Ok(())
    }

    fn open(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.data.is_none() {
            return Err(Error::MetaFileNotOpen(self.name.clone()));
        }
        if state.fd.is_none() {
            state.fd = Some(alloc_fd());
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        // Deferred requests still complete; close never cancels.
        self.complete_pending();
        self.state.lock().fd = None;
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.state.lock().fd.is_some()
    }

    fn file_size(&self) -> u64 {
        self.state.lock().data.as_ref().map_or(0, |d| d.len() as u64)
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.sync_io(MetaFsIoOpcode::Read, offset, buf)
    }

    fn write(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut scratch = buf.to_vec();
        self.sync_io(MetaFsIoOpcode::Write, offset, &mut scratch)
    }

    fn submit_io(&self, ctx: AsyncMetaFileIoCtx) -> Result<()> {
        self.check_open(ctx.opcode, ctx.file_offset, ctx.length)?;
        self.stats.record_submit(ctx.is_top_priority());
        match self.mode {
            CompletionMode::Inline => self.complete(ctx),
            CompletionMode::Deferred => self.deferred.lock().push_back(ctx),
        }
        Ok(())
    }

    fn stats(&self) -> &MetaIoStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn opened(size: u64, mode: CompletionMode) -> MockFileIntf {
        let file = MockFileIntf::with_mode("RevMapWhole", 0, mode);
        file.create(size).unwrap();
        file.open().unwrap();
        file
    }

    #[test]
    fn test_create_open_close() {
        let file = MockFileIntf::new("RevMapWhole", 1);
        assert!(!file.does_file_exist());
        assert!(!file.is_opened());

        file.create(8192).unwrap();
        assert!(file.does_file_exist());
        assert_eq!(file.file_size(), 8192);

        file.open().unwrap();
        assert!(file.is_opened());
        assert!(file.fd().is_some());

        file.close().unwrap();
        assert!(!file.is_opened());
        assert!(file.fd().is_none());
    }

    #[test]
    fn test_create_twice_fails() {
        let file = MockFileIntf::new("f", 0);
        file.create(16).unwrap();
        assert_matches!(file.create(16), Err(Error::MetaFileCreate { code: 17, .. }));
    }

    #[test]
    fn test_sync_round_trip() {
        let file = opened(4096, CompletionMode::Inline);
        file.write(512, &[7u8; 512]).unwrap();

        let mut buf = vec![0u8; 1024];
        file.read(0, &mut buf).unwrap();
        assert!(buf[..512].iter().all(|&b| b == 0));
        assert!(buf[512..].iter().all(|&b| b == 7));
    }

    #[test]
    fn test_io_requires_open() {
        let file = MockFileIntf::new("f", 0);
        file.create(16).unwrap();
        let mut buf = [0u8; 4];
        assert_matches!(file.read(0, &mut buf), Err(Error::MetaFileNotOpen(_)));
    }

    #[test]
    fn test_out_of_range_rejected() {
        let file = opened(4096, CompletionMode::Inline);
        let mut buf = vec![0u8; 16];
        assert_matches!(
            file.read(4090, &mut buf),
            Err(Error::MetaFileIo { code: crate::error::EINVAL, .. })
        );
    }

    #[test]
    fn test_injected_failure_is_verbatim() {
        let file = opened(4096, CompletionMode::Inline);
        file.fail_next_io(-5);
        let err = file.write(0, &[1u8; 8]).unwrap_err();
        assert_eq!(err.status_code(), Some(-5));
        assert!(file.write(0, &[1u8; 8]).is_ok());
        assert_eq!(file.stats().snapshot().errors, 1);
    }

    #[test]
    fn test_inline_async_completes_before_return() {
        let file = opened(4096, CompletionMode::Inline);
        let done = Arc::new(AtomicU32::new(0));
        let done_cb = Arc::clone(&done);

        let ctx = AsyncMetaFileIoCtx::new(MetaFsIoOpcode::Write, 0, 0, vec![9u8; 4096])
            .with_callback(move |ctx| {
                assert!(ctx.is_success());
                done_cb.fetch_add(1, Ordering::SeqCst);
            });
        file.submit_io(ctx).unwrap();

        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(file.snapshot().unwrap()[100], 9);
        assert_eq!(file.stats().in_flight(), 0);
    }

    #[test]
    fn test_deferred_completion_top_priority_first() {
        let file = opened(4096, CompletionMode::Deferred);
        let order = Arc::new(Mutex::new(Vec::new()));

        for (idx, urgent) in [(0u64, false), (1, true), (2, false)] {
            let order_cb = Arc::clone(&order);
            let mut ctx =
                AsyncMetaFileIoCtx::new(MetaFsIoOpcode::Read, 0, idx * 512, vec![0u8; 512])
                    .with_callback(move |_| order_cb.lock().push(idx));
            if urgent {
                ctx.set_top_priority();
            }
            file.submit_io(ctx).unwrap();
        }

        assert_eq!(file.pending_count(), 3);
        assert_eq!(file.stats().in_flight(), 3);
        assert!(order.lock().is_empty());

        assert!(file.complete_one());
        assert_eq!(*order.lock(), vec![1]);

        assert_eq!(file.complete_pending(), 2);
        assert_eq!(*order.lock(), vec![1, 0, 2]);
        assert_eq!(file.stats().snapshot().top_priority_issued, 1);
    }

    #[test]
    fn test_async_error_delivered_to_callback() {
        let file = opened(4096, CompletionMode::Inline);
        file.fail_next_io(28);
        let seen = Arc::new(AtomicU32::new(0));
        let seen_cb = Arc::clone(&seen);

        let ctx = AsyncMetaFileIoCtx::new(MetaFsIoOpcode::Write, 0, 0, vec![0u8; 16])
            .with_callback(move |ctx| {
                seen_cb.store(ctx.error().unwrap_or(0) as u32, Ordering::SeqCst);
            });
        file.submit_io(ctx).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 28);
    }

    #[test]
    fn test_close_drains_deferred() {
        let file = opened(4096, CompletionMode::Deferred);
        let done = Arc::new(AtomicU32::new(0));
        let done_cb = Arc::clone(&done);
        let ctx = AsyncMetaFileIoCtx::new(MetaFsIoOpcode::Write, 0, 0, vec![1u8; 8])
            .with_callback(move |_| {
                done_cb.fetch_add(1, Ordering::SeqCst);
            });
        file.submit_io(ctx).unwrap();

        file.close().unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
