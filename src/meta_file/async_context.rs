//! Asynchronous metadata I/O context
//!
//! One [`AsyncMetaFileIoCtx`] describes exactly one in-flight request. The
//! issuer moves its buffer into the context, the store fills or drains it,
//! and [`AsyncMetaFileIoCtx::handle_io_complete`] hands the finished context
//! (buffer included) back through the registered callback.
//!
//! Completion consumes the context, so a request cannot be completed twice
//! and its callback cannot run more than once.

use std::fmt;

use super::MetaFsIoOpcode;
use crate::mapper::address::StripeId;

/// Callback invoked with the completed context.
pub type MetaIoCallback = Box<dyn FnOnce(AsyncMetaFileIoCtx) + Send + 'static>;

/// A single asynchronous metadata file request.
pub struct AsyncMetaFileIoCtx {
    /// Read or write
    pub opcode: MetaFsIoOpcode,

    /// Descriptor of the target file
    pub fd: i32,

    /// Byte offset in the file
    pub file_offset: u64,

    /// Transfer length in bytes
    pub length: u64,

    /// Data to write, or destination of a read
    pub buffer: Vec<u8>,

    /// Fired once on completion
    pub callback: Option<MetaIoCallback>,

    /// Stripe this request belongs to, if any
    pub vsid: Option<StripeId>,

    error: Option<i32>,
    top_priority: bool,
}

impl AsyncMetaFileIoCtx {
    /// Create a request covering the whole of `buffer`.
    pub fn new(opcode: MetaFsIoOpcode, fd: i32, file_offset: u64, buffer: Vec<u8>) -> Self {
        Self {
            opcode,
            fd,
            file_offset,
            length: buffer.len() as u64,
            buffer,
            callback: None,
            vsid: None,
            error: None,
            top_priority: false,
        }
    }

    /// Register the completion callback.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(AsyncMetaFileIoCtx) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Tag the request with the stripe it serves.
    pub fn with_vsid(mut self, vsid: StripeId) -> Self {
        self.vsid = Some(vsid);
        self
    }

    /// Record the outcome and fire the callback.
    ///
    /// `error` is 0 on success, otherwise the store's status code.
    pub fn handle_io_complete(mut self, error: i32) {
        self.error = Some(error);
        if let Some(callback) = self.callback.take() {
            callback(self);
        }
    }

    /// Status code of the completed request, `None` while in flight.
    pub fn error(&self) -> Option<i32> {
        self.error
    }

    /// Whether completion has been recorded.
    pub fn is_completed(&self) -> bool {
        self.error.is_some()
    }

    /// Whether the request completed without error.
    pub fn is_success(&self) -> bool {
        self.error == Some(0)
    }

    /// Transfer length. Meaningful to the issuer only after completion.
    pub fn length(&self) -> u64 {
        debug_assert!(
            self.is_completed(),
            "length read before I/O completion was observed"
        );
        self.length
    }

    pub fn set_top_priority(&mut self) {
        self.top_priority = true;
    }

    pub fn clear_top_priority(&mut self) {
        self.top_priority = false;
    }

    pub fn is_top_priority(&self) -> bool {
        self.top_priority
    }

    /// Take back the buffer once the request is done with it.
    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }
}

impl fmt::Debug for AsyncMetaFileIoCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncMetaFileIoCtx")
            .field("opcode", &self.opcode)
            .field("fd", &self.fd)
            .field("file_offset", &self.file_offset)
            .field("length", &self.length)
            .field("vsid", &self.vsid)
            .field("error", &self.error)
            .field("top_priority", &self.top_priority)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}
