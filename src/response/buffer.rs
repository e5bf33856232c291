//! Response body buffering.
//!
//! # Responsibilities
//! - Hold body bytes until the next commit
//! - Track bytes already committed against an optional Content-Length budget
//! - Stack nested capture buffers for include scopes
//! - Collect encoded wire bytes ("transport") for the session to flush
//!
//! # Design Decisions
//! - Fixed capacity; a full buffer forces a commit instead of growing
//! - The wire queue is the only place bytes leave the pipeline

use bytes::{Bytes, BytesMut};

/// Default body buffer capacity in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Body buffer, budget and capture stack of one response.
#[derive(Debug)]
pub struct OutputBuffer {
    buffer: BytesMut,
    capacity: usize,
    bytes_committed: u64,
    content_length: Option<u64>,
    discard: bool,
    captures: Vec<BytesMut>,
    committed: bool,
    wire: BytesMut,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: BytesMut::with_capacity(capacity),
            capacity,
            bytes_committed: 0,
            content_length: None,
            discard: false,
            captures: Vec::new(),
            committed: false,
            wire: BytesMut::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity. Only allowed before anything was buffered or committed.
    pub fn set_capacity(&mut self, capacity: usize) -> bool {
        if self.committed || !self.buffer.is_empty() {
            return false;
        }
        self.capacity = capacity.max(1);
        self.buffer.reserve(self.capacity);
        true
    }

    /// Body bytes currently held in the buffer.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Body bytes already moved to the wire.
    pub fn bytes_committed(&self) -> u64 {
        self.bytes_committed
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn set_content_length(&mut self, length: Option<u64>) {
        self.content_length = length;
    }

    pub fn is_discard(&self) -> bool {
        self.discard
    }

    pub fn set_discard(&mut self, discard: bool) {
        self.discard = discard;
    }

    /// Number of active capture buffers.
    pub fn capture_depth(&self) -> usize {
        self.captures.len()
    }

    /// Start capturing writes into a new top-of-stack buffer.
    pub fn push_capture(&mut self) {
        self.captures.push(BytesMut::new());
    }

    /// Remove the top capture buffer and return its contents.
    pub fn pop_capture(&mut self) -> Option<Bytes> {
        self.captures.pop().map(BytesMut::freeze)
    }

    /// Append to the active capture buffer, if any.
    pub(crate) fn write_capture(&mut self, data: &[u8]) -> bool {
        match self.captures.last_mut() {
            Some(top) => {
                top.extend_from_slice(data);
                true
            }
            None => false,
        }
    }

    /// Bytes that may still be written before the budget is exhausted.
    pub fn remaining_budget(&self) -> Option<u64> {
        self.content_length
            .map(|limit| limit.saturating_sub(self.bytes_committed + self.buffer.len() as u64))
    }

    pub fn budget_reached(&self) -> bool {
        self.remaining_budget() == Some(0)
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.capacity
    }

    /// Copy as much of `data` as fits; returns the number of bytes taken.
    pub(crate) fn buffer_some(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.capacity.saturating_sub(self.buffer.len()));
        self.buffer.extend_from_slice(&data[..n]);
        n
    }

    /// Move the buffered body out, counting it as committed.
    pub(crate) fn take_buffered(&mut self) -> Bytes {
        let body = self.buffer.split().freeze();
        self.bytes_committed += body.len() as u64;
        body
    }

    pub(crate) fn mark_committed(&mut self) {
        self.committed = true;
    }

    pub(crate) fn wire_mut(&mut self) -> &mut BytesMut {
        &mut self.wire
    }

    /// Encoded bytes waiting to be written to the socket.
    pub fn pending_wire(&self) -> usize {
        self.wire.len()
    }

    /// Take every encoded byte queued for the socket.
    pub fn take_wire(&mut self) -> Bytes {
        self.wire.split().freeze()
    }

    /// Discard buffered body bytes. Fails once committed.
    pub fn reset_buffer(&mut self) -> bool {
        if self.committed {
            return false;
        }
        self.buffer.clear();
        true
    }

    pub(crate) fn clean(&mut self) {
        self.buffer.clear();
        self.bytes_committed = 0;
        self.content_length = None;
        self.discard = false;
        self.captures.clear();
        self.committed = false;
        self.wire.clear();
    }
}
