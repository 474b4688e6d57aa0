//! Incremental assembly of streamed agent replies.
//!
//! # Responsibilities
//! - Open a handle that targets one assistant message
//! - Append chunks in delivery order (no reordering, no deduplication)
//! - Freeze the message on completion; completing again returns the same message
//!
//! # Design Decisions
//! - At most one open handle per target message id
//! - Lock order is always `handles` then `open_targets`
//! - Misuse (unknown or closed stream, busy target) is an [`AccumulatorError`], never a panic

use std::fmt;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::memory::types::{Message, MessageId, MessageState};
use crate::observability::metrics;

/// Identifier of one streaming exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(pub Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Contract violations of the accumulator API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccumulatorError {
    #[error("stream {0} already exists")]
    StreamExists(StreamId),

    #[error("message {message_id} already has open stream {stream_id}")]
    TargetBusy {
        message_id: MessageId,
        stream_id: StreamId,
    },

    #[error("unknown stream {0}")]
    UnknownStream(StreamId),

    #[error("stream {0} is closed")]
    Closed(StreamId),
}

#[derive(Debug)]
struct Handle {
    message: Message,
    open: bool,
    chunks: usize,
}

/// Registry of stream handles.
#[derive(Default)]
pub struct StreamAccumulator {
    handles: DashMap<StreamId, Handle>,
    open_targets: DashMap<MessageId, StreamId>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a stream targeting a fresh assistant message.
    pub fn start(&self, stream_id: StreamId) -> Result<MessageId, AccumulatorError> {
        let message_id = MessageId::new();
        self.start_for(stream_id, message_id)?;
        Ok(message_id)
    }

    /// Open a stream targeting `message_id`.
    pub fn start_for(&self, stream_id: StreamId, message_id: MessageId) -> Result<(), AccumulatorError> {
        let slot = match self.handles.entry(stream_id) {
            Entry::Occupied(_) => return Err(AccumulatorError::StreamExists(stream_id)),
            Entry::Vacant(slot) => slot,
        };

        match self.open_targets.entry(message_id) {
            Entry::Occupied(owner) => {
                return Err(AccumulatorError::TargetBusy {
                    message_id,
                    stream_id: *owner.get(),
                })
            }
            Entry::Vacant(target) => {
                target.insert(stream_id);
            }
        }

        slot.insert(Handle {
            message: Message::streaming(message_id),
            open: true,
            chunks: 0,
        });
        tracing::debug!(stream_id = %stream_id, message_id = %message_id, "Stream opened");
        Ok(())
    }

    /// Append `chunk` to an open stream.
    pub fn append(&self, stream_id: StreamId, chunk: &str) -> Result<(), AccumulatorError> {
        let mut handle = self
            .handles
            .get_mut(&stream_id)
            .ok_or(AccumulatorError::UnknownStream(stream_id))?;
        if !handle.open {
            return Err(AccumulatorError::Closed(stream_id));
        }
        handle.message.content.push_str(chunk);
        handle.chunks += 1;
        metrics::record_stream_chunk();
        Ok(())
    }

    /// Close the stream and return the final message.
    ///
    /// Completing a closed stream returns the same message again.
    pub fn complete(&self, stream_id: StreamId) -> Result<Message, AccumulatorError> {
        let mut handle = self
            .handles
            .get_mut(&stream_id)
            .ok_or(AccumulatorError::UnknownStream(stream_id))?;
        if handle.open {
            handle.open = false;
            handle.message.state = MessageState::Complete;
            self.open_targets
                .remove_if(&handle.message.id, |_, owner| *owner == stream_id);
            tracing::debug!(
                stream_id = %stream_id,
                message_id = %handle.message.id,
                chunks = handle.chunks,
                bytes = handle.message.content.len(),
                "Stream completed"
            );
        }
        Ok(handle.message.clone())
    }

    /// Complete (if needed) and forget a stream.
    pub fn release(&self, stream_id: StreamId) -> Result<Message, AccumulatorError> {
        let message = self.complete(stream_id)?;
        self.handles.remove(&stream_id);
        Ok(message)
    }

    /// Complete every open stream, returning the frozen messages.
    pub fn close_all(&self) -> Vec<Message> {
        let open: Vec<StreamId> = self
            .handles
            .iter()
            .filter(|entry| entry.value().open)
            .map(|entry| *entry.key())
            .collect();
        open.into_iter()
            .filter_map(|stream_id| self.complete(stream_id).ok())
            .collect()
    }

    /// Content accumulated so far.
    pub fn content(&self, stream_id: StreamId) -> Option<String> {
        self.handles.get(&stream_id).map(|h| h.message.content.clone())
    }

    pub fn chunk_count(&self, stream_id: StreamId) -> Option<usize> {
        self.handles.get(&stream_id).map(|h| h.chunks)
    }

    pub fn is_open(&self, stream_id: StreamId) -> bool {
        self.handles.get(&stream_id).map(|h| h.open).unwrap_or(false)
    }

    pub fn open_count(&self) -> usize {
        self.open_targets.len()
    }
}
