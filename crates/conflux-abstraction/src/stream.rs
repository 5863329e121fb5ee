//! Helpers for adapters that receive text incrementally.

use std::pin::pin;
use std::sync::{Arc, Mutex, PoisonError};

use futures::{Stream, StreamExt};

use crate::{BackendError, PartialTextCallback};

/// Accumulates partial text chunks.
///
/// Clones share the same buffer, so the accumulator can be handed to
/// concurrent callbacks; every append goes through one mutex.
#[derive(Debug, Clone, Default)]
pub struct StreamAccumulator {
    buffer: Arc<Mutex<String>>,
}

impl StreamAccumulator {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk.
    pub fn push(&self, chunk: &str) {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).push_str(chunk);
    }

    /// Returns a copy of the text accumulated so far.
    pub fn snapshot(&self) -> String {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Returns the number of bytes accumulated so far.
    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if nothing has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes the accumulated text, leaving the buffer empty.
    pub fn finish(&self) -> String {
        std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Drains a stream of text chunks.
///
/// Each non-empty chunk is forwarded to `on_partial` as it arrives. Returns
/// the aggregated text, or the first error the stream yields.
pub async fn drive_stream<S>(
    stream: S,
    on_partial: &PartialTextCallback<'_>,
) -> Result<String, BackendError>
where
    S: Stream<Item = Result<String, BackendError>>,
{
    let mut stream = pin!(stream);
    let accumulator = StreamAccumulator::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if chunk.is_empty() {
            continue;
        }
        accumulator.push(&chunk);
        on_partial(&chunk);
    }

    Ok(accumulator.finish())
}
