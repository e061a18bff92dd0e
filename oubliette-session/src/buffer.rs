//! Bounded ring buffer of streamed events for a single session.
//!
//! Every streamed event (model deltas, tool calls, completions) passes
//! through an `EventBuffer` before an MCP `events` call or a push
//! notification reads it back. The buffer is bounded: once full, appending
//! overwrites the oldest entry and advances `start_index`, so a caller that
//! polls too slowly gets a `Purged` error rather than silently missing
//! events.

use std::collections::VecDeque;

use tokio::sync::RwLock;

use crate::model::StreamEvent;

pub const DEFAULT_CAPACITY: usize = 1000;

/// A `StreamEvent` tagged with its position in the buffer's lifetime index
/// and the time it was appended.
#[derive(Debug, Clone)]
pub struct BufferedEvent {
    pub index: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event: StreamEvent,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BufferStats {
    pub len: usize,
    pub capacity: usize,
    pub start_index: u64,
    pub next_index: u64,
    pub dropped_events: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("events purged, oldest available index is {oldest_available}")]
    Purged { oldest_available: u64 },
}

struct Inner {
    events: VecDeque<(StreamEvent, chrono::DateTime<chrono::Utc>)>,
    capacity: usize,
    /// Index of `events[0]`. Every append beyond capacity increments this,
    /// which is how callers detect a purge: `after < start_index`.
    start_index: u64,
    /// Index the *next* appended event will receive.
    next_index: u64,
    dropped_events: u64,
}

impl Inner {
    fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            start_index: 0,
            next_index: 0,
            dropped_events: 0,
        }
    }
}

/// Thread-safe bounded event log. One instance per active session.
pub struct EventBuffer {
    inner: RwLock<Inner>,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::new(capacity.max(1))),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Appends an event and returns the index it was assigned. When the
    /// buffer is at capacity, the oldest event is dropped first.
    pub async fn append(&self, event: StreamEvent) -> u64 {
        let mut inner = self.inner.write().await;
        let index = inner.next_index;
        if inner.events.len() == inner.capacity {
            inner.events.pop_front();
            inner.start_index += 1;
            inner.dropped_events += 1;
        }
        inner.events.push_back((event, chrono::Utc::now()));
        inner.next_index += 1;
        index
    }

    /// Returns every event with index strictly greater than `after`, along
    /// with the index of the last event returned (or `after` if none are
    /// new). Returns `Purged` only when `after` is more than one behind
    /// `start_index` — `after == start_index - 1` is exactly caught up to
    /// the oldest still-buffered event and must succeed, not purge.
    pub async fn after(&self, after: u64) -> Result<(Vec<BufferedEvent>, u64), BufferError> {
        let inner = self.inner.read().await;
        if after + 1 < inner.start_index {
            return Err(BufferError::Purged {
                oldest_available: inner.start_index,
            });
        }
        // `after == start_index - 1` (the exactly-caught-up case admitted above)
        // must skip nothing: every buffered event is strictly newer than `after`.
        let skip = if after < inner.start_index {
            0
        } else {
            ((after - inner.start_index) as usize).saturating_add(1)
        }
        .min(inner.events.len());
        let out: Vec<BufferedEvent> = inner
            .events
            .iter()
            .enumerate()
            .skip(skip)
            .map(|(i, (event, timestamp))| BufferedEvent {
                index: inner.start_index + i as u64,
                timestamp: *timestamp,
                event: event.clone(),
            })
            .collect();
        let last_index = out.last().map(|e| e.index).unwrap_or(after);
        Ok((out, last_index))
    }

    /// First-poll convention: returns every event currently
    /// buffered, regardless of how far `start_index` has advanced, since
    /// there's no prior `since_index` to have been purged past.
    pub async fn all(&self) -> (Vec<BufferedEvent>, u64) {
        let inner = self.inner.read().await;
        let out: Vec<BufferedEvent> = inner
            .events
            .iter()
            .enumerate()
            .map(|(i, (event, timestamp))| BufferedEvent {
                index: inner.start_index + i as u64,
                timestamp: *timestamp,
                event: event.clone(),
            })
            .collect();
        let last_index = out.last().map(|e| e.index).unwrap_or_else(|| inner.start_index.saturating_sub(1));
        (out, last_index)
    }

    pub async fn last_index(&self) -> u64 {
        let inner = self.inner.read().await;
        inner.next_index.saturating_sub(1)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn start_index(&self) -> u64 {
        self.inner.read().await.start_index
    }

    pub async fn stats(&self) -> BufferStats {
        let inner = self.inner.read().await;
        BufferStats {
            len: inner.events.len(),
            capacity: inner.capacity,
            start_index: inner.start_index,
            next_index: inner.next_index,
            dropped_events: inner.dropped_events,
        }
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.start_index = inner.next_index;
        inner.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventType;

    fn ev(text: &str) -> StreamEvent {
        StreamEvent {
            event_type: EventType::Message,
            text: Some(text.to_string()),
            tool_name: None,
            role: Some("assistant".to_string()),
            final_text: None,
        }
    }

    #[tokio::test]
    async fn append_and_after_round_trip() {
        let buf = EventBuffer::new(10);
        let i0 = buf.append(ev("a")).await;
        let i1 = buf.append(ev("b")).await;
        assert_eq!((i0, i1), (0, 1));

        let (events, last) = buf.after(0).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].index, 1);
        assert_eq!(last, 1);

        let (events, last) = buf.after(last).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(last, 1);
    }

    #[tokio::test]
    async fn ring_overflow_advances_start_index_and_counts_drops() {
        let buf = EventBuffer::new(2);
        buf.append(ev("a")).await;
        buf.append(ev("b")).await;
        buf.append(ev("c")).await;
        buf.append(ev("d")).await;

        let stats = buf.stats().await;
        assert_eq!(stats.len, 2);
        assert_eq!(stats.start_index, 2);
        assert_eq!(stats.dropped_events, 2);

        // `after(start_index - 2)`: genuinely stale, must purge.
        let err = buf.after(0).await.unwrap_err();
        match err {
            BufferError::Purged { oldest_available } => assert_eq!(oldest_available, 2),
        }

        // `after(start_index - 1)`: exactly caught up to the oldest buffered
        // event, must succeed with every currently-buffered event, not purge.
        let (events, last_index) = buf.after(1).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].index, 2);
        assert_eq!(events[1].index, 3);
        assert_eq!(last_index, 3);

        let (events, _) = buf.after(2).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].index, 3);
    }

    #[tokio::test]
    async fn after_on_empty_buffer_returns_empty() {
        let buf = EventBuffer::new(10);
        let (events, last) = buf.after(0).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(last, 0);
    }
}
