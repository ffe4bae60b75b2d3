use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use super::Resolution;

pub const DEFAULT_CAPACITY: usize = 1024;

/// One line received from a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Position in the stream since the connection was opened, starting at 0
    pub seq: u64,
    pub text: String,
    pub received_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum StreamEnd {
    Closed,
    Failed(String),
}

#[derive(Debug)]
pub(super) struct StreamState {
    pub(super) lines: VecDeque<Line>,
    pub(super) next_seq: u64,
    capacity: usize,
    /// Scan position of the expectation currently waiting, if any
    pub(super) pending: Option<u64>,
    /// Position the next armed expectation starts from
    pub(super) anchor: Option<u64>,
    pub(super) cancel_requested: bool,
    pub(super) resolution: Resolution,
    pub(super) end: Option<StreamEnd>,
}

impl StreamState {
    /// Drops the oldest lines beyond capacity. Lines a waiting expectation has not scanned yet
    /// are never dropped. Armed lines are kept up to capacity; past that the anchor moves
    /// forward with the oldest retained line.
    pub(super) fn trim(&mut self) {
        while self.lines.len() > self.capacity {
            let Some(front) = self.lines.front() else {
                break;
            };
            if self.pending.is_some_and(|cursor| front.seq >= cursor) {
                break;
            }

            let dropped = front.seq;
            self.lines.pop_front();
            if self.anchor.is_some_and(|anchor| anchor <= dropped) {
                self.anchor = Some(dropped + 1);
            }
        }
    }
}

#[derive(Debug)]
pub(super) struct Inner {
    pub(super) state: Mutex<StreamState>,
    pub(super) changed: Condvar,
}

/// Time-ordered lines received from one device, written by the session's reader thread and
/// consumed by [`LineStream::expect`]. Cloning gives another handle to the same stream.
#[derive(Debug, Clone)]
pub struct LineStream {
    pub(super) inner: Arc<Inner>,
}

impl Default for LineStream {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LineStream {
    /// Creates a stream retaining at least `capacity` trailing lines
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(StreamState {
                    lines: VecDeque::new(),
                    next_seq: 0,
                    capacity: capacity.max(1),
                    pending: None,
                    anchor: None,
                    cancel_requested: false,
                    resolution: Resolution::Pending,
                    end: None,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a line. Ignored once the stream has ended.
    pub fn push(&self, text: impl Into<String>) {
        let mut state = self.lock();
        if state.end.is_some() {
            return;
        }

        let seq = state.next_seq;
        state.lines.push_back(Line { seq, text: text.into(), received_at: Instant::now() });
        state.next_seq += 1;
        state.trim();
        drop(state);

        self.inner.changed.notify_all();
    }

    /// Marks the producing side as broken. A waiting expectation still sees every line pushed
    /// before the failure, then resolves with a transport error.
    pub fn fail(&self, reason: impl Into<String>) {
        let mut state = self.lock();
        if state.end.is_none() {
            state.end = Some(StreamEnd::Failed(reason.into()));
        }
        drop(state);
        self.inner.changed.notify_all();
    }

    /// Ends the stream. A waiting expectation resolves as cancelled.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.end.is_none() {
            state.end = Some(StreamEnd::Closed);
        }
        drop(state);
        self.inner.changed.notify_all();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().end.is_some()
    }

    /// Forgets every retained line and any armed position
    pub fn clear(&self) {
        let mut state = self.lock();
        state.lines.clear();
        state.anchor = None;
    }

    /// Makes the next [`LineStream::expect_armed`] consider lines from this point on, even
    /// those arriving before it is called. Does nothing if the stream is already armed.
    /// At most `capacity` armed lines are retained.
    pub fn arm(&self) {
        let mut state = self.lock();
        if state.anchor.is_none() {
            state.anchor = Some(state.next_seq);
        }
    }

    /// Forgets the armed position. Retained lines stay.
    pub fn disarm(&self) {
        self.lock().anchor = None;
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.lock().anchor.is_some()
    }

    /// Resolves a waiting expectation as cancelled. Does nothing if none is waiting.
    pub fn cancel(&self) {
        let mut state = self.lock();
        if state.pending.is_some() {
            state.cancel_requested = true;
        }
        drop(state);
        self.inner.changed.notify_all();
    }

    /// Whether an expectation is currently waiting on this stream
    #[must_use]
    pub fn is_expecting(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// State of the current expectation, or of the last one if none is waiting
    #[must_use]
    pub fn resolution(&self) -> Resolution {
        self.lock().resolution
    }

    /// Snapshot of the retained trailing window
    #[must_use]
    pub fn history(&self) -> Vec<Line> {
        self.lock().lines.iter().cloned().collect()
    }

    /// Number of lines received since the stream was created
    #[must_use]
    pub fn received(&self) -> u64 {
        self.lock().next_seq
    }
}
