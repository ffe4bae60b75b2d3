use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use super::{
    stream::{Line, StreamEnd},
    LineStream, Pattern,
};

/// Lifecycle of an expectation
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Resolution {
    Pending,
    Matched,
    TimedOut,
    Cancelled,
}

/// The line that satisfied an expectation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub line: String,
    pub seq: u64,
    /// Time from the call until the line was seen
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpectError {
    /// No matching line within the timeout. `observed` holds every line seen in the window.
    #[error("timed out after {timeout:?} waiting for \"{pattern}\" ({} lines observed)", .observed.len())]
    Timeout { pattern: String, timeout: Duration, observed: Vec<String> },
    /// Another expectation is still waiting on the same stream
    #[error("an expectation is already waiting, cannot also wait for \"{pattern}\"")]
    Concurrent { pattern: String },
    #[error("waiting for \"{pattern}\" was cancelled")]
    Cancelled { pattern: String },
    /// The device stopped delivering output, e.g. because it disappeared
    #[error("transport failed while waiting for \"{pattern}\": {reason}")]
    TransportIo { pattern: String, reason: String },
}

impl ExpectError {
    #[must_use]
    pub fn resolution(&self) -> Option<Resolution> {
        match self {
            ExpectError::Timeout { .. } => Some(Resolution::TimedOut),
            ExpectError::Cancelled { .. } | ExpectError::TransportIo { .. } => {
                Some(Resolution::Cancelled)
            }
            ExpectError::Concurrent { .. } => None,
        }
    }
}

enum Start {
    CallTime,
    Armed,
}

impl LineStream {
    /// Waits for the first line received after this call that matches `pattern`.
    ///
    /// Lines are checked in arrival order, so when several lines match the earliest one wins.
    /// Lines received before the call never match. Only one expectation may wait on a stream at
    /// a time.
    pub fn expect<P: Pattern + ?Sized>(
        &self,
        pattern: &P,
        timeout: Duration,
    ) -> Result<MatchResult, ExpectError> {
        self.wait_for(pattern, timeout, Start::CallTime)
    }

    /// Like [`LineStream::expect`], but starts from the position recorded by the last
    /// [`LineStream::arm`] when there is one, and disarms the stream.
    pub fn expect_armed<P: Pattern + ?Sized>(
        &self,
        pattern: &P,
        timeout: Duration,
    ) -> Result<MatchResult, ExpectError> {
        self.wait_for(pattern, timeout, Start::Armed)
    }

    fn wait_for<P: Pattern + ?Sized>(
        &self,
        pattern: &P,
        timeout: Duration,
        start: Start,
    ) -> Result<MatchResult, ExpectError> {
        let called_at = Instant::now();
        let deadline = called_at.checked_add(timeout);
        let mut state = self.lock();

        if state.pending.is_some() {
            return Err(ExpectError::Concurrent { pattern: pattern.to_string() });
        }

        let mut cursor = match start {
            Start::CallTime => state.next_seq,
            Start::Armed => state.anchor.take().unwrap_or(state.next_seq),
        };
        state.pending = Some(cursor);
        state.cancel_requested = false;
        state.resolution = Resolution::Pending;

        let mut observed = Vec::new();
        let outcome = loop {
            if let Some(line) = scan(&state.lines, &mut cursor, pattern, &mut observed) {
                break Ok(MatchResult {
                    line: line.text.clone(),
                    seq: line.seq,
                    elapsed: called_at.elapsed(),
                });
            }
            state.pending = Some(cursor);

            if state.cancel_requested {
                break Err(ExpectError::Cancelled { pattern: pattern.to_string() });
            }
            match &state.end {
                Some(StreamEnd::Closed) => {
                    break Err(ExpectError::Cancelled { pattern: pattern.to_string() })
                }
                Some(StreamEnd::Failed(reason)) => {
                    break Err(ExpectError::TransportIo {
                        pattern: pattern.to_string(),
                        reason: reason.clone(),
                    })
                }
                None => {}
            }

            let now = Instant::now();
            let remaining = match deadline {
                Some(deadline) if now >= deadline => {
                    break Err(ExpectError::Timeout {
                        pattern: pattern.to_string(),
                        timeout,
                        observed: std::mem::take(&mut observed),
                    })
                }
                Some(deadline) => deadline - now,
                None => Duration::MAX,
            };

            state = self
                .inner
                .changed
                .wait_timeout(state, remaining)
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .0;
        };

        state.pending = None;
        state.cancel_requested = false;
        state.resolution = match &outcome {
            Ok(_) => Resolution::Matched,
            Err(e) => e.resolution().unwrap_or(Resolution::Cancelled),
        };
        state.trim();
        drop(state);

        match &outcome {
            Ok(m) => log::debug!("Matched \"{pattern}\" after {:?}: {}", m.elapsed, m.line),
            Err(e) => log::debug!("{e}"),
        }
        outcome
    }
}

/// Checks every line at or after `cursor`, advancing it past each checked line
fn scan<'a, P: Pattern + ?Sized>(
    lines: &'a VecDeque<Line>,
    cursor: &mut u64,
    pattern: &P,
    observed: &mut Vec<String>,
) -> Option<&'a Line> {
    let start = *cursor;
    for line in lines.iter().skip_while(|line| line.seq < start) {
        *cursor = line.seq + 1;
        if pattern.matches(&line.text) {
            return Some(line);
        }
        observed.push(line.text.clone());
    }
    None
}
