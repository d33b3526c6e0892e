// Buffer Estimator: remaining playable seconds of downloaded media.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

/// Answer to the periodic "buffer duration" query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BufferDuration {
    /// Estimated playable seconds still buffered, never negative.
    pub seconds: f64,
    pub timestamp: DateTime<Utc>,
}

/// Tracks downloaded segment durations against simulated playback.
pub trait BufferEstimator: Send {
    /// Account for `seconds` of newly available media.
    fn push(&mut self, seconds: f64);

    fn remaining(&self) -> f64;

    fn reset(&mut self);

    fn snapshot(&self) -> BufferDuration {
        BufferDuration {
            seconds: self.remaining(),
            timestamp: Utc::now(),
        }
    }
}

/// Playback starts with the first push and consumes media in real time.
/// It pauses whenever the buffer runs dry and resumes with the next push.
#[derive(Debug, Default)]
pub struct PlaybackEstimator {
    total: f64,
    started: Option<Instant>,
}

impl PlaybackEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_at(&mut self, seconds: f64, now: Instant) {
        let seconds = seconds.max(0.0);
        // Playback stalls while the buffer is empty, so an underrun restarts
        // the clock instead of carrying the stall forward.
        if self.started.is_none() || self.remaining_at(now) <= 0.0 {
            self.started = Some(now);
            self.total = seconds;
        } else {
            self.total += seconds;
        }
    }

    fn remaining_at(&self, now: Instant) -> f64 {
        match self.started {
            None => 0.0,
            Some(started) => {
                let played = now.saturating_duration_since(started).as_secs_f64();
                (self.total - played).max(0.0)
            }
        }
    }
}

impl BufferEstimator for PlaybackEstimator {
    fn push(&mut self, seconds: f64) {
        self.push_at(seconds, Instant::now());
    }

    fn remaining(&self) -> f64 {
        self.remaining_at(Instant::now())
    }

    fn reset(&mut self) {
        self.total = 0.0;
        self.started = None;
    }
}
