//! Gapless playback of model audio.
//!
//! Buffers are placed back to back on the output's clock. A cursor tracks
//! where the next buffer starts; when playback has fallen behind, the next
//! buffer starts immediately instead.

use crate::audio::{self, PLAYBACK_SAMPLE_RATE};
use crate::error::PlaybackError;
use std::collections::BTreeMap;
use std::time::Duration;

/// An audio sink with its own clock, in seconds.
pub trait AudioOutput: Send {
    fn current_time(&self) -> f64;
    fn schedule(
        &mut self,
        id: u64,
        samples: Vec<f32>,
        sample_rate: u32,
        start_at: f64,
    ) -> Result<(), PlaybackError>;
    /// Stops a scheduled or playing buffer. Unknown ids are ignored.
    fn stop(&mut self, id: u64);
    fn close(&mut self);
}

/// Opens one output per connection.
pub trait AudioOutputFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn AudioOutput>, PlaybackError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledUnit {
    pub id: u64,
    pub start: f64,
    pub duration: f64,
}

impl ScheduledUnit {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    sample_rate: u32,
    cursor: f64,
    active: BTreeMap<u64, ScheduledUnit>,
    next_id: u64,
    closed: bool,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self::with_sample_rate(output, PLAYBACK_SAMPLE_RATE)
    }

    pub fn with_sample_rate(output: Box<dyn AudioOutput>, sample_rate: u32) -> Self {
        Self {
            output,
            sample_rate,
            cursor: 0.0,
            active: BTreeMap::new(),
            next_id: 0,
            closed: false,
        }
    }

    /// Decodes a base64 PCM16 chunk and schedules it right after the
    /// previous one, or now if playback has drained.
    pub fn enqueue(&mut self, payload: &str) -> Result<Option<ScheduledUnit>, PlaybackError> {
        if self.closed {
            return Ok(None);
        }
        let samples = audio::decode_pcm16_base64(payload)?;
        if samples.is_empty() {
            return Ok(None);
        }

        let now = self.output.current_time();
        self.prune(now);

        let start = self.cursor.max(now);
        let duration = samples.len() as f64 / self.sample_rate as f64;
        let id = self.next_id;
        self.next_id += 1;

        self.output.schedule(id, samples, self.sample_rate, start)?;
        let unit = ScheduledUnit {
            id,
            start,
            duration,
        };
        self.cursor = unit.end();
        self.active.insert(id, unit);
        Ok(Some(unit))
    }

    /// Stops everything queued or playing and resets the cursor.
    pub fn flush(&mut self) -> usize {
        let stopped = self.active.len();
        for id in std::mem::take(&mut self.active).into_keys() {
            self.output.stop(id);
        }
        self.cursor = 0.0;
        if stopped > 0 {
            tracing::debug!(stopped, "Flushed playback");
        }
        stopped
    }

    /// Time until everything scheduled has played, or `None` once drained.
    pub fn remaining(&mut self) -> Option<Duration> {
        let now = self.output.current_time();
        self.prune(now);
        if self.active.is_empty() {
            return None;
        }
        Some(Duration::from_secs_f64((self.cursor - now).max(0.0)))
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Flushes and closes the output. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.flush();
        self.output.close();
        self.closed = true;
    }

    fn prune(&mut self, now: f64) {
        self.active.retain(|_, unit| unit.end() > now);
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.close();
    }
}
