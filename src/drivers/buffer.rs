use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Local};

use crate::drivers::BufferError;
use crate::types::{Channel, Sample, SampleSet};

/// How much history the buffer keeps.
#[derive(PartialEq, Clone, Copy, Debug, Default)]
pub enum Retention {
    /// Grow for the whole session.
    #[default]
    Unbounded,
    /// Keep only the newest `n` sample sets.
    Latest(usize),
}

impl Retention {
    pub fn from_capacity(capacity: usize) -> Self {
        if capacity == 0 {
            Retention::Unbounded
        } else {
            Retention::Latest(capacity)
        }
    }
}

/// Point-in-time copy of the buffer, index-aligned across channels.
#[derive(Clone, Debug)]
pub struct SeriesSnapshot {
    pub channels: Vec<Channel>,
    pub timestamps: Vec<DateTime<Local>>,
    pub samples: Vec<Vec<Sample>>, // channel -> samples
}

impl SeriesSnapshot {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Plot points for one channel: seconds since the first sample, missing values skipped.
    pub fn points(&self, channel_idx: usize) -> Vec<[f64; 2]> {
        let Some(origin) = self.timestamps.first() else {
            return Vec::new();
        };
        let Some(series) = self.samples.get(channel_idx) else {
            return Vec::new();
        };
        self.timestamps
            .iter()
            .zip(series)
            .filter_map(|(t, s)| {
                let secs = (*t - *origin).num_milliseconds() as f64 / 1000.0;
                s.value().map(|v| [secs, v])
            })
            .collect()
    }
}

/// Per-channel sample history. Every channel queue has the same length.
pub struct SeriesBuffer {
    channels: Vec<Channel>,
    timestamps: VecDeque<DateTime<Local>>,
    per_channel: Vec<VecDeque<Sample>>,
    retention: Retention,
}

impl SeriesBuffer {
    pub fn new(channels: Vec<Channel>, retention: Retention) -> Self {
        let capacity = match retention {
            Retention::Unbounded => 0,
            Retention::Latest(n) => n,
        };
        let per_channel = channels
            .iter()
            .map(|_| VecDeque::with_capacity(capacity))
            .collect();
        Self {
            channels,
            timestamps: VecDeque::with_capacity(capacity),
            per_channel,
            retention,
        }
    }

    pub fn append(&mut self, set: &SampleSet) -> Result<(), BufferError> {
        if set.len() != self.per_channel.len() {
            return Err(BufferError::ChannelMismatch {
                expected: self.per_channel.len(),
                actual: set.len(),
            });
        }
        if let Retention::Latest(n) = self.retention {
            if self.timestamps.len() == n {
                self.timestamps.pop_front();
                for queue in &mut self.per_channel {
                    queue.pop_front();
                }
            }
        }
        self.timestamps.push_back(set.captured_at);
        for (queue, sample) in self.per_channel.iter_mut().zip(&set.samples) {
            queue.push_back(*sample);
        }
        Ok(())
    }

    pub fn snapshot(&self) -> SeriesSnapshot {
        SeriesSnapshot {
            channels: self.channels.clone(),
            timestamps: self.timestamps.iter().copied().collect(),
            samples: self
                .per_channel
                .iter()
                .map(|queue| queue.iter().copied().collect())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn reset(&mut self) {
        self.timestamps.clear();
        for queue in &mut self.per_channel {
            queue.clear();
        }
    }
}

/// Cloneable handle shared by the acquisition thread (writer) and render thread (reader).
#[derive(Clone)]
pub struct SharedSeriesBuffer {
    inner: Arc<Mutex<SeriesBuffer>>,
}

impl SharedSeriesBuffer {
    pub fn new(channels: Vec<Channel>, retention: Retention) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SeriesBuffer::new(channels, retention))),
        }
    }

    // Append is all-or-nothing, so a poisoned lock still guards aligned data.
    fn lock(&self) -> MutexGuard<'_, SeriesBuffer> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, set: &SampleSet) -> Result<(), BufferError> {
        self.lock().append(set)
    }

    pub fn snapshot(&self) -> SeriesSnapshot {
        self.lock().snapshot()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn reset(&self) {
        self.lock().reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn set_at(base: DateTime<Local>, i: i64, values: &[f64]) -> SampleSet {
        SampleSet::new(
            base + Duration::seconds(i),
            values.iter().map(|v| Sample::Millivolts(*v)).collect(),
        )
    }

    #[test]
    fn snapshot_is_index_aligned_in_append_order() {
        let buffer = SharedSeriesBuffer::new(vec![Channel::A, Channel::B, Channel::C], Retention::Unbounded);
        let base = Local::now();
        for i in 0..5 {
            let v = i as f64;
            buffer.append(&set_at(base, i, &[v, v + 10.0, v + 20.0])).unwrap();
        }
        let snap = buffer.snapshot();
        assert_eq!(snap.len(), 5);
        assert_eq!(snap.samples.len(), 3);
        for (c, series) in snap.samples.iter().enumerate() {
            assert_eq!(series.len(), 5);
            for (i, s) in series.iter().enumerate() {
                assert_eq!(s.value(), Some(i as f64 + 10.0 * c as f64));
            }
        }
    }

    #[test]
    fn wrong_width_is_rejected_without_partial_append() {
        let buffer = SharedSeriesBuffer::new(vec![Channel::A, Channel::B], Retention::Unbounded);
        let err = buffer
            .append(&set_at(Local::now(), 0, &[1.0, 2.0, 3.0]))
            .unwrap_err();
        assert!(matches!(
            err,
            BufferError::ChannelMismatch { expected: 2, actual: 3 }
        ));
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn ring_retention_keeps_newest() {
        let buffer = SharedSeriesBuffer::new(vec![Channel::A], Retention::Latest(3));
        let base = Local::now();
        for i in 0..5 {
            buffer.append(&set_at(base, i, &[i as f64])).unwrap();
        }
        let snap = buffer.snapshot();
        let values: Vec<f64> = snap.samples[0].iter().filter_map(|s| s.value()).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
        assert_eq!(snap.timestamps.len(), 3);
    }

    #[test]
    fn reset_clears_every_channel() {
        let buffer = SharedSeriesBuffer::new(vec![Channel::A, Channel::B], Retention::Unbounded);
        buffer.append(&set_at(Local::now(), 0, &[1.0, 2.0])).unwrap();
        buffer.reset();
        let snap = buffer.snapshot();
        assert!(snap.is_empty());
        assert!(snap.samples.iter().all(|s| s.is_empty()));
    }

    #[test]
    fn points_skip_missing_values() {
        let base = Local::now();
        let buffer = SharedSeriesBuffer::new(vec![Channel::A], Retention::Unbounded);
        buffer.append(&set_at(base, 0, &[1.0])).unwrap();
        buffer
            .append(&SampleSet::new(base + Duration::seconds(1), vec![Sample::Missing]))
            .unwrap();
        buffer.append(&set_at(base, 2, &[3.0])).unwrap();
        let points = buffer.snapshot().points(0);
        assert_eq!(points, vec![[0.0, 1.0], [2.0, 3.0]]);
    }
}
