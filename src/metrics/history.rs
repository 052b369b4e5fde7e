//! Bounded newest-first history of samples for one instance.

use crate::core::Sample;
use smallvec::SmallVec;

/// Number of readings kept per instance: enough for one rate computation.
pub const HISTORY_DEPTH: usize = 2;

/// Newest-first history holding at most [`HISTORY_DEPTH`] samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleHistory {
    samples: SmallVec<[Sample; HISTORY_DEPTH]>,
}

impl SampleHistory {
    /// Empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepends a sample, dropping the oldest one past the depth limit.
    pub fn push(&mut self, sample: Sample) {
        self.samples.insert(0, sample);
        self.samples.truncate(HISTORY_DEPTH);
    }

    /// Most recent sample.
    pub fn latest(&self) -> Option<&Sample> {
        self.samples.first()
    }

    /// Reading before the most recent one.
    pub fn previous(&self) -> Option<&Sample> {
        self.samples.get(1)
    }

    /// Number of samples held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample is held.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: i64) -> Sample {
        Sample::new("s", "a", "g", ts)
    }

    #[test]
    fn test_newest_first() {
        let mut history = SampleHistory::new();
        assert!(history.is_empty());
        assert!(history.latest().is_none());

        history.push(sample(1));
        history.push(sample(2));

        assert_eq!(history.latest().unwrap().timestamp, 2);
        assert_eq!(history.previous().unwrap().timestamp, 1);
    }

    #[test]
    fn test_depth_is_bounded() {
        let mut history = SampleHistory::new();
        for ts in 0..10 {
            history.push(sample(ts));
            assert!(history.len() <= HISTORY_DEPTH);
        }

        let timestamps: Vec<i64> = history.iter().map(|s| s.timestamp).collect();
        assert_eq!(timestamps, vec![9, 8]);
    }
}
