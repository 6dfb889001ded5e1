use serde::{Deserialize, Serialize};

/// Default target relative rank error for numeric column summaries.
pub const DEFAULT_RELATIVE_ERROR: f64 = 0.001;

const BUFFER_CAPACITY: usize = 4096;

/// One Greenwald-Khanna tuple: a sampled value, the gap `g` to the previous
/// tuple's minimum rank, and the rank uncertainty `delta`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct SampleStats {
    value: f64,
    g: u64,
    delta: u64,
}

/// Mergeable approximate quantile summary over a stream of `f64` values.
///
/// Inserts are buffered and folded into the sampled sequence in sorted batches;
/// compression keeps the sample count proportional to `1 / relative_error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileSummary {
    relative_error: f64,
    sampled: Vec<SampleStats>,
    buffer: Vec<f64>,
    count: u64,
}

impl QuantileSummary {
    pub fn new(relative_error: f64) -> Self {
        assert!(relative_error > 0.0);
        QuantileSummary {
            relative_error,
            sampled: Vec::new(),
            buffer: Vec::new(),
            count: 0,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn insert(&mut self, value: f64) {
        self.buffer.push(value);
        if self.buffer.len() >= BUFFER_CAPACITY {
            self.flush_buffer();
            self.compress();
        }
    }

    /// Folds buffered values into the sampled sequence, keeping it sorted.
    fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let mut incoming = std::mem::take(&mut self.buffer);
        incoming.sort_by(|a, b| a.total_cmp(b));

        let old = std::mem::take(&mut self.sampled);
        let mut merged = Vec::with_capacity(old.len() + incoming.len());
        let mut old_idx = 0;
        for (new_idx, &value) in incoming.iter().enumerate() {
            while old_idx < old.len() && old[old_idx].value <= value {
                merged.push(old[old_idx]);
                old_idx += 1;
            }
            self.count += 1;
            // Extremes carry no rank uncertainty.
            let delta = if merged.is_empty() || (old_idx == old.len() && new_idx == incoming.len() - 1)
            {
                0
            } else {
                (2.0 * self.relative_error * self.count as f64).floor() as u64
            };
            merged.push(SampleStats { value, g: 1, delta });
        }
        merged.extend_from_slice(&old[old_idx..]);
        self.sampled = merged;
    }

    /// Merges adjacent tuples whose combined rank uncertainty stays within the
    /// error bound.
    pub fn compress(&mut self) {
        self.flush_buffer();
        if self.sampled.len() <= 2 {
            return;
        }
        let threshold = (2.0 * self.relative_error * self.count as f64).floor() as u64;
        let mut reversed: Vec<SampleStats> = Vec::with_capacity(self.sampled.len());
        let mut head = self.sampled[self.sampled.len() - 1];
        for &sample in self.sampled[1..self.sampled.len() - 1].iter().rev() {
            if sample.g + head.g + head.delta < threshold {
                head.g += sample.g;
            } else {
                reversed.push(head);
                head = sample;
            }
        }
        reversed.push(head);
        // The minimum sample stays exact.
        reversed.push(self.sampled[0]);
        reversed.reverse();
        self.sampled = reversed;
    }

    /// Merges another summary into this one. Both operands are compressed
    /// first; the merged sequence is compressed again under the combined count.
    pub fn merge(&mut self, mut other: QuantileSummary) {
        self.compress();
        other.compress();
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other;
            return;
        }
        let left = std::mem::take(&mut self.sampled);
        let mut merged = Vec::with_capacity(left.len() + other.sampled.len());
        let (mut i, mut j) = (0, 0);
        while i < left.len() && j < other.sampled.len() {
            if left[i].value <= other.sampled[j].value {
                merged.push(left[i]);
                i += 1;
            } else {
                merged.push(other.sampled[j]);
                j += 1;
            }
        }
        merged.extend_from_slice(&left[i..]);
        merged.extend_from_slice(&other.sampled[j..]);
        self.sampled = merged;
        self.count += other.count;
        self.compress();
    }

    /// Approximate value at quantile `q` in `[0, 1]`. `None` on an empty
    /// summary. Call `compress` first when querying a summary that still has
    /// buffered inserts.
    pub fn query(&self, q: f64) -> Option<f64> {
        assert!((0.0..=1.0).contains(&q));
        if self.count == 0 || self.sampled.is_empty() {
            return None;
        }
        let rank = (q * self.count as f64).ceil() as u64;
        if rank <= 1 {
            return Some(self.sampled[0].value);
        }
        if rank >= self.count {
            return Some(self.sampled[self.sampled.len() - 1].value);
        }
        let target_error = self.relative_error * self.count as f64;
        let mut min_rank = 0u64;
        for sample in &self.sampled {
            min_rank += sample.g;
            let max_rank = min_rank + sample.delta;
            if max_rank as f64 - target_error <= rank as f64
                && rank as f64 <= min_rank as f64 + target_error
            {
                return Some(sample.value);
            }
        }
        Some(self.sampled[self.sampled.len() - 1].value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary_of(values: impl IntoIterator<Item = f64>) -> QuantileSummary {
        let mut s = QuantileSummary::new(DEFAULT_RELATIVE_ERROR);
        for v in values {
            s.insert(v);
        }
        s.compress();
        s
    }

    #[test]
    fn test_empty_query() {
        let s = QuantileSummary::new(DEFAULT_RELATIVE_ERROR);
        assert_eq!(s.query(0.5), None);
    }

    #[test]
    fn test_small_exact() {
        let s = summary_of((1..=8).map(f64::from));
        assert_eq!(s.count(), 8);
        assert_eq!(s.query(0.0), Some(1.0));
        assert_eq!(s.query(1.0), Some(8.0));
        assert_eq!(s.query(0.5), Some(4.0));
    }

    #[test]
    fn test_median_of_large_stream() {
        let s = summary_of((1..=10_000).map(f64::from));
        let median = s.query(0.5).unwrap();
        // Relative rank error 0.001 over 10k values allows roughly +-2*eps*n
        // ranks around the true median.
        assert!((median - 5000.0).abs() <= 30.0, "median was {median}");
    }

    #[test]
    fn test_merge_matches_single_summary() {
        let mut left = summary_of((1..=5000).map(f64::from));
        let right = summary_of((5001..=10_000).map(f64::from));
        left.merge(right);
        assert_eq!(left.count(), 10_000);
        let q25 = left.query(0.25).unwrap();
        assert!((q25 - 2500.0).abs() <= 60.0, "q25 was {q25}");
    }

    #[test]
    fn test_merge_into_empty() {
        let mut empty = QuantileSummary::new(DEFAULT_RELATIVE_ERROR);
        empty.merge(summary_of([2.0, 1.0, 3.0]));
        assert_eq!(empty.count(), 3);
        assert_eq!(empty.query(1.0), Some(3.0));
    }
}
