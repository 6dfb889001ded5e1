use fnv::FnvHashMap;

use crate::discretizer::ColDiscretizer;
use crate::errors::{HistBoostError, Result};
use crate::quantile::{QuantileSummary, DEFAULT_RELATIVE_ERROR};
use crate::BinId;

/// Per-column summarizer over the non-missing values of one feature.
/// Finalizes into the matching `ColDiscretizer` variant.
#[derive(Debug, Clone)]
pub enum ColAgg {
    QuantileNum(QuantileNumAgg),
    IntervalNum(IntervalNumAgg),
    Cat(CatAgg),
    Rank(RankAgg),
}

impl ColAgg {
    pub fn update(&mut self, value: f64) -> Result<()> {
        match self {
            ColAgg::QuantileNum(agg) => {
                agg.update(value);
                Ok(())
            }
            ColAgg::IntervalNum(agg) => {
                agg.update(value);
                Ok(())
            }
            ColAgg::Cat(agg) => agg.update(value),
            ColAgg::Rank(agg) => agg.update(value),
        }
    }

    pub fn merge(&mut self, other: ColAgg) -> Result<()> {
        match (self, other) {
            (ColAgg::QuantileNum(a), ColAgg::QuantileNum(b)) => {
                a.merge(b);
                Ok(())
            }
            (ColAgg::IntervalNum(a), ColAgg::IntervalNum(b)) => {
                a.merge(b);
                Ok(())
            }
            (ColAgg::Cat(a), ColAgg::Cat(b)) => a.merge(b),
            (ColAgg::Rank(a), ColAgg::Rank(b)) => a.merge(b),
            _ => unreachable!("aggregator columns are aligned by construction"),
        }
    }

    pub fn to_discretizer(self) -> ColDiscretizer {
        match self {
            ColAgg::QuantileNum(agg) => agg.to_discretizer(),
            ColAgg::IntervalNum(agg) => agg.to_discretizer(),
            ColAgg::Cat(agg) => agg.to_discretizer(),
            ColAgg::Rank(agg) => agg.to_discretizer(),
        }
    }
}

/// Equal-frequency (depth) binning over an approximate quantile summary.
#[derive(Debug, Clone)]
pub struct QuantileNumAgg {
    max_bins: usize,
    summary: QuantileSummary,
}

impl QuantileNumAgg {
    pub fn new(max_bins: usize) -> Self {
        assert!(max_bins >= 2);
        QuantileNumAgg {
            max_bins,
            summary: QuantileSummary::new(DEFAULT_RELATIVE_ERROR),
        }
    }

    pub fn update(&mut self, value: f64) {
        self.summary.insert(value);
    }

    pub fn merge(&mut self, other: QuantileNumAgg) {
        self.summary.merge(other.summary);
    }

    pub fn to_discretizer(mut self) -> ColDiscretizer {
        self.summary.compress();
        if self.summary.count() == 0 {
            return ColDiscretizer::Quantile { splits: Vec::new() };
        }
        let mut splits: Vec<f64> = (0..self.max_bins - 1)
            .filter_map(|i| self.summary.query((i as f64 + 0.5) / self.max_bins as f64))
            .collect();
        splits.sort_by(|a, b| a.total_cmp(b));
        splits.dedup();
        ColDiscretizer::Quantile { splits }
    }
}

/// Equal-width binning from a running min/max.
#[derive(Debug, Clone)]
pub struct IntervalNumAgg {
    max_bins: usize,
    min: f64,
    max: f64,
}

impl IntervalNumAgg {
    pub fn new(max_bins: usize) -> Self {
        assert!(max_bins >= 2);
        // An all-missing column never updates these, and `max > min` below
        // then fails into the degenerate single-bin discretizer.
        IntervalNumAgg {
            max_bins,
            min: f64::MAX,
            max: f64::MIN,
        }
    }

    pub fn update(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn merge(&mut self, other: IntervalNumAgg) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn to_discretizer(self) -> ColDiscretizer {
        if self.max > self.min {
            let step = (self.max - self.min) / (self.max_bins - 1) as f64;
            ColDiscretizer::Interval {
                start: self.min + step / 2.0,
                step,
                num_bins: self.max_bins,
            }
        } else {
            ColDiscretizer::Interval {
                start: 0.0,
                step: 0.0,
                num_bins: 1,
            }
        }
    }
}

/// Counts integer category values; bins are assigned by descending frequency,
/// ties broken by first appearance.
#[derive(Debug, Clone)]
pub struct CatAgg {
    column: usize,
    max_bins: usize,
    counts: FnvHashMap<i32, u64>,
    order: Vec<i32>,
}

impl CatAgg {
    pub fn new(column: usize, max_bins: usize) -> Self {
        assert!(max_bins >= 2);
        CatAgg {
            column,
            max_bins,
            counts: FnvHashMap::default(),
            order: Vec::new(),
        }
    }

    fn add(&mut self, value: i32, count: u64) -> Result<()> {
        if let Some(existing) = self.counts.get_mut(&value) {
            *existing += count;
            return Ok(());
        }
        if self.counts.len() >= self.max_bins {
            return Err(HistBoostError::CardinalityOverflow {
                column: self.column,
                max_bins: self.max_bins,
            });
        }
        self.counts.insert(value, count);
        self.order.push(value);
        Ok(())
    }

    pub fn update(&mut self, value: f64) -> Result<()> {
        self.add(value as i32, 1)
    }

    pub fn merge(&mut self, other: CatAgg) -> Result<()> {
        for value in other.order {
            self.add(value, other.counts[&value])?;
        }
        Ok(())
    }

    pub fn to_discretizer(self) -> ColDiscretizer {
        let mut ranked: Vec<i32> = self.order;
        // Stable sort keeps first-appearance order among equal counts.
        ranked.sort_by_key(|v| std::cmp::Reverse(self.counts[v]));
        let map: FnvHashMap<i32, BinId> = ranked
            .into_iter()
            .enumerate()
            .map(|(rank, value)| (value, (rank + 1) as BinId))
            .collect();
        ColDiscretizer::Categorical { map }
    }
}

/// Collects the distinct integer values of a ranking feature.
#[derive(Debug, Clone)]
pub struct RankAgg {
    column: usize,
    max_bins: usize,
    values: std::collections::BTreeSet<i32>,
}

impl RankAgg {
    pub fn new(column: usize, max_bins: usize) -> Self {
        assert!(max_bins >= 2);
        RankAgg {
            column,
            max_bins,
            values: std::collections::BTreeSet::new(),
        }
    }

    fn add(&mut self, value: i32) -> Result<()> {
        if self.values.contains(&value) {
            return Ok(());
        }
        if self.values.len() >= self.max_bins {
            return Err(HistBoostError::CardinalityOverflow {
                column: self.column,
                max_bins: self.max_bins,
            });
        }
        self.values.insert(value);
        Ok(())
    }

    pub fn update(&mut self, value: f64) -> Result<()> {
        self.add(value as i32)
    }

    pub fn merge(&mut self, other: RankAgg) -> Result<()> {
        for value in other.values {
            self.add(value)?;
        }
        Ok(())
    }

    pub fn to_discretizer(self) -> ColDiscretizer {
        ColDiscretizer::Rank {
            array: self.values.into_iter().collect(),
        }
    }
}
