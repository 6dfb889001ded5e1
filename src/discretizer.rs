use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

use crate::aggregator::{CatAgg, ColAgg, IntervalNumAgg, QuantileNumAgg, RankAgg};
use crate::config::NumericalBinType;
use crate::data::is_missing;
use crate::errors::{HistBoostError, Result};
use crate::pds::Pds;
use crate::BinId;

/// Maps one column's raw values to bin ids starting at 1. Bin 0 is reserved
/// and only ever produced by the dataset-level wrapper for missing values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColDiscretizer {
    Quantile {
        splits: Vec<f64>,
    },
    Interval {
        start: f64,
        step: f64,
        num_bins: usize,
    },
    Categorical {
        map: FnvHashMap<i32, BinId>,
    },
    Rank {
        array: Vec<i32>,
    },
}

impl ColDiscretizer {
    /// Bin for a non-missing value. `column` only feeds error context.
    pub fn transform(&self, column: usize, value: f64) -> Result<BinId> {
        match self {
            ColDiscretizer::Quantile { splits } => {
                Ok(1 + splits.partition_point(|s| *s < value) as BinId)
            }
            ColDiscretizer::Interval {
                start,
                step,
                num_bins,
            } => {
                if *step == 0.0 {
                    return Ok(1);
                }
                let raw = ((value - start) / step).floor() + 2.0;
                Ok(raw.clamp(1.0, *num_bins as f64) as BinId)
            }
            ColDiscretizer::Categorical { map } => {
                // A column that saw no values degenerates to a single bin.
                if map.is_empty() {
                    return Ok(1);
                }
                let key = value as i32;
                map.get(&key)
                    .copied()
                    .ok_or(HistBoostError::UnknownCategory { column, value: key })
            }
            ColDiscretizer::Rank { array } => {
                if array.is_empty() {
                    return Ok(1);
                }
                let key = value as i32;
                match array.binary_search(&key) {
                    Ok(idx) => Ok(1 + idx as BinId),
                    Err(_) => Err(HistBoostError::UnknownCategory { column, value: key }),
                }
            }
        }
    }

    /// Number of bins this column can produce, missing excluded. Always >= 1.
    pub fn num_bins(&self) -> usize {
        match self {
            ColDiscretizer::Quantile { splits } => splits.len() + 1,
            ColDiscretizer::Interval { num_bins, .. } => *num_bins,
            ColDiscretizer::Categorical { map } => map.len().max(1),
            ColDiscretizer::Rank { array } => array.len().max(1),
        }
    }
}

/// One row of the persisted layout, one per column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscretizerRow {
    pub feature_index: i32,
    pub kind: String,
    pub doubles: Vec<f64>,
    pub ints: Vec<i32>,
}

/// Ordered per-column discretizers for a whole dataset. Immutable once fitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discretizer {
    cols: Vec<ColDiscretizer>,
}

impl Discretizer {
    pub fn new(cols: Vec<ColDiscretizer>) -> Self {
        Discretizer { cols }
    }

    /// Fits one aggregator per column over the non-missing cells of `data`,
    /// folding partitions with a tree aggregation of the given combine depth,
    /// then finalizes every aggregator into its discretizer.
    pub fn fit(
        data: &Pds<Vec<f64>>,
        num_cols: usize,
        cat_cols: &[usize],
        rank_cols: &[usize],
        max_bins: usize,
        numerical_bin_type: NumericalBinType,
        depth: usize,
    ) -> Result<Discretizer> {
        if max_bins < 4 {
            return Err(HistBoostError::invalid_parameter(
                "max_bins",
                "must be >= 4 to fit a dataset",
            ));
        }
        if cat_cols.iter().any(|c| rank_cols.contains(c)) {
            return Err(HistBoostError::invalid_parameter(
                "cat_cols",
                "categorical and ranking column sets overlap",
            ));
        }

        let zero: Result<Vec<ColAgg>> = Ok((0..num_cols)
            .map(|col| {
                if cat_cols.contains(&col) {
                    ColAgg::Cat(CatAgg::new(col, max_bins))
                } else if rank_cols.contains(&col) {
                    ColAgg::Rank(RankAgg::new(col, max_bins))
                } else {
                    match numerical_bin_type {
                        NumericalBinType::Depth => {
                            ColAgg::QuantileNum(QuantileNumAgg::new(max_bins))
                        }
                        NumericalBinType::Width => {
                            ColAgg::IntervalNum(IntervalNumAgg::new(max_bins))
                        }
                    }
                }
            })
            .collect());

        let aggs = data.tree_aggregate(
            zero,
            |acc: Result<Vec<ColAgg>>, row: &Vec<f64>| {
                let mut aggs = acc?;
                assert_eq!(row.len(), aggs.len(), "row width mismatch");
                for (col, &value) in row.iter().enumerate() {
                    if !is_missing(value) {
                        aggs[col].update(value)?;
                    }
                }
                Ok(aggs)
            },
            |left, right| {
                let mut left = left?;
                for (agg, other) in left.iter_mut().zip(right?) {
                    agg.merge(other)?;
                }
                Ok(left)
            },
            depth,
        )?;

        Ok(Discretizer {
            cols: aggs.into_iter().map(ColAgg::to_discretizer).collect(),
        })
    }

    pub fn num_cols(&self) -> usize {
        self.cols.len()
    }

    pub fn col(&self, column: usize) -> &ColDiscretizer {
        &self.cols[column]
    }

    /// Bin for a single cell; missing values map to bin 0.
    pub fn transform_column(&self, column: usize, value: f64) -> Result<BinId> {
        if is_missing(value) {
            return Ok(0);
        }
        self.cols[column].transform(column, value)
    }

    pub fn transform(&self, row: &[f64]) -> Result<Vec<BinId>> {
        assert_eq!(row.len(), self.cols.len(), "row width mismatch");
        row.iter()
            .enumerate()
            .map(|(col, &value)| self.transform_column(col, value))
            .collect()
    }

    /// Per-column bin counts including the reserved missing bin.
    pub fn num_bins(&self) -> Vec<usize> {
        self.cols.iter().map(|c| c.num_bins() + 1).collect()
    }

    pub fn to_rows(&self) -> Vec<DiscretizerRow> {
        self.cols
            .iter()
            .enumerate()
            .map(|(col, disc)| {
                let feature_index = col as i32;
                match disc {
                    ColDiscretizer::Quantile { splits } => DiscretizerRow {
                        feature_index,
                        kind: "quantile".to_string(),
                        doubles: splits.clone(),
                        ints: Vec::new(),
                    },
                    ColDiscretizer::Interval {
                        start,
                        step,
                        num_bins,
                    } => DiscretizerRow {
                        feature_index,
                        kind: "interval".to_string(),
                        doubles: vec![*start, *step],
                        ints: vec![*num_bins as i32],
                    },
                    ColDiscretizer::Categorical { map } => {
                        let mut by_bin: Vec<(BinId, i32)> =
                            map.iter().map(|(value, bin)| (*bin, *value)).collect();
                        by_bin.sort_unstable();
                        DiscretizerRow {
                            feature_index,
                            kind: "cat".to_string(),
                            doubles: Vec::new(),
                            ints: by_bin.into_iter().map(|(_, value)| value).collect(),
                        }
                    }
                    ColDiscretizer::Rank { array } => DiscretizerRow {
                        feature_index,
                        kind: "rank".to_string(),
                        doubles: Vec::new(),
                        ints: array.clone(),
                    },
                }
            })
            .collect()
    }

    pub fn from_rows(mut rows: Vec<DiscretizerRow>) -> Result<Discretizer> {
        rows.sort_by_key(|r| r.feature_index);
        for (expected, row) in rows.iter().enumerate() {
            if row.feature_index != expected as i32 {
                return Err(HistBoostError::InvalidDiscretizer(format!(
                    "feature indices must form a contiguous range, found {} at position {}",
                    row.feature_index, expected
                )));
            }
        }
        let cols = rows
            .into_iter()
            .map(|row| match row.kind.as_str() {
                "quantile" => Ok(ColDiscretizer::Quantile { splits: row.doubles }),
                "interval" => {
                    if row.doubles.len() != 2 || row.ints.len() != 1 {
                        return Err(HistBoostError::InvalidDiscretizer(format!(
                            "malformed interval row for feature {}",
                            row.feature_index
                        )));
                    }
                    Ok(ColDiscretizer::Interval {
                        start: row.doubles[0],
                        step: row.doubles[1],
                        num_bins: row.ints[0] as usize,
                    })
                }
                "cat" => Ok(ColDiscretizer::Categorical {
                    map: row
                        .ints
                        .iter()
                        .enumerate()
                        .map(|(rank, value)| (*value, (rank + 1) as BinId))
                        .collect(),
                }),
                "rank" => Ok(ColDiscretizer::Rank { array: row.ints }),
                other => Err(HistBoostError::InvalidDiscretizer(format!(
                    "unknown discretizer type {other:?}"
                ))),
            })
            .collect::<Result<Vec<ColDiscretizer>>>()?;
        Ok(Discretizer { cols })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_rows())?)
    }

    pub fn from_json(json: &str) -> Result<Discretizer> {
        Discretizer::from_rows(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval_0_to_10() -> ColDiscretizer {
        // min=0, max=10, max_bins=11: step=1, start=0.5.
        ColDiscretizer::Interval {
            start: 0.5,
            step: 1.0,
            num_bins: 11,
        }
    }

    #[test]
    fn test_interval_transform_endpoints_and_clamping() {
        let disc = interval_0_to_10();
        assert_eq!(disc.transform(0, 0.4).unwrap(), 1);
        assert_eq!(disc.transform(0, 0.6).unwrap(), 2);
        assert_eq!(disc.transform(0, 10.0).unwrap(), 11);
        assert_eq!(disc.transform(0, 0.0).unwrap(), 1);
        assert_eq!(disc.transform(0, -5.0).unwrap(), 1);
        assert_eq!(disc.transform(0, 100.0).unwrap(), 11);
    }

    #[test]
    fn test_quantile_transform_monotonic() {
        let disc = ColDiscretizer::Quantile {
            splits: vec![1.0, 3.0, 5.0],
        };
        let mut last = 0;
        for v in [-10.0, 0.5, 1.0, 1.5, 3.0, 4.0, 5.0, 5.5, 99.0] {
            let bin = disc.transform(0, v).unwrap();
            assert!(bin >= last, "transform not monotonic at {v}");
            assert!((1..=4).contains(&bin));
            last = bin;
        }
        assert_eq!(disc.transform(0, -10.0).unwrap(), 1);
        assert_eq!(disc.transform(0, 99.0).unwrap(), 4);
    }

    #[test]
    fn test_unknown_category_fails() {
        let disc = ColDiscretizer::Categorical {
            map: [(5, 1), (9, 2)].into_iter().collect(),
        };
        assert_eq!(disc.transform(3, 9.0).unwrap(), 2);
        match disc.transform(3, 7.0).unwrap_err() {
            HistBoostError::UnknownCategory { column: 3, value: 7 } => {}
            other => panic!("unexpected error: {other}"),
        }
    }

    fn fit_mixed() -> Discretizer {
        // col 0 numeric, col 1 categorical, col 2 rank; NaN cells are skipped.
        let rows = vec![
            vec![1.0, 2.0, 100.0],
            vec![2.0, 2.0, 300.0],
            vec![f64::NAN, 1.0, 200.0],
            vec![4.0, 2.0, 100.0],
            vec![8.0, 3.0, f64::INFINITY],
        ];
        Discretizer::fit(
            &Pds::from_vec(rows, 2),
            3,
            &[1],
            &[2],
            4,
            NumericalBinType::Width,
            2,
        )
        .unwrap()
    }

    #[test]
    fn test_fit_and_transform_with_missing() {
        let d = fit_mixed();
        assert_eq!(d.num_cols(), 3);
        // Width binning on col 0 over [1, 8]: four bins plus the missing slot.
        assert_eq!(d.num_bins(), vec![5, 4, 4]);

        let bins = d.transform(&[f64::NAN, 2.0, 300.0]).unwrap();
        assert_eq!(bins[0], 0);
        assert_eq!(bins[1], 1); // most frequent category
        assert_eq!(bins[2], 3); // third in ascending rank order

        for v in [1.0, 3.0, 8.0] {
            let bin = d.transform_column(0, v).unwrap();
            assert!((1..=4).contains(&bin));
        }
        assert_eq!(d.transform_column(0, f64::NEG_INFINITY).unwrap(), 0);
    }

    #[test]
    fn test_fit_rejects_small_max_bins() {
        let data = Pds::from_vec(vec![vec![1.0]], 1);
        let err =
            Discretizer::fit(&data, 1, &[], &[], 3, NumericalBinType::Depth, 2).unwrap_err();
        match err {
            HistBoostError::InvalidParameter { parameter, .. } => assert_eq!(parameter, "max_bins"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_fit_propagates_cardinality_overflow() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let err = Discretizer::fit(
            &Pds::from_vec(rows, 3),
            1,
            &[0],
            &[],
            4,
            NumericalBinType::Depth,
            2,
        )
        .unwrap_err();
        match err {
            HistBoostError::CardinalityOverflow { column: 0, max_bins: 4 } => {}
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_all_missing_column_is_degenerate() {
        // Columns 0 (numeric), 2 (categorical) and 3 (rank) never see a
        // non-missing value.
        let rows = vec![
            vec![f64::NAN, 1.0, f64::NAN, f64::INFINITY],
            vec![f64::INFINITY, 2.0, f64::NEG_INFINITY, f64::NAN],
        ];
        let d = Discretizer::fit(
            &Pds::from_vec(rows, 1),
            4,
            &[2],
            &[3],
            4,
            NumericalBinType::Width,
            2,
        )
        .unwrap();
        // Every non-missing value lands in bin 1; missing stays bin 0.
        for col in [0, 2, 3] {
            assert_eq!(d.col(col).num_bins(), 1);
            assert_eq!(d.transform_column(col, 42.0).unwrap(), 1);
            assert_eq!(d.transform_column(col, -42.0).unwrap(), 1);
            assert_eq!(d.transform_column(col, f64::NAN).unwrap(), 0);
        }
        assert_eq!(d.num_bins(), vec![2, 5, 2, 2]);
    }

    #[test]
    fn test_rows_roundtrip_every_variant() {
        let original = Discretizer::new(vec![
            ColDiscretizer::Quantile {
                splits: vec![0.5, 1.5, 7.25],
            },
            ColDiscretizer::Interval {
                start: 0.5,
                step: 1.0,
                num_bins: 11,
            },
            ColDiscretizer::Categorical {
                map: [(4, 1), (7, 2), (2, 3)].into_iter().collect(),
            },
            ColDiscretizer::Rank {
                array: vec![10, 20, 30],
            },
        ]);
        let restored = Discretizer::from_rows(original.to_rows()).unwrap();
        assert_eq!(original, restored);

        let json = original.to_json().unwrap();
        assert_eq!(Discretizer::from_json(&json).unwrap(), original);
    }

    #[test]
    fn test_from_rows_rejects_gaps_and_duplicates() {
        let quantile = |idx: i32| DiscretizerRow {
            feature_index: idx,
            kind: "quantile".to_string(),
            doubles: vec![1.0],
            ints: Vec::new(),
        };
        assert!(Discretizer::from_rows(vec![quantile(0), quantile(2)]).is_err());
        assert!(Discretizer::from_rows(vec![quantile(0), quantile(0)]).is_err());
        assert!(Discretizer::from_rows(vec![quantile(1)]).is_err());
    }

    #[test]
    fn test_from_rows_rejects_unknown_kind() {
        let row = DiscretizerRow {
            feature_index: 0,
            kind: "fourier".to_string(),
            doubles: Vec::new(),
            ints: Vec::new(),
        };
        assert!(Discretizer::from_rows(vec![row]).is_err());
    }
}
