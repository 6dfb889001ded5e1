use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{HistBoostError, Result};

/// How numerical columns are discretized: equal-frequency (quantile) or
/// equal-width (interval) bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumericalBinType {
    Depth,
    Width,
}

impl NumericalBinType {
    /// Unrecognized names select width binning.
    pub fn from_name(name: &str) -> NumericalBinType {
        match name.to_ascii_lowercase().as_str() {
            "depth" => NumericalBinType::Depth,
            _ => NumericalBinType::Width,
        }
    }
}

/// Caching hint for persisted datasets. The in-memory backend keeps data
/// resident either way; the level is carried for interoperability with
/// engines that distinguish the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageLevel {
    MemoryOnly,
    MemoryAndDisk,
}

/// Training hyper-parameters shared by all trees of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostConfig {
    pub max_depth: i32,
    pub max_leaves: i64,
    pub min_gain: f64,
    pub min_node_hess: f64,
    pub reg_alpha: f64,
    pub reg_lambda: f64,
    pub col_sample_by_level: f64,
    pub max_brute_bins: i32,
    pub aggregation_depth: i32,
    pub max_bins: usize,
    pub numerical_bin_type: NumericalBinType,
    pub storage_level: StorageLevel,
    pub checkpoint_interval: i32,
    pub checkpoint_dir: Option<PathBuf>,
    pub seed: i64,
}

impl Default for BoostConfig {
    fn default() -> Self {
        BoostConfig {
            max_depth: 5,
            max_leaves: 31,
            min_gain: 0.0,
            min_node_hess: 1e-3,
            reg_alpha: 0.0,
            reg_lambda: 1.0,
            col_sample_by_level: 1.0,
            max_brute_bins: 10,
            aggregation_depth: 2,
            max_bins: 64,
            numerical_bin_type: NumericalBinType::Depth,
            storage_level: StorageLevel::MemoryOnly,
            checkpoint_interval: -1,
            checkpoint_dir: None,
            seed: 0,
        }
    }
}

impl BoostConfig {
    /// Rejects out-of-range parameters before any training work starts.
    pub fn validate(&self) -> Result<()> {
        if self.max_depth < 1 {
            return Err(HistBoostError::invalid_parameter("max_depth", "must be >= 1"));
        }
        if self.max_leaves < 2 {
            return Err(HistBoostError::invalid_parameter("max_leaves", "must be >= 2"));
        }
        if !(self.min_gain >= 0.0) {
            return Err(HistBoostError::invalid_parameter("min_gain", "must be >= 0"));
        }
        if !(self.min_node_hess >= 0.0) {
            return Err(HistBoostError::invalid_parameter(
                "min_node_hess",
                "must be >= 0",
            ));
        }
        if !(self.reg_alpha >= 0.0) {
            return Err(HistBoostError::invalid_parameter("reg_alpha", "must be >= 0"));
        }
        if !(self.reg_lambda >= 0.0) {
            return Err(HistBoostError::invalid_parameter("reg_lambda", "must be >= 0"));
        }
        if !(self.col_sample_by_level > 0.0 && self.col_sample_by_level <= 1.0) {
            return Err(HistBoostError::invalid_parameter(
                "col_sample_by_level",
                "must be in (0, 1]",
            ));
        }
        if self.max_brute_bins < 2 {
            return Err(HistBoostError::invalid_parameter(
                "max_brute_bins",
                "must be >= 2",
            ));
        }
        if self.aggregation_depth < 2 {
            return Err(HistBoostError::invalid_parameter(
                "aggregation_depth",
                "must be >= 2",
            ));
        }
        if self.max_bins < 4 {
            return Err(HistBoostError::invalid_parameter("max_bins", "must be >= 4"));
        }
        Ok(())
    }
}

/// Per-tree state: which original columns this tree sees and how each selected
/// column is searched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    pub iteration: usize,
    pub tree_index: usize,
    /// Selected column index -> original column id.
    pub columns: Vec<i32>,
    pub num_cols: usize,
    /// Indexed by selected column: true selects the ordered-threshold search,
    /// false the categorical set search.
    pub is_seq: Vec<bool>,
}

impl TreeConfig {
    pub fn new(iteration: usize, tree_index: usize, columns: Vec<i32>, is_seq: Vec<bool>) -> Self {
        let num_cols = columns.len();
        assert_eq!(num_cols, is_seq.len());
        TreeConfig {
            iteration,
            tree_index,
            columns,
            num_cols,
            is_seq,
        }
    }
}
