//! Histogram-binned gradient boosting training core.
//!
//! The crate fits per-column discretizers mapping raw features onto small bin
//! ids (bin 0 reserved for missing values), aggregates per-leaf gradient and
//! hessian histograms with the parent-minus-left subtraction trick, and
//! searches those histograms for the regularized second-order split of each
//! frontier leaf. Everything runs over a partitioned in-memory dataset
//! abstraction whose reductions are associative and commutative.

pub mod aggregator;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod discretizer;
pub mod errors;
pub mod histogram;
pub mod node;
pub mod partitioner;
pub mod pds;
pub mod quantile;
pub mod splitter;
pub mod tree;
pub mod utils;

/// Bin index within one column; 0 always means "missing".
pub type BinId = u16;

pub use config::{BoostConfig, NumericalBinType, StorageLevel, TreeConfig};
pub use data::{FloatData, Instance};
pub use discretizer::{ColDiscretizer, Discretizer};
pub use errors::{HistBoostError, Result};
pub use splitter::{Split, SplitFinder};
pub use tree::{TreeBuilder, TreeModel};
