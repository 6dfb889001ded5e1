use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpointer;
use crate::config::{BoostConfig, TreeConfig};
use crate::data::{FloatData, Instance};
use crate::errors::Result;
use crate::histogram::{compute_hists, level_parallelism, subtract_hists, HistKey};
use crate::node::{LearningNode, TreeNode};
use crate::pds::Pds;
use crate::splitter::{SplitFinder, SplitMap};
use crate::BinId;

/// Grows a single tree over binned instances: one histogram/split round per
/// frontier level, with per-instance node ids recomputed and persisted each
/// level.
pub struct TreeBuilder<'a, H: FloatData> {
    data: &'a Pds<Instance<H>>,
    boost: &'a BoostConfig,
    tree: &'a TreeConfig,
}

impl<'a, H: FloatData> TreeBuilder<'a, H> {
    pub fn new(data: &'a Pds<Instance<H>>, boost: &'a BoostConfig, tree: &'a TreeConfig) -> Self {
        TreeBuilder { data, boost, tree }
    }

    /// Runs the growth loop to completion. `None` when no split ever clears
    /// the gain floor, which ends the tree gracefully.
    pub fn build(&self, checkpointer: &mut Checkpointer) -> Option<TreeModel> {
        if self.data.is_empty() {
            return None;
        }
        let mut root = LearningNode::new_leaf(1, 0.0);
        let mut node_ids: Pds<u64> = self.data.map(|_| 1u64);
        checkpointer.update(&node_ids);

        let mut num_leaves: usize = 1;
        let mut min_node_id: u64 = 1;
        let mut last_splits: Arc<SplitMap> = Arc::new(SplitMap::default());
        let mut prev_hists: Option<Pds<(HistKey, Vec<H>)>> = None;

        let finder = SplitFinder::new(self.boost, self.tree);
        // Splitting level d creates nodes of depth d + 2.
        let max_level = (self.boost.max_depth as usize).saturating_sub(1);
        for depth in 0..max_level {
            let parallelism = level_parallelism(
                num_leaves,
                self.tree.num_cols,
                self.boost.col_sample_by_level,
            );

            if depth > 0 {
                let routes = Arc::clone(&last_splits);
                node_ids = self.data.zip(&node_ids).map(move |(instance, node_id)| {
                    match routes.get(node_id) {
                        Some(split) => {
                            let bin = instance.bins[split.feature_id()];
                            if split.goes_left(bin) {
                                node_id << 1
                            } else {
                                node_id << 1 | 1
                            }
                        }
                        None => *node_id,
                    }
                });
                checkpointer.update(&node_ids);
            }

            let with_ids = self.data.zip(&node_ids);
            let hists = if depth == 0 {
                // The root histogram is the one direct full scan.
                compute_hists(&with_ids, parallelism)
            } else {
                let level_start = min_node_id;
                let left_children = with_ids
                    .filter(move |(_, node_id)| *node_id >= level_start && node_id % 2 == 0);
                let left_hists = compute_hists(&left_children, parallelism);
                subtract_hists(
                    prev_hists.as_ref().expect("levels past the root have parents"),
                    &left_hists,
                    self.boost.min_node_hess,
                    parallelism,
                )
            };
            checkpointer.update(&hists);

            let seed = self.boost.seed + self.tree.tree_index as i64 + depth as i64;
            let splits = finder.find_splits(&hists, seed as u64);
            if splits.is_empty() {
                debug!("level {depth}: no admissible splits, stopping");
                break;
            }
            if num_leaves as i64 + splits.len() as i64 > self.boost.max_leaves {
                debug!(
                    "level {depth}: {} splits would exceed max_leaves, stopping",
                    splits.len()
                );
                break;
            }

            root.apply_splits(&splits);
            num_leaves += splits.len();
            debug!(
                "level {depth}: applied {} splits, {num_leaves} leaves",
                splits.len()
            );

            last_splits = Arc::new(splits);
            min_node_id <<= 1;
            prev_hists = Some(hists);
            if num_leaves as i64 >= self.boost.max_leaves {
                break;
            }
        }

        let model = if root.is_leaf {
            None
        } else {
            Some(TreeModel::from_learning(root, self.tree.columns.clone()))
        };
        checkpointer.unpersist_all();
        checkpointer.delete_all_checkpoints();
        model
    }
}

/// A finished tree: immutable nodes, the selected-to-original column map, and
/// the dense leaf-id table (leaf index -> growth-time node id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeModel {
    pub root: TreeNode,
    pub columns: Vec<i32>,
    pub leaf_ids: Vec<u64>,
}

impl TreeModel {
    pub fn from_learning(root: LearningNode, columns: Vec<i32>) -> TreeModel {
        let (root, leaf_ids) = root.materialize();
        TreeModel {
            root,
            columns,
            leaf_ids,
        }
    }

    pub fn num_leaves(&self) -> usize {
        self.leaf_ids.len()
    }

    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    /// Walks the tree over a bin vector in original column space.
    fn walk(&self, bins: &[BinId]) -> (&f64, &usize) {
        let mut node = &self.root;
        loop {
            match node {
                TreeNode::Leaf { weight, leaf_index } => return (weight, leaf_index),
                TreeNode::Internal { split, left, right } => {
                    let column = self.columns[split.feature_id()] as usize;
                    node = if split.goes_left(bins[column]) {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    pub fn predict(&self, bins: &[BinId]) -> f64 {
        *self.walk(bins).0
    }

    pub fn leaf_index(&self, bins: &[BinId]) -> usize {
        *self.walk(bins).1
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<TreeModel> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageLevel;

    fn checkpointer() -> Checkpointer {
        Checkpointer::new(-1, StorageLevel::MemoryOnly, None)
    }

    fn boost(max_depth: i32, max_leaves: i64) -> BoostConfig {
        BoostConfig {
            max_depth,
            max_leaves,
            min_gain: 0.0,
            min_node_hess: 0.0,
            reg_alpha: 0.0,
            reg_lambda: 0.0,
            ..BoostConfig::default()
        }
    }

    fn tree_config(num_cols: usize) -> TreeConfig {
        TreeConfig::new(0, 0, (0..num_cols as i32).collect(), vec![true; num_cols])
    }

    /// Two columns; column 0 separates the strong groups, column 1 refines
    /// one side.
    fn instances() -> Vec<Instance<f64>> {
        vec![
            Instance::new(2.0, 1.0, vec![1, 1]),
            Instance::new(2.0, 1.0, vec![1, 2]),
            Instance::new(-1.0, 1.0, vec![2, 1]),
            Instance::new(-3.0, 1.0, vec![2, 2]),
        ]
    }

    #[test]
    fn test_grow_respects_depth_one() {
        let data = Pds::from_vec(instances(), 2);
        let boost = boost(1, 31);
        let tree = tree_config(2);
        let model = TreeBuilder::new(&data, &boost, &tree).build(&mut checkpointer());
        assert!(model.is_none());
    }

    #[test]
    fn test_grow_two_levels() {
        let data = Pds::from_vec(instances(), 2);
        let boost = boost(3, 31);
        let tree = tree_config(2);
        let model = TreeBuilder::new(&data, &boost, &tree)
            .build(&mut checkpointer())
            .unwrap();

        assert!(model.depth() <= 3);
        // Leaf count invariant.
        assert_eq!(model.root.num_leaves(), model.root.num_internal() + 1);
        assert_eq!(model.num_leaves(), model.root.num_leaves());

        // The root split is on column 0 (bin 1 vs bin 2); both children then
        // split on column 1 (the left one at zero gain under min_gain = 0).
        for instance in instances() {
            let prediction = model.predict(&instance.bins);
            // Optimal leaf weight is -G/H over the leaf members.
            let expected = match (instance.bins[0], instance.bins[1]) {
                (1, _) => -2.0,
                (2, 1) => 1.0,
                (2, 2) => 3.0,
                other => panic!("unexpected bins {other:?}"),
            };
            assert!(
                (prediction - expected).abs() < 1e-9,
                "bins {:?} predicted {prediction}, expected {expected}",
                instance.bins
            );
        }

        // Dense leaf table covers every reachable leaf.
        let mut seen: Vec<usize> = instances()
            .iter()
            .map(|i| model.leaf_index(&i.bins))
            .collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen, (0..model.num_leaves()).collect::<Vec<usize>>());
    }

    #[test]
    fn test_max_leaves_stops_growth() {
        let data = Pds::from_vec(instances(), 2);
        let boost = boost(5, 2);
        let tree = tree_config(2);
        let model = TreeBuilder::new(&data, &boost, &tree)
            .build(&mut checkpointer())
            .unwrap();
        assert_eq!(model.num_leaves(), 2);
        assert_eq!(model.depth(), 2);
    }

    #[test]
    fn test_pure_node_is_not_split() {
        // A single constant column gives the root no admissible split once
        // every instance shares one bin.
        let data = Pds::from_vec(
            vec![
                Instance::new(1.0, 1.0, vec![1]),
                Instance::new(2.0, 1.0, vec![1]),
            ],
            1,
        );
        let boost = boost(4, 31);
        let tree = tree_config(1);
        assert!(TreeBuilder::new(&data, &boost, &tree)
            .build(&mut checkpointer())
            .is_none());
    }

    #[test]
    fn test_routing_reaches_split_weights() {
        let data = Pds::from_vec(instances(), 2);
        let boost = boost(3, 31);
        let tree = tree_config(2);
        let model = TreeBuilder::new(&data, &boost, &tree)
            .build(&mut checkpointer())
            .unwrap();
        // Every prediction equals some split's stored left or right weight.
        let mut weights = Vec::new();
        fn collect(node: &TreeNode, out: &mut Vec<f64>) {
            if let TreeNode::Internal { split, left, right } = node {
                out.push(split.left_weight());
                out.push(split.right_weight());
                collect(left, out);
                collect(right, out);
            }
        }
        collect(&model.root, &mut weights);
        for instance in instances() {
            let prediction = model.predict(&instance.bins);
            assert!(
                weights.iter().any(|w| (w - prediction).abs() < 1e-12),
                "prediction {prediction} not among split weights {weights:?}"
            );
        }
    }

    #[test]
    fn test_model_json_roundtrip() {
        let data = Pds::from_vec(instances(), 2);
        let boost = boost(3, 31);
        let tree = tree_config(2);
        let model = TreeBuilder::new(&data, &boost, &tree)
            .build(&mut checkpointer())
            .unwrap();
        let json = model.to_json().unwrap();
        assert_eq!(TreeModel::from_json(&json).unwrap(), model);
    }

    #[test]
    fn test_f32_instances_grow_identically() {
        let data: Pds<Instance<f32>> = Pds::from_vec(
            instances()
                .into_iter()
                .map(|i| Instance::new(i.grad as f32, i.hess as f32, i.bins))
                .collect(),
            2,
        );
        let boost = boost(3, 31);
        let tree = tree_config(2);
        let model = TreeBuilder::new(&data, &boost, &tree)
            .build(&mut checkpointer())
            .unwrap();
        assert_eq!(model.num_leaves(), 4);
        assert!((model.predict(&[1, 1]) - -2.0).abs() < 1e-6);
    }
}
