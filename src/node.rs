use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

use crate::splitter::{Split, SplitMap};

/// A node of a growing tree. Children are owned downward links only; parent,
/// sibling and depth relations are all encoded in the node id (root is 1, the
/// children of `id` are `id << 1` and `id << 1 | 1`).
#[derive(Debug, Clone)]
pub struct LearningNode {
    pub node_id: u64,
    pub is_leaf: bool,
    pub prediction: f64,
    pub split: Option<Split>,
    pub left: Option<Box<LearningNode>>,
    pub right: Option<Box<LearningNode>>,
}

impl LearningNode {
    pub fn new_leaf(node_id: u64, prediction: f64) -> Self {
        LearningNode {
            node_id,
            is_leaf: true,
            prediction,
            split: None,
            left: None,
            right: None,
        }
    }

    /// Turns every leaf with an entry in `splits` into an internal node whose
    /// children predict the split's left/right weights.
    pub fn apply_splits(&mut self, splits: &SplitMap) {
        if self.is_leaf {
            if let Some(split) = splits.get(&self.node_id) {
                self.is_leaf = false;
                self.left = Some(Box::new(LearningNode::new_leaf(
                    self.node_id << 1,
                    split.left_weight(),
                )));
                self.right = Some(Box::new(LearningNode::new_leaf(
                    self.node_id << 1 | 1,
                    split.right_weight(),
                )));
                self.split = Some(split.clone());
            }
            return;
        }
        if let Some(left) = self.left.as_mut() {
            left.apply_splits(splits);
        }
        if let Some(right) = self.right.as_mut() {
            right.apply_splits(splits);
        }
    }

    pub fn subtree_depth(&self) -> usize {
        let left = self.left.as_ref().map_or(0, |n| n.subtree_depth());
        let right = self.right.as_ref().map_or(0, |n| n.subtree_depth());
        1 + left.max(right)
    }

    pub fn num_leaves(&self) -> usize {
        if self.is_leaf {
            return 1;
        }
        self.left.as_ref().map_or(0, |n| n.num_leaves())
            + self.right.as_ref().map_or(0, |n| n.num_leaves())
    }

    fn collect_leaf_ids(&self, out: &mut Vec<u64>) {
        if self.is_leaf {
            out.push(self.node_id);
            return;
        }
        if let Some(left) = self.left.as_ref() {
            left.collect_leaf_ids(out);
        }
        if let Some(right) = self.right.as_ref() {
            right.collect_leaf_ids(out);
        }
    }

    /// Collapses the growth graph into immutable model nodes, returning the
    /// root together with the leaf-id table: leaf indices are dense and
    /// assigned by ascending leaf node id.
    pub fn materialize(self) -> (TreeNode, Vec<u64>) {
        let mut leaf_ids = Vec::new();
        self.collect_leaf_ids(&mut leaf_ids);
        leaf_ids.sort_unstable();
        let index_of: FnvHashMap<u64, usize> = leaf_ids
            .iter()
            .enumerate()
            .map(|(index, id)| (*id, index))
            .collect();
        (self.into_tree_node(&index_of), leaf_ids)
    }

    fn into_tree_node(self, leaf_index_of: &FnvHashMap<u64, usize>) -> TreeNode {
        if self.is_leaf {
            return TreeNode::Leaf {
                weight: self.prediction,
                leaf_index: leaf_index_of[&self.node_id],
            };
        }
        let split = self.split.expect("internal nodes carry a split");
        let left = self.left.expect("internal nodes have two children");
        let right = self.right.expect("internal nodes have two children");
        TreeNode::Internal {
            split,
            left: Box::new(left.into_tree_node(leaf_index_of)),
            right: Box::new(right.into_tree_node(leaf_index_of)),
        }
    }
}

/// An immutable node of a finished tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        weight: f64,
        leaf_index: usize,
    },
    Internal {
        split: Split,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Internal { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    pub fn num_leaves(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Internal { left, right, .. } => left.num_leaves() + right.num_leaves(),
        }
    }

    pub fn num_internal(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Internal { left, right, .. } => {
                1 + left.num_internal() + right.num_internal()
            }
        }
    }
}
