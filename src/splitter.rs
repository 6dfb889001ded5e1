use std::cmp::Ordering;

use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

use crate::config::{BoostConfig, TreeConfig};
use crate::data::FloatData;
use crate::histogram::HistKey;
use crate::pds::Pds;
use crate::utils::{all_finite, weight_and_score};
use crate::BinId;

/// Best split per node id.
pub type SplitMap = FnvHashMap<u64, Split>;

/// A chosen split for one node. `stats` holds
/// `[left_weight, left_grad, left_hess, right_weight, right_grad, right_hess]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Split {
    /// Ordered threshold over bin ids: non-missing bins go left iff
    /// `bin <= threshold`.
    Seq {
        feature_id: usize,
        missing_go_left: bool,
        threshold: BinId,
        gain: f64,
        stats: [f64; 6],
    },
    /// Subset routing for categorical bins: non-missing bins go left iff they
    /// are in `left_set` (kept sorted).
    Set {
        feature_id: usize,
        missing_go_left: bool,
        left_set: Vec<BinId>,
        gain: f64,
        stats: [f64; 6],
    },
}

impl Split {
    pub fn feature_id(&self) -> usize {
        match self {
            Split::Seq { feature_id, .. } | Split::Set { feature_id, .. } => *feature_id,
        }
    }

    pub fn gain(&self) -> f64 {
        match self {
            Split::Seq { gain, .. } | Split::Set { gain, .. } => *gain,
        }
    }

    pub fn stats(&self) -> &[f64; 6] {
        match self {
            Split::Seq { stats, .. } | Split::Set { stats, .. } => stats,
        }
    }

    pub fn left_weight(&self) -> f64 {
        self.stats()[0]
    }

    pub fn right_weight(&self) -> f64 {
        self.stats()[3]
    }

    pub fn goes_left(&self, bin: BinId) -> bool {
        match self {
            Split::Seq {
                missing_go_left,
                threshold,
                ..
            } => {
                if bin == 0 {
                    *missing_go_left
                } else {
                    bin <= *threshold
                }
            }
            Split::Set {
                missing_go_left,
                left_set,
                ..
            } => {
                if bin == 0 {
                    *missing_go_left
                } else {
                    left_set.binary_search(&bin).is_ok()
                }
            }
        }
    }
}

/// An admissible cut out of a sequential scan: `cut` bins on the left,
/// already past the gain floor.
#[derive(Debug, Clone, Copy)]
struct SeqCandidate {
    cut: usize,
    gain: f64,
    stats: [f64; 6],
}

/// Searches per-(node, feature) histograms for the best split of each node.
pub struct SplitFinder<'a> {
    boost: &'a BoostConfig,
    tree: &'a TreeConfig,
}

impl<'a> SplitFinder<'a> {
    pub fn new(boost: &'a BoostConfig, tree: &'a TreeConfig) -> Self {
        SplitFinder { boost, tree }
    }

    /// Best split per node across all feature histograms. Histograms are
    /// Bernoulli-sampled at `col_sample_by_level`; the per-node argmax runs as
    /// partition-local maps folded by a bounded-fan-in tree aggregation.
    pub fn find_splits<H: FloatData>(&self, hists: &Pds<(HistKey, Vec<H>)>, seed: u64) -> SplitMap {
        let sampled = if self.boost.col_sample_by_level < 1.0 {
            hists.sample(self.boost.col_sample_by_level, seed)
        } else {
            hists.clone()
        };
        let candidates: Pds<(u64, Split)> = sampled.flat_map(|entry| {
            let ((node_id, feature_id), hist) = entry;
            match self.split_hist(*feature_id, hist) {
                Some(split) => vec![(*node_id, split)],
                None => Vec::new(),
            }
        });
        candidates.tree_aggregate(
            SplitMap::default(),
            |mut acc, entry: &(u64, Split)| {
                insert_better(&mut acc, entry.0, entry.1.clone());
                acc
            },
            |mut left, right| {
                for (node_id, split) in right {
                    insert_better(&mut left, node_id, split);
                }
                left
            },
            self.boost.aggregation_depth as usize,
        )
    }

    /// Best split of a single histogram, or `None` when the node cannot be
    /// usefully split.
    pub fn split_hist<H: FloatData>(&self, feature_id: usize, hist: &[H]) -> Option<Split> {
        let num_bins = hist.len() / 2;
        if num_bins <= 1 {
            return None;
        }
        let grad: Vec<f64> = hist.iter().step_by(2).map(|g| g.to_f64()).collect();
        let hess: Vec<f64> = hist.iter().skip(1).step_by(2).map(|h| h.to_f64()).collect();
        let nonzero: Vec<usize> = (0..num_bins)
            .filter(|&i| grad[i] != 0.0 || hess[i] != 0.0)
            .collect();
        if nonzero.len() <= 1 {
            return None;
        }
        if self.tree.is_seq[feature_id] {
            self.split_seq(feature_id, &grad, &hess)
        } else if nonzero.len() <= self.boost.max_brute_bins as usize {
            self.split_set_brute(feature_id, &grad, &hess, &nonzero)
        } else {
            self.split_set_heuristic(feature_id, &grad, &hess, &nonzero)
        }
    }

    /// Prefix scan over bins in index order. The returned `cut` is the number
    /// of leading bins on the left side.
    fn seq_search(&self, grad: &[f64], hess: &[f64]) -> Option<SeqCandidate> {
        let num_bins = grad.len();
        let grad_total: f64 = grad.iter().sum();
        let hess_total: f64 = hess.iter().sum();
        let alpha = self.boost.reg_alpha;
        let lambda = self.boost.reg_lambda;
        let (_, base_score) = weight_and_score(alpha, lambda, grad_total, hess_total);

        let mut best: Option<(usize, f64, [f64; 6])> = None;
        let mut grad_left = 0.0;
        let mut hess_left = 0.0;
        for cut in 1..num_bins {
            grad_left += grad[cut - 1];
            hess_left += hess[cut - 1];
            let grad_right = grad_total - grad_left;
            let hess_right = hess_total - hess_left;
            if hess_left < self.boost.min_node_hess || hess_right < self.boost.min_node_hess {
                continue;
            }
            let (weight_left, score_left) = weight_and_score(alpha, lambda, grad_left, hess_left);
            let (weight_right, score_right) =
                weight_and_score(alpha, lambda, grad_right, hess_right);
            let stats = [
                weight_left,
                grad_left,
                hess_left,
                weight_right,
                grad_right,
                hess_right,
            ];
            let score = score_left + score_right;
            if !all_finite(&stats) || !score.is_finite() {
                continue;
            }
            if best.map_or(true, |(_, s, _)| score > s) {
                best = Some((cut, score, stats));
            }
        }
        let (cut, score, stats) = best?;
        let gain = score - base_score;
        if !gain.is_finite() || gain < self.boost.min_gain {
            return None;
        }
        Some(SeqCandidate { cut, gain, stats })
    }

    /// Ordered-threshold split. Bin 0 sits with the left prefix as-is; when it
    /// carries meaningful mass, a rotated scan prices sending it right
    /// instead. Ties keep missing on the left.
    fn split_seq(&self, feature_id: usize, grad: &[f64], hess: &[f64]) -> Option<Split> {
        let missing_left = self.seq_search(grad, hess);

        let abs_grad: f64 = grad.iter().map(|g| g.abs()).sum();
        let abs_hess: f64 = hess.iter().map(|h| h.abs()).sum();
        let missing_matters =
            grad[0].abs() >= 1e-3 * abs_grad || hess[0].abs() >= 1e-3 * abs_hess;
        let missing_right = if missing_matters {
            let mut grad_rot = grad[1..].to_vec();
            grad_rot.push(grad[0]);
            let mut hess_rot = hess[1..].to_vec();
            hess_rot.push(hess[0]);
            self.seq_search(&grad_rot, &hess_rot)
        } else {
            None
        };

        let (candidate, missing_go_left) = match (missing_left, missing_right) {
            (Some(l), Some(r)) => {
                if l.gain >= r.gain {
                    (l, true)
                } else {
                    (r, false)
                }
            }
            (Some(l), None) => (l, true),
            (None, Some(r)) => (r, false),
            (None, None) => return None,
        };
        // The rotated sequence starts at bin 1, so its cut translates back by
        // one bin.
        let threshold = if missing_go_left {
            (candidate.cut - 1) as BinId
        } else {
            candidate.cut as BinId
        };
        Some(Split::Seq {
            feature_id,
            missing_go_left,
            threshold,
            gain: candidate.gain,
            stats: candidate.stats,
        })
    }

    /// Exhausts every non-empty proper subset of the occupied bins; the first
    /// occupied bin stays out of the candidate set so mirrored subsets are not
    /// visited twice.
    fn split_set_brute(
        &self,
        feature_id: usize,
        grad: &[f64],
        hess: &[f64],
        nonzero: &[usize],
    ) -> Option<Split> {
        let n = nonzero.len();
        let grad_total: f64 = grad.iter().sum();
        let hess_total: f64 = hess.iter().sum();
        let alpha = self.boost.reg_alpha;
        let lambda = self.boost.reg_lambda;
        let (_, base_score) = weight_and_score(alpha, lambda, grad_total, hess_total);

        let mut best: Option<(u64, f64, [f64; 6])> = None;
        for mask in 1u64..(1u64 << (n - 1)) {
            let mut grad_left = 0.0;
            let mut hess_left = 0.0;
            for j in 0..n - 1 {
                if mask & (1 << j) != 0 {
                    let bin = nonzero[j + 1];
                    grad_left += grad[bin];
                    hess_left += hess[bin];
                }
            }
            let grad_right = grad_total - grad_left;
            let hess_right = hess_total - hess_left;
            if hess_left < self.boost.min_node_hess || hess_right < self.boost.min_node_hess {
                continue;
            }
            let (weight_left, score_left) = weight_and_score(alpha, lambda, grad_left, hess_left);
            let (weight_right, score_right) =
                weight_and_score(alpha, lambda, grad_right, hess_right);
            let stats = [
                weight_left,
                grad_left,
                hess_left,
                weight_right,
                grad_right,
                hess_right,
            ];
            let score = score_left + score_right;
            if !all_finite(&stats) || !score.is_finite() {
                continue;
            }
            if best.map_or(true, |(_, s, _)| score > s) {
                best = Some((mask, score, stats));
            }
        }
        let (mask, score, stats) = best?;
        let gain = score - base_score;
        if !gain.is_finite() || gain < self.boost.min_gain {
            return None;
        }
        let set1: Vec<usize> = (0..n - 1)
            .filter(|j| mask & (1 << j) != 0)
            .map(|j| nonzero[j + 1])
            .collect();
        self.create_set_split(feature_id, &set1, nonzero, gain, stats)
    }

    /// Orders occupied bins by `grad / (hess + lambda / B)` and reduces the
    /// subset search to a prefix cut over that ordering.
    fn split_set_heuristic(
        &self,
        feature_id: usize,
        grad: &[f64],
        hess: &[f64],
        nonzero: &[usize],
    ) -> Option<Split> {
        let num_bins = grad.len() as f64;
        let lambda = self.boost.reg_lambda;
        let rank = |bin: usize| grad[bin] / (hess[bin] + lambda / num_bins);
        let mut ordered = nonzero.to_vec();
        ordered.sort_by(|&a, &b| rank(a).partial_cmp(&rank(b)).unwrap_or(Ordering::Equal));
        let grad_ord: Vec<f64> = ordered.iter().map(|&b| grad[b]).collect();
        let hess_ord: Vec<f64> = ordered.iter().map(|&b| hess[b]).collect();
        let candidate = self.seq_search(&grad_ord, &hess_ord)?;
        let set1 = ordered[..candidate.cut].to_vec();
        self.create_set_split(feature_id, &set1, nonzero, candidate.gain, candidate.stats)
    }

    /// Normalizes a chosen subset into a `Set` split: bin 0 moves into the
    /// missing flag, the smaller half becomes `left_set`, and the stats block
    /// is swapped when the halves trade places.
    fn create_set_split(
        &self,
        feature_id: usize,
        set1: &[usize],
        nonzero: &[usize],
        gain: f64,
        stats: [f64; 6],
    ) -> Option<Split> {
        let set2: Vec<usize> = nonzero
            .iter()
            .copied()
            .filter(|b| !set1.contains(b))
            .collect();
        let missing_in_set1 = set1.contains(&0);
        let missing_in_set2 = set2.contains(&0);
        let mut bins1: Vec<BinId> = set1
            .iter()
            .copied()
            .filter(|&b| b != 0)
            .map(|b| b as BinId)
            .collect();
        let mut bins2: Vec<BinId> = set2
            .iter()
            .copied()
            .filter(|&b| b != 0)
            .map(|b| b as BinId)
            .collect();
        bins1.sort_unstable();
        bins2.sort_unstable();
        let (left_set, missing_go_left, stats) = if bins1.len() <= bins2.len() {
            (bins1, missing_in_set1, stats)
        } else {
            let swapped = [stats[3], stats[4], stats[5], stats[0], stats[1], stats[2]];
            (bins2, missing_in_set2, swapped)
        };
        Some(Split::Set {
            feature_id,
            missing_go_left,
            left_set,
            gain,
            stats,
        })
    }
}

fn insert_better(map: &mut SplitMap, node_id: u64, split: Split) {
    match map.get(&node_id) {
        Some(existing) if !is_better(&split, existing) => {}
        _ => {
            map.insert(node_id, split);
        }
    }
}

/// Gain decides; equal gains fall back to the lower feature id so the result
/// does not depend on partition order.
fn is_better(challenger: &Split, incumbent: &Split) -> bool {
    challenger.gain() > incumbent.gain()
        || (challenger.gain() == incumbent.gain()
            && challenger.feature_id() < incumbent.feature_id())
}
