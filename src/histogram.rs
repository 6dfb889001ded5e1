use fnv::FnvHashMap;

use crate::data::{FloatData, Instance};
use crate::pds::Pds;
use crate::BinId;

/// Histograms are keyed by (node id, selected feature id).
pub type HistKey = (u64, usize);

/// Adds one (grad, hess) observation to an interleaved `[g0,h0,g1,h1,..]`
/// histogram, growing it on demand; untouched positions stay zero.
#[inline]
pub fn accumulate<H: FloatData>(hist: &mut Vec<H>, bin: BinId, grad: H, hess: H) {
    let base = 2 * bin as usize;
    if hist.len() < base + 2 {
        hist.resize(base + 2, H::ZERO);
    }
    hist[base] += grad;
    hist[base + 1] += hess;
}

/// Elementwise sum; the result has the length of the longer operand.
pub fn merge_hists<H: FloatData>(mut left: Vec<H>, right: Vec<H>) -> Vec<H> {
    if left.len() < right.len() {
        left.resize(right.len(), H::ZERO);
    }
    for (i, v) in right.into_iter().enumerate() {
        left[i] += v;
    }
    left
}

/// Number of bins carrying any mass, and the hessian total over those bins.
pub fn nnz_and_hess_sum<H: FloatData>(hist: &[H]) -> (usize, f64) {
    let mut nnz = 0;
    let mut hess_sum = 0.0;
    for pair in hist.chunks_exact(2) {
        let grad = pair[0].to_f64();
        let hess = pair[1].to_f64();
        if grad != 0.0 || hess != 0.0 {
            nnz += 1;
            hess_sum += hess;
        }
    }
    (nnz, hess_sum)
}

/// Builds one histogram per (node, feature) over the given instances:
/// partition-local accumulation followed by a keyed shuffle-reduce with
/// `parallelism` output partitions.
pub fn compute_hists<H: FloatData>(
    data: &Pds<(Instance<H>, u64)>,
    parallelism: usize,
) -> Pds<(HistKey, Vec<H>)> {
    let local = data.map_partitions(|part| {
        let mut acc: FnvHashMap<HistKey, Vec<H>> = FnvHashMap::default();
        for (instance, node_id) in part {
            for (feature_id, &bin) in instance.bins.iter().enumerate() {
                accumulate(
                    acc.entry((*node_id, feature_id)).or_default(),
                    bin,
                    instance.grad,
                    instance.hess,
                );
            }
        }
        acc.into_iter().collect()
    });
    local.aggregate_by_key(parallelism, merge_hists)
}

/// Derives right-child histograms as `parent - left` and emits both children,
/// dropping any histogram that can no longer produce a split: fewer than two
/// occupied bins, or hessian mass below `2 * min_node_hess`.
pub fn subtract_hists<H: FloatData>(
    parent_hists: &Pds<(HistKey, Vec<H>)>,
    left_hists: &Pds<(HistKey, Vec<H>)>,
    min_node_hess: f64,
    parallelism: usize,
) -> Pds<(HistKey, Vec<H>)> {
    let by_parent = left_hists.map(|entry| {
        let ((left_id, feature_id), hist) = entry;
        ((left_id >> 1, *feature_id), (*left_id, hist.clone()))
    });
    by_parent
        .join(parent_hists, parallelism)
        .flat_map(|entry| {
            let ((_, feature_id), ((left_id, left), parent)) = entry;
            assert!(left.len() <= parent.len());
            let mut right = parent.clone();
            for (i, v) in left.iter().enumerate() {
                right[i] -= *v;
            }
            vec![
                ((*left_id, *feature_id), left.clone()),
                ((*left_id | 1, *feature_id), right),
            ]
        })
        .filter(move |(_, hist)| {
            let (nnz, hess_sum) = nnz_and_hess_sum(hist);
            nnz >= 2 && hess_sum >= 2.0 * min_node_hess
        })
}

/// Output-partition count for one frontier level, scaled to the expected
/// histogram count and the worker count `E`; a single worker collapses to 1.
pub fn level_parallelism(num_leaves: usize, num_cols: usize, col_sample_by_level: f64) -> usize {
    let workers = rayon::current_num_threads();
    if workers <= 1 {
        return 1;
    }
    let approx_hist_count = (num_leaves * num_cols) as f64 * col_sample_by_level;
    let per_worker = (approx_hist_count / (workers - 1) as f64).ceil().max(1.0).min(128.0);
    per_worker as usize * (workers - 1)
}
