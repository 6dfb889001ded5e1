use std::hash::{Hash, Hasher};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fnv::{FnvHashMap, FnvHasher};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;

use crate::config::StorageLevel;

/// An immutable, partitioned, in-memory dataset processed with rayon.
///
/// This is the crate's rendition of the abstract parallel dataset the training
/// core runs over: transformations build new datasets, reductions are
/// associative and commutative, and keyed shuffles hash with a fixed hasher so
/// results do not depend on process-level hash seeding.
pub struct Pds<T> {
    inner: Arc<PdsInner<T>>,
}

impl<T> Clone for Pds<T> {
    fn clone(&self) -> Self {
        Pds {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct PdsInner<T> {
    partitions: Vec<Vec<T>>,
    persisted: AtomicBool,
}

/// Type-erased view of a dataset for the checkpointer's queues.
pub trait CachedDataset: Send + Sync {
    fn unpersist(&self);
    fn write_checkpoint(&self, path: &Path) -> std::io::Result<()>;
}

impl<T: Serialize + Send + Sync> CachedDataset for PdsInner<T> {
    fn unpersist(&self) {
        self.persisted.store(false, Ordering::Relaxed);
    }

    fn write_checkpoint(&self, path: &Path) -> std::io::Result<()> {
        let file = std::fs::File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &self.partitions)?;
        writer.flush()
    }
}

fn key_bucket<K: Hash>(key: &K, num_partitions: usize) -> usize {
    let mut hasher = FnvHasher::default();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % num_partitions
}

impl<T: Clone + Send + Sync> Pds<T> {
    pub fn from_partitions(partitions: Vec<Vec<T>>) -> Pds<T> {
        Pds {
            inner: Arc::new(PdsInner {
                partitions,
                persisted: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_vec(items: Vec<T>, num_partitions: usize) -> Pds<T> {
        let num_partitions = num_partitions.max(1);
        let len = items.len();
        let base = len / num_partitions;
        let extra = len % num_partitions;
        let mut partitions = Vec::with_capacity(num_partitions);
        let mut iter = items.into_iter();
        for p in 0..num_partitions {
            let size = base + usize::from(p < extra);
            partitions.push(iter.by_ref().take(size).collect());
        }
        Pds::from_partitions(partitions)
    }

    pub fn num_partitions(&self) -> usize {
        self.inner.partitions.len()
    }

    pub fn len(&self) -> usize {
        self.inner.partitions.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.partitions.iter().all(Vec::is_empty)
    }

    pub fn collect(&self) -> Vec<T> {
        self.inner.partitions.iter().flatten().cloned().collect()
    }

    pub fn map<U, F>(&self, f: F) -> Pds<U>
    where
        U: Clone + Send + Sync,
        F: Fn(&T) -> U + Send + Sync,
    {
        let partitions = self
            .inner
            .partitions
            .par_iter()
            .map(|part| part.iter().map(&f).collect())
            .collect();
        Pds::from_partitions(partitions)
    }

    pub fn filter<F>(&self, predicate: F) -> Pds<T>
    where
        F: Fn(&T) -> bool + Send + Sync,
    {
        let partitions = self
            .inner
            .partitions
            .par_iter()
            .map(|part| part.iter().filter(|t| predicate(t)).cloned().collect())
            .collect();
        Pds::from_partitions(partitions)
    }

    pub fn flat_map<U, F>(&self, f: F) -> Pds<U>
    where
        U: Clone + Send + Sync,
        F: Fn(&T) -> Vec<U> + Send + Sync,
    {
        let partitions = self
            .inner
            .partitions
            .par_iter()
            .map(|part| part.iter().flat_map(&f).collect())
            .collect();
        Pds::from_partitions(partitions)
    }

    pub fn map_partitions<U, F>(&self, f: F) -> Pds<U>
    where
        U: Clone + Send + Sync,
        F: Fn(&[T]) -> Vec<U> + Send + Sync,
    {
        let partitions = self
            .inner
            .partitions
            .par_iter()
            .map(|part| f(part))
            .collect();
        Pds::from_partitions(partitions)
    }

    /// Index-aligned zip; both datasets must share the same partitioning.
    pub fn zip<U: Clone + Send + Sync>(&self, other: &Pds<U>) -> Pds<(T, U)> {
        assert_eq!(
            self.num_partitions(),
            other.num_partitions(),
            "zip requires identical partitioning"
        );
        let partitions = self
            .inner
            .partitions
            .par_iter()
            .zip(other.inner.partitions.par_iter())
            .map(|(a, b)| {
                assert_eq!(a.len(), b.len(), "zip requires identical partitioning");
                a.iter().cloned().zip(b.iter().cloned()).collect()
            })
            .collect();
        Pds::from_partitions(partitions)
    }

    /// Bernoulli sample. Each partition draws from its own rng seeded with a
    /// value derived from `seed` and the partition index, so the outcome does
    /// not depend on worker topology.
    pub fn sample(&self, fraction: f64, seed: u64) -> Pds<T> {
        if fraction >= 1.0 {
            return self.clone();
        }
        let partitions = self
            .inner
            .partitions
            .par_iter()
            .enumerate()
            .map(|(idx, part)| {
                let mut rng =
                    StdRng::seed_from_u64(seed.wrapping_add((idx as u64).wrapping_mul(0x9e3779b9)));
                part.iter()
                    .filter(|_| rng.gen::<f64>() < fraction)
                    .cloned()
                    .collect()
            })
            .collect();
        Pds::from_partitions(partitions)
    }

    /// Fold every partition with `seq_op`, then combine the partials in rounds
    /// whose fan-in is derived from `depth`, limiting top-level pressure.
    pub fn tree_aggregate<A, S, C>(&self, zero: A, seq_op: S, comb_op: C, depth: usize) -> A
    where
        A: Clone + Send + Sync,
        S: Fn(A, &T) -> A + Send + Sync,
        C: Fn(A, A) -> A + Send + Sync,
    {
        let mut partials: Vec<A> = self
            .inner
            .partitions
            .par_iter()
            .map(|part| part.iter().fold(zero.clone(), &seq_op))
            .collect();
        if partials.is_empty() {
            return zero;
        }
        let depth = depth.max(2);
        let scale = ((partials.len() as f64).powf(1.0 / depth as f64).ceil() as usize).max(2);
        while partials.len() > 1 {
            partials = partials
                .par_chunks(scale)
                .map(|chunk| {
                    chunk
                        .iter()
                        .cloned()
                        .reduce(|a, b| comb_op(a, b))
                        .expect("chunks are non-empty")
                })
                .collect();
        }
        partials.pop().unwrap_or(zero)
    }

    pub fn tree_reduce<F>(&self, f: F, depth: usize) -> Option<T>
    where
        F: Fn(T, T) -> T + Send + Sync,
    {
        let partials: Vec<T> = self
            .inner
            .partitions
            .par_iter()
            .filter_map(|part| part.iter().cloned().reduce(&f))
            .collect();
        if partials.is_empty() {
            return None;
        }
        let depth = depth.max(2);
        let scale = ((partials.len() as f64).powf(1.0 / depth as f64).ceil() as usize).max(2);
        let mut partials = partials;
        while partials.len() > 1 {
            partials = partials
                .par_chunks(scale)
                .map(|chunk| {
                    chunk
                        .iter()
                        .cloned()
                        .reduce(|a, b| f(a, b))
                        .expect("chunks are non-empty")
                })
                .collect();
        }
        partials.pop()
    }

    pub fn persist(&self, _level: StorageLevel) {
        self.inner.persisted.store(true, Ordering::Relaxed);
    }

    pub fn unpersist(&self) {
        self.inner.persisted.store(false, Ordering::Relaxed);
    }

    pub fn is_persisted(&self) -> bool {
        self.inner.persisted.load(Ordering::Relaxed)
    }
}

impl<T: Clone + Send + Sync + Serialize + 'static> Pds<T> {
    /// Writes the full partition contents to `path` as JSON.
    pub fn checkpoint(&self, path: &Path) -> std::io::Result<()> {
        self.inner.write_checkpoint(path)
    }

    pub(crate) fn cached_handle(&self) -> Arc<dyn CachedDataset> {
        Arc::clone(&self.inner) as Arc<dyn CachedDataset>
    }
}

impl<K, V> Pds<(K, V)>
where
    K: Clone + Hash + Eq + Send + Sync,
    V: Clone + Send + Sync,
{
    /// Shuffle by key into `num_partitions` output partitions, combining
    /// values with `combine`. The combiner must be associative and
    /// commutative.
    pub fn aggregate_by_key<C>(&self, num_partitions: usize, combine: C) -> Pds<(K, V)>
    where
        C: Fn(V, V) -> V + Send + Sync,
    {
        let num_partitions = num_partitions.max(1);
        let mut buckets: Vec<Vec<(K, V)>> = (0..num_partitions).map(|_| Vec::new()).collect();
        for part in &self.inner.partitions {
            for (k, v) in part {
                buckets[key_bucket(k, num_partitions)].push((k.clone(), v.clone()));
            }
        }
        let partitions = buckets
            .into_par_iter()
            .map(|bucket| {
                let mut combined: FnvHashMap<K, V> = FnvHashMap::default();
                for (k, v) in bucket {
                    match combined.remove(&k) {
                        Some(existing) => {
                            let merged = combine(existing, v);
                            combined.insert(k, merged);
                        }
                        None => {
                            combined.insert(k, v);
                        }
                    }
                }
                combined.into_iter().collect()
            })
            .collect();
        Pds::from_partitions(partitions)
    }

    /// Inner hash join on the key.
    pub fn join<W>(&self, other: &Pds<(K, W)>, num_partitions: usize) -> Pds<(K, (V, W))>
    where
        W: Clone + Send + Sync,
    {
        let num_partitions = num_partitions.max(1);
        let mut left: Vec<Vec<(K, V)>> = (0..num_partitions).map(|_| Vec::new()).collect();
        for part in &self.inner.partitions {
            for (k, v) in part {
                left[key_bucket(k, num_partitions)].push((k.clone(), v.clone()));
            }
        }
        let mut right: Vec<Vec<(K, W)>> = (0..num_partitions).map(|_| Vec::new()).collect();
        for part in &other.inner.partitions {
            for (k, w) in part {
                right[key_bucket(k, num_partitions)].push((k.clone(), w.clone()));
            }
        }
        let partitions = left
            .into_par_iter()
            .zip(right.into_par_iter())
            .map(|(left_bucket, right_bucket)| {
                let mut by_key: FnvHashMap<K, Vec<V>> = FnvHashMap::default();
                for (k, v) in left_bucket {
                    by_key.entry(k).or_default().push(v);
                }
                let mut out = Vec::new();
                for (k, w) in right_bucket {
                    if let Some(values) = by_key.get(&k) {
                        for v in values {
                            out.push((k.clone(), (v.clone(), w.clone())));
                        }
                    }
                }
                out
            })
            .collect();
        Pds::from_partitions(partitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_partitioning() {
        let pds = Pds::from_vec((0..10).collect(), 3);
        assert_eq!(pds.num_partitions(), 3);
        assert_eq!(pds.len(), 10);
        assert_eq!(pds.collect(), (0..10).collect::<Vec<i32>>());
    }

    #[test]
    fn test_map_filter_flat_map() {
        let pds = Pds::from_vec((1..=6).collect::<Vec<i32>>(), 2);
        assert_eq!(pds.map(|x| x * 2).collect(), vec![2, 4, 6, 8, 10, 12]);
        assert_eq!(pds.filter(|x| x % 2 == 0).collect(), vec![2, 4, 6]);
        assert_eq!(
            pds.flat_map(|x| if *x <= 2 { vec![*x, *x] } else { vec![] })
                .collect(),
            vec![1, 1, 2, 2]
        );
    }

    #[test]
    fn test_zip_alignment() {
        let a = Pds::from_vec(vec![1, 2, 3, 4], 2);
        let b = Pds::from_vec(vec!["a", "b", "c", "d"], 2);
        let zipped = a.zip(&b).collect();
        assert_eq!(zipped, vec![(1, "a"), (2, "b"), (3, "c"), (4, "d")]);
    }

    #[test]
    fn test_tree_aggregate_matches_fold() {
        let pds = Pds::from_vec((1..=100).collect::<Vec<i64>>(), 7);
        let total = pds.tree_aggregate(0i64, |acc, x| acc + x, |a, b| a + b, 2);
        assert_eq!(total, 5050);
        // Depth changes fan-in, never the result.
        let deep = pds.tree_aggregate(0i64, |acc, x| acc + x, |a, b| a + b, 5);
        assert_eq!(deep, 5050);
    }

    #[test]
    fn test_tree_reduce() {
        let pds = Pds::from_vec(vec![3, 9, 1, 7], 3);
        assert_eq!(pds.tree_reduce(|a, b| a.max(b), 2), Some(9));
        let empty: Pds<i32> = Pds::from_vec(vec![], 2);
        assert_eq!(empty.tree_reduce(|a, b| a.max(b), 2), None);
    }

    #[test]
    fn test_sample_deterministic_and_partition_stable() {
        let pds = Pds::from_vec((0..1000).collect::<Vec<i32>>(), 4);
        let s1 = pds.sample(0.3, 42).collect();
        let s2 = pds.sample(0.3, 42).collect();
        assert_eq!(s1, s2);
        let s3 = pds.sample(0.3, 43).collect();
        assert_ne!(s1, s3);
        // Roughly the requested fraction.
        assert!(s1.len() > 200 && s1.len() < 400, "sampled {}", s1.len());
        // Full rate passes everything through.
        assert_eq!(pds.sample(1.0, 7).len(), 1000);
    }

    #[test]
    fn test_aggregate_by_key() {
        let pairs = vec![("a", 1), ("b", 2), ("a", 3), ("c", 4), ("b", 5)];
        let pds = Pds::from_vec(pairs, 3);
        let mut combined = pds.aggregate_by_key(2, |a, b| a + b).collect();
        combined.sort();
        assert_eq!(combined, vec![("a", 4), ("b", 7), ("c", 4)]);
    }

    #[test]
    fn test_join() {
        let left = Pds::from_vec(vec![(1, "l1"), (2, "l2"), (3, "l3")], 2);
        let right = Pds::from_vec(vec![(2, "r2"), (3, "r3"), (4, "r4")], 3);
        let mut joined = left.join(&right, 2).collect();
        joined.sort();
        assert_eq!(joined, vec![(2, ("l2", "r2")), (3, ("l3", "r3"))]);
    }

    #[test]
    fn test_persist_flag() {
        let pds = Pds::from_vec(vec![1, 2, 3], 1);
        assert!(!pds.is_persisted());
        pds.persist(StorageLevel::MemoryOnly);
        assert!(pds.is_persisted());
        pds.unpersist();
        assert!(!pds.is_persisted());
    }
}
