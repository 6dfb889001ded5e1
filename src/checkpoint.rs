use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::warn;
use serde::Serialize;

use crate::config::StorageLevel;
use crate::pds::{CachedDataset, Pds};

static CHECKPOINT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Truncates dataset lineage for the tree builder: keeps a short FIFO of
/// persisted datasets and rotates on-disk checkpoints on a fixed interval.
///
/// A dataset lineage must be owned by exactly one checkpointer. Checkpoint
/// I/O never interrupts training: write failures are logged and skipped, and
/// stale files are deleted off the training thread, also log-only on failure.
pub struct Checkpointer {
    interval: i32,
    storage_level: StorageLevel,
    checkpoint_dir: Option<PathBuf>,
    update_count: u32,
    persisted: VecDeque<Arc<dyn CachedDataset>>,
    checkpoints: VecDeque<PathBuf>,
}

const MAX_PERSISTED: usize = 3;

impl Checkpointer {
    /// `interval = -1` disables checkpoint files; the persist queue still runs.
    pub fn new(
        interval: i32,
        storage_level: StorageLevel,
        checkpoint_dir: Option<PathBuf>,
    ) -> Self {
        Checkpointer {
            interval,
            storage_level,
            checkpoint_dir,
            update_count: 0,
            persisted: VecDeque::new(),
            checkpoints: VecDeque::new(),
        }
    }

    pub fn update<T>(&mut self, data: &Pds<T>)
    where
        T: Clone + Send + Sync + Serialize + 'static,
    {
        if !data.is_persisted() {
            data.persist(self.storage_level);
        }
        self.persisted.push_back(data.cached_handle());
        while self.persisted.len() > MAX_PERSISTED {
            if let Some(oldest) = self.persisted.pop_front() {
                oldest.unpersist();
            }
        }

        self.update_count += 1;
        if self.interval > 0 && self.update_count % self.interval as u32 == 0 {
            if let Some(dir) = &self.checkpoint_dir {
                let seq = CHECKPOINT_SEQ.fetch_add(1, Ordering::Relaxed);
                let path = dir.join(format!("ckpt-{seq:08}.json"));
                match data.cached_handle().write_checkpoint(&path) {
                    Ok(()) => {
                        self.checkpoints.push_back(path);
                        // The previous checkpoint goes away only once the new
                        // one exists on disk.
                        while self.checkpoints.len() > 1 {
                            if let Some(stale) = self.checkpoints.pop_front() {
                                delete_async(stale);
                            }
                        }
                    }
                    Err(err) => warn!("checkpoint write failed, continuing: {err}"),
                }
            }
        }
    }

    pub fn num_persisted(&self) -> usize {
        self.persisted.len()
    }

    pub fn current_checkpoint(&self) -> Option<&PathBuf> {
        self.checkpoints.back()
    }

    pub fn unpersist_all(&mut self) {
        while let Some(data) = self.persisted.pop_front() {
            data.unpersist();
        }
    }

    pub fn delete_all_checkpoints(&mut self) {
        while let Some(path) = self.checkpoints.pop_front() {
            delete_async(path);
        }
    }
}

/// File removal runs off the training thread; failures only log.
fn delete_async(path: PathBuf) {
    std::thread::spawn(move || {
        if let Err(err) = std::fs::remove_file(&path) {
            warn!("failed to delete checkpoint {}: {err}", path.display());
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(tag: u64) -> Pds<u64> {
        Pds::from_vec((0..8).map(|i| i + tag).collect(), 2)
    }

    #[test]
    fn test_persist_queue_caps_at_three() {
        let mut ckpt = Checkpointer::new(-1, StorageLevel::MemoryOnly, None);
        let datasets: Vec<Pds<u64>> = (0..5).map(dataset).collect();
        for ds in &datasets {
            ckpt.update(ds);
        }
        assert_eq!(ckpt.num_persisted(), 3);
        // The two oldest were evicted and unpersisted.
        assert!(!datasets[0].is_persisted());
        assert!(!datasets[1].is_persisted());
        assert!(datasets[2].is_persisted());
        assert!(datasets[4].is_persisted());
    }

    #[test]
    fn test_disabled_interval_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt =
            Checkpointer::new(-1, StorageLevel::MemoryOnly, Some(dir.path().to_path_buf()));
        for tag in 0..6 {
            ckpt.update(&dataset(tag));
        }
        assert!(ckpt.current_checkpoint().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_checkpoint_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt =
            Checkpointer::new(2, StorageLevel::MemoryOnly, Some(dir.path().to_path_buf()));
        for tag in 0..6 {
            ckpt.update(&dataset(tag));
        }
        // Updates 2, 4 and 6 checkpointed; only the newest file is retained.
        let current = ckpt.current_checkpoint().cloned().unwrap();
        assert!(current.exists());
        // Deletions are asynchronous; poll briefly for the stale files to go.
        for _ in 0..50 {
            if std::fs::read_dir(dir.path()).unwrap().count() == 1 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        ckpt.delete_all_checkpoints();
        for _ in 0..50 {
            if std::fs::read_dir(dir.path()).unwrap().count() == 0 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_unpersist_all() {
        let mut ckpt = Checkpointer::new(-1, StorageLevel::MemoryOnly, None);
        let ds = dataset(0);
        ckpt.update(&ds);
        assert!(ds.is_persisted());
        ckpt.unpersist_all();
        assert!(!ds.is_persisted());
        assert_eq!(ckpt.num_persisted(), 0);
    }
}
