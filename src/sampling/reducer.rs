//! Collective operations over the ranks that jointly own a population.
//!
//! Every collective is a blocking barrier: all ranks must issue the same
//! sequence of calls or the group deadlocks. A rank that panics aborts its
//! group, after which collectives stop synchronizing and return at once.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

/// Sum, average and broadcast across all ranks.
pub trait DistributedReducer {
    /// Index of this rank in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of ranks.
    fn size(&self) -> usize;

    /// Sum `value` over all ranks; every rank receives the total.
    fn sum(&self, value: f64) -> f64;

    /// Mean of `value` over all ranks.
    fn average(&self, value: f64) -> f64 {
        self.sum(value) / self.size() as f64
    }

    /// Overwrite `data` on every rank with the contents held by `root`.
    /// All ranks must pass slices of the same length.
    fn broadcast(&self, data: &mut [f64], root: usize);

    fn broadcast_count(&self, count: usize, root: usize) -> usize {
        let mut buffer = [count as f64];
        self.broadcast(&mut buffer, root);
        buffer[0] as usize
    }

    fn is_root(&self) -> bool {
        self.rank() == 0
    }

    /// Whether another rank died. Once set, sums are NaN and broadcasts
    /// leave their data untouched.
    fn is_aborted(&self) -> bool {
        false
    }
}

/// Identity reducer for a single rank.
#[derive(Copy, Clone, Debug, Default)]
pub struct SingleProcess;

impl DistributedReducer for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn sum(&self, value: f64) -> f64 {
        value
    }

    fn average(&self, value: f64) -> f64 {
        value
    }

    fn broadcast(&self, _data: &mut [f64], _root: usize) {}
}

#[derive(Default)]
struct BarrierState {
    arrived: usize,
    generation: usize,
    aborted: bool,
}

struct Shared {
    size: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
    slots: Mutex<Vec<Vec<f64>>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until every rank arrives. Returns false if the group was
    /// aborted before this generation completed.
    fn wait(&self) -> bool {
        let mut state = self.state();
        if state.aborted {
            return false;
        }
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.size {
            state.arrived = 0;
            state.generation = generation.wrapping_add(1);
            self.released.notify_all();
            return true;
        }
        let state = self
            .released
            .wait_while(state, |s| s.generation == generation && !s.aborted)
            .unwrap_or_else(PoisonError::into_inner);
        state.generation != generation
    }

    fn abort(&self) {
        self.state().aborted = true;
        self.released.notify_all();
    }
}

/// Builds a set of in-process ranks, one per thread.
pub struct ThreadGroup;

impl ThreadGroup {
    /// Create `size` connected rank handles. Each handle must be moved to its
    /// own thread before any collective is issued.
    pub fn new(size: usize) -> Vec<ThreadRank> {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            size,
            state: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
            slots: Mutex::new(vec![Vec::new(); size]),
        });
        (0..size)
            .map(|rank| ThreadRank {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

/// One rank of a [`ThreadGroup`].
pub struct ThreadRank {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

impl ThreadRank {
    fn with_slots<T>(&self, f: impl FnOnce(&mut Vec<Vec<f64>>) -> T) -> T {
        let mut slots = self
            .shared
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut slots)
    }
}

impl DistributedReducer for ThreadRank {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn sum(&self, value: f64) -> f64 {
        self.with_slots(|slots| slots[self.rank] = vec![value]);
        if !self.shared.wait() {
            return f64::NAN;
        }
        // Summed in rank order so every rank sees a bit-identical total.
        let total = self.with_slots(|slots| slots.iter().map(|s| s[0]).sum());
        self.shared.wait();
        total
    }

    fn broadcast(&self, data: &mut [f64], root: usize) {
        if self.rank == root {
            self.with_slots(|slots| slots[root] = data.to_vec());
        }
        if !self.shared.wait() {
            return;
        }
        if self.rank != root {
            self.with_slots(|slots| data.copy_from_slice(&slots[root]));
        }
        self.shared.wait();
    }

    fn is_aborted(&self) -> bool {
        self.shared.state().aborted
    }
}

impl Drop for ThreadRank {
    fn drop(&mut self) {
        if thread::panicking() {
            self.shared.abort();
        }
    }
}
