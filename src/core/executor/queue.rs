//! Priority queue for pending runs
//!
//! Ordering is priority, then category rank, then arrival sequence. One
//! lock guards the heap; the critical section is an insert or a pop plus
//! heap fix.

use crate::core::model::Category;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::time::Duration;

/// One run waiting for dispatch
#[derive(Debug, Clone)]
pub struct QueuedRun {
    pub run_id: String,
    pub scraper_id: String,
    pub priority: i32,
    pub category: Category,
    pub seq: u64,
    pub session_id: Option<String>,
    pub timeout: Duration,
    pub max_records: usize,
    pub max_attempts: u32,
}

impl PartialEq for QueuedRun {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedRun {}

impl Ord for QueuedRun {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the smallest tuple pops first
        (other.priority, other.category.rank(), other.seq).cmp(&(
            self.priority,
            self.category.rank(),
            self.seq,
        ))
    }
}

impl PartialOrd for QueuedRun {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Mutex-guarded binary heap
#[derive(Debug, Default)]
pub struct RunQueue {
    heap: Mutex<BinaryHeap<QueuedRun>>,
}

impl RunQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, run: QueuedRun) {
        self.heap.lock().expect("queue lock").push(run);
    }

    /// Pop the best run whose category currently has capacity
    ///
    /// Runs in saturated categories are skipped and put back, so a full
    /// municipal tier does not block a waiting parliamentary run behind it
    /// and vice versa.
    pub fn pop_dispatchable(&self, has_capacity: impl Fn(Category) -> bool) -> Option<QueuedRun> {
        let mut heap = self.heap.lock().expect("queue lock");
        let mut skipped = Vec::new();
        let mut picked = None;

        while let Some(candidate) = heap.pop() {
            if has_capacity(candidate.category) {
                picked = Some(candidate);
                break;
            }
            skipped.push(candidate);
        }

        for run in skipped {
            heap.push(run);
        }
        picked
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.lock().expect("queue lock").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
