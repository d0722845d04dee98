use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tinglemap_shared::SquareId;

const FAILURE_RING_CAPACITY: usize = 32;

/// A layer fetch that was abandoned.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerFailure {
    pub square: SquareId,
    pub layer: String,
    pub url: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct LoaderMetrics {
    reconciliations_total: AtomicU64,
    batches_total: AtomicU64,
    batch_squares_total: AtomicU64,
    batch_millis_total: AtomicU64,
    last_batch_millis: AtomicU64,
    squares_loaded_total: AtomicU64,
    layers_loaded_total: AtomicU64,
    layer_failures_total: AtomicU64,
    squares_unloaded_total: AtomicU64,
    squares_evicted_total: AtomicU64,
    stale_loads_total: AtomicU64,
    crossfades_total: AtomicU64,
    crossfade_failures_total: AtomicU64,
    manifest_failures_total: AtomicU64,
    recent_failures: Mutex<VecDeque<LayerFailure>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub reconciliations_total: u64,
    pub batches_total: u64,
    pub batch_squares_total: u64,
    pub batch_millis_total: u64,
    pub last_batch_millis: u64,
    pub squares_loaded_total: u64,
    pub layers_loaded_total: u64,
    pub layer_failures_total: u64,
    pub squares_unloaded_total: u64,
    pub squares_evicted_total: u64,
    pub stale_loads_total: u64,
    pub crossfades_total: u64,
    pub crossfade_failures_total: u64,
    pub manifest_failures_total: u64,
}

impl MetricsSnapshot {
    pub fn average_batch_millis(&self) -> f64 {
        if self.batches_total == 0 {
            return 0.0;
        }
        self.batch_millis_total as f64 / self.batches_total as f64
    }
}

impl LoaderMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reconciliations_total: self.reconciliations_total.load(Ordering::Relaxed),
            batches_total: self.batches_total.load(Ordering::Relaxed),
            batch_squares_total: self.batch_squares_total.load(Ordering::Relaxed),
            batch_millis_total: self.batch_millis_total.load(Ordering::Relaxed),
            last_batch_millis: self.last_batch_millis.load(Ordering::Relaxed),
            squares_loaded_total: self.squares_loaded_total.load(Ordering::Relaxed),
            layers_loaded_total: self.layers_loaded_total.load(Ordering::Relaxed),
            layer_failures_total: self.layer_failures_total.load(Ordering::Relaxed),
            squares_unloaded_total: self.squares_unloaded_total.load(Ordering::Relaxed),
            squares_evicted_total: self.squares_evicted_total.load(Ordering::Relaxed),
            stale_loads_total: self.stale_loads_total.load(Ordering::Relaxed),
            crossfades_total: self.crossfades_total.load(Ordering::Relaxed),
            crossfade_failures_total: self.crossfade_failures_total.load(Ordering::Relaxed),
            manifest_failures_total: self.manifest_failures_total.load(Ordering::Relaxed),
        }
    }

    /// Most recent layer failures, oldest first.
    pub fn recent_failures(&self) -> Vec<LayerFailure> {
        match self.recent_failures.lock() {
            Ok(ring) => ring.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn record_reconciliation(&self) {
        self.reconciliations_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self, squares: usize, elapsed: Duration) {
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.batches_total.fetch_add(1, Ordering::Relaxed);
        self.batch_squares_total
            .fetch_add(squares as u64, Ordering::Relaxed);
        self.batch_millis_total.fetch_add(millis, Ordering::Relaxed);
        self.last_batch_millis.store(millis, Ordering::Relaxed);
    }

    pub fn record_square_loaded(&self) {
        self.squares_loaded_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_layer_loaded(&self) {
        self.layers_loaded_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_layer_failure(&self, failure: LayerFailure) {
        self.layer_failures_total.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut ring) = self.recent_failures.lock() {
            if ring.len() == FAILURE_RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(failure);
        }
    }

    pub fn record_unloaded(&self) {
        self.squares_unloaded_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self) {
        self.squares_evicted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_load(&self) {
        self.stale_loads_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_crossfade(&self) {
        self.crossfades_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_crossfade_failure(&self) {
        self.crossfade_failures_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_manifest_failure(&self) {
        self.manifest_failures_total
            .fetch_add(1, Ordering::Relaxed);
    }
}
