use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tinglemap_shared::{Bounds, SquareGrid, SquareId};

/// Record of a square whose layer loads have all settled.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Layers that are actually on the map; failed layers are absent.
    pub layers: Vec<String>,
    pub preview: bool,
    pub loaded_at: DateTime<Utc>,
}

/// Loaded squares. A square is loaded exactly when it has an entry here.
#[derive(Debug, Default)]
pub struct SquareCache {
    entries: HashMap<SquareId, CacheEntry>,
}

impl SquareCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: SquareId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: SquareId) -> Option<&CacheEntry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: SquareId) -> Option<&mut CacheEntry> {
        self.entries.get_mut(&id)
    }

    pub fn insert(&mut self, id: SquareId, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(id, entry)
    }

    pub fn remove(&mut self, id: SquareId) -> Option<CacheEntry> {
        self.entries.remove(&id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Loaded square ids in grid order.
    pub fn loaded_squares(&self) -> Vec<SquareId> {
        let mut ids: Vec<SquareId> = self.entries.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Loaded squares still showing preview imagery, in grid order.
    pub fn preview_squares(&self) -> Vec<SquareId> {
        let mut ids: Vec<SquareId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.preview)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Squares to evict so the cache gets back to `softcap`.
    ///
    /// Squares intersecting `viewport` are never candidates, so the result can
    /// leave the cache above the cap. Farthest from the viewport center goes
    /// first, then the oldest.
    pub fn plan_evictions(&self, grid: &SquareGrid, viewport: &Bounds, softcap: usize) -> Vec<SquareId> {
        let excess = self.entries.len().saturating_sub(softcap);
        if excess == 0 {
            return Vec::new();
        }

        let center = viewport.center();
        let mut candidates: Vec<(SquareId, f64, DateTime<Utc>)> = self
            .entries
            .iter()
            .filter(|(id, _)| !grid.square_bounds(**id).intersects(viewport))
            .map(|(id, entry)| (*id, grid.distance_to_point(*id, center), entry.loaded_at))
            .collect();

        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.2.cmp(&b.2))
                .then_with(|| a.0.cmp(&b.0))
        });

        candidates.into_iter().take(excess).map(|(id, _, _)| id).collect()
    }
}
