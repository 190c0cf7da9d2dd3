//! Spatial partitioning for broad-phase collision queries.
//!
//! A fixed uniform grid over the world. Each cell bucket is a set of body
//! ids behind its own lock, and a sharded reverse map records which cells
//! each body occupies, so moving or removing a body only touches the cells
//! it actually spans.
//!
//! ## Concurrency
//! - No global lock. Writers for a given id are serialized by the id's
//!   shard lock; bucket locks are taken one at a time beneath it.
//! - Queries are weakly consistent: they may see a body mid-move but never
//!   a torn bucket.

use crate::components::BodyId;
use crate::error::{Result, SimError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

const REVERSE_SHARDS: usize = 64;

/// Axis-aligned bounding box in world units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Aabb {
    pub fn new(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Self {
        Self { min_x, max_x, min_y, max_y }
    }

    /// Square box of half-extent `radius` centred on a point.
    pub fn around(x: f64, y: f64, radius: f64) -> Self {
        Self::new(x - radius, x + radius, y - radius, y + radius)
    }
}

/// Occupancy summary of the grid. Diagnostic only; scans every cell.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GridStatistics {
    pub non_empty_cells: usize,
    pub empty_cells: usize,
    pub avg_bodies_per_non_empty_cell: f64,
    pub max_bodies_in_cell: usize,
    /// Sum over cells of n*(n-1)/2: the broad-phase pair workload.
    pub candidate_pairs: u64,
    pub cell_size: f64,
    pub cells_x: usize,
    pub cells_y: usize,
    pub max_cells_per_body: usize,
}

/// Uniform grid mapping world regions to body ids.
pub struct SpatialGrid {
    cell_size: f64,
    cells_x: usize,
    cells_y: usize,
    max_cells_per_body: usize,
    buckets: Vec<RwLock<HashSet<BodyId>>>,
    /// Reverse lookup: body to the sorted list of cells it occupies.
    reverse: Vec<Mutex<HashMap<BodyId, Vec<usize>>>>,
}

impl SpatialGrid {
    /// Create a grid covering `width` x `height` with square cells.
    pub fn new(width: f64, height: f64, cell_size: f64, max_cells_per_body: usize) -> Result<Self> {
        if !(width > 0.0 && height > 0.0 && cell_size > 0.0) {
            return Err(SimError::InvalidConfig(format!(
                "grid needs positive dimensions, got {width}x{height} with cell {cell_size}"
            )));
        }
        if max_cells_per_body == 0 {
            return Err(SimError::InvalidConfig("max_cells_per_body must be at least 1".into()));
        }

        let cells_x = (width / cell_size).ceil().max(1.0) as usize;
        let cells_y = (height / cell_size).ceil().max(1.0) as usize;
        let buckets = (0..cells_x * cells_y)
            .map(|_| RwLock::new(HashSet::new()))
            .collect();
        let reverse = (0..REVERSE_SHARDS).map(|_| Mutex::new(HashMap::new())).collect();

        Ok(Self {
            cell_size,
            cells_x,
            cells_y,
            max_cells_per_body,
            buckets,
            reverse,
        })
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.cells_x, self.cells_y)
    }

    pub fn max_cells_per_body(&self) -> usize {
        self.max_cells_per_body
    }

    #[inline]
    fn shard(&self, id: BodyId) -> &Mutex<HashMap<BodyId, Vec<usize>>> {
        &self.reverse[(id.0 as usize) % REVERSE_SHARDS]
    }

    #[inline]
    fn clamp_cell(&self, coord: f64, cells: usize) -> usize {
        let c = (coord / self.cell_size).floor();
        if c.is_nan() || c < 0.0 {
            0
        } else {
            (c as usize).min(cells - 1)
        }
    }

    /// Cell index for a world point, clamped into the grid.
    #[inline]
    pub fn cell_index(&self, x: f64, y: f64) -> usize {
        let cx = self.clamp_cell(x, self.cells_x);
        let cy = self.clamp_cell(y, self.cells_y);
        cy * self.cells_x + cx
    }

    /// Inclusive clamped cell range covered by a box.
    fn cell_range(&self, aabb: &Aabb) -> (usize, usize, usize, usize) {
        (
            self.clamp_cell(aabb.min_x, self.cells_x),
            self.clamp_cell(aabb.max_x, self.cells_x),
            self.clamp_cell(aabb.min_y, self.cells_y),
            self.clamp_cell(aabb.max_y, self.cells_y),
        )
    }

    /// Fill `out` with the sorted cell indices a box overlaps.
    ///
    /// Fails when the box spans more than `max_cells_per_body` cells.
    fn compute_cells(&self, aabb: &Aabb, out: &mut Vec<usize>) -> Result<()> {
        let (x0, x1, y0, y1) = self.cell_range(aabb);
        let needed = (x1 - x0 + 1) * (y1 - y0 + 1);
        if needed > self.max_cells_per_body {
            return Err(SimError::CellBufferOverflow {
                needed,
                capacity: self.max_cells_per_body,
            });
        }

        out.clear();
        // Row-major walk keeps the list sorted for the diff in `upsert`
        for cy in y0..=y1 {
            let row = cy * self.cells_x;
            for cx in x0..=x1 {
                out.push(row + cx);
            }
        }
        Ok(())
    }

    #[inline]
    fn bucket_insert(&self, cell: usize, id: BodyId) {
        self.buckets[cell].write().insert(id);
    }

    #[inline]
    fn bucket_remove(&self, cell: usize, id: BodyId) {
        self.buckets[cell].write().remove(&id);
    }

    /// Insert or move a body.
    ///
    /// `scratch` is a caller-owned buffer reused across calls to avoid
    /// allocating on every tick.
    pub fn upsert(&self, id: BodyId, aabb: Aabb, scratch: &mut Vec<usize>) -> Result<()> {
        self.compute_cells(&aabb, scratch)?;

        let mut shard = self.shard(id).lock();
        if !shard.contains_key(&id) {
            for &cell in scratch.iter() {
                self.bucket_insert(cell, id);
            }
            shard.insert(id, scratch.clone());
            return Ok(());
        }
        let Some(old) = shard.get_mut(&id) else {
            return Ok(());
        };

        if old.as_slice() == scratch.as_slice() {
            return Ok(());
        }

        if scratch.len() < 3 {
            for &cell in old.iter() {
                self.bucket_remove(cell, id);
            }
            for &cell in scratch.iter() {
                self.bucket_insert(cell, id);
            }
        } else {
            // Both lists are sorted: merge-walk them and touch only the
            // cells that changed.
            let (mut i, mut j) = (0, 0);
            while i < old.len() || j < scratch.len() {
                match (old.get(i), scratch.get(j)) {
                    (Some(&a), Some(&b)) if a == b => {
                        i += 1;
                        j += 1;
                    }
                    (Some(&a), Some(&b)) if a < b => {
                        self.bucket_remove(a, id);
                        i += 1;
                    }
                    (Some(_), Some(&b)) => {
                        self.bucket_insert(b, id);
                        j += 1;
                    }
                    (Some(&a), None) => {
                        self.bucket_remove(a, id);
                        i += 1;
                    }
                    (None, Some(&b)) => {
                        self.bucket_insert(b, id);
                        j += 1;
                    }
                    (None, None) => break,
                }
            }
        }

        old.clear();
        old.extend_from_slice(scratch);
        Ok(())
    }

    /// Remove a body from every cell it occupies. Unknown ids are ignored.
    pub fn remove(&self, id: BodyId) {
        let mut shard = self.shard(id).lock();
        if let Some(cells) = shard.remove(&id) {
            for cell in cells {
                self.bucket_remove(cell, id);
            }
        }
    }

    /// Ids sharing at least one cell with `id`, excluding `id` itself.
    ///
    /// Bodies spanning several shared cells appear once per cell; callers
    /// dedupe. `out` is cleared first.
    pub fn query_collision_candidates(&self, id: BodyId, out: &mut Vec<BodyId>) {
        out.clear();
        let shard = self.shard(id).lock();
        let Some(cells) = shard.get(&id) else {
            return;
        };
        for &cell in cells {
            let bucket = self.buckets[cell].read();
            out.extend(bucket.iter().copied().filter(|&other| other != id));
        }
    }

    /// All ids occupying any cell that overlaps `aabb`, deduplicated.
    ///
    /// Unlike `upsert`, the region is not bounded by `max_cells_per_body`.
    pub fn query_region(&self, aabb: Aabb, out: &mut Vec<BodyId>) {
        out.clear();
        let (x0, x1, y0, y1) = self.cell_range(&aabb);
        for cy in y0..=y1 {
            for cx in x0..=x1 {
                let bucket = self.buckets[cy * self.cells_x + cx].read();
                out.extend(bucket.iter().copied());
            }
        }
        out.sort_unstable();
        out.dedup();
    }

    /// Cells a body currently occupies (empty if untracked).
    pub fn cells_of(&self, id: BodyId) -> Vec<usize> {
        self.shard(id).lock().get(&id).cloned().unwrap_or_default()
    }

    pub fn contains(&self, id: BodyId) -> bool {
        self.shard(id).lock().contains_key(&id)
    }

    /// Whether a given bucket holds `id`.
    pub fn bucket_contains(&self, cell: usize, id: BodyId) -> bool {
        self.buckets
            .get(cell)
            .map(|b| b.read().contains(&id))
            .unwrap_or(false)
    }

    /// Number of bodies with a reverse-map entry.
    pub fn tracked_count(&self) -> usize {
        self.reverse.iter().map(|s| s.lock().len()).sum()
    }

    /// Scan all buckets and summarize occupancy.
    pub fn statistics(&self) -> GridStatistics {
        let mut stats = GridStatistics {
            cell_size: self.cell_size,
            cells_x: self.cells_x,
            cells_y: self.cells_y,
            max_cells_per_body: self.max_cells_per_body,
            ..Default::default()
        };

        let mut total = 0usize;
        for bucket in &self.buckets {
            let n = bucket.read().len();
            if n == 0 {
                stats.empty_cells += 1;
                continue;
            }
            stats.non_empty_cells += 1;
            total += n;
            stats.max_bodies_in_cell = stats.max_bodies_in_cell.max(n);
            stats.candidate_pairs += (n as u64) * (n as u64 - 1) / 2;
        }
        if stats.non_empty_cells > 0 {
            stats.avg_bodies_per_non_empty_cell = total as f64 / stats.non_empty_cells as f64;
        }
        stats
    }
}
