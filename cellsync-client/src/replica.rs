//! Delta reconciliation and snapshot checking, independent of the store
//! variant underneath.

use std::collections::{HashMap, VecDeque};

use rand::Rng;
use tracing::{debug, trace};

use cellsync_common::{
    Cell, CellId, DeltaBatch, Insertion, IterationId, Response, Value, HEAD_CELL_ID,
};

use crate::store::CellStore;

/// The replica drifted from a server snapshot. This is a bug, not a
/// recoverable condition; the client aborts on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DivergedError {
    #[error("replica holds {local} cells, server snapshot holds {server}")]
    Length { local: usize, server: usize },
    #[error("cell mismatch at position {index}: local {local}, server {server}")]
    Cell {
        index: usize,
        local: Cell,
        server: Cell,
    },
}

/// A local copy of the server's ordered sequence, kept current by delta
/// batches.
///
/// Batches may reference cells this replica has not materialized yet (its
/// watermark trails the server's timeline, and anchors are rewritten
/// server-side against a newer view): an insert whose anchor is missing is
/// parked in a pending queue keyed by that anchor and drained, recursively,
/// the moment the anchor appears; an update for a missing cell is parked
/// the same way. Deletes of cells never materialized just drop whatever is
/// parked for them.
pub struct Replica<S> {
    store: S,
    iteration: IterationId,
    loaded: bool,
    /// Inserts waiting for their anchor, keyed by the missing cell id.
    pending_inserts: HashMap<CellId, VecDeque<Insertion>>,
    /// Updates that raced ahead of their cell's insert.
    pending_updates: HashMap<CellId, Value>,
}

impl<S: CellStore> Replica<S> {
    pub fn new(store: S) -> Self {
        Replica {
            store,
            iteration: 0,
            loaded: false,
            pending_inserts: HashMap::new(),
            pending_updates: HashMap::new(),
        }
    }

    /// The greatest server iteration this replica has applied; piggy-backed
    /// on every request.
    pub fn iteration(&self) -> IterationId {
        self.iteration
    }

    /// Whether a first snapshot has been applied.
    pub fn loaded(&self) -> bool {
        self.loaded
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn cells(&self) -> Vec<Cell> {
        self.store.cells()
    }

    /// Number of inserts still waiting for an anchor.
    pub fn pending(&self) -> usize {
        self.pending_inserts.values().map(VecDeque::len).sum()
    }

    /// Apply a response of any kind. `check` makes snapshot responses
    /// assert convergence instead of silently adopting the server state.
    pub fn apply_response(&mut self, response: &Response, check: bool) -> Result<(), DivergedError> {
        match response {
            Response::State { cells, deltas } => self.apply_snapshot(cells, deltas, check),
            other => {
                self.apply_deltas(other.deltas());
                Ok(())
            }
        }
    }

    /// Apply one delta batch: inserts first, then updates, then deletes.
    ///
    /// The order matters. Inserts may be anchored at cells this very batch
    /// deletes, so deletes must run last; updates may target cells this
    /// very batch inserts, so inserts run first.
    pub fn apply_deltas(&mut self, batch: &DeltaBatch) {
        for insertion in &batch.inserts {
            self.place_or_park(*insertion);
        }
        for cell in &batch.updates {
            if !self.store.set_value(cell.id, cell.value) {
                trace!(id = cell.id, "update raced its insert, parking");
                self.pending_updates.insert(cell.id, cell.value);
            }
        }
        for &id in &batch.deletes {
            self.remove(id);
        }
        self.iteration = self.iteration.max(batch.iteration);
    }

    /// Handle a full snapshot. The first one initializes the replica
    /// verbatim; later ones apply the piggy-backed deltas first and then
    /// either verify convergence cell-by-cell (`check`) or adopt the
    /// snapshot as authoritative.
    pub fn apply_snapshot(
        &mut self,
        cells: &[Cell],
        deltas: &DeltaBatch,
        check: bool,
    ) -> Result<(), DivergedError> {
        if !self.loaded {
            debug!(cells = cells.len(), iteration = deltas.iteration, "initial snapshot");
            self.store.reset(cells.to_vec());
            self.pending_inserts.clear();
            self.pending_updates.clear();
            self.loaded = true;
            self.iteration = deltas.iteration;
            return Ok(());
        }
        self.apply_deltas(deltas);
        if check {
            self.verify(cells)
        } else {
            // Adopt the snapshot as authoritative; anything still parked
            // predates it and is void.
            self.store.reset(cells.to_vec());
            self.pending_inserts.clear();
            self.pending_updates.clear();
            Ok(())
        }
    }

    fn verify(&self, cells: &[Cell]) -> Result<(), DivergedError> {
        let local = self.store.cells();
        if local.len() != cells.len() {
            return Err(DivergedError::Length {
                local: local.len(),
                server: cells.len(),
            });
        }
        for (index, (mine, theirs)) in local.iter().zip(cells).enumerate() {
            if mine != theirs {
                return Err(DivergedError::Cell {
                    index,
                    local: *mine,
                    server: *theirs,
                });
            }
        }
        Ok(())
    }

    fn place_or_park(&mut self, insertion: Insertion) {
        if self.store.contains(insertion.cell.id) {
            // Redelivery; the cell is already placed.
            return;
        }
        if insertion.near == HEAD_CELL_ID || self.store.contains(insertion.near) {
            self.place(insertion);
        } else {
            trace!(
                near = insertion.near,
                id = insertion.cell.id,
                "anchor not materialized yet, parking insert"
            );
            self.pending_inserts
                .entry(insertion.near)
                .or_default()
                .push_back(insertion);
        }
    }

    /// Splice a cell whose anchor is present, then drain everything that
    /// was waiting on the cells this makes available.
    fn place(&mut self, insertion: Insertion) {
        let placed = self.store.insert_after(insertion.near, insertion.cell);
        debug_assert!(placed, "anchor {} vanished mid-batch", insertion.near);
        let mut unlocked = vec![insertion.cell.id];
        while let Some(id) = unlocked.pop() {
            if let Some(value) = self.pending_updates.remove(&id) {
                self.store.set_value(id, value);
            }
            if let Some(parked) = self.pending_inserts.remove(&id) {
                for insertion in parked {
                    if self.store.insert_after(insertion.near, insertion.cell) {
                        unlocked.push(insertion.cell.id);
                    }
                }
            }
        }
    }

    fn remove(&mut self, id: CellId) {
        if self.store.remove(id) {
            return;
        }
        // Never materialized here; whatever was parked for it dies with it.
        trace!(id, "delete of an unmaterialized cell");
        self.pending_updates.remove(&id);
        for parked in self.pending_inserts.values_mut() {
            parked.retain(|insertion| insertion.cell.id != id);
        }
        self.pending_inserts.retain(|_, parked| !parked.is_empty());
    }

    /// Uniform pick over the cells for an update; None on an empty replica.
    pub fn pick_update<R: Rng>(&self, rng: &mut R) -> Option<(CellId, Value)> {
        let cell = self.pick_cell(rng)?;
        Some((cell.id, rng.random()))
    }

    /// Uniform pick over head-or-any-cell for an insertion anchor.
    pub fn pick_insert_anchor<R: Rng>(&self, rng: &mut R) -> CellId {
        let slot = rng.random_range(0..=self.store.len());
        if slot == 0 {
            HEAD_CELL_ID
        } else {
            self.store
                .get(slot - 1)
                .map_or(HEAD_CELL_ID, |cell| cell.id)
        }
    }

    /// Uniform pick over the cells for a deletion; None on an empty replica.
    pub fn pick_delete<R: Rng>(&self, rng: &mut R) -> Option<CellId> {
        Some(self.pick_cell(rng)?.id)
    }

    fn pick_cell<R: Rng>(&self, rng: &mut R) -> Option<Cell> {
        if self.store.is_empty() {
            return None;
        }
        self.store.get(rng.random_range(0..self.store.len()))
    }
}
