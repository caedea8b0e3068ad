//! The iteration timeline and per-client watermarks.
//!
//! Every accepted mutation appends one entry, so iteration ids and history
//! entries are in bijection: the deque always covers `(last_cut, iteration]`.
//! A client's watermark is the greatest iteration it has acknowledged;
//! compaction is gated on the minimum watermark across all clients, so an
//! entry is never dropped before everyone has had a chance to observe it.

use std::cmp::Reverse;
use std::collections::hash_map::Entry;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use tracing::{debug, trace, warn};

use cellsync_common::{Cell, ClientId, DeltaBatch, Insertion, IterationId, Modification};

use crate::sequence::Sequence;

/// Append-only log of modifications plus the watermark bookkeeping that
/// decides how far it may be cut.
pub struct HistoryLog {
    /// Entries for iterations `(last_cut, iteration]`, oldest first.
    entries: VecDeque<Modification>,
    last_cut: IterationId,
    iteration: IterationId,
    watermarks: HashMap<ClientId, IterationId>,
    /// Min-heap over `(watermark, client)`. Entries go stale when a client
    /// advances; they are discarded lazily when the minimum is queried.
    by_watermark: BinaryHeap<Reverse<(IterationId, ClientId)>>,
}

impl HistoryLog {
    pub fn new() -> Self {
        HistoryLog {
            entries: VecDeque::new(),
            last_cut: 0,
            iteration: 0,
            watermarks: HashMap::new(),
            by_watermark: BinaryHeap::new(),
        }
    }

    pub fn iteration(&self) -> IterationId {
        self.iteration
    }

    /// Number of entries not yet compacted.
    pub fn retained(&self) -> usize {
        self.entries.len()
    }

    pub fn watermark(&self, client: ClientId) -> IterationId {
        self.watermarks.get(&client).copied().unwrap_or(0)
    }

    /// Advance the iteration and append the entry produced by an accepted
    /// mutation, taking references on every cell the entry names so the
    /// sequence keeps them resolvable until the entry is compacted.
    pub fn record(&mut self, entry: Modification, sequence: &mut Sequence) {
        match entry {
            Modification::Update { cell } => sequence.acquire(cell.id),
            Modification::Insert { near, cell } => {
                sequence.acquire(near);
                sequence.acquire(cell.id);
            }
            Modification::Delete { id } => sequence.acquire(id),
        }
        self.iteration += 1;
        self.entries.push_back(entry);
        trace!(iteration = self.iteration, ?entry, "recorded");
    }

    /// First contact with a client: its watermark starts at 0, which pins
    /// compaction until the client has loaded state.
    pub fn register(&mut self, client: ClientId) {
        if self.watermarks.insert(client, 0).is_none() {
            self.by_watermark.push(Reverse((0, client)));
            debug!(client, "registered client");
        }
    }

    /// Move a client's watermark to `seen`. Watermarks never move backwards
    /// and never beyond the current iteration; anything else is clamped.
    pub fn advance(&mut self, client: ClientId, seen: IterationId) {
        let seen = seen.min(self.iteration);
        match self.watermarks.entry(client) {
            Entry::Occupied(mut entry) => {
                if seen > *entry.get() {
                    entry.insert(seen);
                    self.by_watermark.push(Reverse((seen, client)));
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(seen);
                self.by_watermark.push(Reverse((seen, client)));
            }
        }
    }

    /// The smallest watermark across all clients, or the current iteration
    /// when no client is registered. Stale heap entries are popped here.
    pub fn min_watermark(&mut self) -> IterationId {
        while let Some(&Reverse((watermark, client))) = self.by_watermark.peek() {
            if self.watermarks.get(&client) == Some(&watermark) {
                return watermark;
            }
            self.by_watermark.pop();
        }
        self.iteration
    }

    /// Drain every entry at iterations up to the minimum watermark,
    /// returning the references the entries held to the sequence. Delete
    /// entries additionally mark their target reclaimable; the refcounts
    /// guarantee a tombstone outlives every remaining entry naming it, so
    /// the drain order within the batch does not matter. Idempotent.
    pub fn compact(&mut self, sequence: &mut Sequence) {
        let cut = self.min_watermark();
        if cut <= self.last_cut {
            return;
        }
        let drain = (cut - self.last_cut) as usize;
        debug_assert!(
            drain <= self.entries.len(),
            "compaction cut {cut} runs past the retained history"
        );
        for _ in 0..drain {
            let Some(entry) = self.entries.pop_front() else {
                break;
            };
            match entry {
                Modification::Update { cell } => sequence.release(cell.id),
                Modification::Insert { near, cell } => {
                    sequence.release(near);
                    sequence.release(cell.id);
                }
                Modification::Delete { id } => {
                    sequence.mark_reclaimable(id);
                    sequence.release(id);
                }
            }
        }
        self.last_cut = cut;
        debug!(cut, retained = self.entries.len(), "compacted history");
    }

    /// The deltas `client` has not acknowledged, as three ordered streams.
    ///
    /// Updates ship the cell's current value (a later update in the same
    /// batch supersedes the recorded one either way). Inserts ship their
    /// anchor rewritten to the inserted cell's current nearest live
    /// predecessor: the recorded anchor may be tombstoned or long gone
    /// from the client's view, while every cell between the rewritten
    /// anchor and the inserted cell is a tombstone whose delete ships in
    /// this batch or already did, so applying inserts before deletes makes
    /// the rewritten anchor exact.
    pub fn deltas_for(&self, client: ClientId, sequence: &Sequence) -> DeltaBatch {
        let watermark = self.watermark(client);
        let mut batch = DeltaBatch::at(self.iteration);
        if watermark >= self.iteration {
            return batch;
        }
        let missing = self.iteration - watermark;
        if missing > self.entries.len() as u64 {
            // Compaction is gated on the minimum watermark, so this only
            // fires for a client that never loaded state; it has to.
            warn!(
                client,
                watermark,
                iteration = self.iteration,
                "history no longer reaches back to this client, forcing a reload"
            );
            return batch;
        }
        let begin = (watermark - self.last_cut) as usize;
        for entry in self.entries.iter().skip(begin) {
            match *entry {
                Modification::Update { cell } => {
                    let value = sequence.current_value(cell.id).unwrap_or(cell.value);
                    batch.updates.push(Cell::new(cell.id, value));
                }
                Modification::Insert { near, cell } => {
                    let near = sequence.nearest_live_before(cell.id).unwrap_or(near);
                    batch.inserts.push(Insertion { near, cell });
                }
                Modification::Delete { id } => batch.deletes.push(id),
            }
        }
        batch
    }
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new()
    }
}
