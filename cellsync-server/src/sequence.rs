//! The canonical ordered cell sequence.
//!
//! Nodes live in a slot arena and form a doubly-linked list headed by a
//! permanent sentinel (cell id 0). Deletion only tombstones a node: the
//! node stays linked so that insertions anchored at it, history entries
//! naming it and delta rewrites can still reach it. Physical removal is
//! deferred until compaction has drained the node's Delete entry *and*
//! nothing points at it anymore, tracked by a per-node reference count.
//!
//! Every node carries a `near_live` hint: the node after which the next
//! insertion anchored here must land. Resolving an anchor follows the hint
//! chain to its tail (cells inserted against one anchor accumulate behind
//! it in arrival order), and every node walked on the way is rewritten to
//! point at the freshly inserted node, so chains stay short.

use std::collections::HashMap;

use slotmap::{new_key_type, SlotMap};
use tracing::{debug, trace, warn};

use cellsync_common::{Cell, CellId, Value, HEAD_CELL_ID};

new_key_type! {
    struct NodeKey;
}

#[derive(Debug)]
struct Node {
    cell: Cell,
    prev: Option<NodeKey>,
    next: Option<NodeKey>,
    /// Insertion-tail hint; `None` means inserts land right after this node.
    near_live: Option<NodeKey>,
    deleted: bool,
    /// Inbound references: history entries naming this cell plus `near_live`
    /// hints aiming here.
    refs: u32,
    /// The Delete entry for this node has been compacted; free the slot as
    /// soon as `refs` drains to zero.
    reclaimable: bool,
}

/// The server-authoritative ordered list of cells.
pub struct Sequence {
    nodes: SlotMap<NodeKey, Node>,
    by_id: HashMap<CellId, NodeKey>,
    head: NodeKey,
    next_cell_id: CellId,
}

impl Sequence {
    /// Build a sequence holding `cells` in order. Ids must be non-zero and
    /// unique; the id pool continues after the largest seeded id.
    pub fn new(cells: Vec<Cell>) -> Self {
        let mut nodes = SlotMap::with_key();
        let head = nodes.insert(Node {
            cell: Cell::new(HEAD_CELL_ID, 0),
            prev: None,
            next: None,
            near_live: None,
            deleted: false,
            refs: 0,
            reclaimable: false,
        });
        let mut by_id = HashMap::new();
        by_id.insert(HEAD_CELL_ID, head);
        let mut sequence = Sequence {
            nodes,
            by_id,
            head,
            next_cell_id: 1,
        };
        let mut tail = head;
        for cell in cells {
            debug_assert_ne!(cell.id, HEAD_CELL_ID, "cell id 0 is the sentinel");
            let node = sequence.nodes.insert(Node {
                cell,
                prev: Some(tail),
                next: None,
                near_live: None,
                deleted: false,
                refs: 0,
                reclaimable: false,
            });
            sequence.nodes[tail].next = Some(node);
            let stale = sequence.by_id.insert(cell.id, node);
            debug_assert!(stale.is_none(), "duplicate seeded cell id {}", cell.id);
            sequence.next_cell_id = sequence.next_cell_id.max(cell.id + 1);
            tail = node;
        }
        sequence
    }

    /// Set the value of a live cell. Returns false (and changes nothing)
    /// when the cell is tombstoned or unknown.
    pub fn update(&mut self, id: CellId, value: Value) -> bool {
        match self.by_id.get(&id) {
            Some(&key) if !self.nodes[key].deleted && key != self.head => {
                self.nodes[key].cell.value = value;
                trace!(id, value, "updated cell");
                true
            }
            Some(_) => {
                trace!(id, "update targets a tombstoned cell, ignoring");
                false
            }
            None => {
                warn!(id, "update targets an unknown cell, ignoring");
                false
            }
        }
    }

    /// Create a new cell "after `near`" and return `(new_id, anchor_id)`,
    /// where `anchor_id` names the node the cell was actually spliced
    /// behind (possibly a tombstone, possibly the sentinel).
    ///
    /// Resolution follows the near-live chain of the named node to its
    /// tail, so cells inserted against the same anchor keep their arrival
    /// order; the walked nodes are then compressed to point at the new
    /// node directly.
    pub fn insert_after(&mut self, near: CellId, value: Value) -> (CellId, CellId) {
        let named = match self.by_id.get(&near) {
            Some(&key) => key,
            None => {
                // The anchor was deleted and fully reclaimed; the head is
                // the nearest thing that still exists.
                warn!(near, "unknown insertion anchor, anchoring at the head");
                self.head
            }
        };
        let (tail, walked) = self.chain_tail(named);

        let id = self.next_cell_id;
        self.next_cell_id += 1;
        let cell = Cell::new(id, value);
        let after_tail = self.nodes[tail].next;
        let new = self.nodes.insert(Node {
            cell,
            prev: Some(tail),
            next: after_tail,
            near_live: None,
            deleted: false,
            refs: 0,
            reclaimable: false,
        });
        self.nodes[tail].next = Some(new);
        if let Some(next) = after_tail {
            self.nodes[next].prev = Some(new);
        }
        self.by_id.insert(id, new);
        let anchor_id = self.nodes[tail].cell.id;

        // The new node is the chain's tail now; repoint the old tail and
        // everything walked past it. Rewrites may drain the last reference
        // of a reclaimable tombstone, freeing it on the spot.
        self.point_near_live(tail, new);
        for node in walked {
            self.point_near_live(node, new);
        }
        trace!(id, near, anchor = anchor_id, "inserted cell");
        (id, anchor_id)
    }

    /// Tombstone a cell. Returns false when it is already tombstoned or
    /// unknown; the node stays linked either way.
    pub fn delete(&mut self, id: CellId) -> bool {
        match self.by_id.get(&id) {
            Some(&key) if !self.nodes[key].deleted && key != self.head => {
                self.nodes[key].deleted = true;
                trace!(id, "tombstoned cell");
                true
            }
            Some(_) => {
                trace!(id, "delete targets a tombstoned cell, ignoring");
                false
            }
            None => {
                warn!(id, "delete targets an unknown cell, ignoring");
                false
            }
        }
    }

    /// The live cells, head to tail, tombstones skipped.
    pub fn snapshot(&self) -> Vec<Cell> {
        let mut cells = Vec::new();
        let mut current = self.nodes[self.head].next;
        while let Some(key) = current {
            let node = &self.nodes[key];
            if !node.deleted {
                cells.push(node.cell);
            }
            current = node.next;
        }
        cells
    }

    pub fn current_value(&self, id: CellId) -> Option<Value> {
        let &key = self.by_id.get(&id)?;
        Some(self.nodes[key].cell.value)
    }

    /// Id of the closest live node before `id` in list order (0 when that
    /// is the sentinel). Tombstones between them are invisible to clients
    /// or about to be, which is what makes this the right anchor to ship.
    pub fn nearest_live_before(&self, id: CellId) -> Option<CellId> {
        let &key = self.by_id.get(&id)?;
        let mut current = self.nodes[key].prev;
        while let Some(prev) = current {
            let node = &self.nodes[prev];
            if !node.deleted {
                return Some(node.cell.id);
            }
            current = node.prev;
        }
        Some(HEAD_CELL_ID)
    }

    /// Whether `id` names a live (non-tombstoned) cell.
    pub fn is_live(&self, id: CellId) -> bool {
        id != HEAD_CELL_ID
            && self
                .by_id
                .get(&id)
                .is_some_and(|&key| !self.nodes[key].deleted)
    }

    /// Number of allocated nodes, sentinel and tombstones included.
    pub fn allocated(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn acquire(&mut self, id: CellId) {
        if let Some(&key) = self.by_id.get(&id) {
            self.nodes[key].refs += 1;
        }
    }

    pub(crate) fn release(&mut self, id: CellId) {
        if let Some(&key) = self.by_id.get(&id) {
            self.release_keys(vec![key]);
        }
    }

    /// The cell's Delete entry has been compacted; the slot is recycled as
    /// soon as the remaining references drain.
    pub(crate) fn mark_reclaimable(&mut self, id: CellId) {
        if let Some(&key) = self.by_id.get(&id) {
            self.nodes[key].reclaimable = true;
            let mut pending = Vec::new();
            self.reclaim_if_done(key, &mut pending);
            self.release_keys(pending);
        }
    }

    /// Follow the near-live chain from `named` to its tail. Returns the
    /// tail and the nodes walked through on the way (tail excluded).
    fn chain_tail(&self, named: NodeKey) -> (NodeKey, Vec<NodeKey>) {
        let mut walked = Vec::new();
        let mut current = named;
        while let Some(next) = self.nodes[current].near_live {
            walked.push(current);
            current = next;
        }
        (current, walked)
    }

    /// Aim `from`'s near-live hint at `to`, moving the reference it held.
    fn point_near_live(&mut self, from: NodeKey, to: NodeKey) {
        if from == to {
            return;
        }
        self.nodes[to].refs += 1;
        let old = std::mem::replace(&mut self.nodes[from].near_live, Some(to));
        if let Some(old) = old {
            self.release_keys(vec![old]);
        }
    }

    /// Drop one reference per entry in `pending`, physically freeing every
    /// node that becomes reclaimable; freeing a node queues the release of
    /// its own near-live target, so reclamation cascades iteratively.
    fn release_keys(&mut self, mut pending: Vec<NodeKey>) {
        while let Some(key) = pending.pop() {
            let node = &mut self.nodes[key];
            debug_assert!(node.refs > 0, "unbalanced release on {:?}", node.cell);
            node.refs -= 1;
            self.reclaim_if_done(key, &mut pending);
        }
    }

    fn reclaim_if_done(&mut self, key: NodeKey, pending: &mut Vec<NodeKey>) {
        {
            let node = &self.nodes[key];
            if !node.deleted || !node.reclaimable || node.refs > 0 {
                return;
            }
        }
        let node = self.nodes.remove(key).expect("reclaiming an allocated node");
        if let Some(prev) = node.prev {
            self.nodes[prev].next = node.next;
        }
        if let Some(next) = node.next {
            self.nodes[next].prev = node.prev;
        }
        self.by_id.remove(&node.cell.id);
        if let Some(target) = node.near_live {
            pending.push(target);
        }
        debug!(id = node.cell.id, "reclaimed tombstone");
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn cells(pairs: &[(CellId, Value)]) -> Vec<Cell> {
        pairs.iter().map(|&(id, value)| Cell::new(id, value)).collect()
    }

    fn seeded() -> Sequence {
        Sequence::new(cells(&[(1, 10), (2, 20), (3, 30)]))
    }

    #[test]
    fn snapshot_returns_the_seeded_order() {
        let sequence = seeded();
        assert_eq!(sequence.snapshot(), cells(&[(1, 10), (2, 20), (3, 30)]));
    }

    #[test]
    fn update_hits_live_cells_only() {
        let mut sequence = seeded();
        assert!(sequence.update(2, 99));
        assert_eq!(sequence.current_value(2), Some(99));
        assert!(sequence.delete(2));
        assert!(!sequence.update(2, 7));
        assert_eq!(sequence.current_value(2), Some(99));
        assert!(!sequence.update(77, 7));
    }

    #[test]
    fn insert_lands_right_after_a_live_anchor() {
        let mut sequence = seeded();
        let (id, anchor) = sequence.insert_after(2, 99);
        assert_eq!((id, anchor), (4, 2));
        assert_eq!(sequence.snapshot(), cells(&[(1, 10), (2, 20), (4, 99), (3, 30)]));
    }

    #[test]
    fn inserts_against_one_anchor_keep_arrival_order() {
        let mut sequence = seeded();
        sequence.insert_after(2, 91);
        sequence.insert_after(2, 92);
        sequence.insert_after(2, 93);
        assert_eq!(
            sequence.snapshot(),
            cells(&[(1, 10), (2, 20), (4, 91), (5, 92), (6, 93), (3, 30)]),
        );
    }

    #[test]
    fn insert_after_a_tombstone_continues_its_run() {
        let mut sequence = seeded();
        sequence.insert_after(2, 99); // id 4
        sequence.delete(2);
        let (id, anchor) = sequence.insert_after(2, 77);
        assert_eq!((id, anchor), (5, 4));
        assert_eq!(sequence.snapshot(), cells(&[(1, 10), (4, 99), (5, 77), (3, 30)]));
    }

    #[test]
    fn insert_after_a_bare_tombstone_takes_its_place() {
        let mut sequence = seeded();
        sequence.delete(2);
        let (id, anchor) = sequence.insert_after(2, 77);
        assert_eq!((id, anchor), (4, 2));
        assert_eq!(sequence.snapshot(), cells(&[(1, 10), (4, 77), (3, 30)]));
    }

    #[test]
    fn insert_at_the_head_uses_the_sentinel() {
        let mut sequence = seeded();
        let (id, anchor) = sequence.insert_after(HEAD_CELL_ID, 5);
        assert_eq!((id, anchor), (4, HEAD_CELL_ID));
        assert_eq!(
            sequence.snapshot(),
            cells(&[(4, 5), (1, 10), (2, 20), (3, 30)]),
        );
    }

    #[test]
    fn unknown_anchor_falls_back_to_the_head() {
        let mut sequence = seeded();
        let (_, anchor) = sequence.insert_after(404, 1);
        assert_eq!(anchor, HEAD_CELL_ID);
        assert_eq!(sequence.snapshot()[0], Cell::new(4, 1));
    }

    #[test]
    fn nearest_live_before_skips_tombstones() {
        let mut sequence = seeded();
        sequence.delete(2);
        assert_eq!(sequence.nearest_live_before(3), Some(1));
        sequence.delete(1);
        assert_eq!(sequence.nearest_live_before(3), Some(HEAD_CELL_ID));
        assert_eq!(sequence.nearest_live_before(404), None);
    }

    #[test]
    fn tombstones_are_reclaimed_once_unreferenced() {
        let mut sequence = seeded();
        assert_eq!(sequence.allocated(), 4); // sentinel + 3 cells
        sequence.delete(2);
        sequence.mark_reclaimable(2);
        assert_eq!(sequence.allocated(), 3);
        assert_eq!(sequence.current_value(2), None);
        assert_eq!(sequence.snapshot(), cells(&[(1, 10), (3, 30)]));
    }

    #[test]
    fn a_referenced_tombstone_outlives_its_delete() {
        let mut sequence = seeded();
        sequence.acquire(2); // a history entry still names cell 2
        sequence.delete(2);
        sequence.mark_reclaimable(2);
        assert_eq!(sequence.allocated(), 4);
        sequence.release(2);
        assert_eq!(sequence.allocated(), 3);
    }

    #[test]
    fn reclaiming_a_chain_tail_cascades() {
        let mut sequence = seeded();
        sequence.insert_after(2, 99); // id 4; 2 -> 4
        sequence.delete(4);
        sequence.delete(2);
        // Cell 2 still aims its hint at 4, so 4 must survive 2.
        sequence.mark_reclaimable(4);
        assert_eq!(sequence.allocated(), 5);
        // Freeing 2 drops the last reference on 4 and both slots recycle.
        sequence.mark_reclaimable(2);
        assert_eq!(sequence.allocated(), 3);
        assert_eq!(sequence.snapshot(), cells(&[(1, 10), (3, 30)]));
    }

    #[test]
    fn repeated_inserts_walk_and_compress_the_chain() {
        let mut sequence = seeded();
        sequence.insert_after(2, 91); // id 4; chain 2 -> 4
        let (id, anchor) = sequence.insert_after(2, 92); // walks 2 -> 4
        assert_eq!((id, anchor), (5, 4));
        assert_eq!(
            sequence.snapshot(),
            cells(&[(1, 10), (2, 20), (4, 91), (5, 92), (3, 30)]),
        );
        // Both 2 and 4 now aim at 5; tombstoning and reclaiming them in
        // either order must leave 5 untouched.
        sequence.delete(4);
        sequence.mark_reclaimable(4);
        sequence.delete(2);
        sequence.mark_reclaimable(2);
        assert_eq!(sequence.snapshot(), cells(&[(1, 10), (5, 92), (3, 30)]));
        assert_eq!(sequence.allocated(), 4);
    }
}
