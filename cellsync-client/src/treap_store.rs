use std::collections::HashMap;

use indexed_treap::{IndexedTreap, NodeRef};

use cellsync_common::{Cell, CellId, Value, HEAD_CELL_ID};

use crate::store::CellStore;

/// The fast variant: cells sit in an implicit-key treap (positional access
/// in expected O(log n)), and a side map takes a cell id straight to its
/// tree handle, so anchored insertion is a handle lookup, an `index_of`
/// walk and one positional insert.
#[derive(Debug)]
pub struct TreapStore {
    cells: IndexedTreap<Cell>,
    by_id: HashMap<CellId, NodeRef>,
}

impl TreapStore {
    pub fn new() -> Self {
        TreapStore {
            cells: IndexedTreap::new(),
            by_id: HashMap::new(),
        }
    }

    /// Deterministic tree shapes, for reproducible tests.
    pub fn with_seed(seed: u64) -> Self {
        TreapStore {
            cells: IndexedTreap::with_seed(seed),
            by_id: HashMap::new(),
        }
    }
}

impl Default for TreapStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CellStore for TreapStore {
    fn len(&self) -> usize {
        self.cells.len()
    }

    fn get(&self, index: usize) -> Option<Cell> {
        self.cells.get(index).copied()
    }

    fn contains(&self, id: CellId) -> bool {
        self.by_id.contains_key(&id)
    }

    fn set_value(&mut self, id: CellId, value: Value) -> bool {
        match self.by_id.get(&id) {
            Some(&node) => {
                self.cells.value_mut(node).value = value;
                true
            }
            None => false,
        }
    }

    fn insert_after(&mut self, near: CellId, cell: Cell) -> bool {
        let index = if near == HEAD_CELL_ID {
            0
        } else {
            match self.by_id.get(&near) {
                Some(&anchor) => self.cells.index_of(anchor) + 1,
                None => return false,
            }
        };
        let node = self.cells.insert_at(index, cell);
        self.by_id.insert(cell.id, node);
        true
    }

    fn remove(&mut self, id: CellId) -> bool {
        match self.by_id.remove(&id) {
            Some(node) => {
                self.cells.remove(node);
                true
            }
            None => false,
        }
    }

    fn reset(&mut self, cells: Vec<Cell>) {
        self.cells.clear();
        self.by_id.clear();
        for (index, cell) in cells.into_iter().enumerate() {
            let node = self.cells.insert_at(index, cell);
            self.by_id.insert(cell.id, node);
        }
    }

    fn cells(&self) -> Vec<Cell> {
        self.cells.iter().copied().collect()
    }
}
