use std::fmt;
use std::mem::size_of;

use serde::{Deserialize, Serialize};

/// Identifier of a cell in the replicated sequence.
///
/// Ids are minted monotonically by the server starting at 1 and are never
/// reused. Id 0 names the head sentinel: inserting "after cell 0" places a
/// cell at the front of the sequence.
pub type CellId = u64;

/// Payload carried by a cell.
pub type Value = u32;

/// Position on the server's mutation timeline. Every accepted mutating
/// request advances it by exactly one; 0 means "never observed anything".
pub type IterationId = u64;

/// Identifies a client; doubles as the client's mailbox index on the bus.
pub type ClientId = u32;

/// Insertion anchor denoting the head of the sequence.
pub const HEAD_CELL_ID: CellId = 0;

/// One element of the replicated ordered sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    pub value: Value,
}

impl Cell {
    pub const fn new(id: CellId, value: Value) -> Self {
        Cell { id, value }
    }

    /// Approximate in-memory footprint, used for transfer bookkeeping only.
    pub const fn size_hint() -> u64 {
        size_of::<Cell>() as u64
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.id, self.value)
    }
}

/// A single entry of the server's iteration timeline.
///
/// The history log is a deque of these; delta batches shipped to clients
/// carry the same information split into three per-kind streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modification {
    /// The value of `cell.id` has been set to `cell.value`.
    Update { cell: Cell },
    /// `cell` was created immediately after `near` (0 = at the head).
    Insert { near: CellId, cell: Cell },
    /// The named cell was removed from the sequence.
    Delete { id: CellId },
}

impl Modification {
    /// The id of the cell this entry mutates (not the insertion anchor).
    pub fn cell_id(&self) -> CellId {
        match self {
            Modification::Update { cell } => cell.id,
            Modification::Insert { cell, .. } => cell.id,
            Modification::Delete { id } => *id,
        }
    }
}
