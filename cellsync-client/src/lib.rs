//! Client side of cellsync: an ordered replica of the server's cell
//! sequence, kept current by applying delta batches and optionally checked
//! cell-by-cell against full snapshots.
//!
//! The replica logic is independent of how cells are physically stored;
//! [`CellStore`] is the seam. [`VecStore`] is the simple linear variant,
//! [`TreapStore`] the fast one backed by an implicit-key treap.

mod replica;
mod store;
mod treap_store;

pub use replica::{DivergedError, Replica};
pub use store::{CellStore, VecStore};
pub use treap_store::TreapStore;

/// Replica over the linear store; fine for small sequences.
pub type SlowReplica = Replica<VecStore>;
/// Replica over the treap store; everything positional is O(log n).
pub type FastReplica = Replica<TreapStore>;
