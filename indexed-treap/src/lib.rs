//! A positional container backed by an implicit-key treap.
//!
//! Elements are addressed by their in-order position; there is no search
//! key. Each node carries a uniform random priority, and the tree is a heap
//! over priorities, which keeps the expected depth logarithmic whatever the
//! access pattern. Structural changes are expressed through two primitives:
//! [`split`](IndexedTreap::split) by position and
//! [`merge`](IndexedTreap::merge) of two position-disjoint trees.
//!
//! Nodes live in a slot arena and are addressed by [`NodeRef`] keys rather
//! than owning pointers: a handle stays valid across rotations of the node
//! it names, parent back-pointers cannot form ownership cycles, and
//! dropping the container drops the arena flatly with no recursive
//! node teardown. Handles also make [`index_of`](IndexedTreap::index_of)
//! an O(log n) walk up the parent chain.
//!
//! # Example
//!
//! ```
//! use indexed_treap::IndexedTreap;
//!
//! let mut treap = IndexedTreap::new();
//! let a = treap.insert_at(0, "a");
//! treap.insert_at(1, "c");
//! treap.insert_at(1, "b");
//! assert_eq!(treap.iter().copied().collect::<Vec<_>>(), ["a", "b", "c"]);
//! assert_eq!(treap.index_of(a), 0);
//! assert_eq!(treap.remove_at(1), "b");
//! assert_eq!(treap.len(), 2);
//! ```

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Stable handle to an element; survives rebalancing, dies on removal.
    pub struct NodeRef;
}

#[derive(Debug)]
struct Node<T> {
    value: T,
    priority: u64,
    /// Number of nodes in the subtree rooted here, this node included.
    size: usize,
    left: Option<NodeRef>,
    right: Option<NodeRef>,
    parent: Option<NodeRef>,
}

/// An ordered sequence of `T` with expected-O(log n) positional access,
/// insertion and removal.
#[derive(Debug)]
pub struct IndexedTreap<T> {
    nodes: SlotMap<NodeRef, Node<T>>,
    root: Option<NodeRef>,
    rng: SmallRng,
}

impl<T> Default for IndexedTreap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IndexedTreap<T> {
    pub fn new() -> Self {
        Self::from_rng(SmallRng::from_os_rng())
    }

    /// Deterministic priorities; shapes become reproducible across runs.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(SmallRng::seed_from_u64(seed))
    }

    fn from_rng(rng: SmallRng) -> Self {
        IndexedTreap {
            nodes: SlotMap::with_key(),
            root: None,
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.subtree_size(self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
    }

    /// Whether `node` still names an element of this container.
    pub fn contains(&self, node: NodeRef) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.node_at(index).map(|n| &self.nodes[n].value)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.node_at(index).map(|n| &mut self.nodes[n].value)
    }

    pub fn value(&self, node: NodeRef) -> &T {
        &self.nodes[node].value
    }

    pub fn value_mut(&mut self, node: NodeRef) -> &mut T {
        &mut self.nodes[node].value
    }

    /// Handle of the element at `index`, if any.
    pub fn node_at(&self, index: usize) -> Option<NodeRef> {
        let mut current = self.root?;
        let mut index = index;
        if index >= self.nodes[current].size {
            return None;
        }
        loop {
            let left_size = self.subtree_size(self.nodes[current].left);
            if index < left_size {
                current = self.nodes[current].left.expect("left subtree holds index");
            } else if index == left_size {
                return Some(current);
            } else {
                index -= left_size + 1;
                current = self.nodes[current].right.expect("right subtree holds index");
            }
        }
    }

    /// Current position of `node`, walking the parent chain and summing the
    /// left-subtree sizes it passes on the way up.
    ///
    /// # Panics
    ///
    /// Panics if `node` has been removed.
    pub fn index_of(&self, node: NodeRef) -> usize {
        let mut index = self.subtree_size(self.nodes[node].left);
        let mut current = node;
        while let Some(parent) = self.nodes[current].parent {
            if self.nodes[parent].right == Some(current) {
                index += self.subtree_size(self.nodes[parent].left) + 1;
            }
            current = parent;
        }
        index
    }

    /// Insert `value` so that it ends up at `index`, shifting everything at
    /// and after `index` one position right.
    ///
    /// Descends while the fresh priority loses to the nodes on the path;
    /// at the first node it beats, the subtree is split at the insertion
    /// position and the new node takes its place with the halves as
    /// children.
    ///
    /// # Panics
    ///
    /// Panics if `index > len()`.
    pub fn insert_at(&mut self, index: usize, value: T) -> NodeRef {
        assert!(
            index <= self.len(),
            "insert position {index} out of bounds (len {})",
            self.len()
        );
        let priority = self.rng.random();
        let new = self.nodes.insert(Node {
            value,
            priority,
            size: 1,
            left: None,
            right: None,
            parent: None,
        });
        self.root = Some(self.insert_node(self.root, index, new));
        let root = self.root.expect("tree is non-empty after insert");
        self.nodes[root].parent = None;
        new
    }

    /// Remove and return the element at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`.
    pub fn remove_at(&mut self, index: usize) -> T {
        let node = self
            .node_at(index)
            .unwrap_or_else(|| panic!("remove position {index} out of bounds"));
        self.remove(node)
    }

    /// Remove the element `node` names, wherever it currently sits.
    ///
    /// # Panics
    ///
    /// Panics if `node` has already been removed.
    pub fn remove(&mut self, node: NodeRef) -> T {
        let parent = self.nodes[node].parent;
        let left = self.nodes[node].left;
        let right = self.nodes[node].right;
        let merged = self.merge(left, right);
        match parent {
            None => {
                self.root = merged;
                if let Some(m) = merged {
                    self.nodes[m].parent = None;
                }
            }
            Some(parent) => {
                if self.nodes[parent].left == Some(node) {
                    self.nodes[parent].left = merged;
                } else {
                    self.nodes[parent].right = merged;
                }
                // Subtree sizes are stale all the way up; recompute along
                // the ancestor path.
                let mut current = Some(parent);
                while let Some(n) = current {
                    self.refresh(n);
                    current = self.nodes[n].parent;
                }
            }
        }
        self.nodes.remove(node).expect("node existed").value
    }

    /// In-order iterator over the elements.
    pub fn iter(&self) -> Iter<'_, T> {
        let mut stack = Vec::new();
        self.push_left_spine(self.root, &mut stack);
        Iter { treap: self, stack }
    }

    fn push_left_spine(&self, mut node: Option<NodeRef>, stack: &mut Vec<NodeRef>) {
        while let Some(n) = node {
            stack.push(n);
            node = self.nodes[n].left;
        }
    }

    fn subtree_size(&self, node: Option<NodeRef>) -> usize {
        node.map_or(0, |n| self.nodes[n].size)
    }

    /// Recompute `node`'s size from its children and claim them as ours.
    /// Called after every structural edit touching `node`'s child links.
    fn refresh(&mut self, node: NodeRef) {
        let left = self.nodes[node].left;
        let right = self.nodes[node].right;
        let mut size = 1;
        if let Some(l) = left {
            self.nodes[l].parent = Some(node);
            size += self.nodes[l].size;
        }
        if let Some(r) = right {
            self.nodes[r].parent = Some(node);
            size += self.nodes[r].size;
        }
        self.nodes[node].size = size;
    }

    /// Split the tree rooted at `node` into `(left, right)` where `left`
    /// holds the first `count` positions.
    fn split(
        &mut self,
        node: Option<NodeRef>,
        count: usize,
    ) -> (Option<NodeRef>, Option<NodeRef>) {
        let Some(n) = node else {
            return (None, None);
        };
        let left_size = self.subtree_size(self.nodes[n].left);
        if count <= left_size {
            let (detached, kept) = self.split(self.nodes[n].left, count);
            self.nodes[n].left = kept;
            self.refresh(n);
            if let Some(d) = detached {
                self.nodes[d].parent = None;
            }
            (detached, Some(n))
        } else {
            let (kept, detached) = self.split(self.nodes[n].right, count - left_size - 1);
            self.nodes[n].right = kept;
            self.refresh(n);
            if let Some(d) = detached {
                self.nodes[d].parent = None;
            }
            (Some(n), detached)
        }
    }

    /// Merge two trees where every position in `a` precedes every position
    /// in `b`; the higher priority of the two roots wins the new root.
    fn merge(&mut self, a: Option<NodeRef>, b: Option<NodeRef>) -> Option<NodeRef> {
        match (a, b) {
            (None, other) | (other, None) => other,
            (Some(x), Some(y)) => {
                if self.nodes[x].priority > self.nodes[y].priority {
                    let merged = self.merge(self.nodes[x].right, Some(y));
                    self.nodes[x].right = merged;
                    self.refresh(x);
                    Some(x)
                } else {
                    let merged = self.merge(Some(x), self.nodes[y].left);
                    self.nodes[y].left = merged;
                    self.refresh(y);
                    Some(y)
                }
            }
        }
    }

    fn insert_node(&mut self, slot: Option<NodeRef>, index: usize, new: NodeRef) -> NodeRef {
        match slot {
            None => new,
            Some(n) if self.nodes[new].priority > self.nodes[n].priority => {
                let (left, right) = self.split(Some(n), index);
                self.nodes[new].left = left;
                self.nodes[new].right = right;
                self.refresh(new);
                new
            }
            Some(n) => {
                let left_size = self.subtree_size(self.nodes[n].left);
                if index <= left_size {
                    let child = self.insert_node(self.nodes[n].left, index, new);
                    self.nodes[n].left = Some(child);
                } else {
                    let child = self.insert_node(self.nodes[n].right, index - left_size - 1, new);
                    self.nodes[n].right = Some(child);
                }
                self.refresh(n);
                n
            }
        }
    }
}

impl<'a, T> IntoIterator for &'a IndexedTreap<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T> FromIterator<T> for IndexedTreap<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut treap = IndexedTreap::new();
        for value in iter {
            let len = treap.len();
            treap.insert_at(len, value);
        }
        treap
    }
}

/// In-order traversal, iterative over an explicit stack.
pub struct Iter<'a, T> {
    treap: &'a IndexedTreap<T>,
    stack: Vec<NodeRef>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.treap
            .push_left_spine(self.treap.nodes[node].right, &mut self.stack);
        Some(&self.treap.nodes[node].value)
    }
}
