//! Arena-backed recency list for LRU bookkeeping.
//!
//! Nodes live in a `Vec` of slots and are linked by [`NodeId`], so moving a
//! key to the MRU position or evicting the LRU key is O(1) and needs no raw
//! pointers. Freed slots are recycled through a free list.
//!
//! ## Architecture
//!
//! ```text
//!   slots: Vec<Option<Node<T>>>
//!   ┌────────┬─────────────────────────────────────────────┐
//!   │ NodeId │ Node { value, prev, next }                  │
//!   ├────────┼─────────────────────────────────────────────┤
//!   │ 0      │ { value: "AAPL", prev: None, next: Some(2) }│
//!   │ 1      │ None (free)                                 │
//!   │ 2      │ { value: "MSFT", prev: Some(0), next: None }│
//!   └────────┴─────────────────────────────────────────────┘
//!
//!   head (MRU) ─► [0] ◄──► [2] ◄── tail (LRU)
//! ```
//!
//! ## Performance
//! - `push_front`, `move_to_front`, `remove`, `pop_back`: O(1)
//! - `iter`: O(n), MRU to LRU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
struct Node<T> {
    value: T,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

/// Doubly linked MRU→LRU list with stable node handles.
#[derive(Debug)]
pub struct RecencyList<T> {
    slots: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    len: usize,
}

impl<T> RecencyList<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.node(id).map(|node| &node.value)
    }

    /// Most recently used value.
    pub fn front(&self) -> Option<&T> {
        self.head.and_then(|id| self.get(id))
    }

    /// Least recently used value.
    pub fn back(&self) -> Option<&T> {
        self.tail.and_then(|id| self.get(id))
    }

    /// Inserts `value` at the MRU position.
    pub fn push_front(&mut self, value: T) -> NodeId {
        let node = Node {
            value,
            prev: None,
            next: self.head,
        };
        let id = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                NodeId(idx)
            },
            None => {
                self.slots.push(Some(node));
                NodeId(self.slots.len() - 1)
            },
        };
        match self.head {
            Some(old_head) => {
                if let Some(old) = self.node_mut(old_head) {
                    old.prev = Some(id);
                }
            },
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.len += 1;
        id
    }

    /// Moves `id` to the MRU position; returns `false` if it is not in the list.
    pub fn move_to_front(&mut self, id: NodeId) -> bool {
        if !self.contains(id) {
            return false;
        }
        if self.head == Some(id) {
            return true;
        }
        self.detach(id);
        let old_head = self.head;
        if let Some(node) = self.node_mut(id) {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(old_head) = old_head {
            if let Some(old) = self.node_mut(old_head) {
                old.prev = Some(id);
            }
        } else {
            self.tail = Some(id);
        }
        self.head = Some(id);
        true
    }

    /// Removes `id` and returns its value.
    pub fn remove(&mut self, id: NodeId) -> Option<T> {
        if !self.contains(id) {
            return None;
        }
        self.detach(id);
        let node = self.slots[id.0].take()?;
        self.free.push(id.0);
        self.len -= 1;
        Some(node.value)
    }

    /// Removes and returns the LRU value.
    pub fn pop_back(&mut self) -> Option<T> {
        let id = self.tail?;
        self.remove(id)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    /// Iterates from MRU to LRU.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let mut current = self.head;
        std::iter::from_fn(move || {
            let node = self.node(current?)?;
            current = node.next;
            Some(&node.value)
        })
    }

    fn node(&self, id: NodeId) -> Option<&Node<T>> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node<T>> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    fn detach(&mut self, id: NodeId) {
        let (prev, next) = match self.node(id) {
            Some(node) => (node.prev, node.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(node) = self.node_mut(p) {
                    node.next = next;
                }
            },
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.node_mut(n) {
                    node.prev = prev;
                }
            },
            None => self.tail = prev,
        }
        if let Some(node) = self.node_mut(id) {
            node.prev = None;
            node.next = None;
        }
    }

    #[cfg(any(test, debug_assertions))]
    /// Walks the list in both directions and checks links and length.
    pub fn debug_validate_invariants(&self) {
        let mut forward = 0;
        let mut prev = None;
        let mut current = self.head;
        while let Some(id) = current {
            let node = self.node(id).expect("linked node missing");
            assert_eq!(node.prev, prev, "broken prev link at {:?}", id);
            prev = Some(id);
            current = node.next;
            forward += 1;
            assert!(forward <= self.len, "cycle detected in recency list");
        }
        assert_eq!(prev, self.tail);
        assert_eq!(forward, self.len);
        assert_eq!(self.slots.iter().filter(|s| s.is_some()).count(), self.len);
    }
}

impl<T> Default for RecencyList<T> {
    fn default() -> Self {
        Self::new()
    }
}
