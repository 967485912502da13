//! Recency lists threaded through the entries of the cache arena.
//!
//! Entries live in a [`Slab`] and link to each other by slab key. The head of a list is its most
//! recently used entry, the tail its least recently used.

use slab::Slab;

/// Previous/next links of an entry. `prev` points towards the head, `next` towards the tail.
#[derive(Clone, Copy, Debug, Default)]
pub(super) struct Links {
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

pub(super) trait Linked {
    fn links(&self) -> &Links;
    fn links_mut(&mut self) -> &mut Links;
}

/// A doubly linked list over entries stored in a slab.
#[derive(Debug, Default)]
pub(super) struct List {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl List {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn head(&self) -> Option<usize> {
        self.head
    }

    pub fn tail(&self) -> Option<usize> {
        self.tail
    }

    /// Link an unlinked entry in as the new head.
    pub fn push_head<T: Linked>(&mut self, slab: &mut Slab<T>, key: usize) {
        let old_head = self.head;
        *slab[key].links_mut() = Links {
            prev: None,
            next: old_head,
        };
        match old_head {
            Some(old_head) => slab[old_head].links_mut().prev = Some(key),
            None => self.tail = Some(key),
        }
        self.head = Some(key);
        self.len += 1;
    }

    /// Unlink an entry which is currently a member of this list.
    pub fn unlink<T: Linked>(&mut self, slab: &mut Slab<T>, key: usize) {
        let Links { prev, next } = *slab[key].links();
        match prev {
            Some(prev) => slab[prev].links_mut().next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => slab[next].links_mut().prev = prev,
            None => self.tail = prev,
        }
        *slab[key].links_mut() = Links::default();
        self.len -= 1;
    }

    /// Move a member of this list to the head.
    pub fn move_to_head<T: Linked>(&mut self, slab: &mut Slab<T>, key: usize) {
        if self.head == Some(key) {
            return;
        }
        self.unlink(slab, key);
        self.push_head(slab, key);
    }

    pub fn clear(&mut self) {
        *self = List::default();
    }
}
