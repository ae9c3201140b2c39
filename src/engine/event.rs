use std::collections::VecDeque;

use policy_syntax::Atom;

use super::proof::Proof;

/// A pending insert/delete against a materialized view's base database,
/// carrying the proofs that justify it (spec §4.6). Queued rather than
/// applied immediately so that one base-fact change can fan out through
/// several delta rules breadth-first rather than recursing.
pub struct Event {
    pub atom: Atom,
    pub proofs: Vec<Proof>,
    pub insert: bool,
}

impl Event {
    pub fn new(atom: Atom, proofs: Vec<Proof>, insert: bool) -> Self {
        Event { atom, proofs, insert }
    }

    pub fn tablename(&self) -> &str {
        &self.atom.table
    }
}

#[derive(Default)]
pub struct EventQueue {
    queue: VecDeque<Event>,
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue { queue: VecDeque::new() }
    }

    pub fn enqueue(&mut self, event: Event) {
        self.queue.push_back(event);
    }

    pub fn dequeue(&mut self) -> Option<Event> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
