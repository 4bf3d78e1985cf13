//! Ordered pending-event container owned by the dispatcher.
//!
//! Callers never iterate the queue; they only take events out through the three
//! selection operations, each of which removes and returns at most one event.

use std::collections::VecDeque;

use crate::types::{EventId, FireEvent, Point};

/// Place of an event in queue order; lower slots are served first.
///
/// A slot stays valid after the event is taken out, so an event handed back
/// untouched can return to exactly where it was.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(i64);

#[derive(Debug)]
struct Queued {
    slot: Slot,
    event: FireEvent,
}

/// Events sorted by ascending slot. Front inserts take slots below every
/// slot ever issued and tail inserts take slots above, so slots never repeat.
#[derive(Debug)]
pub struct EventQueue {
    events: VecDeque<Queued>,
    next_front: i64,
    next_back: i64,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self {
            events: VecDeque::new(),
            next_front: -1,
            next_back: 0,
        }
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail (fresh submissions and diverted targets).
    pub fn push_back(&mut self, event: FireEvent) {
        let slot = Slot(self.next_back);
        self.next_back += 1;
        self.events.push_back(Queued { slot, event });
    }

    /// Insert at the head (partially fought fires and fault requeues).
    pub fn push_front(&mut self, event: FireEvent) {
        let slot = Slot(self.next_front);
        self.next_front -= 1;
        self.events.push_front(Queued { slot, event });
    }

    /// Put an event back at the slot it was taken from.
    pub fn restore(&mut self, slot: Slot, event: FireEvent) {
        let index = self.events.partition_point(|queued| queued.slot < slot);
        self.events.insert(index, Queued { slot, event });
    }

    /// Plain FIFO selection.
    pub fn pop_front(&mut self) -> Option<(Slot, FireEvent)> {
        self.events.pop_front().map(|queued| (queued.slot, queued.event))
    }

    /// First event whose location lies within `reach` of `position` on both
    /// axes, falling back to the FIFO head when none does.
    pub fn pop_by_proximity<F>(&mut self, position: Point, reach: f64, locate: F) -> Option<(Slot, FireEvent)>
    where
        F: Fn(&FireEvent) -> Option<Point>,
    {
        let near = self.events.iter().position(|queued| {
            locate(&queued.event)
                .map(|center| position.within_reach(center, reach))
                .unwrap_or(false)
        });
        match near {
            Some(index) => self.take(index),
            None => self.pop_front(),
        }
    }

    /// First event, in queue order, that satisfies `feasible`.
    pub fn pop_by_feasibility<F>(&mut self, mut feasible: F) -> Option<(Slot, FireEvent)>
    where
        F: FnMut(&FireEvent) -> bool,
    {
        let index = self.events.iter().position(|queued| feasible(&queued.event))?;
        self.take(index)
    }

    fn take(&mut self, index: usize) -> Option<(Slot, FireEvent)> {
        self.events.remove(index).map(|queued| (queued.slot, queued.event))
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.events.iter().any(|queued| queued.event.id == Some(id))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
