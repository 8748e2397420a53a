//! In-memory sentinel-bounded doubly-linked list of flights.
//!
//! Nodes live in an arena and link to each other by slot index. Slot 0 is the
//! head sentinel and slot 1 the tail sentinel, so insertion and removal never
//! special-case an empty list. Removed slots are recycled through a free list.

use tracing::trace;

use crate::error::{Error, Result};
use crate::flight::Flight;
use crate::ordering;

const HEAD: usize = 0;
const TAIL: usize = 1;
const NIL: usize = usize::MAX;

#[derive(Debug, Clone)]
struct Slot {
    flight: Option<Flight>,
    prev: usize,
    next: usize,
}

/// A sentinel-bounded doubly-linked list of flights.
#[derive(Debug, Clone)]
pub struct FlightList {
    slots: Vec<Slot>,
    free: Vec<usize>,
    len: usize,
}

impl Default for FlightList {
    fn default() -> Self {
        Self::new()
    }
}

impl FlightList {
    /// Create an empty list: head and tail linked to each other.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: vec![
                Slot {
                    flight: None,
                    prev: NIL,
                    next: TAIL,
                },
                Slot {
                    flight: None,
                    prev: HEAD,
                    next: NIL,
                },
            ],
            free: Vec::new(),
            len: 0,
        }
    }

    /// Number of flights in the list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the list holds no flights.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert after the head sentinel.
    pub fn insert_front(&mut self, flight: Flight) {
        let first = self.slots[HEAD].next;
        self.insert_before(first, flight);
    }

    /// Insert before the tail sentinel.
    pub fn insert_back(&mut self, flight: Flight) {
        self.insert_before(TAIL, flight);
    }

    /// Insert so that `flight` ends up at `position`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `position > len`.
    pub fn insert_at(&mut self, position: usize, flight: Flight) -> Result<()> {
        if position > self.len {
            return Err(Error::InvalidRange {
                position,
                len: self.len,
            });
        }
        let successor = self.successor_for(position);
        self.insert_before(successor, flight);
        Ok(())
    }

    /// Insert according to the queue ordering policy and return the landing index.
    pub fn insert_ordered(&mut self, flight: Flight) -> usize {
        let position = ordering::insertion_index(self.iter(), &flight);
        let successor = self.successor_for(position);
        self.insert_before(successor, flight);
        position
    }

    /// Remove and return the flight at `position`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `position >= len`.
    pub fn extract_at(&mut self, position: usize) -> Result<Flight> {
        if position >= self.len {
            return Err(Error::InvalidRange {
                position,
                len: self.len,
            });
        }
        let slot = self.slot_at(position);
        Ok(self.unlink(slot))
    }

    /// Move the flight at `from` so that it lands at `to`.
    ///
    /// Returns `false` without touching the list when either index is out of
    /// bounds or they are equal. When moving towards the back, the flight
    /// that was at `to` shifts down to `to - 1` once the mover is extracted,
    /// and the mover is inserted right after it.
    pub fn move_item(&mut self, from: usize, to: usize) -> bool {
        if from >= self.len || to >= self.len || from == to {
            return false;
        }
        let slot = self.slot_at(from);
        let flight = self.unlink(slot);
        let successor = if to > from {
            let anchor = self.slot_at(to - 1);
            self.slots[anchor].next
        } else {
            self.slot_at(to)
        };
        self.insert_before(successor, flight);
        trace!(from, to, "moved flight in memory list");
        true
    }

    /// The first flight, if any.
    #[must_use]
    pub fn peek_front(&self) -> Option<&Flight> {
        self.slots[self.slots[HEAD].next].flight.as_ref()
    }

    /// The last flight, if any.
    #[must_use]
    pub fn peek_back(&self) -> Option<&Flight> {
        self.slots[self.slots[TAIL].prev].flight.as_ref()
    }

    /// The flight at `position`, if in bounds.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<&Flight> {
        if position >= self.len {
            return None;
        }
        self.slots[self.slot_at(position)].flight.as_ref()
    }

    /// Index of the flight with the given id.
    #[must_use]
    pub fn position_of(&self, flight_id: i64) -> Option<usize> {
        self.iter().position(|f| f.id == flight_id)
    }

    /// Re-place a flight whose priority or emergency flag changed.
    ///
    /// The node holding `flight.id` is extracted and the updated value goes
    /// back in through [`insert_ordered`](Self::insert_ordered). Returns the
    /// old and new index, or `None` when the flight is not in the list.
    pub fn reposition(&mut self, flight: &Flight) -> Option<(usize, usize)> {
        let from = self.position_of(flight.id)?;
        let slot = self.slot_at(from);
        self.unlink(slot);
        let to = self.insert_ordered(flight.clone());
        Some((from, to))
    }

    /// Overwrite the stored copy of `flight` without moving it.
    ///
    /// Returns `false` when the flight is not in the list.
    pub fn replace(&mut self, flight: &Flight) -> bool {
        let Some(position) = self.position_of(flight.id) else {
            return false;
        };
        let slot = self.slot_at(position);
        self.slots[slot].flight = Some(flight.clone());
        true
    }

    /// Stable re-sort of the whole list by [`ordering::queue_order`].
    pub fn sort_by_policy(&mut self) {
        let mut flights: Vec<Flight> = std::mem::take(self).into_iter().collect();
        flights.sort_by(ordering::queue_order);
        *self = flights.into_iter().collect();
    }

    /// Lazy iterator over the flights in list order.
    #[must_use]
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.slots[HEAD].next,
            remaining: self.len,
        }
    }

    /// Flight ids in list order.
    #[must_use]
    pub fn ids(&self) -> Vec<i64> {
        self.iter().map(|f| f.id).collect()
    }

    /// Check sentinel wrapping, bidirectional links and the length.
    ///
    /// Walks at most `len + 2` steps in each direction.
    #[must_use]
    pub fn links_consistent(&self) -> bool {
        if self.slots[HEAD].prev != NIL || self.slots[TAIL].next != NIL {
            return false;
        }

        let mut forward = 0;
        let mut cursor = HEAD;
        while cursor != TAIL {
            let next = self.slots[cursor].next;
            if next == NIL || self.slots[next].prev != cursor {
                return false;
            }
            if next != TAIL {
                forward += 1;
                if self.slots[next].flight.is_none() || forward > self.len {
                    return false;
                }
            }
            cursor = next;
        }

        let mut backward = 0;
        cursor = TAIL;
        while cursor != HEAD {
            let prev = self.slots[cursor].prev;
            if prev == NIL {
                return false;
            }
            if prev != HEAD {
                backward += 1;
                if backward > self.len {
                    return false;
                }
            }
            cursor = prev;
        }

        forward == self.len && backward == self.len
    }

    fn insert_before(&mut self, successor: usize, flight: Flight) -> usize {
        let prev = self.slots[successor].prev;
        let slot = Slot {
            flight: Some(flight),
            prev,
            next: successor,
        };
        let index = if let Some(index) = self.free.pop() {
            self.slots[index] = slot;
            index
        } else {
            self.slots.push(slot);
            self.slots.len() - 1
        };
        self.slots[prev].next = index;
        self.slots[successor].prev = index;
        self.len += 1;
        index
    }

    fn unlink(&mut self, index: usize) -> Flight {
        let Slot { prev, next, .. } = self.slots[index];
        self.slots[prev].next = next;
        self.slots[next].prev = prev;
        self.len -= 1;
        self.free.push(index);

        let slot = &mut self.slots[index];
        slot.prev = NIL;
        slot.next = NIL;
        slot.flight
            .take()
            .unwrap_or_else(|| unreachable!("sentinels are never unlinked"))
    }

    /// Slot that should follow a flight inserted at `position` (`<= len`).
    fn successor_for(&self, position: usize) -> usize {
        if position == self.len {
            TAIL
        } else {
            self.slot_at(position)
        }
    }

    /// Slot of the regular node at `position` (`< len`), walking from the
    /// nearer sentinel.
    fn slot_at(&self, position: usize) -> usize {
        if position < self.len / 2 {
            let mut cursor = self.slots[HEAD].next;
            for _ in 0..position {
                cursor = self.slots[cursor].next;
            }
            cursor
        } else {
            let mut cursor = self.slots[TAIL].prev;
            for _ in position + 1..self.len {
                cursor = self.slots[cursor].prev;
            }
            cursor
        }
    }
}

/// Iterator over a [`FlightList`] in list order.
#[derive(Debug, Clone)]
pub struct Iter<'a> {
    list: &'a FlightList,
    cursor: usize,
    remaining: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Flight;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == TAIL || self.remaining == 0 {
            return None;
        }
        let slot = &self.list.slots[self.cursor];
        self.cursor = slot.next;
        self.remaining -= 1;
        slot.flight.as_ref()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl<'a> IntoIterator for &'a FlightList {
    type Item = &'a Flight;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for FlightList {
    type Item = Flight;
    type IntoIter = std::vec::IntoIter<Flight>;

    fn into_iter(mut self) -> Self::IntoIter {
        let mut flights = Vec::with_capacity(self.len);
        while !self.is_empty() {
            let first = self.slots[HEAD].next;
            flights.push(self.unlink(first));
        }
        flights.into_iter()
    }
}

impl FromIterator<Flight> for FlightList {
    fn from_iter<T: IntoIterator<Item = Flight>>(iter: T) -> Self {
        let mut list = Self::new();
        for flight in iter {
            list.insert_back(flight);
        }
        list
    }
}
