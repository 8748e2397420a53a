//! Queue ordering policy.
//!
//! Emergencies lead the queue. Everything else is ordered by descending
//! priority and, for equal priority, by ascending departure time. The same
//! functions drive the in-memory list and the persisted node chain, so both
//! representations always agree on where a flight belongs.

use std::cmp::Ordering;

use crate::flight::Flight;

/// Index at which `flight` is inserted when walking `queue` from the front.
///
/// An emergency always goes to index 0, so the most recently flagged
/// emergency leads. Otherwise the walk skips, in this order: every
/// emergency, every flight with a strictly higher priority, and every flight
/// with the same priority that departs no later than `flight`. The flight is
/// inserted before the first node that stops the walk.
///
/// The walk is positional, so a queue that was rearranged by hand still
/// yields a deterministic index.
pub fn insertion_index<'a, I>(queue: I, flight: &Flight) -> usize
where
    I: IntoIterator<Item = &'a Flight>,
{
    if flight.emergency {
        return 0;
    }

    let mut walk = queue.into_iter().peekable();
    let mut index = 0;

    while walk.next_if(|f| f.emergency).is_some() {
        index += 1;
    }
    while walk
        .next_if(|f| !f.emergency && f.priority > flight.priority)
        .is_some()
    {
        index += 1;
    }
    while walk
        .next_if(|f| {
            !f.emergency
                && f.priority == flight.priority
                && f.departure_time <= flight.departure_time
        })
        .is_some()
    {
        index += 1;
    }

    index
}

/// Comparator for a full re-sort of the queue.
///
/// Emergencies compare equal to each other, so a stable sort keeps their
/// current relative order.
#[must_use]
pub fn queue_order(a: &Flight, b: &Flight) -> Ordering {
    match (a.emergency, b.emergency) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => b
            .priority
            .cmp(&a.priority)
            .then_with(|| a.departure_time.cmp(&b.departure_time)),
    }
}

/// Whether `flights` already satisfies [`queue_order`].
pub fn is_queue_ordered<'a, I>(flights: I) -> bool
where
    I: IntoIterator<Item = &'a Flight>,
{
    let mut iter = flights.into_iter();
    let Some(mut prev) = iter.next() else {
        return true;
    };
    for next in iter {
        if queue_order(prev, next) == Ordering::Greater {
            return false;
        }
        prev = next;
    }
    true
}
