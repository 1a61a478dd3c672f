//! The timer wheel / callout queue collaborator.
//!
//! This is an external collaborator specified only by its interface:
//! `set(delay, callback, arg) -> handle`, `clear(handle)`, `left(handle)`,
//! `in_queue(handle)`, `age(now)`. `Timers` is that interface; `CalloutQueue`
//! is the one concrete implementation this crate ships.
//!
//! The shape follows `iface::socket_set::SocketSet` (`src/iface/socket_set.rs`):
//! an opaque `Handle(usize)` newtype indexes a flat slab of slots, so
//! `clear`/`in_queue`/`left` never have to search. Firing order matches the
//! "Timer callbacks fire in expiry order; when multiple timers are due
//! simultaneously, earliest-inserted fires first" by breaking deadline ties
//! with an insertion sequence number.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

use crate::time::{Duration, Instant};

/// A handle identifying a pending timer. Records (`Source`, `Group`,
/// `Interface`) store `Option<Handle>`; clearing an already-expired handle
/// is defined as a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(usize);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The callout-service interface the core depends on.
///
/// `T` is whatever payload the caller wants delivered back on expiry (this
/// crate uses [`crate::core::TimerEvent`]). The service never inspects `T`;
/// it only orders and returns it.
pub trait Timers<T> {
    /// Arm a new timer, firing `delay` from now with payload `event`.
    /// Setting a new timer never implicitly clears an old one:
    /// "setting a new timer while the handle is pending requires explicit
    /// clear first".
    fn set(&mut self, now: Instant, delay: Duration, event: T) -> Handle;

    /// Cancel a pending timer. A no-op if `handle` already fired or was
    /// already cleared.
    fn clear(&mut self, handle: Handle);

    /// Time remaining before `handle` fires, or `None` if it is not
    /// currently pending.
    fn left(&self, now: Instant, handle: Handle) -> Option<Duration>;

    /// Whether `handle` is still pending.
    fn in_queue(&self, handle: Handle) -> bool;

    /// Advance the clock to `now`, returning every payload whose deadline
    /// has passed, in fire order.
    fn age(&mut self, now: Instant) -> Vec<T>;
}

struct Slot<T> {
    deadline: Instant,
    seq: u64,
    event: Option<T>,
}

#[derive(PartialEq, Eq)]
struct QueueKey {
    deadline: Instant,
    seq: u64,
    index: usize,
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want earliest deadline (then lowest
        // seq) first out, so reverse the natural ordering.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A binary-heap-scheduled callout queue: `Timers` over a slab of slots.
#[derive(Default)]
pub struct CalloutQueue<T> {
    slots: Vec<Slot<T>>,
    heap: BinaryHeap<QueueKey>,
    next_seq: u64,
    free: Vec<usize>,
}

impl<T> CalloutQueue<T> {
    pub fn new() -> Self {
        CalloutQueue {
            slots: Vec::new(),
            heap: BinaryHeap::new(),
            next_seq: 0,
            free: Vec::new(),
        }
    }

    /// Whether any timer is currently pending.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|slot| slot.event.is_none())
    }
}

impl<T> Timers<T> for CalloutQueue<T> {
    fn set(&mut self, now: Instant, delay: Duration, event: T) -> Handle {
        let deadline = now + delay;
        let seq = self.next_seq;
        self.next_seq += 1;

        let index = if let Some(index) = self.free.pop() {
            self.slots[index] = Slot {
                deadline,
                seq,
                event: Some(event),
            };
            index
        } else {
            self.slots.push(Slot {
                deadline,
                seq,
                event: Some(event),
            });
            self.slots.len() - 1
        };

        self.heap.push(QueueKey {
            deadline,
            seq,
            index,
        });
        Handle(index)
    }

    fn clear(&mut self, handle: Handle) {
        if let Some(slot) = self.slots.get_mut(handle.0) {
            if slot.event.take().is_some() {
                self.free.push(handle.0);
            }
        }
    }

    fn left(&self, now: Instant, handle: Handle) -> Option<Duration> {
        let slot = self.slots.get(handle.0)?;
        slot.event.as_ref()?;
        Some(slot.deadline.saturating_duration_since(now))
    }

    fn in_queue(&self, handle: Handle) -> bool {
        self.slots
            .get(handle.0)
            .map(|slot| slot.event.is_some())
            .unwrap_or(false)
    }

    fn age(&mut self, now: Instant) -> Vec<T> {
        let mut fired = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let key = self.heap.pop().unwrap();
            let slot = &mut self.slots[key.index];
            // Lazily-deleted entry (cleared, or superseded by a stale heap
            // entry left behind when the slot was reused) — skip it.
            if slot.seq != key.seq {
                continue;
            }
            if let Some(event) = slot.event.take() {
                fired.push(event);
                self.free.push(key.index);
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_expiry_order_then_insertion_order() {
        let mut q: CalloutQueue<&'static str> = CalloutQueue::new();
        let t0 = Instant::now();
        q.set(t0, Duration::from_secs(2), "second");
        q.set(t0, Duration::from_secs(1), "first");
        q.set(t0, Duration::from_secs(1), "tied-but-later");

        let fired = q.age(t0 + Duration::from_secs(1));
        assert_eq!(fired, vec!["first", "tied-but-later"]);

        let fired = q.age(t0 + Duration::from_secs(2));
        assert_eq!(fired, vec!["second"]);
    }

    #[test]
    fn clear_is_a_no_op_on_expired_handle() {
        let mut q: CalloutQueue<u32> = CalloutQueue::new();
        let t0 = Instant::now();
        let h = q.set(t0, Duration::from_secs(1), 42);
        assert!(q.in_queue(h));
        assert_eq!(q.age(t0 + Duration::from_secs(1)), vec![42]);
        assert!(!q.in_queue(h));
        q.clear(h); // no-op, must not panic
    }

    #[test]
    fn reused_slot_does_not_resurrect_a_stale_heap_entry() {
        let mut q: CalloutQueue<u32> = CalloutQueue::new();
        let t0 = Instant::now();
        let h1 = q.set(t0, Duration::from_secs(1), 1);
        q.clear(h1);
        let h2 = q.set(t0, Duration::from_secs(1), 2);
        assert_eq!(q.age(t0 + Duration::from_secs(1)), vec![2]);
        assert!(!q.in_queue(h2));
    }

    #[test]
    fn left_reports_remaining_time() {
        let mut q: CalloutQueue<u32> = CalloutQueue::new();
        let t0 = Instant::now();
        let h = q.set(t0, Duration::from_secs(5), 1);
        assert_eq!(q.left(t0 + Duration::from_secs(2), h), Some(Duration::from_secs(3)));
    }
}
