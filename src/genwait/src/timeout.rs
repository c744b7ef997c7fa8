//! The timeout queue
use core::fmt;

use crate::{
    klock::{CpuLockCell, CpuLockTokenRefMut},
    utils::{intrusive_list::ListHead, into_ok},
    wait::{wait_queue_accessor, WaitRef},
    PortThreading,
};

/// A point of time, in milliseconds, as reported by
/// [`PortClock::now`](crate::PortClock::now).
pub type Time = u64;

/// The list of timed wait objects, sorted by deadline. Wait objects with
/// equal deadlines are kept in insertion order.
pub(crate) struct TimeoutQueue<Traits: PortThreading> {
    /// All elements of this linked list must be valid and have a deadline.
    waits: CpuLockCell<Traits, ListHead<WaitRef<Traits>>>,
}

impl<Traits: PortThreading> TimeoutQueue<Traits> {
    pub(crate) const fn new() -> Self {
        Self {
            waits: CpuLockCell::new(ListHead::new()),
        }
    }

    /// Insert a wait object after the last element whose deadline is not
    /// later than its own.
    ///
    /// Most new deadlines are later than every existing one, so the scan
    /// starts from the tail.
    pub(crate) fn insert(&self, mut lock: CpuLockTokenRefMut<'_, Traits>, wait_ref: WaitRef<Traits>) {
        let deadline = deadline_of(wait_ref);
        let mut accessor = wait_queue_accessor!(&self.waits, lock.borrow_mut(), timeout_link);

        let mut cursor = into_ok(accessor.back());
        let insert_at = loop {
            let Some(current) = cursor else {
                // No element is earlier; become the new head
                break into_ok(accessor.front());
            };

            if deadline_of(current) <= deadline {
                // Insert right after `current`
                break match accessor.next(current) {
                    Ok(next) => next,
                    Err(_) => unreachable!(),
                };
            }

            cursor = match accessor.prev(current) {
                Ok(prev) => prev,
                Err(_) => unreachable!(),
            };
        };

        match accessor.insert(wait_ref, insert_at) {
            Ok(()) => {}
            Err(_) => panic!("wait object is already in the timeout queue"),
        }
    }

    /// Remove a wait object. Returns `false` (doing nothing) if it's not in
    /// the queue.
    pub(crate) fn remove(&self, mut lock: CpuLockTokenRefMut<'_, Traits>, wait_ref: WaitRef<Traits>) -> bool {
        let mut accessor = wait_queue_accessor!(&self.waits, lock.borrow_mut(), timeout_link);
        accessor.remove(wait_ref).is_ok()
    }

    /// Get the wait object with the earliest deadline.
    pub(crate) fn front(&self, mut lock: CpuLockTokenRefMut<'_, Traits>) -> Option<WaitRef<Traits>> {
        let accessor = wait_queue_accessor!(&self.waits, lock.borrow_mut(), timeout_link);
        into_ok(accessor.front())
    }

    /// Get the earliest deadline.
    pub(crate) fn next_deadline(&self, lock: CpuLockTokenRefMut<'_, Traits>) -> Option<Time> {
        self.front(lock).map(deadline_of)
    }

    /// Expire the wait objects whose deadlines are `<= now`, from the
    /// earliest. `expire` must remove the given wait object from the queue.
    /// Returns the number of expired wait objects.
    pub(crate) fn expire_due(
        &self,
        mut lock: CpuLockTokenRefMut<'_, Traits>,
        now: Time,
        mut expire: impl FnMut(CpuLockTokenRefMut<'_, Traits>, WaitRef<Traits>),
    ) -> usize {
        let mut count = 0;
        while let Some(wait_ref) = self.front(lock.borrow_mut()) {
            if deadline_of(wait_ref) > now {
                break;
            }

            expire(lock.borrow_mut(), wait_ref);
            count += 1;

            // Safety: The thread can't resume (and drop `*wait_ref`) while we
            //         are holding CPU Lock
            assert!(
                unsafe { wait_ref.as_ref() }.timeout_link.read(&*lock).is_none(),
                "expired wait object is still in the timeout queue"
            );
        }
        count
    }

    /// Unlink every wait object.
    pub(crate) fn clear(&self, mut lock: CpuLockTokenRefMut<'_, Traits>) {
        let mut accessor = wait_queue_accessor!(&self.waits, lock.borrow_mut(), timeout_link);
        while into_ok(accessor.pop_front()).is_some() {}
    }
}

impl<Traits: PortThreading> fmt::Debug for TimeoutQueue<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TimeoutQueue")
            .field("waits", &self.waits)
            .finish()
    }
}

/// Get the deadline of a wait object in the timeout queue.
fn deadline_of<Traits: PortThreading>(wait_ref: WaitRef<Traits>) -> Time {
    // Safety: `wait_ref` is about to be or is already in the timeout queue
    match unsafe { wait_ref.as_ref() }.deadline {
        Some(deadline) => deadline,
        None => unreachable!("wait object without a deadline in the timeout queue"),
    }
}
