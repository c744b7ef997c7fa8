//! The sleep queue table
use crate::{
    channel::ChannelId,
    klock::{CpuLockCell, CpuLockTokenRefMut},
    utils::{intrusive_list::ListHead, into_ok},
    wait::{wait_queue_accessor, Wait, WaitRef},
    PortThreading,
};

/// The number of buckets in the sleep queue table. Must be a power of two.
pub const SLEEP_QUEUE_BUCKETS: usize = 128;

/// The number of low-order address bits discarded by [`bucket_of`].
pub const CHANNEL_HASH_SHIFT: u32 = 8;

/// Get the index of the bucket where threads waiting on `channel` are
/// queued.
///
/// The hash quality only affects scan time. Unrelated channels may share a
/// bucket.
#[inline]
pub const fn bucket_of(channel: ChannelId) -> usize {
    (channel.as_raw() >> CHANNEL_HASH_SHIFT) & (SLEEP_QUEUE_BUCKETS - 1)
}

const _: () = assert!(SLEEP_QUEUE_BUCKETS.is_power_of_two());

type Bucket<Traits> = CpuLockCell<Traits, ListHead<WaitRef<Traits>>>;

/// A fixed-size table of FIFO queues of wait objects, indexed by
/// [`bucket_of`] of their channels.
pub(crate) struct SleepQueueTable<Traits: PortThreading> {
    /// All elements of these linked lists must be valid.
    buckets: [Bucket<Traits>; SLEEP_QUEUE_BUCKETS],
}

impl<Traits: PortThreading> SleepQueueTable<Traits> {
    pub(crate) const fn new() -> Self {
        Self {
            buckets: [const { CpuLockCell::new(ListHead::new()) }; SLEEP_QUEUE_BUCKETS],
        }
    }

    #[inline]
    pub(crate) fn bucket(&self, channel: ChannelId) -> &Bucket<Traits> {
        &self.buckets[bucket_of(channel)]
    }

    /// Append a wait object to the tail of the bucket for its channel.
    pub(crate) fn enqueue(&self, mut lock: CpuLockTokenRefMut<'_, Traits>, wait_ref: WaitRef<Traits>) {
        // Safety: `wait_ref` is about to be linked; the caller guarantees it
        //         stays valid until it's unlinked
        let channel = unsafe { wait_ref.as_ref() }.channel;
        let mut accessor = wait_queue_accessor!(self.bucket(channel), lock.borrow_mut(), sleep_link);
        match accessor.push_back(wait_ref) {
            Ok(()) => {}
            Err(_) => panic!("wait object is already queued"),
        }
    }

    /// Remove a wait object from its bucket. Returns `false` (doing nothing)
    /// if it's not queued.
    pub(crate) fn dequeue(&self, mut lock: CpuLockTokenRefMut<'_, Traits>, wait_ref: WaitRef<Traits>) -> bool {
        // Safety: `wait_ref` is either queued or owned by the caller
        let channel = unsafe { wait_ref.as_ref() }.channel;
        let mut accessor = wait_queue_accessor!(self.bucket(channel), lock.borrow_mut(), sleep_link);
        accessor.remove(wait_ref).is_ok()
    }

    /// Unlink every wait object. Returns the number of removed objects.
    pub(crate) fn clear(&self, mut lock: CpuLockTokenRefMut<'_, Traits>) -> usize {
        let mut count = 0;
        for bucket in &self.buckets {
            let mut accessor = wait_queue_accessor!(bucket, lock.borrow_mut(), sleep_link);
            while into_ok(accessor.pop_front()).is_some() {
                count += 1;
            }
        }
        count
    }

    /// Call `f` for every queued wait object, bucket by bucket.
    pub(crate) fn for_each(
        &self,
        mut lock: CpuLockTokenRefMut<'_, Traits>,
        mut f: impl FnMut(&Wait<'static, Traits>),
    ) {
        for bucket in &self.buckets {
            let accessor = wait_queue_accessor!(bucket, lock.borrow_mut(), sleep_link);
            for item in accessor.iter() {
                f(into_ok(item).1);
            }
        }
    }
}
