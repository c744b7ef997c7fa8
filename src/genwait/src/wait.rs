//! The wait/wake engine
use core::{fmt, marker::PhantomPinned, ops, pin::Pin, ptr::NonNull};

use crate::{
    channel::ChannelId,
    error::{BadContextError, ErrorKind},
    klock::{self, CpuLockCell, CpuLockTokenRefMut},
    sleepq::SleepQueueTable,
    state,
    thread::{self, ThreadCb},
    timeout::{Time, TimeoutQueue},
    utils::{intrusive_list, panicking::abort_on_unwind},
    Port, PortThreading,
};

// Type definitions and trait implementations for wait lists
// ---------------------------------------------------------------------------

/// A reference to a [`Wait`]. The lifetime of the callback borrowed by the
/// pointee is erased.
pub(crate) struct WaitRef<Traits: PortThreading>(NonNull<Wait<'static, Traits>>);

// Safety: `Wait` is only accessed with CPU Lock active
unsafe impl<Traits: PortThreading> Send for WaitRef<Traits> {}
unsafe impl<Traits: PortThreading> Sync for WaitRef<Traits> {}

impl<Traits: PortThreading> Clone for WaitRef<Traits> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Traits: PortThreading> Copy for WaitRef<Traits> {}

impl<Traits: PortThreading> fmt::Debug for WaitRef<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("WaitRef").field(&self.0).finish()
    }
}

impl<Traits: PortThreading> PartialEq for WaitRef<Traits> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<Traits: PortThreading> Eq for WaitRef<Traits> {}

impl<Traits: PortThreading> WaitRef<Traits> {
    fn new(wait: &Wait<'_, Traits>) -> Self {
        Self(NonNull::from(wait).cast())
    }

    /// Dereference `self`.
    ///
    /// # Safety
    ///
    /// The pointee must be valid for `'a`. This is the case while CPU Lock is
    /// held and `self` is found in a wait list or in a thread's
    /// `current_wait`.
    #[inline]
    pub(crate) unsafe fn as_ref<'a>(self) -> &'a Wait<'static, Traits> {
        // Safety: Upheld by the caller
        unsafe { &*self.0.as_ptr() }
    }
}

pub(crate) use self::unsafe_static::UnsafeStatic;
mod unsafe_static {
    use super::*;

    pub struct UnsafeStatic {
        _nonexhaustive: (),
    }

    impl UnsafeStatic {
        /// Construct an `UnsafeStatic`.
        ///
        /// # Safety
        ///
        /// All pointees to be accessed through the constructed `UnsafeStatic`
        /// must be valid.
        #[inline]
        pub const unsafe fn new() -> &'static Self {
            &Self { _nonexhaustive: () }
        }
    }

    impl<Traits: PortThreading> ops::Index<WaitRef<Traits>> for UnsafeStatic {
        type Output = Wait<'static, Traits>;

        #[inline]
        fn index(&self, index: WaitRef<Traits>) -> &Self::Output {
            // Safety: See `wait_queue_accessor`.
            unsafe { index.as_ref() }
        }
    }
}

/// Get a `ListAccessorCell` used to access a list of wait objects linked by
/// the field `$link`.
macro_rules! wait_queue_accessor {
    ($list:expr, $key:expr, $link:ident) => {
        $crate::utils::intrusive_list::ListAccessorCell::new(
            $list,
            // Safety: All elements are extant because we never drop a
            //     `Wait` when it's still in a wait list.
            unsafe { $crate::wait::UnsafeStatic::new() },
            |wait: &$crate::wait::Wait<'static, _>| &wait.$link,
            $key,
        )
        .panicking()
    };
}
pub(crate) use wait_queue_accessor;

// ---------------------------------------------------------------------------

/// *A wait object* describing *which thread* is waiting on *what channel*.
///
/// # Lifetime
///
/// This object is constructed by [`WaitEngine::wait`] on a waiting thread's
/// stack, and only survives until the method returns. This means that `Wait`
/// can expire only when the waiting thread is not waiting anymore.
pub(crate) struct Wait<'a, Traits: PortThreading> {
    /// The thread that is waiting for something.
    pub(crate) thread: &'static ThreadCb<Traits>,

    /// The engine owning the lists this wait object is linked into.
    pub(crate) engine: &'a WaitEngine<Traits>,

    pub(crate) channel: ChannelId,

    /// Diagnostic description of the wait.
    pub(crate) label: &'static str,

    /// `Some(deadline)` iff this wait object is in the timeout queue.
    pub(crate) deadline: Option<Time>,

    /// Invoked with `channel` if the wait expires. Taken out when called.
    pub(crate) callback: CpuLockCell<Traits, Option<&'a mut (dyn FnMut(ChannelId) + Send)>>,

    /// Invoked with `channel` and the error if a wake-upper delivers an
    /// error. Taken out when called.
    pub(crate) on_cancel: CpuLockCell<Traits, Option<&'a mut (dyn FnMut(ChannelId, ErrorKind) + Send)>>,

    /// Forms a linked list headed by a sleep queue bucket.
    pub(crate) sleep_link: CpuLockCell<Traits, Option<intrusive_list::Link<WaitRef<Traits>>>>,

    /// Forms a linked list headed by the timeout queue.
    pub(crate) timeout_link: CpuLockCell<Traits, Option<intrusive_list::Link<WaitRef<Traits>>>>,

    /// Un-implement `Unpin`.
    _pin: PhantomPinned,
}

impl<Traits: PortThreading> Drop for Wait<'_, Traits> {
    #[inline]
    fn drop(&mut self) {
        if self.sleep_link.get_mut().is_some() || self.timeout_link.get_mut().is_some() {
            // Dropping `self` now would leave a dangling pointer in a wait
            // list. The owner of `Wait` is responsible for ensuring this does
            // not happen.
            panic!("wait object is still linked");
        }
    }
}

impl<Traits: PortThreading> fmt::Debug for Wait<'_, Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ thread: {:p}, channel: {:?}, label: {:?}, deadline: {:?} }}",
            self.thread, self.channel, self.label, self.deadline
        )
    }
}

/// A snapshot of one waiting thread, produced by [`WaitEngine::waiters`].
pub struct WaiterInfo<Traits: PortThreading> {
    pub thread: &'static ThreadCb<Traits>,
    pub channel: ChannelId,
    pub label: &'static str,
    pub deadline: Option<Time>,
}

impl<Traits: PortThreading> Clone for WaiterInfo<Traits> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Traits: PortThreading> Copy for WaiterInfo<Traits> {}

impl<Traits: PortThreading> fmt::Debug for WaiterInfo<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WaiterInfo")
            .field("thread", &(self.thread as *const _))
            .field("channel", &self.channel)
            .field("label", &self.label)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// The process-wide state of the wait/wake engine: the sleep queue table and
/// the timeout queue.
///
/// A port must route every wait of its threads through a single
/// `WaitEngine`, which is usually placed in a `static`.
pub struct WaitEngine<Traits: PortThreading> {
    sleep_queues: SleepQueueTable<Traits>,
    timeouts: TimeoutQueue<Traits>,
}

impl<Traits: PortThreading> WaitEngine<Traits> {
    /// Construct an empty `WaitEngine`.
    pub const fn new() -> Self {
        Self {
            sleep_queues: SleepQueueTable::new(),
            timeouts: TimeoutQueue::new(),
        }
    }
}

impl<Traits: PortThreading> Default for WaitEngine<Traits> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Traits: Port> WaitEngine<Traits> {
    /// (Re-)initialize the engine, emptying both queues.
    ///
    /// Wait objects still present in the queues are unlinked but their
    /// threads are not woken up.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn init(&self) -> Result<(), BadContextError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        let abandoned = self.abandon_all(lock.borrow_mut());
        log::debug!("engine {:p} initialized ({} stale waits dropped)", self, abandoned);
        Ok(())
    }

    /// Tear down the engine. Pending waiters are abandoned: they are removed
    /// from both queues but never woken up. Returns the number of abandoned
    /// waiters.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn shutdown(&self) -> Result<usize, BadContextError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        let abandoned = self.abandon_all(lock.borrow_mut());
        log::debug!("engine {:p} shut down ({} waiters abandoned)", self, abandoned);
        Ok(abandoned)
    }

    fn abandon_all(&self, mut lock: CpuLockTokenRefMut<'_, Traits>) -> usize {
        self.timeouts.clear(lock.borrow_mut());
        self.sleep_queues.clear(lock.borrow_mut())
    }

    /// Put the current thread to sleep on `channel` until it's woken up by
    /// one of the `wake_*` methods or `timeout_ms` milliseconds elapse.
    /// `timeout_ms == 0` means no timeout.
    ///
    /// `callback` is called with `channel` if the wait times out, inside the
    /// critical section that expires it and before the thread is unqueued.
    /// It must not block or re-enter the engine. It's never called for a
    /// normal wake.
    ///
    /// Returns `Ok(())` on a normal wake, `Err(TimedOut)` on expiry, or the
    /// error supplied by the wake-upper. Fails with `WrongContext` in an
    /// interrupt context, outside a thread, or with CPU Lock active.
    ///
    /// The caller must not let the object identified by `channel` be freed
    /// while threads are waiting on it.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn wait<'a>(
        &'a self,
        channel: ChannelId,
        label: &'static str,
        timeout_ms: u32,
        callback: Option<&'a mut (dyn FnMut(ChannelId) + Send + 'a)>,
    ) -> Result<(), ErrorKind> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        self.wait_locked(lock.borrow_mut(), channel, label, timeout_ms, callback)
    }

    /// [`wait`](Self::wait) for a caller already holding CPU Lock. CPU Lock is
    /// temporarily released while the thread is asleep.
    pub fn wait_locked<'a>(
        &'a self,
        lock: CpuLockTokenRefMut<'_, Traits>,
        channel: ChannelId,
        label: &'static str,
        timeout_ms: u32,
        callback: Option<&'a mut (dyn FnMut(ChannelId) + Send + 'a)>,
    ) -> Result<(), ErrorKind> {
        self.wait_cancellable_locked(lock, channel, label, timeout_ms, callback, None)
    }

    /// [`wait_locked`](Self::wait_locked) with a hook for error wakes.
    ///
    /// `on_cancel` is called with `channel` and the delivered error when a
    /// `wake_*_err` method or [`wake_specific_thread`] with `Some(error)`
    /// wakes the thread. It runs inside the wake-upper's critical section
    /// before the thread is unqueued, so state the waiter registered before
    /// sleeping can be rolled back before anyone else observes it. It's not
    /// called for a normal wake or a timeout, and the same restrictions as
    /// for `callback` apply.
    ///
    /// [`wake_specific_thread`]: Self::wake_specific_thread
    pub fn wait_cancellable_locked<'a>(
        &'a self,
        mut lock: CpuLockTokenRefMut<'_, Traits>,
        channel: ChannelId,
        label: &'static str,
        timeout_ms: u32,
        callback: Option<&'a mut (dyn FnMut(ChannelId) + Send + 'a)>,
        on_cancel: Option<&'a mut (dyn FnMut(ChannelId, ErrorKind) + Send + 'a)>,
    ) -> Result<(), ErrorKind> {
        state::expect_waitable_context::<Traits>()?;
        let thread = match Traits::current_thread() {
            Some(thread) => thread,
            None => return Err(ErrorKind::WrongContext),
        };

        let deadline = if timeout_ms > 0 {
            Some(Traits::now().saturating_add(timeout_ms.into()))
        } else {
            None
        };

        let wait = Wait {
            thread,
            engine: self,
            channel,
            label,
            deadline,
            callback: CpuLockCell::new(callback),
            on_cancel: CpuLockCell::new(on_cancel),
            sleep_link: CpuLockCell::new(None),
            timeout_link: CpuLockCell::new(None),
            _pin: PhantomPinned,
        };
        pin_utils::pin_mut!(wait);

        self.wait_inner(lock.borrow_mut(), wait.as_ref())
    }

    fn wait_inner(
        &self,
        mut lock: CpuLockTokenRefMut<'_, Traits>,
        wait: Pin<&Wait<'_, Traits>>,
    ) -> Result<(), ErrorKind> {
        let wait = &*wait;
        let thread = wait.thread;
        let wait_ref = WaitRef::new(wait);

        debug_assert!(thread.wait.current_wait.read(&*lock).is_none());

        // `wait` lives on this stack frame. Unwinding past this point while
        // it's linked would leave dangling pointers behind.
        abort_on_unwind(|| {
            if wait.deadline.is_some() {
                self.timeouts.insert(lock.borrow_mut(), wait_ref);
            }
            self.sleep_queues.enqueue(lock.borrow_mut(), wait_ref);

            thread.wait.current_wait.replace(&mut *lock, Some(wait_ref));

            log::trace!("{:p} waits: {:?}", thread, wait);

            // Transition the thread into Blocked. This statement will complete
            // when the thread is woken up.
            thread::wait_until_woken_up(lock.borrow_mut(), thread);

            // `wait_ref` should have been unlinked by a wake-upper
            assert!(wait.sleep_link.read(&*lock).is_none());
            assert!(wait.timeout_link.read(&*lock).is_none());
            assert!(thread.wait.current_wait.read(&*lock).is_none());
        });

        let result = thread.wait.wait_result.get(&*lock);
        log::trace!("{:p} resumes from {:?}: {:?}", thread, wait.channel, result);
        result
    }

    /// Put the current thread to sleep for `ms` milliseconds. Returns
    /// immediately if `ms == 0`.
    ///
    /// Every sleeping thread waits on a channel of its own, which is only
    /// known through [`waiters`](Self::waiters). Waking that channel ends
    /// the sleep early; this is reported as `Ok(())` as well.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn sleep_ms(&self, ms: u32) -> Result<(), ErrorKind> {
        if ms == 0 {
            return Ok(());
        }

        // Lives on this thread's stack for the duration of the sleep, so no
        // other waiter can share its address
        let anchor = 0u8;

        match self.wait(ChannelId::of(&anchor), "sleep", ms, None) {
            Ok(()) | Err(ErrorKind::TimedOut) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Wake up to `max_count` threads (all if `None`) waiting on `channel`,
    /// oldest first. They observe `Err(e)` if `error` is `Some(e)`, `Ok(())`
    /// otherwise. Returns the number of woken threads.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn wake_matching(
        &self,
        channel: ChannelId,
        max_count: Option<usize>,
        error: Option<ErrorKind>,
    ) -> Result<usize, BadContextError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        Ok(self.wake_matching_locked(lock.borrow_mut(), channel, max_count, error))
    }

    /// [`wake_matching`](Self::wake_matching) for a caller already holding
    /// CPU Lock.
    pub fn wake_matching_locked(
        &self,
        mut lock: CpuLockTokenRefMut<'_, Traits>,
        channel: ChannelId,
        max_count: Option<usize>,
        error: Option<ErrorKind>,
    ) -> usize {
        let bucket = self.sleep_queues.bucket(channel);
        let mut woken = 0;

        let mut cur = {
            let accessor = wait_queue_accessor!(bucket, lock.borrow_mut(), sleep_link);
            crate::utils::into_ok(accessor.front())
        };

        while let Some(wait_ref) = cur {
            if max_count.map_or(false, |max_count| woken >= max_count) {
                break;
            }

            // Find the next wait object before we possibly remove `wait_ref`
            // from the bucket.
            cur = {
                let accessor = wait_queue_accessor!(bucket, lock.borrow_mut(), sleep_link);
                match accessor.next(wait_ref) {
                    Ok(next) => next,
                    Err(_) => unreachable!("wait object unlinked during a scan"),
                }
            };

            // Safety: `wait_ref` is in the bucket, so the pointee is valid
            let wait = unsafe { wait_ref.as_ref() };

            // Skip hash collisions
            if wait.channel != channel {
                continue;
            }

            self.wake_wait(lock.borrow_mut(), wait_ref, error);
            woken += 1;
        }

        woken
    }

    /// Wake the oldest thread waiting on `channel`.
    pub fn wake_one(&self, channel: ChannelId) -> Result<usize, BadContextError> {
        self.wake_matching(channel, Some(1), None)
    }

    /// Wake every thread waiting on `channel`.
    pub fn wake_all(&self, channel: ChannelId) -> Result<usize, BadContextError> {
        self.wake_matching(channel, None, None)
    }

    /// Wake the oldest thread waiting on `channel` with `Err(error)`.
    pub fn wake_one_err(
        &self,
        channel: ChannelId,
        error: ErrorKind,
    ) -> Result<usize, BadContextError> {
        self.wake_matching(channel, Some(1), Some(error))
    }

    /// Wake every thread waiting on `channel` with `Err(error)`.
    pub fn wake_all_err(
        &self,
        channel: ChannelId,
        error: ErrorKind,
    ) -> Result<usize, BadContextError> {
        self.wake_matching(channel, None, Some(error))
    }

    /// Wake `thread` if it's waiting on `channel`. Returns `true` if it was.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn wake_specific_thread(
        &self,
        channel: ChannelId,
        thread: &'static ThreadCb<Traits>,
        error: Option<ErrorKind>,
    ) -> Result<bool, BadContextError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        Ok(self.wake_specific_thread_locked(lock.borrow_mut(), channel, thread, error))
    }

    /// [`wake_specific_thread`](Self::wake_specific_thread) for a caller
    /// already holding CPU Lock.
    pub fn wake_specific_thread_locked(
        &self,
        mut lock: CpuLockTokenRefMut<'_, Traits>,
        channel: ChannelId,
        thread: &'static ThreadCb<Traits>,
        error: Option<ErrorKind>,
    ) -> bool {
        let wait_ref = match self.queued_wait_of(lock.borrow_mut(), thread) {
            Some(wait_ref) => wait_ref,
            None => return false,
        };

        // Safety: `wait_ref` is `thread`'s current wait
        if unsafe { wait_ref.as_ref() }.channel != channel {
            return false;
        }

        self.wake_wait(lock, wait_ref, error);
        true
    }

    /// Get `thread`'s wait object if it's queued in `self`.
    fn queued_wait_of(
        &self,
        lock: CpuLockTokenRefMut<'_, Traits>,
        thread: &'static ThreadCb<Traits>,
    ) -> Option<WaitRef<Traits>> {
        let wait_ref = thread.wait.current_wait.get(&*lock)?;

        // Safety: `current_wait` points to an existing `Wait`
        let wait = unsafe { wait_ref.as_ref() };

        // An abandoned wait has no links anymore
        if core::ptr::eq(wait.engine, self) && wait.sleep_link.read(&*lock).is_some() {
            Some(wait_ref)
        } else {
            None
        }
    }

    /// Expire every timed wait whose deadline is `<= now`. Meant to be called
    /// by the system tick. Returns the number of expired waits.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn check_timeouts(&self, now: Time) -> Result<usize, BadContextError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        Ok(self.check_timeouts_locked(lock.borrow_mut(), now))
    }

    /// [`check_timeouts`](Self::check_timeouts) for a caller already holding
    /// CPU Lock.
    pub fn check_timeouts_locked(&self, lock: CpuLockTokenRefMut<'_, Traits>, now: Time) -> usize {
        self.timeouts.expire_due(lock, now, |mut lock, wait_ref| {
            // Safety: `wait_ref` is at the head of the timeout queue
            let wait = unsafe { wait_ref.as_ref() };

            log::trace!("{:p} timed out: {:?}", wait.thread, wait);

            // The callback runs while `wait` is still in its bucket
            if let Some(callback) = wait.callback.replace(&mut *lock, None) {
                callback(wait.channel);
            }

            self.complete_wait(lock, wait_ref, Err(ErrorKind::TimedOut));
        })
    }

    /// Get the earliest deadline among the timed waits.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn next_timeout(&self) -> Result<Option<Time>, BadContextError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        Ok(self.next_timeout_locked(lock.borrow_mut()))
    }

    /// [`next_timeout`](Self::next_timeout) for a caller already holding CPU
    /// Lock.
    pub fn next_timeout_locked(&self, lock: CpuLockTokenRefMut<'_, Traits>) -> Option<Time> {
        self.timeouts.next_deadline(lock)
    }

    /// Call `f` for every waiting thread, grouped by bucket, oldest first
    /// within a bucket. `f` is called with CPU Lock active and must not
    /// re-enter the engine. Returns the number of waiting threads.
    pub fn waiters(&self, mut f: impl FnMut(WaiterInfo<Traits>)) -> Result<usize, BadContextError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        let mut count = 0;
        self.sleep_queues.for_each(lock.borrow_mut(), |wait| {
            count += 1;
            f(WaiterInfo {
                thread: wait.thread,
                channel: wait.channel,
                label: wait.label,
                deadline: wait.deadline,
            });
        });
        Ok(count)
    }

    /// Count the threads waiting on `channel`.
    pub fn waiter_count(&self, channel: ChannelId) -> Result<usize, BadContextError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        let accessor =
            wait_queue_accessor!(self.sleep_queues.bucket(channel), lock.borrow_mut(), sleep_link);
        Ok(accessor
            .iter()
            .map(crate::utils::into_ok)
            .filter(|(_, wait)| wait.channel == channel)
            .count())
    }

    /// Return `true` if `thread` is waiting in this engine.
    pub fn is_waiting(&self, thread: &'static ThreadCb<Traits>) -> Result<bool, BadContextError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        Ok(self.queued_wait_of(lock.borrow_mut(), thread).is_some())
    }

    /// Complete a wait on behalf of a wake-upper. The wait's `on_cancel` hook
    /// runs first if `error` is `Some(_)`.
    fn wake_wait(
        &self,
        mut lock: CpuLockTokenRefMut<'_, Traits>,
        wait_ref: WaitRef<Traits>,
        error: Option<ErrorKind>,
    ) {
        if let Some(e) = error {
            // Safety: `wait_ref` is queued, so the pointee is valid
            let wait = unsafe { wait_ref.as_ref() };

            // The hook runs while `wait` is still in its bucket
            if let Some(on_cancel) = wait.on_cancel.replace(&mut *lock, None) {
                on_cancel(wait.channel, e);
            }
        }

        self.complete_wait(lock, wait_ref, error.map_or(Ok(()), Err));
    }

    /// Remove a wait object from both queues, store the wait result, and wake
    /// up the waiting thread.
    fn complete_wait(
        &self,
        mut lock: CpuLockTokenRefMut<'_, Traits>,
        wait_ref: WaitRef<Traits>,
        wait_result: Result<(), ErrorKind>,
    ) {
        // Safety: `wait_ref` is queued, so the pointee is valid
        let wait = unsafe { wait_ref.as_ref() };
        let thread = wait.thread;

        self.timeouts.remove(lock.borrow_mut(), wait_ref);
        self.sleep_queues.dequeue(lock.borrow_mut(), wait_ref);

        // Clear `ThreadWait::current_wait`
        assert_eq!(*thread.wait.current_wait.read(&*lock), Some(wait_ref));
        thread.wait.current_wait.replace(&mut *lock, None);

        // Set a wait result
        thread.wait.wait_result.replace(&mut *lock, wait_result);

        log::trace!("waking {:p} on {:?}: {:?}", thread, wait.channel, wait_result);

        // Safety: The thread is Blocked and `wait` is unlinked
        unsafe { thread::make_ready(lock, thread) };
    }
}

impl<Traits: Port> fmt::Debug for WaitEngine<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        struct WaitersPrinter<'a, Traits: Port>(&'a WaitEngine<Traits>);

        impl<Traits: Port> fmt::Debug for WaitersPrinter<'_, Traits> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if let Ok(mut lock) = klock::lock_cpu::<Traits>() {
                    let mut list = f.debug_list();
                    self.0.sleep_queues.for_each(lock.borrow_mut(), |wait| {
                        list.entry(wait);
                    });
                    list.finish()
                } else {
                    f.write_str("< locked >")
                }
            }
        }

        struct NextTimeoutPrinter<'a, Traits: Port>(&'a WaitEngine<Traits>);

        impl<Traits: Port> fmt::Debug for NextTimeoutPrinter<'_, Traits> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if let Ok(mut lock) = klock::lock_cpu::<Traits>() {
                    fmt::Debug::fmt(&self.0.next_timeout_locked(lock.borrow_mut()), f)
                } else {
                    f.write_str("< locked >")
                }
            }
        }

        f.debug_struct("WaitEngine")
            .field("waiters", &WaitersPrinter(self))
            .field("next_timeout", &NextTimeoutPrinter(self))
            .finish()
    }
}
