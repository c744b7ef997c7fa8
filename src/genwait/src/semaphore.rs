//! Semaphores
use core::{
    fmt,
    sync::atomic::{AtomicBool, AtomicI32, Ordering},
};

use crate::{
    channel::ChannelId,
    error::{BadContextError, ErrorKind, InitSemaphoreError, PollSemaphoreError, SignalSemaphoreError},
    klock::{self, CpuLockCell},
    state,
    wait::WaitEngine,
    Port,
};

/// A counting semaphore built on [`WaitEngine`]. The address of the
/// semaphore is the channel its waiters sleep on.
///
/// The count doubles as the waiter count: a positive value is the number of
/// available permits, and a negative value `-n` means `n` threads are queued.
///
/// A `Semaphore` is created uninitialized; every operation except
/// [`init`](Self::init) and [`destroy`](Self::destroy) fails with
/// `InvalidArgument` until it's initialized.
pub struct Semaphore<'e, Traits: Port> {
    engine: &'e WaitEngine<Traits>,

    /// Only modified with CPU Lock active. Atomic so that [`Self::count`]
    /// can read it without entering CPU Lock.
    count: AtomicI32,

    initialized: CpuLockCell<Traits, bool>,
}

impl<'e, Traits: Port> Semaphore<'e, Traits> {
    /// Construct an uninitialized `Semaphore` whose waiters will sleep in
    /// `engine`.
    pub const fn new(engine: &'e WaitEngine<Traits>) -> Self {
        Self {
            engine,
            count: AtomicI32::new(0),
            initialized: CpuLockCell::new(false),
        }
    }

    /// Get the channel this semaphore's waiters sleep on.
    #[inline]
    pub fn channel(&self) -> ChannelId {
        ChannelId::of(self)
    }

    /// Initialize the semaphore with `count` permits.
    ///
    /// Fails with `InvalidArgument` if `count` is negative or if threads are
    /// still waiting on the semaphore.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn init(&self, count: i32) -> Result<(), InitSemaphoreError> {
        let mut lock = klock::lock_cpu::<Traits>()?;

        if count < 0 {
            return Err(InitSemaphoreError::InvalidArgument);
        }

        // Resetting the count would orphan the queued waiters
        if self.initialized.get(&*lock) && self.load_count() < 0 {
            return Err(InitSemaphoreError::InvalidArgument);
        }

        self.store_count(count);
        self.initialized.replace(&mut *lock, true);
        Ok(())
    }

    /// Destroy the semaphore. Every waiting thread is woken up with
    /// `Err(Unrecoverable)` and must not touch the semaphore afterwards.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn destroy(&self) -> Result<(), BadContextError> {
        let mut lock = klock::lock_cpu::<Traits>()?;

        let woken = self.engine.wake_matching_locked(
            lock.borrow_mut(),
            self.channel(),
            None,
            Some(ErrorKind::Unrecoverable),
        );

        self.store_count(0);
        self.initialized.replace(&mut *lock, false);

        log::debug!("semaphore {:p} destroyed ({} waiters released)", self, woken);
        Ok(())
    }

    /// Acquire a permit, waiting indefinitely if none is available.
    #[inline]
    pub fn wait(&self) -> Result<(), ErrorKind> {
        self.wait_timed(0)
    }

    /// Acquire a permit, waiting at most `timeout_ms` milliseconds if none
    /// is available. `timeout_ms == 0` means no timeout.
    ///
    /// Returns `Err(TimedOut)` on expiry, `Err(Unrecoverable)` if the
    /// semaphore was destroyed during the wait, or the error a wake-upper
    /// delivered through the engine.
    ///
    /// An available permit is taken in any context. Having to wait in an
    /// interrupt context fails with `WrongContext`.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn wait_timed(&self, timeout_ms: u32) -> Result<(), ErrorKind> {
        let mut lock = klock::lock_cpu::<Traits>()?;

        if !self.initialized.get(&*lock) {
            return Err(ErrorKind::InvalidArgument);
        }

        let count = self.load_count();
        if count > 0 {
            self.store_count(count - 1);
            return Ok(());
        }

        state::expect_waitable_context::<Traits>()?;

        // No permits; the decrement registers us as a waiter. `signal` wakes
        // us without touching the count again, so every other way out of the
        // wait takes the registration back. The engine runs `restore` in the
        // critical section that ends the wait, so `signal` never sees a
        // waiter that isn't queued anymore.
        self.store_count(count - 1);

        let count_cell = &self.count;
        let restored = AtomicBool::new(false);
        let restore = || {
            // CPU Lock is active while the engine calls this
            count_cell.store(count_cell.load(Ordering::Relaxed) + 1, Ordering::Relaxed);
            restored.store(true, Ordering::Relaxed);
        };
        let mut on_timeout = |_: ChannelId| restore();
        let mut on_cancel = |_: ChannelId, _: ErrorKind| restore();

        let result = self.engine.wait_cancellable_locked(
            lock.borrow_mut(),
            self.channel(),
            "sem",
            timeout_ms,
            Some(&mut on_timeout),
            Some(&mut on_cancel),
        );

        // A wait that failed before sleeping never reached the hooks
        if result.is_err() && !restored.load(Ordering::Relaxed) {
            self.store_count(self.load_count() + 1);
        }

        result
    }

    /// Acquire a permit if one is available right now. Fails with
    /// `WouldBlock` otherwise. Never registers the caller as a waiter, so
    /// it can be used in an interrupt context.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn try_wait(&self) -> Result<(), PollSemaphoreError> {
        let lock = klock::lock_cpu::<Traits>()?;

        if !self.initialized.get(&*lock) {
            return Err(PollSemaphoreError::InvalidArgument);
        }

        let count = self.load_count();
        if count > 0 {
            self.store_count(count - 1);
            Ok(())
        } else {
            Err(PollSemaphoreError::WouldBlock)
        }
    }

    /// Release a permit, handing it directly to the oldest waiter if there is
    /// one.
    ///
    /// # Panics
    ///
    /// Panics if the count says a thread is waiting but none is queued on
    /// the semaphore's channel.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn signal(&self) -> Result<(), SignalSemaphoreError> {
        let mut lock = klock::lock_cpu::<Traits>()?;

        if !self.initialized.get(&*lock) {
            return Err(SignalSemaphoreError::InvalidArgument);
        }

        let count = self.load_count();
        if count < 0 {
            let woken =
                self.engine
                    .wake_matching_locked(lock.borrow_mut(), self.channel(), Some(1), None);
            assert_eq!(woken, 1, "semaphore count is out of sync with its waiters");
        }
        self.store_count(count + 1);

        Ok(())
    }

    /// Get the current count. This is a racy snapshot meant for diagnostics.
    #[inline]
    pub fn count(&self) -> i32 {
        self.count.load(Ordering::Relaxed)
    }

    /// Read the count. CPU Lock must be active.
    #[inline]
    fn load_count(&self) -> i32 {
        debug_assert!(Traits::is_cpu_lock_active());
        self.count.load(Ordering::Relaxed)
    }

    /// Write the count. CPU Lock must be active.
    #[inline]
    fn store_count(&self, value: i32) {
        debug_assert!(Traits::is_cpu_lock_active());
        self.count.store(value, Ordering::Relaxed);
    }
}

impl<Traits: Port> fmt::Debug for Semaphore<'_, Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("self", &(self as *const _))
            .field("count", &self.count())
            .field("initialized", &self.initialized)
            .finish()
    }
}
