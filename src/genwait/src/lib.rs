//! A generic sleep/wakeup engine for single-CPU, multi-threaded kernels.
//!
//! Any kernel subsystem can put the calling thread to sleep on a *wait
//! channel* (an opaque identifier derived from the address of some object)
//! and later wake one, several, or all of the threads sleeping on that
//! channel. Waits can carry a timeout, and wakes can deliver an error to the
//! woken threads.
//!
//! The engine consists of two process-wide structures, both owned by
//! [`WaitEngine`]:
//!
//!  - The *sleep queue table*: a fixed number of FIFO buckets indexed by a
//!    hash of the channel. A bucket may contain threads waiting on unrelated
//!    channels, so every scan compares the exact channel.
//!  - The *timeout queue*: a single list of timed waits, sorted by deadline.
//!
//! [`Semaphore`] is a counting semaphore built entirely on top of the engine.
//!
//! # Ports
//!
//! The engine doesn't schedule threads, mask interrupts, or read a clock by
//! itself. These services are provided by a *port* through [`PortThreading`]
//! and [`PortClock`], implemented on a zero-sized *traits type*. The
//! `genwait_port_std` package provides a port that simulates a single CPU
//! with host threads.
//!
//! # Contexts
//!
//! All mutations of the engine's structures happen inside a *CPU Lock* (a
//! critical section in which preemption and interrupts are masked). Entry
//! points that acquire CPU Lock themselves fail with
//! [`ErrorKind::WrongContext`] if CPU Lock is already active. Code that
//! already holds CPU Lock uses the `*_locked` variants instead.
//!
//! Blocking operations can't be used in an interrupt context.
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]

mod channel;
mod error;
pub mod klock;
mod semaphore;
mod sleepq;
mod state;
mod thread;
mod timeout;
pub mod utils;
mod wait;

#[cfg(test)]
mod test_port;

pub use self::{
    channel::ChannelId,
    error::*,
    semaphore::Semaphore,
    sleepq::{bucket_of, CHANNEL_HASH_SHIFT, SLEEP_QUEUE_BUCKETS},
    thread::{ThreadCb, ThreadSt},
    timeout::Time,
    wait::{WaitEngine, WaiterInfo},
};

/// Implemented by a port. This trait contains items related to low-level
/// operations for controlling CPU states and thread suspension.
///
/// # Safety
///
/// Implementing a port is inherently unsafe because it's responsible for
/// providing the single-CPU execution model the engine relies on. The
/// `unsafe` methods are only meant to be called by the engine.
pub unsafe trait PortThreading: Sized + Send + Sync + 'static {
    /// Per-thread state owned by the port, embedded in [`ThreadCb`].
    type PortThreadState: Send + Sync + 'static;

    /// Enter a CPU Lock state. Return `false` if CPU Lock is already active
    /// in the current context.
    ///
    /// # Safety
    ///
    /// Only meant to be called by the engine.
    unsafe fn try_enter_cpu_lock() -> bool;

    /// Enter a CPU Lock state.
    ///
    /// # Safety
    ///
    /// CPU Lock must be inactive in the current context.
    unsafe fn enter_cpu_lock();

    /// Leave a CPU Lock state.
    ///
    /// # Safety
    ///
    /// CPU Lock must be active, and it must have been entered by the engine.
    unsafe fn leave_cpu_lock();

    /// Return `true` if CPU Lock is active in the current context.
    fn is_cpu_lock_active() -> bool;

    /// Return `true` if the current context is an interrupt context.
    fn is_interrupt_context() -> bool;

    /// Get the control block of the currently running thread. Returns `None`
    /// if the current context isn't associated with a thread.
    fn current_thread() -> Option<&'static ThreadCb<Self>>;

    /// Relinquish the processor until the current thread is made runnable
    /// again by [`mark_runnable`]. This may return spuriously; the engine
    /// re-checks the thread's state and calls this again as needed.
    ///
    /// # Safety
    ///
    /// CPU Lock must be inactive. The current context must be a thread
    /// context.
    ///
    /// [`mark_runnable`]: Self::mark_runnable
    unsafe fn suspend_current_thread();

    /// Make the specified thread runnable. The thread is expected to resume
    /// from [`suspend_current_thread`] at some point after CPU Lock is
    /// released.
    ///
    /// # Safety
    ///
    /// CPU Lock must be active.
    ///
    /// [`suspend_current_thread`]: Self::suspend_current_thread
    unsafe fn mark_runnable(thread: &'static ThreadCb<Self>);
}

/// Implemented by a port. Provides the monotonic clock the engine uses to
/// compute deadlines.
pub trait PortClock {
    /// Get the current time in milliseconds.
    fn now() -> Time;
}

/// The combination of all port traits the engine requires.
pub trait Port: PortThreading + PortClock {}
impl<T: PortThreading + PortClock> Port for T {}
