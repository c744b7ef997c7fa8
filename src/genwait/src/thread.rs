//! Threads, as seen by the wait engine
use core::fmt;

use crate::{
    error::ErrorKind,
    klock::{self, CpuLockCell},
    state,
    wait::WaitRef,
    PortThreading,
};

/// *Thread control block* - the portion of a thread's state the wait engine
/// needs. Thread objects are owned by the scheduler (the port), which also
/// decides where they live.
pub struct ThreadCb<Traits: PortThreading> {
    /// The port's per-thread state. The engine never touches this.
    pub port_thread_state: Traits::PortThreadState,

    pub(crate) st: CpuLockCell<Traits, ThreadSt>,

    /// Wait state of the thread.
    pub(crate) wait: ThreadWait<Traits>,
}

impl<Traits: PortThreading> ThreadCb<Traits> {
    /// Construct a `ThreadCb` in the Running state.
    pub const fn new(port_thread_state: Traits::PortThreadState) -> Self {
        Self {
            port_thread_state,
            st: CpuLockCell::new(ThreadSt::Running),
            wait: ThreadWait::new(),
        }
    }

    /// Get the current state of the thread. Returns `None` if CPU Lock is
    /// already active in the current context.
    pub fn st(&self) -> Option<ThreadSt> {
        let lock = klock::lock_cpu::<Traits>().ok()?;
        Some(self.st.get(&*lock))
    }
}

impl<Traits: PortThreading> fmt::Debug for ThreadCb<Traits>
where
    Traits::PortThreadState: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ThreadCb")
            .field("self", &(self as *const _))
            .field("port_thread_state", &self.port_thread_state)
            .field("st", &self.st)
            .field("wait", &self.wait)
            .finish()
    }
}

/// Thread state machine
///
/// `Blocked` and `Ready` are jointly owned with the scheduler: the engine
/// moves a thread into `Blocked` when it starts waiting and into `Ready` when
/// it wakes it up. The thread itself moves back to `Running` when it resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadSt {
    /// The thread is executing, or could be executing as far as the engine is
    /// concerned.
    Running,

    /// The thread is in a wait operation and hasn't been woken up yet.
    Blocked,

    /// The thread was woken up but hasn't observed the wait result yet.
    Ready,
}

/// The wait state of a thread.
pub(crate) struct ThreadWait<Traits: PortThreading> {
    /// The wait object describing the ongoing wait operation of the thread.
    /// Should be `None` iff the thread is not in the Blocked state.
    ///
    /// The pointee must be valid.
    pub(crate) current_wait: CpuLockCell<Traits, Option<WaitRef<Traits>>>,

    /// The result of the last wait operation. Set by a wake-upper. Returned by
    /// [`WaitEngine::wait`](crate::WaitEngine::wait).
    pub(crate) wait_result: CpuLockCell<Traits, Result<(), ErrorKind>>,
}

impl<Traits: PortThreading> ThreadWait<Traits> {
    const fn new() -> Self {
        Self {
            current_wait: CpuLockCell::new(None),
            wait_result: CpuLockCell::new(Ok(())),
        }
    }
}

impl<Traits: PortThreading> fmt::Debug for ThreadWait<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ThreadWait")
            .field(
                "current_wait",
                &self.current_wait.debug_fmt_with_ref(|wait_ref, f| {
                    // Safety: `current_wait` points to an existing `Wait`
                    //         while CPU Lock is active
                    let channel = wait_ref.map(|r| unsafe { r.as_ref() }.channel);
                    fmt::Debug::fmt(&channel, f)
                }),
            )
            .field("wait_result", &self.wait_result)
            .finish()
    }
}

/// Transition the current thread into the Blocked state and relinquish the
/// processor until it's woken up by [`make_ready`].
///
/// The current context must be [waitable](state::expect_waitable_context).
pub(crate) fn wait_until_woken_up<Traits: PortThreading>(
    mut lock: klock::CpuLockTokenRefMut<'_, Traits>,
    thread: &'static ThreadCb<Traits>,
) {
    debug_assert_eq!(state::expect_waitable_context::<Traits>(), Ok(()));

    assert_eq!(*thread.st.read(&*lock), ThreadSt::Running);
    thread.st.replace(&mut *lock, ThreadSt::Blocked);

    loop {
        // Temporarily release the CPU Lock before suspending
        // Safety: (1) We don't access resources protected by CPU Lock.
        //         (2) We currently have CPU Lock.
        //         (3) We will re-acquire a CPU Lock before returning from this
        //             function.
        unsafe { Traits::leave_cpu_lock() };

        // Safety: CPU Lock inactive, thread context
        unsafe { Traits::suspend_current_thread() };

        // Re-acquire a CPU Lock
        unsafe { Traits::enter_cpu_lock() };

        if *thread.st.read(&*lock) != ThreadSt::Blocked {
            break;
        }
    }

    assert_eq!(*thread.st.read(&*lock), ThreadSt::Ready);
    thread.st.replace(&mut *lock, ThreadSt::Running);
}

/// Transition a Blocked thread into the Ready state and ask the scheduler to
/// resume it.
///
/// # Safety
///
/// The thread must be in the Blocked state and its wait object must be
/// already removed from every queue.
pub(crate) unsafe fn make_ready<Traits: PortThreading>(
    mut lock: klock::CpuLockTokenRefMut<'_, Traits>,
    thread: &'static ThreadCb<Traits>,
) {
    debug_assert_eq!(*thread.st.read(&*lock), ThreadSt::Blocked);
    thread.st.replace(&mut *lock, ThreadSt::Ready);

    // Safety: CPU Lock active
    unsafe { Traits::mark_runnable(thread) };
}
