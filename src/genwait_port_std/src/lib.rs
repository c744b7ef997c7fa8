//! Simulation environment for running the `genwait` engine on a hosted
//! environment.
//!
//! Every kernel thread is backed by a host thread. CPU Lock is a process-wide
//! lock owned by at most one host thread at a time, which is all the engine
//! needs from a single CPU. A suspended kernel thread parks its host thread,
//! and waking it up unparks it. Interrupt handlers are simulated by running a
//! closure on the calling host thread in the interrupt role ([`interrupt`]).
//!
//! The clock is virtual. It only advances by [`set_time`], [`advance_time`],
//! [`timer_tick`], or the background ticker started by [`start_ticker`].
//!
//! ```rust,ignore
//! genwait_port_std::use_port!(unsafe struct SystemTraits);
//! static ENGINE: genwait::WaitEngine<SystemTraits> = genwait::WaitEngine::new();
//! ```
#![deny(unsafe_op_in_unsafe_fn)]
use genwait::{BadContextError, ThreadCb, Time, WaitEngine};
use once_cell::sync::OnceCell;
use spin::Mutex as SpinMutex;
use std::{
    any::TypeId,
    cell::Cell,
    io,
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

/// Used by `use_port!`
#[doc(hidden)]
pub extern crate genwait;

/// Implemented on a traits type by [`use_port!`].
///
/// # Safety
///
/// Only meant to be implemented by [`use_port!`].
#[doc(hidden)]
pub unsafe trait PortInstance: genwait::Port<PortThreadState = ThreadState> {
    fn port_state() -> &'static State;
}

/// The internal state of the port.
#[doc(hidden)]
pub struct State {
    /// The host thread currently holding CPU Lock.
    cpu_lock: Mutex<Option<thread::ThreadId>>,
    cpu_lock_released: Condvar,
    /// The virtual clock, in milliseconds.
    now: AtomicU64,
    ticker: SpinMutex<Option<TickerHandle>>,
}

/// The port's per-thread state, embedded in [`ThreadCb`].
#[derive(Debug)]
pub struct ThreadState {
    /// The backing host thread. Set when the thread starts running.
    thread: OnceCell<thread::Thread>,
}

struct TickerHandle {
    cmd_send: mpsc::Sender<TickerCmd>,
    join: JoinHandle<()>,
}

enum TickerCmd {
    Stop,
}

/// The role of a host thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadRole {
    Unknown,
    /// The backing thread of a kernel thread.
    Thread,
    /// Currently running an interrupt handler.
    Interrupt,
}

thread_local! {
    /// The current host thread's role.
    static THREAD_ROLE: Cell<ThreadRole> = Cell::new(ThreadRole::Unknown);

    /// The kernel thread backed by the current host thread and the traits
    /// type it belongs to.
    static CURRENT_THREAD: Cell<Option<(TypeId, *const ())>> = Cell::new(None);
}

impl ThreadState {
    pub const fn new() -> Self {
        Self {
            thread: OnceCell::new(),
        }
    }
}

impl Default for ThreadState {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::missing_safety_doc)]
impl State {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            cpu_lock: Mutex::new(None),
            cpu_lock_released: Condvar::new(),
            now: AtomicU64::new(0),
            ticker: SpinMutex::new(None),
        }
    }

    fn lock_owner(&self) -> MutexGuard<'_, Option<thread::ThreadId>> {
        // The guard is never held across user code, so poisoning doesn't
        // indicate an inconsistent state
        self.cpu_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub unsafe fn try_enter_cpu_lock(&self) -> bool {
        let me = thread::current().id();
        let mut owner = self.lock_owner();

        if *owner == Some(me) {
            return false;
        }

        // Another context is in a critical section; on a real single CPU we
        // wouldn't even be running now
        while owner.is_some() {
            owner = self
                .cpu_lock_released
                .wait(owner)
                .unwrap_or_else(PoisonError::into_inner);
        }

        *owner = Some(me);
        true
    }

    pub unsafe fn enter_cpu_lock(&self) {
        // Safety: Upheld by the caller
        let entered = unsafe { self.try_enter_cpu_lock() };
        assert!(entered, "CPU Lock is already active");
    }

    pub unsafe fn leave_cpu_lock(&self) {
        let mut owner = self.lock_owner();
        assert_eq!(*owner, Some(thread::current().id()), "CPU Lock is not active");
        *owner = None;
        drop(owner);
        self.cpu_lock_released.notify_one();
    }

    pub fn is_cpu_lock_active(&self) -> bool {
        *self.lock_owner() == Some(thread::current().id())
    }

    pub fn is_interrupt_context(&self) -> bool {
        THREAD_ROLE.with(|r| r.get()) == ThreadRole::Interrupt
    }

    pub fn current_thread<Traits: PortInstance>(&self) -> Option<&'static ThreadCb<Traits>> {
        if self.is_interrupt_context() {
            return None;
        }

        match CURRENT_THREAD.with(|c| c.get()) {
            // Safety: The pointer was stored by `spawn::<Traits>` from a
            //         `&'static ThreadCb<Traits>`
            Some((type_id, ptr)) if type_id == TypeId::of::<Traits>() => {
                Some(unsafe { &*ptr.cast::<ThreadCb<Traits>>() })
            }
            _ => None,
        }
    }

    pub unsafe fn suspend_current_thread<Traits: PortInstance>(&self) {
        log::trace!("suspending {:?}", thread::current().id());
        thread::park();
    }

    pub unsafe fn mark_runnable<Traits: PortInstance>(&self, thread: &'static ThreadCb<Traits>) {
        match thread.port_thread_state.thread.get() {
            Some(host_thread) => {
                log::trace!("unparking {:?}", host_thread.id());
                host_thread.unpark();
            }
            None => unreachable!("a thread that never ran can't be waiting"),
        }
    }

    pub fn now(&self) -> Time {
        self.now.load(Ordering::SeqCst)
    }
}

/// A kernel thread started by [`spawn`].
pub struct KernelThread<Traits: PortInstance, R> {
    cb: &'static ThreadCb<Traits>,
    join: JoinHandle<R>,
}

impl<Traits: PortInstance, R> KernelThread<Traits, R> {
    /// Get the thread's control block.
    pub fn cb(&self) -> &'static ThreadCb<Traits> {
        self.cb
    }

    /// Block the calling host thread until the kernel thread is waiting in
    /// `engine`.
    pub fn wait_until_blocked(&self, engine: &WaitEngine<Traits>) {
        while !matches!(engine.is_waiting(self.cb), Ok(true)) {
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Wait for the thread to finish and get its result.
    pub fn join(self) -> thread::Result<R> {
        self.join.join()
    }
}

/// Start a kernel thread of `Traits` running `f`.
pub fn spawn<Traits: PortInstance, R: Send + 'static>(
    name: &str,
    f: impl FnOnce() -> R + Send + 'static,
) -> io::Result<KernelThread<Traits, R>> {
    let cb: &'static ThreadCb<Traits> = Box::leak(Box::new(ThreadCb::new(ThreadState::new())));

    let join = thread::Builder::new().name(name.to_owned()).spawn(move || {
        if cb.port_thread_state.thread.set(thread::current()).is_err() {
            unreachable!();
        }
        THREAD_ROLE.with(|r| r.set(ThreadRole::Thread));
        CURRENT_THREAD.with(|c| {
            c.set(Some((
                TypeId::of::<Traits>(),
                cb as *const ThreadCb<Traits> as *const (),
            )))
        });

        log::trace!("kernel thread {:p} started", cb);
        f()
    })?;

    Ok(KernelThread { cb, join })
}

/// Run `f` as an interrupt handler on the calling host thread.
///
/// # Panics
///
/// Panics if the calling host thread holds CPU Lock.
pub fn interrupt<Traits: PortInstance, R>(f: impl FnOnce() -> R) -> R {
    let state = Traits::port_state();
    assert!(
        !state.is_cpu_lock_active(),
        "interrupts are masked while CPU Lock is active"
    );

    let prev_role = THREAD_ROLE.with(|r| r.replace(ThreadRole::Interrupt));
    let ret = f();
    THREAD_ROLE.with(|r| r.set(prev_role));
    ret
}

/// Set the virtual clock.
pub fn set_time<Traits: PortInstance>(now: Time) {
    Traits::port_state().now.store(now, Ordering::SeqCst);
}

/// Advance the virtual clock by `ms` milliseconds and return the new time.
pub fn advance_time<Traits: PortInstance>(ms: u32) -> Time {
    let ms = Time::from(ms);
    Traits::port_state().now.fetch_add(ms, Ordering::SeqCst) + ms
}

/// Simulate a timer interrupt: advance the virtual clock by `ms`
/// milliseconds and expire the timed waits in `engine`. Returns the number
/// of expired waits.
pub fn timer_tick<Traits: PortInstance>(
    engine: &WaitEngine<Traits>,
    ms: u32,
) -> Result<usize, BadContextError> {
    let now = advance_time::<Traits>(ms);
    log::trace!("timer_tick(now = {})", now);
    interrupt::<Traits, _>(|| engine.check_timeouts(now))
}

/// Start a background host thread that calls [`timer_tick`] every `period`
/// of real time, advancing the virtual clock by the same amount. Replaces
/// the ticker already running for `Traits`, if any.
pub fn start_ticker<Traits: PortInstance>(
    engine: &'static WaitEngine<Traits>,
    period: Duration,
) -> io::Result<()> {
    stop_ticker::<Traits>();

    let period_ms = u32::try_from(period.as_millis()).unwrap_or(u32::MAX).max(1);
    let (cmd_send, cmd_recv) = mpsc::channel();

    let join = thread::Builder::new()
        .name("genwait ticker".to_owned())
        .spawn(move || loop {
            match cmd_recv.recv_timeout(period) {
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if let Err(e) = timer_tick(engine, period_ms) {
                        log::warn!("timer tick failed: {}", e);
                    }
                }
                Ok(TickerCmd::Stop) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        })?;

    *Traits::port_state().ticker.lock() = Some(TickerHandle { cmd_send, join });
    Ok(())
}

/// Stop the background ticker of `Traits` and wait for it to exit.
pub fn stop_ticker<Traits: PortInstance>() {
    let ticker = Traits::port_state().ticker.lock().take();
    if let Some(TickerHandle { cmd_send, join }) = ticker {
        // The ticker exits on disconnection, too
        let _ = cmd_send.send(TickerCmd::Stop);
        if join.join().is_err() {
            log::warn!("the ticker thread panicked");
        }
    }
}

/// Initialize `env_logger`. `RUST_LOG` controls the log level. Does nothing
/// if a logger is already installed.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Define a traits type implementing the port traits.
///
/// ```rust,ignore
/// genwait_port_std::use_port!(unsafe struct SystemTraits);
/// ```
#[macro_export]
macro_rules! use_port {
    (unsafe $vis:vis struct $SystemTraits:ident) => {
        $vis struct $SystemTraits;

        mod port_std_impl {
            use super::$SystemTraits;
            use $crate::genwait::{PortClock, PortThreading, ThreadCb, Time};
            use $crate::{PortInstance, State, ThreadState};

            pub(super) static PORT_STATE: State = State::new();

            unsafe impl PortInstance for $SystemTraits {
                #[inline]
                fn port_state() -> &'static State {
                    &PORT_STATE
                }
            }

            unsafe impl PortThreading for $SystemTraits {
                type PortThreadState = ThreadState;

                unsafe fn try_enter_cpu_lock() -> bool {
                    unsafe { PORT_STATE.try_enter_cpu_lock() }
                }

                unsafe fn enter_cpu_lock() {
                    unsafe { PORT_STATE.enter_cpu_lock() }
                }

                unsafe fn leave_cpu_lock() {
                    unsafe { PORT_STATE.leave_cpu_lock() }
                }

                fn is_cpu_lock_active() -> bool {
                    PORT_STATE.is_cpu_lock_active()
                }

                fn is_interrupt_context() -> bool {
                    PORT_STATE.is_interrupt_context()
                }

                fn current_thread() -> Option<&'static ThreadCb<Self>> {
                    PORT_STATE.current_thread::<Self>()
                }

                unsafe fn suspend_current_thread() {
                    unsafe { PORT_STATE.suspend_current_thread::<Self>() }
                }

                unsafe fn mark_runnable(thread: &'static ThreadCb<Self>) {
                    unsafe { PORT_STATE.mark_runnable::<Self>(thread) }
                }
            }

            impl PortClock for $SystemTraits {
                fn now() -> Time {
                    PORT_STATE.now()
                }
            }
        }
    };
}
