//! A single-threaded port for unit tests. Threads never actually suspend;
//! tests link wait objects by hand and observe which threads were made
//! runnable.
use std::cell::{Cell, RefCell};

use crate::{PortClock, PortThreading, ThreadCb, Time};

pub(crate) struct TestPort;

thread_local! {
    static CPU_LOCK: Cell<bool> = Cell::new(false);
    static INTERRUPT: Cell<bool> = Cell::new(false);
    static CURRENT: Cell<Option<&'static ThreadCb<TestPort>>> = Cell::new(None);
    static RUNNABLE: RefCell<Vec<*const ThreadCb<TestPort>>> = RefCell::new(Vec::new());
    static NOW: Cell<Time> = Cell::new(0);
}

unsafe impl PortThreading for TestPort {
    type PortThreadState = ();

    unsafe fn try_enter_cpu_lock() -> bool {
        !CPU_LOCK.with(|x| x.replace(true))
    }

    unsafe fn enter_cpu_lock() {
        let was_active = CPU_LOCK.with(|x| x.replace(true));
        assert!(!was_active, "CPU Lock is already active");
    }

    unsafe fn leave_cpu_lock() {
        let was_active = CPU_LOCK.with(|x| x.replace(false));
        assert!(was_active, "CPU Lock is not active");
    }

    fn is_cpu_lock_active() -> bool {
        CPU_LOCK.with(Cell::get)
    }

    fn is_interrupt_context() -> bool {
        INTERRUPT.with(Cell::get)
    }

    fn current_thread() -> Option<&'static ThreadCb<Self>> {
        if Self::is_interrupt_context() {
            None
        } else {
            CURRENT.with(Cell::get)
        }
    }

    unsafe fn suspend_current_thread() {
        panic!("the test port can't suspend threads");
    }

    unsafe fn mark_runnable(thread: &'static ThreadCb<Self>) {
        assert!(Self::is_cpu_lock_active());
        RUNNABLE.with(|r| r.borrow_mut().push(thread));
    }
}

impl PortClock for TestPort {
    fn now() -> Time {
        NOW.with(Cell::get)
    }
}

/// Reset the port's state and give the test its own current thread.
pub(crate) fn setup() {
    let _ = env_logger::builder().is_test(true).try_init();

    CPU_LOCK.with(|x| x.set(false));
    INTERRUPT.with(|x| x.set(false));
    RUNNABLE.with(|r| r.borrow_mut().clear());
    NOW.with(|x| x.set(0));
    CURRENT.with(|x| x.set(Some(threads(1)[0])));
}

/// Create `count` thread control blocks in the Running state. They are
/// leaked so that they can be referenced as `&'static`.
pub(crate) fn threads(count: usize) -> Vec<&'static ThreadCb<TestPort>> {
    (0..count)
        .map(|_| &*Box::leak(Box::new(ThreadCb::new(()))))
        .collect()
}

/// Take the list of threads made runnable since the last call, in order.
pub(crate) fn take_runnable() -> Vec<*const ThreadCb<TestPort>> {
    RUNNABLE.with(|r| std::mem::take(&mut *r.borrow_mut()))
}

/// Run `f` as an interrupt handler.
pub(crate) fn in_interrupt<R>(f: impl FnOnce() -> R) -> R {
    let was_interrupt = INTERRUPT.with(|x| x.replace(true));
    let ret = f();
    INTERRUPT.with(|x| x.set(was_interrupt));
    ret
}
