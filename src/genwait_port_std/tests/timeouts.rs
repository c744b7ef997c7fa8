//! Timeout ordering on real host threads
#[macro_use]
mod common;

use common::leak;
use genwait::{ChannelId, ErrorKind};
use genwait_port_std::{set_time, spawn, timer_tick};
use std::sync::{Arc, Mutex};

port_test! {
    fn expire_in_deadline_then_arrival_order() {
        let ch = ChannelId::of(leak(0u8));
        let expired = Arc::new(Mutex::new(Vec::new()));

        // Equal deadlines expire in the order the waits started
        let timeouts = [30, 10, 20, 10];

        let threads: Vec<_> = timeouts
            .iter()
            .enumerate()
            .map(|(i, &timeout_ms)| {
                let expired = Arc::clone(&expired);
                let t = spawn::<SystemTraits, _>(&format!("waiter{}", i), move || {
                    let mut on_timeout = |_: ChannelId| expired.lock().unwrap().push(i);
                    ENGINE.wait(ch, "ordered", timeout_ms, Some(&mut on_timeout))
                })
                .unwrap();
                t.wait_until_blocked(&ENGINE);
                t
            })
            .collect();

        assert_eq!(ENGINE.next_timeout().unwrap(), Some(10));
        assert_eq!(timer_tick(&ENGINE, 10).unwrap(), 2);
        assert_eq!(*expired.lock().unwrap(), [1, 3]);

        assert_eq!(ENGINE.next_timeout().unwrap(), Some(20));
        assert_eq!(timer_tick(&ENGINE, 15).unwrap(), 1);
        assert_eq!(*expired.lock().unwrap(), [1, 3, 2]);

        assert_eq!(ENGINE.next_timeout().unwrap(), Some(30));
        assert_eq!(timer_tick(&ENGINE, 5).unwrap(), 1);
        assert_eq!(*expired.lock().unwrap(), [1, 3, 2, 0]);
        assert_eq!(ENGINE.next_timeout().unwrap(), None);

        for t in threads {
            assert_eq!(t.join().unwrap(), Err(ErrorKind::TimedOut));
        }
    }
}

port_test! {
    fn deadline_is_relative_to_now() {
        let ch = ChannelId::of(leak(0u8));
        set_time::<SystemTraits>(1_000);

        let t = spawn::<SystemTraits, _>("waiter", move || ENGINE.wait(ch, "late", 25, None)).unwrap();
        t.wait_until_blocked(&ENGINE);

        assert_eq!(ENGINE.next_timeout().unwrap(), Some(1_025));
        assert_eq!(ENGINE.check_timeouts(1_024).unwrap(), 0);
        assert_eq!(ENGINE.check_timeouts(1_025).unwrap(), 1);
        assert_eq!(t.join().unwrap(), Err(ErrorKind::TimedOut));
    }
}

port_test! {
    fn untimed_waits_never_expire() {
        let ch = ChannelId::of(leak(0u8));

        let t = spawn::<SystemTraits, _>("waiter", move || ENGINE.wait(ch, "forever", 0, None)).unwrap();
        t.wait_until_blocked(&ENGINE);

        assert_eq!(ENGINE.next_timeout().unwrap(), None);
        assert_eq!(ENGINE.check_timeouts(u64::MAX).unwrap(), 0);
        assert!(ENGINE.is_waiting(t.cb()).unwrap());

        assert_eq!(ENGINE.wake_one(ch).unwrap(), 1);
        assert_eq!(t.join().unwrap(), Ok(()));
    }
}
