//! Waiting and waking up kernel threads on real host threads
#[macro_use]
mod common;

use common::leak;
use genwait::{ChannelId, ErrorKind, SLEEP_QUEUE_BUCKETS, CHANNEL_HASH_SHIFT};
use genwait_port_std::{interrupt, spawn, start_ticker, stop_ticker, timer_tick};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

port_test! {
    fn wake_one_is_fifo() {
        let ch = ChannelId::of(leak(0u8));

        let threads: Vec<_> = (0..3)
            .map(|i| {
                let t = spawn::<SystemTraits, _>(&format!("waiter{}", i), move || {
                    ENGINE.wait(ch, "fifo", 0, None)
                })
                .unwrap();
                // Make the arrival order deterministic
                t.wait_until_blocked(&ENGINE);
                t
            })
            .collect();

        assert_eq!(ENGINE.waiter_count(ch).unwrap(), 3);

        for (i, t) in threads.iter().enumerate() {
            assert!(ENGINE.is_waiting(t.cb()).unwrap());
            assert_eq!(ENGINE.wake_one(ch).unwrap(), 1);
            assert!(!ENGINE.is_waiting(t.cb()).unwrap());

            // Later arrivals are still waiting
            for later in &threads[i + 1..] {
                assert!(ENGINE.is_waiting(later.cb()).unwrap());
            }
        }

        assert_eq!(ENGINE.wake_one(ch).unwrap(), 0);
        for t in threads {
            assert_eq!(t.join().unwrap(), Ok(()));
        }
    }
}

port_test! {
    fn wake_all_delivers_error() {
        let ch = ChannelId::of(leak(0u8));

        let threads: Vec<_> = (0..4)
            .map(|i| {
                let t = spawn::<SystemTraits, _>(&format!("waiter{}", i), move || {
                    ENGINE.wait(ch, "err", 0, None)
                })
                .unwrap();
                t.wait_until_blocked(&ENGINE);
                t
            })
            .collect();

        assert_eq!(ENGINE.wake_all_err(ch, ErrorKind::Abandoned).unwrap(), 4);
        assert_eq!(ENGINE.wake_all(ch).unwrap(), 0);

        for t in threads {
            assert_eq!(t.join().unwrap(), Err(ErrorKind::Abandoned));
        }
    }
}

port_test! {
    fn wake_matching_respects_max_count() {
        let ch = ChannelId::of(leak(0u8));

        let threads: Vec<_> = (0..3)
            .map(|i| {
                let t = spawn::<SystemTraits, _>(&format!("waiter{}", i), move || {
                    ENGINE.wait(ch, "max", 0, None)
                })
                .unwrap();
                t.wait_until_blocked(&ENGINE);
                t
            })
            .collect();

        assert_eq!(ENGINE.wake_matching(ch, Some(2), None).unwrap(), 2);
        assert!(!ENGINE.is_waiting(threads[0].cb()).unwrap());
        assert!(!ENGINE.is_waiting(threads[1].cb()).unwrap());
        assert!(ENGINE.is_waiting(threads[2].cb()).unwrap());

        assert_eq!(ENGINE.wake_one_err(ch, ErrorKind::Interrupted).unwrap(), 1);

        let results: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
        assert_eq!(results, [Ok(()), Ok(()), Err(ErrorKind::Interrupted)]);
    }
}

port_test! {
    fn hash_collisions_are_not_woken() {
        let raw = 0x10_0000;
        let ch1 = ChannelId::from_raw(raw);
        let ch2 = ChannelId::from_raw(raw + (SLEEP_QUEUE_BUCKETS << CHANNEL_HASH_SHIFT));
        assert_eq!(genwait::bucket_of(ch1), genwait::bucket_of(ch2));

        let t2 = spawn::<SystemTraits, _>("on ch2", move || ENGINE.wait(ch2, "ch2", 0, None)).unwrap();
        t2.wait_until_blocked(&ENGINE);
        let t1 = spawn::<SystemTraits, _>("on ch1", move || ENGINE.wait(ch1, "ch1", 0, None)).unwrap();
        t1.wait_until_blocked(&ENGINE);

        assert_eq!(ENGINE.wake_all(ch1).unwrap(), 1);
        assert_eq!(t1.join().unwrap(), Ok(()));
        assert!(ENGINE.is_waiting(t2.cb()).unwrap());
        assert_eq!(ENGINE.waiter_count(ch1).unwrap(), 0);
        assert_eq!(ENGINE.waiter_count(ch2).unwrap(), 1);

        assert_eq!(ENGINE.wake_one(ch2).unwrap(), 1);
        assert_eq!(t2.join().unwrap(), Ok(()));
    }
}

port_test! {
    fn timeout_fires_at_deadline() {
        let ch = ChannelId::of(leak(0u8));

        let t = spawn::<SystemTraits, _>("timed", move || ENGINE.wait(ch, "timed", 50, None)).unwrap();
        t.wait_until_blocked(&ENGINE);

        assert_eq!(ENGINE.next_timeout().unwrap(), Some(50));
        assert_eq!(timer_tick(&ENGINE, 49).unwrap(), 0);
        assert!(ENGINE.is_waiting(t.cb()).unwrap());
        assert_eq!(timer_tick(&ENGINE, 1).unwrap(), 1);

        assert_eq!(t.join().unwrap(), Err(ErrorKind::TimedOut));
        assert_eq!(ENGINE.next_timeout().unwrap(), None);
        assert_eq!(ENGINE.waiter_count(ch).unwrap(), 0);
    }
}

port_test! {
    fn wake_before_timeout_wins() {
        let ch = ChannelId::of(leak(0u8));

        let t = spawn::<SystemTraits, _>("timed", move || {
            let mut calls = 0;
            let mut on_timeout = |_: ChannelId| calls += 1;
            let result = ENGINE.wait(ch, "timed", 100, Some(&mut on_timeout));
            (result, calls)
        })
        .unwrap();
        t.wait_until_blocked(&ENGINE);

        assert_eq!(ENGINE.wake_one(ch).unwrap(), 1);
        assert_eq!(ENGINE.next_timeout().unwrap(), None);
        assert_eq!(timer_tick(&ENGINE, 200).unwrap(), 0);

        assert_eq!(t.join().unwrap(), (Ok(()), 0));
    }
}

port_test! {
    fn timeout_callback_runs_once() {
        let ch = ChannelId::of(leak(0u8));

        let t = spawn::<SystemTraits, _>("timed", move || {
            let mut seen = Vec::new();
            let mut on_timeout = |c: ChannelId| seen.push(c);
            let result = ENGINE.wait(ch, "timed", 10, Some(&mut on_timeout));
            (result, seen)
        })
        .unwrap();
        t.wait_until_blocked(&ENGINE);

        assert_eq!(timer_tick(&ENGINE, 10).unwrap(), 1);
        assert_eq!(timer_tick(&ENGINE, 10).unwrap(), 0);
        // A late wake finds nobody
        assert_eq!(ENGINE.wake_all(ch).unwrap(), 0);

        assert_eq!(t.join().unwrap(), (Err(ErrorKind::TimedOut), vec![ch]));
    }
}

port_test! {
    fn wake_specific_thread_targets_one_waiter() {
        let ch = ChannelId::of(leak(0u8));
        let other = ChannelId::of(leak(0u8));

        let t1 = spawn::<SystemTraits, _>("t1", move || ENGINE.wait(ch, "t1", 0, None)).unwrap();
        t1.wait_until_blocked(&ENGINE);
        let t2 = spawn::<SystemTraits, _>("t2", move || ENGINE.wait(ch, "t2", 1000, None)).unwrap();
        t2.wait_until_blocked(&ENGINE);

        assert!(!ENGINE.wake_specific_thread(other, t2.cb(), None).unwrap());
        assert!(ENGINE
            .wake_specific_thread(ch, t2.cb(), Some(ErrorKind::Interrupted))
            .unwrap());
        assert!(!ENGINE.wake_specific_thread(ch, t2.cb(), None).unwrap());
        assert_eq!(t2.join().unwrap(), Err(ErrorKind::Interrupted));
        assert_eq!(ENGINE.next_timeout().unwrap(), None);

        assert!(ENGINE.is_waiting(t1.cb()).unwrap());
        assert_eq!(ENGINE.wake_all(ch).unwrap(), 1);
        assert_eq!(t1.join().unwrap(), Ok(()));
    }
}

port_test! {
    fn wait_requires_thread_context() {
        let ch = ChannelId::of(leak(0u8));

        // The test harness thread isn't a kernel thread
        assert_eq!(ENGINE.wait(ch, "x", 0, None), Err(ErrorKind::WrongContext));

        let t = spawn::<SystemTraits, _>("irq", move || {
            interrupt::<SystemTraits, _>(|| ENGINE.wait(ch, "x", 10, None))
        })
        .unwrap();
        assert_eq!(t.join().unwrap(), Err(ErrorKind::WrongContext));

        assert_eq!(ENGINE.waiter_count(ch).unwrap(), 0);
        assert_eq!(ENGINE.next_timeout().unwrap(), None);

        // Waking is allowed anywhere
        assert_eq!(
            interrupt::<SystemTraits, _>(|| ENGINE.wake_all(ch)).unwrap(),
            0
        );
    }
}

port_test! {
    fn sleep_ms_expires_on_timeout() {
        let t = spawn::<SystemTraits, _>("sleeper", || {
            assert_eq!(ENGINE.sleep_ms(0), Ok(()));
            ENGINE.sleep_ms(20)
        })
        .unwrap();
        t.wait_until_blocked(&ENGINE);

        let mut labels = Vec::new();
        assert_eq!(ENGINE.waiters(|info| labels.push(info.label)).unwrap(), 1);
        assert_eq!(labels, ["sleep"]);

        assert_eq!(timer_tick(&ENGINE, 19).unwrap(), 0);
        assert_eq!(timer_tick(&ENGINE, 1).unwrap(), 1);
        assert_eq!(t.join().unwrap(), Ok(()));
    }
}

port_test! {
    fn sleepers_have_own_channels() {
        let sleepers: Vec<_> = (0..2)
            .map(|i| {
                let t = spawn::<SystemTraits, _>(&format!("sleeper{}", i), || ENGINE.sleep_ms(100))
                    .unwrap();
                t.wait_until_blocked(&ENGINE);
                t
            })
            .collect();

        let mut channels = Vec::new();
        ENGINE
            .waiters(|info| {
                let i = sleepers
                    .iter()
                    .position(|t| core::ptr::eq(t.cb(), info.thread))
                    .unwrap();
                channels.push((i, info.channel));
            })
            .unwrap();
        channels.sort();
        assert_eq!(channels.len(), 2);
        assert_ne!(channels[0].1, channels[1].1);

        // Waking one sleeper's channel ends only that sleep
        assert_eq!(ENGINE.wake_all(channels[0].1).unwrap(), 1);
        assert!(ENGINE.is_waiting(sleepers[1].cb()).unwrap());

        assert_eq!(timer_tick(&ENGINE, 100).unwrap(), 1);
        for t in sleepers {
            assert_eq!(t.join().unwrap(), Ok(()));
        }
    }
}

port_test! {
    fn ticker_drives_timeouts() {
        let ch = ChannelId::of(leak(0u8));
        start_ticker(&ENGINE, Duration::from_millis(1)).unwrap();

        let t = spawn::<SystemTraits, _>("timed", move || ENGINE.wait(ch, "ticked", 5, None)).unwrap();
        assert_eq!(t.join().unwrap(), Err(ErrorKind::TimedOut));

        stop_ticker::<SystemTraits>();
    }
}

port_test! {
    fn shutdown_abandons_waiters() {
        let ch = ChannelId::of(leak(0u8));
        let woke = Arc::new(Mutex::new(false));

        let t = {
            let woke = Arc::clone(&woke);
            spawn::<SystemTraits, _>("abandoned", move || {
                let _ = ENGINE.wait(ch, "abandoned", 10, None);
                *woke.lock().unwrap() = true;
            })
            .unwrap()
        };
        t.wait_until_blocked(&ENGINE);

        assert_eq!(ENGINE.shutdown().unwrap(), 1);
        assert!(!ENGINE.is_waiting(t.cb()).unwrap());
        assert_eq!(ENGINE.next_timeout().unwrap(), None);
        assert_eq!(timer_tick(&ENGINE, 100).unwrap(), 0);
        assert_eq!(ENGINE.wake_all(ch).unwrap(), 0);

        // The abandoned thread is never resumed
        std::thread::sleep(Duration::from_millis(20));
        assert!(!*woke.lock().unwrap());
    }
}
