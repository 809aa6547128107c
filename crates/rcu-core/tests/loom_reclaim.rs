//! Model-checked exploration of reader/writer interleavings around the
//! reclaimer and the write-preferring lock.
//!
//! Only compiled and run under `cargo test --features loom`; loom's model
//! checker replaces the real atomics and thread scheduler with its own, so
//! this file cannot be combined with the normal test binary.

#![cfg(feature = "loom")]

use loom::sync::Arc;
use loom::thread;

use rcu_core::reclaim::Reclaimer;

#[test]
fn enter_leave_never_observes_a_torn_generation() {
    loom::model(|| {
        let reclaimer = Arc::new(Reclaimer::new());

        let r1 = {
            let reclaimer = reclaimer.clone();
            thread::spawn(move || {
                let handle = reclaimer.enter();
                reclaimer.leave(handle);
            })
        };
        let r2 = {
            let reclaimer = reclaimer.clone();
            thread::spawn(move || {
                let handle = reclaimer.enter();
                reclaimer.leave(handle);
            })
        };

        reclaimer.synchronize();

        r1.join().unwrap();
        r2.join().unwrap();
    });
}

#[test]
fn defer_destroy_runs_exactly_once_under_every_interleaving() {
    loom::model(|| {
        let reclaimer = Arc::new(Reclaimer::new());
        let ran = Arc::new(loom::sync::atomic::AtomicUsize::new(0));

        let handle = reclaimer.enter();

        let ran2 = ran.clone();
        reclaimer
            .defer_destroy(Box::new(move || {
                ran2.fetch_add(1, loom::sync::atomic::Ordering::SeqCst);
            }))
            .unwrap();

        let reclaimer2 = reclaimer.clone();
        let leaver = thread::spawn(move || {
            reclaimer2.leave(handle);
        });

        leaver.join().unwrap();
        reclaimer.collect_through(reclaimer.get_generation());

        assert_eq!(ran.load(loom::sync::atomic::Ordering::SeqCst), 1);
    });
}
