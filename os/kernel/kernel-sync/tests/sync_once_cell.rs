use kernel_sync::SyncOnceCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn get_before_init_is_none() {
    let c = SyncOnceCell::<u32>::new();
    assert!(c.get().is_none());
    assert_eq!(*c.get_or_init(|| 5), 5);
    assert_eq!(c.get(), Some(&5));
}

#[test]
fn set_only_succeeds_once() {
    let c = SyncOnceCell::new();
    assert_eq!(c.set(1u8), Ok(()));
    assert_eq!(c.set(2u8), Err(2));
    // get_or_init must not run its closure after set
    assert_eq!(*c.get_or_init(|| unreachable!()), 1);
}

#[test]
fn concurrent_get_or_init_runs_initializer_once() {
    let threads = 8;
    let cell = Arc::new(SyncOnceCell::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let cell = Arc::clone(&cell);
            let calls = Arc::clone(&calls);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                *cell.get_or_init(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    i
                })
            })
        })
        .collect();

    let seen: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(seen.windows(2).all(|w| w[0] == w[1]));
}
