// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named mutex: exclusive creation, attach, exclusion between holders.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use libshiori::{Error, NamedMutex};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("/{prefix}_{}_{n}", std::process::id())
}

#[test]
fn create_and_close() {
    let name = unique_name("mtx_create");
    NamedMutex::clear_storage(&name);

    let mut mtx = NamedMutex::create(&name).expect("create");
    assert!(mtx.is_open());
    assert!(mtx.is_owned());
    assert_eq!(mtx.name(), name);
    mtx.close();
    assert!(!mtx.is_open());
    mtx.close();
}

#[test]
fn second_create_is_already_held() {
    let name = unique_name("mtx_twice");
    NamedMutex::clear_storage(&name);

    let _first = NamedMutex::create(&name).expect("create");
    match NamedMutex::create(&name) {
        Err(Error::AlreadyHeld { name: held }) => assert_eq!(held, name),
        Err(other) => panic!("expected AlreadyHeld, got {other:?}"),
        Ok(_) => panic!("second create succeeded"),
    }
}

#[test]
fn close_frees_the_name() {
    let name = unique_name("mtx_reuse");
    NamedMutex::clear_storage(&name);

    drop(NamedMutex::create(&name).expect("create"));
    let again = NamedMutex::create(&name).expect("create after close");
    assert!(again.is_owned());
}

#[test]
fn attached_close_keeps_the_name() {
    let name = unique_name("mtx_attach");
    NamedMutex::clear_storage(&name);

    let owner = NamedMutex::create(&name).expect("create");
    let attached = NamedMutex::attach(&name).expect("attach");
    assert!(!attached.is_owned());
    drop(attached);

    assert!(matches!(NamedMutex::create(&name), Err(Error::AlreadyHeld { .. })));
    drop(owner);
}

#[test]
fn attach_without_creator_fails() {
    let name = unique_name("mtx_missing");
    NamedMutex::clear_storage(&name);
    assert!(matches!(NamedMutex::attach(&name), Err(Error::System { .. })));
}

#[test]
fn try_lock_sees_other_holder() {
    let name = unique_name("mtx_try");
    NamedMutex::clear_storage(&name);

    let owner = NamedMutex::create(&name).expect("create");
    let other = NamedMutex::attach(&name).expect("attach");

    owner.lock().expect("lock");
    assert!(!other.try_lock().expect("try_lock"));
    owner.unlock().expect("unlock");
    assert!(other.try_lock().expect("try_lock"));
    other.unlock().expect("unlock");
}

#[test]
fn guard_releases_on_early_return() {
    let name = unique_name("mtx_guard");
    NamedMutex::clear_storage(&name);
    let mtx = NamedMutex::create(&name).expect("create");

    fn fails_while_locked(mtx: &NamedMutex) -> libshiori::Result<()> {
        let _guard = mtx.guard()?;
        Err(Error::InvalidInput("bail".into()))
    }

    assert!(fails_while_locked(&mtx).is_err());
    assert!(mtx.try_lock().expect("try_lock"));
    mtx.unlock().expect("unlock");
}

#[test]
fn critical_sections_never_overlap() {
    let name = unique_name("mtx_excl");
    NamedMutex::clear_storage(&name);
    let _owner = NamedMutex::create(&name).expect("create");

    const THREADS: usize = 4;
    const ITERS: usize = 200;
    let inside = Arc::new(AtomicI32::new(0));
    let max_seen = Arc::new(AtomicI32::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let name = name.clone();
            let inside = Arc::clone(&inside);
            let max_seen = Arc::clone(&max_seen);
            thread::spawn(move || {
                let mtx = NamedMutex::attach(&name).expect("attach");
                for i in 0..ITERS {
                    let _guard = mtx.guard().expect("guard");
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    if i % 16 == 0 {
                        thread::sleep(Duration::from_micros(50));
                    }
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().expect("worker");
    }
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert_eq!(inside.load(Ordering::SeqCst), 0);
}
