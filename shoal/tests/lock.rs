//! Mutual exclusion through the distributed lock.

mod common;

use common::run;

#[test]
fn contended_increments_never_collide() {
    const ROUNDS: usize = 100;
    let results = common::run_with_env(4, &[], |pe| {
        let lock = pe.alloc::<i64>(1).unwrap();
        let counter = pe.alloc::<i64>(1).unwrap();
        let mut observed = Vec::with_capacity(ROUNDS);
        for _ in 0..ROUNDS {
            pe.set_lock(lock).unwrap();
            observed.push(pe.atomic_fetch_inc(counter, 0).unwrap());
            pe.clear_lock(lock).unwrap();
        }
        pe.barrier_all().unwrap();
        let total = if pe.my_pe() == 0 { counter.read(0) } else { -1 };
        pe.barrier_all().unwrap();
        (total, observed)
    });
    assert_eq!(results[0].0, 400);
    let mut all: Vec<i64> = results.into_iter().flat_map(|(_, o)| o).collect();
    assert_eq!(all.len(), 400);
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), 400, "two critical sections observed the same count");
}

#[test]
fn critical_sections_serialize_nonatomic_updates() {
    // Read-modify-write without atomics: only mutual exclusion makes the
    // final count come out right.
    const ROUNDS: usize = 50;
    run(4, |pe| {
        let lock = pe.alloc::<i64>(1).unwrap();
        let shared = pe.alloc::<i64>(1).unwrap();
        for _ in 0..ROUNDS {
            pe.set_lock(lock).unwrap();
            let v = pe.g(shared, 0).unwrap();
            std::thread::yield_now();
            pe.p(shared, v + 1, 0).unwrap();
            pe.clear_lock(lock).unwrap();
        }
        pe.barrier_all().unwrap();
        if pe.my_pe() == 0 {
            assert_eq!(shared.read(0), 4 * ROUNDS as i64);
        }
        pe.barrier_all().unwrap();
        0
    });
}

#[test]
fn test_lock_refuses_a_held_lock() {
    run(3, |pe| {
        let lock = pe.alloc::<i64>(1).unwrap();
        if pe.my_pe() == 0 {
            assert!(pe.test_lock(lock).unwrap());
        }
        pe.barrier_all().unwrap();
        if pe.my_pe() != 0 {
            assert!(!pe.test_lock(lock).unwrap(), "lock is held by PE 0");
        }
        pe.barrier_all().unwrap();
        if pe.my_pe() == 0 {
            pe.clear_lock(lock).unwrap();
        }
        pe.barrier_all().unwrap();
        if pe.my_pe() == 1 {
            assert!(pe.test_lock(lock).unwrap(), "released lock is takeable");
            pe.clear_lock(lock).unwrap();
        }
        pe.barrier_all().unwrap();
        0
    });
}

#[test]
fn lock_reuse_across_epochs() {
    run(2, |pe| {
        let lock = pe.alloc::<i64>(1).unwrap();
        for _ in 0..25 {
            pe.set_lock(lock).unwrap();
            pe.clear_lock(lock).unwrap();
        }
        pe.barrier_all().unwrap();
        // The lock word is back at rest on every PE.
        assert_eq!(lock.read(0), 0);
        0
    });
}
