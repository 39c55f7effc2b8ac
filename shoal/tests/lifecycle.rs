//! Library lifecycle: reference counting, thread levels, teardown.

mod common;

use common::{run, run_raw};
use shoal::{Config, ThreadLevel};

#[test]
fn refcounted_reinitialization() {
    run(2, |pe| {
        assert!(pe.initialized());
        assert!(!pe.finalized());
        let level = pe.init();
        assert_eq!(level, ThreadLevel::Single);
        // Two inits, one finalize: still up.
        pe.finalize();
        assert!(pe.initialized());
        pe.barrier_all().unwrap();
        0
    });
}

#[test]
fn multiple_downgrades_to_serialized() {
    let results = run_raw(2, &[], |pe| {
        let provided = pe.init_thread(ThreadLevel::Multiple);
        pe.finalize();
        provided
    });
    for r in results {
        // The harness requested Single at startup; re-init reports the
        // provided level, which never exceeds Serialized.
        assert!(r.unwrap() <= ThreadLevel::Serialized);
    }
}

#[test]
fn explicit_finalize_tears_down_once() {
    let results = run_raw(3, &[], |pe| {
        pe.barrier_all().unwrap();
        pe.finalize();
        (pe.initialized(), pe.finalized())
    });
    for r in results {
        let (initialized, finalized) = r.unwrap();
        assert!(!initialized);
        assert!(finalized);
    }
}

#[test]
fn calls_after_finalize_are_fatal() {
    let results = run_raw(2, &[], |pe| {
        pe.finalize();
        // Every PE attempts the same post-finalize call, so the whole job
        // aborts rather than deadlocking.
        pe.barrier_all().unwrap();
        0
    });
    assert!(results.iter().all(Result::is_err));
}

#[test]
fn execute_from_args_parses_pe_count() {
    let guards = shoal::execute_from_args(["-n".to_owned(), "2".to_owned()].into_iter(), |pe| {
        pe.barrier_all().unwrap();
        pe.n_pes()
    })
    .unwrap();
    for result in guards.join() {
        assert_eq!(result.unwrap(), 2);
    }
    assert!(shoal::execute_from_args(["--pes".to_owned(), "zero".to_owned()].into_iter(), |_pe| 0).is_err());
}

#[test]
fn single_pe_jobs_run() {
    let guards = shoal::execute(Config::Thread, |pe| {
        assert_eq!(pe.n_pes(), 1);
        assert_eq!(pe.my_pe(), 0);
        pe.barrier_all().unwrap();
        pe.sync_all().unwrap();
        42
    })
    .unwrap();
    assert_eq!(guards.join().pop().unwrap().unwrap(), 42);
}
