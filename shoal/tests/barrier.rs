//! Barrier and sync across every registered algorithm.

mod common;

use common::{run, run_with_env};
use shoal::{sync_psync_words, Team, SYNC_VALUE};

const ALGORITHMS: &[&str] = &["linear", "complete_tree", "binomial_tree", "knomial_tree", "dissemination"];

// Counter increments on either side of a barrier must not interleave: the
// largest pre-barrier observation is below the smallest post-barrier one.
fn pre_post_separation(alg: &'static str, npes: usize) {
    let results = run_with_env(npes, &[("SHMEM_BARRIER_ALL_ALGORITHM", alg)], move |pe| {
        let counter = pe.alloc::<i64>(1).unwrap();
        let pre = pe.atomic_fetch_add(counter, 1, 0).unwrap();
        pe.barrier_all().unwrap();
        let post = pe.atomic_fetch_add(counter, 1, 0).unwrap();
        pe.barrier_all().unwrap();
        (pre, post)
    });
    let max_pre = results.iter().map(|&(pre, _)| pre).max().unwrap();
    let min_post = results.iter().map(|&(_, post)| post).min().unwrap();
    assert!(max_pre < min_post, "{}: pre {} overlaps post {}", alg, max_pre, min_post);
    assert_eq!(max_pre, npes as i64 - 1);
    assert_eq!(min_post, npes as i64);
}

#[test]
fn barrier_separates_epochs_n4() {
    for &alg in ALGORITHMS {
        pre_post_separation(alg, 4);
    }
}

#[test]
fn barrier_separates_epochs_n5() {
    // Exercises partial trees and the non-power-of-two dissemination wrap.
    for &alg in ALGORITHMS {
        pre_post_separation(alg, 5);
    }
}

#[test]
fn repeated_barriers_reuse_state() {
    for &alg in ALGORITHMS {
        run_with_env(4, &[("SHMEM_BARRIER_ALL_ALGORITHM", alg)], |pe| {
            for _ in 0..100 {
                pe.barrier_all().unwrap();
            }
            0
        });
    }
}

#[test]
fn active_set_barrier_restores_psync_to_sentinel() {
    for &alg in ALGORITHMS {
        run_with_env(4, &[("SHMEM_BARRIER_ALGORITHM", alg)], |pe| {
            let words = sync_psync_words(pe.n_pes());
            let psync = pe.alloc::<i64>(words).unwrap();
            for _ in 0..10 {
                pe.barrier(0, 0, pe.n_pes(), psync).unwrap();
                for w in 0..words {
                    assert_eq!(psync.read(w), SYNC_VALUE, "pSync word {} not at sentinel", w);
                }
            }
            0
        });
    }
}

#[test]
fn strided_active_set_synchronizes_only_members() {
    run(4, |pe| {
        let psync = pe.alloc::<i64>(sync_psync_words(2)).unwrap();
        let counter = pe.alloc::<i64>(1).unwrap();
        if pe.my_pe() % 2 == 0 {
            // PEs 0 and 2: stride 2 active set.
            pe.atomic_add(counter, 1, 0).unwrap();
            pe.barrier(0, 1, 2, psync).unwrap();
            let seen = pe.atomic_fetch(counter, 0).unwrap();
            assert_eq!(seen, 2, "both members' increments visible after the set barrier");
        }
        pe.barrier_all().unwrap();
        0
    });
}

#[test]
fn sync_all_without_completion_phase() {
    run(3, |pe| {
        for _ in 0..20 {
            pe.sync_all().unwrap();
        }
        0
    });
}

#[test]
fn team_sync_spans_exactly_the_team() {
    run(4, |pe| {
        let team = pe.team_split_strided(Team::WORLD, 0, 2, 2, Default::default()).unwrap();
        let counter = pe.alloc::<i64>(1).unwrap();
        if pe.team_my_pe(team) >= 0 {
            pe.atomic_add(counter, 1, 0).unwrap();
            pe.team_sync(team).unwrap();
            assert_eq!(pe.atomic_fetch(counter, 0).unwrap(), 2);
        }
        pe.barrier_all().unwrap();
        0
    });
}
