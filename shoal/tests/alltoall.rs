//! All-to-all across every schedule and completion flavor.

mod common;

use common::run_with_env;
use shoal::{Error, Team};

const ALGORITHMS: &[&str] = &[
    "shift_exchange_barrier",
    "shift_exchange_counter",
    "shift_exchange_signal",
    "xor_pairwise_barrier",
    "xor_pairwise_counter",
    "xor_pairwise_signal",
    "color_pairwise_barrier",
    "color_pairwise_counter",
    "color_pairwise_signal",
];

fn alltoall_case(alg: &'static str, npes: usize, nelems: usize) {
    run_with_env(npes, &[("SHMEM_ALLTOALL_ALGORITHM", alg)], move |pe| {
        let me = pe.my_pe();
        let src = pe.alloc::<i64>(npes * nelems).unwrap();
        let dst = pe.alloc::<i64>(npes * nelems).unwrap();
        // Block for rank j carries me * 1000 + j.
        for j in 0..npes {
            for k in 0..nelems {
                src.write(j * nelems + k, (me * 1000 + j) as i64);
            }
        }
        pe.barrier_all().unwrap();
        pe.alltoall(Team::WORLD, dst, src, nelems).unwrap();
        for i in 0..npes {
            for k in 0..nelems {
                assert_eq!(dst.read(i * nelems + k), (i * 1000 + me) as i64, "PE {} from {} ({})", me, i, alg);
            }
        }
        pe.barrier_all().unwrap();
        0
    });
}

#[test]
fn alltoall_four_pes() {
    for &alg in ALGORITHMS {
        alltoall_case(alg, 4, 1);
    }
}

#[test]
fn alltoall_multi_element_blocks() {
    for &alg in ALGORITHMS {
        alltoall_case(alg, 4, 5);
    }
}

#[test]
fn alltoall_odd_team() {
    for &alg in ALGORITHMS {
        if alg.starts_with("xor_pairwise") {
            continue;
        }
        alltoall_case(alg, 5, 2);
    }
}

#[test]
fn ranks_spread_identity() {
    // PE i sends [i, i, i, i]; every PE ends with [0, 1, 2, 3].
    run_with_env(4, &[("SHMEM_ALLTOALL_ALGORITHM", "shift_exchange_barrier")], |pe| {
        let src = pe.alloc::<i64>(4).unwrap();
        let dst = pe.alloc::<i64>(4).unwrap();
        for j in 0..4 {
            src.write(j, pe.my_pe() as i64);
        }
        pe.barrier_all().unwrap();
        pe.alltoall(Team::WORLD, dst, src, 1).unwrap();
        assert_eq!(dst.local(), &[0, 1, 2, 3]);
        pe.barrier_all().unwrap();
        0
    });
}

#[test]
fn xor_rejects_non_power_of_two() {
    run_with_env(3, &[("SHMEM_ALLTOALL_ALGORITHM", "xor_pairwise_counter")], |pe| {
        let src = pe.alloc::<i64>(3).unwrap();
        let dst = pe.alloc::<i64>(3).unwrap();
        assert!(matches!(
            pe.alltoall(Team::WORLD, dst, src, 1),
            Err(Error::AlgorithmUnsupported { .. })
        ));
        pe.barrier_all().unwrap();
        0
    });
}

#[test]
fn alltoall_twice_is_identity() {
    // The exchange is a transpose; applying it twice restores the data.
    for &alg in &["xor_pairwise_signal", "color_pairwise_counter"] {
        run_with_env(4, &[("SHMEM_ALLTOALL_ALGORITHM", alg)], |pe| {
            let me = pe.my_pe();
            let src = pe.alloc::<i64>(4).unwrap();
            let mid = pe.alloc::<i64>(4).unwrap();
            let out = pe.alloc::<i64>(4).unwrap();
            for j in 0..4 {
                src.write(j, (me * 10 + j) as i64);
            }
            pe.barrier_all().unwrap();
            pe.alltoall(Team::WORLD, mid, src, 1).unwrap();
            pe.barrier_all().unwrap();
            pe.alltoall(Team::WORLD, out, mid, 1).unwrap();
            for j in 0..4 {
                assert_eq!(out.read(j), (me * 10 + j) as i64);
            }
            pe.barrier_all().unwrap();
            0
        });
    }
}

#[test]
fn alltoalls_strided_blocks() {
    run_with_env(4, &[("SHMEM_ALLTOALLS_ALGORITHM", "shift_exchange_counter")], |pe| {
        let me = pe.my_pe();
        let nelems = 2;
        let (sst, tst) = (1, 3);
        let src = pe.alloc::<i64>(4 * nelems * sst).unwrap();
        let dst = pe.alloc::<i64>(4 * nelems * tst).unwrap();
        for j in 0..4 {
            for k in 0..nelems {
                src.write((j * nelems + k) * sst, (me * 100 + j * 10 + k) as i64);
            }
        }
        for i in 0..4 * nelems * tst {
            dst.write(i, -7);
        }
        pe.barrier_all().unwrap();
        pe.alltoalls(Team::WORLD, dst, src, tst, sst, nelems).unwrap();
        for i in 0..4 {
            for k in 0..nelems {
                assert_eq!(
                    dst.read((i * nelems + k) * tst),
                    (i * 100 + me * 10 + k) as i64,
                    "PE {} from {} elem {}",
                    me,
                    i,
                    k
                );
            }
        }
        // The gaps between strided elements stay untouched.
        assert_eq!(dst.read(1), -7);
        pe.barrier_all().unwrap();
        0
    });
}

#[test]
fn rounds_sync_knob_does_not_change_output() {
    for &pace in &["1", "2", "16"] {
        run_with_env(
            4,
            &[("SHMEM_ALLTOALL_ALGORITHM", "shift_exchange_barrier"), ("SHMEM_ALLTOALL_ROUNDS_SYNC", pace)],
            |pe| {
                let me = pe.my_pe();
                let src = pe.alloc::<i64>(4).unwrap();
                let dst = pe.alloc::<i64>(4).unwrap();
                for j in 0..4 {
                    src.write(j, (me * 7 + j) as i64);
                }
                pe.barrier_all().unwrap();
                pe.alltoall(Team::WORLD, dst, src, 1).unwrap();
                for i in 0..4 {
                    assert_eq!(dst.read(i), (i * 7 + me) as i64);
                }
                pe.barrier_all().unwrap();
                0
            },
        );
    }
}
