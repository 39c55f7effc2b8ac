//! Reductions across every registered algorithm, op, and type family.

mod common;

use common::run_with_env;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use shoal::Team;

const ALGORITHMS: &[&str] = &["linear", "binomial", "rec_dbl", "rabenseifner", "rabenseifner2"];

fn sum_case(alg: &'static str, npes: usize) {
    run_with_env(npes, &[("SHMEM_SUM_REDUCE_ALGORITHM", alg)], move |pe| {
        let me = pe.my_pe() as i64;
        let src = pe.alloc::<i64>(2).unwrap();
        let dst = pe.alloc::<i64>(2).unwrap();
        src.write(0, me);
        src.write(1, 2 * me);
        pe.barrier_all().unwrap();
        pe.sum_reduce(Team::WORLD, dst, src, 2).unwrap();
        let expect: i64 = (0..npes as i64).sum();
        assert_eq!(dst.read(0), expect, "{} npes {}", alg, npes);
        assert_eq!(dst.read(1), 2 * expect, "{} npes {}", alg, npes);
        pe.barrier_all().unwrap();
        0
    });
}

#[test]
fn int_sum_every_algorithm_n4() {
    // PE i contributes [i, 2i]; everyone ends with [6, 12].
    for &alg in ALGORITHMS {
        sum_case(alg, 4);
    }
}

#[test]
fn int_sum_non_power_of_two_teams() {
    for &alg in ALGORITHMS {
        sum_case(alg, 3);
        sum_case(alg, 6);
    }
}

#[test]
fn integer_results_are_algorithm_independent() {
    let mut outputs: Vec<Vec<i64>> = Vec::new();
    for &alg in ALGORITHMS {
        let results = run_with_env(4, &[("SHMEM_SUM_REDUCE_ALGORITHM", alg)], |pe| {
            let n = 17;
            let src = pe.alloc::<i64>(n).unwrap();
            let dst = pe.alloc::<i64>(n).unwrap();
            // Deterministic per-rank inputs, identical for every algorithm.
            let mut rng = SmallRng::seed_from_u64(0xD1CE ^ pe.my_pe() as u64);
            for i in 0..n {
                src.write(i, rng.gen_range(-1_000_000..1_000_000));
            }
            pe.barrier_all().unwrap();
            pe.sum_reduce(Team::WORLD, dst, src, n).unwrap();
            let out: Vec<i64> = dst.local().to_vec();
            pe.barrier_all().unwrap();
            out
        });
        // Every PE holds the same vector.
        for r in &results {
            assert_eq!(r, &results[0], "algorithm {}", alg);
        }
        outputs.push(results.into_iter().next().unwrap());
    }
    for out in &outputs {
        assert_eq!(out, &outputs[0], "integer reductions must agree across algorithms");
    }
}

#[test]
fn bitwise_ops_over_unsigned() {
    for &alg in ALGORITHMS {
        run_with_env(
            4,
            &[
                ("SHMEM_AND_REDUCE_ALGORITHM", alg),
                ("SHMEM_OR_REDUCE_ALGORITHM", alg),
                ("SHMEM_XOR_REDUCE_ALGORITHM", alg),
            ],
            |pe| {
                let me = pe.my_pe() as u32;
                let src = pe.alloc::<u32>(1).unwrap();
                let dst = pe.alloc::<u32>(1).unwrap();

                src.write(0, 0xF0F0_00FF | (1 << me));
                pe.barrier_all().unwrap();
                pe.and_reduce(Team::WORLD, dst, src, 1).unwrap();
                assert_eq!(dst.read(0), 0xF0F0_00FF);

                src.write(0, 1 << me);
                pe.barrier_all().unwrap();
                pe.or_reduce(Team::WORLD, dst, src, 1).unwrap();
                assert_eq!(dst.read(0), 0b1111);

                src.write(0, (me + 1) as u32);
                pe.barrier_all().unwrap();
                pe.xor_reduce(Team::WORLD, dst, src, 1).unwrap();
                assert_eq!(dst.read(0), 1 ^ 2 ^ 3 ^ 4);

                pe.barrier_all().unwrap();
                0
            },
        );
    }
}

#[test]
fn min_max_over_signed_and_float() {
    for &alg in ALGORITHMS {
        run_with_env(
            4,
            &[("SHMEM_MIN_REDUCE_ALGORITHM", alg), ("SHMEM_MAX_REDUCE_ALGORITHM", alg)],
            |pe| {
                let me = pe.my_pe() as i64;
                let src = pe.alloc::<i64>(2).unwrap();
                let dst = pe.alloc::<i64>(2).unwrap();
                src.write(0, 10 - 3 * me);
                src.write(1, me * me);
                pe.barrier_all().unwrap();
                pe.min_reduce(Team::WORLD, dst, src, 2).unwrap();
                assert_eq!(dst.read(0), 1);
                assert_eq!(dst.read(1), 0);
                pe.max_reduce(Team::WORLD, dst, src, 2).unwrap();
                assert_eq!(dst.read(0), 10);
                assert_eq!(dst.read(1), 9);

                let fsrc = pe.alloc::<f64>(1).unwrap();
                let fdst = pe.alloc::<f64>(1).unwrap();
                fsrc.write(0, pe.my_pe() as f64 - 1.5);
                pe.barrier_all().unwrap();
                pe.min_reduce(Team::WORLD, fdst, fsrc, 1).unwrap();
                assert_eq!(fdst.read(0), -1.5);
                pe.max_reduce(Team::WORLD, fdst, fsrc, 1).unwrap();
                assert_eq!(fdst.read(0), 1.5);
                pe.barrier_all().unwrap();
                0
            },
        );
    }
}

#[test]
fn prod_and_float_sum() {
    for &alg in ALGORITHMS {
        run_with_env(
            4,
            &[("SHMEM_PROD_REDUCE_ALGORITHM", alg), ("SHMEM_SUM_REDUCE_ALGORITHM", alg)],
            |pe| {
                let me = pe.my_pe();
                let src = pe.alloc::<i32>(1).unwrap();
                let dst = pe.alloc::<i32>(1).unwrap();
                src.write(0, me as i32 + 1);
                pe.barrier_all().unwrap();
                pe.prod_reduce(Team::WORLD, dst, src, 1).unwrap();
                assert_eq!(dst.read(0), 24);

                // Halves sum exactly in binary floating point, so every
                // combine order yields the same bits here.
                let fsrc = pe.alloc::<f32>(1).unwrap();
                let fdst = pe.alloc::<f32>(1).unwrap();
                fsrc.write(0, me as f32 + 0.5);
                pe.barrier_all().unwrap();
                pe.sum_reduce(Team::WORLD, fdst, fsrc, 1).unwrap();
                assert_eq!(fdst.read(0), 8.0);
                pe.barrier_all().unwrap();
                0
            },
        );
    }
}

#[test]
fn reduce_on_a_subteam() {
    run_with_env(4, &[("SHMEM_SUM_REDUCE_ALGORITHM", "binomial")], |pe| {
        let team = pe.team_split_strided(Team::WORLD, 0, 2, 2, Default::default()).unwrap();
        let src = pe.alloc::<i64>(1).unwrap();
        let dst = pe.alloc::<i64>(1).unwrap();
        if pe.team_my_pe(team) >= 0 {
            src.write(0, pe.my_pe() as i64);
            pe.sum_reduce(team, dst, src, 1).unwrap();
            assert_eq!(dst.read(0), 2, "members 0 and 2 sum their world ranks");
        }
        pe.barrier_all().unwrap();
        0
    });
}

#[test]
fn wide_vector_reduction() {
    for &alg in ALGORITHMS {
        run_with_env(4, &[("SHMEM_SUM_REDUCE_ALGORITHM", alg)], move |pe| {
            let n = 129; // not a multiple of the team size
            let src = pe.alloc::<u64>(n).unwrap();
            let dst = pe.alloc::<u64>(n).unwrap();
            for i in 0..n {
                src.write(i, (pe.my_pe() + i) as u64);
            }
            pe.barrier_all().unwrap();
            pe.sum_reduce(Team::WORLD, dst, src, n).unwrap();
            for i in 0..n {
                assert_eq!(dst.read(i), (6 + 4 * i) as u64, "{} elem {}", alg, i);
            }
            pe.barrier_all().unwrap();
            0
        });
    }
}
