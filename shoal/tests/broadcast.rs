//! Broadcast across every registered algorithm, root, and payload shape.

mod common;

use common::run_with_env;
use shoal::Team;

const ALGORITHMS: &[&str] =
    &["linear", "complete_tree", "binomial_tree", "knomial_tree", "knomial_tree_signal", "scatter_collect"];

fn broadcast_case(alg: &'static str, npes: usize, root: usize, nelems: usize) {
    run_with_env(npes, &[("SHMEM_BROADCAST_ALGORITHM", alg)], move |pe| {
        let src = pe.alloc::<i64>(nelems).unwrap();
        let dst = pe.alloc::<i64>(nelems).unwrap();
        if pe.my_pe() == root {
            for i in 0..nelems {
                src.write(i, 100 + i as i64);
            }
        }
        for i in 0..nelems {
            dst.write(i, -1);
        }
        pe.barrier_all().unwrap();
        pe.broadcast(Team::WORLD, dst, src, nelems, root).unwrap();
        for i in 0..nelems {
            assert_eq!(dst.read(i), 100 + i as i64, "PE {} elem {} ({})", pe.my_pe(), i, alg);
        }
        pe.barrier_all().unwrap();
        0
    });
}

#[test]
fn broadcast_from_rank_zero() {
    for &alg in ALGORITHMS {
        broadcast_case(alg, 4, 0, 16);
    }
}

#[test]
fn broadcast_from_nonzero_root() {
    for &alg in ALGORITHMS {
        broadcast_case(alg, 4, 2, 16);
    }
}

#[test]
fn broadcast_odd_team_sizes() {
    for &alg in ALGORITHMS {
        broadcast_case(alg, 5, 3, 7);
    }
}

#[test]
fn broadcast_payload_smaller_than_team() {
    // scatter_collect degenerates to sub-chunk transfers.
    for &alg in ALGORITHMS {
        broadcast_case(alg, 4, 1, 2);
    }
}

#[test]
fn broadcast_large_payload() {
    for &alg in ALGORITHMS {
        broadcast_case(alg, 4, 0, 1000);
    }
}

#[test]
fn broadcastmem_moves_raw_bytes() {
    for &alg in ALGORITHMS {
        run_with_env(3, &[("SHMEM_BROADCAST_ALGORITHM", alg)], |pe| {
            let src = pe.alloc::<u8>(13).unwrap();
            let dst = pe.alloc::<u8>(13).unwrap();
            if pe.my_pe() == 0 {
                for (i, b) in b"thirteen byte".iter().enumerate() {
                    src.write(i, *b);
                }
            }
            pe.barrier_all().unwrap();
            pe.broadcastmem(Team::WORLD, dst, src, 13, 0).unwrap();
            assert_eq!(&dst.local()[..13], b"thirteen byte");
            pe.barrier_all().unwrap();
            0
        });
    }
}

#[test]
fn broadcast_on_a_subteam() {
    for &alg in ALGORITHMS {
        run_with_env(4, &[("SHMEM_BROADCAST_ALGORITHM", alg)], |pe| {
            let team = pe.team_split_strided(Team::WORLD, 1, 1, 3, Default::default()).unwrap();
            let src = pe.alloc::<i32>(4).unwrap();
            let dst = pe.alloc::<i32>(4).unwrap();
            let rank = pe.team_my_pe(team);
            if rank >= 0 {
                if rank == 1 {
                    for i in 0..4 {
                        src.write(i, 70 + i as i32);
                    }
                }
                pe.broadcast(team, dst, src, 4, 1).unwrap();
                for i in 0..4 {
                    assert_eq!(dst.read(i), 70 + i as i32);
                }
            }
            pe.barrier_all().unwrap();
            0
        });
    }
}

#[test]
fn repeated_broadcasts_reuse_psync() {
    for &alg in ALGORITHMS {
        run_with_env(4, &[("SHMEM_BROADCAST_ALGORITHM", alg)], |pe| {
            let src = pe.alloc::<i64>(8).unwrap();
            let dst = pe.alloc::<i64>(8).unwrap();
            for round in 0..25i64 {
                if pe.my_pe() == (round % 4) as usize {
                    for i in 0..8 {
                        src.write(i, round * 1000 + i as i64);
                    }
                }
                pe.broadcast(Team::WORLD, dst, src, 8, (round % 4) as usize).unwrap();
                for i in 0..8 {
                    assert_eq!(dst.read(i), round * 1000 + i as i64);
                }
                // Keep a fast parent's next round out of this round's reads.
                pe.barrier_all().unwrap();
            }
            pe.barrier_all().unwrap();
            0
        });
    }
}
