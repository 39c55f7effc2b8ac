//! One-sided data movement and atomics over the in-process fabric.

mod common;

use common::{run, run_with_env};
use shoal::{CmpOp, CtxOptions, Error, SignalOp, Team};

#[test]
fn put_lands_on_the_target() {
    run(2, |pe| {
        let buf = pe.alloc::<i64>(8).unwrap();
        let me = pe.my_pe();
        let peer = 1 - me;
        let payload: Vec<i64> = (0..8).map(|i| (me as i64 + 1) * 100 + i).collect();
        pe.put(buf, &payload, peer).unwrap();
        pe.quiet().unwrap();
        pe.barrier_all().unwrap();
        for i in 0..8 {
            assert_eq!(buf.read(i), (peer as i64 + 1) * 100 + i as i64);
        }
        0
    });
}

#[test]
fn get_pulls_from_the_target() {
    run(2, |pe| {
        let buf = pe.alloc::<u32>(4).unwrap();
        let me = pe.my_pe();
        for i in 0..4 {
            buf.write(i, (me as u32 + 1) * 10 + i as u32);
        }
        pe.barrier_all().unwrap();
        let peer = 1 - me;
        let mut fetched = [0u32; 4];
        pe.get(&mut fetched, buf, peer).unwrap();
        assert_eq!(fetched, [(peer as u32 + 1) * 10, (peer as u32 + 1) * 10 + 1, (peer as u32 + 1) * 10 + 2, (peer as u32 + 1) * 10 + 3]);
        pe.barrier_all().unwrap();
        0
    });
}

#[test]
fn single_element_put_get() {
    run(3, |pe| {
        let slot = pe.alloc::<f64>(3).unwrap();
        let me = pe.my_pe();
        // Everyone writes its rank into slot[me] on every PE.
        for target in 0..pe.n_pes() {
            pe.p(slot.at(me), me as f64 + 0.5, target).unwrap();
        }
        pe.barrier_all().unwrap();
        for rank in 0..3 {
            assert_eq!(slot.read(rank), rank as f64 + 0.5);
            assert_eq!(pe.g(slot.at(rank), (pe.my_pe() + 1) % 3).unwrap(), rank as f64 + 0.5);
        }
        pe.barrier_all().unwrap();
        0
    });
}

#[test]
fn strided_transfers() {
    run(2, |pe| {
        let buf = pe.alloc::<i32>(16).unwrap();
        let me = pe.my_pe();
        pe.barrier_all().unwrap();
        if me == 0 {
            // Every second remote element from a packed local source.
            let src: Vec<i32> = (0..8).collect();
            pe.iput(buf, &src, 2, 1, 8, 1).unwrap();
            pe.quiet().unwrap();
        }
        pe.barrier_all().unwrap();
        if me == 1 {
            for i in 0..8 {
                assert_eq!(buf.read(2 * i), i as i32);
            }
            let mut back = vec![0i32; 8];
            pe.iget(&mut back, buf, 1, 2, 8, 1).unwrap();
            assert_eq!(back, (0..8).collect::<Vec<_>>());
        }
        pe.barrier_all().unwrap();
        0
    });
}

#[test]
fn bytes_move_through_putmem() {
    run(2, |pe| {
        let buf = pe.alloc::<u8>(13).unwrap();
        if pe.my_pe() == 0 {
            pe.putmem(buf, &b"symmetric heap"[..13], 1).unwrap();
            pe.quiet().unwrap();
        }
        pe.barrier_all().unwrap();
        if pe.my_pe() == 1 {
            assert_eq!(&buf.local()[..13], &b"symmetric heap"[..13]);
            let mut out = [0u8; 13];
            pe.getmem(&mut out, buf, 1).unwrap();
            assert_eq!(&out, &b"symmetric heap"[..13]);
        }
        pe.barrier_all().unwrap();
        0
    });
}

#[test]
fn atomics_are_totally_ordered_per_variable() {
    let results = run_with_env(4, &[], |pe| {
        let counter = pe.alloc::<i64>(1).unwrap();
        let mut priors = Vec::new();
        for _ in 0..50 {
            priors.push(pe.atomic_fetch_add(counter, 1, 0).unwrap());
        }
        pe.barrier_all().unwrap();
        let total = if pe.my_pe() == 0 { counter.read(0) } else { -1 };
        pe.barrier_all().unwrap();
        (total, priors)
    });
    assert_eq!(results[0].0, 200);
    let mut all: Vec<i64> = results.into_iter().flat_map(|(_, p)| p).collect();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), 200, "every fetch_add must observe a distinct prior");
}

#[test]
fn atomic_family_smoke() {
    run(2, |pe| {
        let word = pe.alloc::<u64>(1).unwrap();
        if pe.my_pe() == 0 {
            pe.atomic_set(word, 0b1100, 1).unwrap();
            pe.atomic_or(word, 0b0011, 1).unwrap();
            pe.atomic_and(word, 0b1010, 1).unwrap();
            pe.atomic_xor(word, 0b0001, 1).unwrap();
            assert_eq!(pe.atomic_fetch(word, 1).unwrap(), 0b1011);
            assert_eq!(pe.atomic_swap(word, 7, 1).unwrap(), 0b1011);
            assert_eq!(pe.atomic_compare_swap(word, 7, 9, 1).unwrap(), 7);
            assert_eq!(pe.atomic_compare_swap(word, 7, 11, 1).unwrap(), 9);
            let mut fetched = 0u64;
            pe.atomic_fetch_add_nbi(&mut fetched, word, 1, 1).unwrap();
            pe.quiet().unwrap();
            assert_eq!(fetched, 9);
        }
        pe.barrier_all().unwrap();
        if pe.my_pe() == 1 {
            assert_eq!(word.read(0), 10);
        }
        pe.barrier_all().unwrap();
        0
    });
}

#[test]
fn put_signal_delivers_payload_before_signal() {
    run(2, |pe| {
        let data = pe.alloc::<i64>(4).unwrap();
        let sig = pe.alloc::<u64>(1).unwrap();
        if pe.my_pe() == 0 {
            pe.put_signal(data, &[5, 6, 7, 8], sig, 1, SignalOp::Add, 1).unwrap();
        } else {
            let observed = pe.signal_wait_until(sig, CmpOp::Ge, 1).unwrap();
            assert_eq!(observed, 1);
            assert_eq!(data.local(), &[5, 6, 7, 8]);
        }
        pe.barrier_all().unwrap();
        0
    });
}

#[test]
fn contexts_order_independently() {
    run(2, |pe| {
        let ctx = pe.create_ctx(Team::WORLD, CtxOptions::default()).unwrap();
        let buf = pe.alloc::<i64>(2).unwrap();
        if pe.my_pe() == 0 {
            pe.put_ctx(ctx, buf, &[41], 1).unwrap();
            pe.session_start(ctx).unwrap();
            pe.put_nbi_ctx(ctx, buf.at(1), &[42], 1).unwrap();
            pe.session_stop(ctx).unwrap();
            assert!(pe.fence_test(ctx).unwrap());
            pe.quiet_ctx(ctx).unwrap();
            assert!(pe.quiet_test(ctx).unwrap());
        }
        pe.barrier_all().unwrap();
        if pe.my_pe() == 1 {
            assert_eq!(buf.local(), &[41, 42]);
        }
        pe.barrier_all().unwrap();
        pe.destroy_ctx(ctx).unwrap();
        0
    });
}

#[test]
fn translate_is_involutive_and_rejects_strangers() {
    run(3, |pe| {
        let buf = pe.alloc::<i64>(4).unwrap();
        // Local translation is the identity.
        assert_eq!(pe.translate_addr(buf.addr(), pe.my_pe()), buf.addr());
        // Symmetric allocations translate for every peer; a stack address
        // translates for none.
        for q in 0..pe.n_pes() {
            assert_ne!(pe.translate_addr(buf.addr(), q), 0);
        }
        let on_stack = 0u64;
        let stack_addr = &on_stack as *const u64 as u64;
        assert_eq!(pe.translate_addr(stack_addr, 0), 0);
        assert!(!pe.symmetric(stack_addr));
        assert!(pe.symmetric(buf.addr()));
        assert!(!pe.global_address(buf.addr()));
        pe.barrier_all().unwrap();
        0
    });
}

#[test]
fn out_of_range_pe_is_rejected() {
    run(2, |pe| {
        let buf = pe.alloc::<i64>(1).unwrap();
        assert!(matches!(pe.put(buf, &[1], 99), Err(Error::PeOutOfRange { .. })));
        assert!(matches!(pe.atomic_add(buf, 1, 17), Err(Error::PeOutOfRange { .. })));
        pe.barrier_all().unwrap();
        0
    });
}

#[test]
fn direct_pointers_reach_addressable_peers() {
    run(2, |pe| {
        let buf = pe.alloc::<i64>(1).unwrap();
        let me = pe.my_pe();
        buf.write(0, me as i64 + 40);
        pe.barrier_all().unwrap();
        let peer = 1 - me;
        let remote = pe.ptr(buf, peer).expect("in-process peers are addressable");
        assert_eq!(unsafe { remote.as_ptr().read_volatile() }, peer as i64 + 40);
        pe.barrier_all().unwrap();
        0
    });
}
