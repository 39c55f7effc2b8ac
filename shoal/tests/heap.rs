//! Multi-heap symmetric memory: runtime-created regions and translation.

mod common;

use common::run;
use shoal::Error;

#[test]
fn created_heaps_are_symmetric() {
    run(3, |pe| {
        let heap = pe.create_heap(1 << 16).unwrap();
        assert!(heap >= 2, "region 0 is globals, region 1 the default heap");
        let buf = pe.alloc_in::<i64>(heap, 8).unwrap();
        assert!(pe.symmetric(buf.addr()));
        assert!(!pe.global_address(buf.addr()));
        // The new region translates like any other.
        for q in 0..pe.n_pes() {
            assert_ne!(pe.translate_addr(buf.addr(), q), 0);
        }
        // And carries real traffic.
        let peer = (pe.my_pe() + 1) % pe.n_pes();
        pe.p(buf.at(2), pe.my_pe() as i64, peer).unwrap();
        pe.barrier_all().unwrap();
        let left = (pe.my_pe() + pe.n_pes() - 1) % pe.n_pes();
        assert_eq!(buf.read(2), left as i64);
        pe.barrier_all().unwrap();
        0
    });
}

#[test]
fn allocations_from_both_heaps_coexist() {
    run(2, |pe| {
        let default_buf = pe.alloc::<i32>(4).unwrap();
        let heap = pe.create_heap(1 << 14).unwrap();
        let extra_buf = pe.alloc_in::<i32>(heap, 4).unwrap();
        pe.p(default_buf, 1i32, 1 - pe.my_pe()).unwrap();
        pe.p(extra_buf, 2i32, 1 - pe.my_pe()).unwrap();
        pe.barrier_all().unwrap();
        assert_eq!(default_buf.read(0), 1);
        assert_eq!(extra_buf.read(0), 2);
        pe.barrier_all().unwrap();
        0
    });
}

#[test]
fn exhausting_a_heap_reports_alloc_failure() {
    run(2, |pe| {
        let heap = pe.create_heap(4096).unwrap();
        assert!(matches!(pe.alloc_in::<u8>(heap, 1 << 20), Err(Error::AllocFailure { .. })));
        // The heap still works for fitting requests.
        let ok = pe.alloc_in::<u8>(heap, 128);
        assert!(ok.is_ok());
        pe.barrier_all().unwrap();
        0
    });
}

#[test]
fn the_globals_region_is_not_a_heap() {
    run(1, |pe| {
        assert!(matches!(pe.alloc_in::<u8>(0, 8), Err(Error::NotSymmetric { .. })));
        assert!(matches!(pe.alloc_in::<u8>(99, 8), Err(Error::NotSymmetric { .. })));
        0
    });
}
