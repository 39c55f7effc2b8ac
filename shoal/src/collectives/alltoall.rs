//! All-to-all algorithms.
//!
//! Every member owns `size` blocks of `block` bytes in `source`; block `j`
//! travels to member `j`, landing at the sender's rank offset in the
//! receiver's `dest`. A peer schedule decides who talks to whom each round,
//! and a completion flavor decides how delivery is confirmed:
//!
//! * `barrier`: plain puts with a periodic and a final barrier. The
//!   period (`SHMEM_ALLTOALL_ROUNDS_SYNC`) paces the fabric and never
//!   affects the result.
//! * `counter`: all puts issue first, then one counter increment per
//!   peer; receivers wait for `size - 1` increments.
//! * `signal`: each put carries its own signal increment.
//!
//! The strided form (`alltoalls`) runs the same schedules over strided
//! transfers; its signal flavor confirms with a fence plus increment, as
//! strided puts have no combined-signal form.

use crate::element::Element;
use crate::error::{Error, Result};
use crate::memory::Sym;
use crate::runtime::Shoal;
use crate::team::Team;

use super::{A2aAlg, Group, PeerSched, SyncFlavor, CLASS_ALLTOALL};

const COUNTER: usize = 0;

// Rounds in the schedule; every PE meets every other exactly once.
fn sched_rounds(sched: PeerSched, size: usize) -> usize {
    match sched {
        PeerSched::Shift | PeerSched::Xor => size - 1,
        PeerSched::Color => {
            if size % 2 == 0 {
                size - 1
            } else {
                size
            }
        }
    }
}

fn sched_peer(sched: PeerSched, me: usize, size: usize, round: usize) -> Option<usize> {
    match sched {
        PeerSched::Shift => Some((me + round + 1) % size),
        PeerSched::Xor => {
            let peer = me ^ (round + 1);
            (peer < size).then_some(peer)
        }
        PeerSched::Color => color_partner(me, round, size),
    }
}

// Round-robin tournament pairing: ranks 0..m-2 sit on a circle, rank m-1
// is fixed. Odd team sizes play against a dummy and idle that round.
pub(crate) fn color_partner(me: usize, round: usize, size: usize) -> Option<usize> {
    if size <= 1 {
        return None;
    }
    let m = if size % 2 == 0 { size } else { size + 1 };
    let partner = if me == m - 1 {
        (round * (m / 2)) % (m - 1)
    } else {
        let q = (round + (m - 1) - me % (m - 1)) % (m - 1);
        if q == me {
            m - 1
        } else {
            q
        }
    };
    (partner < size).then_some(partner)
}

impl Shoal {
    pub(crate) fn alltoall_bytes(&self, team: Team, dest: Sym<u8>, source: Sym<u8>, block: usize, alg: A2aAlg) -> Result<()> {
        let grp = self.team_group(team, CLASS_ALLTOALL)?;
        self.check_sched(&grp, alg)?;
        if grp.size == 1 {
            super::broadcast::copy_local_bytes(dest, source, block);
            return Ok(());
        }
        if block == 0 {
            return Ok(());
        }
        let size = grp.size;
        let me = grp.my_idx;
        let rounds = sched_rounds(alg.sched, size);

        // Own block moves locally.
        super::broadcast::copy_local_bytes(dest.slice(me * block, block), source.slice(me * block, block), block);

        match alg.flavor {
            SyncFlavor::Barrier => {
                let pace = self.registry.rounds_sync.max(1);
                for r in 0..rounds {
                    if let Some(peer) = sched_peer(alg.sched, me, size, r) {
                        self.put_block(&grp, dest, source, block, peer)?;
                    }
                    if (r + 1) % pace == 0 && r + 1 < rounds {
                        self.quiet_default();
                        self.team_sync_internal(team)?;
                    }
                }
                self.quiet_default();
                self.team_sync_internal(team)?;
            }
            SyncFlavor::Counter => {
                for r in 0..rounds {
                    if let Some(peer) = sched_peer(alg.sched, me, size, r) {
                        self.put_block(&grp, dest, source, block, peer)?;
                    }
                }
                self.fence_default();
                for r in 0..rounds {
                    if let Some(peer) = sched_peer(alg.sched, me, size, r) {
                        self.ps_add(&grp, peer, COUNTER, 1)?;
                    }
                }
                self.ps_wait_ge(&grp, COUNTER, (size - 1) as i64);
                self.ps_retire(&grp, COUNTER, (size - 1) as i64);
            }
            SyncFlavor::Signal => {
                for r in 0..rounds {
                    if let Some(peer) = sched_peer(alg.sched, me, size, r) {
                        let world = grp.world_pe(peer);
                        self.put_signal_world(
                            dest.slice(me * block, block),
                            &source.local()[peer * block..peer * block + block],
                            grp.psync.at(COUNTER),
                            1,
                            world,
                        )?;
                    }
                }
                self.ps_wait_ge(&grp, COUNTER, (size - 1) as i64);
                self.ps_retire(&grp, COUNTER, (size - 1) as i64);
            }
        }
        Ok(())
    }

    pub(crate) fn alltoalls_typed<T: Element>(
        &self,
        team: Team,
        dest: Sym<T>,
        source: Sym<T>,
        tst: usize,
        sst: usize,
        nelems: usize,
        alg: A2aAlg,
    ) -> Result<()> {
        let grp = self.team_group(team, CLASS_ALLTOALL)?;
        self.check_sched(&grp, alg)?;
        let size = grp.size;
        let me = grp.my_idx;

        // Own block, strided copy in place.
        for k in 0..nelems {
            let v = source.read((me * nelems + k) * sst);
            dest.write((me * nelems + k) * tst, v);
        }
        if size == 1 || nelems == 0 {
            return Ok(());
        }

        let rounds = sched_rounds(alg.sched, size);
        let span_src = |peer: usize| {
            let first = peer * nelems * sst;
            let last = (peer * nelems + nelems - 1) * sst;
            (first, last + 1)
        };
        let send = |peer: usize| -> Result<()> {
            let world = grp.world_pe(peer);
            let dst_view = dest.slice(me * nelems * tst, (nelems - 1) * tst + 1);
            let (s0, s1) = span_src(peer);
            self.iput_world(dst_view, &source.local()[s0..s1], tst, sst, nelems, world)
        };

        match alg.flavor {
            SyncFlavor::Barrier => {
                let pace = self.registry.rounds_sync.max(1);
                for r in 0..rounds {
                    if let Some(peer) = sched_peer(alg.sched, me, size, r) {
                        send(peer)?;
                    }
                    if (r + 1) % pace == 0 && r + 1 < rounds {
                        self.quiet_default();
                        self.team_sync_internal(team)?;
                    }
                }
                self.quiet_default();
                self.team_sync_internal(team)?;
            }
            SyncFlavor::Counter | SyncFlavor::Signal => {
                for r in 0..rounds {
                    if let Some(peer) = sched_peer(alg.sched, me, size, r) {
                        send(peer)?;
                        if alg.flavor == SyncFlavor::Signal {
                            self.fence_default();
                            self.ps_add(&grp, peer, COUNTER, 1)?;
                        }
                    }
                }
                if alg.flavor == SyncFlavor::Counter {
                    self.fence_default();
                    for r in 0..rounds {
                        if let Some(peer) = sched_peer(alg.sched, me, size, r) {
                            self.ps_add(&grp, peer, COUNTER, 1)?;
                        }
                    }
                }
                self.ps_wait_ge(&grp, COUNTER, (size - 1) as i64);
                self.ps_retire(&grp, COUNTER, (size - 1) as i64);
            }
        }
        Ok(())
    }

    fn check_sched(&self, grp: &Group, alg: A2aAlg) -> Result<()> {
        if alg.sched == PeerSched::Xor && !grp.size.is_power_of_two() {
            return Err(Error::AlgorithmUnsupported {
                name: alg.name(),
                reason: format!("team size {} is not a power of two", grp.size),
            });
        }
        Ok(())
    }

    fn put_block(&self, grp: &Group, dest: Sym<u8>, source: Sym<u8>, block: usize, peer: usize) -> Result<()> {
        let world = grp.world_pe(peer);
        self.put_world(
            dest.slice(grp.my_idx * block, block),
            &source.local()[peer * block..peer * block + block],
            world,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn check_schedule(sched: PeerSched, size: usize) {
        let rounds = sched_rounds(sched, size);
        for me in 0..size {
            let mut met = vec![false; size];
            for r in 0..rounds {
                if let Some(peer) = sched_peer(sched, me, size, r) {
                    assert_ne!(peer, me, "{:?}: self-pairing at round {}", sched, r);
                    assert!(!met[peer], "{:?}: {} met {} twice", sched, me, peer);
                    met[peer] = true;
                }
            }
            let met_count = met.iter().filter(|&&m| m).count();
            assert_eq!(met_count, size - 1, "{:?}: {} missed peers at size {}", sched, me, size);
        }
    }

    #[test]
    fn shift_schedule_covers_everyone() {
        for size in 2..17 {
            check_schedule(PeerSched::Shift, size);
        }
    }

    #[test]
    fn xor_schedule_covers_powers_of_two() {
        for size in [2, 4, 8, 16, 32] {
            check_schedule(PeerSched::Xor, size);
        }
    }

    #[test]
    fn color_schedule_covers_everyone() {
        for size in 2..17 {
            check_schedule(PeerSched::Color, size);
        }
    }

    #[test]
    fn color_rounds_are_matchings() {
        for size in [2usize, 4, 6, 8, 10, 12] {
            for r in 0..sched_rounds(PeerSched::Color, size) {
                for me in 0..size {
                    let peer = color_partner(me, r, size).unwrap();
                    assert_eq!(color_partner(peer, r, size), Some(me), "size {} round {}", size, r);
                }
            }
        }
    }

    #[test]
    fn odd_color_schedule_idles_once_per_round() {
        for size in [3usize, 5, 7, 9] {
            for r in 0..sched_rounds(PeerSched::Color, size) {
                let idle: Vec<usize> = (0..size).filter(|&me| color_partner(me, r, size).is_none()).collect();
                assert_eq!(idle.len(), 1, "size {} round {}", size, r);
            }
        }
    }

    proptest! {
        #[test]
        fn xor_schedule_is_involutive(size_pow in 1u32..6, round in 0usize..40) {
            let size = 1usize << size_pow;
            let round = round % (size.max(2) - 1);
            for me in 0..size {
                if let Some(peer) = sched_peer(PeerSched::Xor, me, size, round) {
                    prop_assert_eq!(sched_peer(PeerSched::Xor, peer, size, round), Some(me));
                }
            }
        }
    }
}
