//! Collect and fcollect algorithms.
//!
//! `fcollect` concatenates a fixed-size contribution from every member into
//! `dest` in team-rank order; `collect` is the variable-length form, whose
//! output offsets are the prefix sums of the contributed sizes. The
//! variable form first stages every member's size in the collect pSync
//! area, after which each algorithm runs on an explicit block layout.
//!
//! Data always lands at its final offset in the receiver's `dest` (the
//! rotated bruck layouts land at rotated offsets and fix up locally), so
//! forwarding always reads from `dest`.
//!
//! Power-of-two-only algorithms refuse unqualified team sizes with
//! `AlgorithmUnsupported`; there is no silent fallback. `neighbor_exchange`
//! likewise refuses odd team sizes.

use crate::error::{Error, Result};
use crate::memory::Sym;
use crate::runtime::Shoal;
use crate::team::Team;

use super::broadcast::copy_local_bytes;
use super::{CollectAlg, FcollectAlg, Group, CLASS_COLLECT};

// Slot layout: DATA and SIZES are counters, the size table starts at
// SIZE_TABLE with one word per member.
const DATA: usize = 0;
const SIZES: usize = 1;
const SIZE_TABLE: usize = 4;

pub(crate) struct Blocks {
    off: Vec<usize>,
    len: Vec<usize>,
    pub total: usize,
}

impl Blocks {
    pub(crate) fn uniform(nbytes: usize, size: usize) -> Blocks {
        Blocks {
            off: (0..size).map(|i| i * nbytes).collect(),
            len: vec![nbytes; size],
            total: nbytes * size,
        }
    }

    pub(crate) fn from_sizes(sizes: &[usize]) -> Blocks {
        let mut off = Vec::with_capacity(sizes.len());
        let mut cursor = 0;
        for &s in sizes {
            off.push(cursor);
            cursor += s;
        }
        Blocks { off, len: sizes.to_vec(), total: cursor }
    }

    fn offset(&self, block: usize) -> usize {
        self.off[block]
    }

    fn length(&self, block: usize) -> usize {
        self.len[block]
    }

    // Byte range of the contiguous block run [a, b).
    fn range(&self, a: usize, b: usize) -> (usize, usize) {
        if a == b {
            return (self.off[a.min(self.off.len() - 1)], 0);
        }
        (self.off[a], self.off[b - 1] + self.len[b - 1] - self.off[a])
    }

    // A run of `count` blocks starting at `first`, modulo the team size,
    // as at most two contiguous segments.
    fn run_segments(&self, first: usize, count: usize) -> Vec<(usize, usize)> {
        let size = self.off.len();
        if count == 0 {
            Vec::new()
        } else if first + count <= size {
            vec![(first, count)]
        } else {
            vec![(first, size - first), (0, first + count - size)]
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum BruckLayout {
    // Blocks land at their true offsets; no fixup.
    Direct,
    // Own block at local offset 0; one local rotation at the end, either
    // through a scratch vector or in place.
    Rotated { inplace: bool },
}

impl Shoal {
    pub(crate) fn fcollect_bytes(&self, team: Team, dest: Sym<u8>, source: Sym<u8>, nbytes: usize, alg: FcollectAlg) -> Result<()> {
        let grp = self.team_group(team, CLASS_COLLECT)?;
        if grp.size == 1 {
            copy_local_bytes(dest, source, nbytes);
            return Ok(());
        }
        if nbytes == 0 {
            return Ok(());
        }
        let blocks = Blocks::uniform(nbytes, grp.size);
        match alg {
            FcollectAlg::Linear => self.gather_linear(team, &grp, dest, source, &blocks),
            FcollectAlg::AllLinear => self.gather_all_linear(&grp, dest, source, &blocks),
            FcollectAlg::Ring => self.gather_ring(&grp, dest, source, &blocks),
            FcollectAlg::RecDbl => self.gather_rec_dbl(&grp, dest, source, &blocks, false, alg.name()),
            FcollectAlg::RecDblSignal => self.gather_rec_dbl(&grp, dest, source, &blocks, true, alg.name()),
            FcollectAlg::Bruck => self.gather_bruck(&grp, dest, source, &blocks, BruckLayout::Rotated { inplace: false }, false),
            FcollectAlg::BruckNoRotate => self.gather_bruck(&grp, dest, source, &blocks, BruckLayout::Direct, false),
            FcollectAlg::BruckSignal => self.gather_bruck(&grp, dest, source, &blocks, BruckLayout::Rotated { inplace: false }, true),
            FcollectAlg::BruckInplace => self.gather_bruck(&grp, dest, source, &blocks, BruckLayout::Rotated { inplace: true }, false),
            FcollectAlg::NeighborExchange => self.gather_neighbor(&grp, dest, source, &blocks),
        }
    }

    pub(crate) fn collect_bytes(&self, team: Team, dest: Sym<u8>, source: Sym<u8>, my_nbytes: usize, alg: CollectAlg) -> Result<()> {
        let grp = self.team_group(team, CLASS_COLLECT)?;
        if grp.size == 1 {
            copy_local_bytes(dest, source, my_nbytes);
            return Ok(());
        }
        let blocks = self.exchange_sizes(&grp, my_nbytes)?;
        if dest.len() < blocks.total {
            return Err(Error::AllocFailure {
                what: format!("collect destination of {} bytes, {} required", dest.len(), blocks.total),
            });
        }
        if blocks.total == 0 {
            return Ok(());
        }
        match alg {
            CollectAlg::Linear => self.gather_linear(team, &grp, dest, source, &blocks),
            CollectAlg::AllLinear => self.gather_all_linear(&grp, dest, source, &blocks),
            CollectAlg::Ring => self.gather_ring(&grp, dest, source, &blocks),
            CollectAlg::RecDbl => self.gather_rec_dbl(&grp, dest, source, &blocks, false, alg.name()),
            CollectAlg::Bruck => self.gather_bruck(&grp, dest, source, &blocks, BruckLayout::Direct, false),
        }
    }

    // Every member publishes its contribution size into each member's size
    // table, then confirms on the SIZES counter. Values travel as adds from
    // a single writer per word, so retirement commutes with the next call.
    fn exchange_sizes(&self, grp: &Group, my_nbytes: usize) -> Result<Blocks> {
        for idx in 0..grp.size {
            self.ps_add(grp, idx, SIZE_TABLE + grp.my_idx, my_nbytes as i64)?;
        }
        self.fence_default();
        for idx in 0..grp.size {
            self.ps_add(grp, idx, SIZES, 1)?;
        }
        self.ps_wait_ge(grp, SIZES, grp.size as i64);
        let sizes: Vec<usize> = (0..grp.size).map(|i| self.ps_read(grp, SIZE_TABLE + i) as usize).collect();
        for (i, &s) in sizes.iter().enumerate() {
            self.ps_retire(grp, SIZE_TABLE + i, s as i64);
        }
        self.ps_retire(grp, SIZES, grp.size as i64);
        Ok(Blocks::from_sizes(&sizes))
    }

    // Sends the block run [first, first + count) out of `dest` to `peer`,
    // final offsets, then raises its DATA counter once.
    fn send_run(&self, grp: &Group, peer: usize, dest: Sym<u8>, blocks: &Blocks, first: usize, count: usize, signal: bool) -> Result<()> {
        let world = grp.world_pe(peer);
        let segs = blocks.run_segments(first, count);
        if signal {
            for (i, &(a, n)) in segs.iter().enumerate() {
                let (lo, bytes) = blocks.range(a, a + n);
                if i + 1 == segs.len() {
                    self.put_signal_world(dest.slice(lo, bytes), &dest.local()[lo..lo + bytes], grp.psync.at(DATA), 1, world)?;
                } else {
                    self.put_world(dest.slice(lo, bytes), &dest.local()[lo..lo + bytes], world)?;
                    self.fence_default();
                }
            }
        } else {
            for &(a, n) in &segs {
                let (lo, bytes) = blocks.range(a, a + n);
                self.put_world(dest.slice(lo, bytes), &dest.local()[lo..lo + bytes], world)?;
            }
            self.fence_default();
            self.ps_add(grp, peer, DATA, 1)?;
        }
        Ok(())
    }

    fn place_own(&self, grp: &Group, dest: Sym<u8>, source: Sym<u8>, blocks: &Blocks) {
        let lo = blocks.offset(grp.my_idx);
        let n = blocks.length(grp.my_idx);
        copy_local_bytes(dest.slice(lo, n), source, n);
    }

    // Everything to the team root, which broadcasts the assembled result.
    fn gather_linear(&self, team: Team, grp: &Group, dest: Sym<u8>, source: Sym<u8>, blocks: &Blocks) -> Result<()> {
        if grp.my_idx == 0 {
            self.place_own(grp, dest, source, blocks);
            let expected = (grp.size - 1) as i64;
            self.ps_wait_ge(grp, DATA, expected);
            self.ps_retire(grp, DATA, expected);
        } else {
            let lo = blocks.offset(grp.my_idx);
            let n = blocks.length(grp.my_idx);
            self.put_world(dest.slice(lo, n), &source.local()[..n], grp.world_pe(0))?;
            self.fence_default();
            self.ps_add(grp, 0, DATA, 1)?;
        }
        self.bcast_bytes(team, dest, dest, blocks.total, 0, self.registry.broadcast)
    }

    // Every member pushes its block to every other member directly.
    fn gather_all_linear(&self, grp: &Group, dest: Sym<u8>, source: Sym<u8>, blocks: &Blocks) -> Result<()> {
        let lo = blocks.offset(grp.my_idx);
        let n = blocks.length(grp.my_idx);
        for idx in 0..grp.size {
            if idx == grp.my_idx {
                continue;
            }
            self.put_world(dest.slice(lo, n), &source.local()[..n], grp.world_pe(idx))?;
            self.fence_default();
            self.ps_add(grp, idx, DATA, 1)?;
        }
        self.place_own(grp, dest, source, blocks);
        let expected = (grp.size - 1) as i64;
        self.ps_wait_ge(grp, DATA, expected);
        self.ps_retire(grp, DATA, expected);
        Ok(())
    }

    // size-1 rounds, each forwarding the block that arrived last round to
    // the right neighbor.
    fn gather_ring(&self, grp: &Group, dest: Sym<u8>, source: Sym<u8>, blocks: &Blocks) -> Result<()> {
        self.place_own(grp, dest, source, blocks);
        let right = (grp.my_idx + 1) % grp.size;
        for r in 0..grp.size - 1 {
            let block = (grp.my_idx + grp.size - r) % grp.size;
            self.send_run(grp, right, dest, blocks, block, 1, false)?;
            self.ps_wait_ge(grp, DATA, (r + 1) as i64);
        }
        self.ps_retire(grp, DATA, (grp.size - 1) as i64);
        Ok(())
    }

    // log2(size) rounds of pairwise exchange with doubling runs.
    fn gather_rec_dbl(
        &self,
        grp: &Group,
        dest: Sym<u8>,
        source: Sym<u8>,
        blocks: &Blocks,
        signal: bool,
        name: &str,
    ) -> Result<()> {
        if !grp.size.is_power_of_two() {
            return Err(Error::AlgorithmUnsupported {
                name: name.to_owned(),
                reason: format!("team size {} is not a power of two", grp.size),
            });
        }
        self.place_own(grp, dest, source, blocks);
        let me = grp.my_idx;
        let rounds = grp.size.trailing_zeros() as usize;
        let mut base = me;
        let mut count = 1;
        for r in 0..rounds {
            let peer = me ^ (1 << r);
            self.send_run(grp, peer, dest, blocks, base, count, signal)?;
            self.ps_wait_ge(grp, DATA, (r + 1) as i64);
            base &= !((1usize << (r + 1)) - 1);
            count <<= 1;
        }
        self.ps_retire(grp, DATA, rounds as i64);
        Ok(())
    }

    // Rotation-based log-depth gather for any team size.
    fn gather_bruck(
        &self,
        grp: &Group,
        dest: Sym<u8>,
        source: Sym<u8>,
        blocks: &Blocks,
        layout: BruckLayout,
        signal: bool,
    ) -> Result<()> {
        let size = grp.size;
        let me = grp.my_idx;
        match layout {
            BruckLayout::Direct => {
                self.place_own(grp, dest, source, blocks);
                let mut step = 1;
                let mut rounds = 0;
                while step < size {
                    let send_cnt = step.min(size - step);
                    let peer = (me + size - step) % size;
                    self.send_run(grp, peer, dest, blocks, me, send_cnt, signal)?;
                    self.ps_wait_ge(grp, DATA, (rounds + 1) as i64);
                    step <<= 1;
                    rounds += 1;
                }
                self.ps_retire(grp, DATA, rounds as i64);
            }
            BruckLayout::Rotated { inplace } => {
                // Local slot j holds block (me + j) mod size, so every send
                // is one contiguous transfer from slot 0.
                let n = blocks.length(0);
                copy_local_bytes(dest, source, n);
                let mut step = 1;
                let mut rounds = 0;
                while step < size {
                    let send_cnt = step.min(size - step);
                    let peer = (me + size - step) % size;
                    let world = grp.world_pe(peer);
                    let bytes = send_cnt * n;
                    if signal {
                        self.put_signal_world(
                            dest.slice(step * n, bytes),
                            &dest.local()[..bytes],
                            grp.psync.at(DATA),
                            1,
                            world,
                        )?;
                    } else {
                        self.put_world(dest.slice(step * n, bytes), &dest.local()[..bytes], world)?;
                        self.fence_default();
                        self.ps_add(grp, peer, DATA, 1)?;
                    }
                    self.ps_wait_ge(grp, DATA, (rounds + 1) as i64);
                    step <<= 1;
                    rounds += 1;
                }
                self.ps_retire(grp, DATA, rounds as i64);

                let shift = ((size - me) % size) * n;
                let total = size * n;
                let mut dest = dest;
                if inplace {
                    dest.local_mut()[..total].rotate_left(shift);
                } else {
                    let local = &dest.local()[..total];
                    let mut rotated = Vec::with_capacity(total);
                    rotated.extend_from_slice(&local[shift..]);
                    rotated.extend_from_slice(&local[..shift]);
                    dest.local_mut()[..total].copy_from_slice(&rotated);
                }
            }
        }
        Ok(())
    }

    // Pairwise exchanges with alternating ring neighbors; each phase
    // forwards the pair of blocks acquired in the previous phase. Even team
    // sizes only.
    fn gather_neighbor(&self, grp: &Group, dest: Sym<u8>, source: Sym<u8>, blocks: &Blocks) -> Result<()> {
        let size = grp.size;
        if size % 2 != 0 {
            return Err(Error::AlgorithmUnsupported {
                name: "neighbor_exchange".to_owned(),
                reason: format!("team size {} is odd", size),
            });
        }
        self.place_own(grp, dest, source, blocks);
        let half = size / 2;
        for p in 0..half {
            let q = neighbor_partner(grp.my_idx, p, size);
            let (first, count) = neighbor_sent_run(grp.my_idx, p, size);
            self.send_run(grp, q, dest, blocks, first, count, false)?;
            self.ps_wait_ge(grp, DATA, (p + 1) as i64);
        }
        self.ps_retire(grp, DATA, half as i64);
        Ok(())
    }
}

fn neighbor_partner(x: usize, phase: usize, size: usize) -> usize {
    let right = (x + 1) % size;
    let left = (x + size - 1) % size;
    if (x % 2 == 0) == (phase % 2 == 0) {
        right
    } else {
        left
    }
}

// What `x` transmits in `phase`: its own block, then its pair, then
// whatever it most recently received.
fn neighbor_sent_run(x: usize, phase: usize, size: usize) -> (usize, usize) {
    match phase {
        0 => (x, 1),
        1 => (x & !1, 2),
        _ => neighbor_sent_run(neighbor_partner(x, phase - 1, size), phase - 1, size),
    }
}
