//! Reduction algorithms.
//!
//! Every member contributes `nelems` elements from a symmetric `source`;
//! every member ends with the element-wise reduction in `dest`. Partials
//! accumulate in `dest` itself, and exchanges are pulls: a PE signals that
//! its partial is ready, the peer pulls it into private scratch, confirms
//! the read, and only then does either side overwrite its own partial.
//! That READY/DONE handshake, one counter each, keeps a partial stable for
//! exactly as long as someone may still read it.
//!
//! Reduction order differs between algorithms, so floating-point results
//! may differ bit-wise between two algorithm selections; integer results
//! never do.
//!
//! `rec_dbl` and the Rabenseifner variants run on the largest power-of-two
//! prefix: each trailing extra rank folds its vector into a leading partner
//! up front and receives the finished result back at the end.

use bytemuck::Zeroable;

use crate::element::Element;
use crate::error::Result;
use crate::memory::Sym;
use crate::runtime::Shoal;
use crate::team::Team;

use super::barrier::{tree_children, tree_parent, TreeKind};
use super::{Group, ReduceAlg, CLASS_REDUCE};

const READY: usize = 0;
const DONE: usize = 1;
const FOLD_IN: usize = 2;
const FOLD_OUT: usize = 3;

fn prev_pow2(n: usize) -> usize {
    if n.is_power_of_two() {
        n
    } else {
        n.next_power_of_two() >> 1
    }
}

fn copy_typed<T: Element>(dest: Sym<T>, source: Sym<T>, nelems: usize) {
    if dest.addr() != source.addr() && nelems > 0 {
        unsafe { std::ptr::copy(source.ptr(), dest.ptr(), nelems) }
    }
}

fn combine_into<T: Element>(dest: Sym<T>, other: &[T], combine: impl Fn(T, T) -> T + Copy) {
    for (i, &v) in other.iter().enumerate() {
        dest.write(i, combine(dest.read(i), v));
    }
}

impl Shoal {
    pub(crate) fn reduce_typed<T: Element>(
        &self,
        team: Team,
        dest: Sym<T>,
        source: Sym<T>,
        nelems: usize,
        alg: ReduceAlg,
        combine: impl Fn(T, T) -> T + Copy,
    ) -> Result<()> {
        let grp = self.team_group(team, CLASS_REDUCE)?;
        if grp.size == 1 {
            copy_typed(dest, source, nelems);
            return Ok(());
        }
        if nelems == 0 {
            return Ok(());
        }
        match alg {
            ReduceAlg::Linear => self.reduce_linear(team, &grp, dest, source, nelems, combine),
            ReduceAlg::Binomial => self.reduce_binomial(&grp, dest, source, nelems, combine),
            ReduceAlg::RecDbl => self.reduce_rec_dbl(&grp, dest, source, nelems, combine),
            ReduceAlg::Rabenseifner => self.reduce_rabenseifner(&grp, dest, source, nelems, combine, false),
            ReduceAlg::Rabenseifner2 => self.reduce_rabenseifner(&grp, dest, source, nelems, combine, true),
        }
    }

    // The root pulls every contribution, folds in rank order, and
    // broadcasts the result.
    fn reduce_linear<T: Element>(
        &self,
        team: Team,
        grp: &Group,
        dest: Sym<T>,
        source: Sym<T>,
        nelems: usize,
        combine: impl Fn(T, T) -> T + Copy,
    ) -> Result<()> {
        if grp.my_idx == 0 {
            copy_typed(dest, source, nelems);
            let expected = (grp.size - 1) as i64;
            self.ps_wait_ge(grp, READY, expected);
            let mut tmp = vec![T::zeroed(); nelems];
            for idx in 1..grp.size {
                self.get_world(&mut tmp, source, grp.world_pe(idx))?;
                combine_into(dest, &tmp, combine);
            }
            self.ps_retire(grp, READY, expected);
        } else {
            self.ps_add(grp, 0, READY, 1)?;
        }
        let nbytes = nelems * std::mem::size_of::<T>();
        self.bcast_bytes(team, dest.as_bytes(), dest.as_bytes(), nbytes, 0, self.registry.broadcast)
    }

    // Fold up a binomial tree to rank 0, then push the result back down
    // the same edges.
    fn reduce_binomial<T: Element>(
        &self,
        grp: &Group,
        dest: Sym<T>,
        source: Sym<T>,
        nelems: usize,
        combine: impl Fn(T, T) -> T + Copy,
    ) -> Result<()> {
        copy_typed(dest, source, nelems);
        let v = grp.my_idx;
        let children = tree_children(TreeKind::Binomial, v, grp.size);

        if !children.is_empty() {
            self.ps_wait_ge(grp, READY, children.len() as i64);
            self.ps_retire(grp, READY, children.len() as i64);
            let mut tmp = vec![T::zeroed(); nelems];
            for &c in &children {
                self.get_world(&mut tmp, dest, grp.world_pe(c))?;
                combine_into(dest, &tmp, combine);
            }
        }
        if let Some(parent) = tree_parent(TreeKind::Binomial, v) {
            self.ps_add(grp, parent, READY, 1)?;
            self.ps_wait_ge(grp, DONE, 1);
            self.ps_retire(grp, DONE, 1);
        }
        for &c in &children {
            self.put_world(dest, &dest.local()[..nelems], grp.world_pe(c))?;
            self.fence_default();
            self.ps_add(grp, c, DONE, 1)?;
        }
        Ok(())
    }

    // Classic recursive doubling: log2 rounds of whole-vector exchange.
    // After round r every PE in a 2^(r+1) subgroup holds that subgroup's
    // partial; after the last round everyone holds the reduction.
    fn reduce_rec_dbl<T: Element>(
        &self,
        grp: &Group,
        dest: Sym<T>,
        source: Sym<T>,
        nelems: usize,
        combine: impl Fn(T, T) -> T + Copy,
    ) -> Result<()> {
        copy_typed(dest, source, nelems);
        let me = grp.my_idx;
        let pow = prev_pow2(grp.size);

        if self.reduce_fold_in(grp, dest, nelems, pow, combine)? {
            return Ok(());
        }

        let rounds = pow.trailing_zeros() as usize;
        let mut tmp = vec![T::zeroed(); nelems];
        for r in 0..rounds {
            let peer = me ^ (1 << r);
            self.ps_add(grp, peer, READY, 1)?;
            self.ps_wait_ge(grp, READY, (r + 1) as i64);
            self.get_world(&mut tmp, dest, grp.world_pe(peer))?;
            self.ps_add(grp, peer, DONE, 1)?;
            self.ps_wait_ge(grp, DONE, (r + 1) as i64);
            combine_into(dest, &tmp, combine);
        }
        self.ps_retire(grp, READY, rounds as i64);
        self.ps_retire(grp, DONE, rounds as i64);

        self.reduce_fold_out(grp, dest, nelems, pow)
    }

    // Reduce-scatter by recursive halving, then an all-gather retracing the
    // same pairs. The variant flips the halving schedule from largest-mask
    // first to smallest-mask first.
    fn reduce_rabenseifner<T: Element>(
        &self,
        grp: &Group,
        dest: Sym<T>,
        source: Sym<T>,
        nelems: usize,
        combine: impl Fn(T, T) -> T + Copy,
        small_mask_first: bool,
    ) -> Result<()> {
        copy_typed(dest, source, nelems);
        let me = grp.my_idx;
        let pow = prev_pow2(grp.size);

        if self.reduce_fold_in(grp, dest, nelems, pow, combine)? {
            return Ok(());
        }

        let log = pow.trailing_zeros() as usize;
        let masks: Vec<usize> = if small_mask_first {
            (0..log).map(|r| 1 << r).collect()
        } else {
            (0..log).rev().map(|r| 1 << r).collect()
        };

        let mut tmp = vec![T::zeroed(); nelems];
        let mut start = 0usize;
        let mut len = nelems;
        let mut trace = Vec::with_capacity(log);
        let mut step = 0i64;

        for &mask in &masks {
            let peer = me ^ mask;
            let left = (len + 1) / 2;
            let (mine, theirs) = if me & mask == 0 {
                ((start, left), (start + left, len - left))
            } else {
                ((start + left, len - left), (start, left))
            };
            step += 1;
            self.ps_add(grp, peer, READY, 1)?;
            self.ps_wait_ge(grp, READY, step);
            self.get_world(&mut tmp[..mine.1], dest.slice(mine.0, mine.1), grp.world_pe(peer))?;
            self.ps_add(grp, peer, DONE, 1)?;
            self.ps_wait_ge(grp, DONE, step);
            combine_into(dest.slice(mine.0, mine.1), &tmp[..mine.1], combine);
            trace.push((peer, theirs));
            (start, len) = mine;
        }

        // All-gather: retrace in reverse, pulling the sibling range the
        // peer finished.
        for &(peer, theirs) in trace.iter().rev() {
            step += 1;
            self.ps_add(grp, peer, READY, 1)?;
            self.ps_wait_ge(grp, READY, step);
            self.get_world(&mut tmp[..theirs.1], dest.slice(theirs.0, theirs.1), grp.world_pe(peer))?;
            self.ps_add(grp, peer, DONE, 1)?;
            self.ps_wait_ge(grp, DONE, step);
            let dst = dest.slice(theirs.0, theirs.1);
            for (i, &v) in tmp[..theirs.1].iter().enumerate() {
                dst.write(i, v);
            }
        }
        self.ps_retire(grp, READY, step);
        self.ps_retire(grp, DONE, step);

        self.reduce_fold_out(grp, dest, nelems, pow)
    }

    // Trailing extras hand their vector to a leading partner and sit out.
    // Returns true when the caller is an extra and already finished.
    fn reduce_fold_in<T: Element>(
        &self,
        grp: &Group,
        dest: Sym<T>,
        nelems: usize,
        pow: usize,
        combine: impl Fn(T, T) -> T + Copy,
    ) -> Result<bool> {
        let me = grp.my_idx;
        let extras = grp.size - pow;
        if me >= pow {
            self.ps_add(grp, me - pow, FOLD_IN, 1)?;
            self.ps_wait_ge(grp, FOLD_OUT, 1);
            self.ps_retire(grp, FOLD_OUT, 1);
            return Ok(true);
        }
        if me < extras {
            self.ps_wait_ge(grp, FOLD_IN, 1);
            self.ps_retire(grp, FOLD_IN, 1);
            let mut tmp = vec![T::zeroed(); nelems];
            self.get_world(&mut tmp, dest, grp.world_pe(me + pow))?;
            combine_into(dest, &tmp, combine);
        }
        Ok(false)
    }

    fn reduce_fold_out<T: Element>(&self, grp: &Group, dest: Sym<T>, nelems: usize, pow: usize) -> Result<()> {
        let me = grp.my_idx;
        let extras = grp.size - pow;
        if me < extras {
            self.put_world(dest, &dest.local()[..nelems], grp.world_pe(me + pow))?;
            self.fence_default();
            self.ps_add(grp, me + pow, FOLD_OUT, 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prev_pow2_is_floor() {
        assert_eq!(prev_pow2(1), 1);
        assert_eq!(prev_pow2(2), 2);
        assert_eq!(prev_pow2(3), 2);
        assert_eq!(prev_pow2(4), 4);
        assert_eq!(prev_pow2(7), 4);
        assert_eq!(prev_pow2(8), 8);
    }

    // The halving schedule must tile the vector into disjoint owned chunks.
    fn owned_range(vid: usize, pow: usize, nelems: usize, small_mask_first: bool) -> (usize, usize) {
        let log = pow.trailing_zeros() as usize;
        let masks: Vec<usize> = if small_mask_first {
            (0..log).map(|r| 1 << r).collect()
        } else {
            (0..log).rev().map(|r| 1 << r).collect()
        };
        let mut start = 0;
        let mut len = nelems;
        for &mask in &masks {
            let left = (len + 1) / 2;
            if vid & mask == 0 {
                len = left;
            } else {
                start += left;
                len -= left;
            }
        }
        (start, len)
    }

    #[test]
    fn halving_partitions_the_vector() {
        for &variant in &[false, true] {
            for pow in [2usize, 4, 8, 16] {
                for nelems in [1usize, 5, 16, 33] {
                    let mut covered = vec![0usize; nelems];
                    for vid in 0..pow {
                        let (s, l) = owned_range(vid, pow, nelems, variant);
                        for c in covered.iter_mut().skip(s).take(l) {
                            *c += 1;
                        }
                    }
                    assert!(covered.iter().all(|&c| c == 1), "pow {} nelems {} variant {}", pow, nelems, variant);
                }
            }
        }
    }
}
