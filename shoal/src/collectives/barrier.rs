//! Synchronization algorithms.
//!
//! A barrier is a completion phase (`quiet` on the default context, applied
//! by the dispatch layer) followed by one of these synchronization
//! patterns; `sync` runs the pattern alone. All of them signal through the
//! group's sync pSync area with the additive discipline described in the
//! module docs.
//!
//! Group index 0 acts as the root of the rooted shapes.

use smallvec::SmallVec;

use crate::error::Result;
use crate::runtime::Shoal;
use crate::team::ceil_log2;

use super::{Group, SyncAlg};

#[derive(Clone, Copy, Debug)]
pub(crate) enum TreeKind {
    /// Fixed-arity complete tree.
    Complete(usize),
    /// Binomial tree.
    Binomial,
    /// K-nomial tree of the given radix.
    Knomial(usize),
}

pub(crate) fn tree_parent(kind: TreeKind, v: usize) -> Option<usize> {
    if v == 0 {
        return None;
    }
    Some(match kind {
        TreeKind::Complete(degree) => (v - 1) / degree.max(1),
        TreeKind::Binomial => v & (v - 1),
        TreeKind::Knomial(radix) => {
            let radix = radix.max(2);
            let mut p = 1;
            while (v / p) % radix == 0 {
                p *= radix;
            }
            v - p * ((v / p) % radix)
        }
    })
}

pub(crate) fn tree_children(kind: TreeKind, v: usize, size: usize) -> SmallVec<[usize; 8]> {
    let mut children = SmallVec::new();
    match kind {
        TreeKind::Complete(degree) => {
            let degree = degree.max(1);
            for j in 1..=degree {
                let c = degree * v + j;
                if c < size {
                    children.push(c);
                }
            }
        }
        TreeKind::Binomial => {
            let low = if v == 0 { usize::MAX } else { v & v.wrapping_neg() };
            let mut bit = 1;
            while bit < low && v + bit < size {
                children.push(v + bit);
                bit <<= 1;
            }
        }
        TreeKind::Knomial(radix) => {
            let radix = radix.max(2);
            let mut p = 1;
            while v % (p * radix) == 0 {
                for j in 1..radix {
                    let c = v + j * p;
                    if c < size {
                        children.push(c);
                    }
                }
                match p.checked_mul(radix) {
                    Some(next) if next <= size => p = next,
                    _ => break,
                }
            }
        }
    }
    children
}

const UP: usize = 0;
const DOWN: usize = 1;

impl Shoal {
    pub(crate) fn sync_group(&self, grp: &Group, alg: SyncAlg) -> Result<()> {
        if grp.size <= 1 {
            return Ok(());
        }
        match alg {
            SyncAlg::Linear => self.sync_linear(grp),
            SyncAlg::CompleteTree => self.sync_tree(grp, TreeKind::Complete(self.registry.tree_degree)),
            SyncAlg::BinomialTree => self.sync_tree(grp, TreeKind::Binomial),
            SyncAlg::KnomialTree => self.sync_tree(grp, TreeKind::Knomial(self.registry.knomial_radix)),
            SyncAlg::Dissemination => self.sync_dissemination(grp),
        }
    }

    // Everyone pokes the root; the root acks everyone.
    fn sync_linear(&self, grp: &Group) -> Result<()> {
        if grp.my_idx == 0 {
            let expected = (grp.size - 1) as i64;
            self.ps_wait_ge(grp, UP, expected);
            self.ps_retire(grp, UP, expected);
            for idx in 1..grp.size {
                self.ps_add(grp, idx, DOWN, 1)?;
            }
        } else {
            self.ps_add(grp, 0, UP, 1)?;
            self.ps_wait_ge(grp, DOWN, 1);
            self.ps_retire(grp, DOWN, 1);
        }
        Ok(())
    }

    // Wait for the children, poke the parent, wait for the release, release
    // the children.
    fn sync_tree(&self, grp: &Group, kind: TreeKind) -> Result<()> {
        let v = grp.my_idx;
        let children = tree_children(kind, v, grp.size);
        if !children.is_empty() {
            self.ps_wait_ge(grp, UP, children.len() as i64);
            self.ps_retire(grp, UP, children.len() as i64);
        }
        if let Some(parent) = tree_parent(kind, v) {
            self.ps_add(grp, parent, UP, 1)?;
            self.ps_wait_ge(grp, DOWN, 1);
            self.ps_retire(grp, DOWN, 1);
        }
        for &c in &children {
            self.ps_add(grp, c, DOWN, 1)?;
        }
        Ok(())
    }

    // Round r: poke (i + 2^r) mod n, wait for a poke from (i - 2^r) mod n.
    // One pSync word per round, retired with a negative add so a peer
    // already in the next barrier cannot see a torn reset.
    fn sync_dissemination(&self, grp: &Group) -> Result<()> {
        let rounds = ceil_log2(grp.size);
        for r in 0..rounds {
            let peer = (grp.my_idx + (1 << r)) % grp.size;
            self.ps_add(grp, peer, r, 1)?;
            self.ps_wait_ge(grp, r, 1);
            self.ps_retire(grp, r, 1);
        }
        Ok(())
    }
}
