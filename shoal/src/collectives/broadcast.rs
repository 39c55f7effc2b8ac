//! Broadcast algorithms.
//!
//! `nbytes` move from `source` on the root to `dest` on every member; the
//! root seeds its own `dest` by local copy. The rooted shapes relabel group
//! ranks so the root sits at virtual rank 0 and reuse the synchronization
//! tree arithmetic; a parent pushes the payload into its child's `dest`
//! and signals arrival, and the child forwards from its own `dest`.

use crate::error::{Error, Result};
use crate::memory::Sym;
use crate::runtime::Shoal;
use crate::team::Team;

use super::barrier::{tree_children, tree_parent, TreeKind};
use super::{BcastAlg, Group, CLASS_BCAST};

const ARRIVE: usize = 0;
const ACK: usize = 1;
const RING: usize = 2;

fn virt(idx: usize, root: usize, size: usize) -> usize {
    (idx + size - root) % size
}

fn unvirt(v: usize, root: usize, size: usize) -> usize {
    (v + root) % size
}

pub(crate) fn copy_local_bytes(dest: Sym<u8>, source: Sym<u8>, nbytes: usize) {
    if dest.addr() != source.addr() && nbytes > 0 {
        unsafe { std::ptr::copy(source.ptr(), dest.ptr(), nbytes) }
    }
}

// Binomial scatter geometry: the recursion splits [s, s + c) chunks, keeps
// the left (larger) part with the current owner, and hands the right part
// to its first chunk's owner. Walking the recursion from the top yields a
// node's parent and the sub-ranges it forwards.
fn scatter_walk(v: usize, size: usize) -> (Option<usize>, Vec<(usize, usize, usize)>) {
    let mut s = 0;
    let mut c = size;
    let mut parent = None;
    while s != v {
        let left = (c + 1) / 2;
        if v < s + left {
            c = left;
        } else {
            parent = Some(s);
            s += left;
            c -= left;
        }
    }
    let mut children = Vec::new();
    while c > 1 {
        let left = (c + 1) / 2;
        children.push((v + left, v + left, c - left));
        c = left;
    }
    (parent, children)
}

impl Shoal {
    pub(crate) fn bcast_bytes(
        &self,
        team: Team,
        dest: Sym<u8>,
        source: Sym<u8>,
        nbytes: usize,
        root: usize,
        alg: BcastAlg,
    ) -> Result<()> {
        let grp = self.team_group(team, CLASS_BCAST)?;
        if root >= grp.size {
            return Err(Error::PeOutOfRange { pe: root as i64, npes: grp.size });
        }
        if nbytes == 0 {
            return Ok(());
        }
        if grp.size == 1 {
            copy_local_bytes(dest, source, nbytes);
            return Ok(());
        }
        match alg {
            BcastAlg::Linear => self.bcast_linear(team, &grp, dest, source, nbytes, root),
            BcastAlg::CompleteTree => {
                self.bcast_tree(&grp, dest, source, nbytes, root, TreeKind::Complete(self.registry.tree_degree), false)
            }
            BcastAlg::BinomialTree => self.bcast_tree(&grp, dest, source, nbytes, root, TreeKind::Binomial, false),
            BcastAlg::KnomialTree => {
                self.bcast_tree(&grp, dest, source, nbytes, root, TreeKind::Knomial(self.registry.knomial_radix), false)
            }
            BcastAlg::KnomialTreeSignal => {
                self.bcast_tree(&grp, dest, source, nbytes, root, TreeKind::Knomial(self.registry.knomial_radix), true)
            }
            BcastAlg::ScatterCollect => self.bcast_scatter_collect(&grp, dest, source, nbytes, root),
        }
    }

    // Barrier in, non-roots pull from the root, barrier out.
    fn bcast_linear(&self, team: Team, grp: &Group, dest: Sym<u8>, source: Sym<u8>, nbytes: usize, root: usize) -> Result<()> {
        self.team_sync_internal(team)?;
        if grp.my_idx == root {
            copy_local_bytes(dest, source, nbytes);
        } else {
            let mut dest = dest;
            self.get_world(&mut dest.local_mut()[..nbytes], source, grp.world_pe(root))?;
        }
        self.team_sync_internal(team)
    }

    fn bcast_tree(
        &self,
        grp: &Group,
        dest: Sym<u8>,
        source: Sym<u8>,
        nbytes: usize,
        root: usize,
        kind: TreeKind,
        signal: bool,
    ) -> Result<()> {
        let v = virt(grp.my_idx, root, grp.size);
        let children = tree_children(kind, v, grp.size);

        if v == 0 {
            copy_local_bytes(dest, source, nbytes);
        } else {
            self.ps_wait_ge(grp, ARRIVE, 1);
            self.ps_retire(grp, ARRIVE, 1);
        }

        let payload = &dest.local()[..nbytes];
        for &c in &children {
            let child = unvirt(c, root, grp.size);
            let world = grp.world_pe(child);
            if signal {
                self.put_signal_world(dest, payload, grp.psync.at(ARRIVE), 1, world)?;
            } else {
                self.put_world(dest, payload, world)?;
                self.fence_default();
                self.ps_add(grp, child, ARRIVE, 1)?;
            }
        }

        if let Some(p) = tree_parent(kind, v) {
            self.ps_add(grp, unvirt(p, root, grp.size), ACK, 1)?;
        }
        if !children.is_empty() {
            self.ps_wait_ge(grp, ACK, children.len() as i64);
            self.ps_retire(grp, ACK, children.len() as i64);
        }
        Ok(())
    }

    // Binomial scatter of ~nbytes/size chunks, then a ring all-gather
    // rotating one chunk per round. Pays extra synchronization for linear
    // bandwidth on large payloads.
    fn bcast_scatter_collect(&self, grp: &Group, dest: Sym<u8>, source: Sym<u8>, nbytes: usize, root: usize) -> Result<()> {
        let size = grp.size;
        let chunk = nbytes.div_ceil(size);
        let off = |c: usize| (c * chunk).min(nbytes);
        let len = |c: usize| off(c + 1) - off(c);
        let v = virt(grp.my_idx, root, size);

        let (_parent, forwards) = scatter_walk(v, size);
        if v == 0 {
            copy_local_bytes(dest, source, nbytes);
        } else {
            self.ps_wait_ge(grp, ARRIVE, 1);
            self.ps_retire(grp, ARRIVE, 1);
        }
        for (child_v, range_start, range_chunks) in forwards {
            let child = unvirt(child_v, root, size);
            let world = grp.world_pe(child);
            let lo = off(range_start);
            let hi = off(range_start + range_chunks);
            self.put_world(dest.slice(lo, hi - lo), &dest.local()[lo..hi], world)?;
            self.fence_default();
            self.ps_add(grp, child, ARRIVE, 1)?;
        }

        // Every virtual rank now owns chunk `v`; rotate the rest around.
        let right_v = (v + 1) % size;
        let right = unvirt(right_v, root, size);
        let right_world = grp.world_pe(right);
        for r in 0..size - 1 {
            let c = (v + size - r) % size;
            let (lo, n) = (off(c), len(c));
            self.put_world(dest.slice(lo, n), &dest.local()[lo..lo + n], right_world)?;
            self.fence_default();
            self.ps_add(grp, right, RING, 1)?;
            self.ps_wait_ge(grp, RING, (r + 1) as i64);
        }
        self.ps_retire(grp, RING, (size - 1) as i64);
        Ok(())
    }
}
