//! Teams: subgroups of PEs with their own rank space and collective state.
//!
//! A team owns a forward map (team rank to world rank), the reverse map for
//! its members, and one pSync slot out of the process-wide pool: scratch
//! symmetric longs the collective algorithms signal through, one area per
//! collective class. Teams are built by strided splits or a 2-D split of a
//! parent team; the predefined teams `world` and `shared` exist from
//! initialization and can never be destroyed.
//!
//! Pool slots are per-PE memory, so two teams may share a slot number as
//! long as no PE belongs to both. Slot agreement across a split is an
//! and-reduction of the participants' free masks over the parent team; the
//! lowest commonly free bit wins.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::collectives::{CLASS_ALLTOALL, CLASS_BCAST, CLASS_COLLECT, CLASS_REDUCE, CLASS_SYNC, NUM_CLASSES};
use crate::element::Element;
use crate::error::{fatal, Error, Result};
use crate::memory::Sym;
use crate::pt2pt::{fetch_add_local, load_atomic};
use crate::runtime::Shoal;

/// Handle to a team. Handles are PE-local; the same team may sit at
/// different indices on different PEs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Team(pub(crate) usize);

impl Team {
    /// Every PE in the job.
    pub const WORLD: Team = Team(0);
    /// The PEs sharing physical memory with the caller.
    pub const SHARED: Team = Team(1);
    /// The invalid team; every operation on it fails.
    pub const INVALID: Team = Team(usize::MAX);
}

/// Recognized team configuration options.
#[derive(Clone, Copy, Debug, Default)]
pub struct TeamConfig {
    /// Hint: how many contexts the team expects to spawn.
    pub num_contexts: usize,
}

pub(crate) struct TeamRecord {
    #[allow(dead_code)]
    pub parent: Option<Team>,
    pub predefined: bool,
    pub rank: Option<usize>,
    pub npes: usize,
    pub fwd: Rc<Vec<usize>>,
    pub rev: HashMap<usize, usize>,
    pub pool_slot: usize,
    pub cfg: TeamConfig,
    pub ctxts: Vec<usize>,
}

impl TeamRecord {
    fn new(parent: Option<Team>, members: Vec<usize>, me_world: usize, pool_slot: usize, cfg: TeamConfig) -> TeamRecord {
        let rev: HashMap<usize, usize> = members.iter().enumerate().map(|(i, &w)| (w, i)).collect();
        TeamRecord {
            parent,
            predefined: false,
            rank: rev.get(&me_world).copied(),
            npes: members.len(),
            fwd: Rc::new(members),
            rev,
            pool_slot,
            cfg,
            ctxts: Vec::new(),
        }
    }
}

// Geometry of the pSync pool in region 0: `slots` slots, each holding one
// area per collective class.
pub(crate) struct PoolLayout {
    pub slots: usize,
    pub words: [usize; NUM_CLASSES],
    pub class_off: [usize; NUM_CLASSES],
    pub slot_words: usize,
}

impl PoolLayout {
    pub(crate) fn new(npes: usize, max_teams: usize) -> PoolLayout {
        let logp = ceil_log2(npes);
        // Sync needs one word per dissemination round plus tree up/down;
        // collect stages the per-member size table in its slot.
        let mut words = [0; NUM_CLASSES];
        words[CLASS_SYNC] = logp.max(1) + 2;
        words[CLASS_BCAST] = 4;
        words[CLASS_COLLECT] = npes + 4;
        words[CLASS_REDUCE] = 4;
        words[CLASS_ALLTOALL] = 2;
        let mut class_off = [0; NUM_CLASSES];
        let mut cursor = 0;
        for c in 0..NUM_CLASSES {
            class_off[c] = cursor;
            cursor += words[c];
        }
        PoolLayout { slots: max_teams, words, class_off, slot_words: cursor }
    }

    pub(crate) fn total_words(&self) -> usize {
        self.slots * self.slot_words
    }
}

pub(crate) struct PoolState {
    pub layout: PoolLayout,
    pub base: Sym<i64>,
    pub stage: Sym<i64>,
    // Bit set = slot free on this PE.
    pub free: u64,
}

impl PoolState {
    pub(crate) fn initial_free(slots: usize) -> u64 {
        // Slots 0 and 1 belong to the predefined teams.
        (((1u128 << slots) - 1) as u64) & !0b11
    }
}

/// Smallest `k` with `2^k >= n`.
pub(crate) fn ceil_log2(n: usize) -> usize {
    if n <= 1 {
        0
    } else {
        (n - 1).ilog2() as usize + 1
    }
}

// Rank of `parent_rank` within the strided sequence, if it is a member.
pub(crate) fn strided_rank_of(parent_rank: usize, start: usize, stride: usize, size: usize) -> Option<usize> {
    if parent_rank < start {
        return None;
    }
    let delta = parent_rank - start;
    if delta % stride != 0 {
        return None;
    }
    let idx = delta / stride;
    (idx < size).then_some(idx)
}

impl Shoal {
    pub(crate) fn team_record(&self, team: Team) -> Result<&TeamRecord> {
        self.teams.get(team.0).and_then(Option::as_ref).ok_or(Error::TeamInvalid)
    }

    pub(crate) fn resolve_team_pe(&self, team: Team, pe: usize) -> Result<usize> {
        let rec = self.team_record(team)?;
        if pe >= rec.npes {
            return Err(Error::PeOutOfRange { pe: pe as i64, npes: rec.npes });
        }
        Ok(rec.fwd[pe])
    }

    pub(crate) fn psync(&self, pool_slot: usize, class: usize) -> Sym<i64> {
        let layout = &self.pool.layout;
        let off = pool_slot * layout.slot_words + layout.class_off[class];
        self.pool.base.slice(off, layout.words[class])
    }

    pub(crate) fn pool_stage(&self) -> Sym<i64> {
        self.pool.stage
    }

    pub(crate) fn install_predefined_teams(&mut self) {
        let world: Vec<usize> = (0..self.npes).collect();
        let mut world_rec = TeamRecord::new(None, world, self.me, 0, TeamConfig::default());
        world_rec.predefined = true;
        debug_assert_eq!(self.teams.len(), 0);
        self.teams.push(Some(world_rec));

        let peers = self.bootstrap.peers();
        let mut shared_rec = TeamRecord::new(None, peers, self.me, 1, TeamConfig::default());
        shared_rec.predefined = true;
        self.teams.push(Some(shared_rec));
    }

    /// This PE's rank in `team`, or `-1` if it is not a member (or the
    /// handle is invalid).
    pub fn team_my_pe(&self, team: Team) -> i32 {
        match self.team_record(team) {
            Ok(rec) => rec.rank.map_or(-1, |r| r as i32),
            Err(_) => -1,
        }
    }

    /// The size of `team`, or `-1` for an invalid handle.
    pub fn team_n_pes(&self, team: Team) -> i32 {
        match self.team_record(team) {
            Ok(rec) => rec.npes as i32,
            Err(_) => -1,
        }
    }

    /// The configuration `team` was created with.
    pub fn team_get_config(&self, team: Team) -> Result<TeamConfig> {
        Ok(self.team_record(team)?.cfg)
    }

    /// Translates `src_pe` (a rank in `src_team`) into the rank space of
    /// `dst_team`; `-1` when either lookup misses.
    pub fn team_translate_pe(&self, src_team: Team, src_pe: i32, dst_team: Team) -> i32 {
        let (Ok(src), Ok(dst)) = (self.team_record(src_team), self.team_record(dst_team)) else {
            return -1;
        };
        if src_pe < 0 || src_pe as usize >= src.npes {
            return -1;
        }
        let world = src.fwd[src_pe as usize];
        dst.rev.get(&world).map_or(-1, |&r| r as i32)
    }

    /// Splits `parent` by a strided triple: members are the parent ranks
    /// `start, start + stride, ..., start + (size - 1) * stride`.
    ///
    /// Collective over the parent team. Every participant receives a
    /// handle; a participant outside the new team sees rank `-1` on it.
    pub fn team_split_strided(&mut self, parent: Team, start: i32, stride: i32, size: i32, cfg: TeamConfig) -> Result<Team> {
        self.ensure_active("team_split_strided");
        let (parent_npes, parent_fwd, my_parent_rank) = {
            let rec = self.team_record(parent)?;
            let my_parent_rank = rec.rank.ok_or(Error::TeamNotMember)?;
            (rec.npes, Rc::clone(&rec.fwd), my_parent_rank)
        };
        if start < 0 || stride < 1 || size < 1 {
            return Err(Error::PeOutOfRange { pe: start as i64, npes: parent_npes });
        }
        let (start, stride, size) = (start as usize, stride as usize, size as usize);
        let last = start + (size - 1) * stride;
        if last >= parent_npes {
            return Err(Error::PeOutOfRange { pe: last as i64, npes: parent_npes });
        }

        let slot = self.pool_agree(parent)?;
        let members: Vec<usize> = (0..size).map(|i| parent_fwd[start + i * stride]).collect();
        let record = TeamRecord::new(Some(parent), members, self.me, slot, cfg);
        debug_assert_eq!(record.rank, strided_rank_of(my_parent_rank, start, stride, size));
        Ok(self.insert_team(record))
    }

    /// Splits `parent` into a row team and a column team of a row-major
    /// `xrange`-wide grid. Returns `(x_team, y_team)`; the caller is a
    /// member of both.
    pub fn team_split_2d(&mut self, parent: Team, xrange: i32, xcfg: TeamConfig, ycfg: TeamConfig) -> Result<(Team, Team)> {
        self.ensure_active("team_split_2d");
        let (parent_npes, parent_fwd, my_rank) = {
            let rec = self.team_record(parent)?;
            let my_rank = rec.rank.ok_or(Error::TeamNotMember)?;
            (rec.npes, Rc::clone(&rec.fwd), my_rank)
        };
        if xrange <= 0 {
            return Err(Error::PeOutOfRange { pe: xrange as i64, npes: parent_npes });
        }
        let xrange = (xrange as usize).min(parent_npes);

        let row = my_rank / xrange;
        let col = my_rank % xrange;
        let x_start = row * xrange;
        let x_size = xrange.min(parent_npes - x_start);
        let y_size = (parent_npes - col + xrange - 1) / xrange;

        let x_slot = self.pool_agree(parent)?;
        let y_slot = self.pool_agree(parent)?;

        let x_members: Vec<usize> = (0..x_size).map(|i| parent_fwd[x_start + i]).collect();
        let y_members: Vec<usize> = (0..y_size).map(|i| parent_fwd[col + i * xrange]).collect();
        let x_team = self.insert_team(TeamRecord::new(Some(parent), x_members, self.me, x_slot, xcfg));
        let y_team = self.insert_team(TeamRecord::new(Some(parent), y_members, self.me, y_slot, ycfg));
        Ok((x_team, y_team))
    }

    /// Destroys a created team: contexts derived from it (unless privately
    /// owned), its pool slot, and the handle. Destroying a predefined team
    /// is fatal.
    pub fn team_destroy(&mut self, team: Team) -> Result<()> {
        self.ensure_active("team_destroy");
        match self.team_record(team) {
            Ok(rec) if rec.predefined => {
                fatal!(self, "team_destroy", "attempt to destroy a predefined team")
            }
            Ok(_) => {}
            Err(_) => fatal!(self, "team_destroy", "attempt to destroy an invalid team"),
        }
        let rec = self.teams[team.0].take().expect("checked above");
        for ctx_index in rec.ctxts {
            let private = self.ctxts.get(ctx_index).and_then(Option::as_ref).map(|c| c.private);
            if private == Some(false) {
                self.ctxts[ctx_index] = None;
            }
        }
        self.pool.free |= 1u64 << rec.pool_slot;
        Ok(())
    }

    /// The remote address of `sym` on `pe` of `team`, when the target is
    /// load/store addressable from the caller.
    pub fn team_ptr<T: Element>(&self, team: Team, sym: Sym<T>, pe: usize) -> Option<NonNull<T>> {
        let world = self.resolve_team_pe(team, pe).ok()?;
        if !self.transport.addressable(world) {
            return None;
        }
        let (raddr, _rkey) = self.mem.translate(sym.addr(), sym.byte_len().max(1), world)?;
        NonNull::new(raddr as *mut T)
    }

    /// [`team_ptr`](Shoal::team_ptr) on the world team.
    pub fn ptr<T: Element>(&self, sym: Sym<T>, pe: usize) -> Option<NonNull<T>> {
        self.team_ptr(Team::WORLD, sym, pe)
    }

    fn insert_team(&mut self, record: TeamRecord) -> Team {
        match self.teams.iter().position(Option::is_none) {
            Some(index) => {
                self.teams[index] = Some(record);
                Team(index)
            }
            None => {
                self.teams.push(Some(record));
                Team(self.teams.len() - 1)
            }
        }
    }

    // And-reduces the free masks of every parent member (linear gather at
    // the parent root, result pushed back), claims the lowest commonly free
    // slot on all of them, and returns it. Runs out of pool: fatal, the
    // collective state cannot be allocated.
    fn pool_agree(&mut self, parent: Team) -> Result<usize> {
        let (my_rank, npes_t, fwd, pool_slot) = {
            let rec = self.team_record(parent)?;
            let my_rank = rec.rank.ok_or(Error::TeamNotMember)?;
            (my_rank, rec.npes, Rc::clone(&rec.fwd), rec.pool_slot)
        };
        let psync = self.psync(pool_slot, CLASS_REDUCE);
        let stage = self.pool_stage();
        let root_world = fwd[0];
        let mine = self.pool.free as i64;

        let agreed = if npes_t == 1 {
            mine as u64
        } else if my_rank == 0 {
            let expected = (npes_t - 1) as i64;
            self.spin_until(|| load_atomic(psync.at(0).ptr()) >= expected);
            let mut agreed = mine as u64;
            for r in 1..npes_t {
                let w = fwd[r];
                let v = load_atomic(stage.at(w).ptr());
                agreed &= v as u64;
                fetch_add_local(stage.at(w).ptr(), -v);
            }
            fetch_add_local(psync.at(0).ptr(), -expected);
            for r in 1..npes_t {
                let w = fwd[r];
                self.add64_world(stage.at(root_world), agreed as i64, w)?;
                self.fence_default();
                self.add64_world(psync.at(1), 1, w)?;
            }
            agreed
        } else {
            self.add64_world(stage.at(self.me), mine, root_world)?;
            self.fence_default();
            self.add64_world(psync.at(0), 1, root_world)?;
            self.spin_until(|| load_atomic(psync.at(1).ptr()) >= 1);
            let v = load_atomic(stage.at(root_world).ptr());
            fetch_add_local(stage.at(root_world).ptr(), -v);
            fetch_add_local(psync.at(1).ptr(), -1);
            v as u64
        };

        if agreed == 0 {
            fatal!(self, "team_split", "pSync pool exhausted ({} slots)", self.pool.layout.slots);
        }
        let slot = agreed.trailing_zeros() as usize;
        self.pool.free &= !(1u64 << slot);
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn strided_membership() {
        // parent ranks 2, 5, 8 of an 10-wide parent
        assert_eq!(strided_rank_of(2, 2, 3, 3), Some(0));
        assert_eq!(strided_rank_of(5, 2, 3, 3), Some(1));
        assert_eq!(strided_rank_of(8, 2, 3, 3), Some(2));
        assert_eq!(strided_rank_of(3, 2, 3, 3), None);
        assert_eq!(strided_rank_of(11, 2, 3, 3), None);
        assert_eq!(strided_rank_of(1, 2, 3, 3), None);
    }

    #[test]
    fn ceil_log2_edges() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(4), 2);
        assert_eq!(ceil_log2(5), 3);
    }

    #[test]
    fn pool_layout_is_contiguous() {
        let layout = PoolLayout::new(8, 40);
        let mut cursor = 0;
        for c in 0..NUM_CLASSES {
            assert_eq!(layout.class_off[c], cursor);
            cursor += layout.words[c];
        }
        assert_eq!(layout.slot_words, cursor);
        assert_eq!(layout.total_words(), 40 * cursor);
        // Collect's slot carries the size table.
        assert!(layout.words[CLASS_COLLECT] >= 8 + 4);
        let _ = (CLASS_SYNC, CLASS_BCAST, CLASS_REDUCE, CLASS_ALLTOALL);
    }

    proptest! {
        #[test]
        fn strided_rank_roundtrip(start in 0usize..16, stride in 1usize..5, size in 1usize..16) {
            for idx in 0..size {
                let parent_rank = start + idx * stride;
                prop_assert_eq!(strided_rank_of(parent_rank, start, stride, size), Some(idx));
            }
        }

        #[test]
        fn non_members_have_no_rank(p in 0usize..64, start in 0usize..16, stride in 1usize..5, size in 1usize..16) {
            if let Some(idx) = strided_rank_of(p, start, stride, size) {
                prop_assert_eq!(start + idx * stride, p);
            } else {
                let member = p >= start && (p - start) % stride == 0 && (p - start) / stride < size;
                prop_assert!(!member);
            }
        }
    }
}
