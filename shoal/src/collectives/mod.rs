//! The collective engine: a registry of interchangeable algorithms and the
//! dispatch surface over it.
//!
//! Each collective class (sync/barrier, broadcast, collect, reduce,
//! all-to-all) owns a table of named algorithms. One algorithm per class is
//! selected from the environment at initialization; an unknown name is
//! fatal then, not at first use. Algorithms are expressed over a [`Group`]
//! (a rank-ordered view of a team or a legacy active set plus that
//! group's pSync area) and a handful of one-sided primitives.
//!
//! # pSync discipline
//!
//! Every pSync word starts at the sentinel (zero) and must be back at the
//! sentinel when a collective returns. All traffic on pSync words is
//! *additive*: participants `fetch_add` positive deltas, waiters wait for
//! `>= expected`, and the word's owner retires it with `fetch_add(-expected)`.
//! Adds commute, so a straggler from the previous call and an early arrival
//! from the next one cannot corrupt a reset; the balance still works out.
//! Words that carry a value rather than a count (collect's size table) are
//! also written by `fetch_add` from a single writer and retired by the
//! owner with the negated observed value.

pub(crate) mod alltoall;
pub(crate) mod barrier;
pub(crate) mod broadcast;
pub(crate) mod collect;
pub(crate) mod reduce;

use std::rc::Rc;

use crate::element::{Accumulate, Bitwise, Element, Ordered};
use crate::env::EnvConfig;
use crate::error::{Error, Result};
use crate::memory::Sym;
use crate::pt2pt::{fetch_add_local, load_atomic};
use crate::runtime::Shoal;
use crate::team::Team;

pub(crate) const CLASS_SYNC: usize = 0;
pub(crate) const CLASS_BCAST: usize = 1;
pub(crate) const CLASS_COLLECT: usize = 2;
pub(crate) const CLASS_REDUCE: usize = 3;
pub(crate) const CLASS_ALLTOALL: usize = 4;
pub(crate) const NUM_CLASSES: usize = 5;

/// pSync words a user-supplied active-set barrier area must provide for a
/// set of `size` PEs.
pub fn sync_psync_words(size: usize) -> usize {
    crate::team::ceil_log2(size).max(1) + 2
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SyncAlg {
    Linear,
    CompleteTree,
    BinomialTree,
    KnomialTree,
    Dissemination,
}

impl SyncAlg {
    fn from_name(name: &str) -> Option<SyncAlg> {
        Some(match name {
            "linear" => SyncAlg::Linear,
            "complete_tree" => SyncAlg::CompleteTree,
            "binomial_tree" => SyncAlg::BinomialTree,
            "knomial_tree" => SyncAlg::KnomialTree,
            "dissemination" => SyncAlg::Dissemination,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BcastAlg {
    Linear,
    CompleteTree,
    BinomialTree,
    KnomialTree,
    KnomialTreeSignal,
    ScatterCollect,
}

impl BcastAlg {
    fn from_name(name: &str) -> Option<BcastAlg> {
        Some(match name {
            "linear" => BcastAlg::Linear,
            "complete_tree" => BcastAlg::CompleteTree,
            "binomial_tree" => BcastAlg::BinomialTree,
            "knomial_tree" => BcastAlg::KnomialTree,
            "knomial_tree_signal" => BcastAlg::KnomialTreeSignal,
            "scatter_collect" => BcastAlg::ScatterCollect,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FcollectAlg {
    Linear,
    AllLinear,
    Ring,
    RecDbl,
    RecDblSignal,
    Bruck,
    BruckNoRotate,
    BruckSignal,
    BruckInplace,
    NeighborExchange,
}

impl FcollectAlg {
    fn from_name(name: &str) -> Option<FcollectAlg> {
        Some(match name {
            "linear" => FcollectAlg::Linear,
            "all_linear" => FcollectAlg::AllLinear,
            "ring" => FcollectAlg::Ring,
            "rec_dbl" => FcollectAlg::RecDbl,
            "rec_dbl_signal" => FcollectAlg::RecDblSignal,
            "bruck" => FcollectAlg::Bruck,
            "bruck_no_rotate" => FcollectAlg::BruckNoRotate,
            "bruck_signal" => FcollectAlg::BruckSignal,
            "bruck_inplace" => FcollectAlg::BruckInplace,
            "neighbor_exchange" => FcollectAlg::NeighborExchange,
            _ => return None,
        })
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            FcollectAlg::Linear => "linear",
            FcollectAlg::AllLinear => "all_linear",
            FcollectAlg::Ring => "ring",
            FcollectAlg::RecDbl => "rec_dbl",
            FcollectAlg::RecDblSignal => "rec_dbl_signal",
            FcollectAlg::Bruck => "bruck",
            FcollectAlg::BruckNoRotate => "bruck_no_rotate",
            FcollectAlg::BruckSignal => "bruck_signal",
            FcollectAlg::BruckInplace => "bruck_inplace",
            FcollectAlg::NeighborExchange => "neighbor_exchange",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CollectAlg {
    Linear,
    AllLinear,
    Ring,
    RecDbl,
    Bruck,
}

impl CollectAlg {
    fn from_name(name: &str) -> Option<CollectAlg> {
        Some(match name {
            "linear" => CollectAlg::Linear,
            "all_linear" => CollectAlg::AllLinear,
            "ring" => CollectAlg::Ring,
            "rec_dbl" => CollectAlg::RecDbl,
            "bruck" => CollectAlg::Bruck,
            _ => return None,
        })
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            CollectAlg::Linear => "linear",
            CollectAlg::AllLinear => "all_linear",
            CollectAlg::Ring => "ring",
            CollectAlg::RecDbl => "rec_dbl",
            CollectAlg::Bruck => "bruck",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PeerSched {
    Shift,
    Xor,
    Color,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SyncFlavor {
    Barrier,
    Counter,
    Signal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct A2aAlg {
    pub sched: PeerSched,
    pub flavor: SyncFlavor,
}

impl A2aAlg {
    fn from_name(name: &str) -> Option<A2aAlg> {
        let (sched, rest) = if let Some(rest) = name.strip_prefix("shift_exchange_") {
            (PeerSched::Shift, rest)
        } else if let Some(rest) = name.strip_prefix("xor_pairwise_") {
            (PeerSched::Xor, rest)
        } else if let Some(rest) = name.strip_prefix("color_pairwise_") {
            (PeerSched::Color, rest)
        } else {
            return None;
        };
        let flavor = match rest {
            "barrier" => SyncFlavor::Barrier,
            "counter" => SyncFlavor::Counter,
            "signal" => SyncFlavor::Signal,
            _ => return None,
        };
        Some(A2aAlg { sched, flavor })
    }

    pub(crate) fn name(self) -> String {
        let sched = match self.sched {
            PeerSched::Shift => "shift_exchange",
            PeerSched::Xor => "xor_pairwise",
            PeerSched::Color => "color_pairwise",
        };
        let flavor = match self.flavor {
            SyncFlavor::Barrier => "barrier",
            SyncFlavor::Counter => "counter",
            SyncFlavor::Signal => "signal",
        };
        format!("{}_{}", sched, flavor)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReduceAlg {
    Linear,
    Binomial,
    RecDbl,
    Rabenseifner,
    Rabenseifner2,
}

impl ReduceAlg {
    fn from_name(name: &str) -> Option<ReduceAlg> {
        Some(match name {
            "linear" => ReduceAlg::Linear,
            "binomial" => ReduceAlg::Binomial,
            "rec_dbl" => ReduceAlg::RecDbl,
            "rabenseifner" => ReduceAlg::Rabenseifner,
            "rabenseifner2" => ReduceAlg::Rabenseifner2,
            _ => return None,
        })
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            ReduceAlg::Linear => "linear",
            ReduceAlg::Binomial => "binomial",
            ReduceAlg::RecDbl => "rec_dbl",
            ReduceAlg::Rabenseifner => "rabenseifner",
            ReduceAlg::Rabenseifner2 => "rabenseifner2",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReduceOp {
    And,
    Or,
    Xor,
    Min,
    Max,
    Sum,
    Prod,
}

pub(crate) const REDUCE_OPS: [ReduceOp; 7] =
    [ReduceOp::And, ReduceOp::Or, ReduceOp::Xor, ReduceOp::Min, ReduceOp::Max, ReduceOp::Sum, ReduceOp::Prod];

impl ReduceOp {
    pub(crate) fn index(self) -> usize {
        REDUCE_OPS.iter().position(|&op| op == self).expect("op listed")
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            ReduceOp::And => "and",
            ReduceOp::Or => "or",
            ReduceOp::Xor => "xor",
            ReduceOp::Min => "min",
            ReduceOp::Max => "max",
            ReduceOp::Sum => "sum",
            ReduceOp::Prod => "prod",
        }
    }
}

/// The installed algorithm selections, bound once at initialization.
pub(crate) struct Registry {
    pub barrier: SyncAlg,
    pub barrier_all: SyncAlg,
    pub sync: SyncAlg,
    pub sync_all: SyncAlg,
    pub team_sync: SyncAlg,
    pub broadcast: BcastAlg,
    pub collect: CollectAlg,
    pub fcollect: FcollectAlg,
    pub alltoall: A2aAlg,
    pub alltoalls: A2aAlg,
    pub reduce: [ReduceAlg; 7],
    pub tree_degree: usize,
    pub knomial_radix: usize,
    pub rounds_sync: usize,
}

fn lookup<T>(class: &str, name: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T> {
    parse(name).ok_or_else(|| Error::AlgorithmUnsupported {
        name: name.to_owned(),
        reason: format!("not a registered {} algorithm", class),
    })
}

impl Registry {
    pub(crate) fn from_env(env: &EnvConfig) -> Result<Registry> {
        let mut reduce = [ReduceAlg::RecDbl; 7];
        for op in REDUCE_OPS {
            reduce[op.index()] = lookup("reduce", env.reduce_algorithm_for(op.name()), ReduceAlg::from_name)?;
        }
        Ok(Registry {
            barrier: lookup("sync", &env.barrier_algorithm, SyncAlg::from_name)?,
            barrier_all: lookup("sync", &env.barrier_all_algorithm, SyncAlg::from_name)?,
            sync: lookup("sync", &env.sync_algorithm, SyncAlg::from_name)?,
            sync_all: lookup("sync", &env.sync_all_algorithm, SyncAlg::from_name)?,
            team_sync: lookup("sync", &env.team_sync_algorithm, SyncAlg::from_name)?,
            broadcast: lookup("broadcast", &env.broadcast_algorithm, BcastAlg::from_name)?,
            collect: lookup("collect", &env.collect_algorithm, CollectAlg::from_name)?,
            fcollect: lookup("fcollect", &env.fcollect_algorithm, FcollectAlg::from_name)?,
            alltoall: lookup("alltoall", &env.alltoall_algorithm, A2aAlg::from_name)?,
            alltoalls: lookup("alltoalls", &env.alltoalls_algorithm, A2aAlg::from_name)?,
            reduce,
            tree_degree: env.tree_degree,
            knomial_radix: env.knomial_radix,
            rounds_sync: env.alltoall_rounds_sync,
        })
    }
}

// A rank-ordered view of the PEs participating in one collective, plus the
// pSync area the algorithm signals through.
pub(crate) struct Group {
    pub my_idx: usize,
    pub size: usize,
    pub psync: Sym<i64>,
    map: GroupMap,
}

enum GroupMap {
    Table(Rc<Vec<usize>>),
    Strided { start: usize, stride: usize },
}

impl Group {
    pub(crate) fn world_pe(&self, idx: usize) -> usize {
        match &self.map {
            GroupMap::Table(fwd) => fwd[idx],
            GroupMap::Strided { start, stride } => start + idx * stride,
        }
    }
}

impl Shoal {
    pub(crate) fn team_group(&self, team: Team, class: usize) -> Result<Group> {
        let rec = self.team_record(team)?;
        let my_idx = rec.rank.ok_or(Error::TeamNotMember)?;
        Ok(Group {
            my_idx,
            size: rec.npes,
            psync: self.psync(rec.pool_slot, class),
            map: GroupMap::Table(Rc::clone(&rec.fwd)),
        })
    }

    pub(crate) fn active_set_group(&self, start: usize, log2_stride: u32, size: usize, psync: Sym<i64>) -> Result<Group> {
        let stride = 1usize << log2_stride;
        let me = self.my_pe();
        if me < start || (me - start) % stride != 0 || (me - start) / stride >= size {
            return Err(Error::TeamNotMember);
        }
        if start + (size - 1) * stride >= self.n_pes() {
            return Err(Error::PeOutOfRange { pe: (start + (size - 1) * stride) as i64, npes: self.n_pes() });
        }
        if psync.len() < sync_psync_words(size) {
            return Err(Error::AlgorithmUnsupported {
                name: "active_set".to_owned(),
                reason: format!("pSync of {} words is too small for {} PEs", psync.len(), size),
            });
        }
        Ok(Group { my_idx: (me - start) / stride, size, psync, map: GroupMap::Strided { start, stride } })
    }

    // ------------------------------------------------------------------
    // pSync primitives (see the module docs for the additive discipline).
    // ------------------------------------------------------------------

    pub(crate) fn ps_add(&self, grp: &Group, idx: usize, slot: usize, delta: i64) -> Result<()> {
        self.add64_world(grp.psync.at(slot), delta, grp.world_pe(idx))
    }

    pub(crate) fn ps_wait_ge(&self, grp: &Group, slot: usize, target: i64) {
        let ptr = grp.psync.at(slot).ptr();
        self.spin_until(|| load_atomic(ptr) >= target);
    }

    pub(crate) fn ps_read(&self, grp: &Group, slot: usize) -> i64 {
        load_atomic(grp.psync.at(slot).ptr())
    }

    pub(crate) fn ps_retire(&self, grp: &Group, slot: usize, amount: i64) {
        if amount != 0 {
            fetch_add_local(grp.psync.at(slot).ptr(), -amount);
        }
    }

    // ------------------------------------------------------------------
    // Dispatch: synchronization
    // ------------------------------------------------------------------

    /// Barrier over every PE: completes outstanding default-context
    /// operations, then synchronizes.
    pub fn barrier_all(&self) -> Result<()> {
        self.ensure_active("barrier_all");
        self.quiet_default();
        let grp = self.team_group(Team::WORLD, CLASS_SYNC)?;
        self.sync_group(&grp, self.registry.barrier_all)
    }

    /// Synchronization over every PE, without the completion phase.
    pub fn sync_all(&self) -> Result<()> {
        self.ensure_active("sync_all");
        let grp = self.team_group(Team::WORLD, CLASS_SYNC)?;
        self.sync_group(&grp, self.registry.sync_all)
    }

    /// Barrier over the active set `(start, 2^log2_stride, size)` using the
    /// caller-supplied pSync area (at least [`sync_psync_words`] longs,
    /// all at the sentinel).
    pub fn barrier(&self, start: usize, log2_stride: u32, size: usize, psync: Sym<i64>) -> Result<()> {
        self.ensure_active("barrier");
        self.quiet_default();
        let grp = self.active_set_group(start, log2_stride, size, psync)?;
        self.sync_group(&grp, self.registry.barrier)
    }

    /// Synchronization over an active set, without the completion phase.
    pub fn sync(&self, start: usize, log2_stride: u32, size: usize, psync: Sym<i64>) -> Result<()> {
        self.ensure_active("sync");
        let grp = self.active_set_group(start, log2_stride, size, psync)?;
        self.sync_group(&grp, self.registry.sync)
    }

    /// Barrier across exactly the members of `team`: prior default-context
    /// operations are complete before any member returns.
    pub fn team_sync(&self, team: Team) -> Result<()> {
        self.ensure_active("team_sync");
        self.quiet_default();
        let grp = self.team_group(team, CLASS_SYNC)?;
        self.sync_group(&grp, self.registry.team_sync)
    }

    // Internal barrier between collective phases; same pSync class, no
    // completion phase.
    pub(crate) fn team_sync_internal(&self, team: Team) -> Result<()> {
        let grp = self.team_group(team, CLASS_SYNC)?;
        self.sync_group(&grp, self.registry.team_sync)
    }

    // ------------------------------------------------------------------
    // Dispatch: data collectives
    // ------------------------------------------------------------------

    /// Broadcasts `nelems` elements from `source` on the team's `root` to
    /// `dest` on every member.
    pub fn broadcast<T: Element>(&self, team: Team, dest: Sym<T>, source: Sym<T>, nelems: usize, root: usize) -> Result<()> {
        self.ensure_active("broadcast");
        let nbytes = nelems * std::mem::size_of::<T>();
        check_len("broadcast", dest, nelems)?;
        check_len("broadcast", source, nelems)?;
        check_overlap(dest.as_bytes(), source.as_bytes(), nbytes, nbytes)?;
        self.bcast_bytes(team, dest.as_bytes(), source.as_bytes(), nbytes, root, self.registry.broadcast)
    }

    /// Byte-granularity broadcast.
    pub fn broadcastmem(&self, team: Team, dest: Sym<u8>, source: Sym<u8>, nbytes: usize, root: usize) -> Result<()> {
        self.ensure_active("broadcastmem");
        check_len("broadcastmem", dest, nbytes)?;
        check_len("broadcastmem", source, nbytes)?;
        check_overlap(dest, source, nbytes, nbytes)?;
        self.bcast_bytes(team, dest, source, nbytes, root, self.registry.broadcast)
    }

    /// Concatenates `nelems` elements from every member, in team-rank
    /// order, into `dest` on every member.
    pub fn fcollect<T: Element>(&self, team: Team, dest: Sym<T>, source: Sym<T>, nelems: usize) -> Result<()> {
        self.ensure_active("fcollect");
        let size = self.team_record(team)?.npes;
        let nbytes = nelems * std::mem::size_of::<T>();
        check_len("fcollect", source, nelems)?;
        check_len("fcollect", dest, nelems * size)?;
        check_overlap(dest.as_bytes(), source.as_bytes(), nbytes * size, nbytes)?;
        self.fcollect_bytes(team, dest.as_bytes(), source.as_bytes(), nbytes, self.registry.fcollect)
    }

    /// Byte-granularity fcollect.
    pub fn fcollectmem(&self, team: Team, dest: Sym<u8>, source: Sym<u8>, nbytes: usize) -> Result<()> {
        self.ensure_active("fcollectmem");
        let size = self.team_record(team)?.npes;
        check_len("fcollectmem", source, nbytes)?;
        check_len("fcollectmem", dest, nbytes * size)?;
        check_overlap(dest, source, nbytes * size, nbytes)?;
        self.fcollect_bytes(team, dest, source, nbytes, self.registry.fcollect)
    }

    /// Variable-length collect: each member contributes its own `nelems`;
    /// output offsets are the prefix sums in team-rank order.
    pub fn collect<T: Element>(&self, team: Team, dest: Sym<T>, source: Sym<T>, nelems: usize) -> Result<()> {
        self.ensure_active("collect");
        check_len("collect", source, nelems)?;
        let nbytes = nelems * std::mem::size_of::<T>();
        check_overlap(dest.as_bytes(), source.as_bytes(), dest.byte_len(), nbytes)?;
        self.collect_bytes(team, dest.as_bytes(), source.as_bytes(), nbytes, self.registry.collect)
    }

    /// Byte-granularity collect.
    pub fn collectmem(&self, team: Team, dest: Sym<u8>, source: Sym<u8>, nbytes: usize) -> Result<()> {
        self.ensure_active("collectmem");
        check_len("collectmem", source, nbytes)?;
        check_overlap(dest, source, dest.len(), nbytes)?;
        self.collect_bytes(team, dest, source, nbytes, self.registry.collect)
    }

    /// Each member sends a distinct `nelems`-element block to every other
    /// member; the block from team rank `i` lands at offset `i * nelems`.
    pub fn alltoall<T: Element>(&self, team: Team, dest: Sym<T>, source: Sym<T>, nelems: usize) -> Result<()> {
        self.ensure_active("alltoall");
        let size = self.team_record(team)?.npes;
        check_len("alltoall", source, nelems * size)?;
        check_len("alltoall", dest, nelems * size)?;
        let nbytes = nelems * size * std::mem::size_of::<T>();
        check_overlap(dest.as_bytes(), source.as_bytes(), nbytes, nbytes)?;
        self.alltoall_bytes(team, dest.as_bytes(), source.as_bytes(), nelems * std::mem::size_of::<T>(), self.registry.alltoall)
    }

    /// Byte-granularity all-to-all: `nbytes` per block.
    pub fn alltoallmem(&self, team: Team, dest: Sym<u8>, source: Sym<u8>, nbytes: usize) -> Result<()> {
        self.ensure_active("alltoallmem");
        let size = self.team_record(team)?.npes;
        check_len("alltoallmem", source, nbytes * size)?;
        check_len("alltoallmem", dest, nbytes * size)?;
        check_overlap(dest, source, nbytes * size, nbytes * size)?;
        self.alltoall_bytes(team, dest, source, nbytes, self.registry.alltoall)
    }

    /// Strided all-to-all: element `k` of the block for team rank `j` is
    /// read at `source[(j * nelems + k) * sst]` and lands on `j` at
    /// `dest[(i * nelems + k) * tst]` for sender `i`.
    pub fn alltoalls<T: Element>(&self, team: Team, dest: Sym<T>, source: Sym<T>, tst: usize, sst: usize, nelems: usize) -> Result<()> {
        self.ensure_active("alltoalls");
        let size = self.team_record(team)?.npes;
        if tst == 0 || sst == 0 {
            return Err(Error::AlgorithmUnsupported {
                name: self.registry.alltoalls.name(),
                reason: "strides must be positive".to_owned(),
            });
        }
        check_len("alltoalls", source, ((nelems * size).saturating_sub(1)) * sst + 1)?;
        check_len("alltoalls", dest, ((nelems * size).saturating_sub(1)) * tst + 1)?;
        self.alltoalls_typed(team, dest, source, tst, sst, nelems, self.registry.alltoalls)
    }

    /// Byte-granularity strided all-to-all.
    pub fn alltoallsmem(&self, team: Team, dest: Sym<u8>, source: Sym<u8>, tst: usize, sst: usize, nbytes: usize) -> Result<()> {
        self.alltoalls(team, dest, source, tst, sst, nbytes)
    }

    // ------------------------------------------------------------------
    // Dispatch: reductions
    // ------------------------------------------------------------------

    /// Bitwise-and reduction across the team.
    pub fn and_reduce<T: Bitwise>(&self, team: Team, dest: Sym<T>, source: Sym<T>, nelems: usize) -> Result<()> {
        self.reduce_entry(team, dest, source, nelems, ReduceOp::And, T::and2)
    }

    /// Bitwise-or reduction across the team.
    pub fn or_reduce<T: Bitwise>(&self, team: Team, dest: Sym<T>, source: Sym<T>, nelems: usize) -> Result<()> {
        self.reduce_entry(team, dest, source, nelems, ReduceOp::Or, T::or2)
    }

    /// Bitwise-xor reduction across the team.
    pub fn xor_reduce<T: Bitwise>(&self, team: Team, dest: Sym<T>, source: Sym<T>, nelems: usize) -> Result<()> {
        self.reduce_entry(team, dest, source, nelems, ReduceOp::Xor, T::xor2)
    }

    /// Minimum reduction across the team.
    pub fn min_reduce<T: Ordered>(&self, team: Team, dest: Sym<T>, source: Sym<T>, nelems: usize) -> Result<()> {
        self.reduce_entry(team, dest, source, nelems, ReduceOp::Min, T::min2)
    }

    /// Maximum reduction across the team.
    pub fn max_reduce<T: Ordered>(&self, team: Team, dest: Sym<T>, source: Sym<T>, nelems: usize) -> Result<()> {
        self.reduce_entry(team, dest, source, nelems, ReduceOp::Max, T::max2)
    }

    /// Sum reduction across the team.
    ///
    /// Floating-point reduction order depends on the selected algorithm;
    /// two algorithms may legitimately produce bit-different results.
    pub fn sum_reduce<T: Accumulate>(&self, team: Team, dest: Sym<T>, source: Sym<T>, nelems: usize) -> Result<()> {
        self.reduce_entry(team, dest, source, nelems, ReduceOp::Sum, T::add2)
    }

    /// Product reduction across the team, same ordering caveat as
    /// [`sum_reduce`](Shoal::sum_reduce).
    pub fn prod_reduce<T: Accumulate>(&self, team: Team, dest: Sym<T>, source: Sym<T>, nelems: usize) -> Result<()> {
        self.reduce_entry(team, dest, source, nelems, ReduceOp::Prod, T::mul2)
    }

    fn reduce_entry<T: Element>(
        &self,
        team: Team,
        dest: Sym<T>,
        source: Sym<T>,
        nelems: usize,
        op: ReduceOp,
        combine: impl Fn(T, T) -> T + Copy,
    ) -> Result<()> {
        self.ensure_active("reduce");
        check_len("reduce", dest, nelems)?;
        check_len("reduce", source, nelems)?;
        let nbytes = nelems * std::mem::size_of::<T>();
        check_overlap(dest.as_bytes(), source.as_bytes(), nbytes, nbytes)?;
        let alg = self.registry.reduce[op.index()];
        self.reduce_typed(team, dest, source, nelems, alg, combine)
    }
}

fn check_len<T: Element>(what: &str, sym: Sym<T>, needed: usize) -> Result<()> {
    if sym.len() < needed {
        return Err(Error::AllocFailure { what: format!("{}: buffer of {} elements, {} required", what, sym.len(), needed) });
    }
    Ok(())
}

fn check_overlap(a: Sym<u8>, b: Sym<u8>, a_len: usize, b_len: usize) -> Result<()> {
    let (a0, a1) = (a.addr(), a.addr() + a_len as u64);
    let (b0, b1) = (b.addr(), b.addr() + b_len as u64);
    if a0 < b1 && b0 < a1 {
        return Err(Error::BufferOverlap);
    }
    Ok(())
}
