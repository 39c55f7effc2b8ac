//! The per-PE runtime handle: lifecycle, symmetric allocation, and the
//! process-wide state everything else hangs off.
//!
//! A [`Shoal`] is one PE's view of the job: its transport and bootstrap
//! endpoints, the symmetric region map, the team and context arenas, the
//! pSync pool, and the installed collective algorithms. The handle is
//! created by [`execute`](crate::execute) (or [`Shoal::start`] directly),
//! lives on its PE's thread, and statically serializes callers through
//! `&mut self` where it matters; that is why a `MULTIPLE` thread-level
//! request is satisfied with `SERIALIZED`.

use std::sync::Arc;

use shoal_communication::{Bootstrap, Transport, DEFAULT_CHAN};

use crate::collectives::Registry;
use crate::context::{CtxOptions, CtxRecord};
use crate::element::Element;
use crate::env::EnvConfig;
use crate::error::{fatal, Error, Result};
use crate::memory::{RegionMap, Sym};
use crate::team::{PoolLayout, PoolState, Team, TeamRecord};

/// The value every pSync word holds between collectives.
pub const SYNC_VALUE: i64 = 0;

/// Thread-safety contract requested at initialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThreadLevel {
    /// Only one thread ever calls in.
    Single,
    /// Only the initializing thread calls in.
    Funneled,
    /// Multiple threads call, serialized externally.
    Serialized,
    /// Any thread may call concurrently.
    Multiple,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Status {
    Active,
    Shutdown,
}

/// One PE's runtime.
pub struct Shoal {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) bootstrap: Box<dyn Bootstrap>,
    pub(crate) me: usize,
    pub(crate) npes: usize,
    pub(crate) env: EnvConfig,
    pub(crate) mem: RegionMap,
    pub(crate) registry: Registry,
    pub(crate) teams: Vec<Option<TeamRecord>>,
    pub(crate) ctxts: Vec<Option<CtxRecord>>,
    pub(crate) pool: PoolState,
    refcount: u32,
    status: Status,
    thread_level: ThreadLevel,
}

impl Shoal {
    /// Brings one PE up: wires the transport and bootstrap endpoints,
    /// builds the region map and pSync pool, installs the predefined teams
    /// and the environment-selected collective algorithms, and joins the
    /// implicit startup barrier. Returns the handle and the provided
    /// thread level.
    pub fn start(
        transport: Arc<dyn Transport>,
        bootstrap: Box<dyn Bootstrap>,
        requested: ThreadLevel,
    ) -> Result<(Shoal, ThreadLevel)> {
        let env = EnvConfig::from_env();
        let me = bootstrap.rank();
        let npes = bootstrap.nranks();

        let registry = match Registry::from_env(&env) {
            Ok(registry) => registry,
            Err(e) => {
                // No runtime yet, so the fatal sink is inlined.
                eprintln!("[rank_{}][{}:{}][init][ERROR] {}", me, file!(), line!(), e);
                bootstrap.abort(&e.to_string(), 1);
            }
        };

        let layout = PoolLayout::new(npes, env.max_teams);
        let globals_bytes = (layout.total_words() + npes) * 8 + 64;
        let mut mem = RegionMap::new(me);
        mem.add_region(globals_bytes, &*transport, &*bootstrap)?;
        mem.add_region(env.symmetric_size, &*transport, &*bootstrap)?;

        let pool_words = layout.total_words();
        let pool_addr = mem.alloc_bytes(0, pool_words * 8, 8).expect("globals region sized for the pool");
        let stage_addr = mem.alloc_bytes(0, npes * 8, 8).expect("globals region sized for the stage");
        let pool = PoolState {
            base: Sym::from_raw(pool_addr as *mut i64, pool_words),
            stage: Sym::from_raw(stage_addr as *mut i64, npes),
            free: PoolState::initial_free(layout.slots),
            layout,
        };

        let provided = match requested {
            ThreadLevel::Multiple => ThreadLevel::Serialized,
            level => level,
        };

        let mut pe = Shoal {
            transport,
            bootstrap,
            me,
            npes,
            env,
            mem,
            registry,
            teams: Vec::new(),
            ctxts: Vec::new(),
            pool,
            refcount: 1,
            status: Status::Active,
            thread_level: provided,
        };
        pe.install_predefined_teams();
        pe.ctxts.push(Some(CtxRecord {
            chan: DEFAULT_CHAN,
            ordered: true,
            private: false,
            team: Team::WORLD,
            sessions: std::cell::Cell::new(0),
        }));
        for _ in 0..pe.env.prealloc_contexts {
            pe.create_ctx(Team::WORLD, CtxOptions::default())?;
        }

        pe.announce();
        pe.barrier_all()?;
        Ok((pe, provided))
    }

    fn announce(&self) {
        log::debug!("PE {} of {} up ({} regions)", self.me, self.npes, self.mem.region_count());
        if self.env.debug {
            println!(
                "shoal debug: PE {} of {} up, {} regions, heap {} bytes, pSync pool {}x{} words",
                self.me,
                self.npes,
                self.mem.region_count(),
                self.env.symmetric_size,
                self.pool.layout.slots,
                self.pool.layout.slot_words,
            );
        }
        if self.me != 0 {
            return;
        }
        if self.env.version {
            println!("shoal {}", env!("CARGO_PKG_VERSION"));
        }
        if self.env.info {
            println!("shoal configuration:");
            println!("  SHMEM_SYMMETRIC_SIZE     {}", self.env.symmetric_size);
            println!("  SHMEM_PREALLOC_CONTEXTS  {}", self.env.prealloc_contexts);
            println!("  SHMEM_MAX_TEAMS          {}", self.env.max_teams);
            println!("  barrier/sync             {}", self.env.barrier_algorithm);
            println!("  broadcast                {}", self.env.broadcast_algorithm);
            println!("  collect/fcollect         {}/{}", self.env.collect_algorithm, self.env.fcollect_algorithm);
            println!("  alltoall                 {}", self.env.alltoall_algorithm);
            println!("  reduce                   {}", self.env.reduce_algorithm);
        }
    }

    /// This PE's world rank.
    pub fn my_pe(&self) -> usize {
        self.me
    }

    /// Number of PEs in the job.
    pub fn n_pes(&self) -> usize {
        self.npes
    }

    /// The thread level provided at startup.
    pub fn thread_level(&self) -> ThreadLevel {
        self.thread_level
    }

    /// Re-initialization: bumps the reference count and returns the
    /// provided thread level. The library tears down when `finalize` has
    /// been called as many times as `init`.
    pub fn init_thread(&mut self, _requested: ThreadLevel) -> ThreadLevel {
        self.ensure_active("init_thread");
        self.refcount += 1;
        self.thread_level
    }

    /// [`init_thread`](Shoal::init_thread) with the `Single` contract.
    pub fn init(&mut self) -> ThreadLevel {
        self.init_thread(ThreadLevel::Single)
    }

    /// Drops one initialization reference; the last one joins the implicit
    /// finalize barrier and tears the library down.
    pub fn finalize(&mut self) {
        self.ensure_active("finalize");
        self.refcount -= 1;
        if self.refcount > 0 {
            return;
        }
        if let Err(e) = self.barrier_all() {
            fatal!(self, "finalize", "finalize barrier failed: {}", e);
        }
        log::debug!("PE {} shutting down", self.me);
        self.status = Status::Shutdown;
        self.bootstrap.finalize();
    }

    /// True between successful initialization and the final `finalize`.
    pub fn initialized(&self) -> bool {
        self.status == Status::Active && self.refcount > 0
    }

    /// True once the library has been torn down.
    pub fn finalized(&self) -> bool {
        self.status == Status::Shutdown
    }

    /// Asks the launcher to abort every PE in the job.
    pub fn global_exit(&self, status: i32) -> ! {
        self.bootstrap.abort("global_exit", status)
    }

    pub(crate) fn ensure_active(&self, func: &'static str) {
        if self.status != Status::Active {
            fatal!(self, func, "library is not initialized");
        }
    }

    pub(crate) fn fatal(&self, file: &str, line: u32, func: &str, msg: &str) -> ! {
        eprintln!("[rank_{}][{}:{}][{}][ERROR] {}", self.me, file, line, func, msg);
        self.bootstrap.abort(msg, 1)
    }

    pub(crate) fn spin_until(&self, mut pred: impl FnMut() -> bool) {
        while !pred() {
            self.transport.progress();
        }
    }

    // ------------------------------------------------------------------
    // Symmetric memory
    // ------------------------------------------------------------------

    /// Allocates `nelems` elements from the default symmetric heap.
    /// Collective: every PE must allocate in the same order, and all join
    /// a barrier before the allocation is usable.
    pub fn alloc<T: Element>(&mut self, nelems: usize) -> Result<Sym<T>> {
        self.alloc_in(1, nelems)
    }

    /// Allocates from a specific heap region (1 is the default heap;
    /// higher indices come from [`create_heap`](Shoal::create_heap)).
    pub fn alloc_in<T: Element>(&mut self, region: usize, nelems: usize) -> Result<Sym<T>> {
        self.ensure_active("alloc");
        if region == 0 || region >= self.mem.region_count() {
            return Err(Error::NotSymmetric { addr: region as u64 });
        }
        let nbytes = nelems * std::mem::size_of::<T>();
        let align = std::mem::align_of::<T>().max(8);
        let addr = self
            .mem
            .alloc_bytes(region, nbytes, align)
            .ok_or_else(|| Error::AllocFailure { what: format!("{} bytes from heap {}", nbytes, region) })?;
        self.barrier_all()?;
        Ok(Sym::from_raw(addr as *mut T, nelems))
    }

    /// Adds a fresh symmetric heap of `nbytes` and returns its region
    /// index. Collective.
    pub fn create_heap(&mut self, nbytes: usize) -> Result<usize> {
        self.ensure_active("create_heap");
        let region = {
            let Shoal { mem, transport, bootstrap, .. } = self;
            mem.add_region(nbytes, &**transport, &**bootstrap)?
        };
        self.barrier_all()?;
        Ok(region)
    }

    /// True when `addr` lies in some symmetric region on the caller.
    pub fn symmetric(&self, addr: u64) -> bool {
        self.mem.region_of(addr, 1).is_some()
    }

    /// The equivalent address on `pe`, or `0` when `addr` is not
    /// symmetric.
    pub fn translate_addr(&self, addr: u64, pe: usize) -> u64 {
        if pe >= self.npes {
            return 0;
        }
        self.mem.translate(addr, 1, pe).map_or(0, |(raddr, _)| raddr)
    }

    /// True when `addr` lies in the globals region (region 0).
    pub fn global_address(&self, addr: u64) -> bool {
        self.mem.global_address(addr)
    }
}
