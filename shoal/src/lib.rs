//! Shoal is a partitioned global address space (PGAS) runtime.
//!
//! A job is a set of processing elements (PEs), each a separate execution
//! context with its own address space, cooperating through one-sided
//! operations on a *symmetric heap*: allocations made collectively exist at
//! the same offset on every PE, so a local pointer plus a PE number names
//! memory anywhere in the job. On top of that addressing model the runtime
//! provides:
//!
//! * **RMA**: `put`/`get` families, single elements, strided transfers,
//!   and combined put-with-signal ([`Shoal::put`], [`Shoal::get`],
//!   [`Shoal::iput`], [`Shoal::put_signal`], ...).
//! * **Atomics**: add/inc/set/fetch/swap/compare-swap and the bitwise
//!   family over 32- and 64-bit integers, totally ordered per variable.
//! * **Contexts**: independent ordered channels with `fence`/`quiet`
//!   ([`Ctx`], [`Shoal::create_ctx`]).
//! * **Teams**: PE subgroups with their own rank spaces, built by strided
//!   or 2-D splits, with rank translation between any two teams ([`Team`],
//!   [`Shoal::team_split_strided`], [`Shoal::team_translate_pe`]).
//! * **Collectives**: barrier/sync, broadcast, collect/fcollect,
//!   all-to-all(s), and reductions, each with a family of interchangeable
//!   algorithms selected by `SHMEM_*` environment variables at startup.
//! * **Point-to-point completion**: `wait_until`/`test` families over
//!   symmetric variables ([`CmpOp`], [`Shoal::wait_until`]).
//! * **A distributed lock**: an MCS queue lock over one symmetric long
//!   ([`Shoal::set_lock`]).
//!
//! The communication capabilities (one-sided transport, process bootstrap)
//! live in the `shoal_communication` crate behind traits; the in-process
//! fabric shipped there runs every PE as a thread of one process, which is
//! how the examples below and the test suites run.
//!
//! # Examples
//! ```no_run
//! use shoal_communication::Config;
//!
//! // Four PEs sum their ranks with a recursive-doubling reduction.
//! shoal::execute(Config::Process(4), |pe| {
//!     let src = pe.alloc::<i64>(1).unwrap();
//!     let dst = pe.alloc::<i64>(1).unwrap();
//!     src.write(0, pe.my_pe() as i64);
//!     pe.sum_reduce(shoal::Team::WORLD, dst, src, 1).unwrap();
//!     assert_eq!(dst.read(0), 6);
//! })
//! .unwrap();
//! ```

pub mod collectives;
pub mod context;
pub mod element;
pub mod env;
pub mod error;
pub mod execute;
pub mod lock;
pub mod memory;
pub mod pt2pt;
pub mod runtime;
pub mod team;

pub use collectives::sync_psync_words;
pub use context::{Ctx, CtxOptions, CTX_DEFAULT};
pub use element::{Accumulate, AmoElement, AtomicElement, Bitwise, Element, Ordered};
pub use env::EnvConfig;
pub use error::{Error, Result};
pub use execute::{execute, execute_thread};
#[cfg(feature = "getopts")]
pub use execute::execute_from_args;
pub use memory::Sym;
pub use pt2pt::CmpOp;
pub use runtime::{Shoal, ThreadLevel, SYNC_VALUE};
pub use team::{Team, TeamConfig};

pub use shoal_communication::{Config, PeGuards, SignalOp};
