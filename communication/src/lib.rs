//! The communication fabric underneath the shoal runtime.
//!
//! A shoal computation is a set of processing elements (PEs), each of which
//! owns a symmetric slice of the global address space and drives one-sided
//! operations against its peers. This crate supplies the two capabilities
//! that make that possible, and a harness for standing them up:
//!
//! * [`Transport`]: one-sided puts, gets, atomics, combined put-with-signal,
//!   and the `fence`/`quiet` ordering points, addressed by `(pe, remote
//!   address, remote key)`.
//! * [`Bootstrap`]: the out-of-band process-management service: who am I,
//!   how many of us are there, a barrier that works before any symmetric
//!   memory exists, and a key-value exchange for wiring up remote keys.
//! * [`initialize`]: build a [`Config`]ured fabric and run one closure per
//!   PE, joining the results through [`PeGuards`].
//!
//! The crate ships one fabric: [`process`], which runs every PE as a thread
//! of the current process and backs remote memory with plain loads and
//! stores. It is the fabric the test suites run on; an RDMA-capable fabric
//! implements the same two traits against a NIC.

#![forbid(unsafe_op_in_unsafe_fn)]

pub mod bootstrap;
pub mod initialize;
pub mod process;
pub mod transport;

pub use bootstrap::Bootstrap;
pub use initialize::{initialize, initialize_from, Config, PeGuards};
pub use process::{ProcessBootstrap, ProcessPeerBuilder, ProcessTransport};
pub use transport::{AmoOp, Chan, RemoteKey, SignalOp, Transport, TransportError, DEFAULT_CHAN};
