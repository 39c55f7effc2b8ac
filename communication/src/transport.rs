//! The one-sided transport capability.
//!
//! A [`Transport`] gives a PE the ability to read, write, and atomically
//! update memory that another PE has [`register`](Transport::register)ed,
//! without that PE's involvement. Addresses are raw (`u64`) virtual
//! addresses on the target, paired with the [`RemoteKey`] the target minted
//! when it registered the segment.
//!
//! Operations are grouped into ordered channels ([`Chan`]): `fence` orders
//! operations to a common target within one channel, `quiet` drains a whole
//! channel. Channels are independent of one another.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies an ordered operation channel within a transport.
pub type Chan = usize;

/// The channel every transport opens at construction.
pub const DEFAULT_CHAN: Chan = 0;

/// An opaque credential granting remote access to one registered segment on
/// one PE. Minted by [`Transport::register`], published to peers out of band.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteKey(pub u64);

/// Selector for the update half of an atomic memory operation.
///
/// Fetching and non-fetching entry points share these; a non-fetching caller
/// simply discards the returned prior value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AmoOp {
    /// Wrapping add of the operand.
    Add,
    /// Bitwise and with the operand.
    And,
    /// Bitwise or with the operand.
    Or,
    /// Bitwise xor with the operand.
    Xor,
    /// Replace with the operand.
    Swap,
}

/// How a put-with-signal updates the remote signal word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalOp {
    /// Atomically add the signal value.
    Add,
    /// Atomically overwrite with the signal value.
    Set,
}

/// Failures surfaced by a transport. All of them are fatal to the caller's
/// run: a transport does not retry on the application's behalf.
#[derive(Debug)]
pub enum TransportError {
    /// The target address range is not covered by the keyed segment.
    OutOfSegment {
        /// Target PE.
        pe: usize,
        /// First byte of the offending range.
        addr: u64,
        /// Length of the offending range.
        len: usize,
    },
    /// The remote key does not name a segment on the target PE.
    BadKey {
        /// Target PE.
        pe: usize,
        /// The key presented.
        key: RemoteKey,
    },
    /// The PE index exceeds the fabric size.
    PeUnknown {
        /// The index presented.
        pe: usize,
    },
    /// The fabric has been torn down (a peer aborted or finalized).
    Down,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::OutOfSegment { pe, addr, len } => {
                write!(f, "address range {:#x}..{:#x} outside registered segment on PE {}", addr, addr + *len as u64, pe)
            }
            TransportError::BadKey { pe, key } => write!(f, "remote key {:?} unknown on PE {}", key, pe),
            TransportError::PeUnknown { pe } => write!(f, "PE {} outside the fabric", pe),
            TransportError::Down => write!(f, "fabric is down"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Shorthand for transport results.
pub type TransportResult<T> = Result<T, TransportError>;

/// One-sided access to the registered memory of every PE in the fabric.
///
/// Implementations promise:
///
/// * **Single-copy atomicity** for aligned transfers of 1, 2, 4, or 8 bytes:
///   a concurrent reader observes either the old or the new value, never a
///   mix. Larger transfers carry no such guarantee.
/// * **Total order of atomics per address**: two AMOs on the same remote
///   address take effect in some global order, regardless of channel.
/// * **Channel ordering**: after `fence(chan)`, operations issued later on
///   `chan` reach any single target after operations issued earlier; after
///   `quiet(chan)` returns, every prior operation on `chan` is remotely
///   complete.
pub trait Transport: Send + Sync + 'static {
    /// Opens a fresh ordered channel and returns its identifier.
    fn open_chan(&self) -> Chan;

    /// Registers `len` bytes at `base` for remote access and returns the
    /// credential peers must present to reach them.
    ///
    /// The memory must stay valid until the transport is dropped.
    fn register(&self, base: *mut u8, len: usize) -> TransportResult<RemoteKey>;

    /// Writes `src` into `[raddr, raddr + src.len())` on `pe`.
    fn put(&self, chan: Chan, pe: usize, raddr: u64, src: &[u8], rkey: RemoteKey) -> TransportResult<()>;

    /// Non-blocking put; completion is observed via `quiet`.
    fn put_nbi(&self, chan: Chan, pe: usize, raddr: u64, src: &[u8], rkey: RemoteKey) -> TransportResult<()> {
        self.put(chan, pe, raddr, src, rkey)
    }

    /// Reads `[raddr, raddr + dst.len())` on `pe` into `dst`.
    fn get(&self, chan: Chan, pe: usize, raddr: u64, dst: &mut [u8], rkey: RemoteKey) -> TransportResult<()>;

    /// Non-blocking get; completion is observed via `quiet`.
    fn get_nbi(&self, chan: Chan, pe: usize, raddr: u64, dst: &mut [u8], rkey: RemoteKey) -> TransportResult<()> {
        self.get(chan, pe, raddr, dst, rkey)
    }

    /// Strided put: `nelems` elements of `elem` bytes each, read from `src`
    /// every `sst` elements and written on `pe` every `tst` elements.
    fn iput(
        &self,
        chan: Chan,
        pe: usize,
        raddr: u64,
        src: &[u8],
        elem: usize,
        tst: usize,
        sst: usize,
        nelems: usize,
        rkey: RemoteKey,
    ) -> TransportResult<()> {
        for i in 0..nelems {
            let s = i * sst * elem;
            self.put(chan, pe, raddr + (i * tst * elem) as u64, &src[s..s + elem], rkey)?;
        }
        Ok(())
    }

    /// Strided get, the mirror of [`iput`](Transport::iput).
    fn iget(
        &self,
        chan: Chan,
        pe: usize,
        raddr: u64,
        dst: &mut [u8],
        elem: usize,
        tst: usize,
        sst: usize,
        nelems: usize,
        rkey: RemoteKey,
    ) -> TransportResult<()> {
        for i in 0..nelems {
            let d = i * tst * elem;
            self.get(chan, pe, raddr + (i * sst * elem) as u64, &mut dst[d..d + elem], rkey)?;
        }
        Ok(())
    }

    /// 32-bit atomic on `raddr` at `pe`; returns the prior value.
    fn amo32(&self, chan: Chan, pe: usize, raddr: u64, op: AmoOp, operand: u32, rkey: RemoteKey) -> TransportResult<u32>;

    /// 64-bit atomic on `raddr` at `pe`; returns the prior value.
    fn amo64(&self, chan: Chan, pe: usize, raddr: u64, op: AmoOp, operand: u64, rkey: RemoteKey) -> TransportResult<u64>;

    /// 32-bit compare-and-swap; returns the prior value (equal to `expected`
    /// exactly when the swap took effect).
    fn cswap32(&self, chan: Chan, pe: usize, raddr: u64, expected: u32, desired: u32, rkey: RemoteKey) -> TransportResult<u32>;

    /// 64-bit compare-and-swap; returns the prior value.
    fn cswap64(&self, chan: Chan, pe: usize, raddr: u64, expected: u64, desired: u64, rkey: RemoteKey) -> TransportResult<u64>;

    /// Put followed by an atomic signal update on the same target, delivered
    /// in that order. The signal lands only after the payload is visible.
    fn put_signal(
        &self,
        chan: Chan,
        pe: usize,
        raddr: u64,
        src: &[u8],
        rkey: RemoteKey,
        sig_raddr: u64,
        sig_rkey: RemoteKey,
        sig_value: u64,
        sig_op: SignalOp,
    ) -> TransportResult<()>;

    /// Non-blocking put-with-signal.
    #[allow(clippy::too_many_arguments)]
    fn put_signal_nbi(
        &self,
        chan: Chan,
        pe: usize,
        raddr: u64,
        src: &[u8],
        rkey: RemoteKey,
        sig_raddr: u64,
        sig_rkey: RemoteKey,
        sig_value: u64,
        sig_op: SignalOp,
    ) -> TransportResult<()> {
        self.put_signal(chan, pe, raddr, src, rkey, sig_raddr, sig_rkey, sig_value, sig_op)
    }

    /// Orders later operations on `chan` after earlier ones, per target.
    fn fence(&self, chan: Chan) -> TransportResult<()>;

    /// Blocks until every prior operation on `chan` is remotely complete.
    fn quiet(&self, chan: Chan) -> TransportResult<()>;

    /// Non-blocking [`fence`](Transport::fence): true when the order point
    /// has been established.
    fn fence_test(&self, chan: Chan) -> TransportResult<bool>;

    /// Non-blocking [`quiet`](Transport::quiet): true when the channel is
    /// drained.
    fn quiet_test(&self, chan: Chan) -> TransportResult<bool>;

    /// True when `pe`'s registered memory can be reached with plain loads
    /// and stores from this PE.
    fn addressable(&self, pe: usize) -> bool {
        let _ = pe;
        false
    }

    /// Advances outstanding work. Spin loops call this between polls so
    /// that atomics land and signals arrive even on a passive target.
    fn progress(&self);
}
