//! An intra-process fabric: every PE is a thread of the current process.
//!
//! Remote memory is plain memory, so puts and gets compile down to copies,
//! and atomics ride on the host's atomic instructions. Transfers of 1, 2,
//! 4, or 8 aligned bytes go through atomic loads and stores, preserving the
//! single-copy atomicity the [`Transport`](crate::Transport) contract
//! requires. The out-of-band side (barrier, key-value exchange) runs over a
//! full mesh of channels, one sender per peer.
//!
//! This fabric exists to run a whole job inside one test binary; it is also
//! the reference for what a NIC-backed fabric must emulate.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::bootstrap::Bootstrap;
use crate::transport::{AmoOp, Chan, RemoteKey, SignalOp, Transport, TransportError, TransportResult};

#[derive(Clone, Copy)]
struct Segment {
    base: u64,
    len: usize,
}

impl Segment {
    fn check(&self, pe: usize, addr: u64, len: usize) -> TransportResult<()> {
        let end = addr.checked_add(len as u64).ok_or(TransportError::OutOfSegment { pe, addr, len })?;
        if addr < self.base || end > self.base + self.len as u64 {
            return Err(TransportError::OutOfSegment { pe, addr, len });
        }
        Ok(())
    }
}

struct Shared {
    npes: usize,
    // [pe][segment index], indexed by the RemoteKey the owner minted.
    segments: RwLock<Vec<Vec<Segment>>>,
    down: AtomicBool,
}

/// Builds the per-PE endpoints of an intra-process fabric.
///
/// `new_vector(npes)` mints one builder per PE; each thread calls
/// [`build`](ProcessPeerBuilder::build) on its own.
pub struct ProcessPeerBuilder {
    index: usize,
    shared: Arc<Shared>,
    senders: Vec<Sender<Oob>>,
    receiver: Receiver<Oob>,
}

impl ProcessPeerBuilder {
    /// Allocates the shared state for `npes` PEs and returns one builder per PE.
    pub fn new_vector(npes: usize) -> Vec<ProcessPeerBuilder> {
        assert!(npes > 0, "a fabric needs at least one PE");
        let shared = Arc::new(Shared {
            npes,
            segments: RwLock::new(vec![Vec::new(); npes]),
            down: AtomicBool::new(false),
        });
        let mut senders = Vec::with_capacity(npes);
        let mut receivers = Vec::with_capacity(npes);
        for _ in 0..npes {
            let (tx, rx) = unbounded();
            senders.push(tx);
            receivers.push(rx);
        }
        receivers
            .into_iter()
            .enumerate()
            .map(|(index, receiver)| ProcessPeerBuilder {
                index,
                shared: Arc::clone(&shared),
                senders: senders.clone(),
                receiver,
            })
            .collect()
    }

    /// Finishes construction on the owning thread.
    pub fn build(self) -> (ProcessTransport, ProcessBootstrap) {
        let transport = ProcessTransport {
            index: self.index,
            shared: Arc::clone(&self.shared),
            next_chan: AtomicUsize::new(1),
        };
        let bootstrap = ProcessBootstrap {
            index: self.index,
            shared: self.shared,
            senders: self.senders,
            receiver: self.receiver,
            stash: RefCell::new(Stash::default()),
        };
        (transport, bootstrap)
    }
}

/// The [`Transport`] of an intra-process fabric.
pub struct ProcessTransport {
    index: usize,
    shared: Arc<Shared>,
    next_chan: AtomicUsize,
}

impl ProcessTransport {
    /// This endpoint's PE index.
    pub fn index(&self) -> usize {
        self.index
    }

    fn lookup(&self, pe: usize, rkey: RemoteKey) -> TransportResult<Segment> {
        if pe >= self.shared.npes {
            return Err(TransportError::PeUnknown { pe });
        }
        if self.shared.down.load(Ordering::Relaxed) {
            return Err(TransportError::Down);
        }
        let table = self.shared.segments.read().expect("segment table poisoned");
        table[pe]
            .get(rkey.0 as usize)
            .copied()
            .ok_or(TransportError::BadKey { pe, key: rkey })
    }
}

// Aligned 1/2/4/8-byte transfers are single-copy atomic; larger ones are
// plain copies, racy only if the application races them.
unsafe fn raw_store(raddr: u64, src: &[u8]) {
    let dst = raddr as *mut u8;
    match src.len() {
        1 => unsafe { AtomicU8::from_ptr(dst) }.store(src[0], Ordering::SeqCst),
        2 if raddr % 2 == 0 => {
            let v = u16::from_ne_bytes(src.try_into().unwrap());
            unsafe { AtomicU16::from_ptr(dst.cast()) }.store(v, Ordering::SeqCst)
        }
        4 if raddr % 4 == 0 => {
            let v = u32::from_ne_bytes(src.try_into().unwrap());
            unsafe { AtomicU32::from_ptr(dst.cast()) }.store(v, Ordering::SeqCst)
        }
        8 if raddr % 8 == 0 => {
            let v = u64::from_ne_bytes(src.try_into().unwrap());
            unsafe { AtomicU64::from_ptr(dst.cast()) }.store(v, Ordering::SeqCst)
        }
        _ => unsafe { ptr::copy(src.as_ptr(), dst, src.len()) },
    }
}

unsafe fn raw_load(raddr: u64, dst: &mut [u8]) {
    let src = raddr as *mut u8;
    match dst.len() {
        1 => dst[0] = unsafe { AtomicU8::from_ptr(src) }.load(Ordering::SeqCst),
        2 if raddr % 2 == 0 => {
            let v = unsafe { AtomicU16::from_ptr(src.cast()) }.load(Ordering::SeqCst);
            dst.copy_from_slice(&v.to_ne_bytes())
        }
        4 if raddr % 4 == 0 => {
            let v = unsafe { AtomicU32::from_ptr(src.cast()) }.load(Ordering::SeqCst);
            dst.copy_from_slice(&v.to_ne_bytes())
        }
        8 if raddr % 8 == 0 => {
            let v = unsafe { AtomicU64::from_ptr(src.cast()) }.load(Ordering::SeqCst);
            dst.copy_from_slice(&v.to_ne_bytes())
        }
        _ => unsafe { ptr::copy(src, dst.as_mut_ptr(), dst.len()) },
    }
}

impl Transport for ProcessTransport {
    fn open_chan(&self) -> Chan {
        self.next_chan.fetch_add(1, Ordering::Relaxed)
    }

    fn register(&self, base: *mut u8, len: usize) -> TransportResult<RemoteKey> {
        if self.shared.down.load(Ordering::Relaxed) {
            return Err(TransportError::Down);
        }
        let mut table = self.shared.segments.write().expect("segment table poisoned");
        let row = &mut table[self.index];
        row.push(Segment { base: base as u64, len });
        let key = RemoteKey(row.len() as u64 - 1);
        log::trace!("PE {} registered segment {:?}: {} bytes at {:#x}", self.index, key, len, base as u64);
        Ok(key)
    }

    fn put(&self, _chan: Chan, pe: usize, raddr: u64, src: &[u8], rkey: RemoteKey) -> TransportResult<()> {
        let seg = self.lookup(pe, rkey)?;
        seg.check(pe, raddr, src.len())?;
        unsafe { raw_store(raddr, src) };
        Ok(())
    }

    fn get(&self, _chan: Chan, pe: usize, raddr: u64, dst: &mut [u8], rkey: RemoteKey) -> TransportResult<()> {
        let seg = self.lookup(pe, rkey)?;
        seg.check(pe, raddr, dst.len())?;
        unsafe { raw_load(raddr, dst) };
        Ok(())
    }

    fn amo32(&self, _chan: Chan, pe: usize, raddr: u64, op: AmoOp, operand: u32, rkey: RemoteKey) -> TransportResult<u32> {
        let seg = self.lookup(pe, rkey)?;
        seg.check(pe, raddr, 4)?;
        debug_assert_eq!(raddr % 4, 0, "32-bit AMO target must be aligned");
        let cell = unsafe { AtomicU32::from_ptr(raddr as *mut u32) };
        Ok(match op {
            AmoOp::Add => cell.fetch_add(operand, Ordering::SeqCst),
            AmoOp::And => cell.fetch_and(operand, Ordering::SeqCst),
            AmoOp::Or => cell.fetch_or(operand, Ordering::SeqCst),
            AmoOp::Xor => cell.fetch_xor(operand, Ordering::SeqCst),
            AmoOp::Swap => cell.swap(operand, Ordering::SeqCst),
        })
    }

    fn amo64(&self, _chan: Chan, pe: usize, raddr: u64, op: AmoOp, operand: u64, rkey: RemoteKey) -> TransportResult<u64> {
        let seg = self.lookup(pe, rkey)?;
        seg.check(pe, raddr, 8)?;
        debug_assert_eq!(raddr % 8, 0, "64-bit AMO target must be aligned");
        let cell = unsafe { AtomicU64::from_ptr(raddr as *mut u64) };
        Ok(match op {
            AmoOp::Add => cell.fetch_add(operand, Ordering::SeqCst),
            AmoOp::And => cell.fetch_and(operand, Ordering::SeqCst),
            AmoOp::Or => cell.fetch_or(operand, Ordering::SeqCst),
            AmoOp::Xor => cell.fetch_xor(operand, Ordering::SeqCst),
            AmoOp::Swap => cell.swap(operand, Ordering::SeqCst),
        })
    }

    fn cswap32(&self, _chan: Chan, pe: usize, raddr: u64, expected: u32, desired: u32, rkey: RemoteKey) -> TransportResult<u32> {
        let seg = self.lookup(pe, rkey)?;
        seg.check(pe, raddr, 4)?;
        debug_assert_eq!(raddr % 4, 0, "32-bit CAS target must be aligned");
        let cell = unsafe { AtomicU32::from_ptr(raddr as *mut u32) };
        Ok(match cell.compare_exchange(expected, desired, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(prior) => prior,
            Err(prior) => prior,
        })
    }

    fn cswap64(&self, _chan: Chan, pe: usize, raddr: u64, expected: u64, desired: u64, rkey: RemoteKey) -> TransportResult<u64> {
        let seg = self.lookup(pe, rkey)?;
        seg.check(pe, raddr, 8)?;
        debug_assert_eq!(raddr % 8, 0, "64-bit CAS target must be aligned");
        let cell = unsafe { AtomicU64::from_ptr(raddr as *mut u64) };
        Ok(match cell.compare_exchange(expected, desired, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(prior) => prior,
            Err(prior) => prior,
        })
    }

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
    ) -> TransportResult<()> {
        self.put(chan, pe, raddr, src, rkey)?;
        match sig_op {
            SignalOp::Add => self.amo64(chan, pe, sig_raddr, AmoOp::Add, sig_value, sig_rkey)?,
            SignalOp::Set => self.amo64(chan, pe, sig_raddr, AmoOp::Swap, sig_value, sig_rkey)?,
        };
        Ok(())
    }

    // Stores complete before the calls return, so the ordering points are
    // trivially satisfied.
    fn fence(&self, _chan: Chan) -> TransportResult<()> {
        if self.shared.down.load(Ordering::Relaxed) {
            return Err(TransportError::Down);
        }
        Ok(())
    }

    fn quiet(&self, _chan: Chan) -> TransportResult<()> {
        if self.shared.down.load(Ordering::Relaxed) {
            return Err(TransportError::Down);
        }
        Ok(())
    }

    fn fence_test(&self, chan: Chan) -> TransportResult<bool> {
        self.fence(chan).map(|()| true)
    }

    fn quiet_test(&self, chan: Chan) -> TransportResult<bool> {
        self.quiet(chan).map(|()| true)
    }

    fn addressable(&self, pe: usize) -> bool {
        pe < self.shared.npes
    }

    fn progress(&self) {
        if self.shared.down.load(Ordering::Relaxed) {
            panic!("fabric is down: a peer aborted");
        }
        std::thread::yield_now();
    }
}

enum Oob {
    Barrier { from: usize },
    Kv { key: String, from: usize, value: Vec<u8> },
}

#[derive(Default)]
struct Stash {
    epoch: u64,
    barrier_tokens: Vec<u64>,
    kv: HashMap<String, Vec<Option<Vec<u8>>>>,
}

/// The [`Bootstrap`] of an intra-process fabric.
pub struct ProcessBootstrap {
    index: usize,
    shared: Arc<Shared>,
    senders: Vec<Sender<Oob>>,
    receiver: Receiver<Oob>,
    stash: RefCell<Stash>,
}

impl ProcessBootstrap {
    // Blocks on the mesh for one message and stashes it.
    fn pump_one(&self) {
        let msg = self.receiver.recv().expect("bootstrap mesh closed");
        let mut stash = self.stash.borrow_mut();
        if stash.barrier_tokens.is_empty() {
            stash.barrier_tokens = vec![0; self.shared.npes];
        }
        match msg {
            Oob::Barrier { from } => stash.barrier_tokens[from] += 1,
            Oob::Kv { key, from, value } => {
                let npes = self.shared.npes;
                let slots = stash.kv.entry(key).or_insert_with(|| vec![None; npes]);
                slots[from] = Some(value);
            }
        }
    }
}

impl Bootstrap for ProcessBootstrap {
    fn rank(&self) -> usize {
        self.index
    }

    fn nranks(&self) -> usize {
        self.shared.npes
    }

    fn nnodes(&self) -> usize {
        1
    }

    fn peers(&self) -> Vec<usize> {
        (0..self.shared.npes).collect()
    }

    fn barrier(&self) {
        let epoch = {
            let mut stash = self.stash.borrow_mut();
            if stash.barrier_tokens.is_empty() {
                stash.barrier_tokens = vec![0; self.shared.npes];
            }
            stash.epoch += 1;
            stash.epoch
        };
        for tx in &self.senders {
            tx.send(Oob::Barrier { from: self.index }).expect("bootstrap mesh closed");
        }
        loop {
            if self.stash.borrow().barrier_tokens.iter().all(|&t| t >= epoch) {
                return;
            }
            self.pump_one();
        }
    }

    fn kv_publish(&self, key: &str, value: Vec<u8>) {
        for tx in &self.senders {
            tx.send(Oob::Kv { key: key.to_owned(), from: self.index, value: value.clone() })
                .expect("bootstrap mesh closed");
        }
    }

    fn kv_exchange(&self, key: &str) -> Vec<Vec<u8>> {
        loop {
            {
                let mut stash = self.stash.borrow_mut();
                if stash.kv.get(key).is_some_and(|slots| slots.iter().all(Option::is_some)) {
                    let slots = stash.kv.remove(key).unwrap();
                    return slots.into_iter().map(Option::unwrap).collect();
                }
            }
            self.pump_one();
        }
    }

    fn abort(&self, msg: &str, status: i32) -> ! {
        self.shared.down.store(true, Ordering::SeqCst);
        eprintln!("PE {} aborting the job: {} (status {})", self.index, msg, status);
        panic!("PE {} aborted: {}", self.index, msg);
    }
}
