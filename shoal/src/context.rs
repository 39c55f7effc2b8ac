//! Communication contexts and the RMA/AMO entry points.
//!
//! A context is an ordered channel for one-sided operations: `fence` orders
//! operations to a common target within the context, `quiet` drains it.
//! Between contexts there is no ordering. Every PE has a default context
//! ([`CTX_DEFAULT`]); further contexts are created from a team and torn
//! down with it.
//!
//! The data movers (`put`/`get` and friends) and the atomics are defined
//! here, both in their default-context form and in a `_ctx` form taking an
//! explicit context. PE arguments are relative to the context's team; on
//! the default context that is the world team, so PE numbers are global.

use std::cell::Cell;

use bytemuck::Zeroable;
use shoal_communication::{AmoOp, Chan, SignalOp};

use crate::element::{AmoElement, Element};
use crate::error::{fatal, Error, Result};
use crate::memory::Sym;
use crate::runtime::Shoal;
use crate::team::Team;

/// Handle to a communication context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ctx(pub(crate) usize);

/// The default context, always present once the library is initialized.
pub const CTX_DEFAULT: Ctx = Ctx(0);

/// Creation options for a context.
#[derive(Clone, Copy, Debug)]
pub struct CtxOptions {
    /// Preserve issue order to a common target without explicit fences.
    pub ordered: bool,
    /// The context is owned by the creating thread alone and is skipped by
    /// team teardown.
    pub private: bool,
}

impl Default for CtxOptions {
    fn default() -> Self {
        CtxOptions { ordered: true, private: false }
    }
}

pub(crate) struct CtxRecord {
    pub chan: Chan,
    #[allow(dead_code)]
    pub ordered: bool,
    pub private: bool,
    pub team: Team,
    pub sessions: Cell<u32>,
}

impl Shoal {
    pub(crate) fn ctx_rec(&self, ctx: Ctx) -> Result<&CtxRecord> {
        self.ctxts.get(ctx.0).and_then(Option::as_ref).ok_or(Error::TeamInvalid)
    }

    /// Creates a context bound to `team`.
    pub fn create_ctx(&mut self, team: Team, opts: CtxOptions) -> Result<Ctx> {
        self.ensure_active("create_ctx");
        self.team_record(team)?;
        let chan = self.transport.open_chan();
        let record = CtxRecord {
            chan,
            ordered: opts.ordered,
            private: opts.private,
            team,
            sessions: Cell::new(0),
        };
        let index = self.ctxts.iter().position(Option::is_none).unwrap_or(self.ctxts.len());
        if index == self.ctxts.len() {
            self.ctxts.push(Some(record));
        } else {
            self.ctxts[index] = Some(record);
        }
        if let Some(rec) = self.teams.get_mut(team.0).and_then(Option::as_mut) {
            rec.ctxts.push(index);
        }
        Ok(Ctx(index))
    }

    /// Destroys a context created with [`create_ctx`](Shoal::create_ctx).
    /// The default context cannot be destroyed.
    pub fn destroy_ctx(&mut self, ctx: Ctx) -> Result<()> {
        self.ensure_active("destroy_ctx");
        if ctx == CTX_DEFAULT {
            return Err(Error::TeamInvalid);
        }
        let record = self.ctxts.get_mut(ctx.0).and_then(Option::take).ok_or(Error::TeamInvalid)?;
        if let Some(team) = self.teams.get_mut(record.team.0).and_then(Option::as_mut) {
            team.ctxts.retain(|&c| c != ctx.0);
        }
        Ok(())
    }

    // Funnels a transport status; the transport does not retry, so neither
    // do we.
    pub(crate) fn tx<T>(&self, func: &'static str, r: std::result::Result<T, shoal_communication::TransportError>) -> T {
        match r {
            Ok(v) => v,
            Err(e) => fatal!(self, func, "transport failure: {}", e),
        }
    }

    fn target<T: Element>(&self, func: &'static str, ctx: Ctx, sym: Sym<T>, nelems: usize, pe: usize) -> Result<(Chan, usize, u64, shoal_communication::RemoteKey)> {
        self.ensure_active(func);
        let rec = self.ctx_rec(ctx)?;
        let world_pe = self.resolve_team_pe(rec.team, pe)?;
        let nbytes = nelems * std::mem::size_of::<T>();
        let (raddr, rkey) = self
            .mem
            .translate(sym.addr(), nbytes, world_pe)
            .ok_or(Error::NotSymmetric { addr: sym.addr() })?;
        Ok((rec.chan, world_pe, raddr, rkey))
    }

    // ------------------------------------------------------------------
    // RMA
    // ------------------------------------------------------------------

    /// Writes `src` into the symmetric `dest` on `pe`.
    pub fn put<T: Element>(&self, dest: Sym<T>, src: &[T], pe: usize) -> Result<()> {
        self.put_ctx(CTX_DEFAULT, dest, src, pe)
    }

    /// [`put`](Shoal::put) on an explicit context.
    pub fn put_ctx<T: Element>(&self, ctx: Ctx, dest: Sym<T>, src: &[T], pe: usize) -> Result<()> {
        let (chan, wpe, raddr, rkey) = self.target("put", ctx, dest, src.len(), pe)?;
        self.tx("put", self.transport.put(chan, wpe, raddr, bytemuck::cast_slice(src), rkey));
        Ok(())
    }

    /// Non-blocking put; completion is observed via [`quiet`](Shoal::quiet).
    pub fn put_nbi<T: Element>(&self, dest: Sym<T>, src: &[T], pe: usize) -> Result<()> {
        self.put_nbi_ctx(CTX_DEFAULT, dest, src, pe)
    }

    /// [`put_nbi`](Shoal::put_nbi) on an explicit context.
    pub fn put_nbi_ctx<T: Element>(&self, ctx: Ctx, dest: Sym<T>, src: &[T], pe: usize) -> Result<()> {
        let (chan, wpe, raddr, rkey) = self.target("put_nbi", ctx, dest, src.len(), pe)?;
        self.tx("put_nbi", self.transport.put_nbi(chan, wpe, raddr, bytemuck::cast_slice(src), rkey));
        Ok(())
    }

    /// Reads the symmetric `src` on `pe` into `dest`.
    pub fn get<T: Element>(&self, dest: &mut [T], src: Sym<T>, pe: usize) -> Result<()> {
        self.get_ctx(CTX_DEFAULT, dest, src, pe)
    }

    /// [`get`](Shoal::get) on an explicit context.
    pub fn get_ctx<T: Element>(&self, ctx: Ctx, dest: &mut [T], src: Sym<T>, pe: usize) -> Result<()> {
        let (chan, wpe, raddr, rkey) = self.target("get", ctx, src, dest.len(), pe)?;
        self.tx("get", self.transport.get(chan, wpe, raddr, bytemuck::cast_slice_mut(dest), rkey));
        Ok(())
    }

    /// Non-blocking get.
    pub fn get_nbi<T: Element>(&self, dest: &mut [T], src: Sym<T>, pe: usize) -> Result<()> {
        self.get_nbi_ctx(CTX_DEFAULT, dest, src, pe)
    }

    /// [`get_nbi`](Shoal::get_nbi) on an explicit context.
    pub fn get_nbi_ctx<T: Element>(&self, ctx: Ctx, dest: &mut [T], src: Sym<T>, pe: usize) -> Result<()> {
        let (chan, wpe, raddr, rkey) = self.target("get_nbi", ctx, src, dest.len(), pe)?;
        self.tx("get_nbi", self.transport.get_nbi(chan, wpe, raddr, bytemuck::cast_slice_mut(dest), rkey));
        Ok(())
    }

    /// Writes a single element.
    pub fn p<T: Element>(&self, dest: Sym<T>, value: T, pe: usize) -> Result<()> {
        self.p_ctx(CTX_DEFAULT, dest, value, pe)
    }

    /// [`p`](Shoal::p) on an explicit context.
    pub fn p_ctx<T: Element>(&self, ctx: Ctx, dest: Sym<T>, value: T, pe: usize) -> Result<()> {
        let (chan, wpe, raddr, rkey) = self.target("p", ctx, dest, 1, pe)?;
        self.tx("p", self.transport.put(chan, wpe, raddr, bytemuck::bytes_of(&value), rkey));
        Ok(())
    }

    /// Reads a single element.
    pub fn g<T: Element>(&self, src: Sym<T>, pe: usize) -> Result<T> {
        self.g_ctx(CTX_DEFAULT, src, pe)
    }

    /// [`g`](Shoal::g) on an explicit context.
    pub fn g_ctx<T: Element>(&self, ctx: Ctx, src: Sym<T>, pe: usize) -> Result<T> {
        let (chan, wpe, raddr, rkey) = self.target("g", ctx, src, 1, pe)?;
        let mut value = T::zeroed();
        self.tx("g", self.transport.get(chan, wpe, raddr, bytemuck::bytes_of_mut(&mut value), rkey));
        Ok(value)
    }

    /// Strided put: element `i` of the transfer reads `src[i * sst]` and
    /// writes `dest[i * tst]` on `pe`.
    pub fn iput<T: Element>(&self, dest: Sym<T>, src: &[T], tst: usize, sst: usize, nelems: usize, pe: usize) -> Result<()> {
        self.iput_ctx(CTX_DEFAULT, dest, src, tst, sst, nelems, pe)
    }

    /// [`iput`](Shoal::iput) on an explicit context.
    pub fn iput_ctx<T: Element>(&self, ctx: Ctx, dest: Sym<T>, src: &[T], tst: usize, sst: usize, nelems: usize, pe: usize) -> Result<()> {
        if nelems == 0 {
            return Ok(());
        }
        let span = (nelems - 1) * tst + 1;
        let (chan, wpe, raddr, rkey) = self.target("iput", ctx, dest, span, pe)?;
        self.tx(
            "iput",
            self.transport.iput(chan, wpe, raddr, bytemuck::cast_slice(src), std::mem::size_of::<T>(), tst, sst, nelems, rkey),
        );
        Ok(())
    }

    /// Strided get, the mirror of [`iput`](Shoal::iput).
    pub fn iget<T: Element>(&self, dest: &mut [T], src: Sym<T>, tst: usize, sst: usize, nelems: usize, pe: usize) -> Result<()> {
        self.iget_ctx(CTX_DEFAULT, dest, src, tst, sst, nelems, pe)
    }

    /// [`iget`](Shoal::iget) on an explicit context.
    pub fn iget_ctx<T: Element>(&self, ctx: Ctx, dest: &mut [T], src: Sym<T>, tst: usize, sst: usize, nelems: usize, pe: usize) -> Result<()> {
        if nelems == 0 {
            return Ok(());
        }
        let span = (nelems - 1) * sst + 1;
        let (chan, wpe, raddr, rkey) = self.target("iget", ctx, src, span, pe)?;
        self.tx(
            "iget",
            self.transport.iget(chan, wpe, raddr, bytemuck::cast_slice_mut(dest), std::mem::size_of::<T>(), tst, sst, nelems, rkey),
        );
        Ok(())
    }

    /// Byte-granularity put.
    pub fn putmem(&self, dest: Sym<u8>, src: &[u8], pe: usize) -> Result<()> {
        self.put(dest, src, pe)
    }

    /// Byte-granularity get.
    pub fn getmem(&self, dest: &mut [u8], src: Sym<u8>, pe: usize) -> Result<()> {
        self.get(dest, src, pe)
    }

    /// Put followed by an atomic signal update on the same PE; the signal
    /// becomes visible only after the payload.
    pub fn put_signal<T: Element>(
        &self,
        dest: Sym<T>,
        src: &[T],
        sig: Sym<u64>,
        value: u64,
        op: SignalOp,
        pe: usize,
    ) -> Result<()> {
        self.put_signal_ctx(CTX_DEFAULT, dest, src, sig, value, op, pe)
    }

    /// [`put_signal`](Shoal::put_signal) on an explicit context.
    pub fn put_signal_ctx<T: Element>(
        &self,
        ctx: Ctx,
        dest: Sym<T>,
        src: &[T],
        sig: Sym<u64>,
        value: u64,
        op: SignalOp,
        pe: usize,
    ) -> Result<()> {
        let (chan, wpe, raddr, rkey) = self.target("put_signal", ctx, dest, src.len(), pe)?;
        let (sig_raddr, sig_rkey) = self
            .mem
            .translate(sig.addr(), 8, wpe)
            .ok_or(Error::NotSymmetric { addr: sig.addr() })?;
        self.tx(
            "put_signal",
            self.transport
                .put_signal(chan, wpe, raddr, bytemuck::cast_slice(src), rkey, sig_raddr, sig_rkey, value, op),
        );
        Ok(())
    }

    /// Non-blocking put-with-signal.
    pub fn put_signal_nbi<T: Element>(
        &self,
        dest: Sym<T>,
        src: &[T],
        sig: Sym<u64>,
        value: u64,
        op: SignalOp,
        pe: usize,
    ) -> Result<()> {
        let (chan, wpe, raddr, rkey) = self.target("put_signal_nbi", CTX_DEFAULT, dest, src.len(), pe)?;
        let (sig_raddr, sig_rkey) = self
            .mem
            .translate(sig.addr(), 8, wpe)
            .ok_or(Error::NotSymmetric { addr: sig.addr() })?;
        self.tx(
            "put_signal_nbi",
            self.transport
                .put_signal_nbi(chan, wpe, raddr, bytemuck::cast_slice(src), rkey, sig_raddr, sig_rkey, value, op),
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // AMO
    // ------------------------------------------------------------------

    fn amo<T: AmoElement>(&self, func: &'static str, ctx: Ctx, dest: Sym<T>, op: AmoOp, operand: T, pe: usize) -> Result<T> {
        let (chan, wpe, raddr, rkey) = self.target(func, ctx, dest, 1, pe)?;
        let prior = if T::BITS == 32 {
            self.tx(func, self.transport.amo32(chan, wpe, raddr, op, operand.to_raw() as u32, rkey)) as u64
        } else {
            self.tx(func, self.transport.amo64(chan, wpe, raddr, op, operand.to_raw(), rkey))
        };
        Ok(T::from_raw(prior))
    }

    /// Atomic add, result discarded.
    pub fn atomic_add<T: AmoElement>(&self, dest: Sym<T>, value: T, pe: usize) -> Result<()> {
        self.amo("atomic_add", CTX_DEFAULT, dest, AmoOp::Add, value, pe).map(|_| ())
    }

    /// Atomic fetch-and-add.
    pub fn atomic_fetch_add<T: AmoElement>(&self, dest: Sym<T>, value: T, pe: usize) -> Result<T> {
        self.amo("atomic_fetch_add", CTX_DEFAULT, dest, AmoOp::Add, value, pe)
    }

    /// Atomic increment.
    pub fn atomic_inc<T: AmoElement>(&self, dest: Sym<T>, pe: usize) -> Result<()> {
        self.amo("atomic_inc", CTX_DEFAULT, dest, AmoOp::Add, T::from_raw(1), pe).map(|_| ())
    }

    /// Atomic fetch-and-increment.
    pub fn atomic_fetch_inc<T: AmoElement>(&self, dest: Sym<T>, pe: usize) -> Result<T> {
        self.amo("atomic_fetch_inc", CTX_DEFAULT, dest, AmoOp::Add, T::from_raw(1), pe)
    }

    /// Atomic overwrite.
    pub fn atomic_set<T: AmoElement>(&self, dest: Sym<T>, value: T, pe: usize) -> Result<()> {
        self.amo("atomic_set", CTX_DEFAULT, dest, AmoOp::Swap, value, pe).map(|_| ())
    }

    /// Atomic read.
    pub fn atomic_fetch<T: AmoElement>(&self, src: Sym<T>, pe: usize) -> Result<T> {
        self.amo("atomic_fetch", CTX_DEFAULT, src, AmoOp::Add, T::from_raw(0), pe)
    }

    /// Atomic swap, returning the prior value.
    pub fn atomic_swap<T: AmoElement>(&self, dest: Sym<T>, value: T, pe: usize) -> Result<T> {
        self.amo("atomic_swap", CTX_DEFAULT, dest, AmoOp::Swap, value, pe)
    }

    /// Atomic compare-and-swap: installs `value` if the current value equals
    /// `cond`; returns the prior value either way.
    pub fn atomic_compare_swap<T: AmoElement>(&self, dest: Sym<T>, cond: T, value: T, pe: usize) -> Result<T> {
        let (chan, wpe, raddr, rkey) = self.target("atomic_compare_swap", CTX_DEFAULT, dest, 1, pe)?;
        let prior = if T::BITS == 32 {
            self.tx(
                "atomic_compare_swap",
                self.transport.cswap32(chan, wpe, raddr, cond.to_raw() as u32, value.to_raw() as u32, rkey),
            ) as u64
        } else {
            self.tx(
                "atomic_compare_swap",
                self.transport.cswap64(chan, wpe, raddr, cond.to_raw(), value.to_raw(), rkey),
            )
        };
        Ok(T::from_raw(prior))
    }

    /// Atomic bitwise and.
    pub fn atomic_and<T: AmoElement>(&self, dest: Sym<T>, value: T, pe: usize) -> Result<()> {
        self.amo("atomic_and", CTX_DEFAULT, dest, AmoOp::And, value, pe).map(|_| ())
    }

    /// Atomic bitwise or.
    pub fn atomic_or<T: AmoElement>(&self, dest: Sym<T>, value: T, pe: usize) -> Result<()> {
        self.amo("atomic_or", CTX_DEFAULT, dest, AmoOp::Or, value, pe).map(|_| ())
    }

    /// Atomic bitwise xor.
    pub fn atomic_xor<T: AmoElement>(&self, dest: Sym<T>, value: T, pe: usize) -> Result<()> {
        self.amo("atomic_xor", CTX_DEFAULT, dest, AmoOp::Xor, value, pe).map(|_| ())
    }

    /// Atomic fetch-and-and.
    pub fn atomic_fetch_and<T: AmoElement>(&self, dest: Sym<T>, value: T, pe: usize) -> Result<T> {
        self.amo("atomic_fetch_and", CTX_DEFAULT, dest, AmoOp::And, value, pe)
    }

    /// Atomic fetch-and-or.
    pub fn atomic_fetch_or<T: AmoElement>(&self, dest: Sym<T>, value: T, pe: usize) -> Result<T> {
        self.amo("atomic_fetch_or", CTX_DEFAULT, dest, AmoOp::Or, value, pe)
    }

    /// Atomic fetch-and-xor.
    pub fn atomic_fetch_xor<T: AmoElement>(&self, dest: Sym<T>, value: T, pe: usize) -> Result<T> {
        self.amo("atomic_fetch_xor", CTX_DEFAULT, dest, AmoOp::Xor, value, pe)
    }

    /// Non-blocking atomic read; the result lands in `fetch` by `quiet`.
    pub fn atomic_fetch_nbi<T: AmoElement>(&self, fetch: &mut T, src: Sym<T>, pe: usize) -> Result<()> {
        *fetch = self.atomic_fetch(src, pe)?;
        Ok(())
    }

    /// Non-blocking fetch-and-add.
    pub fn atomic_fetch_add_nbi<T: AmoElement>(&self, fetch: &mut T, dest: Sym<T>, value: T, pe: usize) -> Result<()> {
        *fetch = self.atomic_fetch_add(dest, value, pe)?;
        Ok(())
    }

    /// Non-blocking fetch-and-increment.
    pub fn atomic_fetch_inc_nbi<T: AmoElement>(&self, fetch: &mut T, dest: Sym<T>, pe: usize) -> Result<()> {
        *fetch = self.atomic_fetch_inc(dest, pe)?;
        Ok(())
    }

    /// Non-blocking swap.
    pub fn atomic_swap_nbi<T: AmoElement>(&self, fetch: &mut T, dest: Sym<T>, value: T, pe: usize) -> Result<()> {
        *fetch = self.atomic_swap(dest, value, pe)?;
        Ok(())
    }

    /// Non-blocking compare-and-swap.
    pub fn atomic_compare_swap_nbi<T: AmoElement>(&self, fetch: &mut T, dest: Sym<T>, cond: T, value: T, pe: usize) -> Result<()> {
        *fetch = self.atomic_compare_swap(dest, cond, value, pe)?;
        Ok(())
    }

    /// Non-blocking fetch-and-and.
    pub fn atomic_fetch_and_nbi<T: AmoElement>(&self, fetch: &mut T, dest: Sym<T>, value: T, pe: usize) -> Result<()> {
        *fetch = self.atomic_fetch_and(dest, value, pe)?;
        Ok(())
    }

    /// Non-blocking fetch-and-or.
    pub fn atomic_fetch_or_nbi<T: AmoElement>(&self, fetch: &mut T, dest: Sym<T>, value: T, pe: usize) -> Result<()> {
        *fetch = self.atomic_fetch_or(dest, value, pe)?;
        Ok(())
    }

    /// Non-blocking fetch-and-xor.
    pub fn atomic_fetch_xor_nbi<T: AmoElement>(&self, fetch: &mut T, dest: Sym<T>, value: T, pe: usize) -> Result<()> {
        *fetch = self.atomic_fetch_xor(dest, value, pe)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Ordering
    // ------------------------------------------------------------------

    /// Fence on the default context.
    pub fn fence(&self) -> Result<()> {
        self.fence_ctx(CTX_DEFAULT)
    }

    /// Orders later operations on `ctx` after earlier ones, per target.
    pub fn fence_ctx(&self, ctx: Ctx) -> Result<()> {
        self.ensure_active("fence");
        let rec = self.ctx_rec(ctx)?;
        self.tx("fence", self.transport.fence(rec.chan));
        Ok(())
    }

    /// Quiet on the default context.
    pub fn quiet(&self) -> Result<()> {
        self.quiet_ctx(CTX_DEFAULT)
    }

    /// Blocks until every prior operation on `ctx` is remotely complete.
    pub fn quiet_ctx(&self, ctx: Ctx) -> Result<()> {
        self.ensure_active("quiet");
        let rec = self.ctx_rec(ctx)?;
        self.tx("quiet", self.transport.quiet(rec.chan));
        Ok(())
    }

    /// Non-blocking fence: has the order point been established?
    pub fn fence_test(&self, ctx: Ctx) -> Result<bool> {
        self.ensure_active("fence_test");
        let rec = self.ctx_rec(ctx)?;
        Ok(self.tx("fence_test", self.transport.fence_test(rec.chan)))
    }

    /// Non-blocking quiet: is the context drained?
    pub fn quiet_test(&self, ctx: Ctx) -> Result<bool> {
        self.ensure_active("quiet_test");
        let rec = self.ctx_rec(ctx)?;
        Ok(self.tx("quiet_test", self.transport.quiet_test(rec.chan)))
    }

    /// Marks the start of a burst of operations on `ctx`. A pacing hint;
    /// carries no ordering semantics.
    pub fn session_start(&self, ctx: Ctx) -> Result<()> {
        self.ensure_active("session_start");
        let rec = self.ctx_rec(ctx)?;
        rec.sessions.set(rec.sessions.get() + 1);
        Ok(())
    }

    /// Closes the innermost session on `ctx`.
    pub fn session_stop(&self, ctx: Ctx) -> Result<()> {
        self.ensure_active("session_stop");
        let rec = self.ctx_rec(ctx)?;
        rec.sessions.set(rec.sessions.get().saturating_sub(1));
        Ok(())
    }

    // ------------------------------------------------------------------
    // World-addressed internals used by the collective engine.
    // ------------------------------------------------------------------

    pub(crate) fn put_world<T: Element>(&self, dest: Sym<T>, src: &[T], world_pe: usize) -> Result<()> {
        let (raddr, rkey) = self
            .mem
            .translate(dest.addr(), src.len() * std::mem::size_of::<T>(), world_pe)
            .ok_or(Error::NotSymmetric { addr: dest.addr() })?;
        let chan = shoal_communication::DEFAULT_CHAN;
        self.tx("put", self.transport.put(chan, world_pe, raddr, bytemuck::cast_slice(src), rkey));
        Ok(())
    }

    pub(crate) fn get_world<T: Element>(&self, dst: &mut [T], src: Sym<T>, world_pe: usize) -> Result<()> {
        let (raddr, rkey) = self
            .mem
            .translate(src.addr(), dst.len() * std::mem::size_of::<T>(), world_pe)
            .ok_or(Error::NotSymmetric { addr: src.addr() })?;
        let chan = shoal_communication::DEFAULT_CHAN;
        self.tx("get", self.transport.get(chan, world_pe, raddr, bytemuck::cast_slice_mut(dst), rkey));
        Ok(())
    }

    pub(crate) fn iput_world<T: Element>(&self, dest: Sym<T>, src: &[T], tst: usize, sst: usize, nelems: usize, world_pe: usize) -> Result<()> {
        if nelems == 0 {
            return Ok(());
        }
        let span = (nelems - 1) * tst + 1;
        let (raddr, rkey) = self
            .mem
            .translate(dest.addr(), span * std::mem::size_of::<T>(), world_pe)
            .ok_or(Error::NotSymmetric { addr: dest.addr() })?;
        let chan = shoal_communication::DEFAULT_CHAN;
        self.tx(
            "iput",
            self.transport.iput(chan, world_pe, raddr, bytemuck::cast_slice(src), std::mem::size_of::<T>(), tst, sst, nelems, rkey),
        );
        Ok(())
    }

    pub(crate) fn add64_world(&self, dest: Sym<i64>, delta: i64, world_pe: usize) -> Result<()> {
        let (raddr, rkey) = self
            .mem
            .translate(dest.addr(), 8, world_pe)
            .ok_or(Error::NotSymmetric { addr: dest.addr() })?;
        let chan = shoal_communication::DEFAULT_CHAN;
        self.tx("atomic_add", self.transport.amo64(chan, world_pe, raddr, AmoOp::Add, delta as u64, rkey));
        Ok(())
    }

    pub(crate) fn cswap_world<T: AmoElement>(&self, dest: Sym<T>, expected: T, desired: T, world_pe: usize) -> Result<T> {
        let (raddr, rkey) = self
            .mem
            .translate(dest.addr(), (T::BITS / 8) as usize, world_pe)
            .ok_or(Error::NotSymmetric { addr: dest.addr() })?;
        let chan = shoal_communication::DEFAULT_CHAN;
        let prior = if T::BITS == 32 {
            self.tx(
                "atomic_compare_swap",
                self.transport.cswap32(chan, world_pe, raddr, expected.to_raw() as u32, desired.to_raw() as u32, rkey),
            ) as u64
        } else {
            self.tx(
                "atomic_compare_swap",
                self.transport.cswap64(chan, world_pe, raddr, expected.to_raw(), desired.to_raw(), rkey),
            )
        };
        Ok(T::from_raw(prior))
    }

    pub(crate) fn put_signal_world(&self, dest: Sym<u8>, src: &[u8], sig: Sym<i64>, value: i64, world_pe: usize) -> Result<()> {
        let (raddr, rkey) = self
            .mem
            .translate(dest.addr(), src.len(), world_pe)
            .ok_or(Error::NotSymmetric { addr: dest.addr() })?;
        let (sig_raddr, sig_rkey) = self
            .mem
            .translate(sig.addr(), 8, world_pe)
            .ok_or(Error::NotSymmetric { addr: sig.addr() })?;
        let chan = shoal_communication::DEFAULT_CHAN;
        self.tx(
            "put_signal",
            self.transport
                .put_signal(chan, world_pe, raddr, src, rkey, sig_raddr, sig_rkey, value as u64, SignalOp::Add),
        );
        Ok(())
    }

    pub(crate) fn fence_default(&self) {
        self.tx("fence", self.transport.fence(shoal_communication::DEFAULT_CHAN));
    }

    pub(crate) fn quiet_default(&self) {
        self.tx("quiet", self.transport.quiet(shoal_communication::DEFAULT_CHAN));
    }
}
