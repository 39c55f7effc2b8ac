//! Point-to-point completion: the wait/test families.
//!
//! A PE blocks on (or polls) the value of a local symmetric variable that
//! some other PE is updating remotely. Waits spin on an atomic load of the
//! variable and pump transport progress between polls, so a passive target
//! still makes forward progress.
//!
//! The plural forms take a contiguous array of variables, an optional
//! status mask (nonzero entries are excluded from consideration), and
//! either one comparison value or, in the `_vector` forms, one value per
//! variable.

use std::sync::atomic::{AtomicI64, AtomicU16, AtomicU32, AtomicU64, Ordering};

use crate::element::AtomicElement;
use crate::error::Result;
use crate::memory::Sym;
use crate::runtime::Shoal;

/// Comparison operators for waits, tests, and signal waits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Strictly greater.
    Gt,
    /// Less or equal.
    Le,
    /// Strictly less.
    Lt,
    /// Greater or equal.
    Ge,
}

impl CmpOp {
    /// Evaluates `lhs <op> rhs`.
    pub fn satisfied<T: PartialOrd>(self, lhs: T, rhs: T) -> bool {
        match self {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Ge => lhs >= rhs,
        }
    }
}

// Atomic load of a symmetric variable through its local address. Remote
// stores of matching width are single-copy atomic, so this observes a
// consistent value.
pub(crate) fn load_atomic<T: AtomicElement>(ptr: *mut T) -> T {
    let raw = match T::BITS {
        16 => unsafe { AtomicU16::from_ptr(ptr.cast()) }.load(Ordering::SeqCst) as u64,
        32 => unsafe { AtomicU32::from_ptr(ptr.cast()) }.load(Ordering::SeqCst) as u64,
        _ => unsafe { AtomicU64::from_ptr(ptr.cast()) }.load(Ordering::SeqCst),
    };
    T::from_raw(raw)
}

// Atomic store through the local address, same width rules as the load.
pub(crate) fn store_atomic<T: AtomicElement>(ptr: *mut T, value: T) {
    let raw = value.to_raw();
    match T::BITS {
        16 => unsafe { AtomicU16::from_ptr(ptr.cast()) }.store(raw as u16, Ordering::SeqCst),
        32 => unsafe { AtomicU32::from_ptr(ptr.cast()) }.store(raw as u32, Ordering::SeqCst),
        _ => unsafe { AtomicU64::from_ptr(ptr.cast()) }.store(raw, Ordering::SeqCst),
    }
}

// Local fetch-add on a symmetric long, used by the collective engine to
// retire its own counters.
pub(crate) fn fetch_add_local(ptr: *mut i64, delta: i64) -> i64 {
    unsafe { AtomicI64::from_ptr(ptr) }.fetch_add(delta, Ordering::SeqCst)
}

fn eligible(status: Option<&[i32]>, index: usize) -> bool {
    status.map_or(true, |s| s[index] == 0)
}

impl Shoal {
    /// Blocks until `*ivar cmp value` holds.
    pub fn wait_until<T: AtomicElement>(&self, ivar: Sym<T>, cmp: CmpOp, value: T) -> Result<()> {
        self.ensure_active("wait_until");
        self.spin_until(|| cmp.satisfied(load_atomic(ivar.ptr()), value));
        Ok(())
    }

    /// One-shot evaluation of `*ivar cmp value`.
    pub fn test<T: AtomicElement>(&self, ivar: Sym<T>, cmp: CmpOp, value: T) -> Result<bool> {
        self.ensure_active("test");
        Ok(cmp.satisfied(load_atomic(ivar.ptr()), value))
    }

    /// Blocks until every unmasked variable satisfies the predicate.
    pub fn wait_until_all<T: AtomicElement>(
        &self,
        ivars: Sym<T>,
        status: Option<&[i32]>,
        cmp: CmpOp,
        value: T,
    ) -> Result<()> {
        self.ensure_active("wait_until_all");
        self.spin_until(|| {
            (0..ivars.len())
                .filter(|&i| eligible(status, i))
                .all(|i| cmp.satisfied(load_atomic(ivars.at(i).ptr()), value))
        });
        Ok(())
    }

    /// Blocks until some unmasked variable satisfies the predicate and
    /// returns its index; `usize::MAX` when every variable is masked out.
    pub fn wait_until_any<T: AtomicElement>(
        &self,
        ivars: Sym<T>,
        status: Option<&[i32]>,
        cmp: CmpOp,
        value: T,
    ) -> Result<usize> {
        self.ensure_active("wait_until_any");
        if (0..ivars.len()).all(|i| !eligible(status, i)) {
            return Ok(usize::MAX);
        }
        let mut found = 0;
        self.spin_until(|| {
            for i in (0..ivars.len()).filter(|&i| eligible(status, i)) {
                if cmp.satisfied(load_atomic(ivars.at(i).ptr()), value) {
                    found = i;
                    return true;
                }
            }
            false
        });
        Ok(found)
    }

    /// Blocks until at least one unmasked variable satisfies the predicate;
    /// fills `indices` with every satisfying index and returns the count.
    /// Returns zero when every variable is masked out.
    pub fn wait_until_some<T: AtomicElement>(
        &self,
        ivars: Sym<T>,
        status: Option<&[i32]>,
        indices: &mut [usize],
        cmp: CmpOp,
        value: T,
    ) -> Result<usize> {
        self.ensure_active("wait_until_some");
        if (0..ivars.len()).all(|i| !eligible(status, i)) {
            return Ok(0);
        }
        let mut count = 0;
        self.spin_until(|| {
            count = 0;
            for i in (0..ivars.len()).filter(|&i| eligible(status, i)) {
                if cmp.satisfied(load_atomic(ivars.at(i).ptr()), value) {
                    if count < indices.len() {
                        indices[count] = i;
                    }
                    count += 1;
                }
            }
            count > 0
        });
        Ok(count)
    }

    /// [`wait_until_all`](Shoal::wait_until_all) with one comparison value
    /// per variable.
    pub fn wait_until_all_vector<T: AtomicElement>(
        &self,
        ivars: Sym<T>,
        status: Option<&[i32]>,
        cmp: CmpOp,
        values: &[T],
    ) -> Result<()> {
        self.ensure_active("wait_until_all_vector");
        self.spin_until(|| {
            (0..ivars.len())
                .filter(|&i| eligible(status, i))
                .all(|i| cmp.satisfied(load_atomic(ivars.at(i).ptr()), values[i]))
        });
        Ok(())
    }

    /// [`wait_until_any`](Shoal::wait_until_any) with one comparison value
    /// per variable.
    pub fn wait_until_any_vector<T: AtomicElement>(
        &self,
        ivars: Sym<T>,
        status: Option<&[i32]>,
        cmp: CmpOp,
        values: &[T],
    ) -> Result<usize> {
        self.ensure_active("wait_until_any_vector");
        if (0..ivars.len()).all(|i| !eligible(status, i)) {
            return Ok(usize::MAX);
        }
        let mut found = 0;
        self.spin_until(|| {
            for i in (0..ivars.len()).filter(|&i| eligible(status, i)) {
                if cmp.satisfied(load_atomic(ivars.at(i).ptr()), values[i]) {
                    found = i;
                    return true;
                }
            }
            false
        });
        Ok(found)
    }

    /// [`wait_until_some`](Shoal::wait_until_some) with one comparison value
    /// per variable.
    pub fn wait_until_some_vector<T: AtomicElement>(
        &self,
        ivars: Sym<T>,
        status: Option<&[i32]>,
        indices: &mut [usize],
        cmp: CmpOp,
        values: &[T],
    ) -> Result<usize> {
        self.ensure_active("wait_until_some_vector");
        if (0..ivars.len()).all(|i| !eligible(status, i)) {
            return Ok(0);
        }
        let mut count = 0;
        self.spin_until(|| {
            count = 0;
            for i in (0..ivars.len()).filter(|&i| eligible(status, i)) {
                if cmp.satisfied(load_atomic(ivars.at(i).ptr()), values[i]) {
                    if count < indices.len() {
                        indices[count] = i;
                    }
                    count += 1;
                }
            }
            count > 0
        });
        Ok(count)
    }

    /// True when every unmasked variable satisfies the predicate.
    pub fn test_all<T: AtomicElement>(
        &self,
        ivars: Sym<T>,
        status: Option<&[i32]>,
        cmp: CmpOp,
        value: T,
    ) -> Result<bool> {
        self.ensure_active("test_all");
        Ok((0..ivars.len())
            .filter(|&i| eligible(status, i))
            .all(|i| cmp.satisfied(load_atomic(ivars.at(i).ptr()), value)))
    }

    /// Index of some satisfying unmasked variable, or `usize::MAX`.
    pub fn test_any<T: AtomicElement>(
        &self,
        ivars: Sym<T>,
        status: Option<&[i32]>,
        cmp: CmpOp,
        value: T,
    ) -> Result<usize> {
        self.ensure_active("test_any");
        Ok((0..ivars.len())
            .filter(|&i| eligible(status, i))
            .find(|&i| cmp.satisfied(load_atomic(ivars.at(i).ptr()), value))
            .unwrap_or(usize::MAX))
    }

    /// Count of satisfying unmasked variables; fills `indices`.
    pub fn test_some<T: AtomicElement>(
        &self,
        ivars: Sym<T>,
        status: Option<&[i32]>,
        indices: &mut [usize],
        cmp: CmpOp,
        value: T,
    ) -> Result<usize> {
        self.ensure_active("test_some");
        let mut count = 0;
        for i in (0..ivars.len()).filter(|&i| eligible(status, i)) {
            if cmp.satisfied(load_atomic(ivars.at(i).ptr()), value) {
                if count < indices.len() {
                    indices[count] = i;
                }
                count += 1;
            }
        }
        Ok(count)
    }

    /// [`test_all`](Shoal::test_all) with per-variable values.
    pub fn test_all_vector<T: AtomicElement>(
        &self,
        ivars: Sym<T>,
        status: Option<&[i32]>,
        cmp: CmpOp,
        values: &[T],
    ) -> Result<bool> {
        self.ensure_active("test_all_vector");
        Ok((0..ivars.len())
            .filter(|&i| eligible(status, i))
            .all(|i| cmp.satisfied(load_atomic(ivars.at(i).ptr()), values[i])))
    }

    /// [`test_any`](Shoal::test_any) with per-variable values.
    pub fn test_any_vector<T: AtomicElement>(
        &self,
        ivars: Sym<T>,
        status: Option<&[i32]>,
        cmp: CmpOp,
        values: &[T],
    ) -> Result<usize> {
        self.ensure_active("test_any_vector");
        Ok((0..ivars.len())
            .filter(|&i| eligible(status, i))
            .find(|&i| cmp.satisfied(load_atomic(ivars.at(i).ptr()), values[i]))
            .unwrap_or(usize::MAX))
    }

    /// [`test_some`](Shoal::test_some) with per-variable values.
    pub fn test_some_vector<T: AtomicElement>(
        &self,
        ivars: Sym<T>,
        status: Option<&[i32]>,
        indices: &mut [usize],
        cmp: CmpOp,
        values: &[T],
    ) -> Result<usize> {
        self.ensure_active("test_some_vector");
        let mut count = 0;
        for i in (0..ivars.len()).filter(|&i| eligible(status, i)) {
            if cmp.satisfied(load_atomic(ivars.at(i).ptr()), values[i]) {
                if count < indices.len() {
                    indices[count] = i;
                }
                count += 1;
            }
        }
        Ok(count)
    }

    /// Blocks until the signal word satisfies the predicate and returns the
    /// observed satisfying value.
    pub fn signal_wait_until(&self, sig: Sym<u64>, cmp: CmpOp, value: u64) -> Result<u64> {
        self.ensure_active("signal_wait_until");
        let mut observed = 0;
        self.spin_until(|| {
            observed = load_atomic(sig.ptr());
            cmp.satisfied(observed, value)
        });
        Ok(observed)
    }
}
