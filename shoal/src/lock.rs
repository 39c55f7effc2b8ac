//! The distributed MCS lock.
//!
//! The lock object is one user-supplied symmetric long. Its low 32 bits on
//! the *owner* PE (chosen by hashing the address) hold the canonical
//! `{locked, tail}` word that acquisition CASes on; bytes 4..8 on every PE
//! serve as that PE's local queue node, a 16-bit handoff flag and a 16-bit
//! successor id written remotely by the PE linking in behind it.
//!
//! Acquisition swaps itself in as the tail. Coming from `RESET` the caller
//! owns the lock outright; otherwise it writes its id into the displaced
//! tail's successor field and spins on its own handoff flag. Release first
//! quiets the default context (the critical section's stores must be
//! visible before the next holder proceeds), then either CASes the owner
//! word back to `RESET` (it is still the tail) or hands off to the
//! successor it finds (or waits to find) in its local node.
//!
//! PE ids are stored plus-one so `0` can mean "none".

use crate::error::Result;
use crate::memory::Sym;
use crate::pt2pt::{load_atomic, store_atomic};
use crate::runtime::Shoal;

const RESET: u32 = 0;

// Byte offsets inside the lock long.
const NODE_LOCKED: u64 = 4;
const NODE_NEXT: u64 = 6;

fn pack(pe: usize) -> u32 {
    1 | (((pe + 1) as u32) << 16)
}

fn tail_of(word: u32) -> Option<usize> {
    let id = (word >> 16) & 0xFFFF;
    (id != 0).then(|| id as usize - 1)
}

impl Shoal {
    fn lock_owner(&self, lock: Sym<i64>) -> usize {
        let addr = lock.addr();
        if addr % 8 == 0 {
            ((addr >> 3) % self.n_pes() as u64) as usize
        } else {
            self.n_pes() - 1
        }
    }

    fn owner_word(lock: Sym<i64>) -> Sym<u32> {
        Sym::from_raw(lock.addr() as *mut u32, 1)
    }

    fn node_locked(lock: Sym<i64>) -> Sym<u16> {
        Sym::from_raw((lock.addr() + NODE_LOCKED) as *mut u16, 1)
    }

    fn node_next(lock: Sym<i64>) -> Sym<u16> {
        Sym::from_raw((lock.addr() + NODE_NEXT) as *mut u16, 1)
    }

    /// Acquires the lock, blocking until the caller holds it.
    pub fn set_lock(&self, lock: Sym<i64>) -> Result<()> {
        self.ensure_active("set_lock");
        let owner = self.lock_owner(lock);
        let me = self.my_pe();
        let desired = pack(me);

        // Swap ourselves in as the tail.
        let mut expected = RESET;
        let prior = loop {
            let observed = self.cswap_world(Self::owner_word(lock), expected, desired, owner)?;
            if observed == expected {
                break observed;
            }
            expected = observed;
        };

        match tail_of(prior) {
            None => {
                // Uncontended: the lock is ours.
                store_atomic(Self::node_locked(lock).ptr(), 1u16);
            }
            Some(predecessor) => {
                // Link behind the displaced tail, then spin for the handoff.
                self.put_world(Self::node_next(lock), &[(me + 1) as u16], predecessor)?;
                let flag = Self::node_locked(lock).ptr();
                self.spin_until(|| load_atomic::<u16>(flag) == 1);
            }
        }
        Ok(())
    }

    /// Releases the lock, handing it to the next waiter if one is queued.
    pub fn clear_lock(&self, lock: Sym<i64>) -> Result<()> {
        self.ensure_active("clear_lock");
        // The critical section's operations must be visible to the next
        // holder.
        self.quiet_default();

        let owner = self.lock_owner(lock);
        let me = self.my_pe();
        let next_ptr = Self::node_next(lock).ptr();

        let mut successor = load_atomic::<u16>(next_ptr);
        if successor == 0 {
            let prior = self.cswap_world(Self::owner_word(lock), pack(me), RESET, owner)?;
            if prior == pack(me) {
                store_atomic(Self::node_locked(lock).ptr(), 0u16);
                return Ok(());
            }
            // A contender is mid-link; wait for it to appear.
            self.spin_until(|| {
                successor = load_atomic::<u16>(next_ptr);
                successor != 0
            });
        }
        let succ = successor as usize - 1;
        store_atomic(next_ptr, 0u16);
        store_atomic(Self::node_locked(lock).ptr(), 0u16);
        self.put_world(Self::node_locked(lock), &[1u16], succ)?;
        Ok(())
    }

    /// Attempts the acquisition once. Returns `true` when the lock was
    /// taken (the caller must later [`clear_lock`](Shoal::clear_lock));
    /// `false` when it was already held.
    pub fn test_lock(&self, lock: Sym<i64>) -> Result<bool> {
        self.ensure_active("test_lock");
        let owner = self.lock_owner(lock);
        let prior = self.cswap_world(Self::owner_word(lock), RESET, pack(self.my_pe()), owner)?;
        if prior == RESET {
            store_atomic(Self::node_locked(lock).ptr(), 1u16);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
