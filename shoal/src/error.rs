//! Error kinds and the fatal sink.
//!
//! Entry points validate their arguments and return [`Error`] for the
//! conditions a caller can react to. Conditions the library cannot continue
//! past (calls before initialization, destroying a predefined team, a
//! transport failure, exhaustion of internal symmetric state) go through
//! [`Shoal::fatal`](crate::Shoal), which prints one diagnostic line on the
//! failing PE and asks the bootstrap to abort the whole job.

use shoal_communication::TransportError;
use thiserror::Error;

/// Everything that can go wrong at an API boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// An API call before `init` or after `finalize`.
    #[error("library is not initialized")]
    NotInitialized,

    /// A PE index outside the relevant team.
    #[error("PE {pe} outside a team of {npes} PEs")]
    PeOutOfRange {
        /// The index presented.
        pe: i64,
        /// Size of the team it was checked against.
        npes: usize,
    },

    /// A pointer that lies in no symmetric region on the caller.
    #[error("address {addr:#x} is not symmetric")]
    NotSymmetric {
        /// The offending local address.
        addr: u64,
    },

    /// An operation on a destroyed or uninitialized team handle.
    #[error("operation on an invalid team")]
    TeamInvalid,

    /// The caller is not a member of the team it is operating on.
    #[error("calling PE is not a member of the team")]
    TeamNotMember,

    /// An attempt to destroy `world`, `shared`, or `invalid`.
    #[error("predefined teams cannot be destroyed")]
    TeamDestroyPredefined,

    /// The selected algorithm's preconditions are unmet.
    #[error("algorithm {name} unsupported here: {reason}")]
    AlgorithmUnsupported {
        /// Algorithm name as registered.
        name: String,
        /// Which precondition failed.
        reason: String,
    },

    /// Collective source and destination buffers alias.
    #[error("source and destination buffers overlap")]
    BufferOverlap,

    /// Out of symmetric memory.
    #[error("symmetric allocation failed: {what}")]
    AllocFailure {
        /// What was being allocated.
        what: String,
    },

    /// The transport reported a non-success status.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// Authenticated decryption of an incoming payload failed. Reserved for
    /// transports that seal payloads; nothing in this crate constructs it.
    #[error("authenticated decryption tag mismatch")]
    CasTagMismatch,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

// Routes an unrecoverable condition through the fatal sink with the call
// site attached.
macro_rules! fatal {
    ($rt:expr, $func:expr, $($arg:tt)*) => {
        $rt.fatal(file!(), line!(), $func, &format!($($arg)*))
    };
}
pub(crate) use fatal;
