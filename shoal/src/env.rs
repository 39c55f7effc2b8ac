//! Environment-variable knobs.
//!
//! Everything tunable reads from `SHMEM_*` variables once, at
//! initialization. Algorithm selections are plain names resolved against
//! the collectives registry; an unknown name is fatal at startup rather
//! than at first use.

use std::collections::HashMap;
use std::env;

/// Default symmetric heap size when `SHMEM_SYMMETRIC_SIZE` is unset.
pub const DEFAULT_SYMMETRIC_SIZE: usize = 32 * 1024 * 1024;

/// Ceiling on simultaneously live teams; bounds the pSync pool.
const MAX_TEAMS_CEILING: usize = 62;

/// Parsed configuration, one per PE.
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// Bytes in the default symmetric heap (`SHMEM_SYMMETRIC_SIZE`).
    pub symmetric_size: usize,
    /// Contexts to create for the world team at startup
    /// (`SHMEM_PREALLOC_CONTEXTS`).
    pub prealloc_contexts: usize,
    /// Maximum simultaneously live teams (`SHMEM_MAX_TEAMS`).
    pub max_teams: usize,
    /// Arity of the complete-tree topologies (`SHMEM_BARRIER_TREE_DEGREE`).
    pub tree_degree: usize,
    /// Radix of the k-nomial topologies (`SHMEM_KNOMIAL_RADIX`).
    pub knomial_radix: usize,
    /// Rounds between barriers in barrier-flavor all-to-all
    /// (`SHMEM_ALLTOALL_ROUNDS_SYNC`). Affects pacing only, never output.
    pub alltoall_rounds_sync: usize,
    /// `SHMEM_DEBUG`: verbose diagnostics.
    pub debug: bool,
    /// `SHMEM_INFO`: print the effective configuration at PE 0.
    pub info: bool,
    /// `SHMEM_VERSION`: print the library version at PE 0.
    pub version: bool,

    /// `SHMEM_BARRIER_ALGORITHM`.
    pub barrier_algorithm: String,
    /// `SHMEM_BARRIER_ALL_ALGORITHM`.
    pub barrier_all_algorithm: String,
    /// `SHMEM_SYNC_ALGORITHM`.
    pub sync_algorithm: String,
    /// `SHMEM_SYNC_ALL_ALGORITHM`.
    pub sync_all_algorithm: String,
    /// `SHMEM_TEAM_SYNC_ALGORITHM`.
    pub team_sync_algorithm: String,
    /// `SHMEM_BROADCAST_ALGORITHM`.
    pub broadcast_algorithm: String,
    /// `SHMEM_COLLECT_ALGORITHM`.
    pub collect_algorithm: String,
    /// `SHMEM_FCOLLECT_ALGORITHM`.
    pub fcollect_algorithm: String,
    /// `SHMEM_ALLTOALL_ALGORITHM`.
    pub alltoall_algorithm: String,
    /// `SHMEM_ALLTOALLS_ALGORITHM`.
    pub alltoalls_algorithm: String,
    /// `SHMEM_REDUCE_ALGORITHM`, the default for every reduction op.
    pub reduce_algorithm: String,
    /// Per-op overrides, e.g. `SHMEM_SUM_REDUCE_ALGORITHM`; keyed by the
    /// lowercase op name.
    pub reduce_overrides: HashMap<String, String>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        EnvConfig {
            symmetric_size: DEFAULT_SYMMETRIC_SIZE,
            prealloc_contexts: 0,
            max_teams: 40,
            tree_degree: 2,
            knomial_radix: 2,
            alltoall_rounds_sync: 8,
            debug: false,
            info: false,
            version: false,
            barrier_algorithm: "binomial_tree".to_owned(),
            barrier_all_algorithm: "binomial_tree".to_owned(),
            sync_algorithm: "binomial_tree".to_owned(),
            sync_all_algorithm: "binomial_tree".to_owned(),
            team_sync_algorithm: "binomial_tree".to_owned(),
            broadcast_algorithm: "binomial_tree".to_owned(),
            collect_algorithm: "bruck".to_owned(),
            fcollect_algorithm: "bruck_inplace".to_owned(),
            alltoall_algorithm: "shift_exchange_barrier".to_owned(),
            alltoalls_algorithm: "shift_exchange_barrier".to_owned(),
            reduce_algorithm: "rec_dbl".to_owned(),
            reduce_overrides: HashMap::new(),
        }
    }
}

impl EnvConfig {
    /// Reads the process environment into a configuration.
    pub fn from_env() -> EnvConfig {
        let mut cfg = EnvConfig::default();
        if let Some(bytes) = var("SHMEM_SYMMETRIC_SIZE").and_then(|v| parse_size(&v)) {
            cfg.symmetric_size = bytes;
        }
        if let Some(n) = var_usize("SHMEM_PREALLOC_CONTEXTS") {
            cfg.prealloc_contexts = n;
        }
        if let Some(n) = var_usize("SHMEM_MAX_TEAMS") {
            cfg.max_teams = n.max(2);
        }
        cfg.max_teams = cfg.max_teams.min(MAX_TEAMS_CEILING);
        if let Some(n) = var_usize("SHMEM_BARRIER_TREE_DEGREE") {
            cfg.tree_degree = n.max(1);
        }
        if let Some(n) = var_usize("SHMEM_KNOMIAL_RADIX") {
            cfg.knomial_radix = n.max(2);
        }
        if let Some(n) = var_usize("SHMEM_ALLTOALL_ROUNDS_SYNC") {
            cfg.alltoall_rounds_sync = n.max(1);
        }
        cfg.debug = flag("SHMEM_DEBUG");
        cfg.info = flag("SHMEM_INFO");
        cfg.version = flag("SHMEM_VERSION");

        for (name, slot) in [
            ("SHMEM_BARRIER_ALGORITHM", &mut cfg.barrier_algorithm),
            ("SHMEM_BARRIER_ALL_ALGORITHM", &mut cfg.barrier_all_algorithm),
            ("SHMEM_SYNC_ALGORITHM", &mut cfg.sync_algorithm),
            ("SHMEM_SYNC_ALL_ALGORITHM", &mut cfg.sync_all_algorithm),
            ("SHMEM_TEAM_SYNC_ALGORITHM", &mut cfg.team_sync_algorithm),
            ("SHMEM_BROADCAST_ALGORITHM", &mut cfg.broadcast_algorithm),
            ("SHMEM_COLLECT_ALGORITHM", &mut cfg.collect_algorithm),
            ("SHMEM_FCOLLECT_ALGORITHM", &mut cfg.fcollect_algorithm),
            ("SHMEM_ALLTOALL_ALGORITHM", &mut cfg.alltoall_algorithm),
            ("SHMEM_ALLTOALLS_ALGORITHM", &mut cfg.alltoalls_algorithm),
            ("SHMEM_REDUCE_ALGORITHM", &mut cfg.reduce_algorithm),
        ] {
            if let Some(v) = var(name) {
                *slot = v;
            }
        }
        for op in ["and", "or", "xor", "min", "max", "sum", "prod"] {
            let key = format!("SHMEM_{}_REDUCE_ALGORITHM", op.to_uppercase());
            if let Some(v) = var(&key) {
                cfg.reduce_overrides.insert(op.to_owned(), v);
            }
        }
        cfg
    }

    /// The algorithm name selected for one reduction op.
    pub fn reduce_algorithm_for(&self, op: &str) -> &str {
        self.reduce_overrides.get(op).unwrap_or(&self.reduce_algorithm)
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn var_usize(name: &str) -> Option<usize> {
    var(name).and_then(|v| v.trim().parse().ok())
}

fn flag(name: &str) -> bool {
    var(name).map(|v| {
        let v = v.trim().to_ascii_lowercase();
        v != "0" && v != "no" && v != "false" && v != "off"
    }) == Some(true)
}

// Accepts plain byte counts and K/M/G suffixes, e.g. "64M".
fn parse_size(text: &str) -> Option<usize> {
    let text = text.trim();
    let (digits, shift) = match text.as_bytes().last()? {
        b'k' | b'K' => (&text[..text.len() - 1], 10),
        b'm' | b'M' => (&text[..text.len() - 1], 20),
        b'g' | b'G' => (&text[..text.len() - 1], 30),
        _ => (text, 0),
    };
    let n: usize = digits.trim().parse().ok()?;
    n.checked_mul(1usize << shift).filter(|&b| b > 0)
}
