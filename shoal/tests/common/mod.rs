//! Shared harness for the multi-PE suites.
//!
//! Algorithm selection is environment-driven and read during PE startup,
//! so every run holds a process-wide lock while its variables are set.
//! Each suite is its own test binary; within one binary the lock
//! serializes runs, across binaries the environments are independent.

use std::sync::{Mutex, OnceLock};

use shoal::{Config, Shoal};

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

#[allow(dead_code)]
pub fn run_with_env<T: Send + 'static>(
    npes: usize,
    vars: &[(&str, &str)],
    f: impl Fn(&mut Shoal) -> T + Send + Sync + 'static,
) -> Vec<T> {
    let results = run_raw(npes, vars, f);
    results.into_iter().map(|r| r.expect("PE panicked")).collect()
}

#[allow(dead_code)]
pub fn run(npes: usize, f: impl Fn(&mut Shoal) -> i32 + Send + Sync + 'static) -> Vec<i32> {
    run_with_env(npes, &[], f)
}

/// Like [`run_with_env`] but hands back per-PE results, panics included.
#[allow(dead_code)]
pub fn run_raw<T: Send + 'static>(
    npes: usize,
    vars: &[(&str, &str)],
    f: impl Fn(&mut Shoal) -> T + Send + Sync + 'static,
) -> Vec<Result<T, String>> {
    let _guard = env_lock().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let _ = env_logger::builder().is_test(true).try_init();
    for (key, value) in vars {
        std::env::set_var(key, value);
    }
    let guards = shoal::execute(Config::Process(npes), f).expect("fabric initializes");
    let results = guards.join();
    for (key, _) in vars {
        std::env::remove_var(key);
    }
    results
}
