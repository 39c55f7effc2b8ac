//! Entry points for standing up a whole job and running per-PE logic.

use std::sync::Arc;

use shoal_communication::{Config, PeGuards};

use crate::runtime::{Shoal, ThreadLevel};

/// Builds the fabric described by `config` and runs `func` once per PE,
/// each on its own thread with a fully initialized [`Shoal`] handle.
/// Finalization is implicit when the closure returns.
///
/// Returns the [`PeGuards`] for the PE threads; `join` to collect results.
///
/// # Examples
/// ```no_run
/// use shoal_communication::Config;
///
/// let guards = shoal::execute(Config::Process(4), |pe| {
///     println!("PE {} of {}", pe.my_pe(), pe.n_pes());
///     pe.barrier_all().unwrap();
///     pe.my_pe()
/// })
/// .unwrap();
/// for result in guards.join() {
///     println!("{:?}", result);
/// }
/// ```
pub fn execute<T, F>(config: Config, func: F) -> Result<PeGuards<T>, String>
where
    T: Send + 'static,
    F: Fn(&mut Shoal) -> T + Send + Sync + 'static,
{
    execute_thread(config, ThreadLevel::Single, func)
}

/// [`execute`] with an explicit thread-level request.
pub fn execute_thread<T, F>(config: Config, requested: ThreadLevel, func: F) -> Result<PeGuards<T>, String>
where
    T: Send + 'static,
    F: Fn(&mut Shoal) -> T + Send + Sync + 'static,
{
    shoal_communication::initialize(config, move |transport, bootstrap| {
        let (mut pe, _provided) = Shoal::start(Arc::new(transport), Box::new(bootstrap), requested)
            .unwrap_or_else(|e| panic!("PE failed to initialize: {}", e));
        let result = func(&mut pe);
        if pe.initialized() {
            pe.finalize();
        }
        result
    })
}

/// Parses the command line (`-n`/`--pes`) into a [`Config`] and calls
/// [`execute`]. The conventional `main` for a shoal program.
///
/// This method is only available if the `getopts` feature is enabled,
/// which it is by default.
#[cfg(feature = "getopts")]
pub fn execute_from_args<I, T, F>(args: I, func: F) -> Result<PeGuards<T>, String>
where
    I: Iterator<Item = String>,
    T: Send + 'static,
    F: Fn(&mut Shoal) -> T + Send + Sync + 'static,
{
    let mut opts = getopts_dep::Options::new();
    Config::install_options(&mut opts);
    let matches = opts.parse(args).map_err(|e| e.to_string())?;
    execute(Config::from_matches(&matches)?, func)
}
