//! Initialization logic for standing up a fabric and its PEs.

use std::thread;
use std::sync::Arc;
#[cfg(feature = "getopts")]
use getopts;

use crate::process::{ProcessBootstrap, ProcessPeerBuilder, ProcessTransport};

/// Possible configurations for the communication fabric.
#[derive(Clone, Debug)]
pub enum Config {
    /// One PE, no peers.
    Thread,
    /// One process hosting an indicated number of PEs as threads.
    Process(usize),
}

impl Config {
    /// Installs options into a [`getopts::Options`] struct that corresponds
    /// to the parameters in the configuration.
    ///
    /// It is the caller's responsibility to ensure that the installed options
    /// do not conflict with any other options that may exist in `opts`, or
    /// that may be installed into `opts` in the future.
    ///
    /// This method is only available if the `getopts` feature is enabled,
    /// which it is by default.
    #[cfg(feature = "getopts")]
    pub fn install_options(opts: &mut getopts::Options) {
        opts.optopt("n", "pes", "number of processing elements", "NUM");
    }

    /// Instantiates a configuration based upon the parsed options in `matches`.
    ///
    /// The `matches` object must have been constructed from a
    /// [`getopts::Options`] which contained at least the options installed by
    /// [`Self::install_options`].
    ///
    /// This method is only available if the `getopts` feature is enabled,
    /// which it is by default.
    #[cfg(feature = "getopts")]
    pub fn from_matches(matches: &getopts::Matches) -> Result<Config, String> {
        let npes = matches.opt_get_default("n", 1_usize).map_err(|e| e.to_string())?;
        if npes == 0 {
            return Err("-n: at least one PE is required".to_owned());
        }
        if npes > 1 {
            Ok(Config::Process(npes))
        } else {
            Ok(Config::Thread)
        }
    }

    /// Constructs a new configuration by parsing the supplied text arguments.
    ///
    /// Most commonly, callers supply `std::env::args()` as the iterator.
    ///
    /// This method is only available if the `getopts` feature is enabled,
    /// which it is by default.
    #[cfg(feature = "getopts")]
    pub fn from_args<I: Iterator<Item = String>>(args: I) -> Result<Config, String> {
        let mut opts = getopts::Options::new();
        Config::install_options(&mut opts);
        let matches = opts.parse(args).map_err(|e| e.to_string())?;
        Config::from_matches(&matches)
    }

    /// Attempts to assemble the described communication fabric.
    pub fn try_build(self) -> Result<Vec<ProcessPeerBuilder>, String> {
        match self {
            Config::Thread => Ok(ProcessPeerBuilder::new_vector(1)),
            Config::Process(npes) => {
                if npes == 0 {
                    return Err("a fabric needs at least one PE".to_owned());
                }
                Ok(ProcessPeerBuilder::new_vector(npes))
            }
        }
    }
}

/// Initializes a fabric and runs one instance of the supplied closure per PE.
///
/// This method builds the per-PE endpoints described by `config`, spawns one
/// thread per PE, and invokes the closure with that PE's transport and
/// bootstrap endpoints. The method returns a [`PeGuards<T>`] which can be
/// `join`ed to retrieve the return values (or errors) of the PEs.
///
/// # Examples
/// ```no_run
/// use shoal_communication::{Bootstrap, Config};
///
/// let config = Config::from_args(std::env::args()).unwrap();
/// let guards = shoal_communication::initialize(config, |_transport, bootstrap| {
///     println!("PE {} of {} started", bootstrap.rank(), bootstrap.nranks());
///     bootstrap.barrier();
///     bootstrap.rank()
/// });
///
/// if let Ok(guards) = guards {
///     for result in guards.join() {
///         println!("result: {:?}", result);
///     }
/// } else {
///     println!("error during initialization");
/// }
/// ```
pub fn initialize<T, F>(config: Config, func: F) -> Result<PeGuards<T>, String>
where
    T: Send + 'static,
    F: Fn(ProcessTransport, ProcessBootstrap) -> T + Send + Sync + 'static,
{
    let builders = config.try_build()?;
    initialize_from(builders, func)
}

/// Initializes a fabric from an explicit list of per-PE builders.
///
/// This version of `initialize` allows you to assemble the builders yourself,
/// which is how a launcher with its own placement logic would drive the
/// fabric.
pub fn initialize_from<T, F>(builders: Vec<ProcessPeerBuilder>, func: F) -> Result<PeGuards<T>, String>
where
    T: Send + 'static,
    F: Fn(ProcessTransport, ProcessBootstrap) -> T + Send + Sync + 'static,
{
    let logic = Arc::new(func);
    let mut guards = Vec::new();
    for (index, builder) in builders.into_iter().enumerate() {
        let clone = Arc::clone(&logic);
        guards.push(
            thread::Builder::new()
                .name(format!("shoal:pe-{}", index))
                .spawn(move || {
                    let (transport, bootstrap) = builder.build();
                    (*clone)(transport, bootstrap)
                })
                .map_err(|e| format!("{:?}", e))?,
        );
    }

    Ok(PeGuards { guards })
}

/// Maintains `JoinHandle`s for PE threads.
pub struct PeGuards<T: Send + 'static> {
    guards: Vec<thread::JoinHandle<T>>,
}

impl<T: Send + 'static> PeGuards<T> {
    /// Returns a reference to the indexed guard.
    pub fn guards(&self) -> &[thread::JoinHandle<T>] {
        &self.guards[..]
    }

    /// Waits on the PE threads and returns the results they produce.
    pub fn join(mut self) -> Vec<Result<T, String>> {
        self.guards
            .drain(..)
            .map(|guard| guard.join().map_err(|e| format!("{:?}", e)))
            .collect()
    }
}

impl<T: Send + 'static> Drop for PeGuards<T> {
    fn drop(&mut self) {
        for guard in self.guards.drain(..) {
            guard.join().expect("PE panic");
        }
    }
}
