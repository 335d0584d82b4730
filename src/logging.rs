//! Logger setup for programs embedding recipebuild.
//!
//! The library itself only uses the `log` facade.

use log::LevelFilter;

/// Map a `-v` count to a level filter. `quiet` wins over verbosity.
pub fn level_for(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install `env_logger` at the level for `verbosity`.
///
/// Panics if a logger is already installed; see [`try_init`].
pub fn init(verbosity: u8, quiet: bool) {
    builder(verbosity, quiet).init();
}

/// Like [`init`], but returns an error if a logger is already installed.
pub fn try_init(verbosity: u8, quiet: bool) -> Result<(), log::SetLoggerError> {
    builder(verbosity, quiet).try_init()
}

fn builder(verbosity: u8, quiet: bool) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level_for(verbosity, quiet))
        .format_timestamp(None);
    builder
}
