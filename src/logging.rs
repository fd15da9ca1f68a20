use std::fs::File;
use std::panic::{set_hook, take_hook};
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use tracing::error;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Maps the number of `-v` flags to a default log level. `RUST_LOG`, if set,
/// takes precedence.
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Where the global subscriber writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSink {
    Stderr,
    File,
}

/// Installs the global subscriber, logging to `log_file` if given and to
/// stderr otherwise.
pub fn init_logging(verbosity: u8, log_file: Option<&Path>) -> anyhow::Result<LogSink> {
    let filter = EnvFilter::builder()
        .with_default_directive(level_for(verbosity).into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let (sink, result) = match log_file {
        Some(path) => {
            let writer = File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            let result = builder
                .with_writer(Mutex::new(writer))
                .with_ansi(false)
                .try_init();
            (LogSink::File, result)
        }
        None => (LogSink::Stderr, builder.with_writer(std::io::stderr).try_init()),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {e}"))?;

    let default_hook = take_hook();
    set_hook(Box::new(move |p| {
        error!("{p}");
        default_hook(p);
    }));

    Ok(sink)
}

#[cfg(test)]
mod tests {
    use super::level_for;
    use test_case::test_case;
    use tracing::level_filters::LevelFilter;

    #[test_case(0, LevelFilter::INFO)]
    #[test_case(1, LevelFilter::DEBUG)]
    #[test_case(2, LevelFilter::TRACE)]
    #[test_case(9, LevelFilter::TRACE; "saturates")]
    fn verbosity_levels(verbosity: u8, expected: LevelFilter) {
        assert_eq!(level_for(verbosity), expected);
    }
}
