//! Standard log lines for file operations of the pipeline stages.

use std::path::Path;
use std::time::Duration;

/// Log the start of a file or directory operation, e.g. `Writing output/flows.csv`
pub fn log_operation_start(operation: &str, path: &Path) {
    log::info!("{operation} {}", path.display());
}

/// Log a finished operation with its item count and, when measured, its duration
///
/// `operation` is a past-tense verb (`read`, `found`).
pub fn log_operation_complete(operation: &str, path: &Path, items: usize, elapsed: Option<Duration>) {
    match elapsed {
        Some(duration) => log::info!(
            "Successfully {operation} {items} items from {} in {duration:?}",
            path.display()
        ),
        None => log::info!("Successfully {operation} {items} items from {}", path.display()),
    }
}

/// Log a recoverable problem, optionally tied to a file
pub fn log_warning(message: &str, path: Option<&Path>) {
    match path {
        Some(path) => log::warn!("{message}: {}", path.display()),
        None => log::warn!("{message}"),
    }
}
