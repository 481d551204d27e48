//! Bialet's error taxonomy.
//!
//! Unlike a query-engine error type that must satisfy `Clone + Eq` for
//! memoization (see the salsa-compatible `Error` in some Rust tools), Bialet
//! has no incremental query system to appease, so each failure mode gets its
//! own `thiserror` variant with a normal `std::error::Error` source chain.
//!
//! This covers only the two failure modes that propagate as `Result` across
//! a module boundary (config parsing, database open); every other failure
//! Bialet reports (path safety, module resolution, query errors, script
//! compile/runtime errors) is handled locally with its own typed result
//! (`Resolution`, `LoadError`, a logged-and-empty `QueryBatch`) rather than
//! funneled through one catch-all, so there is nothing to add here for them.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, BialetError>;

#[derive(Debug, thiserror::Error)]
pub enum BialetError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to open database at '{path}'")]
    DbOpen {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A limited analogue of `anyhow!`, scoped to `BialetError::Config`.
#[macro_export]
macro_rules! config_error {
    ($fmt:expr $(, $arg:expr)* $(,)?) => {
        $crate::error::BialetError::Config(format!($fmt, $($arg),*))
    };
}
