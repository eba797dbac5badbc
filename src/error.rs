//! # Error types
//!
//! The scheduling core treats almost every unexpected condition as either
//! a programmer error (panic/assert) or a performance anomaly (log and
//! damp statistics, see [`crate::task`]). `SchedError` covers the small
//! set of conditions that are genuinely recoverable at the boundary:
//! setting thread affinity, reserving cores via cgroups, and the
//! `init`/`finish` lifecycle hooks inherited from the source's `IService`
//! contract.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedError {
    #[error("failed to set CPU affinity to core {core}: {source}")]
    Affinity {
        core: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("cgroups core reservation failed at {path}: {source}")]
    Cgroups {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("lifecycle hook failed: {0}")]
    Lifecycle(String),
}

pub type Result<T> = std::result::Result<T, SchedError>;
