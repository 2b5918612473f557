use thiserror::Error;

use crate::kv::KvError;
use crate::store::StoreError;

/// Errors surfaced by the coordination core.
///
/// Every variant is fatal for the current invocation: the executor
/// propagates the first error to the spawned binary, which exits, and the
/// worker loop picks the job up again on a later poll. Losing a claim
/// (`KvError::AlreadyExists`) is normal control flow and never reaches this
/// type.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Kv(#[from] KvError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A status key held something other than a known encoding.
    #[error("invalid status value: {0}")]
    BadStatus(String),

    /// A KV entry could not be interpreted under the job key schema.
    #[error("malformed kv entry at {path}: {reason}")]
    BadEntry { path: String, reason: String },

    /// The post-map barrier found a task that is not `Done`. Another worker
    /// still owns it; this invocation has nothing left to do.
    #[error("map task {index} is not finished")]
    MapNotReady { index: usize },

    /// The post-reduce barrier found a task that is not `Done`.
    #[error("reduce task {partition} is not finished")]
    ReduceNotReady { partition: u32 },

    /// The user map function failed. The claimed task stays `Initialized`.
    #[error("map function failed on input {index} ({input}): {source}")]
    UserMap {
        index: usize,
        input: String,
        #[source]
        source: anyhow::Error,
    },

    /// The user reduce function failed. The claimed task stays `Initialized`.
    #[error("reduce function failed for partition {partition}: {source}")]
    UserReduce {
        partition: u32,
        #[source]
        source: anyhow::Error,
    },

    /// Results were requested for a job that has not reached `Done`.
    #[error("job {name} is not finished")]
    NotDone { name: String },
}

pub type Result<T> = std::result::Result<T, Error>;
