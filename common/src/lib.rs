//! A masterless MapReduce coordination system.
//!
//! Users submit a compiled map/reduce program together with a list of input
//! URLs. Stateless workers discover pending jobs through a strongly
//! consistent key-value store, claim individual map and reduce tasks with
//! the store's atomic create-if-absent primitive, and exchange data through
//! an S3-compatible object store. No coordinator process exists; the KV
//! store is the only point of agreement.

use std::hash::Hasher;
use std::sync::Arc;

pub mod catalog;
pub mod codec;
pub mod deploy;
pub mod env;
pub mod error;
pub mod executor;
pub mod job;
pub mod kv;
pub mod logsink;
pub mod store;

pub use catalog::{Catalog, PendingJob};
pub use env::Environment;
pub use error::{Error, Result};
pub use executor::{Executor, JobContext, Mapper, Reducer, Workload};
pub use job::{Job, JobStatus, StageProgress, TaskStatus};
pub use kv::{EtcdKv, KvError, KvStore, MemoryKv};
pub use logsink::{LogLine, LogSink};
pub use store::{MemoryStore, ObjectStore, S3Store, StoreError};

/// Shared handles to the two external stores plus the process configuration.
///
/// Constructed once at startup and threaded explicitly through every
/// component; there is no global state.
#[derive(Clone)]
pub struct Cluster {
    pub kv: Arc<dyn KvStore>,
    pub store: Arc<dyn ObjectStore>,
    pub env: Environment,
}

impl Cluster {
    pub fn new(kv: Arc<dyn KvStore>, store: Arc<dyn ObjectStore>, env: Environment) -> Self {
        Self { kv, store, env }
    }

    /// Connect to etcd and S3 using the process environment.
    pub async fn from_env() -> Result<Self> {
        let env = Environment::from_env();
        let kv: Arc<dyn KvStore> = Arc::new(EtcdKv::connect(&env.etcd_servers).await?);
        let store: Arc<dyn ObjectStore> = Arc::new(S3Store::new(&env));
        Ok(Self { kv, store, env })
    }

    pub fn catalog(&self) -> Catalog {
        Catalog::new(self)
    }
}

/// Compute the reduce partition for an intermediate key by hashing it with
/// FNV-1a, the same stable hash on every worker.
pub fn partition_for(key: &[u8], partitions: u32) -> u32 {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(key);
    let value = (hasher.finish() & 0x7fffffff) as u32;
    value % partitions.max(1)
}
