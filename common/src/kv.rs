//! Typed façade over a hierarchical, strongly consistent key-value store.
//!
//! `create`/`create_dir` is the only synchronisation primitive the core
//! relies on: it fails with [`KvError::AlreadyExists`] when the path is
//! taken, which gives distributed mutual exclusion over task claims. The
//! etcd backend implements it as a v3 transaction guarded on
//! `create_revision == 0`; directories are marker keys with a trailing `/`
//! enumerated by prefix scan.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, GetOptions, Txn, TxnOp};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("key not found: {0}")]
    NotFound(String),

    /// The path was already created by someone else. Expected on task
    /// claims; normal control flow, not a failure.
    #[error("key already exists: {0}")]
    AlreadyExists(String),

    #[error("kv transport: {0}")]
    Transport(String),
}

/// One node under a listed path. Directory entries carry an empty value and
/// a path without the trailing slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub path: String,
    pub value: String,
    pub is_dir: bool,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<String, KvError>;

    /// List entries under `path`, sorted by path. With `recursive` the whole
    /// subtree is returned, otherwise only direct children. Fails with
    /// `NotFound` when the directory itself does not exist.
    async fn list(&self, path: &str, recursive: bool) -> Result<Vec<KvEntry>, KvError>;

    /// Atomically create a value key. Linearizable across all workers.
    async fn create(&self, path: &str, value: &str) -> Result<(), KvError>;

    /// Atomically create a directory key; the claim primitive.
    async fn create_dir(&self, path: &str) -> Result<(), KvError>;

    /// Unconditional overwrite. Only used for `status` fields and counters,
    /// never for claim directories.
    async fn update(&self, path: &str, value: &str) -> Result<(), KvError>;
}

fn normalize(path: &str) -> &str {
    path.trim_end_matches('/')
}

/// Keep only entries that are direct children of `prefix` (which must end
/// with `/`).
fn direct_children(prefix: &str, entries: Vec<KvEntry>) -> Vec<KvEntry> {
    entries
        .into_iter()
        .filter(|entry| {
            entry
                .path
                .strip_prefix(prefix)
                .map_or(false, |rest| !rest.contains('/'))
        })
        .collect()
}

/////////////////////////////////////////////////////////////////////////////
// etcd backend
/////////////////////////////////////////////////////////////////////////////

#[derive(Clone)]
pub struct EtcdKv {
    client: Client,
}

impl EtcdKv {
    pub async fn connect(endpoints: &[String]) -> Result<Self, KvError> {
        let client = Client::connect(endpoints, None)
            .await
            .map_err(|e| KvError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    /// Put `key` only if it has never been created.
    async fn create_key(&self, key: &str) -> Result<(), KvError> {
        self.create_key_value(key, "").await
    }

    async fn create_key_value(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut client = self.client.clone();
        let txn = Txn::new()
            .when(vec![Compare::create_revision(key, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(key, value, None)]);
        let resp = client
            .txn(txn)
            .await
            .map_err(|e| KvError::Transport(e.to_string()))?;
        if resp.succeeded() {
            Ok(())
        } else {
            Err(KvError::AlreadyExists(key.to_string()))
        }
    }
}

#[async_trait]
impl KvStore for EtcdKv {
    async fn get(&self, path: &str) -> Result<String, KvError> {
        let mut client = self.client.clone();
        let resp = client
            .get(path, None)
            .await
            .map_err(|e| KvError::Transport(e.to_string()))?;
        match resp.kvs().first() {
            Some(kv) => kv
                .value_str()
                .map(str::to_string)
                .map_err(|e| KvError::Transport(e.to_string())),
            None => Err(KvError::NotFound(path.to_string())),
        }
    }

    async fn list(&self, path: &str, recursive: bool) -> Result<Vec<KvEntry>, KvError> {
        let prefix = format!("{}/", normalize(path));
        let mut client = self.client.clone();
        let resp = client
            .get(prefix.as_str(), Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| KvError::Transport(e.to_string()))?;

        if resp.kvs().is_empty() {
            return Err(KvError::NotFound(path.to_string()));
        }

        let mut entries = Vec::new();
        for kv in resp.kvs() {
            let key = kv.key_str().map_err(|e| KvError::Transport(e.to_string()))?;
            if key == prefix {
                // the listed directory's own marker
                continue;
            }
            if let Some(dir) = key.strip_suffix('/') {
                entries.push(KvEntry {
                    path: dir.to_string(),
                    value: String::new(),
                    is_dir: true,
                });
            } else {
                let value = kv
                    .value_str()
                    .map_err(|e| KvError::Transport(e.to_string()))?;
                entries.push(KvEntry {
                    path: key.to_string(),
                    value: value.to_string(),
                    is_dir: false,
                });
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        if recursive {
            Ok(entries)
        } else {
            Ok(direct_children(&prefix, entries))
        }
    }

    async fn create(&self, path: &str, value: &str) -> Result<(), KvError> {
        self.create_key_value(normalize(path), value).await
    }

    async fn create_dir(&self, path: &str) -> Result<(), KvError> {
        self.create_key(&format!("{}/", normalize(path))).await
    }

    async fn update(&self, path: &str, value: &str) -> Result<(), KvError> {
        let mut client = self.client.clone();
        client
            .put(normalize(path), value, None)
            .await
            .map_err(|e| KvError::Transport(e.to_string()))?;
        Ok(())
    }
}

/////////////////////////////////////////////////////////////////////////////
// in-memory backend
/////////////////////////////////////////////////////////////////////////////

/// In-process backend with the same linearizable-create semantics, used by
/// the test suite and for local single-machine runs.
#[derive(Default)]
pub struct MemoryKv {
    inner: Mutex<MemoryKvInner>,
}

#[derive(Default)]
struct MemoryKvInner {
    values: BTreeMap<String, String>,
    dirs: BTreeSet<String>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, path: &str) -> Result<String, KvError> {
        let inner = self.inner.lock().unwrap();
        inner
            .values
            .get(normalize(path))
            .cloned()
            .ok_or_else(|| KvError::NotFound(path.to_string()))
    }

    async fn list(&self, path: &str, recursive: bool) -> Result<Vec<KvEntry>, KvError> {
        let dir = normalize(path).to_string();
        let prefix = format!("{dir}/");
        let inner = self.inner.lock().unwrap();

        let mut entries = Vec::new();
        for sub in inner.dirs.range(prefix.clone()..) {
            if !sub.starts_with(&prefix) {
                break;
            }
            entries.push(KvEntry {
                path: sub.clone(),
                value: String::new(),
                is_dir: true,
            });
        }
        for (key, value) in inner.values.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            entries.push(KvEntry {
                path: key.clone(),
                value: value.clone(),
                is_dir: false,
            });
        }
        // a directory exists if it was created explicitly or has children,
        // matching the etcd backend's prefix-scan semantics
        if entries.is_empty() && !inner.dirs.contains(&dir) {
            return Err(KvError::NotFound(path.to_string()));
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        if recursive {
            Ok(entries)
        } else {
            Ok(direct_children(&prefix, entries))
        }
    }

    async fn create(&self, path: &str, value: &str) -> Result<(), KvError> {
        let key = normalize(path).to_string();
        let mut inner = self.inner.lock().unwrap();
        if inner.values.contains_key(&key) || inner.dirs.contains(&key) {
            return Err(KvError::AlreadyExists(key));
        }
        inner.values.insert(key, value.to_string());
        Ok(())
    }

    async fn create_dir(&self, path: &str) -> Result<(), KvError> {
        let key = normalize(path).to_string();
        let mut inner = self.inner.lock().unwrap();
        if inner.values.contains_key(&key) || inner.dirs.contains(&key) {
            return Err(KvError::AlreadyExists(key));
        }
        inner.dirs.insert(key);
        Ok(())
    }

    async fn update(&self, path: &str, value: &str) -> Result<(), KvError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .values
            .insert(normalize(path).to_string(), value.to_string());
        Ok(())
    }
}
