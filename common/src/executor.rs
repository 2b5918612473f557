//! The task executor: the algorithm every spawned user program runs.
//!
//! One invocation claims whatever map tasks are unowned, barriers on the
//! whole map stage, shuffles output keys into reducer input lists, claims
//! reduce tasks the same way, and finalises the job. Mutual exclusion comes
//! entirely from `create_dir` on the claim directory; a lost claim means
//! another worker owns that task and this executor moves on. Barriers read,
//! they never wait: an executor that finds an unfinished task fails the
//! invocation and leaves completion to whichever worker passes last.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::catalog::parse_partition;
use crate::codec;
use crate::error::{Error, Result};
use crate::job::{Job, JobKeys, JobStatus, TaskStatus, JOB_DATA_KEY};
use crate::kv::KvError;
use crate::logsink::LogSink;
use crate::store::ObjectStore;
use crate::Cluster;

/// A user map function. Consumes one input descriptor and returns, per
/// partition that received data, a local file of that partition's output
/// lines. Missing partitions are allowed; the executor uploads the files
/// and deletes them.
#[async_trait]
pub trait Mapper: Send + Sync {
    async fn map(&self, input: &str, ctx: &JobContext) -> anyhow::Result<BTreeMap<u32, PathBuf>>;
}

/// A user reduce function. Consumes every map output key for one partition
/// (ascending map-index order), downloads them with
/// [`JobContext::fetch_input`], and returns the object key it stored the
/// aggregated output under via [`JobContext::upload_result`].
#[async_trait]
pub trait Reducer: Send + Sync {
    async fn reduce(
        &self,
        inputs: &[String],
        partition: u32,
        ctx: &JobContext,
    ) -> anyhow::Result<String>;
}

/// The pair of user functions linked into a worker binary.
#[derive(Clone)]
pub struct Workload {
    pub mapper: Arc<dyn Mapper>,
    pub reducer: Arc<dyn Reducer>,
}

/// Everything a user function may touch: the job view, the object-store
/// helpers, and the log sink.
pub struct JobContext {
    job: Job,
    store: Arc<dyn ObjectStore>,
    log: LogSink,
}

impl JobContext {
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn log(&self) -> &LogSink {
        &self.log
    }

    /// Download a map shard and transparently decompress it.
    pub async fn fetch_input(&self, key: &str) -> Result<Bytes> {
        let data = self.store.get(&self.job.s3_bucket, key).await?;
        Ok(Bytes::from(codec::gunzip(&data)?))
    }

    /// Gzip and upload one map output shard; deletes the local file.
    pub async fn upload_map_shard(&self, path: &Path, partition: u32) -> Result<String> {
        let key = format!(
            "{}maps/{partition}-{}",
            self.job.s3_prefix,
            Uuid::new_v4()
        );
        self.upload_gz(path, key).await
    }

    /// Gzip and upload a final reduce output; deletes the local file.
    pub async fn upload_result(&self, path: &Path) -> Result<String> {
        let key = format!("{}results/{}", self.job.s3_prefix, Uuid::new_v4());
        self.upload_gz(path, key).await
    }

    async fn upload_gz(&self, path: &Path, key: String) -> Result<String> {
        let packed = Bytes::from(codec::gzip_file(path)?);
        self.store
            .put(&self.job.s3_bucket, &key, packed, "application/x-gzip")
            .await?;
        std::fs::remove_file(path)?;
        Ok(key)
    }
}

pub struct Executor {
    cluster: Cluster,
    workload: Workload,
}

impl Executor {
    pub fn new(cluster: Cluster, workload: Workload) -> Self {
        Self { cluster, workload }
    }

    /// Run one invocation against `job_name`. Returns `Ok` when the job is
    /// already done or this invocation carried it over the finish line;
    /// barrier misses and user failures surface as errors and terminate the
    /// spawned binary (the worker loop will poll the job again).
    pub async fn execute(&self, job_name: &str) -> Result<()> {
        let kv = &self.cluster.kv;
        let keys = JobKeys::new(job_name);

        let status = JobStatus::from_kv(&kv.get(&keys.status()).await?)?;
        if status == JobStatus::Done {
            tracing::info!(job = job_name, "job already done, nothing to do");
            return Ok(());
        }

        let bucket = kv.get(&keys.s3bucket()).await?;
        let prefix = kv.get(&keys.s3prefix()).await?;
        let data = self
            .cluster
            .store
            .get(&bucket, &format!("{prefix}{JOB_DATA_KEY}"))
            .await?;
        let job: Job = serde_json::from_slice(&data)?;

        let ctx = JobContext {
            store: self.cluster.store.clone(),
            log: self.cluster.env.log_sink(vec![job_name.to_string()]),
            job,
        };

        self.map_stage(&keys, &ctx).await?;
        let reduce_inputs = self.shuffle(&keys, &ctx).await?;
        self.reduce_stage(&keys, &ctx, &reduce_inputs).await?;

        // Finalise. Idempotent on purpose: several workers may cross the
        // finish line and any of them may set Done.
        kv.update(&keys.status(), &JobStatus::Done.as_kv()).await?;
        ctx.log.info("all tasks done");
        ctx.log.close().await;
        Ok(())
    }

    async fn map_stage(&self, keys: &JobKeys, ctx: &JobContext) -> Result<()> {
        let kv = &self.cluster.kv;
        for (i, input) in ctx.job.inputs.iter().enumerate() {
            match kv.create_dir(&keys.map_claim(i)).await {
                Ok(()) => {}
                Err(KvError::AlreadyExists(_)) => continue,
                Err(e) => return Err(e.into()),
            }
            ctx.log.info(format!("acquired map task {i}"));

            kv.update(&keys.status(), &JobStatus::MapStage.as_kv())
                .await?;
            kv.create(&keys.map_status(i), &TaskStatus::Initialized.as_kv())
                .await?;
            kv.create(&keys.map_input(i), input).await?;

            let shards = self
                .workload
                .mapper
                .map(input, ctx)
                .await
                .map_err(|source| Error::UserMap {
                    index: i,
                    input: input.clone(),
                    source,
                })?;

            // Upload every shard before its KV entry is written, so a key
            // under outputs/ always references an existing object.
            let mut outputs = BTreeMap::new();
            for (partition, path) in shards {
                let key = ctx.upload_map_shard(&path, partition).await?;
                outputs.insert(partition, key);
            }
            kv.create_dir(&keys.map_outputs_dir(i)).await?;
            for (partition, key) in &outputs {
                kv.create(&keys.map_output(i, *partition), key).await?;
            }

            kv.update(&keys.map_status(i), &TaskStatus::Done.as_kv())
                .await?;
            ctx.log.info(format!("map task {i} done"));
        }

        // Barrier: read, don't wait.
        for i in 0..ctx.job.inputs.len() {
            match kv.get(&keys.map_status(i)).await {
                Ok(value) if TaskStatus::from_kv(&value)? == TaskStatus::Done => {}
                Ok(_) => return Err(Error::MapNotReady { index: i }),
                Err(KvError::NotFound(_)) => return Err(Error::MapNotReady { index: i }),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Bucket every map output key by partition, ascending map-index order,
    /// and record how many partitions actually received data.
    async fn shuffle(
        &self,
        keys: &JobKeys,
        ctx: &JobContext,
    ) -> Result<BTreeMap<u32, Vec<String>>> {
        let kv = &self.cluster.kv;
        let mut reduce_inputs: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for i in 0..ctx.job.inputs.len() {
            for entry in kv
                .list(&keys.map_outputs_dir(i), true)
                .await?
                .iter()
                .filter(|e| !e.is_dir)
            {
                let partition = parse_partition(&entry.path)?;
                reduce_inputs
                    .entry(partition)
                    .or_default()
                    .push(entry.value.clone());
            }
        }
        kv.update(&keys.numreduces(), &reduce_inputs.len().to_string())
            .await?;
        Ok(reduce_inputs)
    }

    async fn reduce_stage(
        &self,
        keys: &JobKeys,
        ctx: &JobContext,
        reduce_inputs: &BTreeMap<u32, Vec<String>>,
    ) -> Result<()> {
        let kv = &self.cluster.kv;
        for (&partition, inputs) in reduce_inputs {
            match kv.create_dir(&keys.reduce_claim(partition)).await {
                Ok(()) => {}
                Err(KvError::AlreadyExists(_)) => continue,
                Err(e) => return Err(e.into()),
            }
            ctx.log.info(format!("acquired reduce task {partition}"));

            kv.update(&keys.status(), &JobStatus::ReduceStage.as_kv())
                .await?;
            kv.create(
                &keys.reduce_status(partition),
                &TaskStatus::Initialized.as_kv(),
            )
            .await?;

            let output = self
                .workload
                .reducer
                .reduce(inputs, partition, ctx)
                .await
                .map_err(|source| Error::UserReduce { partition, source })?;

            kv.create(&keys.result(partition), &output).await?;
            kv.update(&keys.reduce_status(partition), &TaskStatus::Done.as_kv())
                .await?;
            ctx.log.info(format!("reduce task {partition} done"));
        }

        for &partition in reduce_inputs.keys() {
            match kv.get(&keys.reduce_status(partition)).await {
                Ok(value) if TaskStatus::from_kv(&value)? == TaskStatus::Done => {}
                Ok(_) => return Err(Error::ReduceNotReady { partition }),
                Err(KvError::NotFound(_)) => return Err(Error::ReduceNotReady { partition }),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
