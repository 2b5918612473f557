//! Read side of the coordination tree: enumerate jobs, materialise a job
//! view from KV plus object store, aggregate per-stage progress, and
//! download finished results.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::codec;
use crate::error::{Error, Result};
use crate::job::{Job, JobKeys, JobStatus, StageProgress, KV_ROOT, JOB_DATA_KEY};
use crate::kv::{KvError, KvStore};
use crate::store::ObjectStore;
use crate::Cluster;

/// An unfinished job as seen by the worker loop: just enough to locate and
/// run its binary.
#[derive(Debug, Clone)]
pub struct PendingJob {
    pub name: String,
    pub bin_key: String,
    pub bucket: String,
}

pub struct Catalog {
    kv: Arc<dyn KvStore>,
    store: Arc<dyn ObjectStore>,
}

impl Catalog {
    pub fn new(cluster: &Cluster) -> Self {
        Self {
            kv: cluster.kv.clone(),
            store: cluster.store.clone(),
        }
    }

    /// All jobs, newest first. Only KV state is read; the durable JSON in
    /// the object store is left alone, so entries carry status and progress
    /// but no inputs.
    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        let entries = match self.kv.list(KV_ROOT, false).await {
            Ok(entries) => entries,
            Err(KvError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut jobs = Vec::new();
        for entry in entries.iter().filter(|e| e.is_dir) {
            let name = last_segment(&entry.path);
            let mut job = Job::named(name);
            self.update_status(&mut job).await?;
            jobs.push(job);
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    /// Load the full job: durable JSON from the object store overlaid with
    /// current status and progress from KV.
    pub async fn fetch_job(&self, name: &str) -> Result<Job> {
        let keys = JobKeys::new(name);
        let bucket = self.kv.get(&keys.s3bucket()).await?;
        let prefix = self.kv.get(&keys.s3prefix()).await?;
        let data = self
            .store
            .get(&bucket, &format!("{prefix}{JOB_DATA_KEY}"))
            .await?;
        let mut job: Job = serde_json::from_slice(&data)?;
        self.update_status(&mut job).await?;
        Ok(job)
    }

    /// Overlay live KV state onto `job`: status, counters, creation time,
    /// both progress records, and result keys once the job is done.
    pub async fn update_status(&self, job: &mut Job) -> Result<()> {
        let keys = job.keys();
        job.status = JobStatus::from_kv(&self.kv.get(&keys.status()).await?)?;
        job.num_maps = parse_count(&keys.nummaps(), &self.kv.get(&keys.nummaps()).await?)?;
        job.num_reduces =
            parse_count(&keys.numreduces(), &self.kv.get(&keys.numreduces()).await?)?;

        let map_dir = keys.map_dir();
        let entries = self.kv.list(&map_dir, true).await?;
        job.map_progress = Some(StageProgress::tally(job.num_maps, &map_dir, &entries)?);

        let reduce_dir = keys.reduce_dir();
        let entries = self.kv.list(&reduce_dir, true).await?;
        job.reduce_progress = Some(StageProgress::tally(
            job.num_reduces,
            &reduce_dir,
            &entries,
        )?);

        let createdat = self.kv.get(&keys.createdat()).await?;
        job.created_at = createdat
            .parse::<DateTime<Utc>>()
            .map_err(|e| Error::BadEntry {
                path: keys.createdat(),
                reason: e.to_string(),
            })?;

        if job.status == JobStatus::Done {
            let mut results: Vec<(u32, String)> = Vec::new();
            for entry in self
                .kv
                .list(&keys.results_dir(), true)
                .await?
                .iter()
                .filter(|e| !e.is_dir)
            {
                let partition = parse_partition(&entry.path)?;
                results.push((partition, entry.value.clone()));
            }
            results.sort_by_key(|(partition, _)| *partition);
            job.results = results.into_iter().map(|(_, key)| key).collect();
        }
        Ok(())
    }

    /// Concatenate the decompressed reduce outputs, ascending partition
    /// order, into `out`.
    pub async fn fetch_results(&self, job: &Job, out: &Path) -> Result<()> {
        let mut file = File::create(out)?;
        for key in &job.results {
            debug!(key, "fetching result object");
            let data = self.store.get(&job.s3_bucket, key).await?;
            file.write_all(&codec::gunzip(&data)?)?;
        }
        Ok(())
    }

    /// Jobs whose status is not `Done`, for the worker loop to run.
    pub async fn incomplete_jobs(&self) -> Result<Vec<PendingJob>> {
        let entries = match self.kv.list(KV_ROOT, false).await {
            Ok(entries) => entries,
            Err(KvError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut pending = Vec::new();
        for entry in entries.iter().filter(|e| e.is_dir) {
            let name = last_segment(&entry.path);
            let keys = JobKeys::new(name);
            let status = JobStatus::from_kv(&self.kv.get(&keys.status()).await?)?;
            if status == JobStatus::Done {
                continue;
            }
            pending.push(PendingJob {
                name: name.to_string(),
                bin_key: self.kv.get(&keys.bin()).await?,
                bucket: self.kv.get(&keys.s3bucket()).await?,
            });
        }
        Ok(pending)
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn parse_count(path: &str, value: &str) -> Result<usize> {
    value.trim().parse().map_err(|_| Error::BadEntry {
        path: path.to_string(),
        reason: format!("expected a count, got {value:?}"),
    })
}

pub(crate) fn parse_partition(path: &str) -> Result<u32> {
    last_segment(path).parse().map_err(|_| Error::BadEntry {
        path: path.to_string(),
        reason: "expected a partition id".to_string(),
    })
}
