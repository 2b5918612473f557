//! Stateless worker daemon. Polls the KV store for jobs that are not done,
//! makes sure each job's binary is in the local content-addressed cache,
//! and spawns it with the job name as its sole argument. The spawned
//! program carries the user's map/reduce functions and the whole claim
//! protocol; this loop only ferries binaries and child processes.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{codec, Catalog, Cluster, PendingJob};

const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cluster = Cluster::from_env().await?;
    let catalog = Catalog::new(&cluster);
    let cache_dir = std::env::temp_dir().join("gomrbin");

    info!(cache = %cache_dir.display(), "worker started");
    loop {
        match catalog.incomplete_jobs().await {
            Err(e) => error!("listing incomplete jobs failed: {e}"),
            Ok(jobs) if jobs.is_empty() => debug!("nothing to do"),
            Ok(jobs) => {
                for job in jobs {
                    if let Err(e) = run_job(&cluster, &cache_dir, &job).await {
                        error!(job = %job.name, "job run failed: {e:#}");
                    }
                }
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Spawn the job's executor binary and wait for it. A non-zero exit is an
/// event to log, not an error: the executor exits that way whenever another
/// worker still owns a task, and the next poll retries.
async fn run_job(cluster: &Cluster, cache_dir: &Path, job: &PendingJob) -> anyhow::Result<()> {
    let bin = ensure_binary(cluster, cache_dir, job).await?;
    info!(job = %job.name, bin = %bin.display(), "spawning executor");
    let status = tokio::process::Command::new(&bin)
        .arg(&job.name)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .with_context(|| format!("spawning {}", bin.display()))?;
    if !status.success() {
        warn!(job = %job.name, code = ?status.code(), "executor exited with failure");
    }
    Ok(())
}

/// Download and unpack the job's binary unless the cache already has it.
/// The cache key is the content digest, so it is append-only: nothing is
/// ever invalidated or deleted.
async fn ensure_binary(
    cluster: &Cluster,
    cache_dir: &Path,
    job: &PendingJob,
) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(cache_dir).await?;

    let digest = job
        .bin_key
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("malformed binary key {:?}", job.bin_key))?;
    let path = cache_dir.join(digest);
    if tokio::fs::try_exists(&path).await? {
        return Ok(path);
    }

    info!(key = %job.bin_key, "downloading binary");
    let packed = cluster.store.get(&job.bucket, &job.bin_key).await?;
    let raw = codec::gunzip(&packed)?;
    tokio::fs::write(&path, &raw).await?;

    let mut perms = tokio::fs::metadata(&path).await?.permissions();
    perms.set_mode(0o100);
    tokio::fs::set_permissions(&path, perms).await?;
    Ok(path)
}
