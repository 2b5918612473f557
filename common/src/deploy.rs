//! Submission: content-address and upload the user binary, persist the job
//! document, then seed the coordination tree. Each step must succeed before
//! the next; the durable JSON lands in the object store before any KV key
//! exists, so a job visible under `/gomr` always has its document.

use std::path::Path;

use bytes::Bytes;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::codec;
use crate::error::Result;
use crate::job::{Job, JobStatus, JOB_DATA_KEY};
use crate::Cluster;

/// Deploy `job`, returning it with `name`, `binary`, timestamps and
/// locations filled in. The caller keeps only `inputs`, `partitions` and
/// optionally `name_prefix`, `s3_bucket`, `s3_prefix` and `params`.
pub async fn deploy(cluster: &Cluster, mut job: Job, binary: &Path) -> Result<Job> {
    let prefix = if job.name_prefix.is_empty() {
        String::new()
    } else {
        format!("{}-", job.name_prefix)
    };
    job.name = format!("{prefix}{}", Uuid::new_v4());

    job.binary = codec::sha256_file(binary)?;
    if job.s3_bucket.is_empty() {
        job.s3_bucket = cluster.env.s3_bucket.clone();
    }

    // Content-addressed: a byte-identical binary is uploaded at most once.
    let bin_key = format!("bin/{}", job.binary);
    let packed = Bytes::from(codec::gzip_file(binary)?);
    let uploaded = cluster
        .store
        .put_if_absent(&job.s3_bucket, &bin_key, packed, "application/x-gzip")
        .await?;
    if uploaded {
        info!(key = %bin_key, "uploaded job binary");
    }

    job.created_at = Utc::now();
    job.num_maps = job.inputs.len();
    job.status = JobStatus::Initialized;
    job.s3_prefix = format!(
        "{}/{}/",
        job.s3_prefix.trim_end_matches('/'),
        job.name
    );

    let document = Bytes::from(serde_json::to_vec(&job)?);
    cluster
        .store
        .put(
            &job.s3_bucket,
            &format!("{}{JOB_DATA_KEY}", job.s3_prefix),
            document,
            "application/json",
        )
        .await?;

    let kv = &cluster.kv;
    let keys = job.keys();
    // Name collision (one in 2^122) surfaces here as AlreadyExists.
    kv.create_dir(&keys.root()).await?;
    kv.create(&keys.status(), &job.status.as_kv()).await?;
    kv.create(&keys.bin(), &bin_key).await?;
    kv.create(&keys.s3bucket(), &job.s3_bucket).await?;
    kv.create(&keys.s3prefix(), &job.s3_prefix).await?;
    kv.create(&keys.createdat(), &job.created_at.to_rfc3339())
        .await?;
    kv.create(&keys.nummaps(), &job.num_maps.to_string()).await?;
    kv.create(&keys.numreduces(), "0").await?;
    kv.create_dir(&keys.map_dir()).await?;
    kv.create_dir(&keys.reduce_dir()).await?;
    kv.create_dir(&keys.results_dir()).await?;

    info!(job = %job.name, maps = job.num_maps, "job deployed");
    Ok(job)
}
