use std::path::{Path, PathBuf};

use common::{deploy, Cluster, Error, Job, JobStatus};

pub async fn submit(
    inputs: Vec<String>,
    partitions: u32,
    bucket: Option<String>,
    prefix: Option<String>,
    binary: PathBuf,
) -> anyhow::Result<()> {
    let cluster = Cluster::from_env().await?;
    let job = Job {
        inputs,
        partitions,
        s3_bucket: bucket.unwrap_or_default(),
        name_prefix: prefix.unwrap_or_default(),
        ..Default::default()
    };
    let job = deploy::deploy(&cluster, job, &binary).await?;
    println!("{}", job.name);
    Ok(())
}

pub async fn jobs() -> anyhow::Result<()> {
    let cluster = Cluster::from_env().await?;
    let jobs = cluster.catalog().list_jobs().await?;

    println!("{:<44} {:>12} {:>12} {:>12}  created", "name", "status", "maps", "reduces");
    for job in jobs {
        let map = job.map_progress.unwrap_or_default();
        let reduce = job.reduce_progress.unwrap_or_default();
        println!(
            "{:<44} {:>12} {:>7}/{:<4} {:>7}/{:<4}  {}",
            job.name,
            status_name(job.status),
            map.done,
            map.total,
            reduce.done,
            reduce.total,
            job.created_at.to_rfc3339(),
        );
    }
    Ok(())
}

pub async fn fetch(jobname: String, output: &Path) -> anyhow::Result<()> {
    let cluster = Cluster::from_env().await?;
    let catalog = cluster.catalog();
    let job = catalog.fetch_job(&jobname).await?;
    if job.status != JobStatus::Done {
        return Err(Error::NotDone { name: jobname }.into());
    }
    catalog.fetch_results(&job, output).await?;
    println!("results fetched: {}", output.display());
    Ok(())
}

fn status_name(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Initialized => "initialized",
        JobStatus::MapStage => "map",
        JobStatus::ReduceStage => "reduce",
        JobStatus::Failed => "failed",
        JobStatus::Done => "done",
    }
}
