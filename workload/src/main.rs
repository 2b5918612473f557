//! The word-count executor binary. Workers spawn this with a job name as
//! its sole argument; the coordination protocol lives in the library, the
//! map/reduce functions live here.

use std::sync::Arc;

use anyhow::Context;
use common::{Cluster, Executor, Workload};
use workload::wordcount::{WordCountMap, WordCountReduce};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let job_name = std::env::args()
        .nth(1)
        .context("usage: wordcount <jobname>")?;

    let cluster = Cluster::from_env().await?;
    let executor = Executor::new(
        cluster,
        Workload {
            mapper: Arc::new(WordCountMap),
            reducer: Arc::new(WordCountReduce),
        },
    );
    executor.execute(&job_name).await?;
    Ok(())
}
