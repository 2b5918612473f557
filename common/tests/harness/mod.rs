//! Shared fixtures: an in-process cluster and small inline workloads that
//! exercise the claim protocol without any network.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use common::{
    deploy, partition_for, Cluster, Environment, Job, JobContext, Mapper, MemoryKv, MemoryStore,
    Reducer, Workload,
};
use tempfile::NamedTempFile;

/// A cluster backed by the in-memory KV and object stores. The store handle
/// is returned separately so tests can inspect the write log.
pub fn memory_cluster() -> (Cluster, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let env = Environment {
        s3_bucket: "testbucket".to_string(),
        ..Default::default()
    };
    let cluster = Cluster::new(Arc::new(MemoryKv::new()), store.clone(), env);
    (cluster, store)
}

/// Deploy a job whose "binary" is a throwaway script file.
pub async fn deploy_job(cluster: &Cluster, inputs: &[&str], partitions: u32) -> Job {
    let mut binary = NamedTempFile::new().unwrap();
    binary.write_all(b"#!/bin/sh\nexit 0\n").unwrap();
    binary.flush().unwrap();
    let job = Job {
        inputs: inputs.iter().map(|s| s.to_string()).collect(),
        partitions,
        ..Default::default()
    };
    deploy::deploy(cluster, job, binary.path()).await.unwrap()
}

/// Treats the input descriptor itself as the data: every whitespace word
/// becomes a `word\t1` line in the shard for `fnv(word) % partitions`.
pub struct InlineWordMap;

#[async_trait]
impl Mapper for InlineWordMap {
    async fn map(&self, input: &str, ctx: &JobContext) -> anyhow::Result<BTreeMap<u32, PathBuf>> {
        let partitions = ctx.job().partitions;
        let mut shards: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for word in input.split_whitespace() {
            shards
                .entry(partition_for(word.as_bytes(), partitions))
                .or_default()
                .push(word.to_string());
        }
        let mut paths = BTreeMap::new();
        for (partition, words) in shards {
            let (mut file, path) = NamedTempFile::new()?.keep()?;
            for word in words {
                writeln!(file, "{word}\t1")?;
            }
            paths.insert(partition, path);
        }
        Ok(paths)
    }
}

/// Like [`InlineWordMap`] but fails on any input containing `boom`.
pub struct FailingMap;

#[async_trait]
impl Mapper for FailingMap {
    async fn map(&self, input: &str, ctx: &JobContext) -> anyhow::Result<BTreeMap<u32, PathBuf>> {
        if input.contains("boom") {
            anyhow::bail!("synthetic map failure");
        }
        InlineWordMap.map(input, ctx).await
    }
}

/// Sums the `word\t<n>` lines of its shards and writes `word\tcount` lines
/// in sorted order.
pub struct CountReduce;

#[async_trait]
impl Reducer for CountReduce {
    async fn reduce(
        &self,
        inputs: &[String],
        _partition: u32,
        ctx: &JobContext,
    ) -> anyhow::Result<String> {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for key in inputs {
            let data = ctx.fetch_input(key).await?;
            for line in std::str::from_utf8(&data)?.lines() {
                let (word, n) = line.split_once('\t').unwrap();
                *counts.entry(word.to_string()).or_default() += n.parse::<u64>()?;
            }
        }
        let (mut file, path) = NamedTempFile::new()?.keep()?;
        for (word, count) in &counts {
            writeln!(file, "{word}\t{count}")?;
        }
        let key = ctx.upload_result(&path).await?;
        Ok(key)
    }
}

/// Concatenates its shard contents in the order the executor handed them
/// over, which must be ascending map-index order.
pub struct ConcatReduce;

#[async_trait]
impl Reducer for ConcatReduce {
    async fn reduce(
        &self,
        inputs: &[String],
        _partition: u32,
        ctx: &JobContext,
    ) -> anyhow::Result<String> {
        let (mut file, path) = NamedTempFile::new()?.keep()?;
        for key in inputs {
            file.write_all(&ctx.fetch_input(key).await?)?;
        }
        let key = ctx.upload_result(&path).await?;
        Ok(key)
    }
}

pub fn word_count_workload() -> Workload {
    Workload {
        mapper: Arc::new(InlineWordMap),
        reducer: Arc::new(CountReduce),
    }
}

pub fn failing_workload() -> Workload {
    Workload {
        mapper: Arc::new(FailingMap),
        reducer: Arc::new(CountReduce),
    }
}

pub fn concat_workload() -> Workload {
    Workload {
        mapper: Arc::new(InlineWordMap),
        reducer: Arc::new(ConcatReduce),
    }
}
