//! Word count over a list of input URLs.
//!
//! Map fetches one input, splits it into normalised words and writes
//! `word\t1` lines into one local file per partition, routed by the shared
//! FNV hash. Reduce merges its shard files and emits `word\tcount` lines in
//! sorted order.

use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use common::{partition_for, JobContext, Mapper, Reducer};
use tempfile::NamedTempFile;

pub struct WordCountMap;

pub struct WordCountReduce;

/// Lowercase and strip surrounding punctuation; empty means "not a word".
fn normalize(raw: &str) -> String {
    raw.trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

async fn fetch_text(input: &str) -> anyhow::Result<String> {
    if input.starts_with("http://") || input.starts_with("https://") {
        let text = reqwest::get(input)
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(text)
    } else {
        // local paths keep the workload testable without a web server
        Ok(tokio::fs::read_to_string(input).await?)
    }
}

#[async_trait]
impl Mapper for WordCountMap {
    async fn map(&self, input: &str, ctx: &JobContext) -> anyhow::Result<BTreeMap<u32, PathBuf>> {
        ctx.log().info(format!("mapping {input}"));
        let text = fetch_text(input).await?;
        let partitions = ctx.job().partitions;

        let mut writers: BTreeMap<u32, BufWriter<std::fs::File>> = BTreeMap::new();
        let mut paths: BTreeMap<u32, PathBuf> = BTreeMap::new();
        for raw in text.split_whitespace() {
            let word = normalize(raw);
            if word.is_empty() {
                continue;
            }
            let partition = partition_for(word.as_bytes(), partitions);
            if !writers.contains_key(&partition) {
                let (file, path) = NamedTempFile::new()?.keep()?;
                writers.insert(partition, BufWriter::new(file));
                paths.insert(partition, path);
            }
            writeln!(writers.get_mut(&partition).unwrap(), "{word}\t1")?;
        }
        for writer in writers.values_mut() {
            writer.flush()?;
        }
        Ok(paths)
    }
}

#[async_trait]
impl Reducer for WordCountReduce {
    async fn reduce(
        &self,
        inputs: &[String],
        partition: u32,
        ctx: &JobContext,
    ) -> anyhow::Result<String> {
        ctx.log()
            .info(format!("reducing partition {partition} from {} shards", inputs.len()));

        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for key in inputs {
            let data = ctx.fetch_input(key).await?;
            let text = std::str::from_utf8(&data).context("shard is not utf-8")?;
            for line in text.lines() {
                let (word, n) = line
                    .split_once('\t')
                    .with_context(|| format!("malformed shard line {line:?}"))?;
                *counts.entry(word.to_string()).or_default() += n.parse::<u64>()?;
            }
        }

        let (file, path) = NamedTempFile::new()?.keep()?;
        let mut writer = BufWriter::new(file);
        for (word, count) in &counts {
            writeln!(writer, "{word}\t{count}")?;
        }
        writer.flush()?;
        drop(writer);

        let key = ctx.upload_result(&path).await?;
        Ok(key)
    }
}
