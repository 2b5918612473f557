//! The job data model: durable JSON form, status encodings, the KV key
//! schema and per-stage progress aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::kv::KvEntry;

/// Root of the coordination tree in the KV store.
pub const KV_ROOT: &str = "/gomr";

/// Name of the durable job document inside the job's object-store prefix.
pub const JOB_DATA_KEY: &str = "jobdata.json";

/// Lifecycle of a job. `Failed` and `Done` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum JobStatus {
    Initialized,
    MapStage,
    ReduceStage,
    Failed,
    Done,
}

/// Progress of one map or reduce task. Shares the integer encodings of
/// [`JobStatus`] but is deliberately a distinct type: a task has no stage
/// transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TaskStatus {
    Initialized,
    Failed,
    Done,
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus::Initialized
    }
}

impl From<JobStatus> for u8 {
    fn from(status: JobStatus) -> u8 {
        match status {
            JobStatus::Initialized => 0,
            JobStatus::MapStage => 1,
            JobStatus::ReduceStage => 2,
            JobStatus::Failed => 3,
            JobStatus::Done => 4,
        }
    }
}

impl TryFrom<u8> for JobStatus {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(JobStatus::Initialized),
            1 => Ok(JobStatus::MapStage),
            2 => Ok(JobStatus::ReduceStage),
            3 => Ok(JobStatus::Failed),
            4 => Ok(JobStatus::Done),
            other => Err(Error::BadStatus(other.to_string())),
        }
    }
}

impl From<TaskStatus> for u8 {
    fn from(status: TaskStatus) -> u8 {
        match status {
            TaskStatus::Initialized => 0,
            TaskStatus::Failed => 3,
            TaskStatus::Done => 4,
        }
    }
}

impl TryFrom<u8> for TaskStatus {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(TaskStatus::Initialized),
            3 => Ok(TaskStatus::Failed),
            4 => Ok(TaskStatus::Done),
            other => Err(Error::BadStatus(other.to_string())),
        }
    }
}

fn parse_status_int(s: &str) -> Result<u8> {
    s.trim()
        .parse::<u8>()
        .map_err(|_| Error::BadStatus(s.to_string()))
}

impl JobStatus {
    pub fn from_kv(s: &str) -> Result<Self> {
        parse_status_int(s)?.try_into()
    }

    pub fn as_kv(self) -> String {
        u8::from(self).to_string()
    }
}

impl TaskStatus {
    pub fn from_kv(s: &str) -> Result<Self> {
        parse_status_int(s)?.try_into()
    }

    pub fn as_kv(self) -> String {
        u8::from(self).to_string()
    }
}

/// Task counts for one stage, derived from a scan of the stage's KV
/// directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProgress {
    /// Total tasks for this stage.
    pub total: usize,
    /// Tasks nobody has claimed yet.
    pub waiting: usize,
    /// Tasks claimed and in flight. A claim directory without a status
    /// child counts here: once a claim is taken the task is definitionally
    /// not waiting.
    pub running: usize,
    pub done: usize,
    pub failed: usize,
}

impl StageProgress {
    /// Tally a recursive listing of a stage directory (`map/` or
    /// `reduce/`).
    pub fn tally(total: usize, dir: &str, entries: &[KvEntry]) -> Result<Self> {
        let base = format!("{}/", dir.trim_end_matches('/'));
        let mut progress = StageProgress {
            total,
            ..Default::default()
        };
        for claim in entries.iter().filter(|e| {
            e.is_dir
                && e.path
                    .strip_prefix(&base)
                    .map_or(false, |rest| !rest.contains('/'))
        }) {
            let status_key = format!("{}/status", claim.path);
            let status = entries.iter().find(|e| e.path == status_key);
            match status {
                None => progress.running += 1,
                Some(entry) => match TaskStatus::from_kv(&entry.value)? {
                    TaskStatus::Initialized => progress.running += 1,
                    TaskStatus::Done => progress.done += 1,
                    TaskStatus::Failed => progress.failed += 1,
                },
            }
        }
        progress.waiting = total
            .saturating_sub(progress.running + progress.done + progress.failed);
        Ok(progress)
    }
}

/// A submitted unit of work. The durable form is the JSON uploaded as
/// `jobdata.json`; status, counters and progress are overlaid from the KV
/// store by the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Arbitrary user parameters, passed through to map/reduce.
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,

    /// Optional short alphanumeric tag prepended to the generated name.
    #[serde(default)]
    pub name_prefix: String,

    /// `<prefix>-<uuid>`, assigned at deploy time. Globally unique.
    #[serde(default)]
    pub name: String,

    /// Opaque input descriptors, one map task each. By convention URLs the
    /// user's map function understands.
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Desired partition count P. Map output keys are routed to
    /// `hash(key) % P`.
    pub partitions: u32,

    #[serde(default)]
    pub status: JobStatus,

    /// Reduce output keys, ascending partition order. Populated once the
    /// job is `Done`.
    #[serde(default)]
    pub results: Vec<String>,

    #[serde(default)]
    pub s3_bucket: String,

    /// Object-store prefix owned by this job, `<incoming>/<name>/`.
    #[serde(default)]
    pub s3_prefix: String,

    /// Hex SHA-256 of the deployed executable's uncompressed bytes.
    #[serde(default)]
    pub binary: String,

    /// `inputs.len()`, stamped at deploy time.
    #[serde(default)]
    pub num_maps: usize,

    /// Number of partitions that received at least one map output.
    /// Populated after the map phase.
    #[serde(default)]
    pub num_reduces: usize,

    #[serde(default = "epoch")]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub map_progress: Option<StageProgress>,

    #[serde(default)]
    pub reduce_progress: Option<StageProgress>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

impl Default for Job {
    fn default() -> Self {
        Self {
            params: serde_json::Map::new(),
            name_prefix: String::new(),
            name: String::new(),
            inputs: Vec::new(),
            partitions: 1,
            status: JobStatus::Initialized,
            results: Vec::new(),
            s3_bucket: String::new(),
            s3_prefix: String::new(),
            binary: String::new(),
            num_maps: 0,
            num_reduces: 0,
            created_at: epoch(),
            map_progress: None,
            reduce_progress: None,
        }
    }
}

impl Job {
    /// A status-only view, to be filled in by the catalog.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn keys(&self) -> JobKeys {
        JobKeys::new(&self.name)
    }
}

/// Builder for every KV path belonging to one job.
///
/// ```text
/// /gomr/<name>/status                 int 0..4
/// /gomr/<name>/bin                    object-store key of the binary
/// /gomr/<name>/s3bucket, s3prefix     object-store location
/// /gomr/<name>/createdat              RFC3339
/// /gomr/<name>/nummaps, numreduces    int
/// /gomr/<name>/map/<i>/...            claim, status, input, outputs/<p>
/// /gomr/<name>/reduce/<p>/...         claim, status
/// /gomr/<name>/results/<p>            object-store key of final output
/// ```
#[derive(Debug, Clone)]
pub struct JobKeys {
    prefix: String,
}

impl JobKeys {
    pub fn new(name: &str) -> Self {
        Self {
            prefix: format!("{KV_ROOT}/{name}"),
        }
    }

    pub fn root(&self) -> String {
        self.prefix.clone()
    }

    pub fn status(&self) -> String {
        format!("{}/status", self.prefix)
    }

    pub fn bin(&self) -> String {
        format!("{}/bin", self.prefix)
    }

    pub fn s3bucket(&self) -> String {
        format!("{}/s3bucket", self.prefix)
    }

    pub fn s3prefix(&self) -> String {
        format!("{}/s3prefix", self.prefix)
    }

    pub fn createdat(&self) -> String {
        format!("{}/createdat", self.prefix)
    }

    pub fn nummaps(&self) -> String {
        format!("{}/nummaps", self.prefix)
    }

    pub fn numreduces(&self) -> String {
        format!("{}/numreduces", self.prefix)
    }

    pub fn map_dir(&self) -> String {
        format!("{}/map", self.prefix)
    }

    pub fn map_claim(&self, i: usize) -> String {
        format!("{}/map/{i}", self.prefix)
    }

    pub fn map_status(&self, i: usize) -> String {
        format!("{}/map/{i}/status", self.prefix)
    }

    pub fn map_input(&self, i: usize) -> String {
        format!("{}/map/{i}/input", self.prefix)
    }

    pub fn map_outputs_dir(&self, i: usize) -> String {
        format!("{}/map/{i}/outputs", self.prefix)
    }

    pub fn map_output(&self, i: usize, partition: u32) -> String {
        format!("{}/map/{i}/outputs/{partition}", self.prefix)
    }

    pub fn reduce_dir(&self) -> String {
        format!("{}/reduce", self.prefix)
    }

    pub fn reduce_claim(&self, partition: u32) -> String {
        format!("{}/reduce/{partition}", self.prefix)
    }

    pub fn reduce_status(&self, partition: u32) -> String {
        format!("{}/reduce/{partition}/status", self.prefix)
    }

    pub fn results_dir(&self) -> String {
        format!("{}/results", self.prefix)
    }

    pub fn result(&self, partition: u32) -> String {
        format!("{}/results/{partition}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::KvEntry;

    #[test]
    fn status_encodings_round_trip() {
        for status in [
            JobStatus::Initialized,
            JobStatus::MapStage,
            JobStatus::ReduceStage,
            JobStatus::Failed,
            JobStatus::Done,
        ] {
            assert_eq!(JobStatus::from_kv(&status.as_kv()).unwrap(), status);
        }
        for status in [TaskStatus::Initialized, TaskStatus::Failed, TaskStatus::Done] {
            assert_eq!(TaskStatus::from_kv(&status.as_kv()).unwrap(), status);
        }
    }

    #[test]
    fn job_and_task_status_reject_each_others_extras() {
        // 1 and 2 are job stages, meaningless for a task
        assert!(TaskStatus::from_kv("1").is_err());
        assert!(TaskStatus::from_kv("2").is_err());
        assert!(JobStatus::from_kv("7").is_err());
        assert!(JobStatus::from_kv("four").is_err());
    }

    #[test]
    fn job_json_round_trip() {
        let mut params = serde_json::Map::new();
        params.insert("depth".into(), serde_json::json!(3));
        let job = Job {
            params,
            name_prefix: "wc".into(),
            name: "wc-123".into(),
            inputs: vec!["https://a".into(), "https://b".into()],
            partitions: 5,
            s3_bucket: "jobs".into(),
            s3_prefix: "incoming/wc-123/".into(),
            binary: "deadbeef".into(),
            num_maps: 2,
            created_at: Utc::now(),
            ..Default::default()
        };
        let data = serde_json::to_vec(&job).unwrap();
        let back: Job = serde_json::from_slice(&data).unwrap();
        assert_eq!(back.name, job.name);
        assert_eq!(back.inputs, job.inputs);
        assert_eq!(back.partitions, job.partitions);
        assert_eq!(back.s3_prefix, job.s3_prefix);
        assert_eq!(back.binary, job.binary);
        assert_eq!(back.created_at, job.created_at);
        assert_eq!(back.params["depth"], serde_json::json!(3));
    }

    #[test]
    fn status_serializes_as_integer() {
        let job = Job::default();
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["status"], serde_json::json!(0));
    }

    fn dir(path: &str) -> KvEntry {
        KvEntry {
            path: path.into(),
            value: String::new(),
            is_dir: true,
        }
    }

    fn val(path: &str, value: &str) -> KvEntry {
        KvEntry {
            path: path.into(),
            value: value.into(),
            is_dir: false,
        }
    }

    #[test]
    fn progress_tally_counts_all_states() {
        let entries = vec![
            dir("/gomr/j/map/0"),
            val("/gomr/j/map/0/status", "4"),
            val("/gomr/j/map/0/input", "https://a"),
            dir("/gomr/j/map/0/outputs"),
            val("/gomr/j/map/0/outputs/1", "k"),
            dir("/gomr/j/map/1"),
            val("/gomr/j/map/1/status", "0"),
            dir("/gomr/j/map/2"),
            val("/gomr/j/map/2/status", "3"),
        ];
        let progress = StageProgress::tally(5, "/gomr/j/map", &entries).unwrap();
        assert_eq!(
            progress,
            StageProgress {
                total: 5,
                waiting: 2,
                running: 1,
                done: 1,
                failed: 1,
            }
        );
    }

    #[test]
    fn claim_without_status_counts_as_running() {
        let entries = vec![dir("/gomr/j/map/0")];
        let progress = StageProgress::tally(3, "/gomr/j/map", &entries).unwrap();
        assert_eq!(progress.running, 1);
        assert_eq!(progress.waiting, 2);
    }
}
