mod harness;

use std::io::Write;

use chrono::DateTime;
use common::{codec, deploy, Job, JobStatus, ObjectStore};
use harness::*;
use tempfile::NamedTempFile;

#[tokio::test]
async fn deploy_seeds_the_full_kv_tree() {
    let (cluster, store) = memory_cluster();

    let mut binary = NamedTempFile::new().unwrap();
    binary.write_all(b"fake executable bytes").unwrap();
    binary.flush().unwrap();

    let job = Job {
        inputs: vec!["https://a".into(), "https://b".into()],
        partitions: 4,
        name_prefix: "wc".into(),
        ..Default::default()
    };
    let job = deploy::deploy(&cluster, job, binary.path()).await.unwrap();

    assert!(job.name.starts_with("wc-"));
    assert_eq!(job.s3_bucket, "testbucket");
    assert_eq!(job.s3_prefix, format!("/{}/", job.name));
    assert_eq!(job.binary, codec::sha256_hex(b"fake executable bytes"));
    assert_eq!(job.num_maps, 2);
    assert_eq!(job.status, JobStatus::Initialized);

    let keys = job.keys();
    let kv = &cluster.kv;
    assert_eq!(kv.get(&keys.status()).await.unwrap(), "0");
    assert_eq!(kv.get(&keys.bin()).await.unwrap(), format!("bin/{}", job.binary));
    assert_eq!(kv.get(&keys.s3bucket()).await.unwrap(), "testbucket");
    assert_eq!(kv.get(&keys.s3prefix()).await.unwrap(), job.s3_prefix);
    assert_eq!(kv.get(&keys.nummaps()).await.unwrap(), "2");
    assert_eq!(kv.get(&keys.numreduces()).await.unwrap(), "0");
    let createdat = kv.get(&keys.createdat()).await.unwrap();
    assert!(createdat.parse::<DateTime<chrono::Utc>>().is_ok());

    // stage directories exist and are empty
    assert!(kv.list(&keys.map_dir(), true).await.unwrap().is_empty());
    assert!(kv.list(&keys.reduce_dir(), true).await.unwrap().is_empty());
    assert!(kv.list(&keys.results_dir(), true).await.unwrap().is_empty());

    // the durable document is in the object store and reloads as the job
    let document = store
        .get("testbucket", &format!("{}jobdata.json", job.s3_prefix))
        .await
        .unwrap();
    let reloaded: Job = serde_json::from_slice(&document).unwrap();
    assert_eq!(reloaded.name, job.name);
    assert_eq!(reloaded.inputs, job.inputs);
    assert_eq!(reloaded.partitions, 4);
    assert_eq!(reloaded.binary, job.binary);
    assert_eq!(reloaded.created_at, job.created_at);

    // the binary blob is gzip of the original bytes
    let packed = store
        .get("testbucket", &format!("bin/{}", job.binary))
        .await
        .unwrap();
    assert_eq!(codec::gunzip(&packed).unwrap(), b"fake executable bytes");
}

#[tokio::test]
async fn identical_binaries_share_one_object() {
    let (cluster, store) = memory_cluster();

    let first = deploy_job(&cluster, &["x"], 1).await;
    let second = deploy_job(&cluster, &["y"], 1).await;

    // content-addressed: same bytes, same key, distinct jobs
    assert_eq!(first.binary, second.binary);
    assert_ne!(first.name, second.name);
    let kv = &cluster.kv;
    assert_eq!(
        kv.get(&first.keys().bin()).await.unwrap(),
        kv.get(&second.keys().bin()).await.unwrap()
    );

    let bin_writes: Vec<_> = store
        .write_log()
        .into_iter()
        .filter(|key| key.contains("/bin/"))
        .collect();
    assert_eq!(bin_writes.len(), 1);
}

#[tokio::test]
async fn job_without_prefix_gets_a_bare_uuid_name() {
    let (cluster, _store) = memory_cluster();
    let job = deploy_job(&cluster, &["x"], 1).await;
    assert!(uuid::Uuid::parse_str(&job.name).is_ok());
}
