//! Process-wide configuration, read from the environment exactly once and
//! threaded explicitly through every component.

use std::env;

use crate::logsink::LogSink;

#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub aws_region: String,
    /// Default bucket for jobs that do not name one.
    pub s3_bucket: String,
    /// Endpoint override for MinIO and other S3 clones.
    pub s3_endpoint: Option<String>,
    /// Comma-separated contents of `ETCD_SERVERS`.
    pub etcd_servers: Vec<String>,
    pub loggly: Option<LogglyConfig>,
}

/// Credentials for the remote log sink. Absent token means console-only
/// logging.
#[derive(Debug, Clone)]
pub struct LogglyConfig {
    pub token: String,
    pub account: String,
    pub username: String,
    pub password: String,
}

fn var(name: &str) -> String {
    env::var(name).unwrap_or_default()
}

impl Environment {
    pub fn from_env() -> Self {
        let loggly = match env::var("LOGGLY_TOKEN") {
            Ok(token) if !token.is_empty() => Some(LogglyConfig {
                token,
                account: var("LOGGLY_ACCOUNT"),
                username: var("LOGGLY_USERNAME"),
                password: var("LOGGLY_PASSWORD"),
            }),
            _ => None,
        };
        Self {
            aws_access_key_id: var("AWS_ACCESS_KEY_ID"),
            aws_secret_access_key: var("AWS_SECRET_ACCESS_KEY"),
            aws_region: var("AWS_REGION"),
            s3_bucket: var("S3_BUCKET"),
            s3_endpoint: env::var("S3_ENDPOINT").ok().filter(|s| !s.is_empty()),
            etcd_servers: var("ETCD_SERVERS")
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            loggly,
        }
    }

    /// Build the log sink for this process: console always, teed to the
    /// remote collector when credentials are configured.
    pub fn log_sink(&self, tags: Vec<String>) -> LogSink {
        match &self.loggly {
            Some(cfg) => LogSink::tee(cfg, tags),
            None => LogSink::console(tags),
        }
    }
}
