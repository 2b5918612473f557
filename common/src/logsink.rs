//! User-visible log sink threaded through map and reduce functions.
//!
//! `Console` prints through `tracing`; `Remote` ships JSON events to a
//! loggly-style HTTP collector so the catalog side can fetch a job's last
//! lines by tag; `Tee` does both. This is separate from the process-level
//! `tracing` diagnostics: it is part of the public API the user program
//! logs against.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::env::LogglyConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub level: String,
    pub text: String,
}

pub enum LogSink {
    Console(ConsoleSink),
    Remote(RemoteSink),
    Tee(ConsoleSink, RemoteSink),
}

impl LogSink {
    pub fn console(tags: Vec<String>) -> Self {
        LogSink::Console(ConsoleSink::new(tags))
    }

    pub fn remote(cfg: &LogglyConfig, tags: Vec<String>) -> Self {
        LogSink::Remote(RemoteSink::new(cfg, tags))
    }

    pub fn tee(cfg: &LogglyConfig, tags: Vec<String>) -> Self {
        LogSink::Tee(ConsoleSink::new(tags.clone()), RemoteSink::new(cfg, tags))
    }

    pub fn info(&self, msg: impl Into<String>) {
        let msg = msg.into();
        match self {
            LogSink::Console(c) => c.log("info", &msg),
            LogSink::Remote(r) => r.send("info", msg),
            LogSink::Tee(c, r) => {
                c.log("info", &msg);
                r.send("info", msg);
            }
        }
    }

    pub fn critical(&self, msg: impl Into<String>) {
        let msg = msg.into();
        match self {
            LogSink::Console(c) => c.log("critical", &msg),
            LogSink::Remote(r) => r.send("critical", msg),
            LogSink::Tee(c, r) => {
                c.log("critical", &msg);
                r.send("critical", msg);
            }
        }
    }

    /// Flush pending remote deliveries. Console sinks have nothing to do.
    pub async fn close(&self) {
        match self {
            LogSink::Console(_) => {}
            LogSink::Remote(r) | LogSink::Tee(_, r) => r.flush().await,
        }
    }

    /// Retrieve the last `n` lines logged under `tag`. Console sinks keep
    /// no history and return empty.
    pub async fn fetch(&self, tag: &str, n: usize) -> Vec<LogLine> {
        match self {
            LogSink::Console(_) => Vec::new(),
            LogSink::Remote(r) | LogSink::Tee(_, r) => r.fetch(tag, n).await,
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

pub struct ConsoleSink {
    tags: Vec<String>,
}

impl ConsoleSink {
    fn new(mut tags: Vec<String>) -> Self {
        tags.push(hostname());
        Self { tags }
    }

    fn log(&self, level: &str, msg: &str) {
        match level {
            "critical" => error!(tags = ?self.tags, "{msg}"),
            _ => info!(tags = ?self.tags, "{msg}"),
        }
    }
}

pub struct RemoteSink {
    client: reqwest::Client,
    token: String,
    account: String,
    username: String,
    password: String,
    tags: Vec<String>,
}

#[derive(Serialize)]
struct RemoteEvent {
    timestamp: i64,
    hostname: String,
    level: String,
    text: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    rsid: Rsid,
}

#[derive(Deserialize)]
struct Rsid {
    id: String,
}

#[derive(Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<RemoteEventEnvelope>,
}

#[derive(Deserialize)]
struct RemoteEventEnvelope {
    event: RemoteEventJson,
}

#[derive(Deserialize)]
struct RemoteEventJson {
    json: StoredEvent,
}

#[derive(Deserialize)]
struct StoredEvent {
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    hostname: String,
    #[serde(default)]
    level: String,
    #[serde(default)]
    text: String,
}

impl RemoteSink {
    fn new(cfg: &LogglyConfig, tags: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: cfg.token.clone(),
            account: cfg.account.clone(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            tags,
        }
    }

    /// Ship one event. Delivery is fire-and-forget on the runtime; a lost
    /// log line never fails a task.
    fn send(&self, level: &str, text: String) {
        let url = format!(
            "https://logs-01.loggly.com/inputs/{}/tag/{}/",
            self.token,
            self.tags.join(",")
        );
        let event = RemoteEvent {
            timestamp: Utc::now().timestamp_millis(),
            hostname: hostname(),
            level: level.to_string(),
            text,
        };
        let client = self.client.clone();
        tokio::spawn(async move {
            if let Err(e) = client.post(url).json(&event).send().await {
                warn!("remote log delivery failed: {e}");
            }
        });
    }

    async fn flush(&self) {
        // events are posted eagerly; yield so spawned sends get a chance
        tokio::task::yield_now().await;
    }

    async fn fetch(&self, tag: &str, n: usize) -> Vec<LogLine> {
        match self.try_fetch(tag, n).await {
            Ok(lines) => lines,
            Err(e) => {
                warn!("remote log fetch failed: {e}");
                Vec::new()
            }
        }
    }

    async fn try_fetch(&self, tag: &str, n: usize) -> Result<Vec<LogLine>, reqwest::Error> {
        let url = format!(
            "https://{}.loggly.com/apiv2/search?q=tag:\"{tag}\"&until=now&size={n}",
            self.account
        );
        let search: SearchResponse = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let url = format!(
            "https://{}.loggly.com/apiv2/events?rsid={}",
            self.account, search.rsid.id
        );
        let events: EventsResponse = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(events
            .events
            .into_iter()
            .map(|envelope| {
                let stored = envelope.event.json;
                LogLine {
                    timestamp: Utc
                        .timestamp_millis_opt(stored.timestamp)
                        .single()
                        .unwrap_or(DateTime::UNIX_EPOCH),
                    hostname: stored.hostname,
                    level: stored.level,
                    text: stored.text,
                }
            })
            .collect())
    }
}
