//! The append-only decision log: one JSON object per line for every forwarded request.
//!
//! Requests are handled concurrently, so writes go through a mutex and each record is written as
//! a single complete line. The lock is only ever held for the file write.
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const ROUTE_EVENT: &str = "route";
pub const UPSTREAM_ERROR_EVENT: &str = "upstream_error";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub event: &'static str,
    pub target: String,
    pub endpoint: String,
    pub len_prompt: usize,
    pub elapsed_s: f64,
    pub ts: String,
}

impl LogRecord {
    /// A record stamped with the current local time.
    pub fn new(
        event: &'static str,
        target: impl Into<String>,
        endpoint: impl Into<String>,
        len_prompt: usize,
        elapsed_s: f64,
    ) -> Self {
        Self {
            event,
            target: target.into(),
            endpoint: endpoint.into(),
            len_prompt,
            elapsed_s,
            ts: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%z").to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DecisionLogger {
    sink: Option<Arc<Sink>>,
}

#[derive(Debug)]
struct Sink {
    path: PathBuf,
    file: Mutex<File>,
}

impl DecisionLogger {
    /// A logger that drops every record.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Opens `path` for appending, creating it and its parent directories if needed.
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        debug!("Appending routing decisions to {}", path.display());
        Ok(Self {
            sink: Some(Arc::new(Sink {
                path: path.to_path_buf(),
                file: Mutex::new(file),
            })),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.sink.as_ref().map(|s| s.path.as_path())
    }

    /// Appends one record. Failures are reported but never fail the request being logged.
    pub async fn append(&self, record: &LogRecord) {
        let Some(sink) = &self.sink else {
            return;
        };

        let mut line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize log record: {}", e);
                return;
            }
        };
        line.push('\n');

        let mut file = sink.file.lock().await;
        let written = async {
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!("Failed to append to {}: {}", sink.path.display(), e);
        }
    }
}
