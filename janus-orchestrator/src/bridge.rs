use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use janus_core::error::BridgeError;
use janus_core::oracle::{OracleBridge, OracleRequest, OracleResponse};
use janus_core::task::TaskId;

/// Talks to the oracle through a shared directory: the request lands as
/// `pending_<task>.request`, the answer is expected as
/// `response_<task>.json`.
pub struct FileOracleBridge {
    signal_dir: PathBuf,
    poll_interval: Duration,
}

impl FileOracleBridge {
    pub fn new(signal_dir: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            signal_dir: signal_dir.into(),
            poll_interval,
        }
    }

    pub fn request_path(&self, task_id: TaskId) -> PathBuf {
        self.signal_dir.join(format!("pending_{task_id}.request"))
    }

    pub fn response_path(&self, task_id: TaskId) -> PathBuf {
        self.signal_dir.join(format!("response_{task_id}.json"))
    }
}

/// Removes the signal files when the consultation ends, including when the
/// polling future is dropped by an abort.
struct SignalFiles {
    request: PathBuf,
    response: PathBuf,
}

impl Drop for SignalFiles {
    fn drop(&mut self) {
        remove_quietly(&self.request);
        remove_quietly(&self.response);
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove oracle signal file");
    }
}

#[async_trait]
impl OracleBridge for FileOracleBridge {
    async fn consult(&self, request: OracleRequest) -> Result<OracleResponse, BridgeError> {
        let task_id = request.task_id;
        tokio::fs::create_dir_all(&self.signal_dir).await?;

        let files = SignalFiles {
            request: self.request_path(task_id),
            response: self.response_path(task_id),
        };
        let body = serde_json::to_vec_pretty(&request).map_err(|e| BridgeError::Corrupted {
            task_id: task_id.to_string(),
            reason: e.to_string(),
        })?;
        tokio::fs::write(&files.request, body).await?;
        info!(task_id = %task_id, path = %files.request.display(), "oracle_request_written");

        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            interval.tick().await;
            let bytes = match tokio::fs::read(&files.response).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "oracle response unreadable, retrying");
                    continue;
                }
            };
            match serde_json::from_slice::<OracleResponse>(&bytes) {
                Ok(response) => {
                    info!(task_id = %task_id, "oracle_response_received");
                    return Ok(response);
                }
                Err(e) => {
                    let err = BridgeError::Corrupted {
                        task_id: task_id.to_string(),
                        reason: e.to_string(),
                    };
                    warn!(error = %err, bytes = bytes.len(), "skipping malformed oracle response");
                }
            }
        }
    }
}
