use super::{PowerRecord, Sink};
use crate::error::SinkError;
use std::path::PathBuf;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

fn encode_line(identity: &str, timestamp: i64, value: f64) -> Result<Vec<u8>, SinkError> {
    let record = PowerRecord {
        timestamp,
        sensor: identity.to_string(),
        power: value,
    };
    let mut line =
        serde_json::to_vec(&record).map_err(|err| SinkError::WriteRejected(err.to_string()))?;
    line.push(b'\n');
    Ok(line)
}

/// Append-only JSON-lines file, one [`PowerRecord`] per line.
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl JsonLinesSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: Mutex::new(None),
        }
    }

    async fn open(&self) -> Result<File, SinkError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| SinkError::Unreachable(format!("{}: {err}", parent.display())))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|err| SinkError::Unreachable(format!("{}: {err}", self.path.display())))
    }
}

impl Sink for JsonLinesSink {
    async fn check(&self) -> Result<(), SinkError> {
        let mut guard = self.file.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        Ok(())
    }

    async fn append(&self, identity: &str, timestamp: i64, value: f64) -> Result<(), SinkError> {
        let line = encode_line(identity, timestamp, value)?;
        let mut guard = self.file.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        let Some(file) = guard.as_mut() else {
            return Err(SinkError::Unreachable(format!("{} not open", self.path.display())));
        };
        file.write_all(&line)
            .await
            .map_err(|err| SinkError::WriteRejected(err.to_string()))?;
        file.flush()
            .await
            .map_err(|err| SinkError::WriteRejected(err.to_string()))
    }
}

/// JSON lines on stdout.
#[derive(Default)]
pub struct StdoutSink {
    out: Mutex<()>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Sink for StdoutSink {
    async fn check(&self) -> Result<(), SinkError> {
        Ok(())
    }

    async fn append(&self, identity: &str, timestamp: i64, value: f64) -> Result<(), SinkError> {
        let line = encode_line(identity, timestamp, value)?;
        let _guard = self.out.lock().await;
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(&line)
            .await
            .map_err(|err| SinkError::WriteRejected(err.to_string()))?;
        stdout
            .flush()
            .await
            .map_err(|err| SinkError::WriteRejected(err.to_string()))
    }
}
