// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `FileSink`: writes one pretty-printed JSON file per stored record under
//! `<basePath>/<device_type>/`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::GatewayError;
use crate::record::DeviceRecord;
use crate::sink::Sink;

pub struct FileSink {
    base_path: PathBuf,
}

impl FileSink {
    /// Bootstrap the sink: ensure the root directory exists. This is the
    /// sink's bootstrap step (§4.5) — it is only ever installed into the
    /// fan-out after this succeeds.
    pub async fn bootstrap(base_path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let base_path = base_path.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&base_path)
            .await
            .map_err(|err| GatewayError::SinkBootstrap {
                tag: "file".to_string(),
                source: anyhow::anyhow!(err),
            })?;
        Ok(Self { base_path })
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn store(&self, device_type: &str, record: &DeviceRecord) -> Result<(), GatewayError> {
        let dir = self.base_path.join(device_type);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| GatewayError::SinkStore {
                tag: "file".to_string(),
                source: anyhow::anyhow!(err),
            })?;

        let body = serde_json::to_vec_pretty(record).map_err(|err| GatewayError::SinkStore {
            tag: "file".to_string(),
            source: anyhow::anyhow!(err),
        })?;

        let now = Utc::now();
        let stem = now.format("%Y%m%d-%H%M%S%.3f").to_string();
        let mut path = dir.join(format!("{stem}.json"));

        let mut suffix = 1u32;
        while tokio::fs::try_exists(&path).await.unwrap_or(false) {
            path = dir.join(format!("{stem}-{suffix}.json"));
            suffix += 1;
        }

        tokio::fs::write(&path, body)
            .await
            .map_err(|err| GatewayError::SinkStore {
                tag: "file".to_string(),
                source: anyhow::anyhow!(err),
            })
    }

    async fn close(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    fn tag(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn store_writes_a_pretty_json_file_under_the_device_type_directory() {
        let dir = TempDir::new().unwrap();
        let sink = FileSink::bootstrap(dir.path()).await.unwrap();

        let record = DeviceRecord {
            device_name: "t1".to_string(),
            device_type: "temperature".to_string(),
            ..Default::default()
        };
        sink.store("temperature", &record).await.unwrap();

        let type_dir = dir.path().join("temperature");
        let mut entries = std::fs::read_dir(&type_dir).unwrap();
        let entry = entries.next().unwrap().unwrap();
        assert!(entry.file_name().to_string_lossy().ends_with(".json"));

        let contents = std::fs::read_to_string(entry.path()).unwrap();
        assert!(contents.contains("\"device_name\": \"t1\""));
        assert!(contents.contains('\n'), "expected pretty-printed output");
    }

    #[tokio::test]
    async fn concurrent_stores_within_the_same_millisecond_do_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let sink = FileSink::bootstrap(dir.path()).await.unwrap();

        let record = DeviceRecord {
            device_type: "temperature".to_string(),
            ..Default::default()
        };
        for _ in 0..5 {
            sink.store("temperature", &record).await.unwrap();
        }

        let type_dir = dir.path().join("temperature");
        let count = std::fs::read_dir(&type_dir).unwrap().count();
        assert_eq!(count, 5);
    }
}
