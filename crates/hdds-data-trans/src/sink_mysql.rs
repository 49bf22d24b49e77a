// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `MySqlSink`: the MySQL-dialect SQL sink (§4.5, "SQL-A").

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::{Executor, MySqlPool};

use crate::error::GatewayError;
use crate::record::DeviceRecord;
use crate::sink::{split_dsn, Sink};
use crate::value::format_scalar_for_sql;

const MAX_CONNECTIONS: u32 = 10;
const MIN_CONNECTIONS: u32 = 5;
const MAX_LIFETIME: Duration = Duration::from_secs(5 * 60);

pub struct MySqlSink {
    pool: MySqlPool,
}

impl MySqlSink {
    /// Bootstrap: ensure the target database exists, open a pooled
    /// connection to it, then create the two tables if they are absent.
    pub async fn bootstrap(dsn: &str) -> Result<Self, GatewayError> {
        let (db_name, server_dsn) = split_dsn(dsn)?;

        let server_pool = MySqlPoolOptions::new()
            .max_connections(1)
            .connect(&server_dsn)
            .await
            .map_err(|err| GatewayError::SinkBootstrap {
                tag: "mysql".to_string(),
                source: anyhow::anyhow!(err),
            })?;

        server_pool
            .execute(format!("CREATE DATABASE IF NOT EXISTS `{db_name}`").as_str())
            .await
            .map_err(|err| GatewayError::SinkBootstrap {
                tag: "mysql".to_string(),
                source: anyhow::anyhow!(err),
            })?;
        server_pool.close().await;

        let pool = MySqlPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .min_connections(MIN_CONNECTIONS)
            .max_lifetime(MAX_LIFETIME)
            .connect(dsn)
            .await
            .map_err(|err| GatewayError::SinkBootstrap {
                tag: "mysql".to_string(),
                source: anyhow::anyhow!(err),
            })?;

        create_tables(&pool).await.map_err(|err| GatewayError::SinkBootstrap {
            tag: "mysql".to_string(),
            source: anyhow::anyhow!(err),
        })?;

        Ok(Self { pool })
    }
}

async fn create_tables(pool: &MySqlPool) -> Result<(), sqlx::Error> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS device_data (
            id BIGINT AUTO_INCREMENT PRIMARY KEY,
            device_name VARCHAR(255) NOT NULL,
            device_type VARCHAR(255) NOT NULL,
            timestamp BIGINT NOT NULL,
            metadata JSON,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            INDEX idx_device_data_device_type (device_type),
            INDEX idx_device_data_device_name (device_name),
            INDEX idx_device_data_timestamp (timestamp)
        )",
    )
    .await?;

    pool.execute(
        "CREATE TABLE IF NOT EXISTS device_attributes (
            id BIGINT AUTO_INCREMENT PRIMARY KEY,
            device_data_id BIGINT NOT NULL,
            name VARCHAR(255) NOT NULL,
            type VARCHAR(64) NOT NULL,
            value TEXT,
            unit VARCHAR(64),
            quality BIGINT,
            metadata JSON,
            FOREIGN KEY (device_data_id) REFERENCES device_data(id) ON DELETE CASCADE,
            INDEX idx_device_attributes_device_data_id (device_data_id),
            INDEX idx_device_attributes_name (name)
        )",
    )
    .await?;

    Ok(())
}

#[async_trait]
impl Sink for MySqlSink {
    async fn store(&self, _device_type: &str, record: &DeviceRecord) -> Result<(), GatewayError> {
        let metadata_json =
            serde_json::to_string(&record.metadata).map_err(|err| GatewayError::SinkStore {
                tag: "mysql".to_string(),
                source: anyhow::anyhow!(err),
            })?;

        let mut tx = self.pool.begin().await.map_err(|err| GatewayError::SinkStore {
            tag: "mysql".to_string(),
            source: anyhow::anyhow!(err),
        })?;

        let insert_result = sqlx::query(
            "INSERT INTO device_data (device_name, device_type, timestamp, metadata) VALUES (?, ?, ?, ?)",
        )
        .bind(&record.device_name)
        .bind(&record.device_type)
        .bind(record.timestamp)
        .bind(&metadata_json)
        .execute(&mut *tx)
        .await;

        let insert_result = match insert_result {
            Ok(r) => r,
            Err(err) => {
                let _ = tx.rollback().await;
                return Err(GatewayError::SinkStore {
                    tag: "mysql".to_string(),
                    source: anyhow::anyhow!(err),
                });
            }
        };
        let device_data_id = insert_result.last_insert_id();

        if !record.attributes.is_empty() {
            let mut query = String::from(
                "INSERT INTO device_attributes (device_data_id, name, type, value, unit, quality, metadata) VALUES ",
            );
            let placeholders: Vec<&str> = record.attributes.iter().map(|_| "(?, ?, ?, ?, ?, ?, ?)").collect();
            query.push_str(&placeholders.join(", "));

            let mut q = sqlx::query(&query);
            for attr in &record.attributes {
                let attr_metadata = serde_json::to_string(&attr.metadata).unwrap_or_default();
                q = q
                    .bind(device_data_id)
                    .bind(&attr.name)
                    .bind(&attr.type_tag)
                    .bind(format_scalar_for_sql(&attr.value))
                    .bind(&attr.unit)
                    .bind(attr.quality)
                    .bind(attr_metadata);
            }

            if let Err(err) = q.execute(&mut *tx).await {
                let _ = tx.rollback().await;
                return Err(GatewayError::SinkStore {
                    tag: "mysql".to_string(),
                    source: anyhow::anyhow!(err),
                });
            }
        }

        tx.commit().await.map_err(|err| GatewayError::SinkStore {
            tag: "mysql".to_string(),
            source: anyhow::anyhow!(err),
        })
    }

    async fn close(&self) -> Result<(), GatewayError> {
        self.pool.close().await;
        Ok(())
    }

    fn tag(&self) -> &'static str {
        "mysql"
    }
}
