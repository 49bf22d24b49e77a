// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `PostgresSink`: the PostgreSQL-dialect SQL sink (§4.5, "SQL-B").
//!
//! Differs from `MySqlSink` only in dialect and auto-increment retrieval:
//! database existence is a probe-then-create (Postgres has no `CREATE
//! DATABASE IF NOT EXISTS`), and the inserted `device_data.id` comes back via
//! `RETURNING id` rather than a driver-level last-insert-id call.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool, Row};

use crate::error::GatewayError;
use crate::record::DeviceRecord;
use crate::sink::{split_dsn, Sink};
use crate::value::format_scalar_for_sql;

const MAX_CONNECTIONS: u32 = 10;
const MIN_CONNECTIONS: u32 = 5;
const MAX_LIFETIME: Duration = Duration::from_secs(5 * 60);

pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    pub async fn bootstrap(dsn: &str) -> Result<Self, GatewayError> {
        let (db_name, server_dsn) = split_dsn(dsn)?;

        let server_pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&server_dsn)
            .await
            .map_err(|err| GatewayError::SinkBootstrap {
                tag: "postgresql".to_string(),
                source: anyhow::anyhow!(err),
            })?;

        let exists: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM pg_database WHERE datname = $1")
            .bind(&db_name)
            .fetch_optional(&server_pool)
            .await
            .map_err(|err| GatewayError::SinkBootstrap {
                tag: "postgresql".to_string(),
                source: anyhow::anyhow!(err),
            })?;

        if exists.is_none() {
            server_pool
                .execute(format!("CREATE DATABASE \"{db_name}\"").as_str())
                .await
                .map_err(|err| GatewayError::SinkBootstrap {
                    tag: "postgresql".to_string(),
                    source: anyhow::anyhow!(err),
                })?;
        }
        server_pool.close().await;

        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .min_connections(MIN_CONNECTIONS)
            .max_lifetime(MAX_LIFETIME)
            .connect(dsn)
            .await
            .map_err(|err| GatewayError::SinkBootstrap {
                tag: "postgresql".to_string(),
                source: anyhow::anyhow!(err),
            })?;

        create_tables(&pool).await.map_err(|err| GatewayError::SinkBootstrap {
            tag: "postgresql".to_string(),
            source: anyhow::anyhow!(err),
        })?;

        Ok(Self { pool })
    }
}

async fn create_tables(pool: &PgPool) -> Result<(), sqlx::Error> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS device_data (
            id BIGSERIAL PRIMARY KEY,
            device_name TEXT NOT NULL,
            device_type TEXT NOT NULL,
            timestamp BIGINT NOT NULL,
            metadata JSONB,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .await?;
    pool.execute("CREATE INDEX IF NOT EXISTS idx_device_data_device_type ON device_data (device_type)")
        .await?;
    pool.execute("CREATE INDEX IF NOT EXISTS idx_device_data_device_name ON device_data (device_name)")
        .await?;
    pool.execute("CREATE INDEX IF NOT EXISTS idx_device_data_timestamp ON device_data (timestamp)")
        .await?;

    pool.execute(
        "CREATE TABLE IF NOT EXISTS device_attributes (
            id BIGSERIAL PRIMARY KEY,
            device_data_id BIGINT NOT NULL REFERENCES device_data(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            type TEXT NOT NULL,
            value TEXT,
            unit TEXT,
            quality BIGINT,
            metadata JSONB
        )",
    )
    .await?;
    pool.execute(
        "CREATE INDEX IF NOT EXISTS idx_device_attributes_device_data_id ON device_attributes (device_data_id)",
    )
    .await?;
    pool.execute("CREATE INDEX IF NOT EXISTS idx_device_attributes_name ON device_attributes (name)")
        .await?;

    Ok(())
}

#[async_trait]
impl Sink for PostgresSink {
    async fn store(&self, _device_type: &str, record: &DeviceRecord) -> Result<(), GatewayError> {
        let metadata_json =
            serde_json::to_string(&record.metadata).map_err(|err| GatewayError::SinkStore {
                tag: "postgresql".to_string(),
                source: anyhow::anyhow!(err),
            })?;

        let mut tx = self.pool.begin().await.map_err(|err| GatewayError::SinkStore {
            tag: "postgresql".to_string(),
            source: anyhow::anyhow!(err),
        })?;

        let inserted = sqlx::query(
            "INSERT INTO device_data (device_name, device_type, timestamp, metadata) VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(&record.device_name)
        .bind(&record.device_type)
        .bind(record.timestamp)
        .bind(&metadata_json)
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(err) => {
                let _ = tx.rollback().await;
                return Err(GatewayError::SinkStore {
                    tag: "postgresql".to_string(),
                    source: anyhow::anyhow!(err),
                });
            }
        };
        let device_data_id: i64 = row.get("id");

        if !record.attributes.is_empty() {
            let mut query = String::from(
                "INSERT INTO device_attributes (device_data_id, name, type, value, unit, quality, metadata) VALUES ",
            );
            let placeholders: Vec<String> = (0..record.attributes.len())
                .map(|i| {
                    let base = i * 7;
                    format!(
                        "(${}, ${}, ${}, ${}, ${}, ${}, ${})",
                        base + 1,
                        base + 2,
                        base + 3,
                        base + 4,
                        base + 5,
                        base + 6,
                        base + 7
                    )
                })
                .collect();
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
                    tag: "postgresql".to_string(),
                    source: anyhow::anyhow!(err),
                });
            }
        }

        tx.commit().await.map_err(|err| GatewayError::SinkStore {
            tag: "postgresql".to_string(),
            source: anyhow::anyhow!(err),
        })
    }

    async fn close(&self) -> Result<(), GatewayError> {
        self.pool.close().await;
        Ok(())
    }

    fn tag(&self) -> &'static str {
        "postgresql"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_rejects_a_dsn_with_no_database_name() {
        let result = PostgresSink::bootstrap("postgres://localhost:5432/").await;
        assert!(result.is_err());
    }
}
