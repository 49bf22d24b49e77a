// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Storage Fan-Out Manager: dispatches one canonical record to every
//! installed `Sink`, sequentially, with per-sink failure isolation.

use tokio::sync::RwLock;

use crate::error::GatewayError;
use crate::record::DeviceRecord;
use crate::sink::Sink;

/// Holds the live, ordered set of sinks. `store` never fails the caller —
/// per the legacy contract (§9's Open Question resolution), a sink error is
/// logged but does not abort the iteration and does not propagate.
pub struct StorageFanOut {
    sinks: RwLock<Vec<Box<dyn Sink>>>,
}

impl StorageFanOut {
    pub fn new() -> Self {
        Self {
            sinks: RwLock::new(Vec::new()),
        }
    }

    pub fn from_sinks(sinks: Vec<Box<dyn Sink>>) -> Self {
        Self {
            sinks: RwLock::new(sinks),
        }
    }

    /// Dispatch `record` to every installed sink, in configured order.
    /// Always returns `Ok(())`; failures are logged per sink.
    pub async fn store(&self, device_type: &str, record: &DeviceRecord) -> Result<(), GatewayError> {
        let sinks = self.sinks.read().await;
        for sink in sinks.iter() {
            if let Err(err) = sink.store(device_type, record).await {
                tracing::error!(tag = sink.tag(), error = %err, "sink store failed");
            }
        }
        Ok(())
    }

    /// Append a sink that has already passed its bootstrap.
    pub async fn add_backend(&self, sink: Box<dyn Sink>) {
        let mut sinks = self.sinks.write().await;
        sinks.push(sink);
    }

    /// Remove and close every sink whose `tag()` matches.
    pub async fn remove_backend_by_type(&self, tag: &str) {
        let removed = {
            let mut sinks = self.sinks.write().await;
            let mut removed = Vec::new();
            let mut kept = Vec::with_capacity(sinks.len());
            for sink in sinks.drain(..) {
                if sink.tag() == tag {
                    removed.push(sink);
                } else {
                    kept.push(sink);
                }
            }
            *sinks = kept;
            removed
        };

        for sink in removed {
            if let Err(err) = sink.close().await {
                tracing::error!(tag = sink.tag(), error = %err, "sink close failed during removal");
            }
        }
    }

    /// Close every sink, in order, logging failures. Used at shutdown.
    pub async fn close(&self) {
        let mut sinks = self.sinks.write().await;
        for sink in sinks.iter() {
            if let Err(err) = sink.close().await {
                tracing::error!(tag = sink.tag(), error = %err, "sink close failed during shutdown");
            }
        }
        sinks.clear();
    }

    pub async fn tags(&self) -> Vec<&'static str> {
        self.sinks.read().await.iter().map(|s| s.tag()).collect()
    }
}

impl Default for StorageFanOut {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink {
        tag: &'static str,
        stores: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Sink for CountingSink {
        async fn store(&self, _device_type: &str, _record: &DeviceRecord) -> Result<(), GatewayError> {
            self.stores.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GatewayError::SinkStore {
                    tag: self.tag.to_string(),
                    source: anyhow::anyhow!("boom"),
                });
            }
            Ok(())
        }

        async fn close(&self) -> Result<(), GatewayError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn tag(&self) -> &'static str {
            self.tag
        }
    }

    #[tokio::test]
    async fn store_reaches_every_sink_even_when_one_fails() {
        let a_stores = Arc::new(AtomicUsize::new(0));
        let b_stores = Arc::new(AtomicUsize::new(0));

        let fanout = StorageFanOut::from_sinks(vec![
            Box::new(CountingSink {
                tag: "file",
                stores: a_stores.clone(),
                closes: Arc::new(AtomicUsize::new(0)),
                fail: true,
            }),
            Box::new(CountingSink {
                tag: "mysql",
                stores: b_stores.clone(),
                closes: Arc::new(AtomicUsize::new(0)),
                fail: false,
            }),
        ]);

        let record = DeviceRecord {
            device_type: "temperature".to_string(),
            ..Default::default()
        };
        let result = fanout.store("temperature", &record).await;

        assert!(result.is_ok());
        assert_eq!(a_stores.load(Ordering::SeqCst), 1);
        assert_eq!(b_stores.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remove_backend_by_type_closes_only_matching_sinks() {
        let file_closes = Arc::new(AtomicUsize::new(0));
        let mysql_closes = Arc::new(AtomicUsize::new(0));

        let fanout = StorageFanOut::from_sinks(vec![
            Box::new(CountingSink {
                tag: "file",
                stores: Arc::new(AtomicUsize::new(0)),
                closes: file_closes.clone(),
                fail: false,
            }),
            Box::new(CountingSink {
                tag: "mysql",
                stores: Arc::new(AtomicUsize::new(0)),
                closes: mysql_closes.clone(),
                fail: false,
            }),
        ]);

        fanout.remove_backend_by_type("file").await;

        assert_eq!(file_closes.load(Ordering::SeqCst), 1);
        assert_eq!(mysql_closes.load(Ordering::SeqCst), 0);

        let mut tags = fanout.tags().await;
        tags.sort();
        assert_eq!(tags, vec!["mysql"]);
    }

    #[tokio::test]
    async fn close_closes_all_and_empties_the_set() {
        let closes = Arc::new(AtomicUsize::new(0));
        let fanout = StorageFanOut::from_sinks(vec![Box::new(CountingSink {
            tag: "file",
            stores: Arc::new(AtomicUsize::new(0)),
            closes: closes.clone(),
            fail: false,
        })]);

        fanout.close().await;

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(fanout.tags().await.is_empty());
    }
}
