// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transformer Registry: concurrent `device_type -> ScriptHost` map with
//! atomic replace-one.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::TransformerSource;
use crate::error::GatewayError;
use crate::script::ScriptHost;

type HostEntry = Arc<ScriptHost>;

/// Guards the map with a single `RwLock`, held only long enough to clone the
/// `Arc<ScriptHost>` out of it — this is concurrency option (b) from the
/// design notes, not (a): `transform` releases the read guard before calling
/// `invoke`, so it is the cloned `Arc`, not the lock, that keeps a Host alive
/// across its own invocation even if `replace` swaps the map entry out from
/// under it in the meantime. A `replace` that runs mid-invocation removes the
/// device type from the map but cannot drop the `ScriptHost` itself until the
/// in-flight `Arc` clone held by `transform` is also dropped. Distinct device
/// types never serialize against each other despite sharing one lock, because
/// each `ScriptHost` already serializes its own calls internally via its
/// dedicated VM thread (see `script.rs`) — the outer `RwLock` only protects
/// the map structure itself.
pub struct TransformerRegistry {
    hosts: RwLock<BTreeMap<String, HostEntry>>,
}

impl TransformerRegistry {
    /// Build one Host per transformer entry. If any fails, the whole
    /// construction fails and nothing is left partially built.
    pub fn build(
        transformers: &BTreeMap<String, TransformerSource>,
    ) -> Result<Self, GatewayError> {
        let mut hosts = BTreeMap::new();
        for (device_type, source) in transformers {
            let host = ScriptHost::build(device_type, source)?;
            hosts.insert(device_type.clone(), Arc::new(host));
        }
        Ok(Self {
            hosts: RwLock::new(hosts),
        })
    }

    /// Look up the Host for `device_type`, invoke it with `raw_bytes`, and
    /// return its raw (pre-canonicalization) result.
    pub async fn transform(
        &self,
        device_type: &str,
        raw_bytes: &[u8],
    ) -> Result<serde_json::Value, GatewayError> {
        let entry = {
            let hosts = self.hosts.read().await;
            hosts.get(device_type).cloned()
        };

        let entry = entry.ok_or_else(|| GatewayError::NoTransformerForType(device_type.to_string()))?;
        entry.invoke(raw_bytes).await
    }

    /// Build a new Host for `device_type` outside any lock, then swap it in.
    /// A build failure leaves the prior Host (if any) in place.
    pub async fn replace(
        &self,
        device_type: &str,
        source: &TransformerSource,
    ) -> Result<(), GatewayError> {
        let host = ScriptHost::build(device_type, source)?;
        let mut hosts = self.hosts.write().await;
        hosts.insert(device_type.to_string(), Arc::new(host));
        Ok(())
    }

    /// Remove a device type's transformer. Used when a reload drops an
    /// entry that existed in the prior snapshot.
    pub async fn remove(&self, device_type: &str) {
        let mut hosts = self.hosts.write().await;
        hosts.remove(device_type);
    }

    pub async fn device_types(&self) -> Vec<String> {
        self.hosts.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(code: &str) -> TransformerSource {
        TransformerSource::Inline(code.to_string())
    }

    #[tokio::test]
    async fn build_constructs_one_host_per_entry() {
        let mut transformers = BTreeMap::new();
        transformers.insert(
            "temperature".to_string(),
            source("function transform(raw) { return {}; }"),
        );
        transformers.insert(
            "humidity".to_string(),
            source("function transform(raw) { return {}; }"),
        );

        let registry = TransformerRegistry::build(&transformers).unwrap();
        let mut types = registry.device_types().await;
        types.sort();
        assert_eq!(types, vec!["humidity".to_string(), "temperature".to_string()]);
    }

    #[tokio::test]
    async fn build_fails_atomically_if_any_entry_fails() {
        let mut transformers = BTreeMap::new();
        transformers.insert(
            "temperature".to_string(),
            source("function transform(raw) { return {}; }"),
        );
        transformers.insert("broken".to_string(), source("var x = 1;"));

        let result = TransformerRegistry::build(&transformers);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn transform_reports_missing_type() {
        let registry = TransformerRegistry::build(&BTreeMap::new()).unwrap();
        let err = registry.transform("pressure", b"{}").await.unwrap_err();
        assert!(matches!(err, GatewayError::NoTransformerForType(_)));
    }

    #[tokio::test]
    async fn replace_swaps_in_a_new_host() {
        let mut transformers = BTreeMap::new();
        transformers.insert(
            "temperature".to_string(),
            source("function transform(raw) { return { tag: 'v1' }; }"),
        );
        let registry = TransformerRegistry::build(&transformers).unwrap();

        let before = registry.transform("temperature", b"{}").await.unwrap();
        assert_eq!(before["tag"], "v1");

        registry
            .replace(
                "temperature",
                &source("function transform(raw) { return { tag: 'v2' }; }"),
            )
            .await
            .unwrap();

        let after = registry.transform("temperature", b"{}").await.unwrap();
        assert_eq!(after["tag"], "v2");
    }

    #[tokio::test]
    async fn failed_replace_retains_prior_host() {
        let mut transformers = BTreeMap::new();
        transformers.insert(
            "temperature".to_string(),
            source("function transform(raw) { return { tag: 'v1' }; }"),
        );
        let registry = TransformerRegistry::build(&transformers).unwrap();

        let result = registry.replace("temperature", &source("var x = 1;")).await;
        assert!(result.is_err());

        let record = registry.transform("temperature", b"{}").await.unwrap();
        assert_eq!(record["tag"], "v1");
    }
}
