// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Structured error kinds for the gateway.
//!
//! Each variant corresponds to one of the named error kinds the pipeline can
//! produce. Startup-fatal variants propagate to `main` via `anyhow`; per-message
//! variants are caught and logged by the dispatcher and never propagate further.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("script compile failed for device type {device_type}: {source}")]
    ScriptCompile {
        device_type: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("transformer for device type {0} does not expose a callable `transform`")]
    MissingTransformFunction(String),

    #[error("no transformer registered for device type {0}")]
    NoTransformerForType(String),

    #[error("script invocation failed for device type {device_type}: {source}")]
    ScriptInvocation {
        device_type: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("script result was not a mapping for device type {0}")]
    BadScriptResult(String),

    #[error("script reported an error: {0}")]
    ScriptReportedError(String),

    #[error("sink bootstrap failed for {tag}: {source}")]
    SinkBootstrap {
        tag: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("sink store failed for {tag}: {source}")]
    SinkStore {
        tag: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("broker connect failed: {0}")]
    BrokerConnect(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
