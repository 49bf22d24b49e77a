// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Script Runtime Host: one isolated `boa_engine` VM per device type, with a
//! small host API injected before the script source is evaluated.
//!
//! `boa_engine::Context` is not `Send` (its garbage collector is built on
//! thread-local bookkeeping), so a Host cannot simply live behind an async
//! `Mutex` shared across `tokio` worker threads. Instead each Host owns a
//! dedicated OS thread that is the VM's only caller for its entire lifetime;
//! `invoke` sends a request down a channel and waits for the response. This
//! gives the "per-VM single-threaded invariant" from the concurrency model
//! for free — the channel itself serializes calls — and keeps `ScriptHost`
//! trivially `Send + Sync` since all it holds is a channel handle.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use boa_engine::object::builtins::JsArray;
use boa_engine::object::FunctionObjectBuilder;
use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsArgs, JsResult, JsValue, NativeFunction, Source};

use crate::config::TransformerSource;
use crate::error::GatewayError;

struct InvokeRequest {
    raw: Vec<u8>,
    respond_to: std_mpsc::Sender<Result<serde_json::Value, GatewayError>>,
}

/// Handle to one isolated scripting VM, running on its own thread.
pub struct ScriptHost {
    device_type: String,
    request_tx: std_mpsc::Sender<InvokeRequest>,
    _thread: JoinHandle<()>,
}

impl ScriptHost {
    /// Spawn the VM's dedicated thread, evaluate the source there, and
    /// verify a callable `transform` exists before returning. Construction
    /// failures (compile error, missing `transform`) are reported back
    /// across a one-shot readiness channel so the caller sees them
    /// synchronously, exactly as if construction were local.
    pub fn build(device_type: &str, source: &TransformerSource) -> Result<Self, GatewayError> {
        let device_type_owned = device_type.to_string();
        let source_owned = source.clone();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), GatewayError>>();
        let (request_tx, request_rx) = std_mpsc::channel::<InvokeRequest>();

        let thread = std::thread::Builder::new()
            .name(format!("script-vm-{device_type_owned}"))
            .spawn(move || run_vm_thread(device_type_owned, source_owned, ready_tx, request_rx))
            .expect("failed to spawn script VM thread");

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                device_type: device_type.to_string(),
                request_tx,
                _thread: thread,
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(GatewayError::ScriptCompile {
                device_type: device_type.to_string(),
                source: anyhow::anyhow!("script VM thread exited before reporting readiness"),
            }),
        }
    }

    /// Invoke `transform(raw_as_utf8_string)` on the VM's dedicated thread
    /// and return its result as a `serde_json::Value`.
    pub async fn invoke(&self, raw: &[u8]) -> Result<serde_json::Value, GatewayError> {
        let (respond_to, response_rx) = std_mpsc::channel();
        let request = InvokeRequest {
            raw: raw.to_vec(),
            respond_to,
        };

        self.request_tx.send(request).map_err(|_| GatewayError::ScriptInvocation {
            device_type: self.device_type.clone(),
            source: anyhow::anyhow!("script VM thread is no longer running"),
        })?;

        tokio::task::spawn_blocking(move || response_rx.recv())
            .await
            .map_err(|err| GatewayError::ScriptInvocation {
                device_type: self.device_type.clone(),
                source: anyhow::anyhow!(err),
            })?
            .map_err(|_| GatewayError::ScriptInvocation {
                device_type: self.device_type.clone(),
                source: anyhow::anyhow!("script VM thread dropped the response channel"),
            })?
    }
}

fn run_vm_thread(
    device_type: String,
    source: TransformerSource,
    ready_tx: std_mpsc::Sender<Result<(), GatewayError>>,
    request_rx: std_mpsc::Receiver<InvokeRequest>,
) {
    let mut context = Context::default();

    let setup: Result<(), GatewayError> = (|| {
        register_host_api(&mut context).map_err(|err| GatewayError::ScriptCompile {
            device_type: device_type.clone(),
            source: anyhow::anyhow!(err.to_string()),
        })?;

        let code = match &source {
            TransformerSource::Inline(code) => code.clone(),
            TransformerSource::Path(path) => {
                std::fs::read_to_string(path).map_err(|err| GatewayError::ScriptCompile {
                    device_type: device_type.clone(),
                    source: anyhow::anyhow!(err),
                })?
            }
        };

        context
            .eval(Source::from_bytes(code.as_bytes()))
            .map_err(|err| GatewayError::ScriptCompile {
                device_type: device_type.clone(),
                source: anyhow::anyhow!(err.to_string()),
            })?;

        let transform = context
            .global_object()
            .get(js_string!("transform"), &mut context)
            .map_err(|err| GatewayError::ScriptCompile {
                device_type: device_type.clone(),
                source: anyhow::anyhow!(err.to_string()),
            })?;
        if !transform.is_callable() {
            return Err(GatewayError::MissingTransformFunction(device_type.clone()));
        }
        Ok(())
    })();

    if let Err(err) = setup {
        let _ = ready_tx.send(Err(err));
        return;
    }
    if ready_tx.send(Ok(())).is_err() {
        return;
    }

    while let Ok(request) = request_rx.recv() {
        let result = invoke_transform(&mut context, &device_type, &request.raw);
        let _ = request.respond_to.send(result);
    }
}

fn invoke_transform(
    context: &mut Context,
    device_type: &str,
    raw: &[u8],
) -> Result<serde_json::Value, GatewayError> {
    let raw_str = String::from_utf8_lossy(raw).into_owned();

    let transform = context
        .global_object()
        .get(js_string!("transform"), context)
        .map_err(|err| GatewayError::ScriptInvocation {
            device_type: device_type.to_string(),
            source: anyhow::anyhow!(err.to_string()),
        })?;

    let arg = JsValue::from(js_string!(raw_str));
    let result = transform
        .as_callable()
        .ok_or_else(|| GatewayError::MissingTransformFunction(device_type.to_string()))?
        .call(&JsValue::undefined(), &[arg], context)
        .map_err(|err| GatewayError::ScriptInvocation {
            device_type: device_type.to_string(),
            source: anyhow::anyhow!(err.to_string()),
        })?;

    js_value_to_json(&result, context).map_err(|err| GatewayError::ScriptInvocation {
        device_type: device_type.to_string(),
        source: anyhow::anyhow!(err.to_string()),
    })
}

fn register_host_api(context: &mut Context) -> JsResult<()> {
    register_fn(context, "log", 1, host_log)?;
    register_fn(context, "parseJSON", 1, host_parse_json)?;
    register_fn(context, "formatDate", 2, host_format_date)?;
    register_fn(context, "convertTemperature", 3, host_convert_temperature)?;
    register_fn(context, "validateRange", 3, host_validate_range)?;
    Ok(())
}

fn register_fn(
    context: &mut Context,
    name: &str,
    length: usize,
    f: fn(&JsValue, &[JsValue], &mut Context) -> JsResult<JsValue>,
) -> JsResult<()> {
    let function = FunctionObjectBuilder::new(context.realm(), NativeFunction::from_fn_ptr(f))
        .name(name)
        .length(length)
        .build();
    context.register_global_property(js_string!(name), function, Attribute::all())?;
    Ok(())
}

/// `log(msg: string)` — writes an info-level line tagged `[JS]`.
fn host_log(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let msg = args
        .get_or_undefined(0)
        .to_string(context)?
        .to_std_string_escaped();
    tracing::info!(target: "script", "[JS] {msg}");
    Ok(JsValue::undefined())
}

/// `parseJSON(s: string) -> any | null` — never throws; returns null and
/// logs a warning on malformed input.
fn host_parse_json(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let raw = args
        .get_or_undefined(0)
        .to_string(context)?
        .to_std_string_escaped();

    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(value) => json_to_js_value(&value, context),
        Err(err) => {
            tracing::warn!(error = %err, "parseJSON: malformed input, returning null");
            Ok(JsValue::null())
        }
    }
}

/// `formatDate(epochSeconds: int, format: string) -> string`. The argument is
/// seconds-since-epoch, unlike `DeviceRecord.timestamp` which is always
/// milliseconds-since-epoch — the two conventions are deliberately distinct
/// (see DESIGN.md's timestamp-convention decision) and callers must not mix
/// them up.
fn host_format_date(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    use chrono::{DateTime, Utc};

    let epoch_seconds = args.get_or_undefined(0).to_number(context)? as i64;
    let format_raw = args.get_or_undefined(1);
    let format = if format_raw.is_undefined() {
        String::new()
    } else {
        format_raw.to_string(context)?.to_std_string_escaped()
    };
    let format = if format.is_empty() {
        "%Y-%m-%d %H:%M:%S".to_string()
    } else {
        strftime_from_java_pattern(&format)
    };

    let dt = DateTime::<Utc>::from_timestamp(epoch_seconds, 0).unwrap_or_default();
    let formatted = dt.format(&format).to_string();
    Ok(JsValue::from(js_string!(formatted)))
}

/// Translates the spec's example pattern vocabulary (`YYYY`, `MM`, `DD`,
/// `HH`, `MM`, `SS`) into `chrono::format::strftime` directives, one token at
/// a time, left to right. `MM` is ambiguous on its own — the pattern reuses
/// it for both month and minute (`YYYY-MM-DD HH:MM:SS`) — so a single pass
/// tracks whether an `HH` token has already been seen: `MM` before the first
/// `HH` is month (`%m`), `MM` at or after it is minutes (`%M`). A chained
/// sequence of global `.replace()` calls cannot express this, since it has no
/// notion of position relative to other tokens in the same pattern.
fn strftime_from_java_pattern(pattern: &str) -> String {
    let mut result = String::with_capacity(pattern.len());
    let mut seen_hour = false;
    let mut rest = pattern;

    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("YYYY") {
            result.push_str("%Y");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("DD") {
            result.push_str("%d");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("HH") {
            result.push_str("%H");
            seen_hour = true;
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("SS") {
            result.push_str("%S");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("MM") {
            result.push_str(if seen_hour { "%M" } else { "%m" });
            rest = tail;
        } else {
            let ch = rest.chars().next().expect("rest is non-empty");
            result.push(ch);
            rest = &rest[ch.len_utf8()..];
        }
    }

    result
}

/// `convertTemperature(value, fromUnit, toUnit) -> number`.
fn host_convert_temperature(
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let value = args.get_or_undefined(0).to_number(context)?;
    let from_unit = args
        .get_or_undefined(1)
        .to_string(context)?
        .to_std_string_escaped()
        .to_uppercase();
    let to_unit = args
        .get_or_undefined(2)
        .to_string(context)?
        .to_std_string_escaped()
        .to_uppercase();

    let celsius = match from_unit.as_str() {
        "C" => value,
        "F" => (value - 32.0) * 5.0 / 9.0,
        "K" => value - 273.15,
        _ => return Ok(JsValue::from(value)),
    };

    let converted = match to_unit.as_str() {
        "C" => celsius,
        "F" => celsius * 9.0 / 5.0 + 32.0,
        "K" => celsius + 273.15,
        _ => celsius,
    };

    Ok(JsValue::from(converted))
}

/// `validateRange(value, min, max) -> bool`, inclusive bounds.
fn host_validate_range(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let value = args.get_or_undefined(0).to_number(context)?;
    let min = args.get_or_undefined(1).to_number(context)?;
    let max = args.get_or_undefined(2).to_number(context)?;
    Ok(JsValue::from(value >= min && value <= max))
}

fn json_to_js_value(value: &serde_json::Value, context: &mut Context) -> JsResult<JsValue> {
    match value {
        serde_json::Value::Null => Ok(JsValue::null()),
        serde_json::Value::Bool(b) => Ok(JsValue::from(*b)),
        serde_json::Value::Number(n) => Ok(JsValue::from(n.as_f64().unwrap_or(0.0))),
        serde_json::Value::String(s) => Ok(JsValue::from(js_string!(s.as_str()))),
        serde_json::Value::Array(items) => {
            let array = JsArray::new(context);
            for item in items {
                let js_item = json_to_js_value(item, context)?;
                array.push(js_item, context)?;
            }
            Ok(array.into())
        }
        serde_json::Value::Object(map) => {
            let object = boa_engine::object::JsObject::with_object_proto(context.intrinsics());
            for (key, val) in map {
                let js_val = json_to_js_value(val, context)?;
                object.set(js_string!(key.as_str()), js_val, false, context)?;
            }
            Ok(object.into())
        }
    }
}

fn js_value_to_json(value: &JsValue, context: &mut Context) -> JsResult<serde_json::Value> {
    match value {
        JsValue::Null | JsValue::Undefined => Ok(serde_json::Value::Null),
        JsValue::Boolean(b) => Ok(serde_json::Value::Bool(*b)),
        JsValue::Integer(i) => Ok(serde_json::Value::from(*i)),
        JsValue::Rational(n) => Ok(serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)),
        JsValue::String(s) => Ok(serde_json::Value::String(s.to_std_string_escaped())),
        JsValue::Object(obj) => {
            if obj.is_array() {
                let array = JsArray::from_object(obj.clone())?;
                let len = array.length(context)?;
                let mut items = Vec::with_capacity(len as usize);
                for i in 0..len {
                    let item = array.get(i, context)?;
                    items.push(js_value_to_json(&item, context)?);
                }
                Ok(serde_json::Value::Array(items))
            } else {
                let mut map = serde_json::Map::new();
                let keys = obj.own_property_keys(context)?;
                for key in keys {
                    if let Some(key_str) = key.as_string() {
                        let name = key_str.to_std_string_escaped();
                        let val = obj.get(key.clone(), context)?;
                        map.insert(name, js_value_to_json(&val, context)?);
                    }
                }
                Ok(serde_json::Value::Object(map))
            }
        }
        JsValue::BigInt(_) | JsValue::Symbol(_) => Ok(serde_json::Value::Null),
    }
}
