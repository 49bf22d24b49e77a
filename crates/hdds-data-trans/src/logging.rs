// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ambient logging stack: `tracing` + `tracing-subscriber`, with a hand-rolled
//! rotating file writer matching §6's rotation rule (byte-size threshold,
//! timestamp-suffixed rotated names, bounded backup count) and an explicit
//! `console: bool` tee rather than inferring "is this console" from the
//! writer's concrete type.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing_subscriber::EnvFilter;

use crate::config::{LogLevel, LoggerConfig};

const BYTES_PER_MB: u64 = 1024 * 1024;

struct RotationState {
    path: PathBuf,
    file: File,
    current_size: u64,
    max_size_bytes: u64,
    max_backups: u32,
    console: bool,
}

impl RotationState {
    fn open(path: PathBuf, max_size_bytes: u64, max_backups: u32, console: bool) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let current_size = file.metadata()?.len();
        Ok(Self {
            path,
            file,
            current_size,
            max_size_bytes,
            max_backups,
            console,
        })
    }

    fn maybe_rotate(&mut self) -> io::Result<()> {
        if self.current_size < self.max_size_bytes {
            return Ok(());
        }

        let stem = self.path.file_stem().unwrap_or_default().to_string_lossy().into_owned();
        let ext = self.path.extension().map(|e| e.to_string_lossy().into_owned());
        let timestamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
        let rotated_name = match &ext {
            Some(ext) => format!("{stem}.{timestamp}.{ext}"),
            None => format!("{stem}.{timestamp}"),
        };
        let rotated_path = self.path.with_file_name(rotated_name);
        std::fs::rename(&self.path, &rotated_path)?;

        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.current_size = 0;

        self.evict_old_backups(&ext)?;
        Ok(())
    }

    fn evict_old_backups(&self, ext: &Option<String>) -> io::Result<()> {
        let dir = self.path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        let stem = self.path.file_stem().unwrap_or_default().to_string_lossy().into_owned();

        let mut backups: Vec<(std::time::SystemTime, PathBuf)> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                let name = path.file_name()?.to_string_lossy().into_owned();
                let matches_ext = match ext {
                    Some(ext) => name.ends_with(&format!(".{ext}")) && name.starts_with(&format!("{stem}.")),
                    None => name.starts_with(&format!("{stem}.")),
                };
                if !matches_ext || path == self.path {
                    return None;
                }
                let mtime = entry.metadata().ok()?.modified().ok()?;
                Some((mtime, path))
            })
            .collect();

        if backups.len() as u32 <= self.max_backups {
            return Ok(());
        }

        backups.sort_by_key(|(mtime, _)| *mtime);
        let excess = backups.len() - self.max_backups as usize;
        for (_, path) in backups.into_iter().take(excess) {
            let _ = std::fs::remove_file(path);
        }
        Ok(())
    }
}

impl Write for RotationState {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.maybe_rotate()?;
        self.file.write_all(buf)?;
        self.current_size += buf.len() as u64;
        if self.console {
            io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.console {
            io::stdout().flush()?;
        }
        Ok(())
    }
}

/// `tracing_subscriber::fmt::MakeWriter` implementation backed by a shared
/// `RotationState`. Cheap to clone: all handles share the same underlying
/// file and rotation bookkeeping via the `Arc<Mutex<_>>`.
#[derive(Clone)]
struct RotatingFileWriter {
    state: Arc<Mutex<RotationState>>,
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.state.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RotatingFileWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn level_filter(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

/// Install the global `tracing` subscriber per `config`. When `file_path` is
/// set, logs go to the rotating file writer (tee'd to stdout when
/// `config.console` is true); otherwise logs always go to stdout regardless
/// of `console`, so startup never runs silently.
pub fn init_logging(config: &LoggerConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_filter(config.level)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &config.file_path {
        Some(path) => {
            let max_size_bytes = config.max_size_mb.saturating_mul(BYTES_PER_MB);
            let state = RotationState::open(
                PathBuf::from(path),
                max_size_bytes,
                config.max_backups,
                config.console,
            )?;
            let writer = RotatingFileWriter {
                state: Arc::new(Mutex::new(state)),
            };
            builder.with_writer(writer).with_ansi(false).init();
        }
        None => {
            builder.with_writer(io::stdout).init();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rotation_state_rotates_past_the_size_threshold() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gateway.log");
        let mut state = RotationState::open(path.clone(), 32, 3, false).unwrap();

        for i in 0..5 {
            state.write_all(format!("line number {i}\n").as_bytes()).unwrap();
        }
        state.flush().unwrap();

        assert!(path.exists());
        let siblings: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(siblings.len() > 1, "expected at least one rotated file");
    }

    #[test]
    fn rotation_caps_backup_count() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gateway.log");
        let mut state = RotationState::open(path.clone(), 16, 2, false).unwrap();

        for i in 0..50 {
            state.write_all(format!("line {i}\n").as_bytes()).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        state.flush().unwrap();

        let rotated_count = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path() != path)
            .count();
        assert!(rotated_count <= 2, "expected at most 2 retained backups, got {rotated_count}");
    }
}
