//! Output writing every port into a file under an output directory.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use parking_lot::Mutex;
use piecestream_core::demux::DemuxError;
use piecestream_core::output::{Output, PortInfo, PushError};
use tokio::sync::Notify;
use tracing::{error, info, warn};

struct PortFile {
    path: PathBuf,
    file: Option<File>,
    written: u64,
    ended: bool,
}

#[derive(Default)]
struct FileOutputState {
    ports: HashMap<usize, PortFile>,
    settled: bool,
    failure: Option<String>,
    last_buffering: Option<u8>,
}

/// Summary of one port after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSummary {
    pub port: usize,
    pub path: PathBuf,
    pub written: u64,
    pub ended: bool,
}

/// Writes delivered bytes to `<out_dir>/<file path>`.
pub struct FileOutput {
    out_dir: PathBuf,
    state: Mutex<FileOutputState>,
    changed: Notify,
}

impl FileOutput {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            state: Mutex::new(FileOutputState::default()),
            changed: Notify::new(),
        }
    }

    /// Resolves when ports end, settle or fail.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }

    /// Whether every port ended after the topology settled, or the run failed.
    pub fn is_finished(&self) -> bool {
        let state = self.state.lock();
        state.failure.is_some()
            || (state.settled && state.ports.values().all(|port| port.ended))
    }

    /// Fatal subsystem error reported during the run.
    pub fn failure(&self) -> Option<String> {
        self.state.lock().failure.clone()
    }

    pub fn summary(&self) -> Vec<PortSummary> {
        let state = self.state.lock();
        let mut ports: Vec<PortSummary> = state
            .ports
            .iter()
            .map(|(&port, file)| PortSummary {
                port,
                path: file.path.clone(),
                written: file.written,
                ended: file.ended,
            })
            .collect();
        ports.sort_by_key(|summary| summary.port);
        ports
    }

    fn target_path(&self, name: &str) -> PathBuf {
        let relative: PathBuf = Path::new(name)
            .components()
            .filter(|component| matches!(component, Component::Normal(_)))
            .collect();
        if relative.as_os_str().is_empty() {
            self.out_dir.join("unnamed")
        } else {
            self.out_dir.join(relative)
        }
    }
}

impl Output for FileOutput {
    fn port_added(&self, port: usize, info: PortInfo) {
        let path = self.target_path(&info.name);
        match info.content_type {
            Some(content_type) => {
                info!(port, path = %path.display(), %content_type, size = info.size, "Port added");
            }
            None => info!(port, path = %path.display(), size = info.size, "Port added"),
        }
        self.state.lock().ports.insert(
            port,
            PortFile {
                path,
                file: None,
                written: 0,
                ended: false,
            },
        );
    }

    fn port_removed(&self, port: usize) {
        if let Some(port_file) = self.state.lock().ports.get_mut(&port) {
            port_file.file = None;
        }
    }

    fn announce_range(&self, port: usize, start: u64, end: u64) {
        let mut state = self.state.lock();
        let Some(port_file) = state.ports.get_mut(&port) else {
            warn!(port, "Range announced on unknown port");
            return;
        };
        let opened = port_file
            .path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| {
                OpenOptions::new()
                    .create(true)
                    .truncate(false)
                    .write(true)
                    .open(&port_file.path)
            })
            .and_then(|mut file| file.seek(SeekFrom::Start(start)).map(|_| file));
        match opened {
            Ok(file) => {
                info!(port, start, end, "Writing range");
                port_file.file = Some(file);
                port_file.ended = false;
            }
            Err(e) => {
                error!(port, path = %port_file.path.display(), "Cannot open output: {e}");
                port_file.file = None;
            }
        }
    }

    fn push(&self, port: usize, data: Bytes) -> Result<(), PushError> {
        let mut state = self.state.lock();
        let port_file = state.ports.get_mut(&port).ok_or(PushError::NotLinked)?;
        let file = port_file.file.as_mut().ok_or(PushError::NotLinked)?;
        file.write_all(&data)
            .map_err(|e| PushError::Fatal(e.to_string()))?;
        port_file.written += data.len() as u64;
        Ok(())
    }

    fn end_of_stream(&self, port: usize) {
        let mut state = self.state.lock();
        if let Some(port_file) = state.ports.get_mut(&port) {
            if let Some(mut file) = port_file.file.take()
                && let Err(e) = file.flush()
            {
                warn!(port, "Flushing output failed: {e}");
            }
            port_file.ended = true;
            info!(port, written = port_file.written, "End of stream");
        }
        drop(state);
        self.changed.notify_one();
    }

    fn no_more_ports(&self) {
        self.state.lock().settled = true;
        self.changed.notify_one();
    }

    fn buffering(&self, percent: u8) {
        let mut state = self.state.lock();
        if state.last_buffering != Some(percent) {
            state.last_buffering = Some(percent);
            println!("Buffering {percent}%");
        }
    }

    fn error(&self, error: DemuxError) {
        error!("{error}");
        if !matches!(error, DemuxError::StreamFlow { .. }) {
            self.state.lock().failure = Some(error.to_string());
        }
        self.changed.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            size: 10,
            content_type: None,
        }
    }

    #[test]
    fn test_writes_ranges_at_their_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let output = FileOutput::new(dir.path());
        output.port_added(0, info("movie/a.bin"));
        output.announce_range(0, 0, 4);
        output.push(0, Bytes::from_static(b"abcd")).unwrap();
        output.announce_range(0, 2, 4);
        output.push(0, Bytes::from_static(b"XY")).unwrap();
        output.end_of_stream(0);
        output.no_more_ports();

        let written = std::fs::read(dir.path().join("movie/a.bin")).unwrap();
        assert_eq!(written, b"abXY");
        assert!(output.is_finished());
        assert_eq!(output.summary()[0].written, 6);
    }

    #[test]
    fn test_paths_stay_inside_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        let output = FileOutput::new(dir.path());
        assert_eq!(
            output.target_path("../../etc/passwd"),
            dir.path().join("etc/passwd")
        );
        assert_eq!(output.target_path("/"), dir.path().join("unnamed"));
    }

    #[test]
    fn test_push_without_range_is_not_linked() {
        let dir = tempfile::tempdir().unwrap();
        let output = FileOutput::new(dir.path());
        assert_eq!(
            output.push(3, Bytes::from_static(b"x")),
            Err(PushError::NotLinked)
        );
        output.port_added(3, info("c.bin"));
        assert_eq!(
            output.push(3, Bytes::from_static(b"x")),
            Err(PushError::NotLinked)
        );
    }

    #[test]
    fn test_add_failure_finishes_run() {
        let output = FileOutput::new("unused");
        assert!(!output.is_finished());
        output.error(DemuxError::AddContent {
            reason: "bad manifest".to_string(),
        });
        assert!(output.is_finished());
        assert_eq!(
            output.failure().as_deref(),
            Some("Failed to add content: bad manifest")
        );
    }
}
