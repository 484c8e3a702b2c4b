//! Centralized configuration for Piecestream.
//!
//! All tunable parameters of the demuxer are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::PieceStreamError;

/// Default number of pieces kept in flight ahead of each stream's position.
pub const DEFAULT_WINDOW: u32 = 3;

/// Default timeout of a single wait on the engine's event source.
pub const DEFAULT_EVENT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Which files of the archive become output streams.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPolicy {
    /// Every file is streamed
    #[default]
    All,
    /// Only the largest file is streamed
    Largest,
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(SelectionPolicy::All),
            "largest" => Ok(SelectionPolicy::Largest),
            _ => Err(format!("Invalid selection policy: {s}")),
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionPolicy::All => write!(f, "all"),
            SelectionPolicy::Largest => write!(f, "largest"),
        }
    }
}

/// Central configuration for the demuxer.
///
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone)]
pub struct DemuxConfig {
    /// Which files become streams once the content geometry is known
    pub selection: SelectionPolicy,
    /// Pieces requested at maximum priority ahead of the playback position
    pub window: u32,
    /// Sniff the first delivered bytes before opening a stream's port
    pub typefind: bool,
    /// Upper bound of a single blocking wait on the engine's events
    pub event_poll_timeout: Duration,
    pub storage: StorageConfig,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            selection: SelectionPolicy::All,
            window: DEFAULT_WINDOW,
            typefind: false,
            event_poll_timeout: DEFAULT_EVENT_POLL_TIMEOUT,
            storage: StorageConfig::default(),
        }
    }
}

/// Temporary storage handed to the engine for downloaded pieces.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory the engine writes partial content to
    pub temp_path: PathBuf,
    /// Whether the engine deletes its files when the content is released
    pub delete_on_teardown: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            temp_path: std::env::temp_dir().join("piecestream"),
            delete_on_teardown: true,
        }
    }
}

impl DemuxConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(selection) = std::env::var("PIECESTREAM_SELECTION")
            && let Ok(policy) = selection.parse::<SelectionPolicy>()
        {
            config.selection = policy;
        }

        if let Ok(window) = std::env::var("PIECESTREAM_WINDOW")
            && let Ok(pieces) = window.parse::<u32>()
        {
            config.window = pieces;
        }

        if let Ok(typefind) = std::env::var("PIECESTREAM_TYPEFIND") {
            config.typefind = typefind.parse().unwrap_or(config.typefind);
        }

        if let Ok(path) = std::env::var("PIECESTREAM_TEMP_PATH") {
            config.storage.temp_path = PathBuf::from(path);
        }

        if let Ok(keep) = std::env::var("PIECESTREAM_KEEP_TEMP")
            && let Ok(keep) = keep.parse::<bool>()
        {
            config.storage.delete_on_teardown = !keep;
        }

        config
    }

    /// Sets the selection policy.
    pub fn with_selection(mut self, selection: SelectionPolicy) -> Self {
        self.selection = selection;
        self
    }

    /// Sets the sliding window size.
    pub fn with_window(mut self, window: u32) -> Self {
        self.window = window;
        self
    }

    /// Enables or disables content sniffing before port activation.
    pub fn with_typefind(mut self, typefind: bool) -> Self {
        self.typefind = typefind;
        self
    }

    /// Sets the engine event poll timeout.
    pub fn with_event_poll_timeout(mut self, timeout: Duration) -> Self {
        self.event_poll_timeout = timeout;
        self
    }

    /// Sets the temporary storage location and cleanup behavior.
    pub fn with_storage(mut self, temp_path: impl Into<PathBuf>, delete_on_teardown: bool) -> Self {
        self.storage = StorageConfig {
            temp_path: temp_path.into(),
            delete_on_teardown,
        };
        self
    }

    /// Checks that the configuration can drive a demuxer.
    ///
    /// # Errors
    ///
    /// - `PieceStreamError::Configuration` - If the window is zero or the poll timeout is zero
    pub fn validate(&self) -> Result<(), PieceStreamError> {
        if self.window == 0 {
            return Err(PieceStreamError::Configuration {
                reason: "window must hold at least one piece".to_string(),
            });
        }
        if self.event_poll_timeout.is_zero() {
            return Err(PieceStreamError::Configuration {
                reason: "event poll timeout must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}
