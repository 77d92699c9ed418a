// Single-slot file mailboxes
// Writes go to a temp sibling then atomic-rename into place, so a reader
// never observes a half-written message. The command slot is consumed
// destructively (read then delete) so a command is handled at most once.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::messages::{Command, Status};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Freshness of the status slot, judged by file modification time
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelHealth {
    /// Status file exists and was written within the grace window
    Live,

    /// Status file exists but has not been touched for longer than the
    /// grace window; the coordinator is presumed unreachable
    Stale,

    /// Status file does not exist (coordinator never started, or cleaned up)
    Missing,
}

/// Write a JSON value to `path` via temp-file + rename
fn write_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), ChannelError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, serde_json::to_vec(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// The command slot: controller posts, host bridge takes
pub struct CommandMailbox {
    path: PathBuf,
}

impl CommandMailbox {
    pub fn new(path: PathBuf) -> Self {
        CommandMailbox { path }
    }

    /// Post a command, silently replacing any unread predecessor
    pub fn post(&self, command: &Command) -> Result<(), ChannelError> {
        write_atomic(&self.path, command)?;
        log::debug!("Posted command: {:?}", command);
        Ok(())
    }

    /// Consume the pending command, if any
    /// The slot file is deleted before this returns, whether or not the
    /// contents parsed; a malformed message is logged and dropped
    pub fn take(&self) -> Result<Option<Command>, ChannelError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // Delete first so a bad message can never be reprocessed
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }

        match serde_json::from_str::<Command>(&contents) {
            Ok(command) => Ok(Some(command)),
            Err(e) => {
                log::warn!("Discarding malformed command: {}", e);
                Ok(None)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The status slot: host bridge publishes, controller reads
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: PathBuf) -> Self {
        StatusFile { path }
    }

    /// Overwrite the slot with the latest status
    pub fn publish(&self, status: &Status) -> Result<(), ChannelError> {
        write_atomic(&self.path, status)
    }

    /// Read the latest status; malformed contents are logged and dropped
    /// (the file is left in place for the next write to replace)
    pub fn read(&self) -> Result<Option<Status>, ChannelError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Status>(&contents) {
            Ok(status) => Ok(Some(status)),
            Err(e) => {
                log::warn!("Discarding malformed status: {}", e);
                Ok(None)
            }
        }
    }

    /// Judge freshness from the file's modification time against `now`
    pub fn health(&self, now: DateTime<Utc>, grace_secs: i64) -> ChannelHealth {
        let modified = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => return ChannelHealth::Missing,
        };

        let modified: DateTime<Utc> = modified.into();
        let age = now.signed_duration_since(modified);
        if age.num_seconds() > grace_secs {
            ChannelHealth::Stale
        } else {
            ChannelHealth::Live
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
