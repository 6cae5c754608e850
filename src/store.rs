use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::Local;

use crate::{error::StoreError, history::Transcript};

pub const DEFAULT_FILE_NAME: &str = "chat_history.json";
pub const DEFAULT_BACKUP_DIR: &str = "backup";

/// Durable home of a single transcript file plus its backup directory.
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    path: PathBuf,
    backup_dir: PathBuf,
    role_prompt: String,
}

impl TranscriptStore {
    /// Backups default to a `backup/` directory next to `path`.
    pub fn new(path: impl Into<PathBuf>, role_prompt: impl Into<String>) -> Self {
        let path = path.into();
        let backup_dir = path
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(DEFAULT_BACKUP_DIR);

        Self {
            path,
            backup_dir,
            role_prompt: role_prompt.into(),
        }
    }

    pub fn with_backup_dir(mut self, backup_dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = backup_dir.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn role_prompt(&self) -> &str {
        &self.role_prompt
    }

    pub fn default_transcript(&self) -> Transcript {
        Transcript::with_role_prompt(self.role_prompt.clone())
    }

    /// Never fails: a missing, unreadable, malformed or empty file yields the default transcript.
    pub fn load(&self) -> Transcript {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no transcript yet, starting fresh");
                return self.default_transcript();
            }
            Err(error) => {
                tracing::warn!(path = %self.path.display(), %error, "could not read transcript, starting fresh");
                return self.default_transcript();
            }
        };

        match serde_json::from_str::<Transcript>(&raw) {
            Ok(transcript) if !transcript.is_empty() => {
                tracing::debug!(entries = transcript.len(), "loaded transcript");
                transcript
            }
            Ok(_) => self.default_transcript(),
            Err(error) => {
                tracing::warn!(path = %self.path.display(), %error, "malformed transcript, starting fresh");
                self.default_transcript()
            }
        }
    }

    /// Overwrites the canonical file with the whole transcript via a temp file and rename.
    pub fn save(&self, transcript: &Transcript) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(transcript)?;
        ensure_parent_dir(&self.path)?;

        let tmp = self.tmp_path();
        fs::write(&tmp, json).map_err(|error| StoreError::io(&tmp, error))?;
        fs::rename(&tmp, &self.path).map_err(|error| StoreError::io(&self.path, error))?;

        tracing::info!(path = %self.path.display(), entries = transcript.len(), "saved transcript");
        Ok(())
    }

    /// Copies the canonical file into the backup directory. `None` when there is nothing to copy.
    pub fn backup(&self) -> Result<Option<PathBuf>, StoreError> {
        if !self.path.is_file() {
            return Ok(None);
        }

        fs::create_dir_all(&self.backup_dir)
            .map_err(|error| StoreError::io(&self.backup_dir, error))?;

        let target = self.next_backup_path();
        fs::copy(&self.path, &target).map_err(|error| StoreError::io(&target, error))?;

        tracing::info!(backup = %target.display(), "backed up transcript");
        Ok(Some(target))
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string())
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_file_name(format!("{}.tmp", self.file_name()))
    }

    fn next_backup_path(&self) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let base = format!("{}.backup.{stamp}", self.file_name());

        let mut candidate = self.backup_dir.join(&base);
        let mut attempt = 1;
        while candidate.exists() {
            candidate = self.backup_dir.join(format!("{base}_{attempt}"));
            attempt += 1;
        }
        candidate
    }
}

fn ensure_parent_dir(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|error| StoreError::io(parent, error))?;
        }
    }
    Ok(())
}
