//! Persisted user records.
//!
//! The file holds one record per line: `username|password_hash|friend1;friend2;...`.
//! It is read fully at startup and rewritten fully at shutdown; there is no incremental
//! durability.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::state::UserRecord;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed user record on line {line}: {reason}")]
    Malformed { line: usize, reason: &'static str },
}

/// Load/persist contract for the user registry.
pub trait UserStore: Send + Sync {
    fn load(&self) -> Result<Vec<UserRecord>, StoreError>;
    fn persist(&self, records: &[UserRecord]) -> Result<(), StoreError>;
}

pub struct FileUserStore {
    path: PathBuf,
}

impl FileUserStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UserStore for FileUserStore {
    /// A missing file is an empty registry.
    fn load(&self) -> Result<Vec<UserRecord>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| parse_record(line, idx + 1))
            .collect()
    }

    /// Write to a sibling temp file, then rename over the original.
    fn persist(&self, records: &[UserRecord]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut out = String::new();
        for rec in records {
            out.push_str(&format_record(rec));
            out.push('\n');
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, out)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

pub fn parse_record(line: &str, line_no: usize) -> Result<UserRecord, StoreError> {
    let mut parts = line.trim_end_matches('\r').splitn(3, '|');
    let username = parts.next().unwrap_or("");
    let password_hash = parts.next().ok_or(StoreError::Malformed {
        line: line_no,
        reason: "missing password field",
    })?;
    if username.is_empty() {
        return Err(StoreError::Malformed {
            line: line_no,
            reason: "empty username",
        });
    }

    let mut rec = UserRecord::new(username, password_hash);
    if let Some(friends) = parts.next() {
        rec.friends = friends
            .split(';')
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
    }
    Ok(rec)
}

pub fn format_record(rec: &UserRecord) -> String {
    let friends: Vec<&str> = rec.friends.iter().map(String::as_str).collect();
    format!("{}|{}|{}", rec.username, rec.password_hash, friends.join(";"))
}
