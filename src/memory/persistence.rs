//! On-disk session logs.
//!
//! # Layout
//! ```text
//! <dir>/
//!     current              id of the current session
//!     <session_id>.jsonl   one JSON-encoded Message per line, append-only
//! ```
//!
//! # Design Decisions
//! - Append-only; archiving a session never rewrites its file
//! - Blank lines are skipped; a torn final record is dropped and trimmed on load

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::memory::types::{Message, MemoryError, MemoryResult, SessionId};

const CURRENT_FILE: &str = "current";
const LOG_EXTENSION: &str = "jsonl";

/// A session read back from disk.
#[derive(Debug, Clone)]
pub struct StoredSession {
    pub id: SessionId,
    pub messages: Vec<Message>,
}

/// Directory of append-only session logs.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Open (creating if needed) the store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> MemoryResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|source| io_error("creating session directory", &dir, source))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn log_path(&self, session: &SessionId) -> PathBuf {
        self.dir.join(format!("{}.{}", session.as_str(), LOG_EXTENSION))
    }

    /// Create the (empty) log for a new session.
    pub fn create_session(&self, session: &SessionId) -> MemoryResult<()> {
        let path = self.log_path(session);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| io_error("creating session log", &path, source))?;
        Ok(())
    }

    /// Append one message to a session log.
    pub fn append(&self, session: &SessionId, message: &Message) -> MemoryResult<()> {
        let path = self.log_path(session);
        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| io_error("opening session log for append", &path, source))?;
        file.write_all(line.as_bytes())
            .map_err(|source| io_error("appending to session log", &path, source))?;
        Ok(())
    }

    /// Read one session log.
    ///
    /// An unparsable final record is a write torn by a crash: it is logged,
    /// dropped, and cut from the file so later appends start on a clean line.
    /// Damage anywhere else is [`MemoryError::Corrupt`].
    pub fn load_session(&self, session: &SessionId) -> MemoryResult<Vec<Message>> {
        let path = self.log_path(session);
        let raw =
            fs::read(&path).map_err(|source| io_error("reading session log", &path, source))?;

        let lines: Vec<(usize, &[u8])> = raw
            .split_inclusive(|b| *b == b'\n')
            .scan(0usize, |offset, line| {
                let start = *offset;
                *offset += line.len();
                Some((start, line))
            })
            .collect();
        let last_record = lines.iter().rposition(|(_, line)| !is_blank(line));

        let mut messages = Vec::new();
        for (index, &(offset, line)) in lines.iter().enumerate() {
            if is_blank(line) {
                continue;
            }
            match serde_json::from_slice(line) {
                Ok(message) => messages.push(message),
                Err(source) if Some(index) == last_record => {
                    tracing::warn!(
                        path = %path.display(),
                        line = index + 1,
                        error = %source,
                        "Dropping torn final record from session log"
                    );
                    self.truncate(&path, offset as u64);
                }
                Err(source) => {
                    return Err(MemoryError::Corrupt {
                        path: path.clone(),
                        line: index + 1,
                        source,
                    })
                }
            }
        }
        Ok(messages)
    }

    fn truncate(&self, path: &Path, len: u64) {
        let result = OpenOptions::new()
            .write(true)
            .open(path)
            .and_then(|file| file.set_len(len));
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "Failed to trim session log");
        }
    }

    /// Read every session log in the directory.
    pub fn load_all(&self) -> MemoryResult<Vec<StoredSession>> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|source| io_error("listing session directory", &self.dir, source))?;

        let mut sessions = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|source| io_error("listing session directory", &self.dir, source))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let id = SessionId::from(stem);
            let messages = self.load_session(&id)?;
            sessions.push(StoredSession { id, messages });
        }
        Ok(sessions)
    }

    /// Id recorded as current, if any.
    pub fn read_current(&self) -> MemoryResult<Option<SessionId>> {
        let path = self.dir.join(CURRENT_FILE);
        match fs::read_to_string(&path) {
            Ok(raw) => {
                let id = raw.trim();
                Ok((!id.is_empty()).then(|| SessionId::from(id)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(io_error("reading current session pointer", &path, source)),
        }
    }

    /// Record `session` as current.
    pub fn write_current(&self, session: &SessionId) -> MemoryResult<()> {
        let path = self.dir.join(CURRENT_FILE);
        let tmp = self.dir.join(format!("{}.tmp", CURRENT_FILE));
        fs::write(&tmp, session.as_str())
            .map_err(|source| io_error("writing current session pointer", &tmp, source))?;
        fs::rename(&tmp, &path)
            .map_err(|source| io_error("replacing current session pointer", &path, source))?;
        Ok(())
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

fn io_error(operation: &'static str, path: &Path, source: std::io::Error) -> MemoryError {
    MemoryError::Io {
        operation,
        path: path.to_path_buf(),
        source,
    }
}
