//! Durable queue of undelivered messages.
//!
//! The queue is a JSON-lines file, one [`QueueEntry`] per line:
//! - appends go straight to the end of the file and are synced
//! - updates and removals rewrite the whole file through a synced temp file
//!   that is renamed over the queue file
//! - a torn last line from a crash is skipped on load and compacted away,
//!   even when the cut falls inside a multi-byte character
//!
//! A fully drained queue is a zero-byte file. A missing file is an empty queue.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use alerter_proto::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{DaemonError, Result};

/// A message waiting for delivery, plus its retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Identifies the entry across rewrites and restarts.
    pub id: Uuid,
    /// The message to deliver.
    pub message: Message,
    /// Delivery attempts made so far.
    pub attempts: u32,
    /// When the entry was first queued.
    pub first_enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Wraps a message that has not been attempted yet.
    #[must_use]
    pub fn new(message: Message) -> Self {
        Self {
            id: Uuid::new_v4(),
            message,
            attempts: 0,
            first_enqueued_at: Utc::now(),
        }
    }
}

/// File-backed queue of [`QueueEntry`] values.
///
/// Keeps an in-memory copy of every entry so the file is only ever read at
/// startup. Not synchronized: exactly one owner may hold it.
#[derive(Debug)]
pub struct DurableQueue {
    path: PathBuf,
    entries: Vec<QueueEntry>,
}

impl DurableQueue {
    /// Opens the queue at `path`, loading every stored entry.
    ///
    /// Lines that cannot be parsed are logged and dropped, and the file is
    /// compacted so later appends start on a clean line.
    ///
    /// # Errors
    ///
    /// Returns `DaemonError::Persistence` if the file exists but cannot be
    /// read, or its directory cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        debug!(path = %path.display(), "loading queued messages");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| persistence("create queue directory", &e))?;
            }
        }

        let (entries, needs_compaction) = match File::open(&path) {
            Ok(file) => Self::read_entries(file)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no queue file, starting empty");
                (Vec::new(), false)
            }
            Err(e) => return Err(persistence("open queue file", &e)),
        };

        let queue = Self { path, entries };

        match queue.entries.len() {
            0 => debug!("there are no queued messages"),
            1 => warn!("there is 1 queued message"),
            n => warn!(count = n, "there are queued messages"),
        }

        if needs_compaction {
            info!("compacting queue file after skipping unreadable records");
            queue.rewrite()?;
        }

        Ok(queue)
    }

    fn read_entries(file: File) -> Result<(Vec<QueueEntry>, bool)> {
        let mut entries: Vec<QueueEntry> = Vec::new();
        let mut skipped = false;

        for (index, line) in BufReader::new(file).split(b'\n').enumerate() {
            let line = line.map_err(|e| persistence("read queue file", &e))?;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            // Invalid UTF-8 surfaces here as a parse error, not an I/O error.
            match serde_json::from_slice::<QueueEntry>(&line) {
                Ok(entry) => {
                    // A later record for the same id supersedes the earlier one.
                    if let Some(existing) = entries.iter_mut().find(|e| e.id == entry.id) {
                        *existing = entry;
                        skipped = true;
                    } else {
                        entries.push(entry);
                    }
                }
                Err(e) => {
                    error!(line = index + 1, error = %e, "failed to load queued message");
                    skipped = true;
                }
            }
        }

        Ok((entries, skipped))
    }

    /// Returns the queue file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns all entries in queue order.
    #[must_use]
    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if an entry with this id is queued.
    #[must_use]
    pub fn contains(&self, id: Uuid) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Appends an entry. An entry whose id is already queued is updated
    /// in place instead.
    ///
    /// The entry is kept in memory even if the write fails.
    ///
    /// # Errors
    ///
    /// Returns `DaemonError::Persistence` if the record cannot be written.
    pub fn append(&mut self, entry: QueueEntry) -> Result<()> {
        if self.contains(entry.id) {
            return self.update(entry);
        }

        let line = encode_line(&entry)?;
        self.entries.push(entry);

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| persistence("open queue file", &e))?;
        // A failed earlier write can leave a partial record behind; start a
        // fresh line so this one stays readable.
        if ends_mid_line(&mut file).map_err(|e| persistence("inspect queue file", &e))? {
            warn!("queue file ends in a partial record, starting a new line");
            file.write_all(b"\n")
                .map_err(|e| persistence("append to queue file", &e))?;
        }
        file.write_all(line.as_bytes())
            .map_err(|e| persistence("append to queue file", &e))?;
        file.sync_data()
            .map_err(|e| persistence("sync queue file", &e))?;

        debug!(queued = self.entries.len(), "queued message");
        Ok(())
    }

    /// Replaces the stored entry with the same id.
    ///
    /// # Errors
    ///
    /// Returns `DaemonError::Persistence` if the id is unknown or the file
    /// cannot be rewritten.
    pub fn update(&mut self, entry: QueueEntry) -> Result<()> {
        let slot = self
            .entries
            .iter_mut()
            .find(|e| e.id == entry.id)
            .ok_or_else(|| DaemonError::Persistence(format!("entry {} is not queued", entry.id)))?;
        *slot = entry;
        self.rewrite()
    }

    /// Removes an entry. Returns whether it was queued.
    ///
    /// # Errors
    ///
    /// Returns `DaemonError::Persistence` if the file cannot be rewritten.
    /// The entry is gone from memory either way; the file keeps it, so it
    /// will be delivered again after a restart.
    pub fn remove(&mut self, id: Uuid) -> Result<bool> {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        if self.entries.len() == before {
            return Ok(false);
        }

        self.rewrite()?;
        match self.entries.len() {
            0 => info!("clearing stored message queue"),
            n => debug!(queued = n, "removed delivered message"),
        }
        Ok(true)
    }

    /// Writes every entry to a temp file and renames it over the queue file.
    fn rewrite(&self) -> Result<()> {
        let tmp_path = self.tmp_path();

        let file = File::create(&tmp_path).map_err(|e| persistence("create temp queue file", &e))?;
        let mut writer = BufWriter::new(file);
        for entry in &self.entries {
            let line = encode_line(entry)?;
            writer
                .write_all(line.as_bytes())
                .map_err(|e| persistence("write temp queue file", &e))?;
        }
        let file = writer
            .into_inner()
            .map_err(|e| persistence("flush temp queue file", e.error()))?;
        file.sync_all()
            .map_err(|e| persistence("sync temp queue file", &e))?;

        fs::rename(&tmp_path, &self.path).map_err(|e| persistence("replace queue file", &e))?;
        self.sync_dir();
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_else(|| "queue".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    // Makes the rename itself durable. Best effort: not every platform
    // allows opening a directory.
    fn sync_dir(&self) {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        if let Ok(handle) = File::open(dir) {
            if let Err(e) = handle.sync_all() {
                debug!(error = %e, "failed to sync queue directory");
            }
        }
    }
}

fn ends_mid_line(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

fn encode_line(entry: &QueueEntry) -> Result<String> {
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');
    Ok(line)
}

fn persistence(action: &str, err: &std::io::Error) -> DaemonError {
    DaemonError::Persistence(format!("{action}: {err}"))
}
