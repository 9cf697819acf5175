//! Append-only JSONL file per instance

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::entry::LinkLogEntry;

/// Appends entries to `<logs_dir>/raw/<date>_<instance>.jsonl`
pub struct InstanceLogWriter {
    instance: String,
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl InstanceLogWriter {
    /// Open (or create) today's file for `instance`
    pub fn new(logs_dir: impl AsRef<Path>, instance: impl Into<String>) -> std::io::Result<Self> {
        let instance = instance.into();
        let raw_dir = logs_dir.as_ref().join("raw");
        fs::create_dir_all(&raw_dir)?;

        let date = chrono::Local::now().format("%Y-%m-%d");
        let path = raw_dir.join(format!("{}_{}.jsonl", date, instance));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            instance,
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry as a single line
    pub fn write(&self, entry: &LinkLogEntry) -> std::io::Result<()> {
        let line = entry
            .to_json_line()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut writer = self.writer.lock();
        writeln!(writer, "{}", line)?;
        writer.flush()
    }

    pub fn flush(&self) -> std::io::Result<()> {
        self.writer.lock().flush()
    }
}

impl Drop for InstanceLogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Every entry under `<logs_dir>/raw`, oldest first.
///
/// Lines that fail to parse (a torn write, a foreign file) are skipped.
pub fn read_entries(logs_dir: impl AsRef<Path>) -> std::io::Result<Vec<LinkLogEntry>> {
    let raw_dir = logs_dir.as_ref().join("raw");
    if !raw_dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for dir_entry in fs::read_dir(&raw_dir)? {
        let path = dir_entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let reader = BufReader::new(File::open(&path)?);
        for line in reader.lines() {
            let line = line?;
            if let Ok(entry) = LinkLogEntry::from_json_line(&line) {
                entries.push(entry);
            }
        }
    }

    entries.sort_by(|a, b| a.ts.cmp(&b.ts));
    Ok(entries)
}

/// Entries from every instance that mention `workout_id`, oldest first
pub fn read_workout_timeline(
    logs_dir: impl AsRef<Path>,
    workout_id: &str,
) -> std::io::Result<Vec<LinkLogEntry>> {
    Ok(read_entries(logs_dir)?
        .into_iter()
        .filter(|entry| entry.workout_id.as_deref() == Some(workout_id))
        .collect())
}
