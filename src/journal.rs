//! Append-only NDJSON journals.
//!
//! One JSON object per line. Nothing is ever rewritten; readers skip blank
//! lines so a torn trailing newline does not poison the file.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a single record.
    pub fn append<T: Serialize>(&self, record: &T) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        Ok(())
    }

    /// Load every record in the journal.
    pub fn load_all<T: DeserializeOwned>(&self) -> std::io::Result<Vec<T>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record = serde_json::from_str(trimmed)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    #[test]
    fn test_append_and_load() {
        let dir = tempdir().unwrap();
        let journal = Journal::new(dir.path().join("events.ndjson"));

        journal.append(&json!({"n": 1})).unwrap();
        journal.append(&json!({"n": 2, "text": "line\nbreak"})).unwrap();

        let raw = std::fs::read_to_string(journal.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);

        let records: Vec<Value> = journal.load_all().unwrap();
        assert_eq!(records[0]["n"], 1);
        assert_eq!(records[1]["text"], "line\nbreak");
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempdir().unwrap();
        let journal = Journal::new(dir.path().join("absent.ndjson"));
        let records: Vec<Value> = journal.load_all().unwrap();
        assert!(records.is_empty());
    }
}
