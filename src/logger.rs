use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::{io::Write, path::PathBuf};

use crate::error::BciError;

#[derive(Debug, Serialize, Deserialize)]
struct LogEntry<T>
where
    T: Serialize,
{
    timestamp: DateTime<Utc>,
    data: T,
}

/// A small buffered, append-only JSON-lines logger, used for the ad-hoc
/// diagnostic logs (marker placements, per-chunk drift) that are not part of
/// the `log` facade output. Buffers up to `buffer_size` entries before
/// flushing to disk, and flushes whatever remains on drop.
#[derive(Debug)]
pub struct Logger<T>
where
    T: Serialize,
{
    buffer: Vec<LogEntry<T>>,
    buffer_size: usize,
    file_path: PathBuf,
}

impl<T> Logger<T>
where
    T: Serialize,
{
    pub fn new<P: Into<PathBuf>>(file_path: P, buffer_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(buffer_size),
            buffer_size,
            file_path: file_path.into(),
        }
    }

    pub fn add(&mut self, data: T) -> Result<(), BciError> {
        let entry = LogEntry {
            timestamp: Utc::now(),
            data,
        };

        self.buffer.push(entry);

        if self.buffer.len() >= self.buffer_size {
            self.flush()?;
        }

        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), BciError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .map_err(|source| {
                BciError::io(source, format!("could not open log file at {:?}", self.file_path))
            })?;

        let mut writer = std::io::BufWriter::new(file);

        for entry in &self.buffer {
            let json_line = serde_json::to_string(entry).map_err(|e| {
                BciError::device(format!("failed to serialize log entry: {e}"))
            })?;
            writeln!(writer, "{json_line}")
                .map_err(|source| BciError::io(source, "writing log line"))?;
        }

        writer
            .flush()
            .map_err(|source| BciError::io(source, "flushing log writer"))?;
        self.buffer.clear();
        info!("diagnostic logger flushed {:?}", self.file_path);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl<T> Drop for Logger<T>
where
    T: Serialize,
{
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Debug, Serialize)]
    struct MarkerLogEntry {
        code: i32,
        index: usize,
    }

    #[test]
    fn logger_flushes_when_buffer_full() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("markers.jsonl");
        let mut logger: Logger<MarkerLogEntry> = Logger::new(&path, 2);

        assert!(logger.is_empty());
        logger.add(MarkerLogEntry { code: 7, index: 0 }).unwrap();
        assert_eq!(logger.len(), 1);
        logger.add(MarkerLogEntry { code: 3, index: 12 }).unwrap();
        assert!(logger.is_empty());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
