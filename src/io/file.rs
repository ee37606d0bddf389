//! Buffered file sink.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;

use super::DataWriter;

/// Writes an artifact to a file through a write buffer.
pub struct FileWriter {
    inner: BufWriter<File>,
}

impl FileWriter {
    /// Create (or truncate) the file at `path` for writing.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(FileWriter {
            inner: BufWriter::new(file),
        })
    }
}

impl DataWriter for FileWriter {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}
