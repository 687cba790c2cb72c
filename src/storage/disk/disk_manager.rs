use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
    #[error("Disk manager has been shut down")]
    ShutDown,
}

/// DiskManager handles the actual disk I/O: the database file is a flat
/// array of fixed-size pages indexed by page id.
pub struct DiskManager {
    db_file: Mutex<Option<File>>,
}

impl DiskManager {
    /// Create a new DiskManager backed by the specified database file.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        Ok(Self {
            db_file: Mutex::new(Some(file)),
        })
    }

    /// Read a page from disk into `buf`. Reading a page the file does not
    /// cover yet yields a zeroed buffer; the file grows lazily on write.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<(), DiskManagerError> {
        debug_assert_eq!(PAGE_SIZE, buf.len());
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = Self::page_offset(page_id);
        let mut guard = self.db_file.lock();
        let file = guard.as_mut().ok_or(DiskManagerError::ShutDown)?;

        let file_size = file.metadata()?.len();
        if offset >= file_size {
            buf.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Write a page to disk. Returns only after the write has been handed
    /// to the OS and flushed.
    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<(), DiskManagerError> {
        debug_assert_eq!(PAGE_SIZE, buf.len());
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = Self::page_offset(page_id);
        let mut guard = self.db_file.lock();
        let file = guard.as_mut().ok_or(DiskManagerError::ShutDown)?;

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        file.flush()?;
        Ok(())
    }

    /// Close the backing file. Any subsequent I/O fails with `ShutDown`.
    pub fn shutdown(&self) {
        self.db_file.lock().take();
    }

    fn page_offset(page_id: PageId) -> u64 {
        page_id as u64 * PAGE_SIZE as u64
    }
}
