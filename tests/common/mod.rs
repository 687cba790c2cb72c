use std::sync::Arc;

use anyhow::Result;
use tempfile::NamedTempFile;

use stratadb::storage::buffer::{BufferPoolInstance, ParallelBufferPool};
use stratadb::storage::disk::DiskManager;

// Route crate logs to the test harness when RUST_LOG is set
#[allow(dead_code)]
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a single buffer pool instance over a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolInstance>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let disk_manager = Arc::new(DiskManager::new(path)?);
    let buffer_pool = Arc::new(BufferPoolInstance::new(pool_size, disk_manager));
    Ok((buffer_pool, file))
}

// Create a sharded buffer pool over a temporary database
#[allow(dead_code)]
pub fn create_test_parallel_pool(
    num_instances: u32,
    pool_size: usize,
) -> Result<(Arc<ParallelBufferPool>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let disk_manager = Arc::new(DiskManager::new(path)?);
    let buffer_pool = Arc::new(ParallelBufferPool::new(num_instances, pool_size, disk_manager));
    Ok((buffer_pool, file))
}
