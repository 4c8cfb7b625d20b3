//! Compilation cache handles and tokens.

use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

/// Length in bytes of a cache token.
pub const CACHE_TOKEN_LEN: usize = 32;

/// Caller-chosen identifier of one cached compiled artifact.
pub type CacheToken = [u8; CACHE_TOKEN_LEN];

/// Shared handle to one cache file.
///
/// Clones refer to the same open file.
#[derive(Debug, Clone)]
pub struct CacheHandle {
    file: Arc<Mutex<File>>,
}

impl CacheHandle {
    pub fn new(file: File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }

    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read the whole file from offset zero.
    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Write `bytes` starting at offset zero.
    pub fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(bytes)?;
        file.flush()
    }

    /// Truncate the file to zero length.
    pub fn truncate(&self) -> io::Result<()> {
        let file = self.file.lock();
        file.set_len(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> CacheHandle {
        CacheHandle::new(tempfile::tempfile().unwrap())
    }

    #[test]
    fn test_write_then_read() {
        let cache = handle();
        assert!(cache.is_empty().unwrap());
        cache.write_all(b"compiled").unwrap();
        assert_eq!(cache.len().unwrap(), 8);
        assert_eq!(cache.read_all().unwrap(), b"compiled");
    }

    #[test]
    fn test_clones_share_file() {
        let cache = handle();
        let other = cache.clone();
        cache.write_all(b"abc").unwrap();
        assert_eq!(other.read_all().unwrap(), b"abc");
        other.truncate().unwrap();
        assert!(cache.is_empty().unwrap());
    }
}
