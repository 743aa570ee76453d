//! Non-volatile storage capability
//!
//! The store only needs byte-addressed reads and writes of one fixed-size
//! block. Erased media read back as `0xFF`.

use crate::StorageError;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use tracing::debug;

/// Size of the module's EEPROM
pub const DEFAULT_CAPACITY: usize = 4096;

/// Value of an erased byte
const ERASED: u8 = 0xFF;

/// Byte-addressable non-volatile memory
pub trait NvStorage {
    /// Total size in bytes
    fn capacity(&self) -> usize;

    /// Fill `buf` from `offset`
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Write all of `data` at `offset`; either all of it lands or none
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError>;
}

impl<T: NvStorage + ?Sized> NvStorage for Box<T> {
    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        (**self).read(offset, buf)
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        (**self).write(offset, data)
    }
}

fn check_bounds(offset: usize, len: usize, capacity: usize) -> Result<(), StorageError> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(StorageError::OutOfBounds {
            offset,
            len,
            capacity,
        }),
    }
}

/// Storage held in memory
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    bytes: Vec<u8>,
    writes: usize,
}

impl MemoryStorage {
    /// Create an erased block of `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![ERASED; capacity],
            writes: 0,
        }
    }

    /// Raw contents
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Mutable raw contents (for corrupting records in tests)
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Number of writes performed
    pub fn write_count(&self) -> usize {
        self.writes
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl NvStorage for MemoryStorage {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        check_bounds(offset, buf.len(), self.bytes.len())?;
        buf.copy_from_slice(&self.bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        check_bounds(offset, data.len(), self.bytes.len())?;
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
        self.writes += 1;
        Ok(())
    }
}

/// EEPROM image kept in a host file.
///
/// Writes go to a sibling temporary file that then replaces the image, so
/// an interrupted write leaves the previous image intact.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    capacity: usize,
}

impl FileStorage {
    /// Use the image at `path`; a missing file reads as erased
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity,
        }
    }

    fn load_image(&self) -> Result<Vec<u8>, StorageError> {
        let mut image = match fs::read(&self.path) {
            Ok(image) => image,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        image.resize(self.capacity, ERASED);
        Ok(image)
    }
}

impl NvStorage for FileStorage {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        check_bounds(offset, buf.len(), self.capacity)?;
        let image = self.load_image()?;
        buf.copy_from_slice(&image[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        check_bounds(offset, data.len(), self.capacity)?;
        let mut image = self.load_image()?;
        image[offset..offset + data.len()].copy_from_slice(data);

        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        let mut file = fs::File::create(&staging)?;
        file.write_all(&image)?;
        file.sync_all()
            .map_err(|e| StorageError::WriteFailed(format!("{}: {}", staging.display(), e)))?;
        drop(file);
        fs::rename(&staging, &self.path)
            .map_err(|e| StorageError::WriteFailed(format!("{}: {}", self.path.display(), e)))?;

        debug!("Wrote {} bytes at offset {} to {}", data.len(), offset, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("ec-module-{}-{}.bin", name, std::process::id()));
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn test_memory_storage_starts_erased() {
        let mut storage = MemoryStorage::new(16);
        let mut buf = [0u8; 4];
        storage.read(12, &mut buf).unwrap();
        assert_eq!(buf, [ERASED; 4]);
    }

    #[test]
    fn test_memory_storage_bounds() {
        let mut storage = MemoryStorage::new(16);
        let err = storage.write(14, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, StorageError::OutOfBounds { offset: 14, len: 3, capacity: 16 }));
        assert!(storage.read(usize::MAX, &mut [0u8; 2]).is_err());
        assert_eq!(storage.write_count(), 0);
    }

    #[test]
    fn test_file_storage_round_trip() {
        let path = scratch_path("round-trip");
        let mut storage = FileStorage::new(&path, 64);

        let mut buf = [0u8; 4];
        storage.read(0, &mut buf).unwrap();
        assert_eq!(buf, [ERASED; 4]);

        storage.write(8, b"EC01").unwrap();
        let mut reopened = FileStorage::new(&path, 64);
        reopened.read(8, &mut buf).unwrap();
        assert_eq!(&buf, b"EC01");
        assert_eq!(fs::metadata(&path).unwrap().len(), 64);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_boxed_storage_delegates() {
        let mut storage: Box<dyn NvStorage> = Box::new(MemoryStorage::new(8));
        storage.write(0, &[7]).unwrap();
        let mut buf = [0u8; 1];
        storage.read(0, &mut buf).unwrap();
        assert_eq!(buf, [7]);
        assert_eq!(storage.capacity(), 8);
    }
}
