//! Configuration record and store

use crate::probe::Probe;
use crate::storage::NvStorage;
use crate::StorageError;
use ezo_protocol::{CalibrationBlob, LINE_COUNT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Header identifying a record written by this firmware
pub const MAGIC: [u8; 6] = *b"MFM01\0";

/// Offset of the record in non-volatile storage
pub const RECORD_OFFSET: usize = 0;

/// Encoded size of [`ConfigRecord`]: header, flags, two blobs, two K-values
pub const RECORD_SIZE: usize = MAGIC.len() + 1 + 2 * LINE_COUNT * ezo_protocol::LINE_WIDTH + 2;

/// The persisted configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRecord {
    /// Must equal [`MAGIC`]
    pub magic: [u8; 6],
    /// Calibration-valid bit per probe
    pub flags: u8,
    /// Exported calibration per probe
    pub calibration: [CalibrationBlob; 2],
    /// K-value per probe, in tenths
    pub k_values: [u8; 2],
}

impl Default for ConfigRecord {
    fn default() -> Self {
        Self {
            magic: MAGIC,
            flags: 0,
            calibration: [CalibrationBlob::empty(); 2],
            k_values: [0; 2],
        }
    }
}

impl ConfigRecord {
    /// Serialize to the fixed on-media layout
    pub fn encode(&self) -> Result<[u8; RECORD_SIZE], StorageError> {
        let mut buf = [0u8; RECORD_SIZE];
        let used = postcard::to_slice(self, &mut buf)?.len();
        if used != RECORD_SIZE {
            return Err(StorageError::Encoding(format!(
                "record encoded to {} bytes, expected {}",
                used, RECORD_SIZE
            )));
        }
        Ok(buf)
    }

    /// Parse the on-media layout, rejecting foreign or damaged records
    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        if bytes.get(..MAGIC.len()) != Some(&MAGIC[..]) {
            return Err(StorageError::Corrupt("magic header mismatch".to_string()));
        }
        postcard::from_bytes(bytes).map_err(|e| StorageError::Corrupt(e.to_string()))
    }
}

/// In-memory mirror of the record plus the storage it lives in
pub struct ConfigStore<S> {
    storage: S,
    record: ConfigRecord,
}

impl<S: NvStorage> ConfigStore<S> {
    /// Create a store holding an empty record; nothing is read yet
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            record: ConfigRecord::default(),
        }
    }

    /// Create a store and load the persisted record
    pub fn open(storage: S) -> Result<Self, StorageError> {
        let mut store = Self::new(storage);
        store.load()?;
        Ok(store)
    }

    /// Read the record from storage.
    ///
    /// A missing or damaged record is replaced by an empty one, which is
    /// written back immediately. If that write fails the empty record is
    /// still used. Missing calibrations are only reported.
    pub fn load(&mut self) -> Result<(), StorageError> {
        let mut buf = [0u8; RECORD_SIZE];
        self.storage.read(RECORD_OFFSET, &mut buf)?;

        match ConfigRecord::decode(&buf) {
            Ok(record) => {
                debug!("Loaded configuration record (flags {:#04b})", record.flags);
                self.record = record;
            }
            Err(e) => {
                warn!("Stored configuration unusable ({}); resetting to defaults", e);
                self.record = ConfigRecord::default();
                if let Err(e) = self.persist() {
                    warn!("Could not write the reset configuration back: {}", e);
                }
            }
        }

        for probe in Probe::ALL {
            if !self.has_calibration(probe) {
                warn!("No valid calibration for probe {}", probe);
            } else if !self.calibration(probe).is_complete() {
                warn!("Calibration for probe {} is incomplete; ignoring it", probe);
                self.record.flags &= !probe.flag();
            }
        }
        Ok(())
    }

    /// Reset every field to empty; the header is kept. Not persisted.
    pub fn clear(&mut self) {
        self.record = ConfigRecord::default();
        info!("Configuration cleared");
    }

    /// Write the record back to storage
    pub fn persist(&mut self) -> Result<(), StorageError> {
        let bytes = self.record.encode()?;
        self.storage.write(RECORD_OFFSET, &bytes)?;
        info!("Configuration persisted");
        Ok(())
    }

    /// Current record
    pub fn record(&self) -> &ConfigRecord {
        &self.record
    }

    /// Calibration-valid bitmask
    pub fn flags(&self) -> u8 {
        self.record.flags
    }

    /// Check if the probe's calibration is marked valid
    pub fn has_calibration(&self, probe: Probe) -> bool {
        self.record.flags & probe.flag() != 0
    }

    /// Stored calibration for a probe (empty if never exported)
    pub fn calibration(&self, probe: Probe) -> &CalibrationBlob {
        &self.record.calibration[probe.index()]
    }

    /// Store a probe's calibration; only complete blobs are accepted
    pub fn set_calibration(&mut self, probe: Probe, blob: CalibrationBlob) -> Result<(), StorageError> {
        if !blob.is_complete() {
            return Err(StorageError::IncompleteCalibration {
                probe,
                lines: blob.line_count(),
                expected: LINE_COUNT,
            });
        }
        self.record.calibration[probe.index()] = blob;
        Ok(())
    }

    /// Mark a probe's calibration valid or invalid
    pub fn mark_calibrated(&mut self, probe: Probe, valid: bool) -> Result<(), StorageError> {
        if valid {
            let blob = self.calibration(probe);
            if !blob.is_complete() {
                return Err(StorageError::IncompleteCalibration {
                    probe,
                    lines: blob.line_count(),
                    expected: LINE_COUNT,
                });
            }
            self.record.flags |= probe.flag();
        } else {
            self.record.flags &= !probe.flag();
        }
        Ok(())
    }

    /// K-value of a probe, in tenths
    pub fn k_value(&self, probe: Probe) -> u8 {
        self.record.k_values[probe.index()]
    }

    /// Set a probe's K-value, in tenths
    pub fn set_k_value(&mut self, probe: Probe, k_value: u8) {
        self.record.k_values[probe.index()] = k_value;
    }

    /// Backing storage
    pub fn storage(&self) -> &S {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn blob(tag: char) -> CalibrationBlob {
        let lines: Vec<String> = (0..LINE_COUNT).map(|i| format!("{}{:011}", tag, i)).collect();
        CalibrationBlob::from_lines(lines.iter().map(String::as_str)).unwrap()
    }

    #[test]
    fn test_record_size_is_fixed() {
        let mut record = ConfigRecord::default();
        assert_eq!(record.encode().unwrap().len(), RECORD_SIZE);

        record.flags = 0b11;
        record.calibration = [blob('A'), blob('B')];
        record.k_values = [10, 255];
        let bytes = record.encode().unwrap();
        assert_eq!(&bytes[..MAGIC.len()], &MAGIC);
        assert_eq!(ConfigRecord::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn test_erased_storage_heals_and_persists() {
        let store = ConfigStore::open(MemoryStorage::default()).unwrap();

        assert_eq!(store.record(), &ConfigRecord::default());
        assert_eq!(store.storage().write_count(), 1);
        assert_eq!(&store.storage().bytes()[..MAGIC.len()], &MAGIC);
    }

    #[test]
    fn test_corrupted_magic_resets_record() {
        let mut store = ConfigStore::open(MemoryStorage::default()).unwrap();
        store.set_calibration(Probe::A, blob('A')).unwrap();
        store.mark_calibrated(Probe::A, true).unwrap();
        store.set_k_value(Probe::A, 10);
        store.persist().unwrap();

        let mut storage = store.storage().clone();
        storage.bytes_mut()[..MAGIC.len()].fill(0);
        let writes = storage.write_count();

        let store = ConfigStore::open(storage).unwrap();
        assert_eq!(store.flags(), 0);
        assert_eq!(store.k_value(Probe::A), 0);
        assert!(store.calibration(Probe::A).is_empty());
        assert_eq!(store.storage().write_count(), writes + 1);
        assert_eq!(&store.storage().bytes()[..MAGIC.len()], &MAGIC);
    }

    /// Memory that can be read but rejects every write
    struct ReadOnly(MemoryStorage);

    impl NvStorage for ReadOnly {
        fn capacity(&self) -> usize {
            self.0.capacity()
        }

        fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
            self.0.read(offset, buf)
        }

        fn write(&mut self, _offset: usize, _data: &[u8]) -> Result<(), StorageError> {
            Err(StorageError::WriteFailed("read-only".to_string()))
        }
    }

    #[test]
    fn test_corrupt_record_on_failing_storage_still_loads() {
        let mut store = ConfigStore::open(ReadOnly(MemoryStorage::default())).unwrap();

        assert_eq!(store.record(), &ConfigRecord::default());
        assert_eq!(store.storage().0.write_count(), 0);
        assert!(matches!(store.persist(), Err(StorageError::WriteFailed(_))));
    }

    #[test]
    fn test_truncated_magic_resets_record() {
        let mut storage = MemoryStorage::default();
        storage.bytes_mut()[..6].copy_from_slice(b"MFM\0\0\0");

        let store = ConfigStore::open(storage).unwrap();
        assert_eq!(store.record(), &ConfigRecord::default());
    }

    #[test]
    fn test_load_persist_load_without_header() {
        let mut store = ConfigStore::open(MemoryStorage::default()).unwrap();
        store.persist().unwrap();
        store.load().unwrap();

        assert_eq!(store.flags(), 0);
        for probe in Probe::ALL {
            assert_eq!(store.k_value(probe), 0);
            assert!(!store.has_calibration(probe));
        }
    }

    #[test]
    fn test_persisted_values_survive_reload() {
        let mut store = ConfigStore::open(MemoryStorage::default()).unwrap();
        store.set_calibration(Probe::B, blob('B')).unwrap();
        store.mark_calibrated(Probe::B, true).unwrap();
        store.set_k_value(Probe::B, 25);
        store.persist().unwrap();

        let store = ConfigStore::open(store.storage().clone()).unwrap();
        assert!(store.has_calibration(Probe::B));
        assert!(!store.has_calibration(Probe::A));
        assert_eq!(store.k_value(Probe::B), 25);
        assert_eq!(store.calibration(Probe::B), &blob('B'));
    }

    #[test]
    fn test_changes_are_not_autosaved() {
        let mut store = ConfigStore::open(MemoryStorage::default()).unwrap();
        store.set_k_value(Probe::A, 10);
        store.clear();
        assert_eq!(store.storage().write_count(), 1);
    }

    #[test]
    fn test_clear_keeps_header() {
        let mut store = ConfigStore::open(MemoryStorage::default()).unwrap();
        store.set_calibration(Probe::A, blob('A')).unwrap();
        store.mark_calibrated(Probe::A, true).unwrap();
        store.set_k_value(Probe::B, 7);
        store.clear();

        assert_eq!(store.record().magic, MAGIC);
        assert_eq!(store.flags(), 0);
        assert_eq!(store.k_value(Probe::B), 0);
    }

    #[test]
    fn test_incomplete_calibration_rejected() {
        let mut store = ConfigStore::new(MemoryStorage::default());
        let mut partial = CalibrationBlob::empty();
        partial.set_line(0, "ABCDEFGHIJKL").unwrap();

        let err = store.set_calibration(Probe::A, partial).unwrap_err();
        assert!(matches!(err, StorageError::IncompleteCalibration { lines: 1, .. }));
        assert!(store.mark_calibrated(Probe::A, true).is_err());
        assert_eq!(store.flags(), 0);
    }

    #[test]
    fn test_flag_without_blob_dropped_on_load() {
        let mut record = ConfigRecord::default();
        record.flags = Probe::A.flag();
        let mut storage = MemoryStorage::default();
        storage.write(RECORD_OFFSET, &record.encode().unwrap()).unwrap();

        let store = ConfigStore::open(storage).unwrap();
        assert!(!store.has_calibration(Probe::A));
    }
}
