use crate::error::StorageError;
use crate::models::{Dataset, Event, Guest, ScanRecord, Table};
use chrono::{NaiveDate, Utc};
use std::fs::{self, File, create_dir_all};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

/// Key-value persistence the check-in core reads from and writes to.
///
/// Lookups return `None` on a miss and never fail for "not found".
pub trait Storage {
    fn get_event_by_id(&self, id: &str) -> Option<Event>;
    fn get_guest_by_id(&self, id: &str) -> Option<Guest>;
    fn get_table_by_id(&self, id: &str) -> Option<Table>;
    fn save_guest(&self, guest: &Guest) -> Result<(), StorageError>;
    fn save_scan(&self, scan: &ScanRecord) -> Result<(), StorageError>;
    fn get_all_scans(&self) -> Vec<ScanRecord>;
    fn get_all_guests(&self) -> Vec<Guest>;

    /// Scans recorded on `day` (UTC).
    fn get_scans_on(&self, day: NaiveDate) -> Vec<ScanRecord> {
        self.get_all_scans()
            .into_iter()
            .filter(|scan| scan.scanned_at.date_naive() == day)
            .collect()
    }

    fn get_today_scans(&self) -> Vec<ScanRecord> {
        self.get_scans_on(Utc::now().date_naive())
    }
}

impl<S: Storage + ?Sized> Storage for &S {
    fn get_event_by_id(&self, id: &str) -> Option<Event> {
        (**self).get_event_by_id(id)
    }
    fn get_guest_by_id(&self, id: &str) -> Option<Guest> {
        (**self).get_guest_by_id(id)
    }
    fn get_table_by_id(&self, id: &str) -> Option<Table> {
        (**self).get_table_by_id(id)
    }
    fn save_guest(&self, guest: &Guest) -> Result<(), StorageError> {
        (**self).save_guest(guest)
    }
    fn save_scan(&self, scan: &ScanRecord) -> Result<(), StorageError> {
        (**self).save_scan(scan)
    }
    fn get_all_scans(&self) -> Vec<ScanRecord> {
        (**self).get_all_scans()
    }
    fn get_all_guests(&self) -> Vec<Guest> {
        (**self).get_all_guests()
    }
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    fn get_event_by_id(&self, id: &str) -> Option<Event> {
        (**self).get_event_by_id(id)
    }
    fn get_guest_by_id(&self, id: &str) -> Option<Guest> {
        (**self).get_guest_by_id(id)
    }
    fn get_table_by_id(&self, id: &str) -> Option<Table> {
        (**self).get_table_by_id(id)
    }
    fn save_guest(&self, guest: &Guest) -> Result<(), StorageError> {
        (**self).save_guest(guest)
    }
    fn save_scan(&self, scan: &ScanRecord) -> Result<(), StorageError> {
        (**self).save_scan(scan)
    }
    fn get_all_scans(&self) -> Vec<ScanRecord> {
        (**self).get_all_scans()
    }
    fn get_all_guests(&self) -> Vec<Guest> {
        (**self).get_all_guests()
    }
}

/// In-process store. Used by tests and the terminal desk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<Dataset>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dataset(data: Dataset) -> Self {
        MemoryStore {
            data: RwLock::new(data),
        }
    }

    pub fn save_event(&self, event: Event) -> Result<(), StorageError> {
        let mut data = self.data.write().map_err(|_| StorageError::Poisoned)?;
        data.events.insert(event.id.clone(), event);
        Ok(())
    }

    pub fn save_table(&self, table: Table) -> Result<(), StorageError> {
        let mut data = self.data.write().map_err(|_| StorageError::Poisoned)?;
        data.tables.insert(table.id.clone(), table);
        Ok(())
    }

    pub fn dataset(&self) -> Dataset {
        self.data.read().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn replace(&self, dataset: Dataset) -> Result<(), StorageError> {
        let mut data = self.data.write().map_err(|_| StorageError::Poisoned)?;
        *data = dataset;
        Ok(())
    }
}

impl Storage for MemoryStore {
    fn get_event_by_id(&self, id: &str) -> Option<Event> {
        self.data.read().ok()?.events.get(id).cloned()
    }

    fn get_guest_by_id(&self, id: &str) -> Option<Guest> {
        self.data.read().ok()?.guests.get(id).cloned()
    }

    fn get_table_by_id(&self, id: &str) -> Option<Table> {
        self.data.read().ok()?.tables.get(id).cloned()
    }

    fn save_guest(&self, guest: &Guest) -> Result<(), StorageError> {
        let mut data = self.data.write().map_err(|_| StorageError::Poisoned)?;
        data.guests.insert(guest.id.clone(), guest.clone());
        Ok(())
    }

    fn save_scan(&self, scan: &ScanRecord) -> Result<(), StorageError> {
        let mut data = self.data.write().map_err(|_| StorageError::Poisoned)?;
        data.scans.push(scan.clone());
        Ok(())
    }

    fn get_all_scans(&self) -> Vec<ScanRecord> {
        self.data
            .read()
            .map(|d| d.scans.clone())
            .unwrap_or_default()
    }

    fn get_all_guests(&self) -> Vec<Guest> {
        self.data
            .read()
            .map(|d| d.guests.values().cloned().collect())
            .unwrap_or_default()
    }
}

const STORE_FILE: &str = "secura.json";

/// JSON-file store. The whole dataset is rewritten on every mutation.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    memory: MemoryStore,
    // One writer owns the temp file at a time.
    flush_lock: Mutex<()>,
}

impl FileStore {
    /// Open (or create) the store file inside `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        if !dir.exists() {
            create_dir_all(dir)?;
        }

        let path = dir.join(STORE_FILE);
        let dataset = if path.exists() {
            let mut contents = String::new();
            File::open(&path)?.read_to_string(&mut contents)?;
            serde_json::from_str(&contents)?
        } else {
            let mut file = File::create(&path)?;
            file.write_all(serde_json::to_string_pretty(&Dataset::default())?.as_bytes())?;
            Dataset::default()
        };

        log::info!("opened store at {}", path.display());
        Ok(FileStore {
            path,
            memory: MemoryStore::from_dataset(dataset),
            flush_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StorageError> {
        let _flush = self.flush_lock.lock().map_err(|_| StorageError::Poisoned)?;
        let json = serde_json::to_string_pretty(&self.memory.dataset())?;
        // Write-then-rename so a crash never leaves a truncated store.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn save_event(&self, event: Event) -> Result<(), StorageError> {
        self.memory.save_event(event)?;
        self.flush()
    }

    pub fn save_table(&self, table: Table) -> Result<(), StorageError> {
        self.memory.save_table(table)?;
        self.flush()
    }

    pub fn dataset(&self) -> Dataset {
        self.memory.dataset()
    }

    pub fn replace(&self, dataset: Dataset) -> Result<(), StorageError> {
        self.memory.replace(dataset)?;
        self.flush()
    }
}

impl Storage for FileStore {
    fn get_event_by_id(&self, id: &str) -> Option<Event> {
        self.memory.get_event_by_id(id)
    }

    fn get_guest_by_id(&self, id: &str) -> Option<Guest> {
        self.memory.get_guest_by_id(id)
    }

    fn get_table_by_id(&self, id: &str) -> Option<Table> {
        self.memory.get_table_by_id(id)
    }

    fn save_guest(&self, guest: &Guest) -> Result<(), StorageError> {
        let previous = self.memory.get_guest_by_id(&guest.id);
        self.memory.save_guest(guest)?;
        if let Err(e) = self.flush() {
            // Keep memory and disk in agreement.
            let mut data = self.memory.data.write().map_err(|_| StorageError::Poisoned)?;
            match previous {
                Some(prev) => data.guests.insert(prev.id.clone(), prev),
                None => data.guests.remove(&guest.id),
            };
            return Err(e);
        }
        Ok(())
    }

    fn save_scan(&self, scan: &ScanRecord) -> Result<(), StorageError> {
        self.memory.save_scan(scan)?;
        if let Err(e) = self.flush() {
            let mut data = self.memory.data.write().map_err(|_| StorageError::Poisoned)?;
            data.scans.retain(|s| s.id != scan.id);
            return Err(e);
        }
        Ok(())
    }

    fn get_all_scans(&self) -> Vec<ScanRecord> {
        self.memory.get_all_scans()
    }

    fn get_all_guests(&self) -> Vec<Guest> {
        self.memory.get_all_guests()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GuestStatus;

    fn guest(id: &str) -> Guest {
        Guest {
            id: id.to_string(),
            event_id: "evt_1".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: None,
            phone: None,
            table_id: None,
            status: GuestStatus::Confirmed,
            scanned: false,
            scanned_at: None,
        }
    }

    #[test]
    fn memory_store_misses_return_none() {
        let store = MemoryStore::new();
        assert!(store.get_guest_by_id("NOPE").is_none());
        assert!(store.get_event_by_id("NOPE").is_none());
        assert!(store.get_table_by_id("NOPE").is_none());
        assert!(store.get_all_scans().is_empty());
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.save_guest(&guest("AB12")).unwrap();
        }
        let reopened = FileStore::open(dir.path()).unwrap();
        let loaded = reopened.get_guest_by_id("AB12").unwrap();
        assert_eq!(loaded.full_name(), "Ada Lovelace");
    }

    #[test]
    fn storage_is_usable_through_references_and_arcs() {
        let store = Arc::new(MemoryStore::new());
        store.save_guest(&guest("ZZ99")).unwrap();
        let by_ref: &MemoryStore = &store;
        assert!(Storage::get_guest_by_id(&by_ref, "ZZ99").is_some());
        assert_eq!(store.get_all_guests().len(), 1);
    }

    #[test]
    fn concurrent_saves_all_reach_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.save_guest(&guest(&format!("G{i:03}"))))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get_all_guests().len(), 8);
    }
}
