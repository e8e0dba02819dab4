use crate::error::{AccessError, CheckInError};
use crate::models::{Event, Guest, ScanRecord};
use crate::storage::Storage;
use chrono::{DateTime, NaiveDate, Utc};
use lazy_static::lazy_static;
use log::{error, info};
use serde::Serialize;
use std::sync::Mutex;
use uuid::Uuid;

lazy_static! {
    // Held across the re-read and both writes of a commit.
    static ref COMMIT_LOCK: Mutex<()> = Mutex::new(());
}

/// Result of asking to mark a guest present.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CheckInOutcome {
    /// The guest was marked present and a scan record appended.
    CheckedIn { guest: Guest, scan: ScanRecord },
    /// Informational: the guest had already been checked in.
    AlreadyCheckedIn {
        guest: Guest,
        scanned_at: Option<DateTime<Utc>>,
    },
}

impl CheckInOutcome {
    pub fn guest(&self) -> &Guest {
        match self {
            CheckInOutcome::CheckedIn { guest, .. } => guest,
            CheckInOutcome::AlreadyCheckedIn { guest, .. } => guest,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, CheckInOutcome::CheckedIn { .. })
    }
}

/// Mark `guest_id` present at `now`.
///
/// The guest update and the scan append form one unit: the scan is only
/// appended after the guest is saved, and if the append fails the guest is
/// put back as it was. A guest that is already scanned is reported, not
/// written again. Commits are serialized, so concurrent callers for the same
/// guest append exactly one scan.
pub fn commit<S: Storage + ?Sized>(
    storage: &S,
    guest_id: &str,
    now: DateTime<Utc>,
) -> Result<CheckInOutcome, CheckInError> {
    let guest = storage
        .get_guest_by_id(guest_id)
        .ok_or_else(|| AccessError::entity("guest", guest_id))?;
    let event = storage
        .get_event_by_id(&guest.event_id)
        .ok_or_else(|| AccessError::entity("event", guest.event_id.as_str()))?;
    commit_guest(storage, guest, &event, now)
}

/// Same as [`commit`] for an already-resolved guest and event.
pub fn commit_guest<S: Storage + ?Sized>(
    storage: &S,
    guest: Guest,
    event: &Event,
    now: DateTime<Utc>,
) -> Result<CheckInOutcome, CheckInError> {
    let _commit = COMMIT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    // Re-read so a stale copy from an earlier resolution cannot commit twice.
    let current = storage
        .get_guest_by_id(&guest.id)
        .ok_or_else(|| AccessError::entity("guest", guest.id.as_str()))?;
    if current.scanned {
        info!("guest {} already checked in", current.id);
        let scanned_at = current.scanned_at;
        return Ok(CheckInOutcome::AlreadyCheckedIn {
            guest: current,
            scanned_at,
        });
    }

    let mut updated = current.clone();
    updated.scanned = true;
    updated.scanned_at = Some(now);
    storage.save_guest(&updated).inspect_err(|e| {
        error!("failed to save check-in for guest {}: {e}", updated.id);
    })?;

    let scan = ScanRecord {
        id: Uuid::new_v4().to_string(),
        event_id: event.id.clone(),
        guest_id: updated.id.clone(),
        guest_name: updated.full_name(),
        event_name: event.name.clone(),
        scanned_at: now,
    };
    if let Err(e) = storage.save_scan(&scan) {
        error!("failed to append scan for guest {}: {e}, rolling back", updated.id);
        if let Err(rollback) = storage.save_guest(&current) {
            error!("rollback of guest {} failed: {rollback}", current.id);
        }
        return Err(e.into());
    }

    info!("checked in {} ({}) at {}", scan.guest_name, scan.guest_id, event.name);
    Ok(CheckInOutcome::CheckedIn {
        guest: updated,
        scan,
    })
}

/// Attendance figures read straight from storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInStats {
    pub today_scans: usize,
    pub total_scans: usize,
    pub total_present: usize,
    pub total_guests: usize,
}

impl CheckInStats {
    pub fn read<S: Storage + ?Sized>(storage: &S, today: NaiveDate) -> Self {
        let guests = storage.get_all_guests();
        CheckInStats {
            today_scans: storage.get_scans_on(today).len(),
            total_scans: storage.get_all_scans().len(),
            total_present: guests.iter().filter(|g| g.scanned).count(),
            total_guests: guests.len(),
        }
    }

    /// Same figures limited to one event.
    pub fn read_for_event<S: Storage + ?Sized>(storage: &S, event_id: &str, today: NaiveDate) -> Self {
        let guests: Vec<Guest> = storage
            .get_all_guests()
            .into_iter()
            .filter(|g| g.event_id == event_id)
            .collect();
        let scans: Vec<ScanRecord> = storage
            .get_all_scans()
            .into_iter()
            .filter(|s| s.event_id == event_id)
            .collect();
        CheckInStats {
            today_scans: scans
                .iter()
                .filter(|s| s.scanned_at.date_naive() == today)
                .count(),
            total_scans: scans.len(),
            total_present: guests.iter().filter(|g| g.scanned).count(),
            total_guests: guests.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::models::{Dataset, Event, GuestStatus, Table};
    use crate::storage::MemoryStore;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// Store with slow guest reads, widening the read-then-write window.
    struct SlowReads(MemoryStore);

    impl Storage for SlowReads {
        fn get_event_by_id(&self, id: &str) -> Option<Event> {
            self.0.get_event_by_id(id)
        }
        fn get_guest_by_id(&self, id: &str) -> Option<Guest> {
            thread::sleep(Duration::from_millis(50));
            self.0.get_guest_by_id(id)
        }
        fn get_table_by_id(&self, id: &str) -> Option<Table> {
            self.0.get_table_by_id(id)
        }
        fn save_guest(&self, guest: &Guest) -> Result<(), StorageError> {
            self.0.save_guest(guest)
        }
        fn save_scan(&self, scan: &ScanRecord) -> Result<(), StorageError> {
            self.0.save_scan(scan)
        }
        fn get_all_scans(&self) -> Vec<ScanRecord> {
            self.0.get_all_scans()
        }
        fn get_all_guests(&self) -> Vec<Guest> {
            self.0.get_all_guests()
        }
    }

    /// Store whose scan log refuses writes.
    struct FailingScans(MemoryStore);

    impl Storage for FailingScans {
        fn get_event_by_id(&self, id: &str) -> Option<Event> {
            self.0.get_event_by_id(id)
        }
        fn get_guest_by_id(&self, id: &str) -> Option<Guest> {
            self.0.get_guest_by_id(id)
        }
        fn get_table_by_id(&self, id: &str) -> Option<Table> {
            self.0.get_table_by_id(id)
        }
        fn save_guest(&self, guest: &Guest) -> Result<(), StorageError> {
            self.0.save_guest(guest)
        }
        fn save_scan(&self, _scan: &ScanRecord) -> Result<(), StorageError> {
            Err(StorageError::Rejected("scan log full".to_string()))
        }
        fn get_all_scans(&self) -> Vec<ScanRecord> {
            self.0.get_all_scans()
        }
        fn get_all_guests(&self) -> Vec<Guest> {
            self.0.get_all_guests()
        }
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .save_event(Event {
                id: "evt_1".to_string(),
                name: "Gala".to_string(),
                date: "2026-11-01".to_string(),
                time: "19:00".to_string(),
                location: "Hall".to_string(),
                welcome_message: None,
                active: true,
            })
            .unwrap();
        store
            .save_guest(&Guest {
                id: "g_1".to_string(),
                event_id: "evt_1".to_string(),
                first_name: "Alan".to_string(),
                last_name: "Turing".to_string(),
                email: None,
                phone: None,
                table_id: None,
                status: GuestStatus::Confirmed,
                scanned: false,
                scanned_at: None,
            })
            .unwrap();
        store
    }

    #[test]
    fn failed_scan_append_rolls_back_guest() {
        let store = FailingScans(seeded());
        let err = commit(&store, "g_1", Utc::now()).unwrap_err();
        assert!(matches!(err, CheckInError::Storage(_)));
        let guest = store.get_guest_by_id("g_1").unwrap();
        assert!(!guest.scanned);
        assert!(guest.scanned_at.is_none());
        assert!(store.get_all_scans().is_empty());
    }

    #[test]
    fn unknown_guest_is_entity_not_found() {
        let store = seeded();
        let err = commit(&store, "nobody", Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            CheckInError::Access(AccessError::EntityNotFound { kind: "guest", .. })
        ));
    }

    #[test]
    fn stale_guest_copy_does_not_commit_twice() {
        let store = seeded();
        let stale = store.get_guest_by_id("g_1").unwrap();
        let event = store.get_event_by_id("evt_1").unwrap();
        assert!(commit_guest(&store, stale.clone(), &event, Utc::now()).unwrap().is_new());
        assert!(!commit_guest(&store, stale, &event, Utc::now()).unwrap().is_new());
        assert_eq!(store.get_all_scans().len(), 1);
    }

    #[test]
    fn concurrent_commits_append_one_scan() {
        let store = Arc::new(SlowReads(seeded()));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || commit(&*store, "g_1", Utc::now()).unwrap().is_new())
            })
            .collect();
        let new: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(new.iter().filter(|n| **n).count(), 1);
        assert_eq!(store.get_all_scans().len(), 1);
    }

    #[test]
    fn removed_guest_is_not_resurrected() {
        let store = seeded();
        let stale = store.get_guest_by_id("g_1").unwrap();
        let event = store.get_event_by_id("evt_1").unwrap();
        store.replace(Dataset::default()).unwrap();

        let err = commit_guest(&store, stale, &event, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            CheckInError::Access(AccessError::EntityNotFound { kind: "guest", .. })
        ));
        assert!(store.get_all_guests().is_empty());
        assert!(store.get_all_scans().is_empty());
    }
}
