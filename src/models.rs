use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An event guests are invited to.
///
/// Created by admin tooling; the check-in core only reads it.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub name: String,
    pub date: String,
    pub time: String,
    pub location: String,
    pub welcome_message: Option<String>,
    pub active: bool,
}

/// RSVP status of a guest.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GuestStatus {
    #[default]
    Pending,
    Confirmed,
    Declined,
}

/// An invited guest.
///
/// `scanned` goes from false to true once, at check-in, and `scanned_at`
/// is set at that transition.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Guest {
    pub id: String,
    pub event_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub table_id: Option<String>,
    pub status: GuestStatus,
    pub scanned: bool,
    pub scanned_at: Option<DateTime<Utc>>,
}

impl Guest {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: String,
    pub event_id: String,
    pub table_number: u32,
    pub table_name: Option<String>,
    pub capacity: u32,
}

/// Append-only check-in log entry.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub id: String,
    pub event_id: String,
    pub guest_id: String,
    pub guest_name: String,
    pub event_name: String,
    pub scanned_at: DateTime<Utc>,
}

/// Everything the stores persist, in one serializable aggregate.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Dataset {
    pub events: BTreeMap<String, Event>,
    pub guests: BTreeMap<String, Guest>,
    pub tables: BTreeMap<String, Table>,
    pub scans: Vec<ScanRecord>,
}
