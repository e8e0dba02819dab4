/*!
# Secura

Event check-in core: guests get in by typing a short access code, opening a
personal invitation link, or presenting a QR-coded invitation at the desk.

## Overview

Each guest of an event holds an invitation carrying three equivalent
credentials:

- a 4-character **guest code** (`K7Q2`), typed into a row of single-character cells,
- a **direct link** (`/access?guestId=..&eventId=..`),
- a **QR payload** (`{"t":"INV","e":"<eventId>","g":"<guestId>"}`).

A whole table can also be admitted with a **table code** (`AB-12`), after
which each guest may identify themselves with their ticket code or skip.

## Architecture

### Access flow
- **code_input**: Segmented code entry (cell classes, focus movement, paste, auto-completion)
- **access**: Resolution of codes, links and payloads; the `MainView -> TicketCodeView -> ConfirmationView` state machine
- **qr**: Invitation payload wire format

### Desk
- **scanner**: Still-frame QR capture with a bounded capture window, file upload fallback
- **checkin**: Marks a guest present and appends the scan log as one unit
- **report**: Attendance export (CSV, XLSX)

### Data Persistence Layer
- **storage**: Lookup/write seam with in-memory and JSON-file stores
- **snapshot**: Whole-dataset backup with Gzip compression and bincode serialization

### Web (feature `web`)
- **auth**: Operator accounts and cookie sessions
- **mailer**: Invitation delivery over SMTP
- **app**: Routing and middleware

## REST API Endpoints

- `/api/access/{guest,table,ticket}` - Resolve a typed code
- `/api/access/link` - Resolve direct-link query parameters
- `/api/scan/{qr,upload,camera}` - Resolve a scanned invitation (operators)
- `/api/checkin/{guestId}` - Commit a check-in (operators)
- `/api/stats`, `/api/report.csv`, `/api/report.xlsx` - Attendance figures (operators)
- `/api/export`, `/api/import` - Dataset snapshots (operators)
*/

pub mod access;
pub mod checkin;
pub mod code_input;
pub mod codes;
pub mod config;
pub mod error;
pub mod invitation;
pub mod models;
pub mod qr;
pub mod report;
pub mod scanner;
pub mod snapshot;
pub mod storage;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod auth;
#[cfg(feature = "web")]
pub mod mailer;

pub use access::{AccessResolver, AccessSession, AccessStep, DirectLink, ScanResolution};
pub use checkin::{CheckInOutcome, CheckInStats};
pub use code_input::{AccessForm, CodeGroup, FormMode, GroupKind};
pub use config::Config;
pub use error::{AccessError, CheckInError, StorageError};
pub use models::{Dataset, Event, Guest, GuestStatus, ScanRecord, Table};
pub use qr::QrPayload;
pub use storage::{FileStore, MemoryStore, Storage};
