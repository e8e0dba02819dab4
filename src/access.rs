//! Access resolution: maps a guest code, table code, direct link or scanned
//! invitation to the guest/table/event it identifies and drives the access
//! flow state machine.
//!
//! ```text
//! MainView --guest code--> ConfirmationView
//! MainView --table code--> TicketCodeView --ticket code / skip--> ConfirmationView
//! any      --back--------> MainView (identity cleared)
//! ```

use crate::code_input::{AccessForm, CodeGroup, GroupKind, normalize_code};
use crate::error::AccessError;
use crate::models::{Event, Guest, Table};
use crate::qr::QrPayload;
use crate::storage::Storage;
use log::{debug, info, warn};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
pub enum AccessStep {
    #[default]
    MainView,
    TicketCodeView,
    ConfirmationView,
}

impl AccessStep {
    /// Container the UI shows for this step.
    pub fn view_id(self) -> &'static str {
        match self {
            AccessStep::MainView => "accessMainView",
            AccessStep::TicketCodeView => "ticketCodeView",
            AccessStep::ConfirmationView => "confirmationView",
        }
    }

    /// Forward edges of the flow. Going back to `MainView` is always allowed
    /// and is handled by [`AccessResolver::back_to_main`].
    pub fn can_advance_to(self, next: AccessStep) -> bool {
        matches!(
            (self, next),
            (AccessStep::MainView, AccessStep::TicketCodeView)
                | (AccessStep::MainView, AccessStep::ConfirmationView)
                | (AccessStep::TicketCodeView, AccessStep::ConfirmationView)
        )
    }
}

/// Identity resolved so far in one access session.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessSession {
    pub guest: Option<Guest>,
    pub table: Option<Table>,
    pub event: Option<Event>,
    /// Only a table is known, not a specific guest.
    pub anonymous: bool,
    pub step: AccessStep,
}

impl AccessSession {
    pub fn reset(&mut self) {
        *self = AccessSession::default();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepChange {
    pub from: AccessStep,
    pub to: AccessStep,
}

/// Identifiers carried by an invitation URL.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectLink {
    pub guest_id: Option<String>,
    pub table_id: Option<String>,
    pub event_id: Option<String>,
}

impl DirectLink {
    /// Parse `guestId`, `tableId` and `eventId` out of a query string.
    /// A leading `?` is allowed; unknown keys and empty values are ignored.
    pub fn from_query(query: &str) -> Self {
        let mut link = DirectLink::default();
        for pair in query.trim_start_matches('?').split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let value = match urlencoding::decode(&value.replace('+', " ")) {
                Ok(v) => v.trim().to_string(),
                Err(_) => continue,
            };
            if value.is_empty() {
                continue;
            }
            match key {
                "guestId" => link.guest_id = Some(value),
                "tableId" => link.table_id = Some(value),
                "eventId" => link.event_id = Some(value),
                _ => {}
            }
        }
        link
    }

    pub fn is_empty(&self) -> bool {
        self.guest_id.is_none() && self.table_id.is_none() && self.event_id.is_none()
    }
}

/// Visual state a UI changes while a direct link resolves, e.g. a dimmed
/// container.
pub trait TransientView {
    fn dim(&mut self);
    fn restore(&mut self);
}

impl TransientView for () {
    fn dim(&mut self) {}
    fn restore(&mut self) {}
}

/// Restores the view exactly once when dropped, whichever way resolution exits.
struct DimGuard<'a, V: TransientView + ?Sized> {
    view: &'a mut V,
}

impl<'a, V: TransientView + ?Sized> DimGuard<'a, V> {
    fn new(view: &'a mut V) -> Self {
        view.dim();
        DimGuard { view }
    }
}

impl<V: TransientView + ?Sized> Drop for DimGuard<'_, V> {
    fn drop(&mut self) {
        self.view.restore();
    }
}

/// What a scanned invitation resolved to.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResolution {
    pub guest: Guest,
    pub event: Event,
    pub table: Option<Table>,
    pub already_checked_in: bool,
}

type Listener = Box<dyn FnMut(&StepChange) + Send>;

/// Owns the access session and resolves codes against a [`Storage`].
pub struct AccessResolver<S: Storage> {
    storage: S,
    session: AccessSession,
    listeners: Vec<Listener>,
}

impl<S: Storage> AccessResolver<S> {
    pub fn new(storage: S) -> Self {
        AccessResolver {
            storage,
            session: AccessSession::default(),
            listeners: Vec::new(),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn session(&self) -> &AccessSession {
        &self.session
    }

    pub fn step(&self) -> AccessStep {
        self.session.step
    }

    /// Register a callback run after every step change.
    pub fn subscribe(&mut self, listener: impl FnMut(&StepChange) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    fn notify(&mut self, change: StepChange) {
        for listener in &mut self.listeners {
            listener(&change);
        }
    }

    /// Swap in a freshly resolved session. Never merges with the previous one.
    fn replace_session(&mut self, next: AccessSession) -> AccessStep {
        let change = StepChange {
            from: self.session.step,
            to: next.step,
        };
        debug_assert!(
            change.from.can_advance_to(change.to),
            "illegal access step {:?} -> {:?}",
            change.from,
            change.to
        );
        if !change.from.can_advance_to(change.to) {
            warn!("unexpected access step {:?} -> {:?}", change.from, change.to);
        }
        info!("access step {:?} -> {:?}", change.from, change.to);
        self.session = next;
        self.notify(change);
        self.session.step
    }

    /// Code, link and QR resolution always start from `MainView`.
    fn restart_if_needed(&mut self) {
        if self.session.step != AccessStep::MainView {
            debug!("new access attempt from {:?}, resetting", self.session.step);
            self.back_to_main();
        }
    }

    /// Return to the main view, dropping all resolved identity.
    pub fn back_to_main(&mut self) {
        let from = self.session.step;
        self.session.reset();
        if from != AccessStep::MainView {
            self.notify(StepChange {
                from,
                to: AccessStep::MainView,
            });
        }
    }

    fn load_event(&self, event_id: &str) -> Result<Event, AccessError> {
        self.storage.get_event_by_id(event_id).ok_or_else(|| {
            warn!("event {} not found", event_id);
            AccessError::entity("event", event_id)
        })
    }

    fn load_guest_table(&self, guest: &Guest) -> Option<Table> {
        let table_id = guest.table_id.as_deref()?;
        let table = self.storage.get_table_by_id(table_id);
        if table.is_none() {
            debug!("guest {} references missing table {}", guest.id, table_id);
        }
        table
    }

    fn check_shape(kind: GroupKind, code: &str) -> Result<(), AccessError> {
        if kind.is_valid_code(code) {
            Ok(())
        } else {
            Err(AccessError::IncompleteCode {
                expected: kind.code_len(),
                got: code.chars().count(),
            })
        }
    }

    fn guest_session(&self, guest: Guest) -> Result<AccessSession, AccessError> {
        let event = self.load_event(&guest.event_id)?;
        let table = self.load_guest_table(&guest);
        Ok(AccessSession {
            guest: Some(guest),
            table,
            event: Some(event),
            anonymous: false,
            step: AccessStep::ConfirmationView,
        })
    }

    fn table_session(&self, table: Table) -> Result<AccessSession, AccessError> {
        let event = self.load_event(&table.event_id)?;
        Ok(AccessSession {
            guest: None,
            table: Some(table),
            event: Some(event),
            anonymous: true,
            step: AccessStep::TicketCodeView,
        })
    }

    /// Guest code path: straight to confirmation.
    pub fn resolve_guest_code(&mut self, code: &str) -> Result<AccessStep, AccessError> {
        let code = normalize_code(code);
        Self::check_shape(GroupKind::Guest, &code)?;
        self.restart_if_needed();

        debug!("looking up guest code {}", code);
        let guest = self.storage.get_guest_by_id(&code).ok_or_else(|| {
            warn!("guest code {} not found", code);
            AccessError::GuestNotFound(code.clone())
        })?;
        let next = self.guest_session(guest)?;
        Ok(self.replace_session(next))
    }

    /// Table code path: anonymous access, then the ticket-code step.
    pub fn resolve_table_code(&mut self, code: &str) -> Result<AccessStep, AccessError> {
        let code = normalize_code(code);
        Self::check_shape(GroupKind::Table, &code)?;
        self.restart_if_needed();

        debug!("looking up table code {}", code);
        let table = self.storage.get_table_by_id(&code).ok_or_else(|| {
            warn!("table code {} not found", code);
            AccessError::TableNotFound(code.clone())
        })?;
        let next = self.table_session(table)?;
        Ok(self.replace_session(next))
    }

    /// Ticket code entered on `TicketCodeView`: identifies a guest seated at
    /// the resolved table. A miss leaves the session on `TicketCodeView`.
    pub fn resolve_ticket_code(&mut self, code: &str) -> Result<AccessStep, AccessError> {
        let code = normalize_code(code);
        Self::check_shape(GroupKind::Ticket, &code)?;

        let (Some(table), Some(event)) = (self.session.table.clone(), self.session.event.clone())
        else {
            return Err(AccessError::entity("table", ""));
        };
        if self.session.step != AccessStep::TicketCodeView {
            return Err(AccessError::entity("table", table.id));
        }

        let guest = self
            .storage
            .get_guest_by_id(&code)
            .filter(|g| g.table_id.as_deref() == Some(table.id.as_str()) && g.event_id == event.id)
            .ok_or_else(|| {
                warn!("ticket code {} not seated at table {}", code, table.id);
                AccessError::GuestNotFound(code.clone())
            })?;

        Ok(self.replace_session(AccessSession {
            guest: Some(guest),
            table: Some(table),
            event: Some(event),
            anonymous: false,
            step: AccessStep::ConfirmationView,
        }))
    }

    /// Continue from `TicketCodeView` without a ticket code.
    pub fn skip_ticket_code(&mut self) -> AccessStep {
        if self.session.step != AccessStep::TicketCodeView {
            return self.session.step;
        }
        let mut next = self.session.clone();
        next.step = AccessStep::ConfirmationView;
        self.replace_session(next)
    }

    /// Resolve identifiers from an invitation URL. Guest wins over table.
    ///
    /// `view` is dimmed for the duration and restored once on every exit.
    pub fn resolve_direct_link<V: TransientView + ?Sized>(
        &mut self,
        link: &DirectLink,
        view: &mut V,
    ) -> Result<AccessStep, AccessError> {
        let _guard = DimGuard::new(view);
        if link.is_empty() {
            return Ok(self.session.step);
        }
        self.restart_if_needed();

        if let Some(guest_id) = &link.guest_id {
            let guest = self
                .storage
                .get_guest_by_id(guest_id)
                .ok_or_else(|| AccessError::entity("guest", guest_id.as_str()))?;
            if let Some(event_id) = &link.event_id {
                if &guest.event_id != event_id {
                    warn!("guest {} is not invited to event {}", guest.id, event_id);
                    return Err(AccessError::entity("guest", guest_id.as_str()));
                }
            }
            let next = self.guest_session(guest)?;
            return Ok(self.replace_session(next));
        }

        if let Some(table_id) = &link.table_id {
            let table = self
                .storage
                .get_table_by_id(table_id)
                .ok_or_else(|| AccessError::entity("table", table_id.as_str()))?;
            let next = self.table_session(table)?;
            return Ok(self.replace_session(next));
        }

        // Event only: preselect the event, stay on the main view.
        if let Some(event_id) = &link.event_id {
            let event = self.load_event(event_id)?;
            self.session = AccessSession {
                event: Some(event),
                ..AccessSession::default()
            };
        }
        Ok(self.session.step)
    }

    /// Scanned invitation path: validate the payload, then resolve event and
    /// guest. The guest must belong to the payload's event.
    pub fn resolve_qr_payload(&mut self, text: &str) -> Result<ScanResolution, AccessError> {
        let payload = QrPayload::parse(text).inspect_err(|e| warn!("rejected QR payload: {e}"))?;
        self.resolve_payload(&payload)
    }

    pub fn resolve_payload(&mut self, payload: &QrPayload) -> Result<ScanResolution, AccessError> {
        self.restart_if_needed();

        let event = self.load_event(&payload.event_id)?;
        let guest = self
            .storage
            .get_guest_by_id(&payload.guest_id)
            .filter(|g| g.event_id == event.id)
            .ok_or_else(|| {
                warn!("invitation guest {} not found", payload.guest_id);
                AccessError::entity("guest", payload.guest_id.as_str())
            })?;
        let table = self.load_guest_table(&guest);

        let resolution = ScanResolution {
            already_checked_in: guest.scanned,
            guest: guest.clone(),
            event: event.clone(),
            table: table.clone(),
        };
        self.replace_session(AccessSession {
            guest: Some(guest),
            table,
            event: Some(event),
            anonymous: false,
            step: AccessStep::ConfirmationView,
        });
        Ok(resolution)
    }

    /// Enter (or auto-completion) on the active main-view form.
    ///
    /// A lookup miss clears the form and puts focus back on its first cell.
    pub fn submit_form(&mut self, form: &mut AccessForm) -> Result<AccessStep, AccessError> {
        let kind = form.active().kind();
        let code = form.active().submit()?;
        let result = match kind {
            GroupKind::Table => self.resolve_table_code(&code),
            GroupKind::Guest | GroupKind::Ticket => self.resolve_guest_code(&code),
        };
        Self::clear_on_miss(form.active_mut(), &result);
        result
    }

    /// Enter (or auto-completion) on the ticket-code row.
    pub fn submit_ticket(&mut self, form: &mut AccessForm) -> Result<AccessStep, AccessError> {
        let code = form.ticket.submit()?;
        let result = self.resolve_ticket_code(&code);
        Self::clear_on_miss(&mut form.ticket, &result);
        result
    }

    fn clear_on_miss(group: &mut CodeGroup, result: &Result<AccessStep, AccessError>) {
        if let Err(e) = result {
            if e.clears_inputs() {
                group.clear();
            }
        }
    }
}
