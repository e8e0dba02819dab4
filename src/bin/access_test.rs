use chrono::Utc;
use secura::access::{AccessResolver, AccessStep, DirectLink, TransientView};
use secura::checkin::{self, CheckInStats};
use secura::code_input::{AccessForm, FormMode};
use secura::models::{Event, Guest, GuestStatus, Table};
use secura::qr::QrPayload;
use secura::storage::{MemoryStore, Storage};
use secura::AccessError;

// Counts how often the loading overlay is put back
#[derive(Default)]
struct Overlay {
    dimmed: bool,
    restores: usize,
}

impl TransientView for Overlay {
    fn dim(&mut self) {
        self.dimmed = true;
    }

    fn restore(&mut self) {
        self.dimmed = false;
        self.restores += 1;
    }
}

fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store
        .save_event(Event {
            id: "evt_1".to_string(),
            name: "Autumn Gala".to_string(),
            date: "2026-11-01".to_string(),
            time: "19:00".to_string(),
            location: "Grand Hall".to_string(),
            welcome_message: Some("Welcome!".to_string()),
            active: true,
        })
        .unwrap();
    store
        .save_table(Table {
            id: "AB-12".to_string(),
            event_id: "evt_1".to_string(),
            table_number: 12,
            table_name: Some("Rose".to_string()),
            capacity: 8,
        })
        .unwrap();
    for (id, first, table) in [("K7Q2", "Ada", Some("AB-12")), ("g_1", "Alan", None)] {
        store
            .save_guest(&Guest {
                id: id.to_string(),
                event_id: "evt_1".to_string(),
                first_name: first.to_string(),
                last_name: "Guest".to_string(),
                email: None,
                phone: None,
                table_id: table.map(str::to_string),
                status: GuestStatus::Confirmed,
                scanned: false,
                scanned_at: None,
            })
            .unwrap();
    }
    store
}

fn test_guest_code_flow() {
    println!("\n====== Testing guest code entry ======");
    let store = seeded_store();
    let mut resolver = AccessResolver::new(&store);
    let mut form = AccessForm::new();

    let outcome = form.guest.paste("k7q2");
    assert_eq!(outcome.completed.as_deref(), Some("K7Q2"));
    println!("✓ Pasted lowercase code completes as K7Q2");

    let step = resolver.submit_form(&mut form).unwrap();
    assert_eq!(step, AccessStep::ConfirmationView);
    assert_eq!(resolver.session().guest.as_ref().unwrap().first_name, "Ada");
    println!("✓ Guest code reaches the confirmation view");

    resolver.back_to_main();
    assert!(resolver.session().guest.is_none());
    println!("✓ Back to main clears the session");
}

fn test_table_then_ticket() {
    println!("\n====== Testing table code with ticket code ======");
    let store = seeded_store();
    let mut resolver = AccessResolver::new(&store);
    let mut form = AccessForm::new();
    form.switch_mode(FormMode::Table);
    form.table.paste("ab12");

    assert_eq!(resolver.submit_form(&mut form).unwrap(), AccessStep::TicketCodeView);
    assert!(resolver.session().anonymous);
    println!("✓ Table code AB-12 opens the ticket step anonymously");

    form.ticket.paste("XXXX");
    let err = resolver.submit_ticket(&mut form).unwrap_err();
    assert_eq!(err, AccessError::GuestNotFound("XXXX".to_string()));
    assert!(form.ticket.values().iter().all(Option::is_none));
    println!("✓ Unknown ticket code clears the ticket row");

    form.ticket.paste("K7Q2");
    assert_eq!(resolver.submit_ticket(&mut form).unwrap(), AccessStep::ConfirmationView);
    println!("✓ Ticket code of a seated guest confirms");
}

fn test_qr_and_checkin() {
    println!("\n====== Testing QR check-in ======");
    let store = seeded_store();
    let mut resolver = AccessResolver::new(&store);
    let payload = QrPayload::new("evt_1", "g_1").encode();

    let resolution = resolver.resolve_qr_payload(&payload).unwrap();
    assert!(!resolution.already_checked_in);
    println!("✓ Invitation {} resolves to {}", payload, resolution.guest.full_name());

    let first = checkin::commit(&store, "g_1", Utc::now()).unwrap();
    let second = checkin::commit(&store, "g_1", Utc::now()).unwrap();
    assert!(first.is_new());
    assert!(!second.is_new());
    assert_eq!(store.get_all_scans().len(), 1);
    println!("✓ Double commit records exactly one scan");

    let stats = CheckInStats::read(&store, Utc::now().date_naive());
    assert_eq!(stats.today_scans, 1);
    assert_eq!(stats.total_present, 1);
    println!("✓ Stats reflect the commit immediately");
}

fn test_direct_link_overlay() {
    println!("\n====== Testing direct links ======");
    let store = seeded_store();
    let mut resolver = AccessResolver::new(&store);

    let mut overlay = Overlay::default();
    let link = DirectLink::from_query("?guestId=K7Q2&tableId=AB-12");
    assert_eq!(
        resolver.resolve_direct_link(&link, &mut overlay).unwrap(),
        AccessStep::ConfirmationView
    );
    assert!(!resolver.session().anonymous);
    assert_eq!(overlay.restores, 1);
    println!("✓ Guest id wins over table id; overlay restored once");

    let mut overlay = Overlay::default();
    let link = DirectLink::from_query("guestId=missing");
    assert!(resolver.resolve_direct_link(&link, &mut overlay).is_err());
    assert!(!overlay.dimmed);
    assert_eq!(overlay.restores, 1);
    println!("✓ Failed link still restores the overlay once");
}

pub fn run_tests() {
    println!("Starting access flow smoke tests");
    test_guest_code_flow();
    test_table_then_ticket();
    test_qr_and_checkin();
    test_direct_link_overlay();
    println!("All tests passed!");
}

fn main() {
    run_tests();
}
