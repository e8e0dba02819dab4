#![cfg(not(tarpaulin_include))]

use chrono::Utc;
use secura::access::{AccessResolver, AccessSession};
use secura::checkin::{self, CheckInOutcome, CheckInStats};
use secura::code_input::{AccessForm, FormMode};
use secura::invitation::Invitation;
use secura::scanner::{NoCamera, RqrrDecoder, Scanner};
use secura::storage::{FileStore, Storage};
use secura::{AccessError, Config, DirectLink, codes, report, snapshot};
use std::env;
use std::fs;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Instant;

fn print_session(session: &AccessSession) {
    println!("  view:  {}", session.step.view_id());
    if let Some(event) = &session.event {
        println!("  event: {} ({} {}, {})", event.name, event.date, event.time, event.location);
    }
    if let Some(table) = &session.table {
        let name = table.table_name.as_deref().unwrap_or("");
        println!("  table: {} #{} {}", table.id, table.table_number, name);
    }
    match &session.guest {
        Some(guest) => {
            let mark = if guest.scanned { " [checked in]" } else { "" };
            println!("  guest: {} ({}){}", guest.full_name(), guest.id, mark);
        }
        None if session.anonymous => println!("  guest: anonymous table access"),
        None => {}
    }
}

fn status_of(result: Result<(), AccessError>) -> String {
    match result {
        Ok(()) => String::from("ok"),
        Err(e) => {
            println!("  {}", e.user_message());
            e.to_string()
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Config::load();
    let args: Vec<String> = env::args().collect();
    let data_dir = args.get(1).cloned().unwrap_or(config.data_dir.clone());
    if args.len() > 2 {
        eprintln!("Usage: {} [data_dir]", args[0]);
        return Ok(());
    }

    let store = Arc::new(FileStore::open(&data_dir)?);
    println!("Using {}", store.path().display());
    if store.dataset().events.is_empty() {
        println!("No events loaded yet; use `import <snapshot.bin.gz>`.");
    }

    let mut resolver = AccessResolver::new(Arc::clone(&store));
    resolver.subscribe(|change| println!("  -> {}", change.to.view_id()));
    let mut form = AccessForm::new();
    let mut scanner = Scanner::with_limits(
        NoCamera,
        RqrrDecoder,
        config.capture_timeout,
        config.max_capture_width,
    );

    let mut start_time = Instant::now();
    let mut status = String::from("ok");
    loop {
        let elapsed_time = start_time.elapsed().as_secs_f64();
        print!("[{:.1}] ({}) > ", elapsed_time, status);
        io::stdout().flush()?;

        let mut command = String::new();
        if io::stdin().read_line(&mut command)? == 0 {
            break;
        }
        let command = command.trim();
        start_time = Instant::now();

        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };

        status = match name {
            "" => String::from("invalid command"),
            "q" => break,
            "help" => {
                println!("Commands:");
                println!("  guest <code>: Enter a guest code");
                println!("  table <code>: Enter a table code");
                println!("  ticket <code>: Enter a ticket code after a table code");
                println!("  skip: Continue without a ticket code");
                println!("  qr <payload>: Resolve a scanned invitation payload");
                println!("  scan <image>: Decode an invitation from an image file");
                println!("  link <query>: Resolve direct-link parameters (guestId=..&eventId=..)");
                println!("  checkin [guestId]: Check in the given or the confirmed guest");
                println!("  stats: Show attendance figures");
                println!("  invite <guestId>: Print a guest's invitation");
                println!("  codes: Suggest unused guest and table codes");
                println!("  report <file.csv>: Write the attendance log");
                println!("  export <file> / import <file>: Dataset snapshot");
                println!("  reset: Back to the main view");
                println!("  q: Quit");
                String::from("ok")
            }
            "guest" | "table" => {
                form.switch_mode(if name == "guest" {
                    FormMode::Guest
                } else {
                    FormMode::Table
                });
                form.active_mut().clear();
                form.active_mut().paste(arg);
                let result = resolver.submit_form(&mut form).map(|_| ());
                if result.is_ok() {
                    form.clear_all();
                }
                status_of(result)
            }
            "ticket" => {
                form.ticket.clear();
                form.ticket.paste(arg);
                let result = resolver.submit_ticket(&mut form).map(|_| ());
                if result.is_ok() {
                    form.ticket.clear();
                }
                status_of(result)
            }
            "skip" => {
                resolver.skip_ticket_code();
                String::from("ok")
            }
            "qr" => status_of(resolver.resolve_qr_payload(arg).map(|_| ())),
            "scan" => match fs::read(arg) {
                Ok(bytes) => status_of(scanner.upload_into(&bytes, &mut resolver).map(|_| ())),
                Err(e) => format!("cannot read {arg}: {e}"),
            },
            "link" => status_of(
                resolver
                    .resolve_direct_link(&DirectLink::from_query(arg), &mut ())
                    .map(|_| ()),
            ),
            "checkin" => {
                let guest_id = if arg.is_empty() {
                    resolver.session().guest.as_ref().map(|g| g.id.clone())
                } else {
                    Some(arg.to_string())
                };
                match guest_id {
                    None => String::from("no guest confirmed"),
                    Some(guest_id) => match checkin::commit(&*store, &guest_id, Utc::now()) {
                        Ok(CheckInOutcome::CheckedIn { scan, .. }) => {
                            println!("  checked in {} at {}", scan.guest_name, scan.scanned_at);
                            String::from("ok")
                        }
                        Ok(CheckInOutcome::AlreadyCheckedIn { guest, scanned_at }) => {
                            match scanned_at {
                                Some(at) => println!("  {} already checked in at {}", guest.full_name(), at),
                                None => println!("  {} already checked in", guest.full_name()),
                            }
                            String::from("already checked in")
                        }
                        Err(e) => e.to_string(),
                    },
                }
            }
            "stats" => {
                let stats = CheckInStats::read(&*store, Utc::now().date_naive());
                println!(
                    "  today: {}  total scans: {}  present: {}/{}",
                    stats.today_scans, stats.total_scans, stats.total_present, stats.total_guests
                );
                String::from("ok")
            }
            "invite" => match store.get_guest_by_id(arg) {
                Some(guest) => match store.get_event_by_id(&guest.event_id) {
                    Some(event) => {
                        let invitation = Invitation::for_guest(&guest, &event, &config.public_url);
                        println!("  code: {}", invitation.guest_code);
                        println!("  link: {}", invitation.direct_link);
                        println!("  qr:   {}", invitation.qr_payload);
                        String::from("ok")
                    }
                    None => format!("event {} not found", guest.event_id),
                },
                None => format!("guest {arg} not found"),
            },
            "codes" => {
                match (codes::generate_guest_code(&*store), codes::generate_table_code(&*store)) {
                    (Some(guest), Some(table)) => {
                        println!("  guest code: {guest}  table code: {table}");
                        String::from("ok")
                    }
                    _ => String::from("no unused code found"),
                }
            }
            "report" if !arg.is_empty() => match fs::write(arg, report::to_csv(&store.get_all_scans())) {
                Ok(()) => String::from("ok"),
                Err(e) => e.to_string(),
            },
            "export" if !arg.is_empty() => match snapshot::save_snapshot(&store.dataset(), arg) {
                Ok(()) => String::from("ok"),
                Err(e) => e.to_string(),
            },
            "import" if !arg.is_empty() => match snapshot::load_snapshot(arg) {
                Ok(dataset) => match store.replace(dataset) {
                    Ok(()) => {
                        resolver.back_to_main();
                        form.clear_all();
                        String::from("ok")
                    }
                    Err(e) => e.to_string(),
                },
                Err(e) => e.to_string(),
            },
            "reset" => {
                resolver.back_to_main();
                form.clear_all();
                String::from("ok")
            }
            _ => String::from("invalid command"),
        };

        print_session(resolver.session());
    }

    Ok(())
}
