#![cfg(not(tarpaulin_include))]

use axum::{
    Json, Router,
    body::Bytes,
    extract::{FromRef, Multipart, Path, Query, RawQuery, State},
    http::{StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::access::{AccessResolver, AccessSession, AccessStep, DirectLink, ScanResolution};
use crate::auth::{self, OperatorStore};
use crate::checkin::{self, CheckInStats};
use crate::config::Config;
use crate::error::{AccessError, CheckInError};
use crate::invitation::Invitation;
use crate::mailer::Mailer;
use crate::report;
use crate::scanner::{NoCamera, RqrrDecoder, Scanner};
use crate::snapshot;
use crate::storage::{FileStore, Storage};

/// Cookie identifying one browser's access flow.
const DESK_COOKIE: &str = "desk";

/// Desks idle longer than this are dropped.
const DESK_IDLE: Duration = Duration::from_secs(2 * 60 * 60);
const MAX_DESKS: usize = 1024;

type Resolver = AccessResolver<Arc<FileStore>>;

/// Per-browser values keyed by desk id, evicted when idle or over capacity.
struct Desks<R> {
    entries: HashMap<String, (R, Instant)>,
    idle: Duration,
    capacity: usize,
}

impl<R> Desks<R> {
    fn new(idle: Duration, capacity: usize) -> Self {
        Desks {
            entries: HashMap::new(),
            idle,
            capacity,
        }
    }

    fn get_or_insert_with(&mut self, desk: &str, now: Instant, make: impl FnOnce() -> R) -> &mut R {
        if !self.entries.contains_key(desk) {
            self.evict(now);
        }
        let entry = self
            .entries
            .entry(desk.to_string())
            .or_insert_with(|| (make(), now));
        entry.1 = now;
        &mut entry.0
    }

    fn evict(&mut self, now: Instant) {
        let idle = self.idle;
        let before = self.entries.len();
        self.entries
            .retain(|_, (_, last)| now.saturating_duration_since(*last) < idle);
        while self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, (_, last))| *last)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => self.entries.remove(&id),
                None => break,
            };
        }
        let dropped = before - self.entries.len();
        if dropped > 0 {
            debug!("evicted {dropped} desk sessions");
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

pub struct AppState {
    store: Arc<FileStore>,
    operators: OperatorStore,
    desks: Mutex<Desks<Resolver>>,
    scanner: Mutex<Scanner<NoCamera, RqrrDecoder>>,
    config: Config,
}

impl FromRef<Arc<AppState>> for OperatorStore {
    fn from_ref(state: &Arc<AppState>) -> Self {
        state.operators.clone()
    }
}

impl AppState {
    fn with_desk<T>(&self, desk: &str, f: impl FnOnce(&mut Resolver) -> T) -> T {
        let mut desks = lock(&self.desks);
        let resolver = desks.get_or_insert_with(desk, Instant::now(), || {
            let mut resolver = AccessResolver::new(Arc::clone(&self.store));
            let id = desk.to_string();
            resolver.subscribe(move |change| {
                debug!("desk {id}: {:?} -> {:?}", change.from, change.to);
            });
            resolver
        });
        f(resolver)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Deserialize)]
struct CodeRequest {
    code: String,
}

#[derive(Deserialize)]
struct ScanRequest {
    payload: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsQuery {
    event_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessBody {
    status: &'static str,
    step: AccessStep,
    view: &'static str,
    session: AccessSession,
}

impl From<&Resolver> for AccessBody {
    fn from(resolver: &Resolver) -> Self {
        AccessBody {
            status: "ok",
            step: resolver.step(),
            view: resolver.step().view_id(),
            session: resolver.session().clone(),
        }
    }
}

#[derive(Serialize)]
struct ScanBody {
    status: &'static str,
    #[serde(flatten)]
    resolution: ScanResolution,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientConfig {
    auto_validate_delay_ms: u64,
    capture_timeout_secs: u64,
    max_capture_width: u32,
    auth_ceiling_ms: u64,
}

#[derive(Serialize)]
struct InviteBody {
    status: &'static str,
    invitation: Invitation,
    mailed: bool,
}

#[derive(Serialize)]
struct MessageBody {
    status: &'static str,
    message: String,
}

fn failure(status: StatusCode, message: impl Display) -> Response {
    (
        status,
        Json(MessageBody {
            status: "error",
            message: message.to_string(),
        }),
    )
        .into_response()
}

/// Desk id from the cookie, minting a new one on first visit.
fn desk_id(jar: CookieJar) -> (CookieJar, String) {
    if let Some(cookie) = jar.get(DESK_COOKIE) {
        let id = cookie.value().to_string();
        return (jar, id);
    }
    let id = Uuid::new_v4().to_string();
    let cookie = Cookie::build((DESK_COOKIE, id.clone()))
        .path("/")
        .http_only(true);
    (jar.add(cookie), id)
}

fn on_desk(
    state: &AppState,
    jar: CookieJar,
    f: impl FnOnce(&mut Resolver) -> Result<(), AccessError>,
) -> Response {
    let (jar, desk) = desk_id(jar);
    let result = state.with_desk(&desk, |resolver| {
        f(&mut *resolver).map(|()| Json(AccessBody::from(&*resolver)))
    });
    (jar, result).into_response()
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(FileStore::open(&config.data_dir)?);
    let operators = OperatorStore::open(&config.data_dir)?;
    if operators.is_empty()? {
        match &config.bootstrap_operator {
            Some((username, password)) => operators.register(username, password)?,
            None => warn!(
                "no operators registered; set SECURA_ADMIN_USER and SECURA_ADMIN_PASSWORD to create one"
            ),
        }
    }

    let scanner = Scanner::with_limits(
        NoCamera,
        RqrrDecoder,
        config.capture_timeout,
        config.max_capture_width,
    );
    let bind = config.bind.clone();
    let auth_ceiling = config.auth_ceiling;

    let app_state = Arc::new(AppState {
        store,
        operators,
        desks: Mutex::new(Desks::new(DESK_IDLE, MAX_DESKS)),
        scanner: Mutex::new(scanner),
        config,
    });

    let operator_routes: Router<Arc<AppState>> = Router::new()
        .route("/desk", get(serve_desk))
        .route("/api/scan/camera", post(scan_camera))
        .route("/api/scan/qr", post(scan_qr))
        .route("/api/scan/upload", post(scan_upload))
        .route("/api/checkin/:guest_id", post(check_in))
        .route("/api/stats", get(stats))
        .route("/api/report.csv", get(report_csv))
        .route("/api/report.xlsx", get(report_xlsx))
        .route("/api/export", get(export_dataset))
        .route("/api/import", post(import_dataset))
        .route("/api/guests/:guest_id/invite", post(invite_guest))
        .route_layer(middleware::from_fn_with_state(
            auth_ceiling,
            auth::require_auth,
        ));

    let app = Router::new()
        .route("/", get(serve_access))
        .route("/access", get(serve_access))
        .route("/login", get(serve_login).post(auth::handle_login))
        .route("/logout", get(auth::handle_logout))
        .route("/api/config", get(client_config))
        .route("/api/access/state", get(access_state))
        .route("/api/access/guest", post(access_guest))
        .route("/api/access/table", post(access_table))
        .route("/api/access/ticket", post(access_ticket))
        .route("/api/access/ticket/skip", post(skip_ticket))
        .route("/api/access/link", get(access_link))
        .route("/api/access/reset", post(access_reset))
        .merge(operator_routes)
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let listener = TcpListener::bind(&bind).await?;
    let addr = listener.local_addr()?;
    println!("Listening on http://{addr}");
    if addr.ip().is_unspecified() {
        match local_ip_address::local_ip() {
            Ok(ip) => println!("On your network: http://{ip}:{}", addr.port()),
            Err(e) => warn!("could not determine LAN address: {e}"),
        }
    }
    axum::serve(listener, app).await?;

    Ok(())
}

async fn serve_access() -> Html<&'static str> {
    Html(include_str!("./static/access.html"))
}

async fn serve_login() -> Html<&'static str> {
    Html(include_str!("./static/login.html"))
}

async fn serve_desk() -> Html<&'static str> {
    Html(include_str!("./static/desk.html"))
}

async fn client_config(State(state): State<Arc<AppState>>) -> Json<ClientConfig> {
    let config = &state.config;
    Json(ClientConfig {
        auto_validate_delay_ms: config.auto_validate_delay.as_millis() as u64,
        capture_timeout_secs: config.capture_timeout.as_secs(),
        max_capture_width: config.max_capture_width,
        auth_ceiling_ms: config.auth_ceiling.as_millis() as u64,
    })
}

async fn access_state(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    if jar.get(DESK_COOKIE).is_none() {
        // Nothing to report yet; don't open a desk for a read.
        let fresh = AccessResolver::new(Arc::clone(&state.store));
        return Json(AccessBody::from(&fresh)).into_response();
    }
    on_desk(&state, jar, |_| Ok(()))
}

async fn access_guest(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<CodeRequest>,
) -> Response {
    on_desk(&state, jar, |r| r.resolve_guest_code(&req.code).map(|_| ()))
}

async fn access_table(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<CodeRequest>,
) -> Response {
    on_desk(&state, jar, |r| r.resolve_table_code(&req.code).map(|_| ()))
}

async fn access_ticket(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<CodeRequest>,
) -> Response {
    on_desk(&state, jar, |r| r.resolve_ticket_code(&req.code).map(|_| ()))
}

async fn skip_ticket(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    on_desk(&state, jar, |r| {
        r.skip_ticket_code();
        Ok(())
    })
}

async fn access_link(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    RawQuery(query): RawQuery,
) -> Response {
    let link = DirectLink::from_query(query.as_deref().unwrap_or_default());
    on_desk(&state, jar, |r| r.resolve_direct_link(&link, &mut ()).map(|_| ()))
}

async fn access_reset(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    on_desk(&state, jar, |r| {
        r.back_to_main();
        Ok(())
    })
}

/// The server has no capture device; clients fall back to uploads.
async fn scan_camera(State(state): State<Arc<AppState>>) -> Response {
    let mut scanner = lock(&state.scanner);
    match scanner.start_camera(Instant::now()) {
        Ok(()) => Json(MessageBody {
            status: "ok",
            message: format!(
                "camera started, capture within {}s",
                state.config.capture_timeout.as_secs()
            ),
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

fn scan_response(jar: CookieJar, result: Result<ScanResolution, AccessError>) -> Response {
    let body = result.map(|resolution| {
        Json(ScanBody {
            status: "ok",
            resolution,
        })
    });
    (jar, body).into_response()
}

async fn scan_qr(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<ScanRequest>,
) -> Response {
    let (jar, desk) = desk_id(jar);
    let result = state.with_desk(&desk, |r| r.resolve_qr_payload(&req.payload));
    scan_response(jar, result)
}

async fn scan_upload(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut multipart: Multipart,
) -> Response {
    let mut image = Vec::new();
    while let Some(field) = multipart.next_field().await.unwrap_or(None) {
        if field.name() == Some("image") {
            image = field.bytes().await.unwrap_or_default().to_vec();
        }
    }
    if image.is_empty() {
        return failure(StatusCode::BAD_REQUEST, "No image received");
    }

    let (jar, desk) = desk_id(jar);
    let mut scanner = lock(&state.scanner);
    let result = state.with_desk(&desk, |r| scanner.upload_into(&image, r));
    scan_response(jar, result)
}

async fn check_in(
    State(state): State<Arc<AppState>>,
    Path(guest_id): Path<String>,
) -> Result<Json<checkin::CheckInOutcome>, CheckInError> {
    let outcome = checkin::commit(&*state.store, &guest_id, Utc::now())?;
    Ok(Json(outcome))
}

async fn stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Json<CheckInStats> {
    let today = Utc::now().date_naive();
    let stats = match query.event_id {
        Some(event_id) => CheckInStats::read_for_event(&*state.store, &event_id, today),
        None => CheckInStats::read(&*state.store, today),
    };
    Json(stats)
}

fn download(content_type: &'static str, filename: &str, body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        Bytes::from(body),
    )
        .into_response()
}

async fn report_csv(State(state): State<Arc<AppState>>) -> Response {
    let csv = report::to_csv(&state.store.get_all_scans());
    download("text/csv", "attendance.csv", csv.into_bytes())
}

async fn report_xlsx(State(state): State<Arc<AppState>>) -> Response {
    match report::to_xlsx(&state.store.get_all_scans()) {
        Ok(buffer) => download(
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            "attendance.xlsx",
            buffer,
        ),
        Err(e) => {
            error!("xlsx report failed: {e}");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

async fn export_dataset(State(state): State<Arc<AppState>>) -> Response {
    match snapshot::snapshot_to_bytes(&state.store.dataset()) {
        Ok(buffer) => download("application/gzip", "secura.bin.gz", buffer),
        Err(e) => {
            error!("snapshot export failed: {e}");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

async fn import_dataset(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Response {
    let mut file_data = Vec::new();
    while let Some(field) = multipart.next_field().await.unwrap_or(None) {
        if field.name() == Some("snapshot") {
            file_data = field.bytes().await.unwrap_or_default().to_vec();
        }
    }
    if file_data.is_empty() {
        return failure(StatusCode::BAD_REQUEST, "No file data received");
    }

    let dataset = match snapshot::snapshot_from_bytes(&file_data) {
        Ok(dataset) => dataset,
        Err(e) => {
            warn!("rejected snapshot upload: {e}");
            return failure(StatusCode::BAD_REQUEST, format!("Invalid snapshot: {e}"));
        }
    };
    let summary = format!(
        "Imported {} events, {} guests, {} tables, {} scans",
        dataset.events.len(),
        dataset.guests.len(),
        dataset.tables.len(),
        dataset.scans.len()
    );
    if let Err(e) = state.store.replace(dataset) {
        error!("snapshot import failed: {e}");
        return failure(StatusCode::INTERNAL_SERVER_ERROR, e);
    }
    // Sessions may reference entities that no longer exist.
    lock(&state.desks).clear();
    info!("{summary}");
    Json(MessageBody {
        status: "ok",
        message: summary,
    })
    .into_response()
}

async fn invite_guest(
    State(state): State<Arc<AppState>>,
    Path(guest_id): Path<String>,
) -> Response {
    let Some(guest) = state.store.get_guest_by_id(&guest_id) else {
        return AccessError::entity("guest", guest_id).into_response();
    };
    let Some(event) = state.store.get_event_by_id(&guest.event_id) else {
        return AccessError::entity("event", guest.event_id.as_str()).into_response();
    };
    let invitation = Invitation::for_guest(&guest, &event, &state.config.public_url);

    let mailed = match (&state.config.smtp, guest.email.is_some()) {
        (Some(smtp), true) => {
            let smtp = smtp.clone();
            let letter = invitation.clone();
            let sent = tokio::task::spawn_blocking(move || {
                Mailer::new(&smtp)
                    .and_then(|mailer| mailer.send_invitation(&guest, &event, &letter))
                    .map_err(|e| e.to_string())
            })
            .await;
            match sent {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    error!("invitation mail for {guest_id} failed: {e}");
                    false
                }
                Err(e) => {
                    error!("invitation mail task for {guest_id} failed: {e}");
                    false
                }
            }
        }
        _ => false,
    };

    Json(InviteBody {
        status: "ok",
        invitation,
        mailed,
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_desks_are_evicted() {
        let start = Instant::now();
        let mut desks = Desks::new(Duration::from_secs(60), 100);
        *desks.get_or_insert_with("a", start, || 0) += 1;
        desks.get_or_insert_with("b", start + Duration::from_secs(30), || 0);

        let later = start + Duration::from_secs(70);
        desks.get_or_insert_with("c", later, || 0);
        assert_eq!(desks.len(), 2);
        assert_eq!(*desks.get_or_insert_with("a", later, || 5), 5);
    }

    #[test]
    fn desk_count_is_capped() {
        let start = Instant::now();
        let mut desks = Desks::new(Duration::from_secs(3600), 3);
        for i in 0..10u64 {
            let id = format!("desk-{i}");
            desks.get_or_insert_with(&id, start + Duration::from_secs(i), || i);
        }
        assert_eq!(desks.len(), 3);
        assert_eq!(*desks.get_or_insert_with("desk-9", start + Duration::from_secs(11), || 99), 9);
    }

    #[test]
    fn touching_a_desk_keeps_it_alive() {
        let start = Instant::now();
        let mut desks = Desks::new(Duration::from_secs(60), 100);
        desks.get_or_insert_with("a", start, || 1);
        desks.get_or_insert_with("a", start + Duration::from_secs(50), || 2);
        desks.get_or_insert_with("b", start + Duration::from_secs(100), || 3);
        assert_eq!(*desks.get_or_insert_with("a", start + Duration::from_secs(100), || 4), 1);
    }

    #[test]
    fn access_page_cells_handle_paste_and_single_completion() {
        let page = include_str!("./static/access.html");
        assert!(page.contains("addEventListener('paste'"));
        assert!(page.contains("inputs[i - 1].value = ''"));
        assert!(page.contains("if (now && !complete)"));
    }
}
