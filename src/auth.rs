#![cfg(not(tarpaulin_include))]

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    Form,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use lazy_static::lazy_static;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use uuid::Uuid;

/// Name of the cookie holding the operator session id.
pub const SESSION_COOKIE: &str = "session";

const OPERATORS_FILE: &str = "operators.json";
const SESSION_DURATION: u64 = 24 * 60 * 60; // 24 hours in seconds

/// A desk operator allowed to run the scanner and admin endpoints.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Operator {
    pub username: String,
    /// Argon2 PHC string; the plaintext is never stored.
    pub password_hash: String,
}

/// Login form data.
#[derive(Debug, Serialize, Deserialize)]
pub struct OperatorCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub operator: String,
    pub expires_at: SystemTime,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("username and password cannot be empty")]
    EmptyCredentials,
    #[error("operator {0} already exists")]
    Exists(String),
    #[error("operator file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("operator file is corrupt: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("password hashing failed")]
    Hash,
}

lazy_static! {
    static ref SESSIONS: RwLock<HashMap<String, Session>> = RwLock::new(HashMap::new());
}

/// Operator accounts kept as a JSON map in the data directory.
#[derive(Debug, Clone)]
pub struct OperatorStore {
    path: PathBuf,
}

impl OperatorStore {
    /// Opens `<data_dir>/operators.json`, creating an empty map if missing.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, AuthError> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(OPERATORS_FILE);
        if !path.exists() {
            fs::write(&path, b"{}")?;
        }
        Ok(OperatorStore { path })
    }

    pub fn operators(&self) -> Result<HashMap<String, Operator>, AuthError> {
        let contents = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn save(&self, operators: &HashMap<String, Operator>) -> Result<(), AuthError> {
        let json = serde_json::to_string_pretty(operators)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    pub fn register(&self, username: &str, password: &str) -> Result<(), AuthError> {
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::EmptyCredentials);
        }
        let mut operators = self.operators()?;
        if operators.contains_key(username) {
            return Err(AuthError::Exists(username.to_string()));
        }
        let operator = Operator {
            username: username.to_string(),
            password_hash: hash_password(password)?,
        };
        operators.insert(username.to_string(), operator);
        self.save(&operators)?;
        info!("registered operator {username}");
        Ok(())
    }

    /// `Ok(false)` for an unknown operator or a wrong password.
    pub fn verify(&self, username: &str, password: &str) -> Result<bool, AuthError> {
        let operators = self.operators()?;
        Ok(operators
            .get(username)
            .is_some_and(|op| verify_password(password, &op.password_hash)))
    }

    pub fn is_empty(&self) -> Result<bool, AuthError> {
        Ok(self.operators()?.is_empty())
    }
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::Hash)
}

fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => {
            warn!("stored operator hash is not a valid PHC string");
            false
        }
    }
}

pub fn create_session(operator: &str) -> String {
    let session_id = Uuid::new_v4().to_string();
    let session = Session {
        operator: operator.to_string(),
        expires_at: SystemTime::now() + Duration::from_secs(SESSION_DURATION),
    };
    let mut sessions = SESSIONS.write().unwrap_or_else(|e| e.into_inner());
    sessions.insert(session_id.clone(), session);
    session_id
}

/// Operator name for a live session. Expired sessions are dropped.
pub fn validate_session(session_id: &str) -> Option<String> {
    let now = SystemTime::now();
    {
        let sessions = SESSIONS.read().unwrap_or_else(|e| e.into_inner());
        match sessions.get(session_id) {
            Some(session) if session.expires_at > now => return Some(session.operator.clone()),
            Some(_) => {}
            None => return None,
        }
    }
    end_session(session_id);
    None
}

pub fn end_session(session_id: &str) {
    let mut sessions = SESSIONS.write().unwrap_or_else(|e| e.into_inner());
    sessions.remove(session_id);
}

/// Checks the session cookie, bounded by `ceiling`.
///
/// If verification does not finish in time the request is sent to the login
/// page instead of hanging.
pub async fn verify_within(jar: &CookieJar, ceiling: Duration) -> Option<String> {
    let session_id = jar.get(SESSION_COOKIE)?.value().to_string();
    let check = tokio::task::spawn_blocking(move || validate_session(&session_id));
    match tokio::time::timeout(ceiling, check).await {
        Ok(Ok(operator)) => operator,
        Ok(Err(e)) => {
            warn!("session verification task failed: {e}");
            None
        }
        Err(_) => {
            warn!("session verification exceeded {}ms", ceiling.as_millis());
            None
        }
    }
}

pub async fn handle_login(
    State(store): State<OperatorStore>,
    jar: CookieJar,
    Form(credentials): Form<OperatorCredentials>,
) -> Response {
    match store.verify(&credentials.username, &credentials.password) {
        Ok(true) => {
            info!("operator {} logged in", credentials.username);
            let session_id = create_session(&credentials.username);
            let cookie = Cookie::build((SESSION_COOKIE, session_id))
                .path("/")
                .http_only(true);
            (jar.add(cookie), Redirect::to("/desk")).into_response()
        }
        Ok(false) => {
            warn!("failed login for {}", credentials.username);
            (StatusCode::UNAUTHORIZED, "Invalid username or password").into_response()
        }
        Err(e) => {
            warn!("login error: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Authentication error").into_response()
        }
    }
}

pub async fn handle_logout(jar: CookieJar) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        end_session(cookie.value());
    }
    let cookie = Cookie::build((SESSION_COOKIE, "")).path("/");
    (jar.remove(cookie), Redirect::to("/login"))
}

/// Middleware for operator-only routes. Stores the operator name in the
/// request extensions.
pub async fn require_auth(
    State(ceiling): State<Duration>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    match verify_within(&jar, ceiling).await {
        Some(operator) => {
            request.extensions_mut().insert(operator);
            next.run(request).await
        }
        None if request.uri().path().starts_with("/api/") => {
            (StatusCode::UNAUTHORIZED, "Login required").into_response()
        }
        None => Redirect::to("/login").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_verify() {
        let dir = tempfile::tempdir().unwrap();
        let store = OperatorStore::open(dir.path()).unwrap();
        assert!(store.is_empty().unwrap());
        store.register("desk", "hunter2").unwrap();
        assert!(store.verify("desk", "hunter2").unwrap());
        assert!(!store.verify("desk", "wrong").unwrap());
        assert!(!store.verify("nobody", "hunter2").unwrap());
        assert!(matches!(
            store.register("desk", "again"),
            Err(AuthError::Exists(_))
        ));
    }

    #[test]
    fn sessions_validate_until_ended() {
        let id = create_session("desk");
        assert_eq!(validate_session(&id).as_deref(), Some("desk"));
        end_session(&id);
        assert_eq!(validate_session(&id), None);
    }
}
