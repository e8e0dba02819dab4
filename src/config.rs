use std::{env, fmt::Display, str::FromStr, time::Duration};

use log::{info, warn};

use crate::code_input::AUTO_VALIDATE_DELAY;
use crate::scanner::{CAPTURE_TIMEOUT, MAX_CAPTURE_WIDTH};

/// Ceiling on page-level session verification before the UI is forced into
/// a usable state.
pub const AUTH_VERIFY_CEILING: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub from: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind: String,
    pub data_dir: String,
    pub public_url: String,
    pub capture_timeout: Duration,
    pub max_capture_width: u32,
    pub auto_validate_delay: Duration,
    pub auth_ceiling: Duration,
    pub smtp: Option<SmtpConfig>,
    /// Operator registered at startup when no operator exists yet.
    pub bootstrap_operator: Option<(String, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1:3000".to_string(),
            data_dir: "database".to_string(),
            public_url: "http://localhost:3000".to_string(),
            capture_timeout: CAPTURE_TIMEOUT,
            max_capture_width: MAX_CAPTURE_WIDTH,
            auto_validate_delay: AUTO_VALIDATE_DELAY,
            auth_ceiling: AUTH_VERIFY_CEILING,
            smtp: None,
            bootstrap_operator: None,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let defaults = Config::default();
        Self {
            bind: try_load("SECURA_BIND", defaults.bind),
            data_dir: try_load("SECURA_DATA_DIR", defaults.data_dir),
            public_url: try_load("SECURA_PUBLIC_URL", defaults.public_url),
            capture_timeout: Duration::from_secs(try_load(
                "SECURA_CAPTURE_TIMEOUT_SECS",
                defaults.capture_timeout.as_secs(),
            )),
            max_capture_width: try_load("SECURA_MAX_CAPTURE_WIDTH", defaults.max_capture_width),
            auto_validate_delay: Duration::from_millis(try_load(
                "SECURA_AUTO_VALIDATE_DELAY_MS",
                defaults.auto_validate_delay.as_millis() as u64,
            )),
            auth_ceiling: Duration::from_millis(try_load(
                "SECURA_AUTH_CEILING_MS",
                defaults.auth_ceiling.as_millis() as u64,
            )),
            smtp: load_smtp(),
            bootstrap_operator: var("SECURA_ADMIN_USER").zip(var("SECURA_ADMIN_PASSWORD")),
        }
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match var(key) {
        None => {
            info!("{key} not set, using default: {default}");
            default
        }
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
            default
        }),
    }
}

fn load_smtp() -> Option<SmtpConfig> {
    let host = var("SECURA_SMTP_HOST")?;
    let (Some(user), Some(password)) = (var("SECURA_SMTP_USER"), var("SECURA_SMTP_PASSWORD"))
    else {
        warn!("SECURA_SMTP_HOST set without credentials, invitations will not be mailed");
        return None;
    };
    let from = var("SECURA_SMTP_FROM").unwrap_or_else(|| format!("Secura <{user}>"));
    Some(SmtpConfig {
        host,
        user,
        password,
        from,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        // Keys unique to this test so parallel tests do not interfere.
        unsafe {
            env::set_var("SECURA_TEST_WIDTH", "wide");
            env::set_var("SECURA_TEST_PORTLESS", "0.0.0.0:8080");
        }
        assert_eq!(try_load("SECURA_TEST_WIDTH", 1080u32), 1080);
        assert_eq!(
            try_load("SECURA_TEST_PORTLESS", "x".to_string()),
            "0.0.0.0:8080"
        );
        assert_eq!(try_load("SECURA_TEST_UNSET", 15u64), 15);
    }
}
