//! Typed relay configuration read from the process environment.

use std::env;
use std::time::Duration;

use crate::error::RelayError;

pub const SESSION_ID_ENV: &str = "PIPEBRIDGE_SESSION_ID";
pub const LISTEN_PORT_ENV: &str = "PIPEBRIDGE_LISTEN_PORT";
pub const SERVER_URL_ENV: &str = "PIPEBRIDGE_SERVER_URL";
pub const API_USER_ENV: &str = "PIPEBRIDGE_API_USER";
pub const API_KEY_ENV: &str = "PIPEBRIDGE_API_KEY";

/// Default TCP listen port when `PIPEBRIDGE_LISTEN_PORT` is unset.
pub const DEFAULT_LISTEN_PORT: u16 = 51711;

/// Wait before the first discovery message, giving the peer's listener
/// time to start. A pragmatic settle delay, not a synchronization primitive.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Relay bootstrap configuration.
///
/// The launcher process hands the session id and channel parameters to the
/// host application through environment variables; [`from_env`](Self::from_env)
/// reads them all in one batch. The hub credentials are opaque to the core —
/// they are forwarded to the host-owned session layer untouched.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub session_id: String,
    pub listen_port: u16,
    pub server_url: Option<String>,
    pub api_user: Option<String>,
    pub api_key: Option<String>,
    pub settle_delay: Duration,
}

impl RelayConfig {
    pub fn new(session_id: impl Into<String>, listen_port: u16) -> Self {
        Self {
            session_id: session_id.into(),
            listen_port,
            server_url: None,
            api_user: None,
            api_key: None,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    /// Read the configuration from the environment.
    ///
    /// A missing session id fails bootstrap — the relay never starts — but
    /// must not take the host application down with it; callers surface the
    /// error to the user and bail out of initialization only.
    pub fn from_env() -> Result<Self, RelayError> {
        let session_id = env::var(SESSION_ID_ENV).map_err(|_| {
            RelayError::Config(format!(
                "{SESSION_ID_ENV} not set; was the host application started by the launcher?"
            ))
        })?;

        let listen_port = match env::var(LISTEN_PORT_ENV) {
            Ok(raw) => raw.parse::<u16>().map_err(|_| {
                RelayError::Config(format!("{LISTEN_PORT_ENV} is not a valid port: {raw:?}"))
            })?,
            Err(_) => DEFAULT_LISTEN_PORT,
        };

        Ok(Self {
            session_id,
            listen_port,
            server_url: env::var(SERVER_URL_ENV).ok(),
            api_user: env::var(API_USER_ENV).ok(),
            api_key: env::var(API_KEY_ENV).ok(),
            settle_delay: DEFAULT_SETTLE_DELAY,
        })
    }
}
