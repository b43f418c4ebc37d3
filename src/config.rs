use std::path::Path;

use md5::{Digest, Md5};

use crate::consts::{
    DEFAULT_IDLE_TIMEOUT_SECONDS, DEFAULT_MAX_COMMAND_PAYLOAD, DEFAULT_MAX_SENDQ_SIZE,
    DEFAULT_MIN_SENDQ_SIZE, PASSWORD_DIGEST_SIZE,
};
use crate::error::ConfigError;

type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration for a server
///
/// * `max_clients` - Size of the client table, and of the game table.
/// * `connect_timeout` - Seconds a socket may take to log in.
/// * `port` - TCP port to listen on, for both IPv4 and IPv6.
/// * `password` - Optional server password, kept only as its MD5 digest.
/// * `idle_timeout` - Seconds a member may go without sending anything.
/// * `min_sendq_size`/`max_sendq_size` - Per-client send queue floor and hard cap.
/// * `max_command_payload` - Largest payload a client command may declare.
///
/// # Example
/// ```
/// use netplay::ServerConfig;
///
/// let cfg = ServerConfig::new(4046, 50, 5)
///     .password("hunter2")
///     .idle_timeout(60);
/// assert_eq!(cfg.port(), 4046);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub(crate) max_clients: usize,
    pub(crate) connect_timeout: u64,
    pub(crate) port: u16,
    pub(crate) password: Option<[u8; PASSWORD_DIGEST_SIZE]>,
    pub(crate) idle_timeout: u64,
    pub(crate) min_sendq_size: usize,
    pub(crate) max_sendq_size: usize,
    pub(crate) max_command_payload: usize,
}

impl ServerConfig {
    pub fn new(port: u16, max_clients: usize, connect_timeout: u64) -> Self {
        Self {
            max_clients,
            connect_timeout,
            port,
            password: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT_SECONDS,
            min_sendq_size: DEFAULT_MIN_SENDQ_SIZE,
            max_sendq_size: DEFAULT_MAX_SENDQ_SIZE,
            max_command_payload: DEFAULT_MAX_COMMAND_PAYLOAD,
        }
    }
    /// Require clients to present this password. Empty means no password.
    pub fn password(mut self, password: &str) -> Self {
        self.password = (!password.is_empty()).then(|| password_digest(password));
        self
    }
    /// The default is 30 seconds.
    pub fn idle_timeout(mut self, seconds: u64) -> Self {
        self.idle_timeout = seconds;
        self
    }
    pub fn min_sendq_size(mut self, bytes: usize) -> Self {
        self.min_sendq_size = bytes;
        self
    }
    pub fn max_sendq_size(mut self, bytes: usize) -> Self {
        self.max_sendq_size = bytes;
        self
    }
    pub fn max_command_payload(mut self, bytes: usize) -> Self {
        self.max_command_payload = bytes;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }
    pub fn max_clients(&self) -> usize {
        self.max_clients
    }
    pub fn requires_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    /// Reads `<key> <value>` lines. `;` starts a comment and keys are
    /// case-insensitive. `maxclients`, `connecttimeout` and `port` are required.
    pub fn parse(text: &str) -> Result<Self> {
        let mut max_clients = None;
        let mut connect_timeout = None;
        let mut port = None;
        let mut cfg = Self::new(0, 0, 0);

        for line in text.lines() {
            let line = line.split(';').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once(char::is_whitespace)
                .map(|(k, v)| (k, v.trim()))
                .unwrap_or((line, ""));
            match key.to_ascii_lowercase().as_str() {
                "maxclients" => max_clients = Some(number("maxclients", value)?),
                "connecttimeout" => connect_timeout = Some(number("connecttimeout", value)?),
                "port" => port = Some(number("port", value)?),
                "password" => cfg = cfg.password(value),
                "idletimeout" => cfg.idle_timeout = number("idletimeout", value)?,
                "minsendqsize" => cfg.min_sendq_size = number("minsendqsize", value)?,
                "maxsendqsize" => cfg.max_sendq_size = number("maxsendqsize", value)?,
                "maxcmdpayload" => cfg.max_command_payload = number("maxcmdpayload", value)?,
                _ => return Err(ConfigError::UnknownDirective(key.to_owned())),
            }
        }

        cfg.max_clients = max_clients.ok_or(ConfigError::Missing("maxclients"))?;
        cfg.connect_timeout = connect_timeout.ok_or(ConfigError::Missing("connecttimeout"))?;
        cfg.port = port.ok_or(ConfigError::Missing("port"))?;
        Ok(cfg)
    }

    pub fn log_summary(&self) {
        log::info!("server configuration:");
        log::info!("  maximum clients: {}", self.max_clients);
        log::info!("  connect timeout: {} seconds", self.connect_timeout);
        log::info!("  listen port: {}", self.port);
        log::info!(
            "  password: {}",
            if self.requires_password() { "(used)" } else { "(unused)" }
        );
        log::info!("  idle timeout: {} seconds", self.idle_timeout);
        log::info!("  minimum internal send queue size: {} bytes", self.min_sendq_size);
        log::info!("  maximum internal send queue size: {} bytes", self.max_sendq_size);
        log::info!("  maximum command payload size: {} bytes", self.max_command_payload);
        log::info!(
            "  rough worst-case internal queue memory usage: {:.2} MiB",
            self.worst_case_queue_mib()
        );
    }

    pub fn worst_case_queue_mib(&self) -> f64 {
        (self.max_sendq_size + self.max_command_payload) as f64 * self.max_clients as f64
            / 1024.0
            / 1024.0
    }
}

fn number<N: std::str::FromStr>(key: &'static str, value: &str) -> Result<N> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_owned(),
    })
}

/// What a client sends in place of the password.
pub fn password_digest(password: &str) -> [u8; PASSWORD_DIGEST_SIZE] {
    let mut digest = [0; PASSWORD_DIGEST_SIZE];
    digest.copy_from_slice(&Md5::digest(password.as_bytes()));
    digest
}
