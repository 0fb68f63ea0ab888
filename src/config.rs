use log::warn;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_DATA_DIR: &str = "database/templates";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
pub const DEFAULT_MAX_SESSIONS: usize = 64;

/// Runtime settings for the binaries.
#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Where published templates are written.
    pub data_dir: PathBuf,
    pub max_upload_bytes: usize,
    /// Live templates kept in memory before the oldest is dropped.
    pub max_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

impl AppConfig {
    /// Reads `CHECKSHEET_BIND`, `CHECKSHEET_DATA_DIR`,
    /// `CHECKSHEET_MAX_UPLOAD_BYTES` and `CHECKSHEET_MAX_SESSIONS`, falling
    /// back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = AppConfig::default();

        if let Some(addr) = lookup("CHECKSHEET_BIND").filter(|v| !v.trim().is_empty()) {
            config.bind_addr = addr.trim().to_string();
        }
        if let Some(dir) = lookup("CHECKSHEET_DATA_DIR").filter(|v| !v.trim().is_empty()) {
            config.data_dir = PathBuf::from(dir.trim());
        }
        if let Some(raw) = lookup("CHECKSHEET_MAX_UPLOAD_BYTES") {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.max_upload_bytes = n,
                _ => warn!(
                    "invalid CHECKSHEET_MAX_UPLOAD_BYTES '{}', using {}",
                    raw, config.max_upload_bytes
                ),
            }
        }
        if let Some(raw) = lookup("CHECKSHEET_MAX_SESSIONS") {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.max_sessions = n,
                _ => warn!(
                    "invalid CHECKSHEET_MAX_SESSIONS '{}', using {}",
                    raw, config.max_sessions
                ),
            }
        }

        config
    }

    /// Positional command-line override: `<bind-addr> [data-dir]`.
    pub fn with_args(mut self, args: &[String]) -> Self {
        if let Some(addr) = args.get(1) {
            self.bind_addr = addr.clone();
        }
        if let Some(dir) = args.get(2) {
            self.data_dir = PathBuf::from(dir);
        }
        self
    }
}
