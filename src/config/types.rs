use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub body: BodyConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub sanitize: SanitizeConfig,

    #[serde(default)]
    pub cors: CorsConfig,
}

/// Runtime mode, selected by `NODE_ENV`. Fixed for the process lifetime.
///
/// Only `development` turns on the dev logger and unmasked 5xx messages.
/// Unset means production; any unrecognised value is kept as [`Mode::Other`]
/// and behaves like production.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum Mode {
    Development,
    #[default]
    Production,
    Test,
    Other(String),
}

impl Mode {
    pub fn as_str(&self) -> &str {
        match self {
            Mode::Development => "development",
            Mode::Production => "production",
            Mode::Test => "test",
            Mode::Other(name) => name,
        }
    }

    pub fn is_development(&self) -> bool {
        *self == Mode::Development
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Mode {
    fn from(s: &str) -> Self {
        let name = s.trim();
        match name.to_ascii_lowercase().as_str() {
            "development" | "dev" => Mode::Development,
            "production" | "prod" => Mode::Production,
            "test" => Mode::Test,
            _ => Mode::Other(name.to_string()),
        }
    }
}

impl From<String> for Mode {
    fn from(s: String) -> Self {
        Mode::from(s.as_str())
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.as_str().to_string()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub mode: Mode,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory served by the static-file stage
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// How long in-flight requests may drain after shutdown begins
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_static_dir() -> PathBuf {
    PathBuf::from("public")
}
fn default_drain_timeout() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BodyConfig {
    /// Maximum JSON body size in bytes
    #[serde(default = "default_json_limit")]
    pub json_limit_bytes: usize,

    /// Maximum multipart upload size in bytes
    #[serde(default = "default_upload_limit")]
    pub upload_limit_bytes: usize,
}

fn default_json_limit() -> usize {
    100 * 1024
}
fn default_upload_limit() -> usize {
    10 * 1024 * 1024
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            json_limit_bytes: default_json_limit(),
            upload_limit_bytes: default_upload_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Fixed window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Requests allowed per key within one window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
}

fn default_window_secs() -> u64 {
    10 * 60
}
fn default_max_requests() -> u32 {
    100
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
        }
    }
}

/// What the sanitizer does with operator-like keys (`$gt`, `a.b`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SanitizeMode {
    /// Drop offending keys and continue
    #[default]
    Strip,
    /// Fail the request
    Reject,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SanitizeConfig {
    #[serde(default)]
    pub mode: SanitizeMode,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
    /// Value of `Access-Control-Allow-Origin`
    #[serde(default = "default_allow_origin")]
    pub allow_origin: String,
}

fn default_allow_origin() -> String {
    "*".to_string()
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origin: default_allow_origin(),
        }
    }
}
