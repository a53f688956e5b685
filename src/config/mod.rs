mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Environment variable selecting the runtime mode
pub const MODE_ENV: &str = "NODE_ENV";
/// Environment variable selecting the listen port
pub const PORT_ENV: &str = "PORT";
/// Longest accepted rate-limit window (one day)
pub const MAX_WINDOW_SECS: u64 = 86_400;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./config/config.toml",
        "./devcamper.toml",
        "~/.config/devcamper/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Overlay `NODE_ENV` and `PORT` from the process environment.
pub fn apply_env(config: &mut Config) -> Result<()> {
    apply_env_from(config, |key| std::env::var(key).ok())
}

/// Overlay environment values supplied by `lookup`.
pub fn apply_env_from<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(mode) = lookup(MODE_ENV).filter(|v| !v.trim().is_empty()) {
        config.server.mode = Mode::from(mode.as_str());
    }

    if let Some(port) = lookup(PORT_ENV).filter(|v| !v.trim().is_empty()) {
        config.server.port = port
            .trim()
            .parse()
            .with_context(|| format!("Invalid {PORT_ENV}: {port:?}"))?;
    }

    validate_config(config)
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.rate_limit.window_secs == 0 {
        anyhow::bail!("Rate limit window cannot be 0 seconds");
    }

    if config.rate_limit.window_secs > MAX_WINDOW_SECS {
        anyhow::bail!(
            "Rate limit window cannot exceed {} seconds",
            MAX_WINDOW_SECS
        );
    }

    if config.rate_limit.max_requests == 0 {
        anyhow::bail!("Rate limit max_requests cannot be 0");
    }

    if config.body.json_limit_bytes == 0 || config.body.upload_limit_bytes == 0 {
        anyhow::bail!("Body limits must be greater than 0");
    }

    if !config.server.static_dir.exists() {
        tracing::warn!("Static directory does not exist: {:?}", config.server.static_dir);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_mirror_devcamper_server() {
        let config = Config::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.mode, Mode::Production);
        assert_eq!(config.rate_limit.window_secs, 600);
        assert_eq!(config.rate_limit.max_requests, 100);
    }

    #[test]
    fn env_overrides_mode_and_port() {
        let mut config = Config::default();
        apply_env_from(&mut config, env(&[("NODE_ENV", "production"), ("PORT", "8081")]))
            .unwrap();
        assert_eq!(config.server.mode, Mode::Production);
        assert_eq!(config.server.port, 8081);
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut config = Config::default();
        config.server.mode = Mode::Development;
        apply_env_from(&mut config, env(&[("NODE_ENV", ""), ("PORT", " ")])).unwrap();
        assert_eq!(config.server.mode, Mode::Development);
        assert_eq!(config.server.port, 5000);
    }

    #[test]
    fn invalid_port_is_rejected() {
        let mut config = Config::default();
        let err = apply_env_from(&mut config, env(&[("PORT", "http")])).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn unknown_mode_is_kept_as_other() {
        let mut config = Config::default();
        apply_env_from(&mut config, env(&[("NODE_ENV", "staging")])).unwrap();
        assert_eq!(config.server.mode, Mode::Other("staging".into()));
        assert!(!config.server.mode.is_development());
        assert_eq!(config.server.mode.to_string(), "staging");
    }

    #[test]
    fn mode_names_are_case_insensitive() {
        assert_eq!(Mode::from("Development"), Mode::Development);
        assert_eq!(Mode::from(" prod "), Mode::Production);
        assert_eq!(Mode::from("test"), Mode::Test);
    }

    #[test]
    fn load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[server]
mode = "production"
port = 7000

[rate_limit]
window_secs = 60
max_requests = 5

[sanitize]
mode = "reject"
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.mode, Mode::Production);
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.sanitize.mode, SanitizeMode::Reject);
        assert_eq!(config.cors.allow_origin, "*");
    }

    #[test]
    fn zero_window_is_invalid() {
        let mut config = Config::default();
        config.rate_limit.window_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn oversized_window_is_invalid() {
        let mut config = Config::default();
        config.rate_limit.window_secs = u64::MAX;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("cannot exceed"));

        config.rate_limit.window_secs = MAX_WINDOW_SECS;
        assert!(validate_config(&config).is_ok());
    }
}
