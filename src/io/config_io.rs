use std::fs;
use std::path::{Path, PathBuf};

use crate::model::config::ClientConfig;

/// File name of the client configuration inside the client home.
pub const CONFIG_FILE: &str = "config.toml";

/// Environment variable overriding the client home directory.
pub const HOME_ENV: &str = "MININOTE_HOME";

/// Environment variable overriding `api.base_url`.
pub const API_URL_ENV: &str = "MININOTE_API_URL";

/// Error type for configuration I/O
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not write {path}: {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config.toml: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("could not edit config.toml: {0}")]
    EditError(#[from] toml_edit::TomlError),
    #[error("unknown config key \"{0}\"")]
    UnknownKey(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Resolve the client home: explicit override, then `$MININOTE_HOME`,
/// then `$XDG_CONFIG_HOME/mininote`, then `~/.config/mininote`.
pub fn client_home(override_dir: Option<&str>) -> PathBuf {
    if let Some(dir) = override_dir {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var(HOME_ENV)
        && !dir.is_empty()
    {
        return PathBuf::from(dir);
    }
    let config_dir = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/"))
                .join(".config")
        });
    config_dir.join("mininote")
}

/// Load the config from `home`, defaulting every section when the file is
/// absent, then apply environment overrides.
pub fn load_config(home: &Path) -> Result<ClientConfig, ConfigError> {
    let path = home.join(CONFIG_FILE);
    let mut config = if path.exists() {
        let text = fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;
        toml::from_str(&text)?
    } else {
        ClientConfig::default()
    };

    if let Ok(url) = std::env::var(API_URL_ENV)
        && !url.is_empty()
    {
        log::debug!("api.base_url overridden by {}", API_URL_ENV);
        config.api.base_url = url;
    }
    Ok(config)
}

/// Read the raw document for round-trip-safe editing. Missing file → empty document.
pub fn read_document(home: &Path) -> Result<toml_edit::DocumentMut, ConfigError> {
    let path = home.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(toml_edit::DocumentMut::new());
    }
    let text = fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
        path: path.clone(),
        source: e,
    })?;
    Ok(text.parse()?)
}

/// Write the document back, preserving comments and formatting.
pub fn write_document(home: &Path, doc: &toml_edit::DocumentMut) -> Result<(), ConfigError> {
    let path = home.join(CONFIG_FILE);
    fs::create_dir_all(home).map_err(|e| ConfigError::WriteError {
        path: home.to_path_buf(),
        source: e,
    })?;
    fs::write(&path, doc.to_string()).map_err(|e| ConfigError::WriteError { path, source: e })
}

/// Kinds of value a settable key accepts.
enum KeyKind {
    Text,
    /// Whole number from zero up to the field's maximum.
    Integer(i64),
    Bool,
}

const U32_MAX: i64 = u32::MAX as i64;

fn key_kind(key: &str) -> Option<KeyKind> {
    match key {
        "api.base_url" => Some(KeyKind::Text),
        "exchange.max_attempts" | "timing.outer_attempts" => Some(KeyKind::Integer(U32_MAX)),
        "api.timeout_secs"
        | "exchange.backoff_ms"
        | "timing.initial_delay_ms"
        | "timing.poll_interval_ms"
        | "timing.first_wait_ms"
        | "timing.retry_wait_ms"
        | "timing.retry_delay_ms" => Some(KeyKind::Integer(i64::MAX)),
        "discovery.heuristic_scan" => Some(KeyKind::Bool),
        _ => None,
    }
}

/// Set a dotted `section.field` key in the document.
pub fn set_value(doc: &mut toml_edit::DocumentMut, key: &str, raw: &str) -> Result<(), ConfigError> {
    let kind = key_kind(key).ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
    let (section, field) = key
        .split_once('.')
        .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;

    let value = match kind {
        KeyKind::Text => toml_edit::value(raw),
        KeyKind::Integer(max) => {
            let n: i64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("\"{}\" is not a whole number", raw),
            })?;
            if n < 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: "must not be negative".to_string(),
                });
            }
            if n > max {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("must be at most {}", max),
                });
            }
            toml_edit::value(n)
        }
        KeyKind::Bool => {
            let b: bool = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("\"{}\" is not true or false", raw),
            })?;
            toml_edit::value(b)
        }
    };

    if !doc.contains_key(section) {
        doc[section] = toml_edit::Item::Table(toml_edit::Table::new());
    }
    doc[section][field] = value;
    Ok(())
}

/// Parse an edited document the way [`load_config`] would.
pub fn validate_document(doc: &toml_edit::DocumentMut) -> Result<ClientConfig, ConfigError> {
    Ok(toml::from_str(&doc.to_string())?)
}

/// Set one key in the config file under `home`.
///
/// The edited document is validated before it is written, so a rejected
/// edit leaves the file as it was.
pub fn update_value(home: &Path, key: &str, raw: &str) -> Result<(), ConfigError> {
    let mut doc = read_document(home)?;
    set_value(&mut doc, key, raw)?;
    validate_document(&doc)?;
    write_document(home, &doc)
}
