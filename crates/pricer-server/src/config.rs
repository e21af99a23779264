// Configuration loading and parsing (config/pricer.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// File name of the server configuration, inside `config/` and `defaults/`.
pub const CONFIG_FILE: &str = "pricer.toml";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("pricer config not found at {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read pricer config {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed pricer config {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid pricer config: `{field}` {message}")]
    ValidationError { field: String, message: String },

    #[error("cannot seed {path} from defaults: {message}")]
    SeedError { path: PathBuf, message: String },
}

// ---------------------------------------------------------------------------
// Assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub artifacts: ArtifactPaths,
    pub response: ResponseLabels,
}

// ---------------------------------------------------------------------------
// pricer.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire pricer.toml file.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    server: ServerConfig,
    artifacts: ArtifactPaths,
    #[serde(default)]
    response: ResponseLabels,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Where the fitted preprocessor and model live. Relative paths are resolved
/// against the directory the config was loaded for.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtifactPaths {
    pub preprocessor: PathBuf,
    pub model: PathBuf,
}

/// The JSON key and currency suffix used in prediction responses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResponseLabels {
    pub price_label: String,
    pub currency_label: String,
}

impl Default for ResponseLabels {
    fn default() -> Self {
        Self {
            price_label: "السعر المتوقع".into(),
            currency_label: "جنيه".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/pricer.toml` relative to `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()` which handles default initialization automatically.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    load_file(&path, base_dir)
}

/// Load and validate an explicit config file. Relative artifact paths resolve
/// against the file's parent directory's parent when the file sits in a
/// `config/` directory, otherwise against the file's own directory.
pub fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let base_dir = if parent.file_name().is_some_and(|n| n == "config") {
        parent.parent().unwrap_or(parent)
    } else {
        parent
    };
    load_file(path, base_dir)
}

fn load_file(path: &Path, base_dir: &Path) -> Result<Config, ConfigError> {
    let text = read_file(path)?;
    let file: ConfigFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config = Config {
        server: file.server,
        artifacts: ArtifactPaths {
            preprocessor: resolve(base_dir, &file.artifacts.preprocessor),
            model: resolve(base_dir, &file.artifacts.model),
        },
        response: file.response,
    };

    validate(&config)?;

    Ok(config)
}

/// Seed `config/pricer.toml` from `defaults/pricer.toml` when the former is
/// missing. Returns the path written, or `None` when a config was already in
/// place. An existing config is never overwritten.
pub fn seed_config(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join(CONFIG_FILE);
    if target.is_file() {
        return Ok(None);
    }

    let source = base_dir.join("defaults").join(CONFIG_FILE);
    if !source.is_file() {
        return Err(ConfigError::SeedError {
            path: target,
            message: format!(
                "no {} to start from in {}; run from the project root or pass --config",
                source.display(),
                base_dir.display()
            ),
        });
    }

    let seed_err = |message: String| ConfigError::SeedError {
        path: target.clone(),
        message,
    };

    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir).map_err(|e| seed_err(e.to_string()))?;
    }
    let mut defaults = std::fs::File::open(&source).map_err(|e| seed_err(e.to_string()))?;
    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
    {
        Ok(mut dest) => {
            std::io::copy(&mut defaults, &mut dest).map_err(|e| seed_err(e.to_string()))?;
            info!("Seeded {} from {}", target.display(), source.display());
            Ok(Some(target))
        }
        // Another process seeded it first.
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(seed_err(e.to_string())),
    }
}

/// Load `config/pricer.toml` under the current directory, seeding it from
/// `defaults/` on first run.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|source| ConfigError::Unreadable {
        path: PathBuf::from("."),
        source,
    })?;
    seed_config(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Bind address overrides
// ---------------------------------------------------------------------------

/// Apply bind-address overrides: explicit values (CLI) win, then the
/// `PRICER_HOST` / `PRICER_PORT` environment variables, then the file.
pub fn apply_bind_overrides(
    server: &mut ServerConfig,
    host: Option<String>,
    port: Option<u16>,
) {
    if let Some(host) = host.or_else(|| host_from_env(std::env::var("PRICER_HOST").ok())) {
        server.host = host;
    }
    if let Some(port) = port.or_else(|| port_from_env(std::env::var("PRICER_PORT").ok())) {
        server.port = port;
    }
}

fn host_from_env(raw: Option<String>) -> Option<String> {
    let raw = raw?;
    let host = raw.trim();
    if host.is_empty() {
        warn!("Empty PRICER_HOST, ignoring");
        None
    } else {
        Some(host.to_string())
    }
}

fn port_from_env(raw: Option<String>) -> Option<u16> {
    let raw = raw?;
    match raw.trim().parse::<u16>() {
        Ok(port) => Some(port),
        Err(_) => {
            warn!("Invalid PRICER_PORT='{}', ignoring", raw);
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => ConfigError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        },
    })
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.as_os_str().is_empty() || path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.server.host.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "server.host".into(),
            message: "must not be empty".into(),
        });
    }

    let paths: &[(&str, &Path)] = &[
        ("artifacts.preprocessor", &config.artifacts.preprocessor),
        ("artifacts.model", &config.artifacts.model),
    ];
    for (name, path) in paths {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: "must not be empty".into(),
            });
        }
    }

    let labels: &[(&str, &str)] = &[
        ("response.price_label", &config.response.price_label),
        ("response.currency_label", &config.response.currency_label),
    ];
    for (name, label) in labels {
        if label.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: "must not be empty".into(),
            });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
