//! Server configuration.
//!
//! Settings come from environment variables (after `.env` is loaded), with
//! optional per-backend overrides read from a JSON file named by
//! `BACKENDS_FILE`.

use crate::backends::command::{CommandSpec, OutputMode};
use crate::backends::BackendKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_PYTHON: &str = "python3";

/// Per-backend overrides from the `BACKENDS_FILE` JSON document.
///
/// ```json
/// { "docling": { "url": "http://localhost:3001" },
///   "marker": { "command": ["marker_single", "{input}", "--output_dir", "{output_dir}"] } }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendSettings {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub probe: Option<Vec<String>>,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub output: Option<OutputMode>,
}

/// How a backend is reached once configuration is resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMode {
    Command(CommandSpec),
    Sidecar { url: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
    /// Directory for staged uploads. `None` means the system temp dir.
    pub staging_dir: Option<PathBuf>,
    pub probe_timeout: Duration,
    pub python: String,
    backends: HashMap<BackendKind, BackendSettings>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            staging_dir: None,
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            python: DEFAULT_PYTHON.to_string(),
            backends: HashMap::new(),
        }
    }
}

impl ServerConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PORT") {
            config.port = port
                .parse()
                .with_context(|| format!("Invalid PORT: {:?}", port))?;
        }
        if let Some(limit) = lookup("MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = limit
                .parse()
                .with_context(|| format!("Invalid MAX_UPLOAD_BYTES: {:?}", limit))?;
        }
        if let Some(dir) = lookup("STAGING_DIR") {
            config.staging_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = lookup("PROBE_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("Invalid PROBE_TIMEOUT_SECS: {:?}", secs))?;
            config.probe_timeout = Duration::from_secs(secs);
        }
        if let Some(python) = lookup("PYTHON") {
            config.python = python;
        }

        if let Some(path) = lookup("BACKENDS_FILE") {
            config.backends = load_backend_overrides(Path::new(&path))?;
        }

        for kind in BackendKind::ALL {
            if let Some(url) = lookup(kind.url_env_var().as_str()).filter(|u| !u.is_empty()) {
                config.backends.entry(kind).or_default().url = Some(url);
            }
        }

        Ok(config)
    }

    /// Address the listener binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolve how `kind` is invoked: a sidecar URL wins, otherwise the stock
    /// command with any file overrides applied.
    pub fn backend_mode(&self, kind: BackendKind) -> BackendMode {
        let settings = self.backends.get(&kind).cloned().unwrap_or_default();

        if let Some(url) = settings.url {
            return BackendMode::Sidecar { url };
        }

        let mut spec = CommandSpec::defaults_for(kind, &self.python);
        if let Some(probe) = settings.probe {
            spec.probe = probe;
        }
        if let Some(command) = settings.command {
            spec.command = command;
        }
        if let Some(output) = settings.output {
            spec.output = output;
        }
        BackendMode::Command(spec)
    }
}

/// Load per-backend overrides from a JSON file keyed by backend name.
fn load_backend_overrides(path: &Path) -> Result<HashMap<BackendKind, BackendSettings>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read backends file: {:?}", path))?;

    let raw: HashMap<String, BackendSettings> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse backends file: {:?}", path))?;

    let mut overrides = HashMap::new();
    for (name, settings) in raw {
        let kind = BackendKind::from_name(&name)
            .with_context(|| format!("Unknown backend {:?} in {:?}", name, path))?;
        info!("Loaded overrides for backend: {}", kind);
        overrides.insert(kind, settings);
    }

    Ok(overrides)
}
