//! Capability registry: which conversion backends are usable in this process.
//!
//! Built once at startup and shared read-only across handlers.

use crate::backends::command::CommandBackend;
use crate::backends::sidecar::SidecarBackend;
use crate::backends::{BackendKind, ConversionBackend};
use crate::config::{BackendMode, ServerConfig};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// One row of the discovery listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    pub name: &'static str,
    pub available: bool,
}

/// Why a requested backend cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupError {
    Unknown,
    Unavailable(BackendKind),
}

struct Entry {
    kind: BackendKind,
    backend: Option<Arc<dyn ConversionBackend>>,
}

pub struct Registry {
    entries: Vec<Entry>,
}

impl Registry {
    /// Build and probe every backend. A failure in one never affects the others.
    pub async fn probe(config: &ServerConfig) -> Self {
        let client = reqwest::Client::new();
        let mut available = Vec::new();

        for kind in BackendKind::ALL {
            let backend = match build_backend(kind, config, &client) {
                Ok(backend) => backend,
                Err(e) => {
                    warn!("Backend {} misconfigured: {:#}", kind, e);
                    continue;
                }
            };
            match backend.probe().await {
                Ok(()) => {
                    info!("Backend {} available", kind);
                    available.push((kind, backend));
                }
                Err(e) => warn!("Backend {} unavailable: {:#}", kind, e),
            }
        }

        Self::from_entries(available)
    }

    /// Assemble a registry from already-resolved entries. Kinds not given are
    /// recorded as unavailable.
    pub fn from_entries(
        backends: impl IntoIterator<Item = (BackendKind, Arc<dyn ConversionBackend>)>,
    ) -> Self {
        let mut entries: Vec<Entry> = BackendKind::ALL
            .iter()
            .map(|&kind| Entry {
                kind,
                backend: None,
            })
            .collect();

        for (kind, backend) in backends {
            if let Some(entry) = entries.iter_mut().find(|e| e.kind == kind) {
                entry.backend = Some(backend);
            }
        }

        Self { entries }
    }

    /// Availability of all backends, in fixed listing order.
    pub fn list(&self) -> Vec<BackendStatus> {
        self.entries
            .iter()
            .map(|e| BackendStatus {
                name: e.kind.as_str(),
                available: e.backend.is_some(),
            })
            .collect()
    }

    /// Resolve a requested backend name to its entry point.
    pub fn lookup(
        &self,
        name: &str,
    ) -> Result<(BackendKind, Arc<dyn ConversionBackend>), LookupError> {
        let kind = BackendKind::from_name(name).ok_or(LookupError::Unknown)?;
        self.entries
            .iter()
            .find(|e| e.kind == kind)
            .and_then(|e| e.backend.clone())
            .map(|backend| (kind, backend))
            .ok_or(LookupError::Unavailable(kind))
    }
}

fn build_backend(
    kind: BackendKind,
    config: &ServerConfig,
    client: &reqwest::Client,
) -> anyhow::Result<Arc<dyn ConversionBackend>> {
    let backend: Arc<dyn ConversionBackend> = match config.backend_mode(kind) {
        BackendMode::Sidecar { url } => {
            info!("Backend {}: sidecar at {}", kind, url);
            Arc::new(SidecarBackend::new(
                kind.as_str(),
                url,
                client.clone(),
                config.probe_timeout,
            ))
        }
        BackendMode::Command(spec) => Arc::new(CommandBackend::new(
            kind.as_str(),
            spec,
            config.probe_timeout,
        )?),
    };
    Ok(backend)
}
