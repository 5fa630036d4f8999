//! Pluggable conversion backend abstraction.
//!
//! Defines the [`ConversionBackend`] trait and the closed set of backend
//! identifiers ([`BackendKind`]). Each backend is reached either by spawning
//! an external command ([`command::CommandBackend`]) or by calling an HTTP
//! sidecar ([`sidecar::SidecarBackend`]).

pub mod command;
pub mod sidecar;

use std::fmt;
use std::path::Path;

/// Async trait implemented by each conversion backend.
#[async_trait::async_trait]
pub trait ConversionBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Check once whether the backend can be used in this environment.
    async fn probe(&self) -> anyhow::Result<()>;

    /// Convert the PDF at `input` to markdown.
    async fn convert(&self, input: &Path) -> anyhow::Result<String>;
}

/// Known backend identifiers, in the order they are listed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Pymupdf4llm,
    Markitdown,
    Marker,
    Docling,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Pymupdf4llm,
        BackendKind::Markitdown,
        BackendKind::Marker,
        BackendKind::Docling,
    ];

    /// Parse a form value into a backend kind. Matching is exact.
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "pymupdf4llm" => Some(Self::Pymupdf4llm),
            "markitdown" => Some(Self::Markitdown),
            "marker" => Some(Self::Marker),
            "docling" => Some(Self::Docling),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pymupdf4llm => "pymupdf4llm",
            Self::Markitdown => "markitdown",
            Self::Marker => "marker",
            Self::Docling => "docling",
        }
    }

    /// Environment variable that switches this backend to sidecar mode.
    pub fn url_env_var(self) -> String {
        format!("{}_URL", self.as_str().to_uppercase())
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
