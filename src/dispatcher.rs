//! Conversion dispatcher: validate, stage, route, clean up.
//!
//! One call to [`Dispatcher::handle`] owns exactly one staged temp file. The
//! file lives in a [`NamedTempFile`], so it is removed on every exit path,
//! including backend faults, panics, and a dropped request future.

use crate::backends::BackendKind;
use crate::error::ConvertError;
use crate::registry::{LookupError, Registry};
use crate::upload::ConversionRequest;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{error, info, warn, Instrument};

/// Successful conversion body.
#[derive(Debug, Clone, Serialize)]
pub struct Conversion {
    pub success: bool,
    pub markdown: String,
    pub library_used: String,
    pub filename: String,
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    staging_dir: Option<PathBuf>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, staging_dir: Option<PathBuf>) -> Self {
        Self {
            registry,
            staging_dir,
        }
    }

    pub async fn handle(&self, request: ConversionRequest) -> Result<Conversion, ConvertError> {
        let ConversionRequest {
            filename,
            data,
            library,
        } = request;

        let filename = validate_filename(filename)?;
        let (kind, backend) = self.registry.lookup(&library).map_err(|e| match e {
            LookupError::Unknown => ConvertError::InvalidLibrary,
            LookupError::Unavailable(kind) => ConvertError::Unavailable(kind),
        })?;

        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("convert", %request_id, backend = %kind, %filename);

        async move {
            info!("Received {} bytes for {}", data.len(), backend.name());

            let staged = self.stage(&data)?;
            let result = backend.convert(staged.path()).await;
            self.cleanup(staged);

            let markdown = result.map_err(|e| {
                error!("Error with {}: {:#}", kind, e);
                ConvertError::Backend(format!("{:#}", e))
            })?;

            info!("Converted to {} chars of markdown", markdown.len());
            Ok::<_, ConvertError>(conversion(markdown, kind, filename))
        }
        .instrument(span)
        .await
    }

    /// Write the upload to a fresh `.pdf` temp file.
    fn stage(&self, data: &[u8]) -> Result<NamedTempFile, ConvertError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pdf2md-").suffix(".pdf");

        let mut staged = match &self.staging_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| unexpected("Failed to create temp file", e))?;

        staged
            .write_all(data)
            .and_then(|_| staged.flush())
            .map_err(|e| unexpected("Failed to write temp file", e))?;

        Ok(staged)
    }

    fn cleanup(&self, staged: NamedTempFile) {
        let path = staged.path().to_path_buf();
        if let Err(e) = staged.close() {
            warn!("Failed to remove temp file {:?}: {}", path, e);
        }
    }
}

fn validate_filename(filename: Option<String>) -> Result<String, ConvertError> {
    match filename {
        Some(name) if name.to_lowercase().ends_with(".pdf") => Ok(name),
        _ => Err(ConvertError::NotPdf),
    }
}

fn conversion(markdown: String, kind: BackendKind, filename: String) -> Conversion {
    Conversion {
        success: true,
        markdown,
        library_used: kind.as_str().to_string(),
        filename,
    }
}

fn unexpected(what: &str, e: std::io::Error) -> ConvertError {
    error!("Unexpected error: {}: {}", what, e);
    ConvertError::Unexpected(format!("{}: {}", what, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_filename() {
        assert_eq!(validate_filename(Some("report.pdf".into())).unwrap(), "report.pdf");
        assert_eq!(validate_filename(Some("REPORT.PDF".into())).unwrap(), "REPORT.PDF");
        assert!(matches!(validate_filename(Some("notes.txt".into())), Err(ConvertError::NotPdf)));
        assert!(matches!(validate_filename(Some("pdf".into())), Err(ConvertError::NotPdf)));
        assert!(matches!(validate_filename(Some("report.pdf.exe".into())), Err(ConvertError::NotPdf)));
        assert!(matches!(validate_filename(None), Err(ConvertError::NotPdf)));
    }

    #[test]
    fn test_stage_writes_pdf_suffixed_file() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Dispatcher::new(
            Arc::new(Registry::from_entries(Vec::new())),
            Some(dir.path().to_path_buf()),
        );

        let staged = dispatcher.stage(b"%PDF-1.7").unwrap();
        let path = staged.path().to_path_buf();
        assert_eq!(path.parent(), Some(dir.path()));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.7");

        dispatcher.cleanup(staged);
        assert!(!path.exists());
    }

    #[test]
    fn test_stage_into_missing_dir_is_unexpected() {
        let dispatcher = Dispatcher::new(
            Arc::new(Registry::from_entries(Vec::new())),
            Some(PathBuf::from("/nonexistent/pdf2md-staging")),
        );
        let err = dispatcher.stage(b"%PDF").unwrap_err();
        assert!(err.to_string().starts_with("Unexpected error: Failed to create temp file"));
    }
}
