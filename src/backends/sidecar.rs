//! HTTP sidecar conversion backend.

use super::ConversionBackend;
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Sidecar response (private deserialization type).
#[derive(Debug, Deserialize)]
struct SidecarResponse {
    markdown: String,
}

pub struct SidecarBackend {
    name: String,
    url: String,
    client: reqwest::Client,
    probe_timeout: Duration,
}

impl SidecarBackend {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        client: reqwest::Client,
        probe_timeout: Duration,
    ) -> Self {
        let url: String = url.into();
        Self {
            name: name.into(),
            url: url.trim_end_matches('/').to_string(),
            client,
            probe_timeout,
        }
    }
}

#[async_trait::async_trait]
impl ConversionBackend for SidecarBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> anyhow::Result<()> {
        let resp = self
            .client
            .get(format!("{}/health", self.url))
            .timeout(self.probe_timeout)
            .send()
            .await
            .with_context(|| format!("{} sidecar unreachable at {}", self.name, self.url))?;

        if !resp.status().is_success() {
            anyhow::bail!("{} sidecar health check returned {}", self.name, resp.status());
        }
        debug!("SidecarBackend {}: healthy at {}", self.name, self.url);
        Ok(())
    }

    async fn convert(&self, input: &Path) -> anyhow::Result<String> {
        use reqwest::multipart::{Form, Part};

        let file_data = tokio::fs::read(input)
            .await
            .with_context(|| format!("Failed to read staged file {:?}", input))?;
        let filename = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());

        info!(
            "SidecarBackend {}: posting {} ({} bytes)",
            self.name,
            filename,
            file_data.len()
        );

        let part = Part::bytes(file_data)
            .file_name(filename)
            .mime_str("application/pdf")?;

        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/convert", self.url))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("{} sidecar error ({}): {}", self.name, status, error_text);
        }

        let result: SidecarResponse = response.json().await?;
        Ok(result.markdown)
    }
}
