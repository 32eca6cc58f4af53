use std::path::PathBuf;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;

use crate::config::ConversionConfig;
use crate::convert::{resolve_outputs, ConversionRequest, DocumentConverter};
use crate::error::ConversionError;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ConvertResponse {
    success: bool,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Blocking client for the conversion service
/// (`GET /health`, `POST /api/convert`).
pub struct HttpConverter {
    client: Client,
    base_url: String,
}

impl HttpConverter {
    pub fn new(config: &ConversionConfig) -> Result<Self, ConversionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }
}

impl DocumentConverter for HttpConverter {
    fn endpoint(&self) -> &str {
        &self.base_url
    }

    fn is_available(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        let response = match self.client.get(&url).timeout(HEALTH_TIMEOUT).send() {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "conversion service unreachable");
                return false;
            }
        };
        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "conversion service unhealthy");
            return false;
        }
        match response.json::<HealthResponse>() {
            Ok(health) => health.status == "ok",
            Err(e) => {
                tracing::warn!(error = %e, "unexpected health response");
                false
            }
        }
    }

    fn convert(&self, request: &ConversionRequest) -> Result<Vec<PathBuf>, ConversionError> {
        if !request.file_path.is_file() {
            return Err(ConversionError::SourceMissing(request.file_path.clone()));
        }

        let url = format!("{}/api/convert", self.base_url);
        tracing::debug!(
            file = %crate::sanitize::redact_path(&request.file_path),
            dpi = request.dpi,
            "sending conversion request"
        );

        let response = self.client.post(&url).json(request).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ConversionError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body: ConvertResponse = response.json()?;
        if !body.success {
            return Err(ConversionError::Rejected(
                body.error.unwrap_or_else(|| "no reason given".to_string()),
            ));
        }
        Ok(resolve_outputs(&request.output_dir, body.files))
    }
}
