//! Loading spec documents from files or HTTP endpoints.

use super::{SpecError, SpecMap, SpecRegistry};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Source of the spec map. Every successful [`load`](SpecProvider::load)
/// replaces the contents of the shared registry.
#[async_trait]
pub trait SpecProvider: Send + Sync {
    async fn load(&self) -> Result<(), SpecError>;

    fn registry(&self) -> Arc<SpecRegistry>;
}

/// Serialization format of a spec document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecFormat {
    Yaml,
    Json,
}

impl SpecFormat {
    /// Detects the format from a file extension or a MIME type.
    pub fn detect(format: &str) -> Result<Self, SpecError> {
        let format = format.trim().trim_start_matches('.').to_ascii_lowercase();
        match format.as_str() {
            "yml" | "yaml" | "application/x-yaml" | "application/yaml" | "text/yaml" => {
                Ok(SpecFormat::Yaml)
            }
            "json" | "application/json" | "text/json" => Ok(SpecFormat::Json),
            _ => Err(SpecError::UnsupportedFormat(format)),
        }
    }

    /// Parses raw document data into a spec map.
    pub fn parse(self, data: &[u8]) -> Result<SpecMap, SpecError> {
        match self {
            SpecFormat::Yaml => {
                serde_yaml::from_slice(data).map_err(|e| SpecError::Parse(e.to_string()))
            }
            SpecFormat::Json => {
                serde_json::from_slice(data).map_err(|e| SpecError::Parse(e.to_string()))
            }
        }
    }
}

/// Reads the spec map from a local YAML or JSON file.
#[derive(Debug)]
pub struct FileSpecProvider {
    path: PathBuf,
    registry: Arc<SpecRegistry>,
}

impl FileSpecProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            registry: Arc::new(SpecRegistry::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SpecProvider for FileSpecProvider {
    async fn load(&self) -> Result<(), SpecError> {
        let extension = self
            .path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        let format = SpecFormat::detect(extension)?;

        let data = tokio::fs::read(&self.path).await?;
        let specs = format.parse(&data)?;

        info!(path = %self.path.display(), count = specs.len(), "loaded specs");
        self.registry.replace(specs);
        Ok(())
    }

    fn registry(&self) -> Arc<SpecRegistry> {
        self.registry.clone()
    }
}

/// Fetches the spec map from an HTTP(S) endpoint.
#[derive(Debug)]
pub struct HttpSpecProvider {
    url: String,
    client: reqwest::Client,
    registry: Arc<SpecRegistry>,
}

impl HttpSpecProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            registry: Arc::new(SpecRegistry::default()),
        }
    }

    /// Extension of the last URL path segment, ignoring query and fragment.
    fn url_extension(&self) -> Option<String> {
        let path = self.url.split(['?', '#']).next().unwrap_or_default();
        let segment = path.rsplit('/').next().unwrap_or_default();
        segment
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_string())
            .filter(|ext| !ext.is_empty())
    }
}

#[async_trait]
impl SpecProvider for HttpSpecProvider {
    async fn load(&self) -> Result<(), SpecError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(SpecError::Status(status.as_u16()));
        }

        let format = match self.url_extension() {
            Some(ext) => SpecFormat::detect(&ext)?,
            None => {
                let content_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                let media_type = content_type.split(';').next().unwrap_or_default();
                debug!(media_type, "detecting spec format from content type");
                SpecFormat::detect(media_type)?
            }
        };

        let data = response.bytes().await?;
        let specs = format.parse(&data)?;

        info!(url = %self.url, count = specs.len(), "loaded specs");
        self.registry.replace(specs);
        Ok(())
    }

    fn registry(&self) -> Arc<SpecRegistry> {
        self.registry.clone()
    }
}

/// Builds the provider matching the configured spec location.
pub fn from_location(location: &str) -> Arc<dyn SpecProvider> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Arc::new(HttpSpecProvider::new(location))
    } else {
        Arc::new(FileSpecProvider::new(location))
    }
}
