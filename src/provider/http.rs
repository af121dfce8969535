use async_trait::async_trait;
use futures::{future, StreamExt};
use std::sync::Arc;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::drivers::Driver;
use crate::transport::{HttpTransport, SseDecoder};
use crate::Result;

use super::{ChunkStream, ProviderAdapter, ProviderRequest, ProviderResponse};

/// Adapter for HTTP backends: a wire [`Driver`] plus the shared [`HttpTransport`].
#[derive(Debug)]
pub struct HttpAdapter {
    id: String,
    default_model: String,
    supports_tools: bool,
    driver: Arc<dyn Driver>,
    transport: HttpTransport,
}

impl HttpAdapter {
    pub fn new(
        id: impl Into<String>,
        default_model: impl Into<String>,
        driver: Arc<dyn Driver>,
        transport: HttpTransport,
    ) -> Self {
        Self {
            id: id.into(),
            default_model: default_model.into(),
            supports_tools: true,
            driver,
            transport,
        }
    }

    pub fn from_config(config: &ProviderConfig, driver: Arc<dyn Driver>) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| driver.default_base_url().to_string());
        let headers = config
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let transport = HttpTransport::new(&base_url, config.api_key.clone(), headers)?;
        let mut adapter = Self::new(&config.id, &config.model, driver, transport);
        adapter.supports_tools = config.supports_tools.unwrap_or(true);
        Ok(adapter)
    }

    fn model_for<'a>(&'a self, request: &'a ProviderRequest) -> &'a str {
        request.model.as_deref().unwrap_or(&self.default_model)
    }
}

#[async_trait]
impl ProviderAdapter for HttpAdapter {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn supports_tools(&self) -> bool {
        self.supports_tools
    }

    async fn generate_once(&self, request: &ProviderRequest) -> Result<ProviderResponse> {
        let model = self.model_for(request);
        debug!(
            provider = self.id.as_str(),
            model,
            paradigm = request.paradigm.as_ref().map(|p| p.paradigm.as_str()).unwrap_or(""),
            tools = request.tools.len(),
            "dispatching generation"
        );
        let wire = self.driver.build_request(request, model, false)?;
        let body = self.transport.post_json(&wire).await?;
        self.driver.parse_response(&body)
    }

    async fn generate_streaming(&self, request: &ProviderRequest) -> Result<ChunkStream> {
        let model = self.model_for(request);
        debug!(provider = self.id.as_str(), model, "opening stream");
        let wire = self.driver.build_request(request, model, true)?;
        let bytes = self.transport.post_stream(&wire).await?;
        let frames = SseDecoder::default().decode(bytes);

        let driver = self.driver.clone();
        let chunks = frames.filter_map(move |frame| {
            future::ready(match frame {
                Ok(f) => driver.parse_stream_event(&f).transpose(),
                Err(e) => Some(Err(e)),
            })
        });
        // Fused so a drained stream can be polled again safely.
        Ok(Box::pin(chunks.fuse()))
    }
}
