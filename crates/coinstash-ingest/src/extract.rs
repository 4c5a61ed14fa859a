//! Market-data extraction

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::info;

use crate::config::SourceConfig;
use crate::record::RawDataset;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Unexpected response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// A source of raw market-data rows
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Short name used in logs
    fn source_name(&self) -> &str;

    /// Fetch one snapshot. Non-success HTTP statuses are errors.
    async fn extract(&self) -> Result<RawDataset, ExtractError>;
}

/// CoinGecko `/coins/markets` snapshot
pub struct CoinGeckoExtractor {
    client: Client,
    config: SourceConfig,
}

impl CoinGeckoExtractor {
    pub fn new(config: SourceConfig) -> Result<Self, ExtractError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("coinstash-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ExtractError::Client)?;

        Ok(Self { client, config })
    }

    pub fn markets_url(&self) -> String {
        format!("{}/coins/markets", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Extractor for CoinGeckoExtractor {
    fn source_name(&self) -> &str {
        "coingecko"
    }

    async fn extract(&self) -> Result<RawDataset, ExtractError> {
        let url = self.markets_url();
        let per_page = self.config.per_page.to_string();
        let page = self.config.page.to_string();

        info!(url = %url, vs_currency = %self.config.vs_currency, "Fetching market snapshot");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("vs_currency", self.config.vs_currency.as_str()),
                ("order", "market_cap_desc"),
                ("per_page", per_page.as_str()),
                ("page", page.as_str()),
                ("sparkline", "false"),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|source| ExtractError::Request {
                url: url.clone(),
                source,
            })?;

        let dataset: RawDataset = response
            .json()
            .await
            .map_err(|source| ExtractError::Body { url, source })?;

        info!(rows = dataset.len(), "Extracted market snapshot");
        Ok(dataset)
    }
}
