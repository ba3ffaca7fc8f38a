use std::time::Duration;

use async_trait::async_trait;
use decision_core::{CoreError, CoreResult, MarketContext, SignalOpinion, SignalProducer};

use crate::config::SignalSourceConfig;

/// Signal agent served over HTTP at `GET {base}/signals/{symbol}?regime=..`.
///
/// The body is a JSON array of opinions. Opinions missing a source name are
/// attributed to this producer.
pub struct HttpSignalProducer {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpSignalProducer {
    pub fn new(source: &SignalSourceConfig, timeout: Duration) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Config(format!("HTTP client for {}: {}", source.name, e)))?;
        Ok(Self {
            name: source.name.clone(),
            base_url: source.url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint(&self, symbol: &str) -> String {
        format!("{}/signals/{}", self.base_url, symbol)
    }
}

#[async_trait]
impl SignalProducer for HttpSignalProducer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn produce(&self, symbol: &str, market: &MarketContext) -> CoreResult<Vec<SignalOpinion>> {
        let response = self
            .client
            .get(self.endpoint(symbol))
            .query(&[("regime", market.regime.as_str())])
            .send()
            .await
            .map_err(|e| CoreError::Signal(format!("{}: {}", self.name, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Signal(format!(
                "{} returned HTTP {} for {}",
                self.name, status, symbol
            )));
        }

        let mut opinions: Vec<SignalOpinion> = response
            .json()
            .await
            .map_err(|e| CoreError::Signal(format!("{}: invalid response: {}", self.name, e)))?;
        for opinion in &mut opinions {
            if opinion.source.is_empty() {
                opinion.source = self.name.clone();
            }
        }
        tracing::debug!(source = %self.name, symbol, count = opinions.len(), "Fetched signals");
        Ok(opinions)
    }
}
