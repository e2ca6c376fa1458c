use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::config::CrawlConfig;
use crate::domain::{ProductId, ProductPayload, Record};
use crate::error::CrawlError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Status(u16),
    Error(String),
}

/// Result of a single request attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success(Record),
    Retryable(FailureReason),
    Permanent(FailureReason),
}

pub trait ProductSource: Send + Sync {
    fn attempt(&self, id: ProductId) -> impl Future<Output = AttemptOutcome> + Send;
}

#[derive(Clone)]
pub struct ProductHttpClient {
    client: Client,
    base_url: String,
}

impl ProductHttpClient {
    pub fn new(config: &CrawlConfig) -> Result<Self, CrawlError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("prodfetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CrawlError::ProductHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .connect_timeout(config.timeout.min(Duration::from_secs(10)))
            .pool_max_idle_per_host(config.concurrency)
            .build()
            .map_err(|err| CrawlError::ProductHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn product_url(&self, id: ProductId) -> String {
        format!("{}/{id}", self.base_url)
    }
}

impl ProductSource for ProductHttpClient {
    async fn attempt(&self, id: ProductId) -> AttemptOutcome {
        let url = self.product_url(id);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(err) => return AttemptOutcome::Retryable(FailureReason::Error(err.to_string())),
        };

        let status = response.status().as_u16();
        if status != 200 {
            return classify_status(status);
        }

        match response.text().await {
            Ok(body) => parse_payload(id, &body),
            Err(err) => AttemptOutcome::Retryable(FailureReason::Error(err.to_string())),
        }
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Classify a non-200 status.
pub fn classify_status(status: u16) -> AttemptOutcome {
    if is_retryable_status(status) {
        AttemptOutcome::Retryable(FailureReason::Status(status))
    } else {
        AttemptOutcome::Permanent(FailureReason::Status(status))
    }
}

/// Build the attempt outcome for a 200 response body.
pub fn parse_payload(id: ProductId, body: &str) -> AttemptOutcome {
    match serde_json::from_str::<ProductPayload>(body) {
        Ok(payload) => AttemptOutcome::Success(Record::from_payload(id, &payload)),
        Err(err) => AttemptOutcome::Retryable(FailureReason::Error(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn status_classification() {
        for status in [429, 500, 502, 503, 504] {
            assert_matches!(
                classify_status(status),
                AttemptOutcome::Retryable(FailureReason::Status(_))
            );
        }
        for status in [301, 400, 401, 403, 404, 501] {
            assert_matches!(
                classify_status(status),
                AttemptOutcome::Permanent(FailureReason::Status(_))
            );
        }
    }

    #[test]
    fn garbled_body_is_retryable() {
        let id = ProductId::new(5).unwrap();
        assert_matches!(
            parse_payload(id, "{\"name\": "),
            AttemptOutcome::Retryable(FailureReason::Error(_))
        );
    }
}
