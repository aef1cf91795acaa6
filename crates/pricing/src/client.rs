use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use phasequote_core::config::PricingConfig;
use phasequote_core::cpq::catalog::{CatalogError, ProductCatalog, RateCardSource};
use phasequote_core::cpq::refresh::{
    PriceLookup, PriceLookupError, PriceLookupOutcome, PriceLookupRequest,
};
use phasequote_core::domain::product::Product;
use phasequote_core::domain::rate_card::RateCard;

use crate::wire::PriceResponse;

const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum PricingClientError {
    #[error("pricing base url is not configured")]
    MissingBaseUrl,
    #[error("failed to build http client: {0}")]
    Build(String),
}

/// No response was obtained, after retries.
#[derive(Debug)]
struct SendError(String);

/// Non-success response, with a shortened body.
#[derive(Debug)]
struct ServiceFailure {
    status: StatusCode,
    message: String,
}

enum Fetched<T> {
    Body(T),
    /// 404, with whatever body came back.
    NotFound(String),
}

#[derive(Debug)]
enum FetchError {
    Send(SendError),
    Service(ServiceFailure),
    Decode(String),
}

impl From<FetchError> for PriceLookupError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::Send(SendError(message)) => Self::Transport(message),
            FetchError::Service(failure) => {
                Self::Service { status: failure.status.as_u16(), message: failure.message }
            }
            FetchError::Decode(message) => Self::Decode(message),
        }
    }
}

impl From<FetchError> for CatalogError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::Send(SendError(message)) => Self::Unavailable(message),
            FetchError::Service(failure) => Self::Unavailable(format!(
                "status {}: {}",
                failure.status.as_u16(),
                failure.message
            )),
            FetchError::Decode(message) => Self::Decode(message),
        }
    }
}

/// Pricing service client with bounded retries on transport errors and 5xx.
///
/// Endpoints, relative to the base url:
/// - `GET /prices?product_id&as_of[&rate_card_id]`
/// - `GET /rate-cards[?active_on]`
/// - `GET /products?q&limit`
#[derive(Clone)]
pub struct HttpPricingClient {
    client: Client,
    base_url: String,
    api_token: Option<SecretString>,
    max_attempts: usize,
    base_backoff: Duration,
}

impl std::fmt::Debug for HttpPricingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPricingClient")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl HttpPricingClient {
    pub fn builder(base_url: impl Into<String>) -> HttpPricingClientBuilder {
        HttpPricingClientBuilder::new(base_url)
    }

    pub fn from_config(config: &PricingConfig) -> Result<Self, PricingClientError> {
        let base_url = config.base_url.clone().ok_or(PricingClientError::MissingBaseUrl)?;
        let mut builder = Self::builder(base_url)
            .timeout(Duration::from_secs(config.timeout_secs))
            .max_retries(config.max_retries);
        if let Some(token) = config.bearer_token() {
            builder = builder.api_token(token);
        }
        builder.build()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let request = self.client.get(format!("{}/{}", self.base_url, path));
        match &self.api_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, SendError> {
        let attempts = self.max_attempts.max(1);
        let mut last_error = String::from("no attempt was made");

        for attempt in 0..attempts {
            let Some(cloned) = builder.try_clone() else {
                return Err(SendError("request cannot be retried".to_string()));
            };
            let request = cloned.build().map_err(|e| SendError(e.to_string()))?;
            let url = request.url().clone();
            debug!(
                event_name = "pricing.http.request",
                attempt = attempt + 1,
                %url,
                "sending pricing request"
            );

            match self.client.execute(request).await {
                Ok(response) => {
                    let status = response.status();
                    debug!(
                        event_name = "pricing.http.response",
                        attempt = attempt + 1,
                        %url,
                        %status,
                        "received pricing response"
                    );
                    if status.is_server_error() && attempt + 1 < attempts {
                        self.sleep_with_backoff(attempt + 1).await;
                        continue;
                    }
                    return Ok(response);
                }
                Err(error) => {
                    debug!(
                        event_name = "pricing.http.failed",
                        attempt = attempt + 1,
                        %url,
                        error = %error,
                        "pricing request failed"
                    );
                    last_error = error.to_string();
                    if attempt + 1 < attempts && should_retry(&error) {
                        self.sleep_with_backoff(attempt + 1).await;
                        continue;
                    }
                    return Err(SendError(last_error));
                }
            }
        }

        Err(SendError(last_error))
    }

    fn backoff_delay(&self, retry_number: usize) -> Duration {
        let shift = retry_number.saturating_sub(1).min(8) as u32;
        self.base_backoff.saturating_mul(1u32 << shift)
    }

    async fn sleep_with_backoff(&self, retry_number: usize) {
        let delay = self.backoff_delay(retry_number);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Sends a GET and decodes a success body. 404 is handed back undecoded.
    async fn fetch<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<Fetched<T>, FetchError> {
        let response = self.send(builder).await.map_err(FetchError::Send)?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(Fetched::NotFound(response.text().await.unwrap_or_default()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Service(ServiceFailure {
                status,
                message: shorten(&body, status),
            }));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Send(SendError(e.to_string())))?;
        serde_json::from_slice(&bytes).map(Fetched::Body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

fn should_retry(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

fn shorten(body: &str, status: StatusCode) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return status.canonical_reason().unwrap_or("no response body").to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

/// Only a 404 that answers `{"found": false}` means the product has no price.
/// Any other 404, e.g. from a wrong base url, is a service failure.
fn not_found_price(
    body: &str,
    request: &PriceLookupRequest,
) -> Result<PriceLookupOutcome, PriceLookupError> {
    match serde_json::from_str::<PriceResponse>(body) {
        Ok(response) if !response.found => response.into_outcome(request.rate_card_id.as_ref()),
        _ => Err(PriceLookupError::Service {
            status: StatusCode::NOT_FOUND.as_u16(),
            message: shorten(body, StatusCode::NOT_FOUND),
        }),
    }
}

#[async_trait]
impl PriceLookup for HttpPricingClient {
    async fn lookup(
        &self,
        request: &PriceLookupRequest,
    ) -> Result<PriceLookupOutcome, PriceLookupError> {
        let mut query = vec![
            ("product_id", request.product_id.0.clone()),
            ("as_of", request.as_of.to_string()),
        ];
        if let Some(rate_card_id) = &request.rate_card_id {
            query.push(("rate_card_id", rate_card_id.0.clone()));
        }

        match self.fetch::<PriceResponse>(self.get("prices").query(&query)).await? {
            Fetched::Body(body) => body.into_outcome(request.rate_card_id.as_ref()),
            Fetched::NotFound(body) => not_found_price(&body, request),
        }
    }
}

#[async_trait]
impl RateCardSource for HttpPricingClient {
    async fn list_rate_cards(
        &self,
        active_on: Option<NaiveDate>,
    ) -> Result<Vec<RateCard>, CatalogError> {
        let mut request = self.get("rate-cards");
        if let Some(date) = active_on {
            request = request.query(&[("active_on", date.to_string())]);
        }

        match self.fetch::<Vec<RateCard>>(request).await? {
            Fetched::Body(cards) => Ok(cards),
            Fetched::NotFound(_) => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl ProductCatalog for HttpPricingClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Product>, CatalogError> {
        let request =
            self.get("products").query(&[("q", query.to_string()), ("limit", limit.to_string())]);

        match self.fetch::<Vec<Product>>(request).await? {
            Fetched::Body(mut products) => {
                products.truncate(limit);
                Ok(products)
            }
            Fetched::NotFound(_) => Ok(Vec::new()),
        }
    }
}

/// Builder for [`HttpPricingClient`].
#[derive(Debug)]
pub struct HttpPricingClientBuilder {
    base_url: String,
    api_token: Option<SecretString>,
    timeout: Duration,
    max_retries: u32,
    base_backoff: Duration,
}

impl HttpPricingClientBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: None,
            timeout: Duration::from_secs(10),
            max_retries: 2,
            base_backoff: Duration::from_millis(200),
        }
    }

    pub fn api_token(mut self, token: &str) -> Self {
        self.api_token = Some(SecretString::from(token.to_string()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Retries after the first attempt.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    pub fn build(self) -> Result<HttpPricingClient, PricingClientError> {
        let base_url = self.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(PricingClientError::MissingBaseUrl);
        }

        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("phasequote/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PricingClientError::Build(e.to_string()))?;

        Ok(HttpPricingClient {
            client,
            base_url,
            api_token: self.api_token,
            max_attempts: self.max_retries as usize + 1,
            base_backoff: self.base_backoff,
        })
    }
}
