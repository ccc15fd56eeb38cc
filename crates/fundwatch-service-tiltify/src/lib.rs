// # Tiltify Fundraising Service
//
// This crate provides a Tiltify public API (v5) implementation of the
// `FundraisingService` trait.
//
// ## Implementation Status
//
// - ✅ One request per snapshot, plus pagination for list endpoints
// - ✅ Full error propagation to the scheduler (which owns retries and backoff)
// - ✅ HTTP timeout configured (30 seconds)
// - ✅ Status codes carried in `Error::Remote` for retry classification
// - ✅ Connection failures and timeouts reported as `Error::Transport`
// - ❌ NO retry logic (owned by PollScheduler)
// - ❌ NO caching (state owned by CampaignReconciler and the StateStore)
// - ❌ NO background tasks
//
// ## Trust Level: Untrusted (Fundraising Service)
//
// **Allowed Capabilities**:
// - ✅ Perform HTTPS API calls to Tiltify only
// - ✅ Parse Tiltify-specific responses
//
// **Forbidden Capabilities**:
// - ❌ Spawn tasks or threads
// - ❌ Implement retry logic
// - ❌ Access the state store
//
// ## Security Requirements
//
// - Access token NEVER appears in logs
// - Service MUST fail fast if the token is empty
//
// ## API Reference
//
// - Get campaign: GET `/api/public/campaigns/:id`
// - Get cause: GET `/api/public/causes/:id`
// - List rewards: GET `/api/public/campaigns/:id/rewards`
// - List milestones: GET `/api/public/campaigns/:id/milestones`
// - List donations: GET `/api/public/campaigns/:id/donations?completed_after=...`
// - List donation matches: GET `/api/public/campaigns/:id/donation_matches`
// - Current user: GET `/api/public/current-user`
//
// Every response wraps its payload as `{ "data": ..., "metadata": ... }`;
// list endpoints paginate with the `metadata.after` cursor.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use fundwatch_core::config::ServiceConfig;
use fundwatch_core::model::{Campaign, Cause, Donation, DonationMatch, Milestone, Reward};
use fundwatch_core::traits::{FundraisingService, FundraisingServiceFactory};
use fundwatch_core::{Error, Result, ServiceRegistry};
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Tiltify API base URL
const TILTIFY_API_BASE: &str = "https://v5api.tiltify.com";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Page size requested from list endpoints
const PAGE_LIMIT: u32 = 100;

/// Upper bound of pages followed by one list call
const MAX_PAGES: usize = 500;

/// Response envelope shared by every endpoint
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
    #[serde(default)]
    metadata: Option<PageMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct PageMetadata {
    /// Cursor of the next page, absent on the last page
    #[serde(default)]
    after: Option<String>,
}

/// Tiltify fundraising service
///
/// # Security
///
/// The Debug implementation intentionally does NOT expose the access token.
pub struct TiltifyService {
    /// OAuth access token
    /// ⚠️ NEVER log this value
    access_token: String,

    /// API base URL without trailing slash
    base_url: String,

    /// HTTP client for API requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the access token
impl std::fmt::Debug for TiltifyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiltifyService")
            .field("access_token", &"<REDACTED>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl TiltifyService {
    /// Create a new Tiltify service
    ///
    /// # Parameters
    ///
    /// - `access_token`: OAuth access token with public read scope
    /// - `base_url`: API base URL override (defaults to the public endpoint)
    ///
    /// # Errors
    ///
    /// `Error::Config` when the token is empty or the HTTP client cannot be built.
    pub fn new(access_token: impl Into<String>, base_url: Option<String>) -> Result<Self> {
        let access_token = access_token.into();
        if access_token.is_empty() {
            return Err(Error::config("Tiltify access token cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        let base_url = base_url
            .unwrap_or_else(|| TILTIFY_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            access_token,
            base_url,
            client,
        })
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform one GET request and unwrap the envelope
    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Envelope<T>> {
        let url = format!("{}{}", self.base_url, path);
        tracing::trace!("GET {}", path);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| Error::transport(format!("HTTP request to {} failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(status_error(status, path, &error_text));
        }

        response
            .json::<Envelope<T>>()
            .await
            .map_err(|e| Error::Other(format!("Failed to parse response from {}: {}", path, e)))
    }

    async fn get_one<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        Ok(self.get(path, &[]).await?.data)
    }

    /// Fetch every page of a list endpoint
    async fn get_all<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut after: Option<String> = None;

        for page in 1..=MAX_PAGES {
            let mut params = query.to_vec();
            params.push(("limit", PAGE_LIMIT.to_string()));
            if let Some(cursor) = after.take() {
                params.push(("after", cursor));
            }

            let envelope: Envelope<Vec<T>> = self.get(path, &params).await?;
            let page_len = envelope.data.len();
            items.extend(envelope.data);

            match envelope.metadata.and_then(|metadata| metadata.after) {
                Some(cursor) if page_len > 0 => after = Some(cursor),
                _ => return Ok(items),
            }

            if page == MAX_PAGES {
                tracing::warn!(
                    "Stopped following {} after {} pages ({} items)",
                    path,
                    MAX_PAGES,
                    items.len()
                );
            }
        }

        Ok(items)
    }
}

/// Map a non-success status to `Error::Remote`
fn status_error(status: StatusCode, path: &str, error_text: &str) -> Error {
    let message = match status.as_u16() {
        401 => "Authentication failed: invalid or expired access token".to_string(),
        403 => "Access denied: token lacks the required scope".to_string(),
        404 => format!("Not found: {}", path),
        422 => format!("Unprocessable request to {}: {}", path, error_text),
        429 => "Rate limit exceeded".to_string(),
        500..=599 => format!("Tiltify server error (transient): {}", error_text),
        _ => format!("Request to {} failed: {}", path, error_text),
    };
    Error::remote(status.as_u16(), message)
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl FundraisingService for TiltifyService {
    async fn validate_token(&self) -> Result<bool> {
        match self
            .get::<serde_json::Value>("/api/public/current-user", &[])
            .await
        {
            Ok(_) => Ok(true),
            Err(Error::Remote {
                status: 401 | 403, ..
            }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_campaign(&self, campaign_id: &str) -> Result<Campaign> {
        self.get_one(&format!("/api/public/campaigns/{}", campaign_id))
            .await
    }

    async fn get_cause(&self, cause_id: &str) -> Result<Cause> {
        self.get_one(&format!("/api/public/causes/{}", cause_id)).await
    }

    async fn get_rewards(&self, campaign_id: &str) -> Result<Vec<Reward>> {
        self.get_all(&format!("/api/public/campaigns/{}/rewards", campaign_id), &[])
            .await
    }

    async fn get_milestones(&self, campaign_id: &str) -> Result<Vec<Milestone>> {
        self.get_all(&format!("/api/public/campaigns/{}/milestones", campaign_id), &[])
            .await
    }

    async fn get_donations(
        &self,
        campaign_id: &str,
        completed_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Donation>> {
        let query: Vec<(&str, String)> = completed_after
            .map(|after| vec![("completed_after", format_timestamp(after))])
            .unwrap_or_default();

        let donations: Vec<Donation> = self
            .get_all(&format!("/api/public/campaigns/{}/donations", campaign_id), &query)
            .await?;

        Ok(match completed_after {
            Some(after) => donations
                .into_iter()
                .filter(|donation| donation.completed_at > after)
                .collect(),
            None => donations,
        })
    }

    async fn get_donation_matches(
        &self,
        campaign_id: &str,
        updated_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<DonationMatch>> {
        let matches: Vec<DonationMatch> = self
            .get_all(
                &format!("/api/public/campaigns/{}/donation_matches", campaign_id),
                &[],
            )
            .await?;

        // The endpoint has no server-side filter
        Ok(match updated_after {
            Some(after) => matches
                .into_iter()
                .filter(|donation_match| donation_match.updated_at > after)
                .collect(),
            None => matches,
        })
    }

    fn service_name(&self) -> &'static str {
        "tiltify"
    }
}

/// Factory for creating Tiltify services
pub struct TiltifyFactory;

impl FundraisingServiceFactory for TiltifyFactory {
    fn create(&self, config: &ServiceConfig) -> Result<Box<dyn FundraisingService>> {
        match config {
            ServiceConfig::Tiltify {
                access_token,
                base_url,
            } => {
                if access_token.is_empty() {
                    return Err(Error::config("Tiltify access token is required"));
                }
                Ok(Box::new(TiltifyService::new(
                    access_token.clone(),
                    base_url.clone(),
                )?))
            }
            _ => Err(Error::config("Invalid config for Tiltify service")),
        }
    }
}

/// Register the Tiltify service with a registry
///
/// # Example
///
/// ```rust
/// use fundwatch_core::ServiceRegistry;
///
/// let registry = ServiceRegistry::new();
/// fundwatch_service_tiltify::register(&registry);
/// assert!(registry.has_service("tiltify"));
/// ```
pub fn register(registry: &ServiceRegistry) {
    registry.register_service("tiltify", Box::new(TiltifyFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use fundwatch_core::RetryClass;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(server: &MockServer) -> TiltifyService {
        TiltifyService::new("test_token", Some(format!("{}/", server.uri()))).unwrap()
    }

    #[test]
    fn test_factory_creation() {
        let config = ServiceConfig::Tiltify {
            access_token: "test_token".to_string(),
            base_url: None,
        };
        assert!(TiltifyFactory.create(&config).is_ok());

        let config = ServiceConfig::Tiltify {
            access_token: String::new(),
            base_url: None,
        };
        assert!(TiltifyFactory.create(&config).is_err());
    }

    #[test]
    fn test_empty_token_is_rejected() {
        assert!(matches!(TiltifyService::new("", None), Err(Error::Config(_))));
    }

    #[test]
    fn test_access_token_not_exposed_in_debug() {
        let service = TiltifyService::new("secret_token_12345", None).unwrap();

        let debug_str = format!("{:?}", service);
        assert!(!debug_str.contains("secret_token"));
        assert!(debug_str.contains("TiltifyService"));
        assert_eq!(service.base_url(), TILTIFY_API_BASE);
    }

    #[test]
    fn test_status_errors_carry_status() {
        let error = status_error(StatusCode::SERVICE_UNAVAILABLE, "/x", "busy");
        assert_eq!(error.status(), Some(503));
        assert_eq!(error.retry_class(), RetryClass::Backoff);

        let error = status_error(StatusCode::UNAUTHORIZED, "/x", "");
        assert_eq!(error.retry_class(), RetryClass::Once);

        let error = status_error(StatusCode::NOT_FOUND, "/x", "");
        assert_eq!(error.retry_class(), RetryClass::Shutdown);
    }

    #[tokio::test]
    async fn test_get_campaign_unwraps_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/public/campaigns/c1"))
            .and(header("authorization", "Bearer test_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "id": "c1",
                    "name": "Charity Stream",
                    "cause_id": "cause-1",
                    "amount_raised": {"currency": "USD", "value": "450.00"}
                }
            })))
            .mount(&server)
            .await;

        let campaign = service(&server).get_campaign("c1").await.unwrap();

        assert_eq!(campaign.name, "Charity Stream");
        assert_eq!(campaign.cause_id(), Some("cause-1"));
        assert_eq!(campaign.amount_raised.value, 450.0);
    }

    #[tokio::test]
    async fn test_server_error_maps_to_remote() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/public/campaigns/c1"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&server)
            .await;

        let error = service(&server).get_campaign("c1").await.unwrap_err();
        assert!(matches!(error, Error::Remote { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_donations_follow_pagination() {
        let server = MockServer::start().await;
        let donation = |id: &str, completed_at: &str| {
            json!({
                "id": id,
                "amount": {"currency": "USD", "value": "5.00"},
                "donor_name": "Ada",
                "completed_at": completed_at
            })
        };

        Mock::given(method("GET"))
            .and(path("/api/public/campaigns/c1/donations"))
            .and(query_param("completed_after", "2024-05-01T12:00:00.000Z"))
            .and(query_param_is_missing("after"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [donation("d1", "2024-05-01T12:01:00Z")],
                "metadata": {"after": "cursor-1", "limit": 100}
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/public/campaigns/c1/donations"))
            .and(query_param("after", "cursor-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    donation("d2", "2024-05-01T12:02:00Z"),
                    donation("stale", "2024-05-01T11:00:00Z")
                ],
                "metadata": {"after": null, "limit": 100}
            })))
            .mount(&server)
            .await;

        let since = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let donations = service(&server).get_donations("c1", Some(since)).await.unwrap();

        let ids: Vec<&str> = donations.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d2"]);
    }

    #[tokio::test]
    async fn test_validate_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/public/current-user"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        assert!(!service(&server).validate_token().await.unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let service = TiltifyService::new("test_token", Some("http://127.0.0.1:1".into())).unwrap();

        let error = service.get_cause("cause-1").await.unwrap_err();
        assert!(matches!(error, Error::Transport(_)));
        assert_eq!(error.retry_class(), RetryClass::Backoff);
    }
}
