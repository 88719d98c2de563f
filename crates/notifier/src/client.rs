//! HTTP client for the backend API's internal endpoints.
//!
//! The backend owns users, benefits and notification delivery. This client
//! implements the engine's collaborator traits on top of it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;
use uuid::Uuid;

use feedpulse_common::config::AppConfig;
use feedpulse_common::error::{AppError, AppResult};
use feedpulse_common::types::{FeedDisabledCode, UserBenefits};
use feedpulse_engine::ports::{
    ConnectionDisabledAlert, Entitlements, FeedLimitEnforcer, LookupKeySync, NotificationSender,
    UserFeedLimit,
};

/// Connection settings of the backend API.
#[derive(Debug, Clone)]
pub struct BackendApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl BackendApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl From<&AppConfig> for BackendApiConfig {
    fn from(config: &AppConfig) -> Self {
        BackendApiConfig::new(config.backend_api_url.clone())
            .with_api_key(config.backend_api_key.clone())
            .with_timeout(Duration::from_secs(config.http_timeout_seconds))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DisabledFeedsAlert {
    feed_ids: Vec<Uuid>,
    disabled_code: FeedDisabledCode,
}

#[derive(Debug, Serialize)]
struct EnforceLimitsRequest {
    limits: Vec<UserFeedLimit>,
}

pub struct BackendApiClient {
    base_url: Url,
    api_key: Option<String>,
    http_client: Client,
}

impl BackendApiClient {
    pub fn new(config: BackendApiConfig) -> AppResult<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| AppError::Config(format!("invalid backend API url: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::Config(format!(
                "backend API url cannot be a base: {base_url}"
            )));
        }

        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            api_key: config.api_key,
            http_client,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let builder = self.http_client.request(method, self.endpoint(segments));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> AppResult<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| AppError::Upstream(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().path().to_string();
        if status == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(url));
        }
        Err(AppError::Upstream(format!("{url} returned {status}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> AppResult<T> {
        let response = self.send(self.request(Method::GET, segments)).await?;
        response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("invalid response body: {e}")))
    }

    async fn post<B: Serialize + ?Sized>(&self, segments: &[&str], body: Option<&B>) -> AppResult<()> {
        let mut builder = self.request(Method::POST, segments);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        self.send(builder).await?;
        Ok(())
    }
}

#[async_trait]
impl Entitlements for BackendApiClient {
    async fn get_benefits_of_user(&self, discord_user_id: &str) -> AppResult<UserBenefits> {
        self.get_json(&["internal", "benefits", discord_user_id]).await
    }

    async fn get_benefits_of_all_users(&self) -> AppResult<Vec<UserBenefits>> {
        let benefits: Vec<UserBenefits> = self.get_json(&["internal", "benefits"]).await?;
        tracing::debug!(count = benefits.len(), "Fetched benefits of all users");
        Ok(benefits)
    }

    async fn sync_discord_supporter_roles(&self, discord_user_id: &str) -> AppResult<()> {
        self.post::<()>(
            &["internal", "supporters", discord_user_id, "sync-roles"],
            None,
        )
        .await
    }
}

#[async_trait]
impl NotificationSender for BackendApiClient {
    async fn send_disabled_feeds_alert(
        &self,
        feed_ids: Vec<Uuid>,
        code: FeedDisabledCode,
    ) -> AppResult<()> {
        let alert = DisabledFeedsAlert {
            feed_ids,
            disabled_code: code,
        };
        self.post(&["internal", "notifications", "disabled-feeds"], Some(&alert))
            .await
    }

    async fn send_disabled_connection_alert(&self, alert: ConnectionDisabledAlert) -> AppResult<()> {
        self.post(
            &["internal", "notifications", "disabled-connection"],
            Some(&alert),
        )
        .await
    }
}

#[async_trait]
impl FeedLimitEnforcer for BackendApiClient {
    async fn enforce_all_user_feed_limits(&self, limits: Vec<UserFeedLimit>) -> AppResult<()> {
        let count = limits.len();
        self.post(
            &["internal", "user-feeds", "enforce-limits"],
            Some(&EnforceLimitsRequest { limits }),
        )
        .await?;

        tracing::debug!(users = count, "Requested feed limit enforcement");
        Ok(())
    }
}

#[async_trait]
impl LookupKeySync for BackendApiClient {
    async fn sync_lookup_keys(&self) -> AppResult<()> {
        self.post::<()>(&["internal", "users", "sync-lookup-keys"], None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> BackendApiClient {
        BackendApiClient::new(BackendApiConfig::new(base)).unwrap()
    }

    #[test]
    fn test_endpoint_appends_segments_to_base_path() {
        let url = client("http://backend:8000/api/").endpoint(&["internal", "benefits", "123"]);
        assert_eq!(url.as_str(), "http://backend:8000/api/internal/benefits/123");

        let url = client("http://backend:8000").endpoint(&["internal", "benefits"]);
        assert_eq!(url.as_str(), "http://backend:8000/internal/benefits");
    }

    #[test]
    fn test_segments_are_escaped() {
        let url = client("http://backend").endpoint(&["internal", "benefits", "a/b c"]);
        assert_eq!(url.as_str(), "http://backend/internal/benefits/a%2Fb%20c");
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        assert!(matches!(
            BackendApiClient::new(BackendApiConfig::new("not a url")),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            BackendApiClient::new(BackendApiConfig::new("mailto:ops@example.com")),
            Err(AppError::Config(_))
        ));
    }
}
