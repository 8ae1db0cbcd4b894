//! Call-control provider REST client

use async_trait::async_trait;
use callhub_core::config::ProviderConfig;
use callhub_core::traits::ProviderControl;
use callhub_core::{AppError, AppResult};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Redirects live call legs through the provider's REST API
pub struct HttpProviderClient {
    http: Client,
    api_base_url: String,
    account_sid: String,
    auth_token: String,
}

impl HttpProviderClient {
    pub fn new(config: &ProviderConfig) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build provider client: {}", e)))?;

        Ok(Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
        })
    }

    fn call_url(&self, call_id: &str) -> String {
        format!(
            "{}/Accounts/{}/Calls/{}.json",
            self.api_base_url, self.account_sid, call_id
        )
    }
}

#[async_trait]
impl ProviderControl for HttpProviderClient {
    #[instrument(skip(self))]
    async fn redirect(&self, call_id: &str, url: &str) -> AppResult<()> {
        let response = self
            .http
            .post(self.call_url(call_id))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Url", url), ("Method", "POST")])
            .send()
            .await
            .map_err(|e| {
                error!("Provider redirect request failed for {}: {}", call_id, e);
                AppError::Provider(format!("redirect request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Provider rejected redirect");
            return Err(rejection(status));
        }

        debug!("Call redirected");
        Ok(())
    }
}

/// Error for a non-success redirect response. Client errors other than
/// timeouts and throttling mean the leg is gone or the request is wrong.
fn rejection(status: StatusCode) -> AppError {
    let message = format!("redirect rejected with status {}", status);
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => AppError::Provider(message),
        s if s.is_client_error() => AppError::ProviderRejected(message),
        _ => AppError::Provider(message),
    }
}

/// Stand-in used when no provider credentials are configured
#[derive(Debug, Default)]
pub struct NoopProviderControl;

#[async_trait]
impl ProviderControl for NoopProviderControl {
    async fn redirect(&self, call_id: &str, url: &str) -> AppResult<()> {
        warn!(call_id, url, "Provider credentials not configured; redirect skipped");
        Ok(())
    }
}
