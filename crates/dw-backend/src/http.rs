//! Shared HTTP client construction.

use std::time::Duration;

use reqwest::Client;

use crate::BackendError;

/// Build an HTTP client with appropriate timeouts and connection limits.
///
/// One denial is in flight at a time, so a small idle pool is enough.
pub fn build_http_client() -> Result<Client, BackendError> {
    let client = Client::builder()
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(2)
        .build()?;
    Ok(client)
}

/// Turn a non-success response into [`BackendError::Api`].
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, BackendError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Api(format!("{status}: {body}")))
}
