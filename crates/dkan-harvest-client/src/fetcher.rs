//! HTTP content fetcher for remote DKAN instances.

use std::time::Duration;

use dkan_harvest_core::HttpConfig;
use dkan_harvest_core::error::AppError;
use dkan_harvest_core::traits::ContentFetcher;
use reqwest::{Client, StatusCode, Url};
use tokio::time::sleep;

/// [`ContentFetcher`] backed by a shared `reqwest` client.
///
/// Timeouts, connection failures and 5xx responses are retried with a linear
/// backoff; any other non-success status fails immediately.
///
/// # Examples
///
/// ```no_run
/// use dkan_harvest_client::HttpFetcher;
/// use dkan_harvest_core::HttpConfig;
/// use dkan_harvest_core::traits::ContentFetcher;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = HttpFetcher::new(&HttpConfig::default())?;
/// let body = fetcher
///     .fetch("https://data.example.org/api/3/action/current_package_list_with_resources")
///     .await?;
/// println!("{} bytes", body.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    max_retries: u32,
    retry_base_delay: Duration,
    timeout: Duration,
}

impl HttpFetcher {
    /// Builds a fetcher with the timeout and user agent from `config`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the HTTP client cannot be built.
    pub fn new(config: &HttpConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            max_retries: config.max_retries.max(1),
            retry_base_delay: config.retry_base_delay,
            timeout: config.timeout,
        })
    }

    async fn get_with_retry(&self, url: &Url) -> Result<Vec<u8>, AppError> {
        let mut last_error = AppError::Transport(format!("No attempts made for {}", url));

        for attempt in 1..=self.max_retries {
            match self.client.get(url.clone()).send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status.is_success() {
                        let body = resp
                            .bytes()
                            .await
                            .map_err(|e| AppError::Transport(e.to_string()))?;
                        return Ok(body.to_vec());
                    }

                    last_error = status_error(status, url);
                    if !status.is_server_error() {
                        return Err(last_error);
                    }
                }
                Err(e) => {
                    last_error = if e.is_timeout() {
                        AppError::Transport(format!(
                            "Request to {} timed out after {}s",
                            url,
                            self.timeout.as_secs()
                        ))
                    } else if e.is_connect() {
                        AppError::Transport(format!("Connection to {} failed: {}", url, e))
                    } else {
                        return Err(AppError::Transport(e.to_string()));
                    };
                }
            }

            if attempt < self.max_retries {
                let delay = self.retry_base_delay * attempt;
                tracing::debug!(
                    url = %url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "Retrying request"
                );
                sleep(delay).await;
            }
        }

        Err(last_error)
    }
}

fn status_error(status: StatusCode, url: &Url) -> AppError {
    AppError::Transport(format!("HTTP {} from {}", status.as_u16(), url))
}

impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AppError> {
        let url = Url::parse(url).map_err(|e| AppError::InvalidUrl(format!("{}: {}", url, e)))?;
        self.get_with_retry(&url).await
    }
}
