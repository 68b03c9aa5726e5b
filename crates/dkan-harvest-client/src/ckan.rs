//! Client for the action API of the local CKAN instance.

use dkan_harvest_core::HttpConfig;
use dkan_harvest_core::error::AppError;
use dkan_harvest_core::traits::{Action, ActionApi, License};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;

/// Envelope of every CKAN action API response.
///
/// CKAN API reference: <https://docs.ckan.org/en/2.9/api/>
///
/// ```json
/// { "success": false, "error": { "__type": "Not Found Error", "message": "Not found" } }
/// ```
#[derive(Deserialize, Debug)]
struct CkanResponse {
    success: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// HTTP client for the local CKAN action API.
///
/// Every action is sent as a JSON `POST` to `{base_url}/api/3/action/{name}`,
/// authenticated with the API token of the harvest user when one is set.
///
/// # Examples
///
/// ```no_run
/// use dkan_harvest_client::CkanActionClient;
/// use dkan_harvest_core::HttpConfig;
/// use dkan_harvest_core::traits::{Action, ActionApi};
/// use serde_json::json;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let ckan = CkanActionClient::new("http://localhost:5000", Some("token".into()), &HttpConfig::default())?;
/// let group = ckan.invoke(Action::GroupShow, json!({"id": "transport"})).await?;
/// println!("{}", group["title"]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CkanActionClient {
    client: Client,
    base_url: Url,
    api_token: Option<String>,
}

impl CkanActionClient {
    /// Creates a client for the CKAN instance at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidUrl` if the URL is malformed.
    /// Returns `AppError::Transport` if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        config: &HttpConfig,
    ) -> Result<Self, AppError> {
        let base_url =
            Url::parse(base_url).map_err(|_| AppError::InvalidUrl(base_url.to_string()))?;

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            api_token: api_token.filter(|t| !t.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn action_url(&self, name: &str) -> Result<Url, AppError> {
        let endpoint = format!(
            "{}/api/3/action/{}",
            self.base_url.as_str().trim_end_matches('/'),
            name
        );
        Url::parse(&endpoint).map_err(|e| AppError::InvalidUrl(format!("{}: {}", endpoint, e)))
    }

    /// Fetches the licenses registered on the local instance.
    pub async fn license_list(&self) -> Result<Vec<License>, AppError> {
        let url = self.action_url("license_list")?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Transport(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AppError::Transport(e.to_string()))?;

        let result = parse_response("license_list", status, &body)?;
        Ok(serde_json::from_value(result)?)
    }
}

impl ActionApi for CkanActionClient {
    async fn invoke(&self, action: Action, data: Value) -> Result<Value, AppError> {
        let url = self.action_url(action.as_str())?;

        let mut request = self.client.post(url).json(&data);
        if let Some(token) = &self.api_token {
            request = request.header(reqwest::header::AUTHORIZATION, token);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| AppError::Transport(format!("{} failed: {}", action, e)))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AppError::Transport(e.to_string()))?;

        tracing::debug!(action = action.as_str(), status = status.as_u16(), "Action call");
        parse_response(action.as_str(), status, &body)
    }
}

/// Turns an action API response into its `result`, or the matching error.
fn parse_response(action: &str, status: StatusCode, body: &str) -> Result<Value, AppError> {
    let response: CkanResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(_) if status == StatusCode::NOT_FOUND => {
            return Err(AppError::NotFound(format!("{}: HTTP 404", action)));
        }
        Err(_) => {
            return Err(AppError::Transport(format!(
                "{} returned HTTP {} with a non-JSON body",
                action,
                status.as_u16()
            )));
        }
    };

    if response.success {
        return Ok(response.result.unwrap_or(Value::Null));
    }

    Err(action_error(action, status, response.error.unwrap_or(Value::Null)))
}

fn action_error(action: &str, status: StatusCode, error: Value) -> AppError {
    let error_type = error
        .get("__type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string);

    match error_type.as_str() {
        "Not Found Error" => AppError::NotFound(format!(
            "{}: {}",
            action,
            message.unwrap_or_else(|| "Not found".to_string())
        )),
        "Validation Error" => {
            let mut details = error;
            if let Some(map) = details.as_object_mut() {
                map.remove("__type");
            }
            AppError::Validation(details.to_string())
        }
        _ if status == StatusCode::NOT_FOUND => AppError::NotFound(action.to_string()),
        "" => AppError::Generic(format!("{} failed with HTTP {}", action, status.as_u16())),
        other => AppError::Generic(format!(
            "{} failed: {}: {}",
            action,
            other,
            message.unwrap_or_default()
        )),
    }
}
