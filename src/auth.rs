//! Credential bootstrap against the account API.
//!
//! A service token is exchanged for the `(endpoint, key)` pair that addresses
//! one allocated stream server. The call is a single GET with no side effects.

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::error::{summarize_error_body, AccountErrorBody, VkError};
use crate::session::ClientOptions;

/// Stream server address and per-session key.
#[derive(Clone, Debug)]
pub struct Credentials {
    /// Host of the allocated stream server, without scheme.
    pub endpoint: String,
    pub key: SecretString,
}

#[derive(Debug, Deserialize)]
struct BootstrapResponse {
    #[serde(default)]
    response: Option<ServerUrl>,
    #[serde(default)]
    error: Option<AccountErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerUrl {
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    key: String,
}

/// Exchanges `access_token` for stream credentials.
pub async fn resolve_credentials(
    http: &Client,
    options: &ClientOptions,
    access_token: &SecretString,
) -> Result<Credentials, VkError> {
    if access_token.expose_secret().trim().is_empty() {
        return Err(VkError::InvalidArgument("access token must not be empty"));
    }

    debug!(event = "bootstrap_request", url = %options.bootstrap_url);
    let response = http
        .get(&options.bootstrap_url)
        .query(&[
            ("access_token", access_token.expose_secret().as_str()),
            ("v", options.api_version.as_str()),
        ])
        .send()
        .await
        .map_err(VkError::Transport)?;
    let status = response.status();
    let body = response.text().await.map_err(VkError::Transport)?;

    let credentials = parse_bootstrap_response(status, &body)?;
    debug!(event = "bootstrap_resolved", endpoint = %credentials.endpoint);
    Ok(credentials)
}

fn parse_bootstrap_response(
    status: reqwest::StatusCode,
    body: &str,
) -> Result<Credentials, VkError> {
    let parsed = match serde_json::from_str::<BootstrapResponse>(body) {
        Ok(parsed) => parsed,
        Err(_) if !status.is_success() => {
            return Err(VkError::HttpStatus {
                status,
                body: summarize_error_body(body),
            });
        }
        Err(source) => {
            return Err(VkError::Protocol {
                target: "bootstrap",
                source,
                body: summarize_error_body(body),
            });
        }
    };

    if let Some(error) = parsed.error.filter(|error| error.error_code != 0) {
        return Err(VkError::auth(error.into()));
    }
    if !status.is_success() {
        return Err(VkError::HttpStatus {
            status,
            body: summarize_error_body(body),
        });
    }

    let server = parsed.response.unwrap_or_default();
    if server.endpoint.trim().is_empty() || server.key.is_empty() {
        return Err(VkError::IncompleteCredentials);
    }

    Ok(Credentials {
        endpoint: server.endpoint,
        key: SecretString::new(server.key),
    })
}
