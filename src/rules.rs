//! Filter rule management for a session.
//!
//! The remote service owns the rule set; nothing is cached locally and tag
//! uniqueness is enforced by the service, not here.

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::error::{summarize_error_body, ApiError, StreamingErrorBody, VkError};
use crate::session::VkStream;

/// Envelope code the rules endpoint returns on success.
const RULES_OK_CODE: i64 = 200;

/// A tagged filter expression.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rule {
    /// Filter expression in the service's rule syntax.
    pub value: String,
    /// Caller-chosen identifier, unique among the session's rules.
    pub tag: String,
}

impl Rule {
    pub fn new(value: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            tag: tag.into(),
        }
    }
}

/// Tags removed by a completed [`VkStream::delete_all_rules`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClearedRules {
    pub removed: Vec<String>,
}

/// Partial failure of [`VkStream::delete_all_rules`].
///
/// Rules listed in `removed` are gone remotely; the rest were not attempted
/// or failed with `source`.
#[derive(Debug, Error)]
#[error("clearing rules failed after removing {} rule(s): {source}", .removed.len())]
pub struct ClearRulesError {
    pub removed: Vec<String>,
    #[source]
    pub source: VkError,
}

#[derive(Debug, Serialize)]
struct AddRuleRequest<'a> {
    rule: RuleRef<'a>,
}

#[derive(Debug, Serialize)]
struct RuleRef<'a> {
    value: &'a str,
    tag: &'a str,
}

#[derive(Debug, Serialize)]
struct DeleteRuleRequest<'a> {
    tag: &'a str,
}

#[derive(Debug, Deserialize)]
struct RulesResponse {
    code: i64,
    #[serde(default)]
    rules: Option<Vec<Rule>>,
    #[serde(default)]
    error: Option<StreamingErrorBody>,
}

#[derive(Debug, Deserialize)]
struct EmptyResponse {
    code: i64,
    #[serde(default)]
    error: Option<StreamingErrorBody>,
}

trait RulesEnvelope {
    fn code(&self) -> i64;
    fn take_error(&mut self) -> Option<StreamingErrorBody>;
}

impl RulesEnvelope for RulesResponse {
    fn code(&self) -> i64 {
        self.code
    }

    fn take_error(&mut self) -> Option<StreamingErrorBody> {
        self.error.take()
    }
}

impl RulesEnvelope for EmptyResponse {
    fn code(&self) -> i64 {
        self.code
    }

    fn take_error(&mut self) -> Option<StreamingErrorBody> {
        self.error.take()
    }
}

impl VkStream {
    /// Lists the rules currently active for this session, in service order.
    pub async fn get_rules(&self) -> Result<Vec<Rule>, VkError> {
        let response: RulesResponse = self.send_rules_request(Method::GET, None::<&()>).await?;
        Ok(response.rules.unwrap_or_default())
    }

    /// Adds a rule. A duplicate `tag` is rejected by the service.
    pub async fn add_rule(&self, value: &str, tag: &str) -> Result<(), VkError> {
        if value.trim().is_empty() {
            return Err(VkError::InvalidArgument("rule value must not be empty"));
        }
        if tag.is_empty() {
            return Err(VkError::InvalidArgument("rule tag must not be empty"));
        }

        let request = AddRuleRequest {
            rule: RuleRef { value, tag },
        };
        let _: EmptyResponse = self.send_rules_request(Method::POST, Some(&request)).await?;
        info!(event = "rule_added", tag);
        Ok(())
    }

    /// Deletes the rule with `tag`. Unknown tags are rejected by the service.
    pub async fn delete_rule(&self, tag: &str) -> Result<(), VkError> {
        if tag.is_empty() {
            return Err(VkError::InvalidArgument("rule tag must not be empty"));
        }

        let request = DeleteRuleRequest { tag };
        let _: EmptyResponse = self
            .send_rules_request(Method::DELETE, Some(&request))
            .await?;
        info!(event = "rule_deleted", tag);
        Ok(())
    }

    /// Lists all rules and deletes them one by one.
    ///
    /// Not atomic: on failure the rules deleted so far stay deleted and the
    /// error carries their tags together with the first failure.
    pub async fn delete_all_rules(&self) -> Result<ClearedRules, ClearRulesError> {
        let rules = self.get_rules().await.map_err(|source| ClearRulesError {
            removed: Vec::new(),
            source,
        })?;

        let mut removed = Vec::with_capacity(rules.len());
        for rule in rules {
            if let Err(source) = self.delete_rule(&rule.tag).await {
                return Err(ClearRulesError { removed, source });
            }
            removed.push(rule.tag);
        }
        Ok(ClearedRules { removed })
    }

    async fn send_rules_request<B, R>(&self, method: Method, body: Option<&B>) -> Result<R, VkError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned + RulesEnvelope,
    {
        let url = self.rules_url()?;
        debug!(event = "rules_request", method = %method, endpoint = %self.endpoint());

        let mut builder = self.http.request(method, url);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(VkError::Transport)?;
        let status = response.status();
        let text = response.text().await.map_err(VkError::Transport)?;
        parse_rules_response(status, &text)
    }
}

fn parse_rules_response<R>(status: StatusCode, body: &str) -> Result<R, VkError>
where
    R: DeserializeOwned + RulesEnvelope,
{
    let mut parsed = match serde_json::from_str::<R>(body) {
        Ok(parsed) => parsed,
        Err(_) if !status.is_success() => {
            return Err(VkError::HttpStatus {
                status,
                body: summarize_error_body(body),
            });
        }
        Err(source) => {
            return Err(VkError::Protocol {
                target: "rules",
                source,
                body: summarize_error_body(body),
            });
        }
    };

    if parsed.code() == RULES_OK_CODE {
        return Ok(parsed);
    }

    let code = parsed.code();
    let api = match parsed.take_error() {
        Some(error) => error.into(),
        None if !status.is_success() => {
            return Err(VkError::HttpStatus {
                status,
                body: summarize_error_body(body),
            });
        }
        None => ApiError {
            code,
            message: "unknown failure".to_string(),
        },
    };
    Err(VkError::streaming(api))
}
