use std::{env, sync::Arc, time::Duration};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde_json::json;

use crate::{config::LlmProviderConfig, storage::format_timestamp};

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, prompt: &str) -> anyhow::Result<String>;
    fn identity(&self) -> LlmIdentity;
}

pub fn client_from_config(config: &LlmProviderConfig) -> anyhow::Result<Arc<dyn LlmClient>> {
    let client: Arc<dyn LlmClient> = match config {
        LlmProviderConfig::LocalStub => Arc::new(LocalStubClient),
        LlmProviderConfig::OpenAi {
            model,
            api_key_env,
            base_url,
            organization,
            timeout_secs,
        } => Arc::new(OpenAiClient::from_env(
            api_key_env,
            model,
            base_url.clone(),
            organization.clone(),
            Duration::from_secs(*timeout_secs),
        )?),
    };
    Ok(client)
}

/// Offline stand-in for a real model. Answers each prompt phase with fixed
/// keyword rules so the service runs without network access.
#[derive(Debug, Default)]
pub struct LocalStubClient;

#[async_trait]
impl LlmClient for LocalStubClient {
    async fn chat(&self, prompt: &str) -> anyhow::Result<String> {
        let phase = extract_value(prompt, "# Phase:").unwrap_or_default();
        let response = match phase.as_str() {
            "ROUTE" => {
                let message = extract_value(prompt, "Message:").unwrap_or_default();
                stub_route(&message)
            }
            "TIME_RANGE" => {
                let now = extract_value(prompt, "Now:")
                    .and_then(|value| DateTime::parse_from_rfc3339(&value).ok())
                    .map(|value| value.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now);
                let text = extract_value(prompt, "Text:").unwrap_or_default();
                stub_time_range(&text, now)
            }
            "CRON" => {
                let interval = extract_value(prompt, "Interval:").unwrap_or_default();
                json!({ "cron": stub_cron(&interval) })
            }
            "ANALYZE" => {
                let count = |prefix: &str| {
                    extract_value(prompt, prefix)
                        .and_then(|value| value.parse::<usize>().ok())
                        .unwrap_or_default()
                };
                stub_analysis(count("Entries:"), count("Errors:"), count("Warnings:"))
            }
            _ => anyhow::bail!("stub LLM only supports ROUTE, TIME_RANGE, CRON and ANALYZE phases"),
        };
        Ok(response.to_string())
    }

    fn identity(&self) -> LlmIdentity {
        LlmIdentity::new("local_stub", Some("local_stub".to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpanUnit {
    Minute,
    Hour,
    Day,
    Week,
}

impl SpanUnit {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "minute" | "minutes" | "min" | "mins" => Some(SpanUnit::Minute),
            "hour" | "hours" | "hr" | "hrs" | "hourly" => Some(SpanUnit::Hour),
            "day" | "days" | "daily" => Some(SpanUnit::Day),
            "week" | "weeks" | "weekly" => Some(SpanUnit::Week),
            _ => None,
        }
    }

    fn duration(self, count: u32) -> ChronoDuration {
        let count = i64::from(count);
        match self {
            SpanUnit::Minute => ChronoDuration::minutes(count),
            SpanUnit::Hour => ChronoDuration::hours(count),
            SpanUnit::Day => ChronoDuration::days(count),
            SpanUnit::Week => ChronoDuration::weeks(count),
        }
    }
}

fn words(text: &str) -> Vec<String> {
    text.to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_span(text: &str) -> Option<(u32, SpanUnit)> {
    let tokens = words(text);
    tokens.iter().enumerate().find_map(|(idx, token)| {
        let unit = SpanUnit::parse(token)?;
        let count = idx
            .checked_sub(1)
            .and_then(|prev| tokens[prev].parse::<u32>().ok())
            .unwrap_or(1);
        Some((count.max(1), unit))
    })
}

fn stub_time_range(text: &str, now: DateTime<Utc>) -> serde_json::Value {
    let from = match parse_span(text) {
        Some((count, unit)) => now - unit.duration(count),
        None if words(text).iter().any(|word| word == "today") => now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc())
            .unwrap_or(now),
        None => now - ChronoDuration::hours(24),
    };
    json!({ "from": format_timestamp(from), "to": format_timestamp(now) })
}

fn stub_cron(interval: &str) -> String {
    match parse_span(interval) {
        Some((1, SpanUnit::Minute)) => "* * * * *".to_string(),
        Some((count, SpanUnit::Minute)) => format!("*/{count} * * * *"),
        Some((1, SpanUnit::Hour)) => "0 * * * *".to_string(),
        Some((count, SpanUnit::Hour)) => format!("0 */{count} * * *"),
        Some((1, SpanUnit::Day)) => "0 0 * * *".to_string(),
        Some((count, SpanUnit::Day)) => format!("0 0 */{count} * *"),
        Some((_, SpanUnit::Week)) => "0 0 * * 0".to_string(),
        None => "0 * * * *".to_string(),
    }
}

fn stub_analysis(entries: usize, errors: usize, warnings: usize) -> serde_json::Value {
    let (status, recommendations) = if errors > 0 {
        (
            "Critical",
            vec![
                "Investigate the ERROR entries and their originating services".to_string(),
                "Check recent deployments for regressions".to_string(),
            ],
        )
    } else if warnings > 0 {
        (
            "Warning",
            vec!["Review WARN entries before they escalate".to_string()],
        )
    } else {
        (
            "Healthy",
            vec!["No action required; keep monitoring".to_string()],
        )
    };
    json!({
        "status": status,
        "summary": format!("{entries} log entries reviewed: {errors} errors, {warnings} warnings."),
        "recommendations": recommendations,
    })
}

fn stub_route(message: &str) -> serde_json::Value {
    let raw_tokens: Vec<&str> = message
        .split_whitespace()
        .map(|token| token.trim_end_matches([',', '.', ';', ')', '!', '?']))
        .collect();
    let lowered = words(message);
    let has_word = |word: &str| lowered.iter().any(|token| token == word);

    let endpoint = raw_tokens
        .iter()
        .find(|token| token.starts_with("http://") || token.starts_with("https://"))
        .map(|token| token.to_string());
    let auth_token = raw_tokens
        .iter()
        .position(|token| token.eq_ignore_ascii_case("token") || token.eq_ignore_ascii_case("bearer"))
        .and_then(|idx| raw_tokens.get(idx + 1))
        .map(|token| token.to_string());
    let phrase_after = |anchors: &[&str], extra: usize| {
        lowered
            .iter()
            .position(|token| anchors.contains(&token.as_str()))
            .map(|idx| lowered[idx..(idx + 1 + extra).min(lowered.len())].join(" "))
    };

    if ["cancel", "stop", "remove", "delete"].iter().any(|word| has_word(word)) {
        let id = raw_tokens
            .iter()
            .find(|token| token.starts_with("sched_"))
            .map(|token| token.to_string());
        let endpoint = if id.is_none() { endpoint } else { None };
        return json!({
            "tool": "cancel_schedule",
            "arguments": {
                "id": id,
                "endpoint": endpoint,
                "all": has_word("all"),
            },
        });
    }

    if has_word("list") || (has_word("show") && lowered.iter().any(|w| w.starts_with("schedul"))) {
        return json!({ "tool": "list_schedules" });
    }

    if let Some(endpoint) = endpoint {
        let interval = phrase_after(&["every"], 2)
            .or_else(|| phrase_after(&["hourly", "daily", "weekly"], 0));
        if let Some(interval) = interval {
            return json!({
                "tool": "schedule_analysis",
                "arguments": {
                    "endpoint": endpoint,
                    "interval": interval,
                    "auth_token": auth_token,
                    "time_range": phrase_after(&["last", "past"], 2),
                },
            });
        }
        return json!({
            "tool": "analyze_logs",
            "arguments": {
                "endpoint": endpoint,
                "time_range": phrase_after(&["last", "past", "today"], 2),
                "auth_token": auth_token,
            },
        });
    }

    json!({
        "tool": "respond",
        "arguments": {
            "message": "I can analyze logs from an endpoint, schedule recurring analyses, and list or cancel schedules. Include the log endpoint URL in your request.",
        },
    })
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: Client,
    model: String,
    api_key: String,
    base_url: String,
    organization: Option<String>,
}

impl OpenAiClient {
    pub fn from_env(
        api_key_env: &str,
        model: &str,
        base_url: Option<String>,
        organization: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let api_key = env::var(api_key_env)
            .with_context(|| format!("reading OpenAI api key from {api_key_env}"))?;
        Self::new(api_key, model, base_url, organization, timeout)
    }

    pub fn new(
        api_key: String,
        model: &str,
        base_url: Option<String>,
        organization: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let normalized_base = base_url
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http: client,
            model: model.to_string(),
            api_key,
            base_url: normalized_base,
            organization,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat(&self, prompt: &str) -> anyhow::Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "temperature": 0.1,
                "response_format": {"type": "json_object"},
                "messages": [
                    {"role": "system", "content": "You are a site-reliability assistant that reviews server logs. Always answer with valid JSON."},
                    {"role": "user", "content": prompt}
                ],
            }));

        if let Some(org) = &self.organization {
            request = request.header("OpenAI-Organization", org);
        }

        let response = request
            .send()
            .await
            .with_context(|| "sending request to OpenAI")?
            .error_for_status()
            .with_context(|| "OpenAI returned an error status")?;

        let payload: serde_json::Value = response
            .json()
            .await
            .with_context(|| "parsing OpenAI response body")?;

        payload
            .get("choices")
            .and_then(|choices| choices.as_array())
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .map(|content| content.to_string())
            .ok_or_else(|| anyhow!("missing message content in OpenAI response"))
    }

    fn identity(&self) -> LlmIdentity {
        LlmIdentity::new("openai", Some(self.model.clone()))
    }
}

pub(crate) fn extract_value(prompt: &str, prefix: &str) -> Option<String> {
    prompt
        .lines()
        .find_map(|line| line.trim().strip_prefix(prefix))
        .map(|value| value.trim().to_string())
}

/// Strip a surrounding Markdown code fence that some models wrap around JSON.
pub(crate) fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Keep a prompt field on one line so `Key: value` lookups stay unambiguous.
pub(crate) fn single_line(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone)]
pub struct LlmIdentity {
    pub provider: &'static str,
    pub model: Option<String>,
}

impl LlmIdentity {
    pub fn new(provider: &'static str, model: Option<String>) -> Self {
        Self { provider, model }
    }
}

/// Client that answers every prompt with the same text and records prompts.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct FixedReplyClient {
    reply: String,
    prompts: parking_lot::Mutex<Vec<String>>,
}

#[cfg(test)]
impl FixedReplyClient {
    pub(crate) fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            prompts: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl LlmClient for FixedReplyClient {
    async fn chat(&self, prompt: &str) -> anyhow::Result<String> {
        self.prompts.lock().push(prompt.to_string());
        Ok(self.reply.clone())
    }

    fn identity(&self) -> LlmIdentity {
        LlmIdentity::new("fixed_reply", None)
    }
}
