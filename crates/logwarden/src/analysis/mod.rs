use std::sync::Arc;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::{
    config::AnalysisConfig,
    interpreter::{ResolvedRange, TimeInterpreter},
    llm::{LlmClient, strip_code_fence},
    storage::LogLevel,
};

const MAX_SUMMARY_CHARS: usize = 1200;
const MAX_RECOMMENDATIONS: usize = 10;
const MAX_RECOMMENDATION_CHARS: usize = 500;
const RAW_EXCERPT_CHARS: usize = 240;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub endpoint: String,
    #[serde(default)]
    pub time_range: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl AnalysisRequest {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_time_range(mut self, time_range: impl Into<String>) -> Self {
        self.time_range = Some(time_range.into());
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub summary: String,
    pub recommendations: Vec<String>,
    pub time_range: ResolvedRange,
    pub entries_analyzed: usize,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("log endpoint requires authentication (status {status})")]
    AuthRequired { status: u16 },

    #[error("fetching logs failed: {0}")]
    FetchFailed(String),

    #[error("interpreting time range failed: {0}")]
    TimeRange(String),

    #[error("model call failed: {0}")]
    Model(String),

    #[error("model output rejected: {reason}")]
    ParseFailure { reason: String, raw: String },
}

impl AnalysisError {
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::InvalidEndpoint(_) => "invalid_endpoint",
            AnalysisError::AuthRequired { .. } => "auth_required",
            AnalysisError::FetchFailed(_) => "fetch_failed",
            AnalysisError::TimeRange(_) => "time_range",
            AnalysisError::Model(_) => "model",
            AnalysisError::ParseFailure { .. } => "parse_failure",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AnalysisError::InvalidEndpoint(_) => StatusCode::BAD_REQUEST,
            AnalysisError::AuthRequired { .. } => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AnalysisError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({ "error": self.to_string(), "kind": self.kind() });
        if let AnalysisError::ParseFailure { raw, .. } = &self {
            body["raw"] = Value::String(raw.clone());
        }
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct ModelVerdict {
    status: HealthStatus,
    summary: String,
    recommendations: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct LevelCounts {
    errors: usize,
    warnings: usize,
}

/// Fetches logs from a remote endpoint and asks the model for a health verdict.
pub struct LogAnalyzer {
    llm: Arc<dyn LlmClient>,
    interpreter: Arc<TimeInterpreter>,
    http: Client,
    max_prompt_entries: usize,
}

impl LogAnalyzer {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        interpreter: Arc<TimeInterpreter>,
        config: &AnalysisConfig,
    ) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(config.fetch_timeout()).build()?;
        Ok(Self {
            llm,
            interpreter,
            http,
            max_prompt_entries: config.max_prompt_entries.max(1),
        })
    }

    pub async fn analyze(&self, request: AnalysisRequest) -> Result<HealthReport, AnalysisError> {
        self.analyze_at(request, Utc::now()).await
    }

    /// Same as [`LogAnalyzer::analyze`] with relative time text resolved against `now`.
    pub async fn analyze_at(
        &self,
        request: AnalysisRequest,
        now: DateTime<Utc>,
    ) -> Result<HealthReport, AnalysisError> {
        let url = validate_endpoint(&request.endpoint)?;
        let range = self
            .interpreter
            .resolve_time_range(request.time_range.as_deref(), now)
            .await
            .map_err(|err| AnalysisError::TimeRange(format!("{err:#}")))?;

        let entries = self
            .fetch_logs(url, &range, request.auth_token.as_deref())
            .await?;
        let counts = count_levels(&entries);
        let prompt = self.build_prompt(&entries, counts, &range);

        let raw = self
            .llm
            .chat(&prompt)
            .await
            .map_err(|err| AnalysisError::Model(format!("{err:#}")))?;
        let verdict = parse_verdict(&raw)?;

        info!(
            endpoint = %request.endpoint,
            entries = entries.len(),
            errors = counts.errors,
            warnings = counts.warnings,
            status = ?verdict.status,
            "log analysis completed"
        );
        Ok(HealthReport {
            status: verdict.status,
            summary: verdict.summary,
            recommendations: verdict.recommendations,
            time_range: range,
            entries_analyzed: entries.len(),
            analyzed_at: Utc::now(),
        })
    }

    async fn fetch_logs(
        &self,
        url: Url,
        range: &ResolvedRange,
        auth_token: Option<&str>,
    ) -> Result<Vec<Value>, AnalysisError> {
        let mut params: Vec<(&str, &str)> = Vec::new();
        if let Some(from) = range.from.as_deref() {
            params.push(("from", from));
        }
        if let Some(to) = range.to.as_deref() {
            params.push(("to", to));
        }

        let mut builder = self.http.post(url.clone()).query(&params);
        if let Some(token) = auth_token.filter(|token| !token.is_empty()) {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|err| {
            warn!(error = ?err, endpoint = %url, "log fetch failed");
            AnalysisError::FetchFailed(err.to_string())
        })?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AnalysisError::AuthRequired {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(AnalysisError::FetchFailed(format!(
                "endpoint responded with {status}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| AnalysisError::FetchFailed(err.to_string()))?;
        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Array(entries)) => Ok(entries),
            Ok(_) => Err(AnalysisError::FetchFailed(
                "endpoint did not return a JSON array".to_string(),
            )),
            Err(err) => Err(AnalysisError::FetchFailed(format!(
                "endpoint returned invalid JSON: {err}"
            ))),
        }
    }

    fn build_prompt(&self, entries: &[Value], counts: LevelCounts, range: &ResolvedRange) -> String {
        let skip = entries.len().saturating_sub(self.max_prompt_entries);
        let recent = &entries[skip..];
        let logs = serde_json::to_string(recent).unwrap_or_else(|_| "[]".to_string());
        format!(
            "# Phase: ANALYZE\nEntries: {}\nErrors: {}\nWarnings: {}\nFrom: {}\nTo: {}\nClassify system health as Healthy, Warning or Critical. Respond with JSON containing status, summary and recommendations (a list of short actions).\nLogs:\n{logs}",
            entries.len(),
            counts.errors,
            counts.warnings,
            range.from.as_deref().unwrap_or("none"),
            range.to.as_deref().unwrap_or("none"),
        )
    }
}

fn validate_endpoint(endpoint: &str) -> Result<Url, AnalysisError> {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return Err(AnalysisError::InvalidEndpoint("endpoint is empty".to_string()));
    }
    let url = Url::parse(trimmed)
        .map_err(|err| AnalysisError::InvalidEndpoint(format!("{trimmed}: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(AnalysisError::InvalidEndpoint(format!(
            "unsupported scheme {other}"
        ))),
    }
}

fn count_levels(entries: &[Value]) -> LevelCounts {
    entries
        .iter()
        .filter_map(|entry| entry.get("level").and_then(Value::as_str))
        .filter_map(|level| level.parse::<LogLevel>().ok())
        .fold(LevelCounts::default(), |mut counts, level| {
            match level {
                LogLevel::Error => counts.errors += 1,
                LogLevel::Warn => counts.warnings += 1,
                LogLevel::Info => {}
            }
            counts
        })
}

fn parse_verdict(raw: &str) -> Result<ModelVerdict, AnalysisError> {
    let failure = |reason: String| AnalysisError::ParseFailure {
        reason,
        raw: excerpt(raw),
    };

    let verdict: ModelVerdict = serde_json::from_str(strip_code_fence(raw))
        .map_err(|err| failure(format!("output is not a valid verdict: {err}")))?;

    let summary_chars = verdict.summary.trim().chars().count();
    if summary_chars == 0 || summary_chars > MAX_SUMMARY_CHARS {
        return Err(failure(format!(
            "summary must be 1..={MAX_SUMMARY_CHARS} characters, got {summary_chars}"
        )));
    }
    let count = verdict.recommendations.len();
    if count == 0 || count > MAX_RECOMMENDATIONS {
        return Err(failure(format!(
            "expected 1..={MAX_RECOMMENDATIONS} recommendations, got {count}"
        )));
    }
    if let Some(idx) = verdict.recommendations.iter().position(|item| {
        let chars = item.trim().chars().count();
        chars == 0 || chars > MAX_RECOMMENDATION_CHARS
    }) {
        return Err(failure(format!(
            "recommendation {idx} must be 1..={MAX_RECOMMENDATION_CHARS} characters"
        )));
    }
    Ok(verdict)
}

fn excerpt(raw: &str) -> String {
    raw.chars().take(RAW_EXCERPT_CHARS).collect()
}
