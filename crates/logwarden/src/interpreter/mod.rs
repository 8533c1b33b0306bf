use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    llm::{LlmClient, single_line, strip_code_fence},
    storage::format_timestamp,
};

/// Concrete window produced from free-text such as "last 2 hours".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRange {
    pub from: Option<String>,
    pub to: Option<String>,
}

impl ResolvedRange {
    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct RangeReply {
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CronReply {
    cron: String,
}

/// Delegates natural-language time and interval parsing to the model.
pub struct TimeInterpreter {
    llm: Arc<dyn LlmClient>,
}

impl TimeInterpreter {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn resolve_time_range(
        &self,
        text: Option<&str>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<ResolvedRange> {
        let Some(text) = text.map(str::trim).filter(|text| !text.is_empty()) else {
            return Ok(ResolvedRange::default());
        };

        let prompt = format!(
            "# Phase: TIME_RANGE\nNow: {}\nText: {}\nConvert the text into an absolute UTC window. Respond with JSON containing from and to as RFC3339 strings, or null for an open bound.",
            format_timestamp(now),
            single_line(text),
        );
        let raw = self.llm.chat(&prompt).await?;
        let reply: RangeReply = serde_json::from_str(strip_code_fence(&raw))
            .with_context(|| format!("parsing time range response: {raw}"))?;

        let from = normalize_bound(reply.from, "from")?;
        let to = normalize_bound(reply.to, "to")?;
        if let (Some(from), Some(to)) = (&from, &to)
            && from > to
        {
            bail!("time range starts after it ends: {from} > {to}");
        }

        let resolved = ResolvedRange {
            from: from.map(format_timestamp),
            to: to.map(format_timestamp),
        };
        debug!(text, from = ?resolved.from, to = ?resolved.to, "time range resolved");
        Ok(resolved)
    }

    /// Ask the model for a five-field cron expression. The value is only
    /// checked for shape; nothing here executes it.
    pub async fn derive_cron(&self, interval: &str) -> anyhow::Result<String> {
        let prompt = format!(
            "# Phase: CRON\nInterval: {}\nRespond with JSON containing cron as a standard five-field cron expression.",
            single_line(interval),
        );
        let raw = self.llm.chat(&prompt).await?;
        let reply: CronReply = serde_json::from_str(strip_code_fence(&raw))
            .with_context(|| format!("parsing cron response: {raw}"))?;

        let cron = single_line(&reply.cron);
        let fields = cron.split(' ').filter(|field| !field.is_empty()).count();
        if fields != 5 {
            bail!("cron expression must have 5 fields, got {fields}: {cron}");
        }
        Ok(cron)
    }
}

fn normalize_bound(value: Option<String>, field: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
    let Some(value) = value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty() && !value.eq_ignore_ascii_case("null"))
    else {
        return Ok(None);
    };
    let parsed = DateTime::parse_from_rfc3339(&value)
        .with_context(|| format!("model returned an invalid {field} bound: {value}"))?;
    Ok(Some(parsed.with_timezone(&Utc)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FixedReplyClient, LocalStubClient};

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn absent_text_skips_the_model() {
        let client = Arc::new(FixedReplyClient::new("not used"));
        let interpreter = TimeInterpreter::new(client.clone());

        let resolved = interpreter
            .resolve_time_range(None, fixed_now())
            .await
            .unwrap();
        assert!(resolved.is_unbounded());
        let resolved = interpreter
            .resolve_time_range(Some("   "), fixed_now())
            .await
            .unwrap();
        assert!(resolved.is_unbounded());
        assert!(client.prompts().is_empty());
    }

    #[tokio::test]
    async fn stub_window_is_normalized_to_millis() {
        let interpreter = TimeInterpreter::new(Arc::new(LocalStubClient));
        let resolved = interpreter
            .resolve_time_range(Some("the last\n30 minutes"), fixed_now())
            .await
            .unwrap();
        assert_eq!(resolved.from.as_deref(), Some("2025-06-01T11:30:00.000Z"));
        assert_eq!(resolved.to.as_deref(), Some("2025-06-01T12:00:00.000Z"));
    }

    #[tokio::test]
    async fn open_and_offset_bounds_are_accepted() {
        let client = Arc::new(FixedReplyClient::new(
            "```json\n{\"from\": \"2025-06-01T14:00:00+02:00\", \"to\": null}\n```",
        ));
        let interpreter = TimeInterpreter::new(client.clone());
        let resolved = interpreter
            .resolve_time_range(Some("since noon"), fixed_now())
            .await
            .unwrap();
        assert_eq!(resolved.from.as_deref(), Some("2025-06-01T12:00:00.000Z"));
        assert_eq!(resolved.to, None);
        assert!(client.prompts()[0].contains("Text: since noon"));
    }

    #[tokio::test]
    async fn inverted_or_invalid_windows_are_rejected() {
        let inverted = TimeInterpreter::new(Arc::new(FixedReplyClient::new(
            r#"{"from":"2025-06-02T00:00:00Z","to":"2025-06-01T00:00:00Z"}"#,
        )));
        let err = inverted
            .resolve_time_range(Some("x"), fixed_now())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("starts after it ends"));

        let invalid = TimeInterpreter::new(Arc::new(FixedReplyClient::new(
            r#"{"from":"yesterday"}"#,
        )));
        let err = invalid
            .resolve_time_range(Some("x"), fixed_now())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid from bound"));
    }

    #[tokio::test]
    async fn cron_must_have_five_fields() {
        let interpreter = TimeInterpreter::new(Arc::new(LocalStubClient));
        assert_eq!(
            interpreter.derive_cron("every 15 minutes").await.unwrap(),
            "*/15 * * * *"
        );

        let bad = TimeInterpreter::new(Arc::new(FixedReplyClient::new(r#"{"cron":"@hourly"}"#)));
        let err = bad.derive_cron("hourly").await.unwrap_err();
        assert!(err.to_string().contains("5 fields"));

        let garbage = TimeInterpreter::new(Arc::new(FixedReplyClient::new("sure thing!")));
        let err = garbage.derive_cron("hourly").await.unwrap_err();
        assert!(err.to_string().contains("parsing cron response"));
    }
}
