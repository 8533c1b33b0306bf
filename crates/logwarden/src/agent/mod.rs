use std::{fmt::Write, sync::Arc};

use anyhow::{Context, bail};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::{
    analysis::{AnalysisRequest, LogAnalyzer},
    interpreter::TimeInterpreter,
    llm::{LlmClient, single_line, strip_code_fence},
    schedule::{ADVISORY_NOTE, ScheduleConfig, ScheduleOptions, ScheduleRegistry},
};

/// Tool selected by the ROUTE phase, `{"tool": ..., "arguments": {...}}` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "tool", content = "arguments", rename_all = "snake_case")]
pub enum ToolCall {
    AnalyzeLogs {
        endpoint: String,
        #[serde(default)]
        time_range: Option<String>,
        #[serde(default)]
        auth_token: Option<String>,
    },
    ScheduleAnalysis {
        endpoint: String,
        interval: String,
        #[serde(default)]
        time_range: Option<String>,
        #[serde(default)]
        auth_token: Option<String>,
    },
    ListSchedules,
    CancelSchedule {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        all: bool,
    },
    Respond {
        message: String,
    },
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::AnalyzeLogs { .. } => "analyze_logs",
            ToolCall::ScheduleAnalysis { .. } => "schedule_analysis",
            ToolCall::ListSchedules => "list_schedules",
            ToolCall::CancelSchedule { .. } => "cancel_schedule",
            ToolCall::Respond { .. } => "respond",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentReply {
    pub tool: String,
    pub reply: String,
    pub data: Value,
}

impl AgentReply {
    fn new(tool: &ToolCall, reply: impl Into<String>, data: Value) -> Self {
        Self {
            tool: tool.name().to_string(),
            reply: reply.into(),
            data,
        }
    }
}

pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    analyzer: Arc<LogAnalyzer>,
    interpreter: Arc<TimeInterpreter>,
    schedules: Arc<RwLock<ScheduleRegistry>>,
}

impl AgentRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        analyzer: Arc<LogAnalyzer>,
        interpreter: Arc<TimeInterpreter>,
        schedules: Arc<RwLock<ScheduleRegistry>>,
    ) -> Self {
        Self {
            llm,
            analyzer,
            interpreter,
            schedules,
        }
    }

    pub async fn handle(&self, message: &str) -> anyhow::Result<AgentReply> {
        let message = single_line(message);
        if message.is_empty() {
            bail!("message must not be empty");
        }

        let call = self.route(&message).await?;
        info!(tool = call.name(), "agent dispatching tool");
        let reply = match &call {
            ToolCall::AnalyzeLogs {
                endpoint,
                time_range,
                auth_token,
            } => {
                let request = AnalysisRequest {
                    endpoint: endpoint.clone(),
                    time_range: time_range.clone(),
                    auth_token: auth_token.clone(),
                };
                self.run_analysis(&call, request).await
            }
            ToolCall::ScheduleAnalysis {
                endpoint,
                interval,
                time_range,
                auth_token,
            } => {
                let options = ScheduleOptions {
                    auth_token: auth_token.clone(),
                    time_range: time_range.clone(),
                };
                match self.schedule_analysis(endpoint, interval, options).await {
                    Ok(schedule) => AgentReply::new(
                        &call,
                        format!(
                            "Scheduled analysis of {} ({}, cron `{}`) as {}. {ADVISORY_NOTE}",
                            schedule.endpoint,
                            schedule.interval,
                            schedule.cron_expression,
                            schedule.id
                        ),
                        json!({ "schedule": schedule, "note": ADVISORY_NOTE }),
                    ),
                    Err(err) => {
                        warn!(error = ?err, endpoint = %endpoint, "scheduling from chat failed");
                        AgentReply::new(
                            &call,
                            format!("I could not schedule that analysis: {err:#}"),
                            json!({ "error": { "kind": "schedule", "message": format!("{err:#}") } }),
                        )
                    }
                }
            }
            ToolCall::ListSchedules => {
                let schedules = self.schedules.read().list();
                AgentReply::new(
                    &call,
                    describe_schedules(&schedules),
                    json!({ "schedules": schedules, "note": ADVISORY_NOTE }),
                )
            }
            ToolCall::CancelSchedule { id, endpoint, all } => {
                self.cancel(&call, id.as_deref(), endpoint.as_deref(), *all)
            }
            ToolCall::Respond { message } => AgentReply::new(&call, message.clone(), Value::Null),
        };
        Ok(reply)
    }

    /// Derive a cron expression for `interval` and record the schedule.
    pub async fn schedule_analysis(
        &self,
        endpoint: &str,
        interval: &str,
        options: ScheduleOptions,
    ) -> anyhow::Result<ScheduleConfig> {
        let endpoint = endpoint.trim();
        let interval = interval.trim();
        if endpoint.is_empty() || interval.is_empty() {
            bail!("endpoint and interval are required");
        }

        let cron = self
            .interpreter
            .derive_cron(interval)
            .await
            .with_context(|| format!("deriving cron expression for {interval:?}"))?;
        let schedule = self
            .schedules
            .write()
            .create(endpoint, interval, cron, options);
        info!(id = %schedule.id, endpoint = %schedule.endpoint, cron = %schedule.cron_expression, "schedule recorded");
        Ok(schedule)
    }

    async fn route(&self, message: &str) -> anyhow::Result<ToolCall> {
        let prompt = format!(
            "# Phase: ROUTE\nMessage: {message}\nTools: analyze_logs(endpoint, time_range?, auth_token?), schedule_analysis(endpoint, interval, time_range?, auth_token?), list_schedules, cancel_schedule(id? | endpoint? | all), respond(message)\nRespond with JSON containing tool and arguments."
        );
        let raw = self.llm.chat(&prompt).await?;
        serde_json::from_str(strip_code_fence(&raw))
            .with_context(|| format!("parsing tool call response: {raw}"))
    }

    async fn run_analysis(&self, call: &ToolCall, request: AnalysisRequest) -> AgentReply {
        let endpoint = request.endpoint.clone();
        match self.analyzer.analyze(request).await {
            Ok(report) => {
                let mut reply = format!("{:?}: {}", report.status, report.summary);
                for item in &report.recommendations {
                    let _ = write!(&mut reply, "\n- {item}");
                }
                AgentReply::new(call, reply, json!({ "report": report }))
            }
            Err(err) => {
                warn!(error = ?err, endpoint = %endpoint, "analysis from chat failed");
                AgentReply::new(
                    call,
                    format!("I could not analyze {endpoint}: {err}"),
                    json!({ "error": { "kind": err.kind(), "message": err.to_string() } }),
                )
            }
        }
    }

    fn cancel(
        &self,
        call: &ToolCall,
        id: Option<&str>,
        endpoint: Option<&str>,
        all: bool,
    ) -> AgentReply {
        let mut schedules = self.schedules.write();
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            let outcome = schedules.cancel(id);
            return AgentReply::new(call, outcome.message.clone(), json!(outcome));
        }
        if let Some(endpoint) = endpoint.filter(|endpoint| !endpoint.is_empty()) {
            let cancelled = schedules.cancel_by_endpoint(endpoint);
            return AgentReply::new(
                call,
                format!("Cancelled {cancelled} schedule(s) for {endpoint}."),
                json!({ "cancelled": cancelled }),
            );
        }
        if all {
            let cancelled = schedules.cancel_all();
            return AgentReply::new(
                call,
                format!("Cancelled all {cancelled} schedule(s)."),
                json!({ "cancelled": cancelled }),
            );
        }
        AgentReply::new(
            call,
            "Tell me a schedule id, an endpoint, or ask to cancel all schedules.",
            json!({ "cancelled": 0 }),
        )
    }
}

fn describe_schedules(schedules: &[ScheduleConfig]) -> String {
    if schedules.is_empty() {
        return format!("No schedules configured. {ADVISORY_NOTE}");
    }

    let mut text = String::new();
    for schedule in schedules {
        let _ = writeln!(
            &mut text,
            "{}: {} every \"{}\" (cron `{}`)",
            schedule.id, schedule.endpoint, schedule.interval, schedule.cron_expression
        );
    }
    text.push_str(ADVISORY_NOTE);
    text
}
