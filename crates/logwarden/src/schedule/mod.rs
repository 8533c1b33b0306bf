//! In-memory registry of recurring analysis requests.
//!
//! Nothing here runs on a timer. A schedule records the endpoint and a cron
//! expression so an external platform can execute the analysis; cancelling it
//! only removes the record. Schedules are lost when the process exits.

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const ADVISORY_NOTE: &str = "Schedules are stored as configuration only. Wire the cron expression into an external scheduler to run the analysis; cancelling removes the record but stops nothing that runs elsewhere.";

pub type ScheduleId = String;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    pub id: ScheduleId,
    pub endpoint: String,
    pub interval: String,
    pub cron_expression: String,
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ScheduleConfig {
    pub fn has_auth_token(&self) -> bool {
        self.auth_token.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    pub auth_token: Option<String>,
    pub time_range: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CancelOutcome {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ScheduleRegistry {
    next_seq: u64,
    // insertion order is the listing order
    entries: Vec<ScheduleConfig>,
}

impl ScheduleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &mut self,
        endpoint: impl Into<String>,
        interval: impl Into<String>,
        cron_expression: impl Into<String>,
        options: ScheduleOptions,
    ) -> ScheduleConfig {
        self.next_seq += 1;
        let created_at = Utc::now();
        let schedule = ScheduleConfig {
            id: format!("sched_{}_{}", self.next_seq, created_at.timestamp_millis()),
            endpoint: endpoint.into(),
            interval: interval.into(),
            cron_expression: cron_expression.into(),
            auth_token: options.auth_token.filter(|token| !token.is_empty()),
            time_range: options.time_range.filter(|range| !range.is_empty()),
            created_at,
        };
        self.entries.push(schedule.clone());
        schedule
    }

    pub fn get(&self, id: &str) -> Option<&ScheduleConfig> {
        self.entries.iter().find(|schedule| schedule.id == id)
    }

    pub fn cancel(&mut self, id: &str) -> CancelOutcome {
        match self.entries.iter().position(|schedule| schedule.id == id) {
            Some(idx) => {
                let removed = self.entries.remove(idx);
                CancelOutcome {
                    success: true,
                    message: format!("Cancelled schedule {} for {}", removed.id, removed.endpoint),
                }
            }
            None => CancelOutcome {
                success: false,
                message: format!("No schedule found with id {id}"),
            },
        }
    }

    pub fn cancel_by_endpoint(&mut self, endpoint: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|schedule| schedule.endpoint != endpoint);
        before - self.entries.len()
    }

    pub fn cancel_all(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn list(&self) -> Vec<ScheduleConfig> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
