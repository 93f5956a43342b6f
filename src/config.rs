use chrono::{DateTime, Utc};
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::filter::PipelineContext;

pub const DEFAULT_NOTIFY_CHANNEL: &str = "vacancy_changes";
pub const DEFAULT_UNASSIGNED_LABEL: &str = "UNASSIGNED";
pub const DEFAULT_CLOSER_FALLBACK: &str = "SYSTEM";

/// Settings shared by the engine and the store adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub notify_channel: String,
    /// Attribution for vacancies with neither creator nor closer.
    pub unassigned_label: String,
    /// Attribution for closures with no recorded closer.
    pub closer_fallback: String,
    pub fetch_limit: Option<i64>,
    pub max_connections: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            notify_channel: DEFAULT_NOTIFY_CHANNEL.to_string(),
            unassigned_label: DEFAULT_UNASSIGNED_LABEL.to_string(),
            closer_fallback: DEFAULT_CLOSER_FALLBACK.to_string(),
            fetch_limit: Some(5000),
            max_connections: 5,
        }
    }
}

impl EngineSettings {
    pub fn pipeline(&self, now: DateTime<Utc>) -> PipelineContext<'_> {
        PipelineContext {
            now,
            unassigned_label: &self.unassigned_label,
        }
    }
}

/// Command-line and environment configuration for anything touching the store.
#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: String,

    #[arg(long, env = "PULSE_NOTIFY_CHANNEL", default_value = DEFAULT_NOTIFY_CHANNEL)]
    pub notify_channel: String,

    #[arg(long, env = "PULSE_UNASSIGNED_LABEL", default_value = DEFAULT_UNASSIGNED_LABEL)]
    pub unassigned_label: String,

    #[arg(long, env = "PULSE_CLOSER_FALLBACK", default_value = DEFAULT_CLOSER_FALLBACK)]
    pub closer_fallback: String,

    /// Maximum records per fetch; 0 disables the cap
    #[arg(long, env = "PULSE_FETCH_LIMIT", default_value_t = 5000)]
    pub fetch_limit: i64,

    #[arg(long, env = "PULSE_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,
}

impl StoreArgs {
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            notify_channel: self.notify_channel.clone(),
            unassigned_label: self.unassigned_label.clone(),
            closer_fallback: self.closer_fallback.clone(),
            fetch_limit: (self.fetch_limit > 0).then_some(self.fetch_limit),
            max_connections: self.max_connections.max(1),
        }
    }
}
